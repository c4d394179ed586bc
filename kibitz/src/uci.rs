//! Universal Chess Interface driver

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use shakmaty::uci::UciMove;
use shakmaty::Move;
use tracing::{error, warn};

use crate::analysis::{self, AnalysisSink};
use crate::board::{Board, STARTING_FEN};
use crate::engine::PlayResult;
use crate::error::{EngineError, Result};
use crate::info::{Info, InfoSelector};
use crate::limit::Limit;
use crate::option::{EngineOption, OptionMap, OptionType, Value};
use crate::score::{PovScore, Score};
use crate::session::{Command, Driver, Flow, Job};
use crate::transport::{Event, Transport};

/// Options the driver manages on its own; configuring them directly is
/// rejected. Compared case-insensitively.
const MANAGED_OPTIONS: [&str; 5] = [
    "uci_chess960",
    "uci_variant",
    "uci_analysemode",
    "multipv",
    "ponder",
];

/// The variant tag of the board collaborator; only standard chess (plus
/// Chess960 castling) is spoken here
const UCI_VARIANT: &str = "chess";

/// Working state of an active `play` command
struct PlayState {
    /// Latest merged search information
    info: Info,
    /// The result was delivered and the engine is pondering the reply
    pondering: bool,
    /// Config snapshot to restore when the command winds down
    previous: OptionMap<Value>,
}

/// Working state of an active `analysis` command
struct AnalysisState {
    sink: AnalysisSink,
    previous: OptionMap<Value>,
}

pub(crate) struct Uci {
    options: OptionMap<EngineOption>,
    config: OptionMap<Value>,
    id: HashMap<String, String>,
    /// The position most recently sent to the engine
    board: Board,
    game: Option<String>,
    first_game: bool,
    play: Option<PlayState>,
    analysis: Option<AnalysisState>,
}

impl Uci {
    pub(crate) fn new() -> Self {
        Self {
            options: OptionMap::case_insensitive(),
            config: OptionMap::case_insensitive(),
            id: HashMap::new(),
            board: Board::new(),
            game: None,
            first_game: true,
            play: None,
            analysis: None,
        }
    }

    /// Effective value of an option: the applied config, falling back to
    /// the declared default
    fn effective(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.config.get(name) {
            return Some(value.clone());
        }
        self.options.get(name).and_then(|option| option.default.clone())
    }

    /// Validates and applies one option, skipping the write when the value
    /// is already in effect. Buttons are always sent.
    async fn setoption(&mut self, io: &mut Transport, name: &str, value: Value) -> Result<()> {
        let option = self.options.get(name).ok_or_else(|| {
            EngineError::protocol(format!("engine does not support option {name}"))
        })?;
        match option.parse(&value)? {
            None => io.write_line(&format!("setoption name {name}")).await,
            Some(value) => {
                if self.effective(name).as_ref() != Some(&value) {
                    io.write_line(&format!("setoption name {name} value {value}"))
                        .await?;
                    self.config.insert(name, value);
                }
                Ok(())
            }
        }
    }

    /// Applies caller options, rejecting the managed set
    async fn apply(&mut self, io: &mut Transport, options: &[(String, Value)]) -> Result<()> {
        for (name, value) in options {
            if MANAGED_OPTIONS
                .iter()
                .any(|managed| name.eq_ignore_ascii_case(managed))
            {
                return Err(EngineError::protocol(format!(
                    "cannot set {name} which is automatically managed"
                )));
            }
            self.setoption(io, name, value.clone()).await?;
        }
        Ok(())
    }

    /// Restores a config snapshot, then re-applies defaults for anything
    /// the snapshot does not cover (modulo the options `keep` as they are)
    async fn restore(
        &mut self,
        io: &mut Transport,
        previous: OptionMap<Value>,
        keep: &[&str],
    ) -> Result<()> {
        let mut restores: Vec<(String, Value)> = previous
            .iter()
            .map(|(name, value)| (name.to_owned(), value.clone()))
            .collect();
        for (name, option) in self.options.iter() {
            if keep.iter().any(|kept| name.eq_ignore_ascii_case(kept)) {
                continue;
            }
            if previous.contains(name) {
                continue;
            }
            if let Some(default) = &option.default {
                restores.push((name.to_owned(), default.clone()));
            }
        }
        for (name, value) in restores {
            self.setoption(io, &name, value).await?;
        }
        Ok(())
    }

    async fn new_game(&mut self, io: &mut Transport, game: &Option<String>) -> Result<()> {
        if self.first_game || self.game != *game {
            io.write_line("ucinewgame").await?;
        }
        self.first_game = false;
        self.game = game.clone();
        Ok(())
    }

    /// Frames the position: variant selection, then `position`, tracking
    /// the board in lock-step
    async fn send_position(&mut self, io: &mut Transport, board: &Board) -> Result<()> {
        let variant = Value::Str(UCI_VARIANT.into());
        if self
            .effective("UCI_Variant")
            .unwrap_or_else(|| Value::Str(UCI_VARIANT.into()))
            != variant
        {
            if !self.options.contains("UCI_Variant") {
                return Err(EngineError::protocol("engine does not support UCI_Variant"));
            }
            self.setoption(io, "UCI_Variant", variant).await?;
        }

        let chess960 = Value::Bool(board.chess960());
        if self.effective("UCI_Chess960").unwrap_or(Value::Bool(false)) != chess960 {
            if !self.options.contains("UCI_Chess960") {
                return Err(EngineError::protocol("engine does not support UCI_Chess960"));
            }
            self.setoption(io, "UCI_Chess960", chess960).await?;
        }

        let mut line = String::from("position");
        let fen = board.fen();
        if fen == STARTING_FEN {
            line.push_str(" startpos");
        } else if board.chess960() {
            let _ = write!(line, " fen {}", board.shredder_fen());
        } else {
            let _ = write!(line, " fen {fen}");
        }
        if !board.move_stack().is_empty() {
            line.push_str(" moves");
            for mov in board.move_stack() {
                let _ = write!(line, " {}", board.uci(mov));
            }
        }
        io.write_line(&line).await?;

        self.board = board.without_stack();
        Ok(())
    }

    async fn send_go(
        &mut self,
        io: &mut Transport,
        limit: &Limit,
        root_moves: Option<&[Move]>,
        ponder: bool,
        infinite: bool,
    ) -> Result<()> {
        let mut line = String::from("go");
        if ponder {
            line.push_str(" ponder");
        }
        if let Some(clock) = limit.white_clock {
            let _ = write!(line, " wtime {}", clock.as_millis());
        }
        if let Some(clock) = limit.black_clock {
            let _ = write!(line, " btime {}", clock.as_millis());
        }
        if let Some(inc) = limit.white_inc {
            let _ = write!(line, " winc {}", inc.as_millis());
        }
        if let Some(inc) = limit.black_inc {
            let _ = write!(line, " binc {}", inc.as_millis());
        }
        if let Some(moves) = limit.remaining_moves {
            if moves > 0 {
                let _ = write!(line, " movestogo {moves}");
            }
        }
        if let Some(depth) = limit.depth {
            let _ = write!(line, " depth {depth}");
        }
        if let Some(nodes) = limit.nodes {
            let _ = write!(line, " nodes {nodes}");
        }
        if let Some(mate) = limit.mate {
            let _ = write!(line, " mate {mate}");
        }
        if let Some(time) = limit.time {
            let _ = write!(line, " movetime {}", time.as_millis());
        }
        if infinite {
            line.push_str(" infinite");
        }
        if let Some(moves) = root_moves {
            if !moves.is_empty() {
                line.push_str(" searchmoves");
                for mov in moves {
                    let _ = write!(line, " {}", self.board.uci(mov));
                }
            }
        }
        io.write_line(&line).await
    }

    async fn start_play(&mut self, io: &mut Transport, cmd: &mut Command) -> Result<Flow> {
        let Job::Play { board, limit, opts, .. } = &cmd.job else {
            unreachable!()
        };
        let (board, limit, opts) = (board.clone(), limit.clone(), opts.clone());

        let previous = self.config.clone();
        if self.options.contains("UCI_AnalyseMode") {
            self.setoption(io, "UCI_AnalyseMode", Value::Bool(false)).await?;
        }
        if self.options.contains("Ponder") {
            self.setoption(io, "Ponder", Value::Bool(opts.ponder)).await?;
        }
        if let Some(default) = self.options.get("MultiPV").and_then(|option| option.default.clone())
        {
            self.setoption(io, "MultiPV", default).await?;
        }
        self.apply(io, &opts.options).await?;

        self.new_game(io, &opts.game).await?;
        self.send_position(io, &board).await?;
        self.send_go(io, &limit, opts.root_moves.as_deref(), false, false)
            .await?;

        self.play = Some(PlayState {
            info: Info::default(),
            pondering: false,
            previous,
        });
        Ok(Flow::Continue)
    }

    async fn start_analysis(&mut self, io: &mut Transport, cmd: &mut Command) -> Result<Flow> {
        let Job::Analysis { board, limit, opts, requests, .. } = &cmd.job else {
            unreachable!()
        };
        let (board, limit, opts) = (board.clone(), limit.clone(), opts.clone());
        let requests = requests.clone();
        let seq = cmd.seq;

        let previous = self.config.clone();
        if self.options.contains("UCI_AnalyseMode") {
            self.setoption(io, "UCI_AnalyseMode", Value::Bool(true)).await?;
        }
        if self.options.contains("MultiPV") || opts.multipv.is_some_and(|pv| pv > 1) {
            let multipv = opts.multipv.unwrap_or(1);
            self.setoption(io, "MultiPV", Value::Int(multipv as i64)).await?;
        }
        self.apply(io, &opts.options).await?;

        self.new_game(io, &opts.game).await?;
        self.send_position(io, &board).await?;
        match &limit {
            Some(limit) => {
                self.send_go(io, limit, opts.root_moves.as_deref(), false, false)
                    .await?
            }
            None => {
                self.send_go(io, &Limit::default(), opts.root_moves.as_deref(), false, true)
                    .await?
            }
        }

        let (sink, handle) = analysis::channel(seq, requests);
        let Job::Analysis { reply, .. } = &mut cmd.job else {
            unreachable!()
        };
        reply.resolve(handle);

        self.analysis = Some(AnalysisState { sink, previous });
        Ok(Flow::Continue)
    }

    async fn play_line(&mut self, io: &mut Transport, cmd: &mut Command, line: &str) -> Result<Flow> {
        if let Some(arg) = line.strip_prefix("info ") {
            let Job::Play { opts, .. } = &cmd.job else {
                unreachable!()
            };
            let selector = opts.info;
            let state = self.play.as_mut().expect("play command without state");
            if !state.pondering {
                let update = parse_info(arg, &self.board, selector);
                state.info.update(&update);
            }
            Ok(Flow::Continue)
        } else if let Some(arg) = line.strip_prefix("bestmove ") {
            self.play_bestmove(io, cmd, arg).await
        } else {
            warn!("unexpected engine output: {line}");
            Ok(Flow::Continue)
        }
    }

    async fn play_bestmove(
        &mut self,
        io: &mut Transport,
        cmd: &mut Command,
        arg: &str,
    ) -> Result<Flow> {
        let mut state = self.play.take().expect("play command without state");

        // A best move arriving while pondering ends the background search,
        // either because the engine was stopped or gave up on its own.
        if state.pondering {
            state.pondering = false;
            return self.play_end(io, state).await;
        }
        if cmd.reply_cancelled() {
            return self.play_end(io, state).await;
        }

        let Job::Play { limit, opts, reply, .. } = &mut cmd.job else {
            unreachable!()
        };
        let tokens: Vec<&str> = arg.split_whitespace().collect();

        let mut best: Option<Move> = None;
        match tokens.first() {
            None => {
                reply.fail(EngineError::protocol("engine sent an empty bestmove"));
                return self.play_end(io, state).await;
            }
            Some(&"(none)") => {}
            Some(token) => match self.board.parse_uci(token) {
                Ok(mov) => best = Some(mov),
                Err(err) => {
                    reply.fail(err);
                    return self.play_end(io, state).await;
                }
            },
        }

        let mut ponder_move: Option<Move> = None;
        if let Some(mov) = &best {
            if tokens.get(1) == Some(&"ponder") {
                if let Some(token) = tokens.get(2).filter(|token| **token != "(none)") {
                    // The ponder move is parsed after the best move; the
                    // board stays in lock-step for the ponder search below.
                    if self.board.push(mov.clone()).is_ok() {
                        match self.board.push_uci(token) {
                            Ok(mov) => ponder_move = Some(mov),
                            Err(err) => error!(%err, "engine sent an invalid ponder move"),
                        }
                    }
                }
            }
        }

        reply.resolve(PlayResult {
            mov: best,
            ponder: ponder_move.clone(),
            info: std::mem::take(&mut state.info),
            draw_offered: false,
        });

        if opts.ponder && ponder_move.is_some() {
            state.pondering = true;
            let board = self.board.clone();
            let limit = limit.clone();
            self.send_position(io, &board).await?;
            self.send_go(io, &limit, None, true, false).await?;
            self.play = Some(state);
            return Ok(Flow::Continue);
        }

        self.play_end(io, state).await
    }

    async fn play_end(&mut self, io: &mut Transport, state: PlayState) -> Result<Flow> {
        self.restore(io, state.previous, &["uci_analysemode", "ponder"])
            .await?;
        Ok(Flow::Finished)
    }

    async fn analysis_line(
        &mut self,
        io: &mut Transport,
        cmd: &mut Command,
        line: &str,
    ) -> Result<Flow> {
        if let Some(arg) = line.strip_prefix("info ") {
            let Job::Analysis { opts, .. } = &cmd.job else {
                unreachable!()
            };
            let info = parse_info(arg, &self.board, opts.info);
            if let Some(state) = &self.analysis {
                state.sink.post(info);
            }
            Ok(Flow::Continue)
        } else if line.starts_with("bestmove ") {
            let AnalysisState { sink, previous } =
                self.analysis.take().expect("analysis command without state");
            if let Err(err) = self
                .restore(io, previous, &["uci_analysemode", "ponder", "multipv"])
                .await
            {
                sink.fail(err.clone());
                return Err(err);
            }
            sink.finish();
            Ok(Flow::Finished)
        } else {
            warn!("unexpected engine output: {line}");
            Ok(Flow::Continue)
        }
    }
}

#[async_trait]
impl Driver for Uci {
    async fn initialize(&mut self, io: &mut Transport) -> Result<()> {
        io.write_line("uci").await?;
        loop {
            match io.recv().await? {
                Event::Line(line) => {
                    if line == "uciok" {
                        return Ok(());
                    } else if let Some(arg) = line.strip_prefix("option ") {
                        match parse_option(arg) {
                            Ok(option) => self.options.insert(option.name.clone(), option),
                            Err(err) => {
                                error!(%err, "ignoring unparseable option declaration: {line}")
                            }
                        }
                    } else if let Some(arg) = line.strip_prefix("id ") {
                        if let Some((key, value)) = arg.split_once(' ') {
                            self.id.insert(key.to_owned(), value.to_owned());
                        }
                    }
                }
                Event::Exited(code) => return Err(EngineError::Terminated { code }),
            }
        }
    }

    async fn start(&mut self, io: &mut Transport, cmd: &mut Command) -> Result<Flow> {
        match &cmd.job {
            Job::Ping { .. } => {
                io.write_line("isready").await?;
                Ok(Flow::Continue)
            }
            Job::Configure { .. } => {
                let Job::Configure { options, .. } = &cmd.job else {
                    unreachable!()
                };
                let options = options.clone();
                self.apply(io, &options).await?;
                let Job::Configure { reply, .. } = &mut cmd.job else {
                    unreachable!()
                };
                reply.resolve(());
                Ok(Flow::Finished)
            }
            Job::Play { .. } => self.start_play(io, cmd).await,
            Job::Analysis { .. } => self.start_analysis(io, cmd).await,
        }
    }

    async fn line_received(
        &mut self,
        io: &mut Transport,
        cmd: &mut Command,
        line: &str,
    ) -> Result<Flow> {
        match &cmd.job {
            Job::Ping { .. } => {
                if line == "readyok" {
                    let Job::Ping { reply } = &mut cmd.job else {
                        unreachable!()
                    };
                    reply.resolve(());
                    Ok(Flow::Finished)
                } else {
                    warn!("unexpected engine output: {line}");
                    Ok(Flow::Continue)
                }
            }
            Job::Configure { .. } => {
                warn!("unexpected engine output: {line}");
                Ok(Flow::Continue)
            }
            Job::Play { .. } => self.play_line(io, cmd, line).await,
            Job::Analysis { .. } => self.analysis_line(io, cmd, line).await,
        }
    }

    async fn cancel(&mut self, io: &mut Transport, cmd: &mut Command) -> Result<()> {
        match &cmd.job {
            Job::Play { .. } | Job::Analysis { .. } => io.write_line("stop").await,
            _ => Ok(()),
        }
    }

    fn engine_terminated(&mut self, _cmd: &mut Command, err: &EngineError) {
        self.play = None;
        if let Some(state) = self.analysis.take() {
            state.sink.fail(err.clone());
        }
    }

    fn options(&self) -> &OptionMap<EngineOption> {
        &self.options
    }

    fn id(&self) -> &HashMap<String, String> {
        &self.id
    }

    fn debug_command(&self, on: bool) -> Option<&'static str> {
        Some(if on { "debug on" } else { "debug off" })
    }
}

/// Parses one `option ...` declaration. Tokens between the field markers
/// accumulate with space separation, so option names containing spaces
/// round-trip.
fn parse_option(arg: &str) -> Result<EngineOption> {
    #[derive(Clone, Copy, PartialEq)]
    enum Field {
        Name,
        Type,
        Default,
        Min,
        Max,
        Var,
    }

    let mut current: Option<Field> = None;
    let mut name: Vec<&str> = vec![];
    let mut kind: Vec<&str> = vec![];
    let mut default: Option<Vec<&str>> = None;
    let mut min: Option<i64> = None;
    let mut max: Option<i64> = None;
    let mut current_var: Option<Vec<&str>> = None;
    let mut var: Vec<String> = vec![];

    for token in arg.split(' ') {
        match token {
            "name" if name.is_empty() => current = Some(Field::Name),
            "type" if kind.is_empty() => current = Some(Field::Type),
            "default" if default.is_none() => {
                default = Some(vec![]);
                current = Some(Field::Default);
            }
            "min" if min.is_none() => current = Some(Field::Min),
            "max" if max.is_none() => current = Some(Field::Max),
            "var" => {
                if let Some(tokens) = current_var.take() {
                    var.push(tokens.join(" "));
                }
                current_var = Some(vec![]);
                current = Some(Field::Var);
            }
            token => match current {
                Some(Field::Name) => name.push(token),
                Some(Field::Type) => kind.push(token),
                Some(Field::Default) => default.as_mut().expect("default initialized").push(token),
                Some(Field::Var) => current_var.as_mut().expect("var initialized").push(token),
                Some(Field::Min) => match token.parse() {
                    Ok(value) => min = Some(value),
                    Err(_) => error!("unparseable option min: {token:?}"),
                },
                Some(Field::Max) => match token.parse() {
                    Ok(value) => max = Some(value),
                    Err(_) => error!("unparseable option max: {token:?}"),
                },
                None => {}
            },
        }
    }
    if let Some(tokens) = current_var.take() {
        var.push(tokens.join(" "));
    }

    let name = name.join(" ");
    let kind_token = kind.join(" ");
    let kind = OptionType::from_token(&kind_token)
        .ok_or_else(|| EngineError::protocol(format!("unknown option type: {kind_token}")))?;

    let mut option = EngineOption {
        name,
        kind,
        default: None,
        min,
        max,
        var,
    };
    if let Some(tokens) = default {
        option.default = option.parse(&Value::Str(tokens.join(" ")))?;
    }
    Ok(option)
}

/// Parses the arguments of an `info ...` line into a structured record.
///
/// Each recognized keyword terminates the previous variable-length
/// parameter. Principal variations, refutations and current lines are
/// replayed on a copy of the root board; a malformed token is logged and
/// skipped without failing the line or giving up on the rest of its field.
pub(crate) fn parse_info(arg: &str, root: &Board, selector: InfoSelector) -> Info {
    let mut info = Info::default();
    if selector.is_empty() {
        return info;
    }

    const KEYWORDS: [&str; 17] = [
        "depth",
        "seldepth",
        "time",
        "nodes",
        "pv",
        "multipv",
        "score",
        "currmove",
        "currmovenumber",
        "hashfull",
        "nps",
        "tbhits",
        "cpuload",
        "refutation",
        "currline",
        "ebf",
        "string",
    ];

    let mut current: Option<&str> = None;
    let mut board: Option<Board> = None;
    let mut pv: Option<Vec<Move>> = None;
    let mut score_kind: Option<&str> = None;
    let mut refutation_move: Option<Move> = None;
    let mut refuted_by: Vec<Move> = vec![];
    let mut currline_cpu: Option<u32> = None;
    let mut currline_moves: Vec<Move> = vec![];
    let mut string_parts: Vec<&str> = vec![];

    fn flush(
        info: &mut Info,
        pv: &mut Option<Vec<Move>>,
        refutation_move: &mut Option<Move>,
        refuted_by: &mut Vec<Move>,
        currline_cpu: &mut Option<u32>,
        currline_moves: &mut Vec<Move>,
    ) {
        if let Some(pv) = pv.take() {
            info.pv = Some(pv);
        }
        if let Some(mov) = refutation_move.take() {
            info.refutation
                .get_or_insert_with(Vec::new)
                .push((mov, std::mem::take(refuted_by)));
        }
        if let Some(cpu) = currline_cpu.take() {
            info.currline
                .get_or_insert_with(Vec::new)
                .push((cpu, std::mem::take(currline_moves)));
        }
    }

    for token in arg.split(' ') {
        if current == Some("string") {
            string_parts.push(token);
        } else if token.is_empty() {
            // Stray spaces; only meaningful inside the string parameter
        } else if KEYWORDS.contains(&token) {
            flush(
                &mut info,
                &mut pv,
                &mut refutation_move,
                &mut refuted_by,
                &mut currline_cpu,
                &mut currline_moves,
            );
            current = Some(token);
            board = None;
            score_kind = None;

            match token {
                "pv" if selector.contains(InfoSelector::PV) => {
                    pv = Some(vec![]);
                    board = Some(root.without_stack());
                }
                "refutation" if selector.contains(InfoSelector::REFUTATION) => {
                    board = Some(root.without_stack());
                }
                "currline" if selector.contains(InfoSelector::CURRLINE) => {
                    board = Some(root.without_stack());
                }
                _ => {}
            }
        } else {
            match current {
                Some(
                    parameter @ ("depth" | "seldepth" | "nodes" | "multipv" | "currmovenumber"
                    | "hashfull" | "nps" | "tbhits" | "cpuload"),
                ) => match token.parse::<u64>() {
                    Ok(value) => match parameter {
                        "depth" => info.depth = Some(value as u32),
                        "seldepth" => info.seldepth = Some(value as u32),
                        "nodes" => info.nodes = Some(value),
                        "multipv" => info.multipv = Some(value as u32),
                        "currmovenumber" => info.currmovenumber = Some(value as u32),
                        "hashfull" => info.hashfull = Some(value as u32),
                        "nps" => info.nps = Some(value),
                        "tbhits" => info.tbhits = Some(value),
                        "cpuload" => info.cpuload = Some(value as u32),
                        _ => unreachable!(),
                    },
                    Err(_) => error!("unparseable {parameter} in info: {arg:?}"),
                },
                Some("time") => match token.parse::<u64>() {
                    Ok(millis) => info.time = Some(Duration::from_millis(millis)),
                    Err(_) => error!("unparseable time in info: {arg:?}"),
                },
                Some("ebf") => match token.parse::<f64>() {
                    Ok(value) => info.ebf = Some(value),
                    Err(_) => error!("unparseable ebf in info: {arg:?}"),
                },
                Some("pv") => {
                    if let Some(replay) = board.as_mut() {
                        match replay.push_uci(token) {
                            Ok(mov) => {
                                if let Some(pv) = pv.as_mut() {
                                    pv.push(mov);
                                }
                            }
                            // The board is left as it was; later tokens in
                            // the field may still apply
                            Err(err) => error!(%err, "unparseable pv in info: {arg:?}"),
                        }
                    }
                }
                Some("score") if selector.contains(InfoSelector::SCORE) => match token {
                    "cp" | "mate" => score_kind = Some(token),
                    "lowerbound" => info.lowerbound = true,
                    "upperbound" => info.upperbound = true,
                    value => match (score_kind, value.parse::<i32>()) {
                        (Some("cp"), Ok(cp)) => {
                            info.score = Some(PovScore::new(Score::Cp(cp), root.turn()))
                        }
                        (Some("mate"), Ok(mate)) => {
                            info.score = Some(PovScore::new(Score::Mate(mate), root.turn()))
                        }
                        _ => error!("unparseable score in info: {arg:?}"),
                    },
                },
                Some("currmove") => match UciMove::from_ascii(token.as_bytes()) {
                    Ok(mov) => info.currmove = Some(mov),
                    Err(_) => error!("unparseable currmove in info: {arg:?}"),
                },
                Some("refutation") => {
                    if let Some(replay) = board.as_mut() {
                        match replay.push_uci(token) {
                            Ok(mov) => {
                                if refutation_move.is_none() {
                                    refutation_move = Some(mov);
                                } else {
                                    refuted_by.push(mov);
                                }
                            }
                            Err(err) => error!(%err, "unparseable refutation in info: {arg:?}"),
                        }
                    }
                }
                Some("currline") => {
                    if let Some(replay) = board.as_mut() {
                        if currline_cpu.is_none() {
                            match token.parse::<u32>() {
                                Ok(cpu) => currline_cpu = Some(cpu),
                                Err(_) => error!("unparseable currline cpu in info: {arg:?}"),
                            }
                        } else {
                            match replay.push_uci(token) {
                                Ok(mov) => currline_moves.push(mov),
                                Err(err) => error!(%err, "unparseable currline in info: {arg:?}"),
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    flush(
        &mut info,
        &mut pv,
        &mut refutation_move,
        &mut refuted_by,
        &mut currline_cpu,
        &mut currline_moves,
    );
    if !string_parts.is_empty() {
        info.string = Some(string_parts.join(" "));
    }

    info
}
