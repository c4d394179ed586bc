//! XBoard (CECP) protocol driver

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{timeout_at, Instant};
use tracing::{error, warn};

use shakmaty::Color;

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

/// How long to wait for `feature done=1` before assuming a protover 1
/// engine that will never send it
const FEATURE_TIMEOUT: Duration = Duration::from_secs(2);

/// A feature value as the engine declared it
#[derive(Debug, Clone, PartialEq)]
enum Feature {
    Int(i64),
    Str(String),
}

impl Feature {
    fn as_int(&self) -> Option<i64> {
        match self {
            Feature::Int(value) => Some(*value),
            Feature::Str(_) => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Feature::Int(_) => None,
            Feature::Str(value) => Some(value),
        }
    }
}

impl Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feature::Int(value) => value.fmt(f),
            Feature::Str(value) => value.fmt(f),
        }
    }
}

/// Working state of an active `play` command
struct PlayState {
    info: Info,
    draw_offered: bool,
    stopped: bool,
    /// Expected `pong` acting as the end-of-command fence after a cancel
    final_pong: Option<String>,
    previous: OptionMap<Value>,
}

/// Working state of an active `analysis` command
struct AnalysisState {
    sink: AnalysisSink,
    stopped: bool,
    final_pong: Option<String>,
    previous: OptionMap<Value>,
    limit: Option<Limit>,
}

pub(crate) struct XBoard {
    features: HashMap<String, Feature>,
    options: OptionMap<EngineOption>,
    config: OptionMap<Value>,
    id: HashMap<String, String>,
    /// The position the engine currently has set up
    board: Board,
    game: Option<String>,
    play: Option<PlayState>,
    analysis: Option<AnalysisState>,
    /// Wall-clock cutoff handed to the scheduler when an analysis with a
    /// time limit starts
    deadline: Option<Instant>,
}

fn check_option(name: &str) -> EngineOption {
    EngineOption {
        name: name.to_owned(),
        kind: OptionType::Check,
        default: Some(Value::Bool(false)),
        min: None,
        max: None,
        var: vec![],
    }
}

fn spin_option(name: &str, default: i64, min: i64) -> EngineOption {
    EngineOption {
        name: name.to_owned(),
        kind: OptionType::Spin,
        default: Some(Value::Int(default)),
        min: Some(min),
        max: None,
        var: vec![],
    }
}

impl XBoard {
    pub(crate) fn new() -> Self {
        let mut options = OptionMap::case_sensitive();
        options.insert("random", check_option("random"));
        options.insert("computer", check_option("computer"));

        Self {
            features: HashMap::new(),
            options,
            config: OptionMap::case_sensitive(),
            id: HashMap::new(),
            board: Board::new(),
            game: None,
            play: None,
            analysis: None,
            deadline: None,
        }
    }

    fn feature(&self, name: &str) -> Option<i64> {
        self.features.get(name).and_then(Feature::as_int)
    }

    fn feature_flag(&self, name: &str) -> bool {
        self.feature(name).unwrap_or(0) != 0
    }

    /// Features that default to enabled when the engine stays silent
    fn feature_or(&self, name: &str, default: i64) -> bool {
        self.feature(name).unwrap_or(default) != 0
    }

    fn collect_features(&mut self, arg: &str) {
        for token in shell_split(arg) {
            let Some((key, value)) = token.split_once('=') else {
                warn!("ignoring malformed feature: {token}");
                continue;
            };
            if key == "option" {
                match parse_xboard_option(value) {
                    Ok(option) => {
                        // The built-in toggles and the memory/cores
                        // features stay authoritative
                        if !matches!(
                            option.name.as_str(),
                            "random" | "computer" | "cores" | "memory"
                        ) {
                            self.options.insert(option.name.clone(), option);
                        }
                    }
                    Err(err) => error!(%err, "ignoring unparseable option feature: {value}"),
                }
            } else {
                let feature = match value.parse::<i64>() {
                    Ok(value) => Feature::Int(value),
                    Err(_) => Feature::Str(value.to_owned()),
                };
                self.features.insert(key.to_owned(), feature);
            }
        }
    }

    /// Applies the collected features: required ones checked, unsupported
    /// ones rejected, dedicated-command options synthesized
    async fn finalize_features(&mut self, io: &mut Transport) -> Result<()> {
        if !self.feature_flag("ping") {
            return Err(EngineError::protocol(
                "xboard engine did not declare required feature: ping",
            ));
        }
        if !self.feature_flag("setboard") {
            return Err(EngineError::protocol(
                "xboard engine did not declare required feature: setboard",
            ));
        }

        if !self.feature_or("reuse", 1) {
            warn!("rejecting feature reuse=0");
            io.write_line("reject reuse").await?;
        }
        if !self.feature_or("sigterm", 1) {
            warn!("rejecting feature sigterm=0");
            io.write_line("reject sigterm").await?;
        }
        if self.feature_flag("usermove") {
            warn!("rejecting feature usermove=1");
            io.write_line("reject usermove").await?;
        }
        if self.feature_flag("san") {
            warn!("rejecting feature san=1");
            io.write_line("reject san").await?;
        }

        if let Some(name) = self.features.get("myname") {
            self.id.insert("name".to_owned(), name.to_string());
        }

        if self.feature_flag("memory") {
            self.options.insert("memory", spin_option("memory", 16, 1));
            io.write_line("accept memory").await?;
        }
        if self.feature_flag("smp") {
            self.options.insert("cores", spin_option("cores", 1, 1));
            io.write_line("accept smp").await?;
        }
        let egt: Option<String> = self
            .features
            .get("egt")
            .and_then(Feature::as_str)
            .map(str::to_owned);
        if let Some(egt) = egt {
            for entry in egt.split(',') {
                let name = format!("egtpath {}", entry.trim());
                self.options.insert(
                    name.clone(),
                    EngineOption {
                        name,
                        kind: OptionType::Path,
                        default: None,
                        min: None,
                        max: None,
                        var: vec![],
                    },
                );
            }
            io.write_line("accept egt").await?;
        }

        Ok(())
    }

    /// Validates and applies one option. The `random`/`computer` toggles
    /// and the `memory`/`cores`/`egtpath` features use dedicated commands,
    /// everything else goes through `option`.
    async fn apply_one(&mut self, io: &mut Transport, name: &str, value: Value) -> Result<()> {
        let option = self.options.get(name).ok_or_else(|| {
            EngineError::protocol(format!("unsupported xboard option or command: {name}"))
        })?;
        let Some(parsed) = option.parse(&value)? else {
            io.write_line(&format!("option {name}")).await?;
            return Ok(());
        };

        if self.config.get(name) == Some(&parsed) {
            return Ok(());
        }
        self.config.insert(name, parsed.clone());

        if name == "random" || name == "computer" {
            // Toggled right after `new` during game setup
        } else if name == "memory" || name == "cores" || name.starts_with("egtpath ") {
            io.write_line(&format!("{name} {parsed}")).await?;
        } else {
            match &parsed {
                Value::Bool(true) => io.write_line(&format!("option {name}=1")).await?,
                Value::Bool(false) => io.write_line(&format!("option {name}=0")).await?,
                value => io.write_line(&format!("option {name}={value}")).await?,
            }
        }
        Ok(())
    }

    async fn apply(&mut self, io: &mut Transport, options: &[(String, Value)]) -> Result<()> {
        for (name, value) in options {
            self.apply_one(io, name, value.clone()).await?;
        }
        Ok(())
    }

    /// Restores a config snapshot, then defaults for anything it does not
    /// cover
    async fn restore(&mut self, io: &mut Transport, previous: OptionMap<Value>) -> Result<()> {
        let mut restores: Vec<(String, Value)> = previous
            .iter()
            .map(|(name, value)| (name.to_owned(), value.clone()))
            .collect();
        for (name, option) in self.options.iter() {
            if previous.contains(name) {
                continue;
            }
            if let Some(default) = &option.default {
                restores.push((name.to_owned(), default.clone()));
            }
        }
        for (name, value) in restores {
            self.apply_one(io, &name, value).await?;
        }
        Ok(())
    }

    async fn select_variant(&mut self, io: &mut Transport, variant: &str) -> Result<()> {
        let known = self
            .features
            .get("variants")
            .and_then(Feature::as_str)
            .unwrap_or("");
        if !known.split(',').any(|candidate| candidate.trim() == variant) {
            return Err(EngineError::protocol(format!(
                "unsupported xboard variant: {variant} (available: {known})"
            )));
        }
        io.write_line(&format!("variant {variant}")).await
    }

    /// Brings the engine to the caller's position: a fresh `new` sequence
    /// when the game changed, otherwise incremental `remove`/`undo` plus
    /// the missing moves
    async fn setup_position(
        &mut self,
        io: &mut Transport,
        board: &Board,
        game: &Option<String>,
        options: &[(String, Value)],
    ) -> Result<()> {
        self.apply(io, options).await?;

        let toggled = options
            .iter()
            .any(|(name, _)| name == "random" || name == "computer");
        let new_game = self.game != *game || toggled || !board.same_root(&self.board);
        self.game = game.clone();

        if new_game {
            self.board = board.root_board();
            io.write_line("new").await?;

            if board.chess960() {
                self.select_variant(io, "fischerandom").await?;
            }

            if matches!(self.config.get("random"), Some(Value::Bool(true))) {
                io.write_line("random").await?;
            }
            if matches!(self.config.get("computer"), Some(Value::Bool(true))) {
                io.write_line("computer").await?;
            }
        }

        // The engine must not start thinking on its own
        io.write_line("force").await?;

        if new_game {
            let fen = board.fen();
            if board.chess960() || fen != STARTING_FEN {
                let setboard = if board.chess960() {
                    board.shredder_fen()
                } else {
                    fen
                };
                io.write_line(&format!("setboard {setboard}")).await?;
            }
        } else {
            let mut common = 0;
            for (ours, theirs) in self.board.move_stack().iter().zip(board.move_stack()) {
                if ours == theirs {
                    common += 1;
                } else {
                    break;
                }
            }
            while self.board.move_stack().len() > common + 1 {
                io.write_line("remove").await?;
                self.board.pop();
                self.board.pop();
            }
            while self.board.move_stack().len() > common {
                io.write_line("undo").await?;
                self.board.pop();
            }
        }

        for mov in &board.move_stack()[self.board.move_stack().len()..] {
            let rendered = self.board.xboard(mov);
            io.write_line(&rendered).await?;
            self.board.push(mov.clone())?;
        }
        Ok(())
    }

    async fn start_play(&mut self, io: &mut Transport, cmd: &mut Command) -> Result<Flow> {
        let Job::Play { board, limit, opts, .. } = &cmd.job else {
            unreachable!()
        };
        if opts.root_moves.is_some() {
            return Err(EngineError::protocol(
                "play with root_moves, but xboard supports include only in analysis mode",
            ));
        }
        let (board, limit, opts) = (board.clone(), limit.clone(), opts.clone());

        let previous = self.config.clone();
        self.setup_position(io, &board, &opts.game, &opts.options).await?;

        let increment = match board.turn() {
            Color::White => limit.white_inc,
            Color::Black => limit.black_inc,
        };
        if limit.remaining_moves.is_some() || increment.is_some() {
            let clock = match board.turn() {
                Color::White => limit.white_clock,
                Color::Black => limit.black_clock,
            }
            .unwrap_or_default();
            let (minutes, seconds) = (clock.as_secs() / 60, clock.as_secs() % 60);
            io.write_line(&format!(
                "level {} {}:{:02} {}",
                limit.remaining_moves.unwrap_or(0),
                minutes,
                seconds,
                increment.unwrap_or_default().as_secs(),
            ))
            .await?;
        }

        if let Some(nodes) = limit.nodes {
            if limit.time.is_some()
                || limit.white_clock.is_some()
                || limit.black_clock.is_some()
                || increment.is_some()
            {
                return Err(EngineError::protocol(
                    "xboard does not support mixing node limits with time limits",
                ));
            }
            match self.feature("nps") {
                None => {
                    warn!("engine did not declare explicit support for node limits (feature nps=?)")
                }
                Some(0) => {
                    return Err(EngineError::protocol(
                        "xboard engine does not support node limits (feature nps=0)",
                    ))
                }
                Some(_) => {}
            }
            // Count nodes as hundredths of a second, so `st` carries the
            // node budget verbatim
            io.write_line("nps 100").await?;
            io.write_line(&format!("st {nodes}")).await?;
        }
        if let Some(depth) = limit.depth {
            io.write_line(&format!("sd {depth}")).await?;
        }
        if let Some(time) = limit.time {
            io.write_line(&format!("st {}", time.as_millis() / 10)).await?;
        }
        if let Some(clock) = limit.white_clock {
            let keyword = if board.turn() == Color::White { "time" } else { "otim" };
            io.write_line(&format!("{keyword} {}", clock.as_millis() / 10)).await?;
        }
        if let Some(clock) = limit.black_clock {
            let keyword = if board.turn() == Color::White { "otim" } else { "time" };
            io.write_line(&format!("{keyword} {}", clock.as_millis() / 10)).await?;
        }

        io.write_line(if opts.info.is_empty() { "nopost" } else { "post" })
            .await?;
        io.write_line(if opts.ponder { "hard" } else { "easy" }).await?;
        io.write_line("go").await?;

        self.play = Some(PlayState {
            info: Info::default(),
            draw_offered: false,
            stopped: false,
            final_pong: None,
            previous,
        });
        Ok(Flow::Continue)
    }

    async fn start_analysis(&mut self, io: &mut Transport, cmd: &mut Command) -> Result<Flow> {
        let Job::Analysis { board, limit, opts, requests, .. } = &cmd.job else {
            unreachable!()
        };
        if opts.multipv.is_some() {
            return Err(EngineError::protocol("xboard engine does not support multipv"));
        }
        if let Some(limit) = limit {
            if limit.white_clock.is_some() || limit.black_clock.is_some() {
                return Err(EngineError::protocol(
                    "xboard analysis does not support clock limits",
                ));
            }
        }
        let (board, limit, opts) = (board.clone(), limit.clone(), opts.clone());
        let requests = requests.clone();
        let seq = cmd.seq;

        let previous = self.config.clone();
        self.setup_position(io, &board, &opts.game, &opts.options).await?;

        if let Some(root_moves) = &opts.root_moves {
            if !self.feature_flag("exclude") {
                return Err(EngineError::protocol(
                    "xboard engine does not support root_moves (feature exclude=0)",
                ));
            }
            io.write_line("exclude all").await?;
            for mov in root_moves {
                let rendered = self.board.xboard(mov);
                io.write_line(&format!("include {rendered}")).await?;
            }
        }

        io.write_line("post").await?;
        io.write_line("analyze").await?;

        let (sink, handle) = analysis::channel(seq, requests);
        let Job::Analysis { reply, .. } = &mut cmd.job else {
            unreachable!()
        };
        reply.resolve(handle);

        self.deadline = limit.as_ref().and_then(|limit| limit.time).map(|time| {
            Instant::now() + time
        });
        self.analysis = Some(AnalysisState {
            sink,
            stopped: false,
            final_pong: None,
            previous,
            limit,
        });
        Ok(Flow::Continue)
    }

    async fn play_line(&mut self, io: &mut Transport, cmd: &mut Command, line: &str) -> Result<Flow> {
        if line.starts_with('#') || line.starts_with("Hint:") {
            return Ok(Flow::Continue);
        }
        if let Some(arg) = line.strip_prefix("move ") {
            return self.play_move(io, cmd, arg.trim()).await;
        }

        if self
            .play
            .as_ref()
            .is_some_and(|state| state.final_pong.as_deref() == Some(line))
        {
            let state = self.play.take().expect("play command without state");
            let Job::Play { reply, .. } = &mut cmd.job else {
                unreachable!()
            };
            if reply.pending() {
                reply.fail(EngineError::protocol(
                    "xboard engine answered final pong before sending a move",
                ));
            }
            return self.play_end(io, state).await;
        }

        if line == "offer draw" {
            if let Some(state) = self.play.as_mut() {
                state.draw_offered = true;
            }
            return Ok(Flow::Continue);
        }

        if line == "resign" {
            let state = self.play.take().expect("play command without state");
            let Job::Play { reply, .. } = &mut cmd.job else {
                unreachable!()
            };
            reply.fail(EngineError::protocol("xboard engine resigned"));
            return self.play_end(io, state).await;
        }

        if line.starts_with("1-0") || line.starts_with("0-1") || line.starts_with("1/2-1/2") {
            let mut state = self.play.take().expect("play command without state");
            let Job::Play { reply, .. } = &mut cmd.job else {
                unreachable!()
            };
            if reply.pending() {
                reply.resolve(PlayResult {
                    mov: None,
                    ponder: None,
                    info: std::mem::take(&mut state.info),
                    draw_offered: state.draw_offered,
                });
            }
            return self.play_end(io, state).await;
        }

        if is_post_line(line) {
            let Job::Play { reply, opts, .. } = &cmd.job else {
                unreachable!()
            };
            if reply.pending() {
                let info = parse_post(line, &self.board, opts.info);
                if let Some(state) = self.play.as_mut() {
                    state.info = info;
                }
            }
            return Ok(Flow::Continue);
        }

        warn!("unexpected engine output: {line}");
        Ok(Flow::Continue)
    }

    async fn play_move(&mut self, io: &mut Transport, cmd: &mut Command, arg: &str) -> Result<Flow> {
        let ponder = {
            let Job::Play { opts, .. } = &cmd.job else {
                unreachable!()
            };
            opts.ponder
        };

        let Job::Play { reply, .. } = &mut cmd.job else {
            unreachable!()
        };
        if !reply.cancelled() {
            match self.board.push_xboard(arg) {
                Ok(mov) => {
                    let state = self.play.as_mut().expect("play command without state");
                    reply.resolve(PlayResult {
                        mov: Some(mov),
                        ponder: None,
                        info: std::mem::take(&mut state.info),
                        draw_offered: state.draw_offered,
                    });
                }
                Err(err) => {
                    reply.fail(err);
                    let state = self.play.take().expect("play command without state");
                    return self.play_end(io, state).await;
                }
            }
        }

        if !ponder {
            let state = self.play.take().expect("play command without state");
            return self.play_end(io, state).await;
        }
        Ok(Flow::Continue)
    }

    async fn play_end(&mut self, io: &mut Transport, state: PlayState) -> Result<Flow> {
        self.restore(io, state.previous).await?;
        Ok(Flow::Finished)
    }

    async fn cancel_play(&mut self, io: &mut Transport, cmd: &mut Command) -> Result<()> {
        let ponder = {
            let Job::Play { opts, .. } = &cmd.job else {
                unreachable!()
            };
            opts.ponder
        };
        let cancelled = cmd.reply_cancelled();
        let seq = cmd.seq;

        let Some(state) = self.play.as_mut() else {
            return Ok(());
        };
        if state.stopped {
            return Ok(());
        }
        state.stopped = true;

        if cancelled {
            // Move now; the move itself is the fence
            io.write_line("?").await?;
        }
        if ponder {
            io.write_line("easy").await?;
            let n = seq & 0xffff;
            state.final_pong = Some(format!("pong {n}"));
            io.write_line(&format!("ping {n}")).await?;
        }
        Ok(())
    }

    async fn analysis_line(
        &mut self,
        io: &mut Transport,
        cmd: &mut Command,
        line: &str,
    ) -> Result<Flow> {
        if line.starts_with('#') {
            return Ok(Flow::Continue);
        }

        if self
            .analysis
            .as_ref()
            .is_some_and(|state| state.final_pong.as_deref() == Some(line))
        {
            let state = self.analysis.take().expect("analysis command without state");
            return self.analysis_end(io, state).await;
        }

        if is_post_line(line) {
            let Job::Analysis { opts, .. } = &cmd.job else {
                unreachable!()
            };
            let selector = opts.info | InfoSelector::BASIC;
            let info = parse_post(line, &self.board, selector);

            let reached = match self.analysis.as_ref() {
                Some(state) => {
                    state.sink.post(info.clone());
                    limit_reached(state.limit.as_ref(), &info)
                }
                None => false,
            };
            if reached {
                self.cancel_analysis(io, cmd.seq).await?;
            }
            return Ok(Flow::Continue);
        }

        warn!("unexpected engine output: {line}");
        Ok(Flow::Continue)
    }

    async fn analysis_end(&mut self, io: &mut Transport, state: AnalysisState) -> Result<Flow> {
        let AnalysisState { sink, previous, .. } = state;
        sink.finish();
        self.restore(io, previous).await?;
        Ok(Flow::Finished)
    }

    async fn cancel_analysis(&mut self, io: &mut Transport, seq: u64) -> Result<()> {
        let Some(state) = self.analysis.as_mut() else {
            return Ok(());
        };
        if state.stopped {
            return Ok(());
        }
        state.stopped = true;

        io.write_line(".").await?;
        io.write_line("exit").await?;
        let n = seq & 0xffff;
        state.final_pong = Some(format!("pong {n}"));
        io.write_line(&format!("ping {n}")).await?;
        Ok(())
    }
}

#[async_trait]
impl Driver for XBoard {
    async fn initialize(&mut self, io: &mut Transport) -> Result<()> {
        io.write_line("xboard").await?;
        io.write_line("protover 2").await?;

        let mut deadline = Some(Instant::now() + FEATURE_TIMEOUT);
        loop {
            let event = match deadline {
                Some(at) => match timeout_at(at, io.recv()).await {
                    Ok(event) => event?,
                    Err(_) => {
                        warn!("timeout waiting for xboard feature discovery");
                        break;
                    }
                },
                None => io.recv().await?,
            };
            match event {
                Event::Line(line) => {
                    if line.starts_with('#') {
                        continue;
                    }
                    if let Some(arg) = line.strip_prefix("feature ") {
                        self.collect_features(arg);
                        if self.features.contains_key("done") {
                            // The engine asked for more (done=0) or less
                            // (done=1) time; either way the timer is void
                            deadline = None;
                        }
                        if self.feature_flag("done") {
                            break;
                        }
                    }
                }
                Event::Exited(code) => return Err(EngineError::Terminated { code }),
            }
        }

        self.finalize_features(io).await
    }

    async fn start(&mut self, io: &mut Transport, cmd: &mut Command) -> Result<Flow> {
        match &cmd.job {
            Job::Ping { .. } => {
                io.write_line(&format!("ping {}", cmd.seq & 0xffff)).await?;
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
                if line == format!("pong {}", cmd.seq & 0xffff) {
                    let Job::Ping { reply } = &mut cmd.job else {
                        unreachable!()
                    };
                    reply.resolve(());
                    Ok(Flow::Finished)
                } else {
                    if !line.starts_with('#') {
                        warn!("unexpected engine output: {line}");
                    }
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
            Job::Play { .. } => self.cancel_play(io, cmd).await,
            Job::Analysis { .. } => self.cancel_analysis(io, cmd.seq).await,
            _ => Ok(()),
        }
    }

    fn engine_terminated(&mut self, _cmd: &mut Command, err: &EngineError) {
        self.play = None;
        self.deadline = None;
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

    fn take_deadline(&mut self) -> Option<Instant> {
        self.deadline.take()
    }
}

/// Whether a non-clock limit is satisfied by the latest post line
fn limit_reached(limit: Option<&Limit>, info: &Info) -> bool {
    let Some(limit) = limit else {
        return false;
    };
    if let Some(time) = limit.time {
        if info.time.unwrap_or_default() >= time {
            return true;
        }
    }
    if let Some(nodes) = limit.nodes {
        if info.nodes.unwrap_or(0) >= nodes {
            return true;
        }
    }
    if let Some(depth) = limit.depth {
        if info.depth.unwrap_or(0) >= depth {
            return true;
        }
    }
    if let Some(mate) = limit.mate {
        if let Some(score) = &info.score {
            if score.relative >= Score::Mate(mate as i32) {
                return true;
            }
        }
    }
    false
}

/// Post lines start with an integer and carry at least depth, score, time
/// and nodes
fn is_post_line(line: &str) -> bool {
    line.split_whitespace().count() >= 4
        && line
            .trim_start()
            .starts_with(|token: char| token.is_ascii_digit())
}

/// Splits a feature argument list, honouring double-quoted values
fn shell_split(arg: &str) -> Vec<String> {
    let mut tokens = vec![];
    let mut current = String::new();
    let mut quoted = false;
    for character in arg.chars() {
        if character == '"' {
            quoted = !quoted;
        } else if character.is_whitespace() && !quoted {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(character);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Parses the payload of a `feature option="..."` declaration:
/// `<name> -<type> <payload>`
fn parse_xboard_option(feature: &str) -> Result<EngineOption> {
    let mut params = feature.split_whitespace();
    let name = params
        .next()
        .ok_or_else(|| EngineError::protocol("empty xboard option declaration"))?
        .to_owned();
    let kind_token = params
        .next()
        .and_then(|token| token.strip_prefix('-'))
        .ok_or_else(|| {
            EngineError::protocol(format!("missing type in xboard option: {feature}"))
        })?;
    let kind = OptionType::from_token(kind_token).ok_or_else(|| {
        EngineError::protocol(format!("unknown xboard option type: {kind_token}"))
    })?;
    let params: Vec<&str> = params.collect();

    let mut default = None;
    let mut min = None;
    let mut max = None;
    let mut var = vec![];

    match kind {
        OptionType::Combo => {
            for choice in &params {
                if *choice == "///" {
                    continue;
                }
                if let Some(chosen) = choice.strip_prefix('*') {
                    default = Some(Value::Str(chosen.to_owned()));
                    var.push(chosen.to_owned());
                } else {
                    var.push((*choice).to_owned());
                }
            }
        }
        OptionType::Check => {
            let token = params.first().ok_or_else(|| {
                EngineError::protocol(format!("missing default in xboard option: {feature}"))
            })?;
            let value: i64 = token.parse().map_err(|_| {
                EngineError::protocol(format!("invalid check default in xboard option: {feature}"))
            })?;
            default = Some(Value::Bool(value != 0));
        }
        OptionType::Spin => {
            let mut numbers = params.iter().map(|token| token.parse::<i64>());
            let mut next = || {
                numbers.next().and_then(|n| n.ok()).ok_or_else(|| {
                    EngineError::protocol(format!("invalid spin payload in xboard option: {feature}"))
                })
            };
            default = Some(Value::Int(next()?));
            min = Some(next()?);
            max = Some(next()?);
        }
        OptionType::String | OptionType::File | OptionType::Path => {
            default = Some(Value::Str(params.first().copied().unwrap_or("").to_owned()));
        }
        OptionType::Button | OptionType::Reset | OptionType::Save => {}
    }

    Ok(EngineOption {
        name,
        kind,
        default,
        min,
        max,
        var,
    })
}

/// Parses a thinking-output line:
/// `depth score time nodes [seldepth [nps [reserved...] tbhits]] pv`
pub(crate) fn parse_post(line: &str, root: &Board, selector: InfoSelector) -> Info {
    let mut info = Info::default();

    let mut tokens: VecDeque<&str> = line.split_whitespace().collect();
    let mut integers: VecDeque<i64> = VecDeque::new();
    while let Some(token) = tokens.front() {
        match token.parse::<i64>() {
            Ok(value) => {
                integers.push_back(value);
                tokens.pop_front();
            }
            Err(_) => break,
        }
    }

    if integers.len() < 4 || selector.is_empty() {
        return info;
    }

    info.depth = Some(integers.pop_front().unwrap_or(0).max(0) as u32);
    let cp = integers.pop_front().unwrap_or(0);
    info.time = Some(Duration::from_millis(
        integers.pop_front().unwrap_or(0).max(0) as u64 * 10,
    ));
    info.nodes = Some(integers.pop_front().unwrap_or(0).max(0) as u64);

    let score = if cp <= -100_000 {
        Score::Mate((cp + 100_000) as i32)
    } else if cp == 100_000 {
        Score::MateGiven
    } else if cp >= 100_000 {
        Score::Mate((cp - 100_000) as i32)
    } else {
        Score::Cp(cp as i32)
    };
    info.score = Some(PovScore::new(score, root.turn()));

    if let Some(seldepth) = integers.pop_front() {
        info.seldepth = Some(seldepth.max(0) as u32);
    }
    if let Some(nps) = integers.pop_front() {
        info.nps = Some(nps.max(0) as u64);
    }
    while integers.len() > 1 {
        // Reserved for future extensions
        integers.pop_front();
    }
    if let Some(tbhits) = integers.pop_front() {
        info.tbhits = Some(tbhits.max(0) as u64);
    }

    if !selector.contains(InfoSelector::PV) {
        return info;
    }

    let mut pv = vec![];
    let mut replay = root.without_stack();
    for token in tokens {
        let numbering = token.trim_end_matches('.');
        if !numbering.is_empty() && numbering.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        match replay.push_xboard(token) {
            Ok(mov) => pv.push(mov),
            Err(_) => break,
        }
    }
    info.pv = Some(pv);

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_split_honours_quotes() {
        assert_eq!(
            shell_split(r#"myname="Fairy-Max 5.0" ping=1 done=1"#),
            ["myname=Fairy-Max 5.0", "ping=1", "done=1"]
        );
        assert_eq!(shell_split("  a  b "), ["a", "b"]);
    }

    #[test]
    fn option_check() {
        let option = parse_xboard_option("Resign -check 0").unwrap();
        assert_eq!(option.name, "Resign");
        assert_eq!(option.kind, OptionType::Check);
        assert_eq!(option.default, Some(Value::Bool(false)));
    }

    #[test]
    fn option_spin() {
        let option = parse_xboard_option("ResignThreshold -spin 800 200 1200").unwrap();
        assert_eq!(option.name, "ResignThreshold");
        assert_eq!(option.kind, OptionType::Spin);
        assert_eq!(option.default, Some(Value::Int(800)));
        assert_eq!(option.min, Some(200));
        assert_eq!(option.max, Some(1200));

        assert!(parse_xboard_option("Broken -spin 800 200").is_err());
    }

    #[test]
    fn option_combo_with_starred_default() {
        let option = parse_xboard_option("Style -combo Solid /// *Normal /// Risky").unwrap();
        assert_eq!(option.kind, OptionType::Combo);
        assert_eq!(option.default, Some(Value::Str("Normal".into())));
        assert_eq!(option.var, ["Solid", "Normal", "Risky"]);
    }

    #[test]
    fn option_string_default() {
        let option = parse_xboard_option("BookFile -string book.bin").unwrap();
        assert_eq!(option.default, Some(Value::Str("book.bin".into())));

        let option = parse_xboard_option("BookFile -string").unwrap();
        assert_eq!(option.default, Some(Value::Str("".into())));
    }

    #[test]
    fn option_button_has_no_payload() {
        let option = parse_xboard_option("ClearHash -button").unwrap();
        assert_eq!(option.name, "ClearHash");
        assert_eq!(option.kind, OptionType::Button);
        assert_eq!(option.default, None);
    }

    #[test]
    fn post_line_detection() {
        assert!(is_post_line("4 50 12 1000 e2e4 e7e5"));
        assert!(is_post_line("  9 156 1084 48000 Nf3"));
        assert!(!is_post_line("move e2e4"));
        assert!(!is_post_line("4 50 12"));
    }

    #[test]
    fn post_basic_fields() {
        let board = Board::new();
        let info = parse_post("4 50 12 1000 e2e4 e7e5", &board, InfoSelector::ALL);

        assert_eq!(info.depth, Some(4));
        assert_eq!(
            info.score,
            Some(PovScore::new(Score::Cp(50), shakmaty::Color::White))
        );
        assert_eq!(info.time, Some(Duration::from_millis(120)));
        assert_eq!(info.nodes, Some(1000));
        let pv: Vec<String> = info
            .pv
            .unwrap()
            .iter()
            .map(|mov| board.uci(mov).to_string())
            .collect();
        assert_eq!(pv, ["e2e4", "e7e5"]);
    }

    #[test]
    fn post_optional_integers() {
        let board = Board::new();
        let info = parse_post("9 156 1084 48000 10 500000 3 e2e4", &board, InfoSelector::ALL);
        assert_eq!(info.seldepth, Some(10));
        assert_eq!(info.nps, Some(500_000));
        assert_eq!(info.tbhits, Some(3));

        // Reserved columns between nps and tbhits are discarded
        let info = parse_post(
            "9 156 1084 48000 10 500000 7 8 3 e2e4",
            &board,
            InfoSelector::ALL,
        );
        assert_eq!(info.seldepth, Some(10));
        assert_eq!(info.nps, Some(500_000));
        assert_eq!(info.tbhits, Some(3));
    }

    #[test]
    fn post_mate_scores() {
        let board = Board::new();
        let score = |line: &str| {
            parse_post(line, &board, InfoSelector::ALL)
                .score
                .unwrap()
                .relative
        };

        assert_eq!(score("10 100005 1 100 e2e4"), Score::Mate(5));
        assert_eq!(score("10 -100004 1 100 e2e4"), Score::Mate(-4));
        assert_eq!(score("10 100000 1 100 e2e4"), Score::MateGiven);
        assert_eq!(score("10 -42 1 100 e2e4"), Score::Cp(-42));
    }

    #[test]
    fn post_skips_move_numbers_in_pv() {
        let board = Board::new();
        let info = parse_post("6 33 20 4000 1. e4 e5 2. Nf3", &board, InfoSelector::ALL);
        let pv: Vec<String> = info
            .pv
            .unwrap()
            .iter()
            .map(|mov| board.uci(mov).to_string())
            .collect();
        assert_eq!(pv, ["e2e4", "e7e5", "g1f3"]);
    }

    #[test]
    fn post_short_lines_are_ignored() {
        let board = Board::new();
        let info = parse_post("4 50 12 hello world", &board, InfoSelector::ALL);
        assert_eq!(info, Info::default());
    }

    #[test]
    fn limit_thresholds() {
        let info = Info {
            depth: Some(12),
            nodes: Some(5000),
            time: Some(Duration::from_secs(3)),
            ..Info::default()
        };

        assert!(limit_reached(Some(&Limit::depth(12)), &info));
        assert!(!limit_reached(Some(&Limit::depth(13)), &info));
        assert!(limit_reached(Some(&Limit::nodes(4000)), &info));
        assert!(limit_reached(
            Some(&Limit::time(Duration::from_secs(2))),
            &info
        ));
        assert!(!limit_reached(None, &info));

        let mating = Info {
            score: Some(PovScore::new(Score::Mate(2), shakmaty::Color::White)),
            ..Info::default()
        };
        assert!(limit_reached(Some(&Limit::mate(3)), &mating));
        let losing = Info {
            score: Some(PovScore::new(Score::Mate(-2), shakmaty::Color::White)),
            ..Info::default()
        };
        assert!(!limit_reached(Some(&Limit::mate(3)), &losing));
    }
}
