//! Top-level engine handle

use std::collections::HashMap;

use derivative::Derivative;
use shakmaty::Move;
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;

use crate::analysis::Analysis;
use crate::board::Board;
use crate::error::{EngineError, Result};
use crate::info::{Info, InfoSelector};
use crate::limit::Limit;
use crate::option::{EngineOption, OptionMap, Value};
use crate::session::{Driver, Job, Reply, Request, Session};
use crate::transport::{EngineConfig, Transport};
use crate::uci::Uci;
use crate::xboard::XBoard;

/// Outcome of a play operation
#[derive(Debug, Clone, PartialEq)]
pub struct PlayResult {
    /// The move the engine wants to play; `None` when the engine reported
    /// a finished game instead of a move
    pub mov: Option<Move>,
    /// The reply the engine expects and may already be pondering
    pub ponder: Option<Move>,
    /// Search information accumulated while thinking
    pub info: Info,
    /// The engine offered a draw alongside its move
    pub draw_offered: bool,
}

/// Knobs for [`Engine::play_with`]
#[derive(Debug, Clone, Default)]
pub struct PlayOptions {
    /// Identifies the game; a change triggers the protocol's new-game
    /// sequence
    pub game: Option<String>,
    /// Which search information to collect; none by default
    pub info: InfoSelector,
    /// Keep the engine thinking about the expected reply after it moved
    pub ponder: bool,
    /// Consider only these root moves
    pub root_moves: Option<Vec<Move>>,
    /// Options applied for this search only and restored afterwards
    pub options: Vec<(String, Value)>,
}

/// Knobs for [`Engine::analysis_with`] and [`Engine::analyse_with`]
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Analyse this many root moves simultaneously
    pub multipv: Option<u32>,
    /// Identifies the game; a change triggers the protocol's new-game
    /// sequence
    pub game: Option<String>,
    /// Which search information to collect; everything by default
    pub info: InfoSelector,
    /// Limit the analysis to these root moves
    pub root_moves: Option<Vec<Move>>,
    /// Options applied for this analysis only and restored afterwards
    pub options: Vec<(String, Value)>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            multipv: None,
            game: None,
            info: InfoSelector::ALL,
            root_moves: None,
            options: vec![],
        }
    }
}

/// Handle to a running engine process.
///
/// Spawned with [`Engine::uci`] or [`Engine::xboard`]; all operations go
/// through a driver task owning the process, so the handle is cheap to
/// share by reference. Submitting a new operation while one is running
/// pre-empts the running one, which resolves as
/// [`EngineError::Cancelled`].
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Engine {
    #[derivative(Debug = "ignore")]
    requests: mpsc::UnboundedSender<Request>,
    id: HashMap<String, String>,
    options: OptionMap<EngineOption>,
}

impl Engine {
    /// Spawns and initializes a UCI engine
    #[instrument(skip(config), err)]
    pub async fn uci(config: impl Into<EngineConfig>) -> Result<Self> {
        let transport = Transport::spawn(&config.into())?;
        Self::connect(transport, Uci::new()).await
    }

    /// Spawns and initializes an XBoard (CECP) engine
    #[instrument(skip(config), err)]
    pub async fn xboard(config: impl Into<EngineConfig>) -> Result<Self> {
        let transport = Transport::spawn(&config.into())?;
        Self::connect(transport, XBoard::new()).await
    }

    pub(crate) async fn connect<D: Driver>(mut transport: Transport, mut driver: D) -> Result<Self> {
        driver.initialize(&mut transport).await?;
        let id = driver.id().clone();
        let options = driver.options().clone();

        let (requests, inbox) = mpsc::unbounded_channel();
        tokio::spawn(Session::new(transport, driver, inbox).run());

        Ok(Self {
            requests,
            id,
            options,
        })
    }

    /// The engine's self-identification, e.g. `name` and `author`
    pub fn id(&self) -> &HashMap<String, String> {
        &self.id
    }

    /// The options the engine declared during initialization
    pub fn options(&self) -> &OptionMap<EngineOption> {
        &self.options
    }

    async fn communicate<T>(&self, job: impl FnOnce(Reply<T>) -> Job) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        let job = job(Reply::new(tx));
        if self.requests.send(Request::Command(job)).is_err() {
            return Err(EngineError::Terminated { code: None });
        }
        rx.await
            .unwrap_or(Err(EngineError::Terminated { code: None }))
    }

    /// Pings the engine and waits for the response; ensures it is alive
    /// and in sync
    #[instrument(skip(self), err)]
    pub async fn ping(&self) -> Result<()> {
        self.communicate(|reply| Job::Ping { reply }).await
    }

    /// Applies engine options globally, for all subsequent searches
    #[instrument(skip_all, err)]
    pub async fn configure<N, V, I>(&self, options: I) -> Result<()>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<Value>,
    {
        let options: Vec<(String, Value)> = options
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        self.communicate(|reply| Job::Configure { options, reply }).await
    }

    /// Switches the engine's own debug output on or off; fire-and-forget
    /// and only meaningful for protocols that support it
    pub fn debug(&self, on: bool) {
        let _ = self.requests.send(Request::Debug { on });
    }

    /// Asks the engine to play the given position. The whole move stack is
    /// sent to the engine.
    #[instrument(skip_all, err)]
    pub async fn play(&self, board: &Board, limit: Limit) -> Result<PlayResult> {
        self.play_with(board, limit, PlayOptions::default()).await
    }

    /// [`Engine::play`] with explicit knobs
    #[instrument(skip_all, err)]
    pub async fn play_with(
        &self,
        board: &Board,
        limit: Limit,
        opts: PlayOptions,
    ) -> Result<PlayResult> {
        let board = board.clone();
        self.communicate(move |reply| Job::Play {
            board,
            limit,
            opts,
            reply,
        })
        .await
    }

    /// Analyses a position until the limit is reached and returns the
    /// final information
    #[instrument(skip_all, err)]
    pub async fn analyse(&self, board: &Board, limit: Limit) -> Result<Info> {
        let analysis = self
            .analysis_with(board, Some(limit), AnalysisOptions::default())
            .await?;
        analysis.wait().await?;
        Ok(analysis.info())
    }

    /// [`Engine::analyse`] with explicit knobs; returns the latest
    /// information per root move
    #[instrument(skip_all, err)]
    pub async fn analyse_with(
        &self,
        board: &Board,
        limit: Option<Limit>,
        opts: AnalysisOptions,
    ) -> Result<Vec<Info>> {
        let analysis = self.analysis_with(board, limit, opts).await?;
        analysis.wait().await?;
        Ok(analysis.multipv())
    }

    /// Starts an open-ended analysis and returns the streaming handle
    #[instrument(skip_all, err)]
    pub async fn analysis(&self, board: &Board) -> Result<Analysis> {
        self.analysis_with(board, None, AnalysisOptions::default()).await
    }

    /// [`Engine::analysis`] with an optional limit and explicit knobs
    #[instrument(skip_all, err)]
    pub async fn analysis_with(
        &self,
        board: &Board,
        limit: Option<Limit>,
        opts: AnalysisOptions,
    ) -> Result<Analysis> {
        let board = board.clone();
        let requests = self.requests.clone();
        self.communicate(move |reply| Job::Analysis {
            board,
            limit,
            opts,
            requests,
            reply,
        })
        .await
    }

    /// Asks the engine to shut down gracefully and reports its exit code
    #[instrument(skip(self), err)]
    pub async fn quit(&self) -> Result<Option<i32>> {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(Request::Quit { reply: tx }).is_err() {
            return Err(EngineError::Terminated { code: None });
        }
        rx.await
            .unwrap_or(Err(EngineError::Terminated { code: None }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use shakmaty::Color;

    use crate::mock::{mock_engine, MockEngine, Script};
    use crate::score::{PovScore, Score};

    use super::*;

    async fn uci_engine(
        script: Script,
        exit_code: Option<i32>,
        close_when_done: bool,
    ) -> (Engine, MockEngine) {
        let (transport, mock) = mock_engine(script, exit_code, close_when_done);
        let engine = Engine::connect(transport, Uci::new()).await.unwrap();
        (engine, mock)
    }

    async fn xboard_engine(script: Script) -> (Engine, MockEngine) {
        let (transport, mock) = mock_engine(script, None, false);
        let engine = Engine::connect(transport, XBoard::new()).await.unwrap();
        (engine, mock)
    }

    #[tokio::test]
    async fn uci_play_reports_move_ponder_and_info() {
        let script = vec![
            ("uci", vec!["id name Mock", "id author Unit", "uciok"]),
            ("ucinewgame", vec![]),
            ("position startpos moves e2e4", vec![]),
            (
                "go movetime 1000",
                vec![
                    "info depth 10 score cp 34 pv e7e5 g1f3",
                    "bestmove e7e5 ponder g1f3",
                ],
            ),
        ];
        let (engine, mock) = uci_engine(script, None, false).await;
        assert_eq!(engine.id()["name"], "Mock");
        assert_eq!(engine.id()["author"], "Unit");

        let mut board = Board::new();
        board.push_uci("e2e4").unwrap();

        let result = engine
            .play_with(
                &board,
                Limit::time(Duration::from_secs(1)),
                PlayOptions {
                    info: InfoSelector::ALL,
                    ..PlayOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.mov, Some(board.parse_uci("e7e5").unwrap()));
        let mut after = board.clone();
        after.push_uci("e7e5").unwrap();
        assert_eq!(result.ponder, Some(after.parse_uci("g1f3").unwrap()));
        assert!(!result.draw_offered);

        assert_eq!(result.info.depth, Some(10));
        assert_eq!(
            result.info.score,
            Some(PovScore::new(Score::Cp(34), Color::Black))
        );
        let pv: Vec<String> = result
            .info
            .pv
            .unwrap()
            .iter()
            .map(|mov| board.uci(mov).to_string())
            .collect();
        assert_eq!(pv, ["e7e5", "g1f3"]);

        mock.assert_done().await;
    }

    #[tokio::test]
    async fn xboard_initialization_accepts_well_behaved_engine() {
        let script = vec![
            ("xboard", vec![]),
            (
                "protover 2",
                vec![
                    r#"feature myname="E" ping=1 setboard=1 usermove=0 san=0 reuse=1 sigterm=1 done=1"#,
                ],
            ),
            ("ping 1", vec!["pong 1"]),
        ];
        let (engine, mock) = xboard_engine(script).await;

        assert_eq!(engine.id()["name"], "E");
        engine.ping().await.unwrap();

        // The mock panics on any line it does not expect, so reaching this
        // point also asserts that no reject was sent.
        mock.assert_done().await;
    }

    #[tokio::test]
    async fn uci_analysis_stops_on_demand() {
        let script = vec![
            ("uci", vec!["id name Mock", "uciok"]),
            ("ucinewgame", vec![]),
            ("position startpos", vec![]),
            ("go infinite", vec!["info depth 6 score cp 11 pv d2d4"]),
            ("stop", vec!["bestmove d2d4"]),
        ];
        let (engine, mock) = uci_engine(script, None, false).await;

        let mut analysis = engine.analysis(&Board::new()).await.unwrap();
        let first = analysis.next().await.unwrap().unwrap();
        assert_eq!(first.depth, Some(6));

        analysis.stop();
        analysis.wait().await.unwrap();
        assert_eq!(analysis.next().await.unwrap(), None);

        let info = analysis.info();
        assert_eq!(info.score, Some(PovScore::new(Score::Cp(11), Color::White)));
        mock.assert_done().await;
    }

    #[tokio::test]
    async fn xboard_analysis_stop_uses_the_pong_fence() {
        let script = vec![
            ("xboard", vec![]),
            ("protover 2", vec![r#"feature myname="XB" ping=1 setboard=1 done=1"#]),
            ("force", vec![]),
            ("post", vec![]),
            ("analyze", vec!["4 50 12 1000 d2d4 d7d5"]),
            (".", vec![]),
            ("exit", vec![]),
            ("ping 1", vec!["pong 1"]),
        ];
        let (engine, mock) = xboard_engine(script).await;

        let mut analysis = engine.analysis(&Board::new()).await.unwrap();
        let first = analysis.next().await.unwrap().unwrap();
        assert_eq!(first.depth, Some(4));

        analysis.stop();
        analysis.wait().await.unwrap();
        assert_eq!(analysis.info().nodes, Some(1000));
        mock.assert_done().await;
    }

    #[tokio::test]
    async fn uci_ponder_pipeline_and_preemption() {
        let script = vec![
            ("uci", vec!["id name Mock", "uciok"]),
            ("ucinewgame", vec![]),
            ("position startpos", vec![]),
            ("go movetime 1000", vec!["bestmove e2e4 ponder e7e5"]),
            ("position startpos moves e2e4 e7e5", vec![]),
            ("go ponder movetime 1000", vec![]),
            ("stop", vec!["bestmove e7e5"]),
            ("position startpos moves e2e4", vec![]),
            ("go movetime 1000", vec!["bestmove g8f6"]),
        ];
        let (engine, mock) = uci_engine(script, None, false).await;

        let board = Board::new();
        let first = engine
            .play_with(
                &board,
                Limit::time(Duration::from_secs(1)),
                PlayOptions {
                    ponder: true,
                    ..PlayOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(board.uci(first.mov.as_ref().unwrap()).to_string(), "e2e4");
        assert!(first.ponder.is_some());

        // A new play request interrupts the ponder search and waits for
        // its bestmove before starting its own.
        let mut board = Board::new();
        board.push_uci("e2e4").unwrap();
        let second = engine
            .play(&board, Limit::time(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(board.uci(second.mov.as_ref().unwrap()).to_string(), "g8f6");

        mock.assert_done().await;
    }

    #[tokio::test]
    async fn uci_transient_options_are_restored() {
        let script = vec![
            (
                "uci",
                vec![
                    "id name Mock",
                    "option name Hash type spin default 16 min 1 max 1024",
                    "uciok",
                ],
            ),
            ("setoption name Hash value 256", vec![]),
            ("setoption name Hash value 16", vec![]),
            ("ucinewgame", vec![]),
            ("position startpos", vec![]),
            ("go movetime 1000", vec!["bestmove e2e4"]),
            ("setoption name Hash value 256", vec![]),
        ];
        let (engine, mock) = uci_engine(script, None, false).await;

        engine.configure([("Hash", Value::Int(256))]).await.unwrap();

        let result = engine
            .play_with(
                &Board::new(),
                Limit::time(Duration::from_secs(1)),
                PlayOptions {
                    options: vec![("Hash".into(), Value::Int(16))],
                    ..PlayOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(result.mov.is_some());

        mock.assert_done().await;
    }

    #[tokio::test]
    async fn engine_death_fails_current_and_later_commands() {
        let script = vec![
            ("uci", vec!["id name Mock", "uciok"]),
            ("ucinewgame", vec![]),
            ("position startpos", vec![]),
            ("go", vec![]),
        ];
        let (engine, mock) = uci_engine(script, Some(3), true).await;

        let err = engine.play(&Board::new(), Limit::default()).await.unwrap_err();
        assert_eq!(err, EngineError::Terminated { code: Some(3) });

        // Later calls fail identically without touching the wire
        let err = engine.ping().await.unwrap_err();
        assert_eq!(err, EngineError::Terminated { code: Some(3) });

        mock.assert_done().await;
    }

    #[tokio::test]
    async fn overlapping_commands_cancel_intermediates() {
        let script = vec![
            ("uci", vec!["id name Mock", "uciok"]),
            ("ucinewgame", vec![]),
            ("position startpos", vec![]),
            ("go", vec![]),
            ("stop", vec!["bestmove e2e4"]),
            ("isready", vec!["readyok"]),
        ];
        let (engine, mock) = uci_engine(script, None, false).await;

        let board = Board::new();
        let (play, first, second, last) = tokio::join!(
            engine.play(&board, Limit::default()),
            engine.ping(),
            engine.ping(),
            engine.ping(),
        );

        // Only the pre-empted search and the newest request touch the
        // wire; everything in between resolves as cancelled.
        assert_eq!(play.unwrap_err(), EngineError::Cancelled);
        assert_eq!(first.unwrap_err(), EngineError::Cancelled);
        assert_eq!(second.unwrap_err(), EngineError::Cancelled);
        last.unwrap();

        mock.assert_done().await;
    }

    #[tokio::test]
    async fn quit_reports_the_exit_code_and_fails_pending_commands() {
        let script = vec![
            ("uci", vec!["id name Mock", "uciok"]),
            ("ucinewgame", vec![]),
            ("position startpos", vec![]),
            ("go", vec![]),
            ("quit", vec![]),
        ];
        let (engine, mock) = uci_engine(script, Some(0), true).await;

        let board = Board::new();
        let (play, code) = tokio::join!(engine.play(&board, Limit::default()), engine.quit());

        assert_eq!(play.unwrap_err(), EngineError::Terminated { code: Some(0) });
        assert_eq!(code.unwrap(), Some(0));

        mock.assert_done().await;
    }

    #[tokio::test]
    async fn dropping_an_analysis_stops_the_search() {
        let script = vec![
            ("uci", vec!["id name Mock", "uciok"]),
            ("ucinewgame", vec![]),
            ("position startpos", vec![]),
            ("go infinite", vec![]),
            ("stop", vec!["bestmove e2e4"]),
            ("isready", vec!["readyok"]),
        ];
        let (engine, mock) = uci_engine(script, None, false).await;

        let analysis = engine.analysis(&Board::new()).await.unwrap();
        drop(analysis);

        engine.ping().await.unwrap();
        mock.assert_done().await;
    }

    #[tokio::test]
    async fn xboard_play_with_clocks_and_incremental_sync() {
        let script = vec![
            ("xboard", vec![]),
            ("protover 2", vec![r#"feature myname="XB" ping=1 setboard=1 done=1"#]),
            ("force", vec![]),
            ("level 40 5:00 0", vec![]),
            ("time 30000", vec![]),
            ("otim 30000", vec![]),
            ("post", vec![]),
            ("easy", vec![]),
            ("go", vec!["4 50 12 1000 e2e4 e7e5", "offer draw", "move e2e4"]),
            // Same game continues: only the new move is transmitted
            ("force", vec![]),
            ("e7e5", vec![]),
            ("nopost", vec![]),
            ("easy", vec![]),
            ("go", vec!["move g1f3"]),
        ];
        let (engine, mock) = xboard_engine(script).await;

        let board = Board::new();
        let limit = Limit {
            white_clock: Some(Duration::from_secs(300)),
            black_clock: Some(Duration::from_secs(300)),
            white_inc: Some(Duration::ZERO),
            black_inc: Some(Duration::ZERO),
            remaining_moves: Some(40),
            ..Limit::default()
        };
        let result = engine
            .play_with(
                &board,
                limit,
                PlayOptions {
                    info: InfoSelector::ALL,
                    ..PlayOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(board.uci(result.mov.as_ref().unwrap()).to_string(), "e2e4");
        assert!(result.draw_offered);
        assert_eq!(result.info.depth, Some(4));

        let mut board = Board::new();
        board.push_uci("e2e4").unwrap();
        board.push_uci("e7e5").unwrap();
        let result = engine.play(&board, Limit::default()).await.unwrap();
        assert_eq!(board.uci(result.mov.as_ref().unwrap()).to_string(), "g1f3");

        mock.assert_done().await;
    }

    #[tokio::test(start_paused = true)]
    async fn xboard_initialization_survives_a_silent_protover_engine() {
        let script = vec![
            ("xboard", vec![]),
            // No `done` at all; the handshake times out and proceeds with
            // what was collected
            ("protover 2", vec![r#"feature myname="Old" ping=1 setboard=1"#]),
            ("ping 1", vec!["pong 1"]),
        ];
        let (engine, mock) = xboard_engine(script).await;

        assert_eq!(engine.id()["name"], "Old");
        engine.ping().await.unwrap();
        mock.assert_done().await;
    }

    #[tokio::test]
    async fn xboard_initialization_requires_ping_and_setboard() {
        let script = vec![
            ("xboard", vec![]),
            ("protover 2", vec![r#"feature myname="Bare" setboard=1 done=1"#]),
        ];
        let (transport, _mock) = mock_engine(script, None, false);
        let err = Engine::connect(transport, XBoard::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }

    #[tokio::test]
    async fn initialization_fails_when_the_engine_dies() {
        let script = vec![("uci", vec!["id name Mock"])];
        let (transport, mock) = mock_engine(script, Some(1), true);
        let err = Engine::connect(transport, Uci::new()).await.unwrap_err();
        assert_eq!(err, EngineError::Terminated { code: Some(1) });
        mock.assert_done().await;
    }

    #[tokio::test]
    async fn managed_and_unknown_options_are_rejected() {
        let script = vec![("uci", vec!["id name Mock", "uciok"])];
        let (engine, mock) = uci_engine(script, None, false).await;

        let err = engine
            .configure([("MultiPV", Value::Int(2))])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));

        let err = engine
            .configure([("Threads", Value::Int(2))])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));

        mock.assert_done().await;
    }

    #[tokio::test]
    async fn xboard_rejects_operations_the_protocol_cannot_express() {
        let script = vec![
            ("xboard", vec![]),
            ("protover 2", vec![r#"feature myname="XB" ping=1 setboard=1 done=1"#]),
            // The node/time mixture is only detected after position setup
            ("force", vec![]),
        ];
        let (engine, mock) = xboard_engine(script).await;

        let err = engine
            .analyse_with(
                &Board::new(),
                None,
                AnalysisOptions {
                    multipv: Some(3),
                    ..AnalysisOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));

        let board = Board::new();
        let err = engine
            .play_with(
                &board,
                Limit::default(),
                PlayOptions {
                    root_moves: Some(vec![board.parse_uci("e2e4").unwrap()]),
                    ..PlayOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));

        let mut limit = Limit::nodes(10_000);
        limit.time = Some(Duration::from_secs(1));
        let err = engine.play(&board, limit).await.unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));

        mock.assert_done().await;
    }
}
