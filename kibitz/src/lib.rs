//! Asynchronous driver for UCI and XBoard (CECP) chess engines.
//!
//! The library spawns an engine as a child process, owns its lifetime and
//! serializes operations against it: [`Engine::configure`],
//! [`Engine::ping`], [`Engine::play`] and the [`Engine::analyse`] /
//! [`Engine::analysis`] family. Engine output is parsed into typed
//! [`Info`] records; searches are bounded with [`Limit`]s and positions
//! are described by a [`Board`] (a thin root-plus-moves wrapper over
//! [`shakmaty`]).
//!
//! ```no_run
//! use kibitz::{Board, Engine, Limit};
//! use std::time::Duration;
//!
//! # async fn example() -> kibitz::Result<()> {
//! let engine = Engine::uci("stockfish").await?;
//!
//! let mut board = Board::new();
//! board.push_uci("e2e4")?;
//!
//! let result = engine.play(&board, Limit::time(Duration::from_secs(1))).await?;
//! println!("engine plays {:?}", result.mov);
//!
//! engine.quit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Submitting an operation while another is in flight pre-empts the
//! running one: it winds down through the protocol (the engine is stopped
//! and its final output consumed) and resolves as
//! [`EngineError::Cancelled`], after which the newest request runs. At
//! most one request is queued this way; queueing another replaces the
//! waiting one.

mod analysis;
mod board;
mod engine;
mod error;
mod info;
mod limit;
#[cfg(test)]
mod mock;
mod option;
mod score;
mod session;
mod transport;
mod uci;
mod xboard;

pub use analysis::Analysis;
pub use board::{Board, STARTING_FEN};
pub use engine::{AnalysisOptions, Engine, PlayOptions, PlayResult};
pub use error::{EngineError, Result};
pub use info::{Info, InfoSelector};
pub use limit::Limit;
pub use option::{EngineOption, OptionMap, OptionType, Value};
pub use score::{PovScore, Score};
pub use transport::EngineConfig;
