//! Search termination constraints

use std::time::Duration;

/// Constraints on when the engine should stop searching.
///
/// All fields are optional and combine; an empty limit means the protocol
/// default (an unconstrained search for [`Engine::play`], infinite analysis
/// for [`Engine::analysis`]).
///
/// [`Engine::play`]: crate::Engine::play
/// [`Engine::analysis`]: crate::Engine::analysis
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Limit {
    /// Think for exactly this long
    pub time: Option<Duration>,
    /// Search to this depth in plies
    pub depth: Option<u32>,
    /// Search this many nodes
    pub nodes: Option<u64>,
    /// Search for a mate in this many moves
    pub mate: Option<u32>,
    /// Time White has left on the clock
    pub white_clock: Option<Duration>,
    /// Time Black has left on the clock
    pub black_clock: Option<Duration>,
    /// White's increment per move
    pub white_inc: Option<Duration>,
    /// Black's increment per move
    pub black_inc: Option<Duration>,
    /// Moves to the next time control
    pub remaining_moves: Option<u32>,
}

impl Limit {
    /// Think for a fixed time per move
    pub fn time(time: Duration) -> Self {
        Self {
            time: Some(time),
            ..Self::default()
        }
    }

    /// Search to a fixed depth
    pub fn depth(depth: u32) -> Self {
        Self {
            depth: Some(depth),
            ..Self::default()
        }
    }

    /// Search a fixed number of nodes
    pub fn nodes(nodes: u64) -> Self {
        Self {
            nodes: Some(nodes),
            ..Self::default()
        }
    }

    /// Search for a mate in the given number of moves
    pub fn mate(mate: u32) -> Self {
        Self {
            mate: Some(mate),
            ..Self::default()
        }
    }

    /// Play with both clocks and increments
    pub fn clock(
        white_clock: Duration,
        black_clock: Duration,
        white_inc: Duration,
        black_inc: Duration,
    ) -> Self {
        Self {
            white_clock: Some(white_clock),
            black_clock: Some(black_clock),
            white_inc: Some(white_inc),
            black_inc: Some(black_inc),
            ..Self::default()
        }
    }
}
