//! Structured search information reported by engines

use std::time::Duration;

use shakmaty::uci::UciMove;
use shakmaty::Move;

use crate::score::PovScore;

bitflags::bitflags! {
    /// Selects which pieces of search information the driver parses.
    ///
    /// Parsing principal variations and refutation lines replays moves on a
    /// board copy, so callers that do not need them can opt out.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InfoSelector: u8 {
        /// Information that is trivial to obtain (depth, nodes, time, ...)
        const BASIC = 1 << 0;
        /// The engine evaluation
        const SCORE = 1 << 1;
        /// The principal variation
        const PV = 1 << 2;
        /// Refutation lines
        const REFUTATION = 1 << 3;
        /// Lines currently being searched
        const CURRLINE = 1 << 4;
        /// Everything above
        const ALL = Self::BASIC.bits()
            | Self::SCORE.bits()
            | Self::PV.bits()
            | Self::REFUTATION.bits()
            | Self::CURRLINE.bits();
    }
}

impl Default for InfoSelector {
    /// Selects nothing
    fn default() -> Self {
        Self::empty()
    }
}

/// One record of search information.
///
/// Every field is optional; a record only carries what the engine reported
/// on the line it was parsed from. Records merge with [`Info::update`],
/// later reports overriding earlier ones field by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Info {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    /// Time the engine searched so far
    pub time: Option<Duration>,
    pub nodes: Option<u64>,
    /// Principal variation, replayed and validated from the root position
    pub pv: Option<Vec<Move>>,
    /// 1-based rank of the root move this record belongs to
    pub multipv: Option<u32>,
    pub score: Option<PovScore>,
    /// The reported score is only a lower bound
    pub lowerbound: bool,
    /// The reported score is only an upper bound
    pub upperbound: bool,
    /// Move currently being searched; not validated against the board
    pub currmove: Option<UciMove>,
    pub currmovenumber: Option<u32>,
    /// Hash table saturation in permill
    pub hashfull: Option<u32>,
    pub nps: Option<u64>,
    pub tbhits: Option<u64>,
    pub cpuload: Option<u32>,
    /// Refuted move mapped to the refutation line
    pub refutation: Option<Vec<(Move, Vec<Move>)>>,
    /// Per-CPU lines currently being calculated
    pub currline: Option<Vec<(u32, Vec<Move>)>>,
    /// Effective branching factor
    pub ebf: Option<f64>,
    /// Free-form engine commentary, verbatim to the end of the line
    pub string: Option<String>,
}

macro_rules! merge {
    ($target:expr, $source:expr, $($field:ident),+) => {
        $(if $source.$field.is_some() {
            $target.$field = $source.$field.clone();
        })+
    };
}

impl Info {
    /// Merges `other` into `self`, field by field, keeping fields `other`
    /// does not carry
    pub fn update(&mut self, other: &Info) {
        merge!(
            self, other, depth, seldepth, time, nodes, pv, multipv, score, currmove,
            currmovenumber, hashfull, nps, tbhits, cpuload, refutation, currline, ebf, string
        );
        self.lowerbound |= other.lowerbound;
        self.upperbound |= other.upperbound;
    }
}
