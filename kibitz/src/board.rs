//! Position-plus-history wrapper the driver keeps in lock-step with the
//! engine
//!
//! The chess rules themselves are `shakmaty`'s job; this type only adds the
//! bookkeeping the wire protocols need: the root position, the move stack
//! played from it, and whether Chess960 castling rules are in effect.

use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, Position, Rank};

use crate::error::{EngineError, Result};

/// FEN of the standard starting position
pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// A root position and the moves played from it
#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    root: Chess,
    stack: Vec<Move>,
    pos: Chess,
    chess960: bool,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// The standard starting position with an empty move stack
    pub fn new() -> Self {
        Self::from_position(Chess::default(), false)
    }

    /// A board rooted at the given position
    pub fn from_position(root: Chess, chess960: bool) -> Self {
        Self {
            pos: root.clone(),
            root,
            stack: vec![],
            chess960,
        }
    }

    /// A board rooted at the position described by `fen`
    pub fn from_fen(fen: &str, chess960: bool) -> Result<Self> {
        let mode = if chess960 {
            CastlingMode::Chess960
        } else {
            CastlingMode::Standard
        };
        let fen: Fen = fen
            .parse()
            .map_err(|err| EngineError::protocol(format!("invalid fen {fen:?}: {err}")))?;
        let root: Chess = fen
            .into_position(mode)
            .map_err(|err| EngineError::protocol(format!("invalid position: {err}")))?;
        Ok(Self::from_position(root, chess960))
    }

    pub fn chess960(&self) -> bool {
        self.chess960
    }

    /// The position at the start of the move stack
    pub fn root(&self) -> &Chess {
        &self.root
    }

    /// The position after the whole move stack
    pub fn position(&self) -> &Chess {
        &self.pos
    }

    /// The side to move after the whole move stack
    pub fn turn(&self) -> Color {
        self.pos.turn()
    }

    pub fn move_stack(&self) -> &[Move] {
        &self.stack
    }

    /// A copy rooted at the current position, with an empty move stack
    pub fn without_stack(&self) -> Self {
        Self::from_position(self.pos.clone(), self.chess960)
    }

    /// A copy rooted at the root position, with an empty move stack
    pub fn root_board(&self) -> Self {
        Self::from_position(self.root.clone(), self.chess960)
    }

    /// Whether two boards start from the same root position
    pub fn same_root(&self, other: &Board) -> bool {
        self.root == other.root && self.chess960 == other.chess960
    }

    /// Whether the root is the standard starting position
    pub fn is_startpos(&self) -> bool {
        self.fen() == STARTING_FEN
    }

    /// FEN of the root position
    pub fn fen(&self) -> String {
        Fen::from_position(self.root.clone(), EnPassantMode::Always).to_string()
    }

    /// Shredder-FEN of the root position: castling rights are encoded as
    /// rook files so Chess960 positions round-trip
    pub fn shredder_fen(&self) -> String {
        let fen = self.fen();

        let mut rooks: Vec<_> = self.root.castles().castling_rights().into_iter().collect();
        rooks.sort_by_key(|square| {
            (square.rank() != Rank::First, std::cmp::Reverse(square.file()))
        });
        let castling: String = rooks
            .into_iter()
            .map(|square| {
                let file = square.file().char();
                if square.rank() == Rank::First {
                    file.to_ascii_uppercase()
                } else {
                    file
                }
            })
            .collect();

        let mut fields: Vec<&str> = fen.split(' ').collect();
        let castling = if castling.is_empty() { "-".to_owned() } else { castling };
        if fields.len() > 2 {
            fields[2] = &castling;
            fields.join(" ")
        } else {
            fen
        }
    }

    fn castling_mode(&self) -> CastlingMode {
        if self.chess960 {
            CastlingMode::Chess960
        } else {
            CastlingMode::Standard
        }
    }

    /// Renders a move in the UCI notation matching the board's castling
    /// mode
    pub fn uci(&self, mov: &Move) -> UciMove {
        mov.to_uci(self.castling_mode())
    }

    /// Renders a move the way it is sent to an XBoard engine
    pub fn xboard(&self, mov: &Move) -> String {
        self.uci(mov).to_string()
    }

    /// Plays a move on top of the stack
    pub fn push(&mut self, mov: Move) -> Result<()> {
        self.pos = self
            .pos
            .clone()
            .play(&mov)
            .map_err(|err| EngineError::protocol(format!("illegal move: {err}")))?;
        self.stack.push(mov);
        Ok(())
    }

    /// Parses a move in UCI notation against the current position
    pub fn parse_uci(&self, mov: &str) -> Result<Move> {
        let uci = UciMove::from_ascii(mov.as_bytes())
            .map_err(|err| EngineError::protocol(format!("invalid uci move {mov:?}: {err}")))?;
        uci.to_move(&self.pos)
            .map_err(|err| EngineError::protocol(format!("illegal uci move {mov:?}: {err}")))
    }

    /// Parses and plays a move in UCI notation
    pub fn push_uci(&mut self, mov: &str) -> Result<Move> {
        let mov = self.parse_uci(mov)?;
        self.push(mov.clone())?;
        Ok(mov)
    }

    /// Parses a move the way XBoard engines emit them: coordinate notation
    /// first, SAN as the fallback
    pub fn parse_xboard(&self, mov: &str) -> Result<Move> {
        if let Ok(parsed) = self.parse_uci(mov) {
            return Ok(parsed);
        }
        let san = San::from_ascii(mov.as_bytes())
            .map_err(|err| EngineError::protocol(format!("invalid move {mov:?}: {err}")))?;
        san.to_move(&self.pos)
            .map_err(|err| EngineError::protocol(format!("illegal move {mov:?}: {err}")))
    }

    /// Parses and plays a move in XBoard notation
    pub fn push_xboard(&mut self, mov: &str) -> Result<Move> {
        let mov = self.parse_xboard(mov)?;
        self.push(mov.clone())?;
        Ok(mov)
    }

    /// Takes back the last move, replaying the stack from the root
    pub fn pop(&mut self) -> Option<Move> {
        let mov = self.stack.pop()?;
        let mut pos = self.root.clone();
        for played in &self.stack {
            pos.play_unchecked(played);
        }
        self.pos = pos;
        Some(mov)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startpos() {
        let board = Board::new();
        assert!(board.is_startpos());
        assert_eq!(board.fen(), STARTING_FEN);
        assert_eq!(board.turn(), Color::White);
    }

    #[test]
    fn push_and_pop() {
        let mut board = Board::new();
        board.push_uci("e2e4").unwrap();
        board.push_uci("e7e5").unwrap();
        assert_eq!(board.move_stack().len(), 2);
        assert_eq!(board.turn(), Color::White);

        let popped = board.pop().unwrap();
        assert_eq!(board.uci(&popped).to_string(), "e7e5");
        assert_eq!(board.turn(), Color::Black);
        assert!(board.pop().is_some());
        assert!(board.pop().is_none());
        assert_eq!(board.position(), board.root());
    }

    #[test]
    fn illegal_moves_are_rejected() {
        let mut board = Board::new();
        assert!(board.push_uci("e2e5").is_err());
        assert!(board.push_uci("e2e").is_err());
        assert!(board.move_stack().is_empty());
    }

    #[test]
    fn xboard_notation() {
        let mut board = Board::new();
        board.push_xboard("e2e4").unwrap();
        board.push_xboard("e5").unwrap();
        board.push_xboard("Nf3").unwrap();
        assert_eq!(board.move_stack().len(), 3);
        assert_eq!(board.xboard(board.move_stack().last().unwrap()), "g1f3");
        assert!(board.parse_xboard("O-O").is_err());
    }

    #[test]
    fn shredder_fen_castling_files() {
        let board = Board::new();
        assert_eq!(
            board.shredder_fen(),
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w HAha - 0 1"
        );
    }

    #[test]
    fn shredder_fen_without_castling() {
        let board =
            Board::from_fen("8/8/4k3/8/4K3/8/8/8 w - - 0 1", false).unwrap();
        assert_eq!(board.shredder_fen(), "8/8/4k3/8/4K3/8/8/8 w - - 0 1");
    }

    #[test]
    fn without_stack_moves_the_root() {
        let mut board = Board::new();
        board.push_uci("e2e4").unwrap();
        let flat = board.without_stack();
        assert!(flat.move_stack().is_empty());
        assert_eq!(flat.root(), board.position());
        assert!(!flat.is_startpos());
    }

    #[test]
    fn chess960_round_trip() {
        let fen = "bqnbrkrn/pppppppp/8/8/8/8/PPPPPPPP/BQNBRKRN w GEge - 0 1";
        let board = Board::from_fen(fen, true).unwrap();
        assert!(!board.is_startpos());
        assert_eq!(board.shredder_fen(), fen);
    }
}
