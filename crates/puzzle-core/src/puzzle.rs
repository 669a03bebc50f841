//! Puzzle records: a starting FEN plus the scripted solution line.

use shakmaty::{fen::Fen, uci::UciMove, CastlingMode, Chess, Color, Position};

/// Why a puzzle record could not be turned into a playable puzzle.
#[derive(Debug, thiserror::Error)]
pub enum PuzzleError {
    #[error("invalid FEN: {0}")]
    InvalidFen(String),
    #[error("starting position is not playable: {0}")]
    IllegalPosition(String),
    #[error("bad move token {0:?} in solution line")]
    InvalidMove(String),
    #[error("solution line is empty")]
    EmptySolution,
}

/// One puzzle as served from the puzzle table.
///
/// The scripted line alternates plies starting with the opponent, so the
/// user always plays the side that is *not* to move in `start`.
#[derive(Debug, Clone)]
pub struct Puzzle {
    pub start: Chess,
    pub solution: Vec<UciMove>,
}

impl Puzzle {
    /// Parse a `{fen, moves}` pair. Move tokens are checked syntactically
    /// here; whether they are legal in sequence is discovered during replay.
    pub fn parse(fen: &str, moves: &str) -> Result<Puzzle, PuzzleError> {
        let fen: Fen = fen
            .parse()
            .map_err(|e| PuzzleError::InvalidFen(format!("{e}")))?;
        let start: Chess = fen
            .into_position(CastlingMode::Standard)
            .map_err(|e| PuzzleError::IllegalPosition(format!("{e}")))?;

        let solution = moves
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<UciMove>()
                    .map_err(|_| PuzzleError::InvalidMove(token.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if solution.is_empty() {
            return Err(PuzzleError::EmptySolution);
        }

        Ok(Puzzle { start, solution })
    }

    /// The color the user plays.
    pub fn user_color(&self) -> Color {
        self.start.turn().other()
    }
}
