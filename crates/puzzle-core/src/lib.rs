//! Core puzzle replay engine: record parsing plus the replay state machine.
//!
//! Everything here is IO-free and clock-free. Hosts apply user input through
//! [`session::ReplaySession`] and schedule the [`session::PendingAction`]s it
//! hands back.

pub mod puzzle;
pub mod session;

pub use puzzle::{Puzzle, PuzzleError};
pub use session::{
    BoardView, HighlightKind, MoveOutcome, PendingAction, Phase, PromotionPolicy, ReplaySession,
    ScriptedMoveError, FIRST_REPLY_DELAY, NOTICE_DELAY, REPLY_DELAY, REVERT_DELAY,
};
