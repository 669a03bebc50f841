//! The puzzle replay state machine.
//!
//! A session tracks one attempt at one puzzle: a cursor into the scripted
//! line, the board as it currently stands, and the transient presentation
//! state (selection highlights, hint, wrong-move notice). It is pure and
//! synchronous. Operations that need something to happen later return
//! [`PendingAction`] values for the host to schedule instead of sleeping,
//! and the timer handlers are ordinary methods, so the whole flow can be
//! tested without a clock.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use shakmaty::{
    fen::Fen, uci::UciMove, CastlingMode, Chess, Color, EnPassantMode, Move, Position, Role,
    Square,
};

use crate::puzzle::Puzzle;

/// Delay before the opening scripted reply when a puzzle loads.
pub const FIRST_REPLY_DELAY: Duration = Duration::from_millis(500);
/// Delay before every scripted reply after the first.
pub const REPLY_DELAY: Duration = Duration::from_millis(300);
/// How long a wrong move stays on the board before it is taken back.
pub const REVERT_DELAY: Duration = Duration::from_millis(1000);
/// How long the wrong-move notice stays visible.
pub const NOTICE_DELAY: Duration = Duration::from_millis(1500);

const WRONG_MOVE_NOTICE: &str = "Wrong move!";

/// Where a session stands in its scripted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting on the scripted reply (even cursor).
    OpponentToMove,
    /// Waiting on the user (odd cursor).
    UserToMove,
    /// The whole line has been played.
    Complete,
}

/// Highlight attached to a square after a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightKind {
    /// The selected piece itself.
    Selected,
    /// A legal destination for the selected piece.
    Target,
}

/// What to do when a promotion move arrives without a piece choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromotionPolicy {
    /// Report [`MoveOutcome::PromotionRequired`] and wait for the piece.
    #[default]
    Prompt,
    /// Fill in a queen.
    AutoQueen,
}

/// Follow-up work the host schedules after an operation returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    /// Play the next scripted move via [`ReplaySession::play_scripted_reply`].
    OpponentReply {
        /// First reply of the session, which waits longer.
        first: bool,
    },
    /// Take the wrong move back via [`ReplaySession::revert_wrong_move`].
    RevertWrongMove,
    /// Drop the notice via [`ReplaySession::expire_notice`].
    ClearNotice { seq: u64 },
}

/// Result of a user move attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Not accepted right now: out of turn, no own piece on the origin, or
    /// not a legal destination. Nothing changed and nothing is shown.
    Rejected,
    /// A pawn is reaching the last rank and a piece choice is needed before
    /// anything is applied.
    PromotionRequired,
    /// The move matched the scripted line and the cursor advanced.
    Advanced {
        /// The line is finished.
        complete: bool,
    },
    /// Legal chess, wrong answer: the move is shown on the board and a
    /// revert plus a notice expiry are now pending.
    WrongMove,
}

/// Broken puzzle data: a scripted move the rules reject.
#[derive(Debug, Clone, thiserror::Error)]
#[error("scripted move {uci} is not legal in {fen}")]
pub struct ScriptedMoveError {
    pub uci: String,
    pub fen: String,
}

/// Everything a board front end needs to draw the session.
#[derive(Debug, Clone, Serialize)]
pub struct BoardView {
    pub fen: String,
    pub phase: Phase,
    /// Side the user plays, `white` or `black`; boards render from this side.
    pub orientation: String,
    pub highlights: BTreeMap<String, HighlightKind>,
    pub hint: Option<String>,
    pub notice: Option<String>,
    /// The full solved line, present once the session is complete.
    pub solution: Option<String>,
}

/// One attempt at one puzzle. Replaced wholesale for the next puzzle.
#[derive(Debug, Clone)]
pub struct ReplaySession {
    position: Chess,
    solution: Vec<UciMove>,
    cursor: usize,
    user_color: Color,
    promotion_policy: PromotionPolicy,
    highlights: BTreeMap<Square, HighlightKind>,
    hint: Option<Square>,
    notice: Option<&'static str>,
    notice_seq: u64,
    pending_revert: Option<Chess>,
    stalled: bool,
}

impl ReplaySession {
    /// Start a session. The opponent always moves first, so the returned
    /// action arms the first scripted reply.
    pub fn new(puzzle: Puzzle, promotion_policy: PromotionPolicy) -> (Self, Vec<PendingAction>) {
        let user_color = puzzle.user_color();
        let session = Self {
            position: puzzle.start,
            solution: puzzle.solution,
            cursor: 0,
            user_color,
            promotion_policy,
            highlights: BTreeMap::new(),
            hint: None,
            notice: None,
            notice_seq: 0,
            pending_revert: None,
            stalled: false,
        };
        (session, vec![PendingAction::OpponentReply { first: true }])
    }

    pub fn phase(&self) -> Phase {
        if self.cursor >= self.solution.len() {
            Phase::Complete
        } else if self.cursor % 2 == 0 {
            Phase::OpponentToMove
        } else {
            Phase::UserToMove
        }
    }

    /// Cursor into the scripted line, 0-based.
    pub fn next_move_index(&self) -> usize {
        self.cursor
    }

    pub fn user_color(&self) -> Color {
        self.user_color
    }

    pub fn position(&self) -> &Chess {
        &self.position
    }

    pub fn hint(&self) -> Option<Square> {
        self.hint
    }

    pub fn notice(&self) -> Option<&'static str> {
        self.notice
    }

    pub fn highlights(&self) -> &BTreeMap<Square, HighlightKind> {
        &self.highlights
    }

    /// A wrong move is on the board waiting to be taken back.
    pub fn revert_pending(&self) -> bool {
        self.pending_revert.is_some()
    }

    /// Auto-play stopped because the scripted line is broken.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Current position as FEN.
    pub fn fen(&self) -> String {
        Fen::from_position(&self.position, EnPassantMode::Legal).to_string()
    }

    /// The scripted line, space separated.
    pub fn solution_line(&self) -> String {
        let tokens: Vec<String> = self.solution.iter().map(|m| m.to_string()).collect();
        tokens.join(" ")
    }

    /// Highlight the legal destinations of the piece on `square`, plus the
    /// square itself. Anything else (empty square, piece of the side not to
    /// move) clears the highlights instead. Castling shows up on the king's
    /// destination square. Never touches the position or the cursor.
    pub fn select_square(&mut self, square: Square) {
        self.highlights.clear();
        let owns = self
            .position
            .board()
            .piece_at(square)
            .is_some_and(|piece| piece.color == self.position.turn());
        if !owns {
            return;
        }
        self.highlights.insert(square, HighlightKind::Selected);
        for m in self.position.legal_moves() {
            if m.from() != Some(square) {
                continue;
            }
            if let UciMove::Normal { to, .. } = m.to_uci(CastlingMode::Standard) {
                self.highlights.insert(to, HighlightKind::Target);
            }
        }
    }

    /// Try a user move. Returns the outcome plus any follow-ups to
    /// schedule. Rejections are silent; a legal move that is not the
    /// scripted answer is committed so the user sees it, then taken back by
    /// the pending revert.
    pub fn attempt_move(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<Role>,
    ) -> (MoveOutcome, Vec<PendingAction>) {
        if self.phase() != Phase::UserToMove || self.pending_revert.is_some() {
            return (MoveOutcome::Rejected, Vec::new());
        }
        let owns = self
            .position
            .board()
            .piece_at(from)
            .is_some_and(|piece| piece.color == self.position.turn());
        if !owns {
            return (MoveOutcome::Rejected, Vec::new());
        }

        let candidates: Vec<Move> = self
            .position
            .legal_moves()
            .into_iter()
            .filter(|m| {
                matches!(m.to_uci(CastlingMode::Standard),
                         UciMove::Normal { from: f, to: t, .. } if f == from && t == to)
            })
            .collect();
        if candidates.is_empty() {
            return (MoveOutcome::Rejected, Vec::new());
        }

        // A validated gesture always drops the selection highlights, even
        // when the promotion piece is still to come.
        self.highlights.clear();

        let choice = if candidates.iter().any(|m| m.promotion().is_some()) {
            match (promotion, self.promotion_policy) {
                (Some(role), _) => Some(role),
                (None, PromotionPolicy::AutoQueen) => Some(Role::Queen),
                (None, PromotionPolicy::Prompt) => {
                    return (MoveOutcome::PromotionRequired, Vec::new());
                }
            }
        } else {
            None
        };

        let Some(chosen) = candidates.into_iter().find(|m| m.promotion() == choice) else {
            return (MoveOutcome::Rejected, Vec::new());
        };

        let played = chosen.to_uci(CastlingMode::Standard);
        let mut next = self.position.clone();
        next.play_unchecked(chosen);

        if played == self.solution[self.cursor] {
            self.position = next;
            self.advance_cursor();
            self.notice = None;
            let complete = self.phase() == Phase::Complete;
            let mut follow_ups = Vec::new();
            if !complete {
                follow_ups.push(PendingAction::OpponentReply { first: false });
            }
            (MoveOutcome::Advanced { complete }, follow_ups)
        } else {
            self.pending_revert = Some(std::mem::replace(&mut self.position, next));
            self.notice = Some(WRONG_MOVE_NOTICE);
            self.notice_seq += 1;
            let follow_ups = vec![
                PendingAction::RevertWrongMove,
                PendingAction::ClearNotice {
                    seq: self.notice_seq,
                },
            ];
            (MoveOutcome::WrongMove, follow_ups)
        }
    }

    /// Point at the origin square of the expected move. Ignored while the
    /// opponent is to move and once the line is complete.
    pub fn request_hint(&mut self) -> bool {
        if self.phase() != Phase::UserToMove {
            return false;
        }
        self.hint = match self.solution[self.cursor] {
            UciMove::Normal { from, .. } => Some(from),
            _ => None,
        };
        self.hint.is_some()
    }

    /// Timer handler: apply the next scripted move. Quietly does nothing if
    /// the session has moved on or already stalled; a scripted move the
    /// rules reject stalls the session and is reported so the host can log
    /// the broken data.
    pub fn play_scripted_reply(&mut self) -> Result<(), ScriptedMoveError> {
        if self.phase() != Phase::OpponentToMove || self.stalled {
            return Ok(());
        }
        let uci = self.solution[self.cursor].clone();
        match uci.to_move(&self.position) {
            Ok(m) => {
                self.position.play_unchecked(m);
                self.highlights.clear();
                self.advance_cursor();
                Ok(())
            }
            Err(_) => {
                self.stalled = true;
                Err(ScriptedMoveError {
                    uci: uci.to_string(),
                    fen: self.fen(),
                })
            }
        }
    }

    /// Timer handler: restore the position saved before a wrong move. A
    /// no-op when nothing is pending.
    pub fn revert_wrong_move(&mut self) {
        if let Some(previous) = self.pending_revert.take() {
            self.position = previous;
            self.highlights.clear();
        }
    }

    /// Timer handler: drop the notice, unless a newer notice replaced the
    /// one this expiry was armed for.
    pub fn expire_notice(&mut self, seq: u64) {
        if self.notice_seq == seq {
            self.notice = None;
        }
    }

    /// Snapshot for rendering or the wire.
    pub fn view(&self) -> BoardView {
        let phase = self.phase();
        BoardView {
            fen: self.fen(),
            phase,
            orientation: color_name(self.user_color).to_string(),
            highlights: self
                .highlights
                .iter()
                .map(|(square, kind)| (square.to_string(), *kind))
                .collect(),
            hint: self.hint.map(|square| square.to_string()),
            notice: self.notice.map(|notice| notice.to_string()),
            solution: (phase == Phase::Complete).then(|| self.solution_line()),
        }
    }

    fn advance_cursor(&mut self) {
        self.cursor += 1;
        self.hint = None;
    }
}

fn color_name(color: Color) -> &'static str {
    match color {
        Color::White => "white",
        Color::Black => "black",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puzzle::Puzzle;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
    const PROMO_FEN: &str = "7k/P7/8/8/8/8/8/7K b - - 0 1";

    fn new_session(fen: &str, moves: &str) -> ReplaySession {
        let puzzle = Puzzle::parse(fen, moves).unwrap();
        ReplaySession::new(puzzle, PromotionPolicy::Prompt).0
    }

    /// Session on the opening line with the first scripted reply played.
    fn opening_session() -> ReplaySession {
        let mut session = new_session(START_FEN, "e2e4 e7e5 g1f3");
        session.play_scripted_reply().unwrap();
        session
    }

    fn sq(name: &str) -> Square {
        name.parse().unwrap()
    }

    /// FEN after playing `moves` out from `fen`.
    fn fen_after(fen: &str, moves: &str) -> String {
        let puzzle = Puzzle::parse(fen, moves).unwrap();
        let mut pos = puzzle.start;
        for uci in &puzzle.solution {
            let m = uci.to_move(&pos).unwrap();
            pos.play_unchecked(m);
        }
        Fen::from_position(&pos, EnPassantMode::Legal).to_string()
    }

    #[test]
    fn test_user_plays_the_side_not_to_move() {
        assert_eq!(new_session(START_FEN, "e2e4").user_color(), Color::Black);
        assert_eq!(new_session(PROMO_FEN, "h8g8 a7a8q").user_color(), Color::White);
    }

    #[test]
    fn test_new_session_arms_the_first_reply() {
        let puzzle = Puzzle::parse(START_FEN, "e2e4 e7e5").unwrap();
        let (session, follow_ups) = ReplaySession::new(puzzle, PromotionPolicy::Prompt);
        assert_eq!(session.phase(), Phase::OpponentToMove);
        assert_eq!(session.next_move_index(), 0);
        assert_eq!(follow_ups, vec![PendingAction::OpponentReply { first: true }]);
    }

    #[test]
    fn test_scripted_reply_advances_the_cursor() {
        let session = opening_session();
        assert_eq!(session.next_move_index(), 1);
        assert_eq!(session.phase(), Phase::UserToMove);
        assert_eq!(session.fen(), fen_after(START_FEN, "e2e4"));
    }

    #[test]
    fn test_matching_move_advances_and_arms_the_reply() {
        let mut session = opening_session();
        let (outcome, follow_ups) = session.attempt_move(sq("e7"), sq("e5"), None);
        assert_eq!(outcome, MoveOutcome::Advanced { complete: false });
        assert_eq!(follow_ups, vec![PendingAction::OpponentReply { first: false }]);
        assert_eq!(session.next_move_index(), 2);
        assert_eq!(session.phase(), Phase::OpponentToMove);
    }

    #[test]
    fn test_line_plays_to_completion() {
        let mut session = opening_session();
        session.attempt_move(sq("e7"), sq("e5"), None);
        session.play_scripted_reply().unwrap();
        assert_eq!(session.next_move_index(), 3);
        assert_eq!(session.phase(), Phase::Complete);
        assert_eq!(session.fen(), fen_after(START_FEN, "e2e4 e7e5 g1f3"));

        let view = session.view();
        assert_eq!(view.solution.as_deref(), Some("e2e4 e7e5 g1f3"));

        // Terminal: nothing moves any more.
        let (outcome, follow_ups) = session.attempt_move(sq("d7"), sq("d5"), None);
        assert_eq!(outcome, MoveOutcome::Rejected);
        assert!(follow_ups.is_empty());
        assert!(session.play_scripted_reply().is_ok());
        assert_eq!(session.next_move_index(), 3);
    }

    #[test]
    fn test_wrong_move_is_shown_then_taken_back() {
        let mut session = opening_session();
        let before = session.fen();

        let (outcome, follow_ups) = session.attempt_move(sq("d7"), sq("d5"), None);
        assert_eq!(outcome, MoveOutcome::WrongMove);
        assert_eq!(
            follow_ups,
            vec![
                PendingAction::RevertWrongMove,
                PendingAction::ClearNotice { seq: 1 }
            ]
        );
        assert_eq!(session.fen(), fen_after(START_FEN, "e2e4 d7d5"));
        assert_eq!(session.notice(), Some("Wrong move!"));
        assert_eq!(session.next_move_index(), 1);
        assert!(session.revert_pending());

        session.revert_wrong_move();
        assert_eq!(session.fen(), before);
        assert_eq!(session.notice(), Some("Wrong move!"));

        session.expire_notice(1);
        assert_eq!(session.notice(), None);
        assert_eq!(session.next_move_index(), 1);
        assert_eq!(session.phase(), Phase::UserToMove);
    }

    #[test]
    fn test_illegal_attempts_are_silent() {
        let mut session = opening_session();
        let before = session.fen();

        // Not a legal destination for the pawn.
        let (outcome, follow_ups) = session.attempt_move(sq("e7"), sq("e4"), None);
        assert_eq!(outcome, MoveOutcome::Rejected);
        assert!(follow_ups.is_empty());

        // Empty origin, then an opponent piece.
        assert_eq!(session.attempt_move(sq("d4"), sq("d5"), None).0, MoveOutcome::Rejected);
        assert_eq!(session.attempt_move(sq("e4"), sq("e5"), None).0, MoveOutcome::Rejected);

        assert_eq!(session.fen(), before);
        assert_eq!(session.notice(), None);
        assert_eq!(session.next_move_index(), 1);
    }

    #[test]
    fn test_no_user_move_while_opponent_to_move() {
        let mut session = new_session(START_FEN, "e2e4 e7e5");
        // Even the scripted move itself is refused before the reply plays.
        let (outcome, _) = session.attempt_move(sq("e2"), sq("e4"), None);
        assert_eq!(outcome, MoveOutcome::Rejected);
        assert_eq!(session.next_move_index(), 0);
    }

    #[test]
    fn test_attempts_blocked_while_revert_is_pending() {
        let mut session = opening_session();
        session.attempt_move(sq("d7"), sq("d5"), None);

        let (outcome, _) = session.attempt_move(sq("e7"), sq("e5"), None);
        assert_eq!(outcome, MoveOutcome::Rejected);

        session.revert_wrong_move();
        let (outcome, _) = session.attempt_move(sq("e7"), sq("e5"), None);
        assert_eq!(outcome, MoveOutcome::Advanced { complete: false });
    }

    #[test]
    fn test_hint_only_arms_on_the_users_turn() {
        let mut session = new_session(START_FEN, "e2e4 e7e5");
        assert!(!session.request_hint());
        assert_eq!(session.hint(), None);

        session.play_scripted_reply().unwrap();
        assert!(session.request_hint());
        assert_eq!(session.hint(), Some(sq("e7")));

        // Advancing the cursor clears it.
        session.attempt_move(sq("e7"), sq("e5"), None);
        assert_eq!(session.hint(), None);
        assert_eq!(session.phase(), Phase::Complete);
        assert!(!session.request_hint());
    }

    #[test]
    fn test_select_square_highlights_legal_targets() {
        let mut session = opening_session();

        session.select_square(sq("e7"));
        let highlights = session.highlights();
        assert_eq!(highlights.get(&sq("e7")), Some(&HighlightKind::Selected));
        assert_eq!(highlights.get(&sq("e6")), Some(&HighlightKind::Target));
        assert_eq!(highlights.get(&sq("e5")), Some(&HighlightKind::Target));
        assert_eq!(highlights.len(), 3);

        // Empty square clears, as does an opponent piece.
        session.select_square(sq("d4"));
        assert!(session.highlights().is_empty());
        session.select_square(sq("e7"));
        session.select_square(sq("e4"));
        assert!(session.highlights().is_empty());
    }

    #[test]
    fn test_select_square_shows_castling_on_king_destination() {
        let mut session = new_session("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1", "a1a2 a8a7");
        session.select_square(sq("e1"));
        let highlights = session.highlights();
        assert_eq!(highlights.get(&sq("e1")), Some(&HighlightKind::Selected));
        assert_eq!(highlights.get(&sq("g1")), Some(&HighlightKind::Target));
        assert_eq!(highlights.get(&sq("c1")), Some(&HighlightKind::Target));
        assert_eq!(highlights.get(&sq("h1")), None);
        assert_eq!(highlights.len(), 8);
    }

    #[test]
    fn test_promotion_waits_for_a_piece() {
        let mut session = new_session(PROMO_FEN, "h8g8 a7a8q");
        session.play_scripted_reply().unwrap();
        let before = session.fen();

        let (outcome, follow_ups) = session.attempt_move(sq("a7"), sq("a8"), None);
        assert_eq!(outcome, MoveOutcome::PromotionRequired);
        assert!(follow_ups.is_empty());
        assert_eq!(session.fen(), before);
        assert_eq!(session.next_move_index(), 1);

        let (outcome, _) = session.attempt_move(sq("a7"), sq("a8"), Some(Role::Queen));
        assert_eq!(outcome, MoveOutcome::Advanced { complete: true });
        assert_eq!(session.phase(), Phase::Complete);
    }

    #[test]
    fn test_auto_queen_policy_fills_in_the_piece() {
        let puzzle = Puzzle::parse(PROMO_FEN, "h8g8 a7a8q").unwrap();
        let (mut session, _) = ReplaySession::new(puzzle, PromotionPolicy::AutoQueen);
        session.play_scripted_reply().unwrap();

        let (outcome, _) = session.attempt_move(sq("a7"), sq("a8"), None);
        assert_eq!(outcome, MoveOutcome::Advanced { complete: true });
    }

    #[test]
    fn test_underpromotion_against_the_script_is_a_wrong_move() {
        let mut session = new_session(PROMO_FEN, "h8g8 a7a8q");
        session.play_scripted_reply().unwrap();
        let before = session.fen();

        let (outcome, _) = session.attempt_move(sq("a7"), sq("a8"), Some(Role::Rook));
        assert_eq!(outcome, MoveOutcome::WrongMove);
        session.revert_wrong_move();
        assert_eq!(session.fen(), before);
    }

    #[test]
    fn test_non_pawn_to_last_rank_is_not_a_promotion() {
        let mut session = new_session("4k3/8/8/8/8/8/8/R3K3 b - - 0 1", "e8d8 a1a8");
        session.play_scripted_reply().unwrap();
        let (outcome, _) = session.attempt_move(sq("a1"), sq("a8"), None);
        assert_eq!(outcome, MoveOutcome::Advanced { complete: true });
    }

    #[test]
    fn test_broken_script_stalls_the_session() {
        let mut session = new_session(START_FEN, "e2e5 e7e5");
        let err = session.play_scripted_reply().unwrap_err();
        assert!(err.to_string().contains("e2e5"));
        assert!(session.is_stalled());
        assert_eq!(session.next_move_index(), 0);
        assert_eq!(session.phase(), Phase::OpponentToMove);

        // Quiet from here on: no replay, no user moves, no hints.
        assert!(session.play_scripted_reply().is_ok());
        assert_eq!(session.attempt_move(sq("e2"), sq("e4"), None).0, MoveOutcome::Rejected);
        assert!(!session.request_hint());
    }

    #[test]
    fn test_stale_notice_expiry_is_ignored() {
        let mut session = opening_session();
        session.attempt_move(sq("d7"), sq("d5"), None);
        session.revert_wrong_move();
        session.attempt_move(sq("c7"), sq("c5"), None);

        session.expire_notice(1);
        assert_eq!(session.notice(), Some("Wrong move!"));
        session.expire_notice(2);
        assert_eq!(session.notice(), None);
    }

    #[test]
    fn test_view_serializes_for_the_wire() {
        let mut session = opening_session();
        session.request_hint();
        session.select_square(sq("e7"));

        let view = session.view();
        assert_eq!(view.phase, Phase::UserToMove);
        assert_eq!(view.orientation, "black");
        assert_eq!(view.hint.as_deref(), Some("e7"));
        assert_eq!(view.solution, None);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["phase"], "user_to_move");
        assert_eq!(json["highlights"]["e7"], "selected");
        assert_eq!(json["highlights"]["e5"], "target");
        assert_eq!(json["notice"], serde_json::Value::Null);
    }
}
