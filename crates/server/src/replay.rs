//! Drives a replay session on the tokio clock.
//!
//! The session itself is synchronous; this wrapper owns it behind a mutex,
//! turns its pending actions into sleep tasks, and publishes a fresh board
//! snapshot after every visible change. Every task carries the generation
//! number it was armed under and re-checks it at fire time, so swapping the
//! puzzle (or dropping the driver) strands all outstanding timers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use puzzle_core::{
    BoardView, MoveOutcome, PendingAction, Phase, PromotionPolicy, Puzzle, ReplaySession,
    FIRST_REPLY_DELAY, NOTICE_DELAY, REPLY_DELAY, REVERT_DELAY,
};
use shakmaty::{Role, Square};

/// Scheduling delays, injectable so tests can run fast.
#[derive(Debug, Clone, Copy)]
pub struct ReplayTiming {
    pub first_reply: Duration,
    pub reply: Duration,
    pub revert: Duration,
    pub notice: Duration,
}

impl Default for ReplayTiming {
    fn default() -> Self {
        Self {
            first_reply: FIRST_REPLY_DELAY,
            reply: REPLY_DELAY,
            revert: REVERT_DELAY,
            notice: NOTICE_DELAY,
        }
    }
}

/// Pushed to the socket task after every visible change.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Board(BoardView),
    /// Sent once per puzzle, when the scripted line finishes.
    Complete { moves: String },
}

struct DriverState {
    session: Option<ReplaySession>,
    generation: u64,
    tasks: Vec<JoinHandle<()>>,
    completion_sent: bool,
}

struct Shared {
    state: Mutex<DriverState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    timing: ReplayTiming,
    promotion_policy: PromotionPolicy,
}

/// Owning handle for one connection's replay loop. Dropping it cancels all
/// armed timers.
pub struct ReplayDriver {
    shared: Arc<Shared>,
}

impl ReplayDriver {
    pub fn new(
        timing: ReplayTiming,
        promotion_policy: PromotionPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(DriverState {
                session: None,
                generation: 0,
                tasks: Vec::new(),
                completion_sent: false,
            }),
            events,
            timing,
            promotion_policy,
        });
        (Self { shared }, receiver)
    }

    /// Swap in a new puzzle: cancels everything armed for the old one and
    /// arms the first scripted reply.
    pub fn load(&self, puzzle: Puzzle) {
        let mut state = self.shared.state.lock().unwrap();
        state.generation += 1;
        for task in state.tasks.drain(..) {
            task.abort();
        }

        let (session, follow_ups) = ReplaySession::new(puzzle, self.shared.promotion_policy);
        state.session = Some(session);
        state.completion_sent = false;

        schedule(&self.shared, &mut state, follow_ups);
        publish(&self.shared, &mut state);
    }

    pub fn select_square(&self, square: Square) {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(session) = state.session.as_mut() {
            session.select_square(square);
            publish(&self.shared, &mut state);
        }
    }

    /// Apply a user move. Wrong-move reverts and opponent replies get armed
    /// here; the outcome comes back synchronously so the caller can ask the
    /// client for a promotion piece.
    pub fn attempt_move(&self, from: Square, to: Square, promotion: Option<Role>) -> MoveOutcome {
        let mut state = self.shared.state.lock().unwrap();
        let Some(session) = state.session.as_mut() else {
            return MoveOutcome::Rejected;
        };

        let (outcome, follow_ups) = session.attempt_move(from, to, promotion);
        schedule(&self.shared, &mut state, follow_ups);
        if outcome != MoveOutcome::Rejected {
            publish(&self.shared, &mut state);
        }
        outcome
    }

    pub fn request_hint(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(session) = state.session.as_mut() {
            if session.request_hint() {
                publish(&self.shared, &mut state);
            }
        }
    }

    /// Snapshot of the current session, if one is loaded.
    pub fn view(&self) -> Option<BoardView> {
        let state = self.shared.state.lock().unwrap();
        state.session.as_ref().map(|session| session.view())
    }
}

impl Drop for ReplayDriver {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.generation += 1;
            for task in state.tasks.drain(..) {
                task.abort();
            }
        }
    }
}

fn delay_for(timing: &ReplayTiming, action: PendingAction) -> Duration {
    match action {
        PendingAction::OpponentReply { first: true } => timing.first_reply,
        PendingAction::OpponentReply { first: false } => timing.reply,
        PendingAction::RevertWrongMove => timing.revert,
        PendingAction::ClearNotice { .. } => timing.notice,
    }
}

fn schedule(shared: &Arc<Shared>, state: &mut DriverState, follow_ups: Vec<PendingAction>) {
    let generation = state.generation;
    for action in follow_ups {
        let delay = delay_for(&shared.timing, action);
        let shared = Arc::clone(shared);
        state.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(&shared, generation, action);
        }));
    }
}

/// Timer body: runs the armed action unless the puzzle changed under it.
fn fire(shared: &Arc<Shared>, generation: u64, action: PendingAction) {
    let mut state = shared.state.lock().unwrap();
    if state.generation != generation {
        return;
    }
    let Some(session) = state.session.as_mut() else {
        return;
    };

    match action {
        PendingAction::OpponentReply { .. } => {
            if let Err(e) = session.play_scripted_reply() {
                tracing::error!("Puzzle data fault, auto-play stopped: {e}");
            }
        }
        PendingAction::RevertWrongMove => session.revert_wrong_move(),
        PendingAction::ClearNotice { seq } => session.expire_notice(seq),
    }

    publish(shared, &mut state);
}

fn publish(shared: &Shared, state: &mut DriverState) {
    let Some(session) = state.session.as_ref() else {
        return;
    };
    let _ = shared.events.send(SessionEvent::Board(session.view()));

    if session.phase() == Phase::Complete && !state.completion_sent {
        state.completion_sent = true;
        let _ = shared.events.send(SessionEvent::Complete {
            moves: session.solution_line(),
        });
    }
}
