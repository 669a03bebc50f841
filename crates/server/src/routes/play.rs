//! Interactive puzzle replay over a WebSocket.
//!
//! One socket is one replay loop: the server picks a random puzzle, streams
//! board snapshots as the scripted line plays out, and applies the client's
//! select/move/hint gestures. `next` swaps in a fresh puzzle.

use anyhow::Result;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    Extension,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use shakmaty::{Role, Square};
use sqlx::PgPool;

use puzzle_core::{BoardView, MoveOutcome, Puzzle};

use crate::config::Config;
use crate::db::puzzles;
use crate::error::AppError;
use crate::replay::{ReplayDriver, ReplayTiming, SessionEvent};

// ---- Message types ----

/// Server → Client messages
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Board { board: BoardView },
    PromotionRequired { from: String, to: String },
    Complete { moves: String },
    NoPuzzle { detail: String },
    Error { message: String },
}

/// Client → Server messages
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Select {
        square: String,
    },
    Move {
        from: String,
        to: String,
        promotion: Option<String>,
    },
    Hint,
    Next,
}

// ---- WebSocket handler ----

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(pool): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, pool, config))
}

async fn handle_socket(socket: WebSocket, pool: PgPool, config: Config) {
    tracing::debug!("Replay socket connected");
    let (mut sender, mut receiver) = socket.split();

    let (driver, mut events) = ReplayDriver::new(ReplayTiming::default(), config.promotion_policy);

    match next_puzzle(&pool).await {
        Ok(Some(puzzle)) => driver.load(puzzle),
        Ok(None) => {
            let _ = send_msg(
                &mut sender,
                &ServerMessage::NoPuzzle {
                    detail: "No puzzle found".to_string(),
                },
            )
            .await;
            return;
        }
        Err(e) => {
            tracing::warn!("Failed to fetch a puzzle: {e}");
            let _ = send_msg(
                &mut sender,
                &ServerMessage::Error {
                    message: "Failed to fetch a puzzle".to_string(),
                },
            )
            .await;
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let msg = match event {
                    SessionEvent::Board(board) => ServerMessage::Board { board },
                    SessionEvent::Complete { moves } => ServerMessage::Complete { moves },
                };
                if send_msg(&mut sender, &msg).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(t))) => t.to_string(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                };

                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        let _ = send_msg(&mut sender, &ServerMessage::Error {
                            message: format!("Invalid message: {}", e),
                        }).await;
                        continue;
                    }
                };

                if handle_client_msg(client_msg, &driver, &pool, &mut sender).await.is_err() {
                    break;
                }
            }
        }
    }

    // The driver drops here and strands any armed timers.
    tracing::debug!("Replay socket closed");
}

async fn handle_client_msg(
    msg: ClientMessage,
    driver: &ReplayDriver,
    pool: &PgPool,
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
) -> Result<()> {
    match msg {
        ClientMessage::Select { square } => match square.parse::<Square>() {
            Ok(square) => driver.select_square(square),
            Err(_) => {
                send_msg(
                    sender,
                    &ServerMessage::Error {
                        message: format!("Bad square: {square}"),
                    },
                )
                .await?;
            }
        },
        ClientMessage::Move { from, to, promotion } => {
            let (Ok(from_sq), Ok(to_sq)) = (from.parse::<Square>(), to.parse::<Square>()) else {
                send_msg(
                    sender,
                    &ServerMessage::Error {
                        message: "Bad move coordinates".to_string(),
                    },
                )
                .await?;
                return Ok(());
            };
            let promotion_role = match promotion.as_deref() {
                None => None,
                Some(p) => match parse_promotion(p) {
                    Some(role) => Some(role),
                    None => {
                        send_msg(
                            sender,
                            &ServerMessage::Error {
                                message: format!("Bad promotion piece: {p}"),
                            },
                        )
                        .await?;
                        return Ok(());
                    }
                },
            };

            if driver.attempt_move(from_sq, to_sq, promotion_role) == MoveOutcome::PromotionRequired
            {
                send_msg(sender, &ServerMessage::PromotionRequired { from, to }).await?;
            }
        }
        ClientMessage::Hint => driver.request_hint(),
        ClientMessage::Next => match next_puzzle(pool).await {
            Ok(Some(puzzle)) => driver.load(puzzle),
            Ok(None) => {
                send_msg(
                    sender,
                    &ServerMessage::NoPuzzle {
                        detail: "No puzzle found".to_string(),
                    },
                )
                .await?;
            }
            Err(e) => {
                tracing::warn!("Failed to fetch a puzzle: {e}");
                send_msg(
                    sender,
                    &ServerMessage::Error {
                        message: "Failed to fetch a puzzle".to_string(),
                    },
                )
                .await?;
            }
        },
    }
    Ok(())
}

/// Fetch a random record and lift it into a playable puzzle. A row that no
/// longer parses is a bank fault, not a client error.
async fn next_puzzle(pool: &PgPool) -> Result<Option<Puzzle>, AppError> {
    let Some(row) = puzzles::fetch_random(pool).await? else {
        return Ok(None);
    };
    let puzzle = Puzzle::parse(&row.fen, &row.moves).map_err(|e| {
        AppError::Internal(format!("puzzle {:?} is unplayable: {e}", row.puzzle_id))
    })?;
    Ok(Some(puzzle))
}

fn parse_promotion(piece: &str) -> Option<Role> {
    let mut chars = piece.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    match Role::from_char(c.to_ascii_lowercase()) {
        Some(role @ (Role::Queen | Role::Rook | Role::Bishop | Role::Knight)) => Some(role),
        _ => None,
    }
}

async fn send_msg(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<()> {
    let json = serde_json::to_string(msg)?;
    sender.send(Message::Text(json.into())).await?;
    Ok(())
}
