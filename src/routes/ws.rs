//! WebSocket handler — raid request/response relay.
//!
//! DESIGN
//! ======
//! The session key is resolved to an account id at upgrade time, so every
//! frame on a connection acts as that account. Inbound frames are parsed and
//! dispatched by syscall prefix; handlers return an `Outcome` and the
//! dispatch layer turns it into exactly one done or error frame.
//!
//! The account is reloaded from the store for each request. Raid progress
//! written by one request is therefore visible to the next, even across
//! connections held by the same account.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `account_id`
//! 2. Client sends `raid:*` frames → dispatch → handler returns Outcome
//! 3. Dispatch replies to the sender
//! 4. Close → log and drop; raid state outlives the connection

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, info, warn};

use crate::frame::{Data, FRAME_CODE, FRAME_MESSAGE, Frame, Status};
use crate::services::account::AccountError;
use crate::services::raid::{self, AttemptOutcome, BattleSummary, RaidBattleView};
use crate::state::{AppState, Difficulty};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. Handlers never send frames directly.
#[derive(Debug)]
enum Outcome {
    /// Send done+data to the sender.
    Reply(Data),
    /// Send empty done to the sender.
    Done,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(session_key) = params.get("session_key") else {
        return (StatusCode::UNAUTHORIZED, "session_key required").into_response();
    };

    let account_id = match state.accounts.account_id_for_session(session_key).await {
        Ok(id) => id,
        Err(AccountError::UnknownSession) => {
            return (StatusCode::UNAUTHORIZED, "invalid or expired session").into_response();
        }
        Err(e) => {
            error!(error = %e, "ws session lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "session lookup error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, account_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, account_id: i64) {
    let welcome = Frame::request("session:connected", Data::new()).with_data("account_id", account_id);
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(account_id, "ws: client connected");

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                for frame in process_inbound_text(&state, account_id, &text).await {
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!(account_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Kept free of socket concerns so tests can drive dispatch end to end.
async fn process_inbound_text(state: &AppState, account_id: i64, text: &str) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(account_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data(FRAME_MESSAGE, format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the authenticated account as `from`.
    let req = req.with_from(account_id.to_string());
    info!(account_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");

    let result = match req.prefix() {
        "raid" => handle_raid(state, account_id, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// RAID HANDLERS
// =============================================================================

async fn handle_raid(state: &AppState, account_id: i64, req: &Frame) -> Result<Outcome, Frame> {
    let mut account = state
        .accounts
        .load_account(account_id)
        .await
        .map_err(|e| req.error_from(&e))?;

    match req.op() {
        "lobby" => {
            let lobby = raid::get_lobby(state, &account.raid)
                .await
                .map_err(|e| req.error_from(&e))?;
            let mut data = Data::new();
            data.insert("season_type".into(), json!(lobby.season_type));
            data.insert("lobby".into(), json!(lobby));
            Ok(Outcome::Reply(data))
        }
        "create_battle" => {
            let Some(stage_id) = req
                .data
                .get("raid_unique_id")
                .and_then(serde_json::Value::as_i64)
            else {
                return Err(req.error("raid_unique_id required"));
            };
            let difficulty = match req.data.get("difficulty") {
                None => Difficulty::default(),
                Some(value) => parse_difficulty(value).ok_or_else(|| req.error(format!("invalid difficulty: {value}")))?,
            };
            let is_practice = req
                .data
                .get("is_practice")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);

            let view = raid::create_raid_and_battle(state, &mut account, stage_id, difficulty, is_practice)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(view_to_data(&view)))
        }
        "enter_battle" => {
            let Some(echelon_number) = req
                .data
                .get("echelon_id")
                .and_then(serde_json::Value::as_i64)
            else {
                return Err(req.error("echelon_id required"));
            };

            let view = raid::enter_battle(state, &account, echelon_number)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(view_to_data(&view)))
        }
        "end_battle" => {
            let Some(raw) = req.data.get("summary") else {
                return Err(req.error("summary required"));
            };
            let summary: BattleSummary =
                serde_json::from_value(raw.clone()).map_err(|e| req.error(format!("invalid summary: {e}")))?;

            match raid::end_attempt(state, &mut account, &summary).await {
                Ok(AttemptOutcome::Ongoing) => Ok(Outcome::Done),
                Ok(AttemptOutcome::Cleared(result)) => {
                    let mut data = Data::new();
                    data.insert("ranking_point".into(), json!(result.ranking_point));
                    data.insert("best_ranking_point".into(), json!(result.best_ranking_point));
                    data.insert("time_score".into(), json!(result.time_score));
                    data.insert("hp_percent_score".into(), json!(result.hp_percent_score));
                    data.insert("default_clear_score".into(), json!(result.default_clear_score));
                    Ok(Outcome::Reply(data))
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "give_up" => {
            let result = raid::give_up(state, &account.raid).await;
            let mut data = Data::new();
            data.insert("tier".into(), json!(result.tier));
            data.insert(
                "give_up".into(),
                json!({
                    "ranking": result.ranking,
                    "ranking_point": result.ranking_point,
                    "best_ranking_point": result.best_ranking_point,
                }),
            );
            Ok(Outcome::Reply(data))
        }
        "opponent_list" => {
            let mut data = Data::new();
            data.insert("opponents".into(), json!(raid::list_opponents()));
            Ok(Outcome::Reply(data))
        }
        op => Err(req.error(format!("unknown raid op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Accept a difficulty by name (`"Hard"`) or by tier number (`1`).
fn parse_difficulty(value: &serde_json::Value) -> Option<Difficulty> {
    if let Some(tier) = value.as_i64() {
        return Difficulty::from_tier(tier);
    }
    serde_json::from_value(value.clone()).ok()
}

fn view_to_data(view: &RaidBattleView) -> Data {
    let mut data = Data::new();
    data.insert("raid".into(), json!(view.raid));
    data.insert("battle".into(), json!(view.battle));
    data.insert("assist_character".into(), json!(view.assist_character));
    data
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame
            .data
            .get(FRAME_CODE)
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let message = frame
            .data
            .get(FRAME_MESSAGE)
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
