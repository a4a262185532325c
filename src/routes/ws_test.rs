use super::*;
use crate::services::account::AccountStore;
use crate::state::test_helpers::{self, BOSS_GROGGY, BOSS_MAX_HP, STAGE_ID};

fn request(syscall: &str, data: serde_json::Value) -> String {
    let data: Data = serde_json::from_value(data).unwrap();
    serde_json::to_string(&Frame::request(syscall, data)).unwrap()
}

async fn call(state: &AppState, account_id: i64, syscall: &str, data: serde_json::Value) -> Frame {
    let mut frames = process_inbound_text(state, account_id, &request(syscall, data)).await;
    assert_eq!(frames.len(), 1, "expected exactly one reply");
    frames.remove(0)
}

fn code(frame: &Frame) -> &str {
    frame.data.get(FRAME_CODE).and_then(|v| v.as_str()).unwrap_or("")
}

async fn create(state: &AppState, account_id: i64) -> Frame {
    call(
        state,
        account_id,
        "raid:create_battle",
        json!({"raid_unique_id": STAGE_ID, "difficulty": "Normal", "is_practice": false}),
    )
    .await
}

// =============================================================================
// parsing / routing
// =============================================================================

#[tokio::test]
async fn invalid_json_yields_gateway_error() {
    let (state, _store) = test_helpers::test_app_state();
    let frames = process_inbound_text(&state, 1, "{not json").await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].syscall, "gateway:error");
    let message = frames[0].data.get(FRAME_MESSAGE).and_then(|v| v.as_str()).unwrap();
    assert!(message.starts_with("invalid json"));
}

#[tokio::test]
async fn unknown_prefix_is_rejected() {
    let (state, _store) = test_helpers::test_app_state();
    let reply = call(&state, 1, "board:join", json!({})).await;
    assert_eq!(reply.status, Status::Error);
}

#[tokio::test]
async fn unknown_raid_op_is_rejected() {
    let (state, _store) = test_helpers::test_app_state();
    let reply = call(&state, 1, "raid:dance", json!({})).await;
    assert_eq!(reply.status, Status::Error);
    let message = reply.data.get(FRAME_MESSAGE).and_then(|v| v.as_str()).unwrap();
    assert!(message.contains("dance"));
}

#[tokio::test]
async fn reply_correlates_to_request() {
    let (state, _store) = test_helpers::test_app_state();
    let req = Frame::request("raid:opponent_list", Data::new());
    let text = serde_json::to_string(&req).unwrap();
    let frames = process_inbound_text(&state, 1, &text).await;
    assert_eq!(frames[0].parent_id, Some(req.id));
    assert_eq!(frames[0].syscall, "raid:opponent_list");
}

#[tokio::test]
async fn unknown_account_surfaces_structured_error() {
    let (state, _store) = test_helpers::test_app_state();
    let reply = call(&state, 404, "raid:lobby", json!({})).await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(code(&reply), "E_ACCOUNT_NOT_FOUND");
    assert_eq!(reply.data.get("retryable"), Some(&json!(false)));
}

// =============================================================================
// raid:lobby / raid:opponent_list
// =============================================================================

#[tokio::test]
async fn lobby_returns_snapshot() {
    let (state, _store) = test_helpers::test_app_state();
    let reply = call(&state, 1, "raid:lobby", json!({})).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data["season_type"], json!("Open"));
    assert_eq!(reply.data["lobby"]["season_id"], json!(1));
    assert_eq!(reply.data["lobby"]["ranking"], json!(1));
    assert_eq!(reply.data["lobby"]["playable_difficulty_by_boss_group"]["Binah"], json!("Torment"));
    assert!(reply.data["lobby"]["active_raid"].is_null());
}

#[tokio::test]
async fn opponent_list_is_empty() {
    let (state, _store) = test_helpers::test_app_state();
    let reply = call(&state, 1, "raid:opponent_list", json!({})).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data["opponents"], json!([]));
}

// =============================================================================
// raid:create_battle
// =============================================================================

#[tokio::test]
async fn create_battle_returns_raid_battle_and_assist() {
    let (state, store) = test_helpers::test_app_state();
    let reply = create(&state, 1).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data["raid"]["stage_id"], json!(STAGE_ID));
    assert_eq!(reply.data["raid"]["bosses"][0]["current_hp"], json!(BOSS_MAX_HP));
    assert_eq!(reply.data["battle"]["current_boss_groggy"], json!(BOSS_GROGGY));
    assert_eq!(reply.data["assist_character"], json!({}));

    let account = store.load_account(1).await.unwrap();
    assert_eq!(account.raid.active_raid_unique_id, STAGE_ID);
}

#[tokio::test]
async fn create_battle_accepts_difficulty_tier_number() {
    let (state, _store) = test_helpers::test_app_state();
    let reply = call(&state, 1, "raid:create_battle", json!({"raid_unique_id": STAGE_ID, "difficulty": 6})).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data["raid"]["difficulty"], json!("Torment"));
}

#[tokio::test]
async fn create_battle_rejects_bad_input() {
    let (state, _store) = test_helpers::test_app_state();

    let missing = call(&state, 1, "raid:create_battle", json!({})).await;
    assert_eq!(missing.status, Status::Error);

    let bad = call(&state, 1, "raid:create_battle", json!({"raid_unique_id": STAGE_ID, "difficulty": 9})).await;
    assert_eq!(bad.status, Status::Error);

    let unknown = call(&state, 1, "raid:create_battle", json!({"raid_unique_id": 404})).await;
    assert_eq!(code(&unknown), "E_STAGE_NOT_FOUND");
}

// =============================================================================
// raid:enter_battle
// =============================================================================

#[tokio::test]
async fn enter_battle_records_units() {
    let (state, _store) = test_helpers::test_app_state();
    create(&state, 1).await;

    let reply = call(&state, 1, "raid:enter_battle", json!({"echelon_id": 1})).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data["raid"]["participants"]["1"], json!([11, 12, 13, 14, 21, 22]));
}

#[tokio::test]
async fn enter_battle_with_missing_echelon_is_a_request_error() {
    let (state, _store) = test_helpers::test_app_state();
    create(&state, 1).await;

    let reply = call(&state, 1, "raid:enter_battle", json!({"echelon_id": 4})).await;
    assert_eq!(code(&reply), "E_ECHELON_NOT_FOUND");
}

// =============================================================================
// raid:end_battle
// =============================================================================

#[tokio::test]
async fn end_battle_without_defeat_is_empty_done() {
    let (state, _store) = test_helpers::test_app_state();
    create(&state, 1).await;

    let reply = call(
        &state,
        1,
        "raid:end_battle",
        json!({"summary": {"elapsed_realtime": 120.0, "boss_results": [{"given_damage": 10}]}}),
    )
    .await;
    assert_eq!(reply.status, Status::Done);
    assert!(reply.data.is_empty());
}

#[tokio::test]
async fn end_battle_defeat_reports_scores_and_clears_lobby_raid() {
    let (state, _store) = test_helpers::test_app_state();
    create(&state, 1).await;

    let reply = call(
        &state,
        1,
        "raid:end_battle",
        json!({"summary": {"elapsed_realtime": 0.0, "boss_results": [{"given_damage": BOSS_MAX_HP}]}}),
    )
    .await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data["time_score"], json!(3600 * 120));
    assert_eq!(reply.data["ranking_point"], json!(3600 * 120 + 60_000 + 1_000_000));
    assert_eq!(reply.data["best_ranking_point"], reply.data["ranking_point"]);

    let lobby = call(&state, 1, "raid:lobby", json!({})).await;
    assert!(lobby.data["lobby"]["active_raid"].is_null());
    assert_eq!(lobby.data["lobby"]["best_ranking_point"], reply.data["ranking_point"]);
}

#[tokio::test]
async fn end_battle_requires_summary() {
    let (state, _store) = test_helpers::test_app_state();
    create(&state, 1).await;

    let missing = call(&state, 1, "raid:end_battle", json!({})).await;
    assert_eq!(missing.status, Status::Error);

    let malformed = call(&state, 1, "raid:end_battle", json!({"summary": {"boss_results": "x"}})).await;
    assert_eq!(malformed.status, Status::Error);

    let empty = call(&state, 1, "raid:end_battle", json!({"summary": {"elapsed_realtime": 1.0, "boss_results": []}})).await;
    assert_eq!(code(&empty), "E_MISSING_BOSS_RESULT");
}

#[tokio::test]
async fn end_battle_rejects_negative_damage_and_bad_duration() {
    let (state, _store) = test_helpers::test_app_state();
    create(&state, 1).await;

    let negative = call(
        &state,
        1,
        "raid:end_battle",
        json!({"summary": {"elapsed_realtime": 0.0, "boss_results": [{"given_damage": i64::MIN}]}}),
    )
    .await;
    assert_eq!(code(&negative), "E_INVALID_SUMMARY");

    let negative_time = call(
        &state,
        1,
        "raid:end_battle",
        json!({"summary": {"elapsed_realtime": -1e30, "boss_results": [{"given_damage": 1}]}}),
    )
    .await;
    assert_eq!(code(&negative_time), "E_INVALID_SUMMARY");

    let raid_state = state.raid.lock().await;
    assert_eq!(raid_state.battle.as_ref().unwrap().current_boss_hp, BOSS_MAX_HP);
}

#[tokio::test]
async fn end_battle_by_non_member_is_invariant_error() {
    let (state, _store) = test_helpers::test_app_state();
    create(&state, 1).await;
    // Account 2 selects the stage (joining the live raid) but never opened the battle.
    create(&state, 2).await;

    let reply = call(
        &state,
        2,
        "raid:end_battle",
        json!({"summary": {"elapsed_realtime": 10.0, "boss_results": [{"given_damage": 10}]}}),
    )
    .await;
    assert_eq!(code(&reply), "E_RAID_INVARIANT");
}

// =============================================================================
// raid:give_up
// =============================================================================

#[tokio::test]
async fn give_up_reports_zeroed_result() {
    let (state, _store) = test_helpers::test_app_state();
    create(&state, 1).await;

    let reply = call(&state, 1, "raid:give_up", json!({})).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data["tier"], json!(0));
    assert_eq!(reply.data["give_up"], json!({"ranking": 0, "ranking_point": 0, "best_ranking_point": 0}));
    assert!(!state.raid.lock().await.is_active());
}

// =============================================================================
// parse_difficulty
// =============================================================================

#[test]
fn difficulty_parses_by_name_or_tier() {
    assert_eq!(parse_difficulty(&json!("Hard")), Some(Difficulty::Hard));
    assert_eq!(parse_difficulty(&json!(3)), Some(Difficulty::Hardcore));
    assert_eq!(parse_difficulty(&json!(-1)), None);
    assert_eq!(parse_difficulty(&json!("Nightmare")), None);
    assert_eq!(parse_difficulty(&json!(true)), None);
}

// =============================================================================
// live socket
// =============================================================================

mod socket {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use super::*;

    async fn serve(state: AppState) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, crate::routes::app(state)).await.unwrap();
        });
        addr
    }

    fn parse(msg: &WsMessage) -> Frame {
        serde_json::from_str(msg.to_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn connect_greets_then_serves_raid_frames() {
        let (state, _store) = test_helpers::test_app_state();
        let addr = serve(state).await;

        let url = format!("ws://{addr}/api/ws?session_key={}", test_helpers::session_key(1));
        let (mut stream, _) = connect_async(url).await.unwrap();

        let welcome = parse(&stream.next().await.unwrap().unwrap());
        assert_eq!(welcome.syscall, "session:connected");
        assert_eq!(welcome.data["account_id"], json!(1));

        let req = Frame::request("raid:lobby", Data::new());
        stream
            .send(WsMessage::Text(serde_json::to_string(&req).unwrap().into()))
            .await
            .unwrap();

        let reply = parse(&stream.next().await.unwrap().unwrap());
        assert_eq!(reply.parent_id, Some(req.id));
        assert_eq!(reply.status, Status::Done);
        assert_eq!(reply.from, None);
        assert_eq!(reply.data["lobby"]["season_id"], json!(1));
    }

    #[tokio::test]
    async fn unknown_session_key_is_refused() {
        let (state, _store) = test_helpers::test_app_state();
        let addr = serve(state).await;

        assert!(connect_async(format!("ws://{addr}/api/ws?session_key=nope")).await.is_err());
        assert!(connect_async(format!("ws://{addr}/api/ws")).await.is_err());
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (state, _store) = test_helpers::test_app_state();
        let addr = serve(state).await;

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(
            &mut stream,
            b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
        let mut response = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
    }
}
