//! End-to-end tests of the client session against the simulated loom.

mod common;

use common::{start_server, start_server_in, TestClient, TWILL_WIF};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_initial_replay_order() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut client = TestClient::connect(&server).await;

    assert_eq!(
        client.recv().await,
        json!({"type": "LoomConnectionState", "state": "connected", "reason": ""})
    );
    assert_eq!(client.recv().await, json!({"type": "PatternNames", "names": []}));
    assert_eq!(client.recv().await, json!({"type": "WeaveDirection", "forward": true}));
    assert_eq!(
        client.recv().await,
        json!({"type": "JumpPickNumber", "pick_number": null, "repeat_number": null})
    );
    // binary looms cannot be asked for status, so the cached one is sent
    let status = client.recv().await;
    assert_eq!(status["type"], "LoomState");
    assert_eq!(status["pick_wanted"], false);

    server.shutdown().await;
}

#[tokio::test]
async fn test_upload_and_select_pattern() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;

    client.send(json!({"type": "file", "name": "twill.wif", "data": TWILL_WIF})).await;
    assert_eq!(client.recv_type("PatternNames").await["names"], json!(["twill.wif"]));

    client.send(json!({"type": "select_pattern", "name": "twill.wif"})).await;
    let pattern = client.recv().await;
    assert_eq!(pattern["type"], "ReducedPattern");
    assert_eq!(pattern["name"], "twill.wif");
    assert_eq!(pattern["picks"].as_array().unwrap().len(), 4);
    assert_eq!(pattern["picks"][1]["are_shafts_up"], json!([false, true, false, false]));
    assert_eq!(
        client.recv().await,
        json!({"type": "CurrentPickNumber", "pick_number": 0, "repeat_number": 1})
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_picks_advance_and_wrap() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;
    client.load_twill("twill.wif").await;

    let mut picks = Vec::new();
    for _ in 0..5 {
        picks.push(client.weave_pick().await);
    }
    assert_eq!(picks, vec![(1, 1), (2, 1), (3, 1), (4, 1), (0, 2)]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_backward_weaving_wraps_to_previous_repeat() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;
    client.load_twill("twill.wif").await;

    client.send(json!({"type": "weave_direction", "forward": false})).await;
    assert_eq!(client.recv().await, json!({"type": "WeaveDirection", "forward": false}));

    assert_eq!(client.weave_pick().await, (4, 0));
    assert_eq!(client.weave_pick().await, (3, 0));

    server.shutdown().await;
}

#[tokio::test]
async fn test_jump_applies_on_next_pick() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;
    client.load_twill("twill.wif").await;

    client.send(json!({"type": "jump_to_pick", "pick_number": 3, "repeat_number": 5})).await;
    assert_eq!(
        client.recv().await,
        json!({"type": "JumpPickNumber", "pick_number": 3, "repeat_number": 5})
    );

    client.oob("n").await;
    assert_eq!(
        client.recv_type("JumpPickNumber").await,
        json!({"type": "JumpPickNumber", "pick_number": null, "repeat_number": null})
    );
    assert_eq!(
        client.recv().await,
        json!({"type": "CurrentPickNumber", "pick_number": 3, "repeat_number": 5})
    );

    // the jump is used once
    assert_eq!(client.weave_pick().await, (4, 5));

    server.shutdown().await;
}

#[tokio::test]
async fn test_jump_without_pattern_is_error() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;

    client.send(json!({"type": "jump_to_pick", "pick_number": 1})).await;
    let problem = client.recv_type("CommandProblem").await;
    assert_eq!(problem["severity"], "error");

    server.shutdown().await;
}

#[tokio::test]
async fn test_jump_out_of_range_is_error() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;
    client.load_twill("twill.wif").await;

    client.send(json!({"type": "jump_to_pick", "pick_number": 5})).await;
    let problem = client.recv_type("CommandProblem").await;
    assert_eq!(problem["severity"], "error");
    assert!(problem["message"].as_str().unwrap().contains("pick_number=5"));

    // nothing was staged
    assert_eq!(client.weave_pick().await, (1, 1));

    server.shutdown().await;
}

#[tokio::test]
async fn test_select_missing_pattern_is_error() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;

    client.send(json!({"type": "select_pattern", "name": "nope.wif"})).await;
    let problem = client.recv_type("CommandProblem").await;
    assert_eq!(problem["severity"], "error");
    assert!(problem["message"].as_str().unwrap().contains("nope.wif"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_file_is_error() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;

    client.send(json!({"type": "file", "name": "draft.txt", "data": "@@contents"})).await;
    let problem = client.recv_type("CommandProblem").await;
    assert_eq!(problem["severity"], "error");
    assert!(problem["message"].as_str().unwrap().contains("draft.txt"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_upload_and_select_dtx_pattern() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;

    let dtx = "@@StartDTX\n@@Threading\n1 2 3 4\n@@Liftplan\n1,2 2,3 3,4 4,1\n@@EndDTX\n";
    client.send(json!({"type": "file", "name": "twill.dtx", "data": dtx})).await;
    assert_eq!(client.recv_type("PatternNames").await["names"], json!(["twill.dtx"]));

    client.send(json!({"type": "select_pattern", "name": "twill.dtx"})).await;
    let pattern = client.recv_type("ReducedPattern").await;
    assert_eq!(pattern["threading"], json!([0, 1, 2, 3]));
    assert_eq!(pattern["picks"][3]["are_shafts_up"], json!([true, false, false, true]));

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_command_reports_problem_and_session_continues() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;
    assert_eq!(client.recv_type("LoomState").await["type"], "LoomState");

    client.send(json!({"type": "frobnicate"})).await;
    let problem = client.recv().await;
    assert_eq!(problem["type"], "CommandProblem");
    assert_eq!(problem["severity"], "error");

    // no usable structure: dropped without a reply
    client.send_text("not json at all").await;
    client.send(json!({"no_type": 1})).await;

    client.send(json!({"type": "weave_direction", "forward": false})).await;
    assert_eq!(client.recv().await, json!({"type": "WeaveDirection", "forward": false}));

    server.shutdown().await;
}

#[tokio::test]
async fn test_second_client_supersedes_first() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut first = TestClient::connect_and_drain(&server).await;
    assert_eq!(first.recv_type("LoomState").await["type"], "LoomState");

    let mut second = TestClient::connect(&server).await;
    assert_eq!(second.recv().await["type"], "LoomConnectionState");

    let notice = first.recv().await;
    assert_eq!(notice["type"], "CommandProblem");
    assert_eq!(notice["severity"], "warning");
    match first.recv_message().await {
        Message::Close(Some(frame)) => assert_eq!(frame.reason, "superseded"),
        other => panic!("expected close frame, got {other:?}"),
    }

    // the new client is served
    second.recv_type("JumpPickNumber").await;
    second.send(json!({"type": "weave_direction", "forward": false})).await;
    assert_eq!(second.recv_type("WeaveDirection").await["forward"], false);

    server.shutdown().await;
}

#[tokio::test]
async fn test_progress_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let server = start_server_in(dir.path(), |_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;
    client.load_twill("twill.wif").await;
    client.weave_pick().await;
    assert_eq!(client.weave_pick().await, (2, 1));
    server.shutdown().await;

    let server = start_server_in(dir.path(), |_| {}).await;
    let mut client = TestClient::connect(&server).await;
    let pattern = client.recv_type("ReducedPattern").await;
    assert_eq!(pattern["name"], "twill.wif");
    assert_eq!(
        client.recv().await,
        json!({"type": "CurrentPickNumber", "pick_number": 2, "repeat_number": 1})
    );
    assert_eq!(client.weave_pick().await, (3, 1));
    server.shutdown().await;
}

#[tokio::test]
async fn test_reset_db_forgets_patterns() {
    let dir = tempfile::tempdir().unwrap();

    let server = start_server_in(dir.path(), |_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;
    client.load_twill("twill.wif").await;
    server.shutdown().await;

    let server = start_server_in(dir.path(), |config| config.reset_db = true).await;
    let mut client = TestClient::connect(&server).await;
    assert_eq!(client.recv_type("PatternNames").await["names"], json!([]));
    server.shutdown().await;
}

#[tokio::test]
async fn test_clear_pattern_names_keeps_current() {
    let (server, _dir) = start_server(|_| {}).await;
    let mut client = TestClient::connect_and_drain(&server).await;

    client.send(json!({"type": "file", "name": "other.wif", "data": TWILL_WIF})).await;
    client.recv_type("PatternNames").await;
    client.load_twill("twill.wif").await;

    client.send(json!({"type": "clear_pattern_names"})).await;
    assert_eq!(client.recv_type("PatternNames").await["names"], json!(["twill.wif"]));

    server.shutdown().await;
}

#[tokio::test]
async fn test_max_patterns_purges_oldest() {
    let (server, _dir) = start_server(|config| config.max_patterns = 2).await;
    let mut client = TestClient::connect_and_drain(&server).await;

    let mut names = json!(null);
    for name in ["a.wif", "b.wif", "c.wif"] {
        client.send(json!({"type": "file", "name": name, "data": TWILL_WIF})).await;
        names = client.recv_type("PatternNames").await["names"].clone();
    }
    assert_eq!(names, json!(["b.wif", "c.wif"]));

    server.shutdown().await;
}
