//! Integration tests for agent permission requests and host answers.

use std::path::Path;

use serde_json::{json, Value};

use gemini_acp::acp::message::RequestId;
use gemini_acp::{AgentEvent, AppError};

use super::test_helpers::{ready, Harness};

fn permission_request(id: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "session/request_permission",
        "params": {
            "sessionId": "s1",
            "options": [
                {"optionId": "allow", "name": "Allow", "kind": "allow_once"},
                {"optionId": "reject", "name": "Reject", "kind": "reject_once"}
            ],
            "toolCall": {
                "toolCallId": "call-1",
                "title": "Write README.md",
                "kind": "edit",
                "content": [{"type": "diff", "path": "/w/README.md", "oldText": "a\n", "newText": "b\n"}]
            }
        }
    })
}

async fn requested(h: &mut Harness, id: Value) -> RequestId {
    h.agent.send(permission_request(id)).await;
    let event = h.next_event().await;
    let AgentEvent::PermissionRequested(request) = event else {
        panic!("expected permission request, got {event:?}");
    };
    assert_eq!(request.tool_call.display_title(), "Write README.md");
    assert!(request.tool_call.diff().is_some());
    request.request_id
}

#[tokio::test]
async fn selected_option_is_sent_back_verbatim() {
    let mut h = ready(Path::new("/w")).await;
    let id = requested(&mut h, json!(42)).await;

    h.client
        .respond_to_permission(&id, "allow")
        .await
        .expect("respond");

    let line = h.agent.recv_raw().await.expect("response line");
    assert_eq!(
        line,
        r#"{"jsonrpc":"2.0","id":42,"result":{"outcome":{"outcome":"selected","optionId":"allow"}}}"#
    );
    assert!(h.client.pending_permissions().is_empty());
}

#[tokio::test]
async fn string_request_ids_are_echoed() {
    let mut h = ready(Path::new("/w")).await;
    let id = requested(&mut h, json!("perm-7")).await;

    h.client
        .respond_to_permission(&id, "reject")
        .await
        .expect("respond");

    let reply = h.agent.recv().await;
    assert_eq!(reply["id"], "perm-7");
    assert_eq!(reply["result"]["outcome"]["optionId"], "reject");
}

#[tokio::test]
async fn unknown_request_id_is_not_found() {
    let h = ready(Path::new("/w")).await;

    let err = h
        .client
        .respond_to_permission(&RequestId::Number(999), "allow")
        .await
        .expect_err("must fail");

    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn request_resolves_at_most_once() {
    let mut h = ready(Path::new("/w")).await;
    let id = requested(&mut h, json!(5)).await;

    h.client
        .respond_to_permission(&id, "allow")
        .await
        .expect("first answer");
    let err = h
        .client
        .respond_to_permission(&id, "allow")
        .await
        .expect_err("second answer must fail");

    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn unoffered_option_keeps_request_pending() {
    let mut h = ready(Path::new("/w")).await;
    let id = requested(&mut h, json!(6)).await;

    let err = h
        .client
        .respond_to_permission(&id, "allow_forever")
        .await
        .expect_err("option not offered");

    assert!(matches!(err, AppError::NotFound(_)));
    assert!(h.client.pending_permissions().contains(&id));

    h.client
        .respond_to_permission(&id, "allow")
        .await
        .expect("valid option still works");
}
