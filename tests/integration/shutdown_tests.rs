//! Integration tests for engine shutdown and exit notification.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use gemini_acp::acp::message::RequestId;
use gemini_acp::{AcpClient, AgentEvent, AppError, ClientOptions, SessionPhase};

use super::test_helpers::{attached, ready, test_options, STEP};

fn exits(events: &[AgentEvent]) -> usize {
    events.iter().filter(|e| **e == AgentEvent::Exited).count()
}

#[tokio::test]
async fn stop_closes_stdin_and_fires_exit_once() {
    let mut h = ready(Path::new("/w")).await;

    let client = Arc::clone(&h.client);
    let stopping = tokio::spawn(async move { client.stop().await });

    assert_eq!(h.agent.recv_raw().await, None, "stdin must reach EOF");
    h.agent.exit();
    tokio::time::timeout(STEP, stopping)
        .await
        .expect("stop within timeout")
        .expect("join");

    assert_eq!(exits(&h.drain_events()), 1);
    assert_eq!(h.client.phase(), SessionPhase::Closed);
}

#[tokio::test]
async fn queued_prompts_are_sent_before_shutdown() {
    let mut h = ready(Path::new("/w")).await;
    h.client.submit_text("one").expect("queued");
    h.client.submit_text("two").expect("queued");

    let client = Arc::clone(&h.client);
    let stopping = tokio::spawn(async move { client.stop().await });

    let first = h.agent.recv().await;
    let second = h.agent.recv().await;
    assert_eq!(first["params"]["prompt"][0]["text"], "one");
    assert_eq!(second["params"]["prompt"][0]["text"], "two");
    assert_eq!(h.agent.recv_raw().await, None);

    h.agent.exit();
    stopping.await.expect("join");
}

#[tokio::test]
async fn stop_during_handshake_fires_exit_once() {
    let mut h = attached(Path::new("/w"), test_options()).await;
    h.client.submit_text("never sent").expect("queued");

    let init = h.agent.recv().await;
    assert_eq!(init["method"], "initialize");

    // The agent never answers and never closes stdout; stop must still
    // return within its bounded waits.
    tokio::time::timeout(STEP, h.client.stop())
        .await
        .expect("stop within timeout");

    assert_eq!(h.agent.recv_raw().await, None, "no prompt after stop");
    assert_eq!(exits(&h.drain_events()), 1);
    assert_eq!(h.client.phase(), SessionPhase::Closed);
}

#[tokio::test]
async fn agent_exit_fires_exit_once_even_after_stop() {
    let mut h = ready(Path::new("/w")).await;

    h.agent.exit();
    assert_eq!(h.next_event().await, AgentEvent::Exited);
    assert_eq!(h.client.phase(), SessionPhase::Closed);

    h.client.stop().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(exits(&h.drain_events()), 0, "no second exit event");
}

#[tokio::test]
async fn submit_after_stop_is_rejected() {
    let mut h = ready(Path::new("/w")).await;
    h.agent.exit();
    h.client.stop().await;

    let err = h.client.submit_text("too late").expect_err("must fail");

    assert!(matches!(err, AppError::QueueClosed(_)));
}

#[tokio::test]
async fn stop_is_idempotent() {
    let mut h = ready(Path::new("/w")).await;
    h.agent.exit();

    h.client.stop().await;
    h.client.stop().await;

    assert_eq!(exits(&h.drain_events()), 1);
}

#[tokio::test]
async fn never_started_engine_stops_quietly() {
    let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
    let client = AcpClient::new("/w", ClientOptions::default(), Arc::new(tx));

    client.stop().await;

    assert_eq!(client.phase(), SessionPhase::Closed);
    assert!(rx.try_recv().is_err(), "no events without a process");
}

#[tokio::test]
async fn operations_before_start_are_errors() {
    let (tx, _rx) = mpsc::unbounded_channel::<AgentEvent>();
    let client = AcpClient::new("/w", ClientOptions::default(), Arc::new(tx));

    assert!(matches!(client.cancel().await, Err(AppError::Acp(_))));
    assert!(matches!(
        client
            .respond_to_permission(&RequestId::Number(1), "allow")
            .await,
        Err(AppError::NotFound(_))
    ));
}
