//! Contract tests for the exact bytes written to the agent's stdin.
//!
//! The Gemini CLI parses each line independently, so every outbound message
//! must be a single compact JSON document followed by `\n`.

use std::path::Path;

use tokio::io::{AsyncReadExt, DuplexStream};

use gemini_acp::acp::handshake::{
    cancel_params, initialize_params, prompt_params, session_new_params, FsCapabilities,
    INITIALIZE, SESSION_CANCEL, SESSION_NEW, SESSION_PROMPT,
};
use gemini_acp::acp::message::{RequestId, CLIENT_ERROR};
use gemini_acp::acp::permission::PermissionResponse;
use gemini_acp::acp::writer::OutboundWriter;

fn pipe() -> (OutboundWriter, DuplexStream) {
    let (client, agent) = tokio::io::duplex(64 * 1024);
    (OutboundWriter::new(client), agent)
}

/// Close the writer and collect everything the agent received.
async fn written(writer: OutboundWriter, mut agent: DuplexStream) -> String {
    writer.close().await.expect("close");
    let mut out = String::new();
    agent.read_to_string(&mut out).await.expect("read");
    out
}

#[tokio::test]
async fn initialize_line() {
    let (w, agent) = pipe();
    let params = initialize_params(FsCapabilities::default());
    w.send_request(1, INITIALIZE, Some(&params)).await.unwrap();
    let out = written(w, agent).await;

    assert_eq!(
        out,
        "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"params\":{\"clientCapabilities\":{\"fs\":{\"readTextFile\":false,\"writeTextFile\":false}},\"protocolVersion\":1}}\n"
    );
}

#[tokio::test]
async fn session_new_line() {
    let (w, agent) = pipe();
    let params = session_new_params(Path::new("/home/me/project"));
    w.send_request(2, SESSION_NEW, Some(&params)).await.unwrap();
    let out = written(w, agent).await;

    assert_eq!(
        out,
        "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"session/new\",\"params\":{\"cwd\":\"/home/me/project\",\"mcpServers\":[]}}\n"
    );
}

#[tokio::test]
async fn prompt_and_cancel_lines() {
    let (w, agent) = pipe();
    let prompt = prompt_params("s1", "hello");
    w.send_request(3, SESSION_PROMPT, Some(&prompt)).await.unwrap();
    let cancel = cancel_params("s1");
    w.send_request(4, SESSION_CANCEL, Some(&cancel)).await.unwrap();
    let out = written(w, agent).await;

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        vec![
            "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"session/prompt\",\"params\":{\"prompt\":[{\"text\":\"hello\",\"type\":\"text\"}],\"sessionId\":\"s1\"}}",
            "{\"jsonrpc\":\"2.0\",\"id\":4,\"method\":\"session/cancel\",\"params\":{\"sessionId\":\"s1\"}}",
        ]
    );
}

#[tokio::test]
async fn permission_response_line() {
    let (w, agent) = pipe();
    w.send_response(&RequestId::Number(42), &PermissionResponse::selected("allow"))
        .await
        .unwrap();
    let out = written(w, agent).await;

    assert_eq!(
        out,
        "{\"jsonrpc\":\"2.0\",\"id\":42,\"result\":{\"outcome\":{\"outcome\":\"selected\",\"optionId\":\"allow\"}}}\n"
    );
}

#[tokio::test]
async fn error_response_line() {
    let (w, agent) = pipe();
    w.send_error(&RequestId::from("fs-9"), CLIENT_ERROR, "denied")
        .await
        .unwrap();
    let out = written(w, agent).await;

    assert_eq!(
        out,
        "{\"jsonrpc\":\"2.0\",\"id\":\"fs-9\",\"error\":{\"code\":-32000,\"message\":\"denied\"}}\n"
    );
}

#[tokio::test]
async fn writes_after_close_fail() {
    let (client, _agent) = tokio::io::duplex(1024);
    let writer = OutboundWriter::new(client);

    writer.close().await.expect("close");
    writer.close().await.expect("second close is a no-op");

    assert!(writer.is_closed().await);
    assert!(writer.send_request(5, SESSION_PROMPT, None).await.is_err());
}
