//! Shared helpers for engine-level integration tests.
//!
//! A [`FakeAgent`] sits on the far side of two in-memory pipes standing in
//! for the agent's stdin and stdout, so tests can script the agent's side
//! of the conversation line by line.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::mpsc;

use gemini_acp::acp::handshake::FsCapabilities;
use gemini_acp::{AcpClient, AgentEvent, ClientOptions};

/// Upper bound for any single expected step.
pub const STEP: Duration = Duration::from_secs(2);

/// Options with short timeouts and both fs capabilities advertised.
pub fn test_options() -> ClientOptions {
    ClientOptions {
        fs: FsCapabilities {
            read_text_file: true,
            write_text_file: true,
        },
        initialize_timeout: STEP,
        session_timeout: STEP,
        shutdown_grace: Duration::from_millis(200),
        strict_handshake: false,
    }
}

/// Scripted agent side of the pipes.
pub struct FakeAgent {
    stdin: Option<Lines<BufReader<DuplexStream>>>,
    stdout: Option<DuplexStream>,
}

impl FakeAgent {
    /// Next line the client wrote, parsed.
    pub async fn recv(&mut self) -> Value {
        let line = self.recv_raw().await.expect("client wrote a line");
        serde_json::from_str(&line).expect("client wrote valid json")
    }

    /// Next raw line, or `None` once the client closed stdin.
    pub async fn recv_raw(&mut self) -> Option<String> {
        let stdin = self.stdin.as_mut().expect("agent stdin still open");
        tokio::time::timeout(STEP, stdin.next_line())
            .await
            .expect("client line within timeout")
            .expect("read agent stdin")
    }

    /// Whether nothing more arrives within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        let stdin = self.stdin.as_mut().expect("agent stdin still open");
        tokio::time::timeout(wait, stdin.next_line()).await.is_err()
    }

    /// Write one JSON message to the client.
    pub async fn send(&mut self, message: Value) {
        self.send_raw(&message.to_string()).await;
    }

    /// Write one raw line to the client.
    pub async fn send_raw(&mut self, line: &str) {
        self.send_bytes(line.as_bytes()).await;
    }

    /// Write one line of arbitrary bytes to the client.
    pub async fn send_bytes(&mut self, line: &[u8]) {
        let stdout = self.stdout.as_mut().expect("agent stdout still open");
        stdout.write_all(line).await.expect("write");
        stdout.write_all(b"\n").await.expect("write");
        stdout.flush().await.expect("flush");
    }

    /// Stop reading the client's writes, as if the agent closed its stdin.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Close the agent's stdout, as if the process exited.
    pub fn exit(&mut self) {
        self.stdout = None;
    }

    /// Answer `initialize` and `session/new`, returning the two requests.
    pub async fn complete_handshake(&mut self, session_id: &str) -> (Value, Value) {
        let init = self.recv().await;
        assert_eq!(init["method"], "initialize");
        self.send(json!({
            "jsonrpc": "2.0",
            "id": init["id"],
            "result": {"protocolVersion": 1, "agentCapabilities": {"loadSession": false}}
        }))
        .await;

        let new = self.recv().await;
        assert_eq!(new["method"], "session/new");
        self.send(json!({
            "jsonrpc": "2.0",
            "id": new["id"],
            "result": {"sessionId": session_id}
        }))
        .await;

        (init, new)
    }
}

/// An engine attached to a [`FakeAgent`].
pub struct Harness {
    pub client: Arc<AcpClient>,
    pub agent: FakeAgent,
    pub events: mpsc::UnboundedReceiver<AgentEvent>,
}

impl Harness {
    /// Next event, failing the test after [`STEP`].
    pub async fn next_event(&mut self) -> AgentEvent {
        tokio::time::timeout(STEP, self.events.recv())
            .await
            .expect("event within timeout")
            .expect("event channel open")
    }

    /// Every event already delivered.
    pub fn drain_events(&mut self) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Skip events until `pred` matches.
    pub async fn wait_for(&mut self, pred: impl Fn(&AgentEvent) -> bool) -> AgentEvent {
        loop {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
    }
}

/// Build and attach an engine rooted at `working_directory`.
pub async fn attached(working_directory: &Path, options: ClientOptions) -> Harness {
    let (client_stdin, agent_stdin) = tokio::io::duplex(64 * 1024);
    let (agent_stdout, client_stdout) = tokio::io::duplex(64 * 1024);
    let (tx, rx) = mpsc::unbounded_channel();

    let client = Arc::new(AcpClient::new(working_directory, options, Arc::new(tx)));
    client
        .attach(client_stdout, client_stdin, None)
        .await
        .expect("attach");

    Harness {
        client,
        agent: FakeAgent {
            stdin: Some(BufReader::new(agent_stdin).lines()),
            stdout: Some(agent_stdout),
        },
        events: rx,
    }
}

/// An attached engine that already completed the handshake with id `s1`.
pub async fn ready(working_directory: &Path) -> Harness {
    let mut h = attached(working_directory, test_options()).await;
    h.agent.complete_handshake("s1").await;
    assert_eq!(h.next_event().await, AgentEvent::SessionReady);
    h
}
