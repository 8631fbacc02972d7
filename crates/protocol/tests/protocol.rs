//! Wire-level session scenarios over an in-memory duplex stream.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

use turnstile_core::{EngineConfig, ToolRegistry};
use turnstile_model::{MockModel, MockOutcome, ModelClient};
use turnstile_protocol::{ProtocolServer, ServerConfig};

struct Client {
    reader: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Client {
    async fn send(&mut self, frame: Value) {
        let mut line = frame.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn next(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.reader.next_line())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("server closed the stream");
        serde_json::from_str(&line).unwrap()
    }

    /// Next non-event frame, discarding event notifications along the way.
    async fn next_non_event(&mut self) -> Value {
        loop {
            let frame = self.next().await;
            if frame["type"] != "event" {
                return frame;
            }
        }
    }

    /// Frames until (and including) the response with the given id.
    async fn frames_until_response(&mut self, id: u64) -> Vec<Value> {
        let mut frames = Vec::new();
        loop {
            let frame = self.next().await;
            let done = frame["type"] == "response" && frame["id"] == json!(id);
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }
}

fn spawn_server(model: Option<MockModel>, engine: EngineConfig) -> Client {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = ProtocolServer::new(
        ServerConfig {
            model: model.map(|m| Arc::new(m) as Arc<dyn ModelClient>),
            model_name: "mock".into(),
            system_prompt: "You are a coding assistant.".into(),
            engine,
            store: None,
        },
        ToolRegistry::new(),
    );
    tokio::spawn(async move {
        let _ = server.run(server_io).await;
    });
    let (read, write) = tokio::io::split(client_io);
    Client {
        reader: BufReader::new(read).lines(),
        writer: write,
    }
}

fn request(id: u64, method: &str, params: Value) -> Value {
    json!({"type": "request", "id": id, "method": method, "params": params})
}

#[tokio::test]
async fn test_initialize_reports_tools() {
    let mut client = spawn_server(Some(MockModel::new()), EngineConfig::default());

    client
        .send(request(
            1,
            "initialize",
            json!({
                "client_name": "itest",
                "external_tools": [{
                    "name": "peer_fmt",
                    "description": "Format a file on the client side.",
                    "schema": {"type": "object"}
                }]
            }),
        ))
        .await;

    let response = client.next_non_event().await;
    assert_eq!(response["id"], json!(1));
    assert_eq!(response["result"]["server"], "turnstile");
    let tools = response["result"]["tools"].as_array().unwrap();
    assert!(tools.contains(&json!("peer_fmt")));
}

#[tokio::test]
async fn test_prompt_streams_events_then_resolves() {
    let model = MockModel::new().push_text("hello there");
    let mut client = spawn_server(Some(model), EngineConfig::default());

    client
        .send(request(1, "prompt", json!({"text": "hi"})))
        .await;
    let frames = client.frames_until_response(1).await;

    let events: Vec<&Value> = frames.iter().filter(|f| f["type"] == "event").collect();
    assert!(events
        .iter()
        .any(|f| f["event"]["type"] == "turn_begin"));
    assert!(events
        .iter()
        .any(|f| f["event"]["type"] == "content_part"));

    let response = frames.last().unwrap();
    assert_eq!(response["result"]["status"], "finished");
    assert_eq!(response["result"]["text"], "hello there");
}

#[tokio::test]
async fn test_prompt_without_model_fails_cleanly() {
    let mut client = spawn_server(None, EngineConfig::default());

    client
        .send(request(1, "prompt", json!({"text": "hi"})))
        .await;
    let response = client.next_non_event().await;
    assert_eq!(response["error"]["code"], "llm-not-configured");
}

#[tokio::test]
async fn test_single_flight_and_cancel() {
    let model = MockModel::new().push(MockOutcome::Hang);
    let mut client = spawn_server(Some(model), EngineConfig::default());

    client
        .send(request(1, "prompt", json!({"text": "hi"})))
        .await;
    // Second prompt is refused without disturbing the running turn.
    client
        .send(request(2, "prompt", json!({"text": "again"})))
        .await;
    let refusal = client.next_non_event().await;
    assert_eq!(refusal["id"], json!(2));
    assert_eq!(refusal["error"]["code"], "turn-already-in-progress");

    client.send(request(3, "cancel", Value::Null)).await;
    let cancelled = client.next_non_event().await;
    assert_eq!(cancelled["id"], json!(3));
    assert_eq!(cancelled["result"]["cancelled"], json!(true));

    let resolution = client.next_non_event().await;
    assert_eq!(resolution["id"], json!(1));
    assert_eq!(resolution["result"]["status"], "cancelled");
}

#[tokio::test]
async fn test_cancel_when_idle() {
    let mut client = spawn_server(Some(MockModel::new()), EngineConfig::default());

    client.send(request(1, "cancel", Value::Null)).await;
    let response = client.next_non_event().await;
    assert_eq!(response["error"]["code"], "no-turn-in-progress");
}

#[tokio::test]
async fn test_transport_errors_are_distinct() {
    let mut client = spawn_server(Some(MockModel::new()), EngineConfig::default());

    client.send(json!({"type": "request", "id": 1, "method": "selfdestruct"})).await;
    let response = client.next_non_event().await;
    assert_eq!(response["error"]["code"], "unknown-method");

    client.writer.write_all(b"{broken\n").await.unwrap();
    let response = client.next_non_event().await;
    assert_eq!(response["error"]["code"], "parse-error");
    assert!(response.get("id").is_none());
}

#[tokio::test]
async fn test_peer_tool_approval_and_invocation_roundtrip() {
    let model = MockModel::new()
        .push_tool_call("c1", "peer_write", json!({"path": "notes.txt"}))
        .push_text("saved");
    let mut client = spawn_server(Some(model), EngineConfig::default());

    client
        .send(request(
            1,
            "initialize",
            json!({
                "external_tools": [{
                    "name": "peer_write",
                    "description": "Write a file on the client side.",
                    "schema": {"type": "object", "properties": {"path": {"type": "string"}}},
                    "capabilities": ["mutates-filesystem"]
                }]
            }),
        ))
        .await;
    client.next_non_event().await;

    client
        .send(request(2, "prompt", json!({"text": "write my notes"})))
        .await;

    // The gated call surfaces an approval request first.
    let approval = client.next_non_event().await;
    assert_eq!(approval["type"], "request");
    assert_eq!(approval["method"], "approval_request");
    assert_eq!(approval["params"]["tool"], "peer_write");
    client
        .send(json!({
            "type": "response",
            "id": approval["id"],
            "response": "approve"
        }))
        .await;

    // Then the invocation round-trips through the client.
    let invocation = client.next_non_event().await;
    assert_eq!(invocation["method"], "tool_call_request");
    assert_eq!(invocation["params"]["tool"], "peer_write");
    assert_eq!(invocation["params"]["arguments"]["path"], "notes.txt");
    client
        .send(json!({
            "type": "response",
            "id": invocation["id"],
            "content": "wrote notes.txt"
        }))
        .await;

    let frames = client.frames_until_response(2).await;
    let result_event = frames
        .iter()
        .find(|f| f["type"] == "event" && f["event"]["type"] == "tool_result");
    assert_eq!(
        result_event.unwrap()["event"]["result"]["content"],
        "wrote notes.txt"
    );
    let response = frames.last().unwrap();
    assert_eq!(response["result"]["status"], "finished");
    assert_eq!(response["result"]["text"], "saved");
}

#[tokio::test]
async fn test_events_never_trail_the_prompt_response() {
    let model = MockModel::new().push_text("hello there");
    let mut client = spawn_server(Some(model), EngineConfig::default());

    client.send(request(1, "prompt", json!({"text": "hi"}))).await;
    let frames = client.frames_until_response(1).await;
    assert!(frames
        .iter()
        .any(|f| f["type"] == "event" && f["event"]["type"] == "content_part"));

    // Anything the turn emitted was flushed before its response; the very
    // next frame answers the next request.
    client.send(request(2, "cancel", Value::Null)).await;
    let next = client.next().await;
    assert_eq!(next["type"], "response");
    assert_eq!(next["id"], json!(2));
}

#[tokio::test]
async fn test_late_approval_answer_after_cancel_is_ignored() {
    let model = MockModel::new()
        .push_tool_call("c1", "peer_write", json!({"path": "notes.txt"}))
        .push_text("unreached");
    let mut client = spawn_server(Some(model), EngineConfig::default());

    client
        .send(request(
            1,
            "initialize",
            json!({
                "external_tools": [{
                    "name": "peer_write",
                    "description": "Write a file on the client side.",
                    "schema": {"type": "object"},
                    "capabilities": ["mutates-filesystem"]
                }]
            }),
        ))
        .await;
    client.next_non_event().await;

    client
        .send(request(2, "prompt", json!({"text": "write my notes"})))
        .await;
    let approval = client.next_non_event().await;
    assert_eq!(approval["method"], "approval_request");

    client.send(request(3, "cancel", Value::Null)).await;
    let cancelled = client.next_non_event().await;
    assert_eq!(cancelled["id"], json!(3));
    let resolution = client.next_non_event().await;
    assert_eq!(resolution["id"], json!(2));
    assert_eq!(resolution["result"]["status"], "cancelled");

    // The request died with the turn; answering it now produces no frame
    // and the session keeps serving.
    client
        .send(json!({
            "type": "response",
            "id": approval["id"],
            "response": "approve"
        }))
        .await;
    client.send(request(4, "cancel", Value::Null)).await;
    let next = client.next().await;
    assert_eq!(next["id"], json!(4));
    assert_eq!(next["error"]["code"], "no-turn-in-progress");
}

#[tokio::test]
async fn test_context_carries_across_prompts() {
    let model = MockModel::new().push_text("one").push_text("two");
    let mut client = spawn_server(Some(model), EngineConfig::default());

    client.send(request(1, "prompt", json!({"text": "first"}))).await;
    let frames = client.frames_until_response(1).await;
    assert_eq!(frames.last().unwrap()["result"]["text"], "one");

    client.send(request(2, "prompt", json!({"text": "second"}))).await;
    let frames = client.frames_until_response(2).await;
    assert_eq!(frames.last().unwrap()["result"]["text"], "two");
}
