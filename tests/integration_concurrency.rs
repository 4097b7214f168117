//! Interleaving guarantees across concurrent tasks on one session.
//!
//! Responses and progress from distinct tasks may interleave freely, but per
//! request id the wire must show zero or more progress notifications followed
//! by exactly one terminal response, with nothing after it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use mcp_serve::protocol::{codec, Message, RequestId, ResponseBody};
use mcp_serve::registry::ToolRegistry;
use mcp_serve::server::{McpServer, ServerConfig};
use mcp_serve::tools;
use mcp_serve::transport::{FrameTransport, TcpFrameTransport, TransportConfig};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

async fn start_server() -> (SocketAddr, watch::Sender<bool>, JoinHandle<()>) {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    let registry = ToolRegistry::new();
    tools::register_builtins(&registry).unwrap();
    let server = McpServer::new(config, registry);
    let listener = server.bind_listener().await.unwrap();
    let addr = listener.local_addr();
    let shutdown = server.shutdown_handle();
    let handle = tokio::spawn(async move {
        server.serve_on(listener).await.unwrap();
    });
    (addr, shutdown, handle)
}

async fn send(client: &mut TcpFrameTransport, message: &Message) {
    client.send(&codec::encode(message)).await.unwrap();
}

async fn recv(client: &mut TcpFrameTransport) -> Message {
    let frame = tokio::time::timeout(Duration::from_secs(5), client.receive())
        .await
        .expect("frame within deadline")
        .expect("transport healthy");
    codec::decode(&frame).expect("well-formed frame from server")
}

async fn active_client(addr: SocketAddr) -> TcpFrameTransport {
    let mut client = TcpFrameTransport::connect(addr, TransportConfig::default())
        .await
        .unwrap();
    send(
        &mut client,
        &Message::request(
            RequestId::from("init"),
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "clientInfo": {"name": "t", "version": "0"},
                "capabilities": {}
            })),
        ),
    )
    .await;
    let _ = recv(&mut client).await;
    send(
        &mut client,
        &Message::Notification {
            method: "notifications/initialized".to_string(),
            params: None,
        },
    )
    .await;
    client
}

#[tokio::test]
async fn concurrent_tasks_interleave_but_keep_per_id_order() {
    let (addr, shutdown, server) = start_server().await;
    let mut client = active_client(addr).await;

    // Two slow calls with distinct progress tokens plus one fast call,
    // all in flight together
    send(
        &mut client,
        &Message::request(
            RequestId::from("a"),
            "tools/call",
            Some(json!({
                "name": "long_running_task",
                "arguments": {"duration_ms": 400, "steps": 4},
                "_meta": {"progressToken": "tok-a"}
            })),
        ),
    )
    .await;
    send(
        &mut client,
        &Message::request(
            RequestId::from("b"),
            "tools/call",
            Some(json!({
                "name": "long_running_task",
                "arguments": {"duration_ms": 400, "steps": 4},
                "_meta": {"progressToken": "tok-b"}
            })),
        ),
    )
    .await;
    send(
        &mut client,
        &Message::request(
            RequestId::from("c"),
            "tools/call",
            Some(json!({"name": "echo", "arguments": {"message": "quick"}})),
        ),
    )
    .await;

    // Collect the whole conversation until all three terminals arrive
    let mut terminals: HashMap<String, usize> = HashMap::new();
    let mut last_progress: HashMap<String, u64> = HashMap::new();
    let mut progress_after_terminal = false;

    while terminals.len() < 3 {
        match recv(&mut client).await {
            Message::Notification { method, params } => {
                assert_eq!(method, "notifications/progress");
                let params = params.unwrap();
                let token = params["progressToken"].as_str().unwrap().to_string();
                let progress = params["progress"].as_u64().unwrap();

                // Progress is monotonically non-decreasing per token
                let previous = last_progress.entry(token.clone()).or_insert(0);
                assert!(progress >= *previous);
                *previous = progress;

                // tok-a progress belongs to request a, tok-b to b
                let owner = match token.as_str() {
                    "tok-a" => "a",
                    "tok-b" => "b",
                    other => panic!("unknown token {}", other),
                };
                if terminals.contains_key(owner) {
                    progress_after_terminal = true;
                }
            }
            Message::Response { id, body } => {
                let id = match id.unwrap() {
                    RequestId::Str(s) => s,
                    RequestId::Num(n) => n.to_string(),
                };
                assert!(
                    matches!(body, ResponseBody::Result(_)),
                    "all three calls succeed"
                );
                *terminals.entry(id).or_insert(0) += 1;
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    // Exactly one terminal per request id, none duplicated
    assert_eq!(terminals.get("a"), Some(&1));
    assert_eq!(terminals.get("b"), Some(&1));
    assert_eq!(terminals.get("c"), Some(&1));
    assert!(!progress_after_terminal, "no progress may follow a terminal");

    // Both slow tools ran their full span
    assert_eq!(last_progress.get("tok-a"), Some(&4));
    assert_eq!(last_progress.get("tok-b"), Some(&4));

    // The line is quiet once everything terminated
    let silence = tokio::time::timeout(Duration::from_millis(300), client.receive()).await;
    assert!(silence.is_err());

    shutdown.send(true).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn fast_tasks_can_overtake_slow_ones() {
    let (addr, shutdown, server) = start_server().await;
    let mut client = active_client(addr).await;

    // The slow call is submitted first but the quick echo, running on the
    // second worker, terminates before it
    send(
        &mut client,
        &Message::request(
            RequestId::from("slow"),
            "tools/call",
            Some(json!({
                "name": "long_running_task",
                "arguments": {"duration_ms": 600, "steps": 3}
            })),
        ),
    )
    .await;
    send(
        &mut client,
        &Message::request(
            RequestId::from("fast"),
            "tools/call",
            Some(json!({"name": "echo", "arguments": {"message": "overtake"}})),
        ),
    )
    .await;

    let first = recv(&mut client).await;
    match first {
        Message::Response { id, .. } => {
            assert_eq!(id, Some(RequestId::from("fast")));
        }
        other => panic!("expected the fast terminal first, got {:?}", other),
    }

    match recv(&mut client).await {
        Message::Response { id, .. } => assert_eq!(id, Some(RequestId::from("slow"))),
        other => panic!("expected the slow terminal, got {:?}", other),
    }

    shutdown.send(true).unwrap();
    server.await.unwrap();
}
