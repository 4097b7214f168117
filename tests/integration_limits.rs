//! Resource limits and frame-size boundaries over a real connection.

use std::net::SocketAddr;
use std::time::Duration;

use mcp_serve::protocol::{codec, ErrorCode, Message, RequestId, ResponseBody};
use mcp_serve::registry::ToolRegistry;
use mcp_serve::server::{McpServer, ServerConfig};
use mcp_serve::tasks::EngineConfig;
use mcp_serve::tools;
use mcp_serve::transport::{FrameTransport, TcpFrameTransport, TransportConfig};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

async fn start_server(config: ServerConfig) -> (SocketAddr, watch::Sender<bool>, JoinHandle<()>) {
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
    let frame = tokio::time::timeout(Duration::from_secs(3), client.receive())
        .await
        .expect("frame within deadline")
        .expect("transport healthy");
    codec::decode(&frame).expect("well-formed frame from server")
}

async fn active_client(addr: SocketAddr, transport: TransportConfig) -> TcpFrameTransport {
    let mut client = TcpFrameTransport::connect(addr, transport).await.unwrap();
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
async fn second_concurrent_task_hits_the_resource_limit() {
    let mut config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    config.session.engine = EngineConfig {
        max_pending_tasks: 1,
        ..Default::default()
    };
    let (addr, shutdown, server) = start_server(config).await;
    let mut client = active_client(addr, TransportConfig::default()).await;

    // First call occupies the single task slot
    send(
        &mut client,
        &Message::request(
            RequestId::from("first"),
            "tools/call",
            Some(json!({
                "name": "long_running_task",
                "arguments": {"duration_ms": 10_000, "steps": 100}
            })),
        ),
    )
    .await;

    // Second call is refused synchronously
    send(
        &mut client,
        &Message::request(
            RequestId::from("second"),
            "tools/call",
            Some(json!({"name": "echo", "arguments": {"message": "x"}})),
        ),
    )
    .await;
    match recv(&mut client).await {
        Message::Response {
            id,
            body: ResponseBody::Error(error),
        } => {
            assert_eq!(id, Some(RequestId::from("second")));
            assert_eq!(error.code, ErrorCode::ResourceLimit.code());
        }
        other => panic!("expected resource-limit, got {:?}", other),
    }

    // Cancelling the first frees the slot and yields its terminal
    send(
        &mut client,
        &Message::Notification {
            method: "notifications/cancelled".to_string(),
            params: Some(json!({"requestId": "first"})),
        },
    )
    .await;
    match recv(&mut client).await {
        Message::Response {
            id,
            body: ResponseBody::Error(error),
        } => {
            assert_eq!(id, Some(RequestId::from("first")));
            assert_eq!(error.code, ErrorCode::Cancelled.code());
        }
        other => panic!("expected cancelled terminal, got {:?}", other),
    }

    // The slot is usable again
    send(
        &mut client,
        &Message::request(
            RequestId::from("third"),
            "tools/call",
            Some(json!({"name": "echo", "arguments": {"message": "again"}})),
        ),
    )
    .await;
    match recv(&mut client).await {
        Message::Response {
            id,
            body: ResponseBody::Result(_),
        } => assert_eq!(id, Some(RequestId::from("third"))),
        other => panic!("expected echo result, got {:?}", other),
    }

    shutdown.send(true).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn oversized_inbound_frame_drops_the_connection() {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        transport: TransportConfig {
            max_message_size: 256,
            ..Default::default()
        },
        ..Default::default()
    };
    let (addr, shutdown, server) = start_server(config).await;

    // The client side allows larger frames than the server accepts
    let client_transport = TransportConfig {
        max_message_size: 8192,
        receive_timeout_ms: 1000,
        ..Default::default()
    };
    let mut client = TcpFrameTransport::connect(addr, client_transport)
        .await
        .unwrap();

    // An oversized frame: the server reports the violation, then discards
    // the connection because the stream cannot be resynchronized
    let padding = "x".repeat(400);
    let oversized = format!(
        r#"{{"jsonrpc":"2.0","id":"big","method":"ping","params":{{"pad":"{}"}}}}"#,
        padding
    );
    client.send(oversized.as_bytes()).await.unwrap();

    match recv(&mut client).await {
        Message::Response {
            id,
            body: ResponseBody::Error(error),
        } => {
            assert_eq!(id, None);
            assert_eq!(error.code, ErrorCode::MessageTooLarge.code());
        }
        other => panic!("expected message-too-large, got {:?}", other),
    }

    // Nothing more arrives on the poisoned stream
    let outcome = client.receive().await;
    assert!(outcome.is_err(), "connection must be discarded after the report");

    // A fresh connection still works
    let mut fresh = active_client(addr, TransportConfig::default()).await;
    send(
        &mut fresh,
        &Message::request(RequestId::from("ok"), "ping", None),
    )
    .await;
    assert!(matches!(
        recv(&mut fresh).await,
        Message::Response {
            body: ResponseBody::Result(_),
            ..
        }
    ));

    shutdown.send(true).unwrap();
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn requests_during_shutdown_are_refused() {
    let mut config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    config.session.shutdown_grace = Duration::from_secs(3);

    // A tool that holds its worker long enough for the drain window to be
    // observable; cancellation is only noticed once it returns
    let registry = ToolRegistry::new();
    tools::register_builtins(&registry).unwrap();
    registry
        .register(mcp_serve::registry::Tool::sync(
            "nap",
            "hold a worker for a moment",
            serde_json::Value::Null,
            |_| {
                std::thread::sleep(Duration::from_millis(1200));
                Ok(mcp_serve::protocol::CallToolResult::text("rested"))
            },
        ))
        .unwrap();

    let server = McpServer::new(config, registry);
    let listener = server.bind_listener().await.unwrap();
    let addr = listener.local_addr();
    let shutdown = server.shutdown_handle();
    let server = tokio::spawn(async move {
        server.serve_on(listener).await.unwrap();
    });
    let mut client = active_client(addr, TransportConfig::default()).await;

    send(
        &mut client,
        &Message::request(
            RequestId::from("slow"),
            "tools/call",
            Some(json!({"name": "nap"})),
        ),
    )
    .await;
    // Let a worker pick the nap up before requesting shutdown
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The draining session refuses anything new with an invalid-state
    // error, and the napping task surfaces as cancelled once it returns
    send(
        &mut client,
        &Message::request(RequestId::from("late"), "ping", None),
    )
    .await;

    let mut saw_cancelled = false;
    let mut saw_refusal = false;
    for _ in 0..2 {
        match recv(&mut client).await {
            Message::Response {
                id,
                body: ResponseBody::Error(error),
            } => {
                if id == Some(RequestId::from("slow")) {
                    assert_eq!(error.code, ErrorCode::Cancelled.code());
                    saw_cancelled = true;
                } else if id == Some(RequestId::from("late")) {
                    assert_eq!(error.code, ErrorCode::InvalidState.code());
                    saw_refusal = true;
                }
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
    assert!(saw_cancelled && saw_refusal);

    server.await.unwrap();
}
