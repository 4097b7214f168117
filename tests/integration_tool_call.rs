//! Tool listing and invocation over a real loopback connection.

use std::net::SocketAddr;
use std::time::Duration;

use mcp_serve::protocol::{codec, ErrorCode, Message, RequestId, ResponseBody};
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
    let frame = tokio::time::timeout(Duration::from_secs(3), client.receive())
        .await
        .expect("frame within deadline")
        .expect("transport healthy");
    codec::decode(&frame).expect("well-formed frame from server")
}

/// Connect and complete the initialization handshake
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
async fn tools_list_serves_the_registry() {
    let (addr, shutdown, server) = start_server().await;
    let mut client = active_client(addr).await;

    send(
        &mut client,
        &Message::request(RequestId::from("l"), "tools/list", None),
    )
    .await;
    match recv(&mut client).await {
        Message::Response {
            body: ResponseBody::Result(value),
            ..
        } => {
            let names: Vec<_> = value["tools"]
                .as_array()
                .unwrap()
                .iter()
                .map(|t| t["name"].as_str().unwrap())
                .collect();
            assert_eq!(
                names,
                vec!["echo", "system_info", "long_running_task", "network_scan"]
            );
            // Schemas travel with the descriptors
            assert!(value["tools"][0]["inputSchema"].is_object());
            assert!(value.get("nextCursor").is_none());
        }
        other => panic!("expected tool list, got {:?}", other),
    }

    shutdown.send(true).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn echo_tool_round_trip() {
    let (addr, shutdown, server) = start_server().await;
    let mut client = active_client(addr).await;

    client
        .send(
            br#"{"jsonrpc":"2.0","id":"3","method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#,
        )
        .await
        .unwrap();
    match recv(&mut client).await {
        Message::Response {
            id,
            body: ResponseBody::Result(value),
        } => {
            assert_eq!(id, Some(RequestId::from("3")));
            assert_eq!(value["content"][0]["type"], "text");
            assert!(value["content"][0]["text"].as_str().unwrap().contains("hi"));
            assert!(value.get("isError").is_none());
        }
        other => panic!("expected echo result, got {:?}", other),
    }

    shutdown.send(true).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn unknown_tool_is_refused() {
    let (addr, shutdown, server) = start_server().await;
    let mut client = active_client(addr).await;

    send(
        &mut client,
        &Message::request(
            RequestId::from("x"),
            "tools/call",
            Some(json!({"name": "no_such_tool"})),
        ),
    )
    .await;
    match recv(&mut client).await {
        Message::Response {
            body: ResponseBody::Error(error),
            ..
        } => assert_eq!(error.code, ErrorCode::MethodNotFound.code()),
        other => panic!("expected refusal, got {:?}", other),
    }

    shutdown.send(true).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn tool_application_errors_stay_in_band() {
    let (addr, shutdown, server) = start_server().await;
    let mut client = active_client(addr).await;

    // echo without its required argument: an application error, not a
    // protocol error
    send(
        &mut client,
        &Message::request(
            RequestId::from("e"),
            "tools/call",
            Some(json!({"name": "echo", "arguments": {}})),
        ),
    )
    .await;
    match recv(&mut client).await {
        Message::Response {
            body: ResponseBody::Result(value),
            ..
        } => {
            assert_eq!(value["isError"], true);
            assert!(value["content"][0]["text"]
                .as_str()
                .unwrap()
                .contains("message"));
        }
        other => panic!("expected in-band tool failure, got {:?}", other),
    }

    shutdown.send(true).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn malformed_call_params_are_invalid_params() {
    let (addr, shutdown, server) = start_server().await;
    let mut client = active_client(addr).await;

    // `name` has the wrong type entirely
    send(
        &mut client,
        &Message::request(
            RequestId::from("m"),
            "tools/call",
            Some(json!({"name": 42})),
        ),
    )
    .await;
    match recv(&mut client).await {
        Message::Response {
            body: ResponseBody::Error(error),
            ..
        } => assert_eq!(error.code, ErrorCode::InvalidParams.code()),
        other => panic!("expected invalid-params, got {:?}", other),
    }

    shutdown.send(true).unwrap();
    server.await.unwrap();
}
