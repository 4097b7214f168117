//! Heartbeat probing and inactivity-driven shutdown.

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
async fn idle_sessions_receive_keepalive_probes() {
    let mut config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    config.session.heartbeat_interval = Duration::from_millis(300);
    config.session.session_timeout = Duration::from_secs(30);
    let (addr, shutdown, server) = start_server(config).await;
    let mut client = active_client(addr).await;

    // Say nothing and wait: the quiet link draws a log-level probe
    match recv(&mut client).await {
        Message::Notification { method, params } => {
            assert_eq!(method, "notifications/log");
            let params = params.unwrap();
            assert_eq!(params["level"], "info");
            assert_eq!(params["message"], "keepalive");
        }
        other => panic!("expected a keepalive probe, got {:?}", other),
    }

    // The session is still serving normally afterwards
    send(
        &mut client,
        &Message::request(RequestId::from("p"), "ping", None),
    )
    .await;
    loop {
        // Further probes may interleave before the reply
        match recv(&mut client).await {
            Message::Notification { .. } => continue,
            Message::Response {
                id,
                body: ResponseBody::Result(value),
            } => {
                assert_eq!(id, Some(RequestId::from("p")));
                assert_eq!(value["status"], "ok");
                break;
            }
            other => panic!("expected ping result, got {:?}", other),
        }
    }

    shutdown.send(true).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn silent_clients_are_disconnected_after_the_session_timeout() {
    let mut config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    // Probes disabled so the only traffic would have to come from the client
    config.session.heartbeat_interval = Duration::ZERO;
    config.session.session_timeout = Duration::from_millis(600);
    let (addr, shutdown, server) = start_server(config).await;
    let mut client = active_client(addr).await;

    // Stay silent past the timeout: the server shuts the session down and
    // releases the transport
    let outcome = tokio::time::timeout(Duration::from_secs(5), client.receive()).await;
    match outcome {
        Ok(Err(_)) => {}
        Ok(Ok(frame)) => panic!("expected the connection to close, got a frame: {:?}", frame),
        Err(_) => panic!("connection was not closed within the timeout"),
    }

    shutdown.send(true).unwrap();
    server.await.unwrap();
}
