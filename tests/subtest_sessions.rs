//! End-to-end sessions against a real listener: WebSocket upgrade, both
//! subtest directions, and path/subprotocol negotiation.
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::{net::{TcpListener, TcpStream}, sync::broadcast};
use tokio_tungstenite::{
    client_async,
    tungstenite::{client::IntoClientRequest, Message},
};

use fathom::{
    config::FathomConfig,
    memoryless,
    server::Fathom,
    subtest::Timing,
    utils::leak,
};

fn short_timing() -> Timing {
    Timing {
        default_runtime: Duration::from_millis(300),
        max_runtime: Duration::from_secs(2),
        sampling: memoryless::Config {
            min: Duration::from_millis(10),
            expected: Duration::from_millis(50),
            max: Duration::from_millis(100),
        },
    }
}

async fn spawn_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = leak(broadcast::channel::<()>(1).0);
    let fathom = leak(Fathom::new(FathomConfig::default(), stop).with_timing(short_timing()));
    tokio::spawn(fathom.serve(listener));
    addr
}

#[tokio::test]
async fn upload_session_runs_to_completion() {
    let addr = spawn_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut ws, _) = client_async(format!("ws://{addr}/ndt/v7/upload"), stream)
        .await
        .unwrap();

    ws.send(Message::text("{\"ElapsedTime\":42}")).await.unwrap();
    ws.send(Message::Binary(Bytes::from(vec![0u8; 1 << 13])))
        .await
        .unwrap();

    // Keep pumping so probes get echoed; count server measurements.
    let mut server_measurements = 0;
    let mut closed = false;
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) => {
                let parsed: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert!(parsed.get("ElapsedTime").is_some());
                let uuid = parsed["ConnectionInfo"]["UUID"].as_str().unwrap();
                assert!(!uuid.is_empty());
                server_measurements += 1;
            }
            Message::Close(_) => {
                closed = true;
                break;
            }
            _ => {}
        }
    }
    assert!(closed, "server should close the session");
    assert!(server_measurements >= 2, "got {server_measurements}");
}

#[tokio::test]
async fn download_session_carries_bulk_load() {
    let addr = spawn_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut ws, _) = client_async(format!("ws://{addr}/ndt/v7/download"), stream)
        .await
        .unwrap();

    let mut bulk_bytes = 0usize;
    let mut server_measurements = 0;
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Binary(payload) => bulk_bytes += payload.len(),
            Message::Text(_) => server_measurements += 1,
            Message::Close(_) => break,
            _ => {}
        }
    }
    assert!(bulk_bytes > 0, "download produced no load");
    assert!(server_measurements >= 2, "got {server_measurements}");
}

#[tokio::test]
async fn unknown_path_is_refused() {
    let addr = spawn_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let result = client_async(format!("ws://{addr}/ndt/v8/download"), stream).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn offered_subprotocol_is_echoed() {
    let addr = spawn_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut request = format!("ws://{addr}/ndt/v7/upload")
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        "net.measurementlab.ndt.v7".parse().unwrap(),
    );
    let (_, response) = client_async(request, stream).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok()),
        Some("net.measurementlab.ndt.v7")
    );
}
