//! End-to-end tests against a local WebSocket gateway.

use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use gateway_link::{
    Client, ConnectionState, DiscoveredDevice, Error, Request, RequestOptions, Update,
};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Fake gateway
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Starts a gateway on a random port and returns its URL.
async fn spawn_gateway() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream));
        }
    });

    Ok(format!("ws://{addr}"))
}

/// Answers requests by command name.
async fn serve(stream: TcpStream) -> Result<()> {
    let mut ws = accept_async(stream).await?;

    while let Some(frame) = ws.next().await {
        let WsMessage::Text(text) = frame? else {
            continue;
        };
        let request: Value = serde_json::from_str(text.as_str())?;
        let id = request["id"].clone();

        match request["command"].as_str().unwrap_or_default() {
            "echo" => {
                reply(&mut ws, json!({ "id": id, "type": "RESP", "error": null, "results": request["params"] })).await?;
            }
            "fail" => {
                let error = json!({ "eid": 7, "errmsg": "device busy" });
                reply(&mut ws, json!({ "id": id, "type": "RESP", "error": error, "results": {} })).await?;
            }
            "scan.start" => {
                let found = json!({ "address": "c0:ff:ee:00:00:01", "name": "thermo", "rssi": -51 });
                reply(&mut ws, json!({ "id": id, "type": "UPDATE", "update": "scanResult", "results": found })).await?;
                reply(&mut ws, json!({ "id": id, "type": "RESP", "error": null, "results": {} })).await?;
            }
            "notify" => {
                let change = json!({ "address": "aa", "service": "180f", "characteristic": "2a19", "value": "63" });
                reply(&mut ws, json!({ "id": 0, "type": "UPDATE", "update": "characteristicChanged", "results": change })).await?;
                reply(&mut ws, json!({ "id": id, "type": "RESP", "error": null, "results": {} })).await?;
            }
            "drop" => {
                ws.close(None).await?;
                return Ok(());
            }
            _ => {}
        }
    }

    Ok(())
}

async fn reply(ws: &mut WebSocketStream<TcpStream>, value: Value) -> Result<()> {
    ws.send(WsMessage::Text(value.to_string().into())).await?;
    Ok(())
}

/// Returns a URL nothing is listening on.
async fn unused_url() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("ws://{addr}"))
}

fn fast_client() -> Result<Client> {
    Ok(Client::builder()
        .backoff_step(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(50))
        .connect_timeout(Duration::from_secs(2))
        .request_timeout(Duration::from_secs(5))
        .build()?)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_request_round_trip() -> Result<()> {
    init_tracing();
    let url = spawn_gateway().await?;
    let client = fast_client()?;

    client.connect(&url, false).await?;
    assert_eq!(client.state(), ConnectionState::Connected);

    let reply = client
        .request(Request::new("echo").param("value", "5a").param("count", 2))
        .await?
        .into_result()?;

    assert_eq!(reply, json!({ "value": "5a", "count": 2 }));
    assert_eq!(client.pending_count(), 0);

    client.teardown();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests() -> Result<()> {
    init_tracing();
    let url = spawn_gateway().await?;
    let client = fast_client()?;
    client.connect(&url, false).await?;

    let calls = (0..16).map(|n| {
        let client = client.clone();
        async move { client.request(Request::new("echo").param("n", n)).await }
    });
    let replies = futures_util::future::join_all(calls).await;

    for (n, reply) in replies.into_iter().enumerate() {
        assert_eq!(reply?.get_u64("n"), n as u64);
    }
    Ok(())
}

#[tokio::test]
async fn test_gateway_error_maps_to_remote() -> Result<()> {
    init_tracing();
    let url = spawn_gateway().await?;
    let client = fast_client()?;
    client.connect(&url, false).await?;

    let err = client
        .request(Request::new("fail"))
        .await?
        .into_result()
        .expect_err("gateway reported an error");

    match err {
        Error::Remote { eid, errmsg } => {
            assert_eq!(eid, 7);
            assert_eq!(errmsg, "device busy");
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_scan_results_and_notifications() -> Result<()> {
    init_tracing();
    let url = spawn_gateway().await?;
    let client = fast_client()?;
    client.connect(&url, false).await?;

    let (device_tx, mut devices) = mpsc::unbounded_channel();
    let _devices = client.on_device_discovered(move |device: &DiscoveredDevice| {
        let _ = device_tx.send(device.clone());
    });
    let (note_tx, mut notes) = mpsc::unbounded_channel();
    let _notes = client.on_notification(move |update: &Update| {
        let _ = note_tx.send(update.update.clone());
    });

    let options = RequestOptions::new().with_resolve_if(|m| m.as_response().is_some());
    client
        .issue_request(Request::new("scan.start"), options)
        .await?
        .expect("not quiet");

    let device = devices.recv().await.expect("device discovered");
    assert_eq!(device.address, "c0:ff:ee:00:00:01");
    assert_eq!(device.name.as_deref(), Some("thermo"));
    assert_eq!(device.rssi, Some(-51));

    client.request(Request::new("notify")).await?;
    assert_eq!(notes.recv().await.as_deref(), Some("characteristicChanged"));
    Ok(())
}

#[tokio::test]
async fn test_silent_gateway_times_out() -> Result<()> {
    init_tracing();
    let url = spawn_gateway().await?;
    let client = fast_client()?;
    client.connect(&url, false).await?;

    let err = client
        .issue_request(
            Request::new("ignored"),
            RequestOptions::new().with_timeout(Duration::from_millis(100)),
        )
        .await
        .expect_err("no answer");

    assert!(err.is_timeout());
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_reconnects_after_gateway_drop() -> Result<()> {
    init_tracing();
    let url = spawn_gateway().await?;
    let client = fast_client()?;

    let (connect_tx, mut connects) = mpsc::unbounded_channel();
    let _connects = client.on_connect(move |url: &String| {
        let _ = connect_tx.send(url.clone());
    });

    client.connect(&url, true).await?;
    connects.recv().await.expect("first connect");

    let err = client
        .request(Request::new("drop"))
        .await
        .expect_err("connection dropped");
    assert!(matches!(err, Error::ConnectionClosed));

    timeout(Duration::from_secs(5), connects.recv())
        .await?
        .expect("reconnected");
    assert_eq!(client.state(), ConnectionState::Connected);

    let reply = client.request(Request::new("echo").param("again", true)).await?;
    assert!(reply.get_bool("again"));

    client.teardown();
    Ok(())
}

#[tokio::test]
async fn test_unreachable_gateway_gives_up() -> Result<()> {
    init_tracing();
    let url = unused_url().await?;
    let client = fast_client()?;

    let err = client
        .connect(&url, 1u32)
        .await
        .expect_err("nothing listening");

    assert!(matches!(err, Error::ConnectFailed { attempts: 2, .. }));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_rejects_non_websocket_url() -> Result<()> {
    let client = fast_client()?;
    let err = client
        .connect("http://127.0.0.1:1", false)
        .await
        .expect_err("wrong scheme");

    assert!(matches!(err, Error::InvalidUrl { .. }));
    Ok(())
}
