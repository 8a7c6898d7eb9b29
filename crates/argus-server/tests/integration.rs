//! End-to-end integration tests using real HTTP and WebSocket clients.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use argus_server::{start, ServerConfig, ServerHandle};
use argus_store::Database;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a test server on a random port. Returns (base URL, ws URL, handle).
async fn boot_server() -> (String, String, ServerHandle) {
    let db = Database::in_memory().unwrap();
    let (event_tx, _) = broadcast::channel(1024);

    let config = ServerConfig {
        port: 0,
        ..Default::default()
    };
    let handle = start(config, db, event_tx).await.unwrap();

    let base = format!("http://127.0.0.1:{}", handle.port);
    let ws = format!("ws://127.0.0.1:{}/ws", handle.port);
    (base, ws, handle)
}

async fn connect_ws(url: &str) -> WsStream {
    let (stream, _) = connect_async(url).await.expect("ws connect failed");
    stream
}

/// Receive the next text frame and parse it, skipping control frames.
async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("ws error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Poll the hub diagnostics endpoint until it reports `expected` connections.
/// Registration happens after the upgrade response, so tests must not assume
/// a freshly-connected client is already in the registry.
async fn wait_for_connections(client: &reqwest::Client, base: &str, expected: u64) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let body: Value = client
            .get(format!("{base}/health/ws"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["connections"] == json!(expected) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "hub never reached {expected} connections, last: {}",
            body["connections"]
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn sample_event(request_id: &str, tool: &str) -> Value {
    json!({
        "request_id": request_id,
        "tool_name": tool,
        "duration_ms": 42,
        "status": "success",
        "input_tokens": 100,
        "output_tokens": 20
    })
}

const REQ_A: &str = "550e8400-e29b-41d4-a716-446655440000";
const REQ_B: &str = "550e8400-e29b-41d4-a716-446655440001";

#[tokio::test]
async fn ingest_persists_and_fans_out_envelope() {
    let (base, ws_url, _handle) = boot_server().await;
    let http = reqwest::Client::new();

    let mut viewer = connect_ws(&ws_url).await;
    wait_for_connections(&http, &base, 1).await;

    let resp = http
        .post(format!("{base}/api/v1/events"))
        .json(&sample_event(REQ_A, "read_file"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // The viewer receives the ingested event wrapped in the wire envelope.
    let frame = recv_json(&mut viewer).await;
    assert_eq!(frame["type"], "tool_call");
    assert_eq!(frame["data"]["request_id"], REQ_A);
    assert_eq!(frame["data"]["tool_name"], "read_file");
    assert_eq!(frame["data"]["duration_ms"], 42);
    assert_eq!(frame["data"]["status"], "success");
}

#[tokio::test]
async fn subscriber_disconnect_mid_stream_does_not_affect_others() {
    let (base, ws_url, _handle) = boot_server().await;
    let http = reqwest::Client::new();

    let mut viewer1 = connect_ws(&ws_url).await;
    let mut viewer2 = connect_ws(&ws_url).await;
    let mut viewer3 = connect_ws(&ws_url).await;
    wait_for_connections(&http, &base, 3).await;

    http.post(format!("{base}/api/v1/events"))
        .json(&sample_event(REQ_A, "first"))
        .send()
        .await
        .unwrap();

    assert_eq!(recv_json(&mut viewer1).await["data"]["tool_name"], "first");
    assert_eq!(recv_json(&mut viewer2).await["data"]["tool_name"], "first");
    assert_eq!(recv_json(&mut viewer3).await["data"]["tool_name"], "first");

    viewer2.close(None).await.unwrap();
    wait_for_connections(&http, &base, 2).await;

    http.post(format!("{base}/api/v1/events"))
        .json(&sample_event(REQ_B, "second"))
        .send()
        .await
        .unwrap();

    // Viewers 1 and 3 receive both messages in order; viewer 2 is gone.
    assert_eq!(recv_json(&mut viewer1).await["data"]["tool_name"], "second");
    assert_eq!(recv_json(&mut viewer3).await["data"]["tool_name"], "second");
}

#[tokio::test]
async fn ingest_validation_rejects_bad_events() {
    let (base, _ws_url, _handle) = boot_server().await;
    let http = reqwest::Client::new();
    let url = format!("{base}/api/v1/events");

    // Missing required fields
    let resp = http
        .post(&url)
        .json(&json!({"request_id": "", "tool_name": "", "status": "success"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // request_id is not a UUID
    let resp = http
        .post(&url)
        .json(&json!({"request_id": "nope", "tool_name": "bash", "status": "success"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "request_id must be a valid UUID");

    // Unknown status value
    let resp = http
        .post(&url)
        .json(&json!({"request_id": REQ_A, "tool_name": "bash", "status": "maybe"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Malformed body
    let resp = http
        .post(&url)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn metrics_reflect_ingested_events() {
    let (base, _ws_url, _handle) = boot_server().await;
    let http = reqwest::Client::new();
    let url = format!("{base}/api/v1/events");

    for (status, duration) in [
        ("success", 10),
        ("success", 20),
        ("success", 30),
        ("failed", 40),
    ] {
        let resp = http
            .post(&url)
            .json(&json!({
                "request_id": REQ_A,
                "tool_name": "bash",
                "duration_ms": duration,
                "status": status,
                "input_tokens": 100,
                "output_tokens": 50
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
    }

    let overview: Value = http
        .get(format!("{base}/api/v1/metrics/overview"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(overview["total_calls"], 4);
    assert_eq!(overview["avg_latency_ms"], 25.0);
    assert_eq!(overview["total_tokens"], 600);
    assert_eq!(overview["failure_rate"], 25.0);
    assert_eq!(overview["change_percent"], 0.0);

    let tool_calls: Value = http
        .get(format!("{base}/api/v1/metrics/tool-calls"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let points = tool_calls.as_array().unwrap();
    let success: i64 = points.iter().map(|p| p["success"].as_i64().unwrap()).sum();
    let failures: i64 = points.iter().map(|p| p["failures"].as_i64().unwrap()).sum();
    assert_eq!(success, 3);
    assert_eq!(failures, 1);

    let latency: Value = http
        .get(format!("{base}/api/v1/metrics/latency"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let points = latency.as_array().unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0]["tool"], "bash");
    assert_eq!(points[0]["p50"], 20.0);

    let tokens: Value = http
        .get(format!("{base}/api/v1/metrics/token-usage"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let points = tokens.as_array().unwrap();
    let input: i64 = points.iter().map(|p| p["input"].as_i64().unwrap()).sum();
    assert_eq!(input, 400);

    let failure_rate: Value = http
        .get(format!("{base}/api/v1/metrics/failure-rate"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let points = failure_rate.as_array().unwrap();
    assert!(points
        .iter()
        .all(|p| p.get("failurePercent").is_some()));
}

#[tokio::test]
async fn recent_and_chain_listings() {
    let (base, _ws_url, _handle) = boot_server().await;
    let http = reqwest::Client::new();
    let url = format!("{base}/api/v1/events");

    for tool in ["plan", "execute", "report"] {
        http.post(&url)
            .json(&sample_event(REQ_A, tool))
            .send()
            .await
            .unwrap();
    }
    http.post(&url)
        .json(&sample_event(REQ_B, "unrelated"))
        .send()
        .await
        .unwrap();

    let recent: Value = http
        .get(format!("{base}/api/v1/tool-calls/recent?limit=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let calls = recent.as_array().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0]["tool_name"], "unrelated");

    let chain: Value = http
        .get(format!("{base}/api/v1/tool-calls/chains/{REQ_A}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let calls = chain.as_array().unwrap();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0]["tool_name"], "plan");
    assert_eq!(calls[2]["tool_name"], "report");

    let resp = http
        .get(format!("{base}/api/v1/tool-calls/chains/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn hub_diagnostics_track_connections() {
    let (base, ws_url, _handle) = boot_server().await;
    let http = reqwest::Client::new();

    let _viewer1 = connect_ws(&ws_url).await;
    let mut viewer2 = connect_ws(&ws_url).await;
    wait_for_connections(&http, &base, 2).await;

    let body: Value = http
        .get(format!("{base}/health/ws"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "active");
    assert_eq!(body["endpoint"], "/ws");

    viewer2.close(None).await.unwrap();
    wait_for_connections(&http, &base, 1).await;
}

#[tokio::test]
async fn readiness_plain_text_for_load_balancers() {
    let (base, _ws_url, _handle) = boot_server().await;

    let resp = reqwest::get(format!("{base}/health/ready")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}
