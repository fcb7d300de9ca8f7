//! Integration tests for the playback HTTP API
//!
//! Each test writes CSV fixtures into a temporary data directory, builds an
//! independent `PlaybackService`, and drives the router with `oneshot`.

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use fastscan_backend::{create_router, PlaybackService, ServerConfig};

const RAW_TS: [u64; 4] = [1000, 1100, 1100, 1400];

/// Four rows; row 0 carries the anomaly example on the up book.
fn write_book_csv(dir: &Path, name: &str) {
    let mut header = vec!["timestamp_ms".to_string()];
    for side in ["bid", "ask"] {
        for level in 1..=5 {
            header.push(format!("up_{}_{}_price", side, level));
            header.push(format!("up_{}_{}_size", side, level));
        }
    }
    header.push("lag".to_string());

    let bid_sizes = ["10", "20", "30", "nan", "15"];
    let ask_sizes = ["5", "8", "nan", "12", "9"];
    let mut csv = header.join(",") + "\n";
    for (i, ts) in RAW_TS.iter().enumerate() {
        let mut cells = vec![ts.to_string()];
        for level in 0..5 {
            cells.push(format!("0.{}", 50 - level));
            cells.push(bid_sizes[level].to_string());
        }
        for level in 0..5 {
            cells.push(format!("0.{}", 51 + level));
            cells.push(ask_sizes[level].to_string());
        }
        cells.push(format!("{}", i * 10));
        csv.push_str(&cells.join(","));
        csv.push('\n');
    }
    std::fs::write(dir.join(name), csv).unwrap();
}

fn setup() -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    write_book_csv(dir.path(), "b.csv");
    write_book_csv(dir.path(), "a.csv");
    std::fs::write(dir.path().join("notes.txt"), "not a dataset").unwrap();

    let config = ServerConfig {
        data_dir: dir.path().to_path_buf(),
        cache_capacity: 200,
        min_cache_capacity: 100,
        buffer_size: 10,
        ..ServerConfig::default()
    };
    let app = create_router(Arc::new(PlaybackService::new(&config)));
    (dir, app)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    headers: &[(header::HeaderName, &str)],
) -> (StatusCode, HeaderMap, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, _, body) = send(app, Method::GET, uri, None, &[]).await;
    (status, body)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let (status, _, body) = send(app, Method::POST, uri, Some(body), &[]).await;
    (status, body)
}

// =============================================================================
// DATASETS
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (_dir, app) = setup();
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["datasets_loaded"], 0);
    assert_eq!(body["active_sessions"], 0);

    post(&app, "/api/sessions", json!({"filename": "a.csv"})).await;
    let (_, body) = get(&app, "/health").await;
    assert_eq!(body["datasets_loaded"], 1);
    assert_eq!(body["active_sessions"], 1);
}

#[tokio::test]
async fn test_list_and_info() {
    let (_dir, app) = setup();

    let (status, body) = get(&app, "/api/datasets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"], json!(["a.csv", "b.csv"]));

    let (status, info) = get(&app, "/api/datasets/a.csv").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["rows"], 4);
    assert_eq!(info["columns"], 22);
    assert_eq!(info["duration_ms"], 400.0);
    assert_eq!(info["fingerprint"].as_str().map(str::len), Some(64));
}

#[tokio::test]
async fn test_dataset_errors() {
    let (_dir, app) = setup();
    assert_eq!(get(&app, "/api/datasets/missing.csv").await.0, StatusCode::NOT_FOUND);
    let (status, body) = get(&app, "/api/datasets/notes.txt").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid dataset name"));
}

#[tokio::test]
async fn test_timeline_etag() {
    let (_dir, app) = setup();

    let (status, headers, body) =
        send(&app, Method::GET, "/api/datasets/a.csv/timeline", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["offsets"], json!([0.0, 100.0, 100.0, 400.0]));
    let etag = headers[header::ETAG].to_str().unwrap().to_string();

    let (status, _, _) = send(
        &app,
        Method::GET,
        "/api/datasets/a.csv/timeline",
        None,
        &[(header::IF_NONE_MATCH, etag.as_str())],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_resolve() {
    let (_dir, app) = setup();
    for (v, row) in [(250.0, 2), (0.0, 0), (1000.0, 3), (-5.0, 0)] {
        let (status, body) = get(
            &app,
            &format!("/api/datasets/a.csv/resolve?virtual_time_ms={}", v),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["row"], row, "virtual time {}", v);
    }
}

#[tokio::test]
async fn test_row_payload() {
    let (_dir, app) = setup();

    let (status, trace) = get(&app, "/api/datasets/a.csv/rows/0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trace["row_idx"], 0);
    assert_eq!(
        trace["up"]["bids"]["colors"],
        json!(["normal", "normal", "anomalous", "normal", "normal"])
    );
    assert_eq!(trace["up"]["bids"]["y"][0], "0.50");
    assert_eq!(trace["up"]["bids"]["x"][0], -10.0);
    assert_eq!(trace["up"]["bids"]["text"][2], "$30");
    assert_eq!(trace["up"]["asks"]["x"][2], 0.0);
    assert_eq!(trace["up"]["pressure"]["classification"], "BUYERS");
    assert_eq!(trace["down"]["bids"]["y"][0], "N/A");
    assert_eq!(trace["markers"]["up_ask_price"], json!({"x": [0], "y": [0.51]}));
    assert_eq!(trace["markers"]["binance_price"], json!({"x": [], "y": []}));

    assert_eq!(get(&app, "/api/datasets/a.csv/rows/4").await.0, StatusCode::NOT_FOUND);
}

// =============================================================================
// CHUNKS / PREFETCH / BUFFER
// =============================================================================

#[tokio::test]
async fn test_chunk_protocol() {
    let (_dir, app) = setup();

    let (status, body) = post(
        &app,
        "/api/datasets/a.csv/chunk",
        json!({"start_row": 2, "count": 500, "reset": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["start_row"], 2);
    assert_eq!(body["reset"], true);
    assert_eq!(body["batch"][1]["row_idx"], 3);

    let (_, body) = post(
        &app,
        "/api/datasets/a.csv/chunk",
        json!({"start_row": 10, "count": 5, "reset": false}),
    )
    .await;
    assert_eq!(body["count"], 0);
    assert_eq!(body["batch"], json!([]));

    let (status, _) = post(
        &app,
        "/api/datasets/a.csv/chunk",
        json!({"start_row": 0, "count": 0, "reset": false}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_prefetch_and_buffer() {
    let (_dir, app) = setup();

    let (status, body) = post(
        &app,
        "/api/datasets/a.csv/prefetch",
        json!({"current_row": 1, "speed": 2.0}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["horizon"], 20);
    assert_eq!(body["newly_cached"], 3);
    assert_eq!(body["next_due_in_ms"], 200);

    let (_, status_body) = get(&app, "/api/buffer/status?filename=a.csv&current_row=2").await;
    assert_eq!(status_body["ahead"], 2);
    assert_eq!(status_body["cached_frames"], 3);

    let (status, _) = post(
        &app,
        "/api/datasets/a.csv/prefetch",
        json!({"current_row": 0, "speed": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, settings) =
        send(&app, Method::PUT, "/api/buffer", Some(json!({"size": 100})), &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings, json!({"size": 100, "capacity": 400}));

    let (status, _, _) = send(&app, Method::DELETE, "/api/buffer", None, &[]).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, status_body) = get(&app, "/api/buffer/status?filename=a.csv").await;
    assert_eq!(status_body["cached_frames"], 0);
}

// =============================================================================
// SESSIONS
// =============================================================================

#[tokio::test]
async fn test_session_commands() {
    let (_dir, app) = setup();

    let (status, session) = post(&app, "/api/sessions", json!({"filename": "a.csv"})).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = session["id"].as_str().unwrap().to_string();
    assert_eq!(session["state"]["is_playing"], false);
    let command_uri = format!("/api/sessions/{}/command", id);

    let (status, _) = post(&app, &command_uri, json!({"command": "seek", "row": 2})).await;
    assert_eq!(status, StatusCode::OK);
    // Slow enough that the 400ms fixture cannot finish during the test.
    let (status, _) = post(&app, &command_uri, json!({"command": "set_speed", "speed": 0.001})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, sample) = post(&app, &command_uri, json!({"command": "play"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sample["session"]["state"]["is_playing"], true);
    assert_eq!(sample["session"]["state"]["play_start_row"], 2);

    let (status, body) = post(&app, &command_uri, json!({"command": "play"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());
    assert_eq!(
        post(&app, &command_uri, json!({"command": "seek", "row": 0})).await.0,
        StatusCode::CONFLICT
    );
    assert_eq!(
        post(&app, &command_uri, json!({"command": "set_speed", "speed": 0})).await.0,
        StatusCode::BAD_REQUEST
    );

    let (status, sample) = get(&app, &format!("/api/sessions/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(sample["row"].as_u64().unwrap() >= 2);

    let (status, _) = post(&app, &command_uri, json!({"command": "pause"})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, switched) = send(
        &app,
        Method::PUT,
        &format!("/api/sessions/{}/dataset", id),
        Some(json!({"filename": "b.csv"})),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(switched["dataset_id"], "b.csv");
    assert_eq!(switched["state"]["play_start_row"], 0);

    let (status, _, _) =
        send(&app, Method::DELETE, &format!("/api/sessions/{}", id), None, &[]).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(get(&app, &format!("/api/sessions/{}", id)).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_play_after_end_restarts_without_sampling() {
    let (_dir, app) = setup();
    let (_, session) = post(&app, "/api/sessions", json!({"filename": "a.csv"})).await;
    let command_uri = format!("/api/sessions/{}/command", session["id"].as_str().unwrap());

    // 400ms of data at 10_000x is exhausted within a millisecond.
    let (status, _) =
        post(&app, &command_uri, json!({"command": "set_speed", "speed": 10000})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(&app, &command_uri, json!({"command": "play"})).await;
    assert_eq!(status, StatusCode::OK);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let (status, sample) = post(&app, &command_uri, json!({"command": "play"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sample["row"], 0);
    assert_eq!(sample["session"]["state"]["is_playing"], true);
    assert_eq!(sample["session"]["state"]["play_start_row"], 0);
}

#[tokio::test]
async fn test_session_requires_dataset() {
    let (_dir, app) = setup();
    let (status, _) = post(&app, "/api/sessions", json!({"filename": "nope.csv"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(get(&app, "/api/sessions/garbage").await.0, StatusCode::NOT_FOUND);
}

// =============================================================================
// SYNC
// =============================================================================

#[tokio::test]
async fn test_sync_publish_and_latest() {
    let (_dir, app) = setup();

    let (_, empty) = get(&app, "/api/sync/latest").await;
    assert_eq!(empty["status"], "Not Synced");
    assert_eq!(empty["message"], Value::Null);

    let now = chrono::Utc::now().timestamp_millis();
    let (status, body) = post(
        &app,
        "/api/sync/publish",
        json!({"value": 3, "filename": "a.csv", "timestamp": now}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);

    let (_, body) = post(
        &app,
        "/api/sync/publish",
        json!({"value": 1, "filename": "a.csv", "timestamp": now - 10_000}),
    )
    .await;
    assert_eq!(body["accepted"], false);

    let (_, latest) = get(&app, "/api/sync/latest").await;
    assert_eq!(latest["message"]["value"], 3);
    assert_eq!(latest["status"], "Synced");

    let (status, _) = post(
        &app,
        "/api/sync/publish",
        json!({"value": 1, "filename": "../x.csv", "timestamp": now}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sync_views() {
    let (_dir, app) = setup();
    post(&app, "/api/sync/views", json!({"view": "orderbook", "open": true})).await;
    post(&app, "/api/sync/views", json!({"view": "btc", "open": false})).await;

    let (status, views) = get(&app, "/api/sync/views").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(views[0]["view"], "btc");
    assert_eq!(views[1]["open"], true);

    let (status, _) = post(&app, "/api/sync/views", json!({"view": " ", "open": true})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
