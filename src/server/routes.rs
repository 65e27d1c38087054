//! Request handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use super::AppState;
use crate::naming::utc_timestamp;
use crate::session::SessionError;

/// Retry delay of the MJPEG stream while no frame is available.
const STREAM_RETRY: Duration = Duration::from_millis(50);

/// Delay between `/stop` answering and the server shutting down.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Live Annotator</title>
<style>
body { font-family: sans-serif; margin: 1em; }
#view { max-width: 100%; background: #222; }
#notes li { font-family: monospace; }
</style>
</head>
<body>
<img id="view" src="/stream.mjpg" alt="live stream">
<p><a href="/snap.jpg">snapshot</a> | <span id="status">...</span></p>
<p>
<button onclick="post('/start')">Start</button>
<input id="text" size="40" placeholder="annotation">
<button onclick="annotate()">Add</button>
<button onclick="post('/undo')">Undo</button>
<button onclick="post('/stop')">Stop</button>
</p>
<ol id="notes"></ol>
<script>
async function post(path, body) {
  const res = await fetch(path, {
    method: 'POST',
    headers: {'Content-Type': 'application/json'},
    body: JSON.stringify(body || {}),
  });
  refresh();
  return res.json();
}
function annotate() {
  const input = document.getElementById('text');
  post('/annotate', {text: input.value});
  input.value = '';
}
async function refresh() {
  const s = await (await fetch('/status')).json();
  document.getElementById('status').textContent =
    s.source + ' [' + s.grabber_status + '] ' + s.elapsed.toFixed(1) + 's' +
    (s.recording ? ' recording ' + s.recording_path : '');
  document.getElementById('notes').innerHTML = '';
  for (const a of s.annotations) {
    const li = document.createElement('li');
    li.textContent = a.t.toFixed(2) + '  ' + a.text;
    document.getElementById('notes').appendChild(li);
  }
}
document.getElementById('text').addEventListener('keydown', e => {
  if (e.key === 'Enter') annotate();
});
setInterval(refresh, 1000);
refresh();
</script>
</body>
</html>
"#;

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/snap.jpg", get(snapshot))
        .route("/stream.mjpg", get(stream))
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/annotate", post(annotate))
        .route("/undo", post(undo))
        .route("/stop", post(stop))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Encodes the latest frame off the async runtime.
async fn encode_latest(state: &Arc<AppState>, quality: u8) -> Option<Vec<u8>> {
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || state.source().latest_encoded_snapshot(quality))
        .await
        .ok()
        .flatten()
}

async fn snapshot(State(state): State<Arc<AppState>>) -> Response {
    let quality = state.config().server.snapshot_quality;
    match encode_latest(&state, quality).await {
        Some(jpeg) => (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, NO_CACHE),
            ],
            jpeg,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no frame yet").into_response(),
    }
}

async fn stream(State(state): State<Arc<AppState>>) -> Response {
    let interval = Duration::from_millis(state.config().server.stream_interval_ms);
    let quality = state.config().server.stream_quality;

    let parts = futures_util::stream::unfold((state, false), move |(state, sent)| async move {
        if sent {
            tokio::time::sleep(interval).await;
        }
        loop {
            if state.is_shutting_down() {
                return None;
            }
            match encode_latest(&state, quality).await {
                Some(jpeg) => {
                    let mut part = Vec::with_capacity(jpeg.len() + 64);
                    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
                    part.extend_from_slice(&jpeg);
                    part.extend_from_slice(b"\r\n");
                    return Some((Ok::<_, Infallible>(part), (state, true)));
                }
                None => tokio::time::sleep(STREAM_RETRY).await,
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame"),
            (header::CACHE_CONTROL, NO_CACHE),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let session = state.session().lock();
    Json(json!({
        "server_time": utc_timestamp(),
        "grabber_status": state.source().status(),
        "source": session.source(),
        "started_at": session.started_at(),
        "elapsed": session.elapsed(),
        "count": session.annotations().len(),
        "annotations": session.annotations(),
        "recording": session.is_recording(),
        "recording_path": session.recording_path().map(|p| p.display().to_string()),
    }))
}

async fn start(State(state): State<Arc<AppState>>) -> Response {
    match state.start_session() {
        Ok(()) => {
            let session = state.session().lock();
            Json(json!({
                "started_at": session.started_at(),
                "recording_path": session.recording_path().map(|p| p.display().to_string()),
            }))
            .into_response()
        }
        Err(e @ (SessionError::AlreadyStarted | SessionError::Ended)) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to start session");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Extracts `text` from a JSON body; anything unparsable counts as empty.
fn annotation_text(body: &[u8]) -> String {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("text") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        },
        _ => String::new(),
    }
}

async fn annotate(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let text = annotation_text(&body);
    let result = state.session().lock().add(&text);
    match result {
        Ok(annotation) => Json(annotation).into_response(),
        Err(SessionError::EmptyText) => error_response(StatusCode::BAD_REQUEST, "text is empty"),
        Err(e) => error_response(StatusCode::CONFLICT, e.to_string()),
    }
}

async fn undo(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.session().lock().undo())
}

async fn stop(State(state): State<Arc<AppState>>) -> Response {
    let finishing = Arc::clone(&state);
    let result = tokio::task::spawn_blocking(move || finishing.finish()).await;

    let response = match result {
        Ok(Ok(summary)) => Json(summary).into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed to write session record");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "Finalize task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "finalize failed")
        }
    };

    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        tracing::info!("Shutdown requested by /stop");
        state.request_shutdown();
    });
    response
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
