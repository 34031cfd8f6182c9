use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
};
use airshare_relay::{handle_socket, normalize_session_code};
use chrono::Utc;
use serde_json::json;
use std::path::{Component, PathBuf};
use tracing::{debug, warn};

use super::AppState;
use crate::mime::content_type_for;

const INDEX_FILE: &str = "index.html";

/// `/` doubles as the control endpoint: upgrade requests become relay
/// connections, plain requests get the front page
pub async fn serve_root(ws: Option<WebSocketUpgrade>, State(state): State<AppState>) -> Response {
    match ws {
        Some(ws) => {
            let relay = state.relay.clone();
            ws.on_upgrade(move |socket| handle_socket(socket, relay))
        }
        None => serve_index(&state).await,
    }
}

async fn serve_index(state: &AppState) -> Response {
    if let Some(dir) = &state.static_dir {
        if let Some(response) = read_asset(dir.join(INDEX_FILE), INDEX_FILE).await {
            return response;
        }
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("airshare relay {}\n", env!("CARGO_PKG_VERSION")),
    )
        .into_response()
}

pub async fn health(State(state): State<AppState>) -> Response {
    match state.relay.router.stats().await {
        Some(stats) => Json(json!({
            "status": "OK",
            "timestamp": Utc::now(),
            "activeSessions": stats.active_sessions,
            "connectedClients": stats.connected_clients,
        }))
        .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "Router stopped", "timestamp": Utc::now() })),
        )
            .into_response(),
    }
}

pub async fn session_info(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    let code = normalize_session_code(&id);
    match state.relay.router.session_info(&code).await {
        Some(info) => Json(json!({
            "sessionId": info.session_id,
            "clientCount": info.client_count,
            "created": info.created,
        }))
        .into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "Session not found" }))).into_response(),
    }
}

/// Anything else is looked up in the static directory
pub async fn serve_static(State(state): State<AppState>, uri: Uri) -> Response {
    let Some(dir) = &state.static_dir else {
        return not_found();
    };
    let Some(relative) = static_path(uri.path()) else {
        warn!("Rejected static path {}", uri.path());
        return not_found();
    };

    let name = relative
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(INDEX_FILE)
        .to_string();
    match read_asset(dir.join(relative), &name).await {
        Some(response) => response,
        None => not_found(),
    }
}

/// Sanitized path under the static root; `None` for anything that could escape it
pub fn static_path(request_path: &str) -> Option<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains('\\') || trimmed.contains('\0') {
        return None;
    }

    let mut path = PathBuf::new();
    for component in std::path::Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => path.push(part),
            _ => return None,
        }
    }
    Some(path)
}

async fn read_asset(path: PathBuf, name: &str) -> Option<Response> {
    match tokio::fs::read(&path).await {
        Ok(data) => Some(
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type_for(name))],
                Body::from(data),
            )
                .into_response(),
        ),
        Err(e) => {
            debug!("Static asset {} unavailable: {}", path.display(), e);
            None
        }
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

/// Every response is readable cross-origin
pub async fn cors(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, header::HeaderValue::from_static("*"));
    response
}
