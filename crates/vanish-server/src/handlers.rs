use std::net::SocketAddr;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    lifecycle::Phase,
    store::Ciphertext,
    vault::{ControlAction, NewRecord, RecordView},
    AppState, VaultError,
};

// ── IP extraction ────────────────────────────────────────────────────────────

fn extract_ip(headers: &HeaderMap, addr: &SocketAddr, trust_forwarded: bool) -> String {
    if trust_forwarded {
        if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = xff.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_owned();
                }
            }
        }
        if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            let trimmed = real_ip.trim();
            if !trimmed.is_empty() {
                return trimmed.to_owned();
            }
        }
    }
    addr.ip().to_string()
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Response {
    match state.vault.store().count() {
        Ok(records) => Json(json!({"status": "ok", "records": records})).into_response(),
        Err(e) => vault_error(e),
    }
}

// ── Create ────────────────────────────────────────────────────────────────────

/// Blobs arrive base64-encoded; the server only checks they decode.
#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub text_blob: String,
    pub secret_blob: Option<String>,
    pub section_count: u32,
    pub expire_days: Option<u32>,
    pub max_views: Option<u32>,
    pub delete_after_days: Option<u32>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub id: String,
}

pub async fn create_link(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(b)) => b,
        Err(rejection) => return bad_json(rejection),
    };
    let text_blob = match decode_blob("text_blob", &body.text_blob) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let secret_blob = match body.secret_blob.as_deref().map(|s| decode_blob("secret_blob", s)) {
        Some(Ok(b)) => Some(b),
        Some(Err(resp)) => return resp,
        None => None,
    };

    let new = NewRecord {
        text_blob,
        secret_blob,
        section_count: body.section_count,
        expire_days: body.expire_days,
        max_views: body.max_views,
        delete_after_days: body.delete_after_days,
        password: body.password,
    };

    let vault = state.vault.clone();
    match tokio::task::spawn_blocking(move || vault.create(new)).await {
        Ok(Ok(id)) => (
            StatusCode::CREATED,
            Json(CreateResponse { id: id.to_string() }),
        )
            .into_response(),
        Ok(Err(e)) => vault_error(e),
        Err(e) => internal_error(e),
    }
}

fn decode_blob(field: &str, value: &str) -> Result<Vec<u8>, Response> {
    STANDARD.decode(value).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("{field} is not valid base64")})),
        )
            .into_response()
    })
}

// ── View ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ViewRequest {
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ViewResponse {
    pub id: String,
    pub phase: Phase,
    pub text_blob: Option<String>,
    pub secret_blob: Option<String>,
    pub masked: bool,
    pub last_view: bool,
    pub section_count: u32,
    pub current_views: u32,
    pub max_views: u32,
    pub created_at: i64,
    pub secrets_expire_at: i64,
    pub secrets_expired_at: Option<i64>,
    pub delete_at: Option<i64>,
    pub killed_at: Option<i64>,
}

impl From<RecordView> for ViewResponse {
    fn from(v: RecordView) -> Self {
        let b64 = |c: &Ciphertext| STANDARD.encode(c.as_bytes());
        Self {
            id: v.id.to_string(),
            phase: v.phase,
            text_blob: v.text_blob.as_ref().map(b64),
            secret_blob: v.secret_blob.as_ref().map(b64),
            masked: v.masked,
            last_view: v.last_view,
            section_count: v.section_count,
            current_views: v.current_views,
            max_views: v.max_views,
            created_at: v.created_at,
            secrets_expire_at: v.secrets_expire_at,
            secrets_expired_at: v.secrets_expired_at,
            delete_at: v.delete_at,
            killed_at: v.killed_at,
        }
    }
}

pub async fn view_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
) -> Response {
    let ip = extract_ip(&headers, &addr, state.trust_forwarded);
    view(state, id, None, ip).await
}

pub async fn view_link_with_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
    body: Result<Json<ViewRequest>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(b)) => b,
        Err(rejection) => return bad_json(rejection),
    };
    let ip = extract_ip(&headers, &addr, state.trust_forwarded);
    view(state, id, body.password, ip).await
}

async fn view(state: AppState, id: String, password: Option<String>, ip: String) -> Response {
    let vault = state.vault.clone();
    let res = tokio::task::spawn_blocking(move || vault.view(&id, password.as_deref(), &ip)).await;
    match res {
        Ok(Ok(view)) => Json(ViewResponse::from(view)).into_response(),
        Ok(Err(e)) => vault_error(e),
        Err(e) => internal_error(e),
    }
}

// ── Manual control ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub uuid: String,
    /// Defaults to `expire`.
    pub action: Option<ControlAction>,
}

pub async fn control_link(
    State(state): State<AppState>,
    body: Result<Json<ControlRequest>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(b)) => b,
        Err(rejection) => return bad_json(rejection),
    };
    let action = body.action.unwrap_or(ControlAction::Expire);
    let vault = state.vault.clone();
    let uuid = body.uuid;
    match tokio::task::spawn_blocking(move || vault.control(&uuid, action)).await {
        Ok(Ok(outcome)) => Json(json!({"ok": true, "outcome": outcome})).into_response(),
        Ok(Err(e)) => vault_error(e),
        Err(e) => internal_error(e),
    }
}

// ── Sweep ────────────────────────────────────────────────────────────────────

pub async fn sweep(State(state): State<AppState>) -> Response {
    let vault = state.vault.clone();
    match tokio::task::spawn_blocking(move || vault.sweep()).await {
        Ok(Ok(report)) => {
            info!(moved = report.trashed, "manual sweep");
            Json(json!({
                "moved": report.trashed,
                "scanned": report.scanned,
                "expired": report.expired,
                "failed": report.failed,
            }))
            .into_response()
        }
        Ok(Err(e)) => vault_error(e),
        Err(e) => internal_error(e),
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

fn vault_error(e: VaultError) -> Response {
    let (status, body) = match e {
        VaultError::NotFound => (
            StatusCode::NOT_FOUND,
            json!({"error": "not found or expired", "phase": "not_found"}),
        ),
        VaultError::AuthRequired => (
            StatusCode::UNAUTHORIZED,
            json!({"error": "password required"}),
        ),
        VaultError::AuthFailed => (StatusCode::FORBIDDEN, json!({"error": "wrong password"})),
        VaultError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, json!({"error": msg})),
        VaultError::Conflict => (
            StatusCode::CONFLICT,
            json!({"error": "conflict, please retry"}),
        ),
        VaultError::Storage(msg) => return internal_error(msg),
    };
    (status, Json(body)).into_response()
}

/// Malformed, mistyped or out-of-range request bodies are plain invalid input.
fn bad_json(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": rejection.body_text()})),
    )
        .into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}
