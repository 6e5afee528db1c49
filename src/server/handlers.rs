//! Usage: JSON/HTTP handlers; pure dispatch into manager, OAuth engine,
//! importer and daemon controller.

use crate::auth::local_account::load_local_account;
use crate::core::manager::AddAccountInput;
use crate::domain::accounts::{AuthSecrets, QuotaSnapshot, RoutingStrategy, PROVIDER_CODEX};
use crate::oauth::service::render_callback_html;
use crate::shared::error::{AppError, AppResult, ErrorKind};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use super::AppState;

pub async fn health() -> Response {
    json_ok(StatusCode::OK, &json!({"status": "ok"}))
}

pub async fn status(State(state): State<AppState>) -> Response {
    match state.manager.status().await {
        Ok(snapshot) => json_ok(StatusCode::OK, &snapshot),
        Err(err) => error_response(&err),
    }
}

pub async fn list_accounts(State(state): State<AppState>) -> Response {
    match state.manager.list_accounts().await {
        Ok(accounts) => json_ok(StatusCode::OK, &json!({"accounts": accounts})),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Default, Deserialize)]
struct AddAccountRequest {
    #[serde(default)]
    id: String,
    #[serde(default)]
    provider: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    id_token: String,
    #[serde(default)]
    account_id: String,
    #[serde(default)]
    access_expires_at: String,
    #[serde(default)]
    refresh_expires_at: String,
}

pub async fn add_account(State(state): State<AppState>, body: Bytes) -> Response {
    let req: AddAccountRequest = match decode_body(&body, false) {
        Ok(req) => req,
        Err(err) => return error_response(&err),
    };

    let access_expires_at = match parse_optional_time(&req.access_expires_at) {
        Ok(value) => value,
        Err(err) => {
            return error_response(&AppError::validation(format!(
                "invalid access_expires_at: {err}"
            )));
        }
    };
    let refresh_expires_at = match parse_optional_time(&req.refresh_expires_at) {
        Ok(value) => value,
        Err(err) => {
            return error_response(&AppError::validation(format!(
                "invalid refresh_expires_at: {err}"
            )));
        }
    };

    let input = AddAccountInput {
        id: req.id,
        provider: req.provider,
        email: req.email,
        secrets: AuthSecrets {
            access_token: req.access_token,
            refresh_token: req.refresh_token,
            id_token: req.id_token,
            account_id: req.account_id,
            access_expires_at,
            refresh_expires_at,
        },
    };
    match state.manager.add_account(input).await {
        Ok(account) => json_ok(StatusCode::CREATED, &account),
        Err(err) => error_response(&err),
    }
}

pub async fn activate_account(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.set_active_account(&id).await {
        Ok(()) => json_ok(StatusCode::OK, &json!({"status": "ok"})),
        Err(err) => error_response(&err),
    }
}

pub async fn update_quota(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let quota: QuotaSnapshot = match decode_body(&body, false) {
        Ok(quota) => quota,
        Err(err) => return error_response(&err),
    };
    match state.manager.update_quota(&id, quota).await {
        Ok(()) => json_ok(StatusCode::OK, &json!({"status": "ok"})),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Default, Deserialize)]
struct StrategyRequest {
    #[serde(default)]
    strategy: String,
}

pub async fn set_strategy(State(state): State<AppState>, body: Bytes) -> Response {
    let req: StrategyRequest = match decode_body(&body, false) {
        Ok(req) => req,
        Err(err) => return error_response(&err),
    };
    let Some(strategy) = RoutingStrategy::parse(&req.strategy) else {
        return error_response(&AppError::validation(format!(
            "invalid strategy: {}",
            req.strategy
        )));
    };
    match state.manager.set_strategy(strategy).await {
        Ok(()) => json_ok(StatusCode::OK, &json!({"status": "ok"})),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Default, Deserialize)]
struct QuotaSyncRequest {
    #[serde(default)]
    account_id: String,
}

pub async fn sync_quota(State(state): State<AppState>, body: Bytes) -> Response {
    let req: QuotaSyncRequest = match decode_body(&body, true) {
        Ok(req) => req,
        Err(err) => return error_response(&err),
    };
    match state.manager.sync_quota(&req.account_id).await {
        Ok(result) => json_ok(StatusCode::OK, &result),
        Err(err) => error_response(&err),
    }
}

pub async fn sync_all_quotas(State(state): State<AppState>) -> Response {
    match state.manager.sync_all_quotas().await {
        Ok(result) => json_ok(StatusCode::OK, &result),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Default, Deserialize)]
struct SwitchRequest {
    #[serde(default)]
    status_code: i64,
    #[serde(default)]
    error_message: String,
}

pub async fn switch_on_error(State(state): State<AppState>, body: Bytes) -> Response {
    let req: SwitchRequest = match decode_body(&body, false) {
        Ok(req) => req,
        Err(err) => return error_response(&err),
    };

    // A switch must complete atomically even if the caller goes away, so it
    // runs detached from this request's cancellation.
    let manager = state.manager.clone();
    let joined = tokio::spawn(async move {
        manager
            .handle_quota_error(req.status_code, &req.error_message)
            .await
    })
    .await;

    match joined {
        Ok(Ok(decision)) => json_ok(StatusCode::OK, &decision),
        Ok(Err(err)) => error_response(&err),
        Err(err) => error_response(&AppError::internal(format!("switch task failed: {err}"))),
    }
}

#[derive(Debug, Serialize)]
struct ImportCandidateView {
    id: String,
    provider: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    email: String,
    account_id_present: bool,
}

#[derive(Debug, Serialize)]
struct ImportCandidateResponse {
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate: Option<ImportCandidateView>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    already_exists: bool,
}

pub async fn import_candidate(State(state): State<AppState>) -> Response {
    let candidate = match load_local_account(&state.codex_auth_file) {
        Ok(candidate) => candidate,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return json_ok(
                StatusCode::OK,
                &ImportCandidateResponse {
                    found: false,
                    candidate: None,
                    already_exists: false,
                },
            );
        }
        Err(err) => {
            return error_response(&AppError::validation(format!(
                "discover codex auth candidate: {err}"
            )));
        }
    };

    let accounts = match state.manager.list_accounts().await {
        Ok(accounts) => accounts,
        Err(err) => return error_response(&err),
    };
    let already_exists = accounts.iter().any(|a| a.id == candidate.id);

    json_ok(
        StatusCode::OK,
        &ImportCandidateResponse {
            found: true,
            candidate: Some(ImportCandidateView {
                id: candidate.id,
                provider: PROVIDER_CODEX,
                email: candidate.email,
                account_id_present: !candidate.secrets.account_id.is_empty(),
            }),
            already_exists,
        },
    )
}

#[derive(Debug, Default, Deserialize)]
struct ImportRequest {
    overwrite_existing: Option<bool>,
}

pub async fn import_codex(State(state): State<AppState>, body: Bytes) -> Response {
    let req: ImportRequest = match decode_body(&body, true) {
        Ok(req) => req,
        Err(err) => return error_response(&err),
    };
    let overwrite_existing = req.overwrite_existing.unwrap_or(true);

    let candidate = match load_local_account(&state.codex_auth_file) {
        Ok(candidate) => candidate,
        Err(err) if err.kind() == ErrorKind::NotFound => return error_response(&err),
        Err(err) => {
            return error_response(&AppError::validation(format!("import codex auth: {err}")));
        }
    };

    let accounts = match state.manager.list_accounts().await {
        Ok(accounts) => accounts,
        Err(err) => return error_response(&err),
    };
    let exists = accounts.iter().any(|a| a.id == candidate.id);
    if exists && !overwrite_existing {
        return error_response(&AppError::conflict("account already exists"));
    }

    let added = state
        .manager
        .add_account(AddAccountInput {
            id: candidate.id,
            provider: PROVIDER_CODEX.to_string(),
            email: candidate.email,
            secrets: candidate.secrets,
        })
        .await;
    match added {
        Ok(account) => json_ok(
            StatusCode::OK,
            &json!({
                "status": "ok",
                "action": if exists { "updated" } else { "created" },
                "account": account,
            }),
        ),
        Err(err) => error_response(&err),
    }
}

pub async fn oauth_providers(State(state): State<AppState>) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return oauth_unconfigured();
    };
    json_ok(StatusCode::OK, &json!({"providers": oauth.providers()}))
}

#[derive(Debug, Default, Deserialize)]
struct OAuthStartRequest {
    #[serde(default)]
    provider: String,
}

pub async fn oauth_start(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return oauth_unconfigured();
    };
    let req: OAuthStartRequest = match decode_body(&body, false) {
        Ok(req) => req,
        Err(err) => return error_response(&err),
    };
    match oauth.start(&req.provider) {
        Ok(snapshot) => json_ok(StatusCode::CREATED, &snapshot),
        Err(err) => error_response(&err),
    }
}

pub async fn oauth_status(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return oauth_unconfigured();
    };
    let state_param = query
        .get("state")
        .map(|s| s.trim())
        .unwrap_or_default();
    if state_param.is_empty() {
        return error_response(&AppError::validation("missing state"));
    }
    match oauth.status(state_param) {
        Ok(snapshot) => json_ok(StatusCode::OK, &snapshot),
        Err(err) => error_response(&err),
    }
}

pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(oauth) = state.oauth.as_ref() else {
        return oauth_unconfigured();
    };
    let outcome = oauth.handle_callback(&query).await;
    Html(render_callback_html(&outcome)).into_response()
}

pub async fn daemon_info(State(state): State<AppState>) -> Response {
    let Some(daemon) = state.daemon.as_ref() else {
        return daemon_unconfigured();
    };
    json_ok(StatusCode::OK, &daemon.info())
}

pub async fn daemon_shutdown(State(state): State<AppState>) -> Response {
    let Some(daemon) = state.daemon.as_ref() else {
        return daemon_unconfigured();
    };
    match daemon.shutdown() {
        Ok(()) => json_ok(StatusCode::OK, &json!({"status": "shutting_down"})),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RestartRequest {
    #[serde(default)]
    start_cmd: String,
}

pub async fn daemon_restart(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(daemon) = state.daemon.as_ref() else {
        return daemon_unconfigured();
    };
    let req: RestartRequest = match decode_body(&body, true) {
        Ok(req) => req,
        Err(err) => return error_response(&err),
    };
    match daemon.restart(req.start_cmd.trim()) {
        Ok(()) => json_ok(StatusCode::OK, &json!({"status": "restarting"})),
        Err(err) => error_response(&err),
    }
}

pub async fn not_found() -> Response {
    error_response(&AppError::not_found("not found"))
}

fn oauth_unconfigured() -> Response {
    error_response(&AppError::unavailable("oauth service not configured"))
}

fn daemon_unconfigured() -> Response {
    error_response(&AppError::unavailable("daemon control not configured"))
}

fn json_ok<T: Serialize>(status: StatusCode, payload: &T) -> Response {
    (status, Json(serde_json::to_value(payload).unwrap_or_default())).into_response()
}

pub fn error_response(err: &AppError) -> Response {
    let status = match err.kind() {
        ErrorKind::Validation
        | ErrorKind::Upstream
        | ErrorKind::NeedReauth
        | ErrorKind::PersistSecrets
        | ErrorKind::PersistState => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": err.to_string()}))).into_response()
}

/// Some endpoints accept an absent body as an all-defaults request.
fn decode_body<T>(body: &Bytes, allow_empty: bool) -> AppResult<T>
where
    T: DeserializeOwned + Default,
{
    if body.is_empty() {
        if allow_empty {
            return Ok(T::default());
        }
        return Err(AppError::validation("request body is required"));
    }
    serde_json::from_slice(body)
        .map_err(|err| AppError::validation(format!("invalid request body: {err}")))
}

fn parse_optional_time(raw: &str) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc),
    ))
}
