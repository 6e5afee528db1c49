//! Usage: Browser login session engine (authorization-code + PKCE flow).

use crate::auth::id_token::decode_email_and_account_id;
use crate::auth::local_account::build_account_id;
use crate::core::manager::{AddAccountInput, Manager};
use crate::domain::accounts::AuthSecrets;
use crate::shared::error::{AppError, AppResult, ErrorKind};
use crate::shared::mutex_ext::MutexExt;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::pkce::{code_challenge_s256, generate_code_verifier, generate_state};
use super::providers::{default_providers, ProviderConfig};
use super::token_exchange::{exchange_authorization_code, TokenExchangeRequest};

const SESSION_LIFETIME_MINS: i64 = 10;
const SESSION_EXPIRED_MESSAGE: &str = "oauth session expired";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Success,
    Error,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: String,
    pub provider: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub auth_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub account_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub expires_at: DateTime<Utc>,
}

struct Session {
    snapshot: SessionSnapshot,
    code_verifier: String,
}

/// Outcome rendered into the browser tab that completed the redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub success: bool,
    pub message: String,
}

impl CallbackOutcome {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Session table lives behind its own lock, independent of the manager
/// mutex. The callback path drops the lock across the token exchange and
/// re-checks the session afterwards.
pub struct OAuthService {
    manager: Arc<Manager>,
    client: reqwest::Client,
    base_url: String,
    providers: HashMap<String, ProviderConfig>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl OAuthService {
    pub fn new(manager: Arc<Manager>, client: reqwest::Client, base_url: &str) -> Self {
        Self::with_providers(manager, client, base_url, default_providers())
    }

    pub fn with_providers(
        manager: Arc<Manager>,
        client: reqwest::Client,
        base_url: &str,
        providers: Vec<ProviderConfig>,
    ) -> Self {
        Self {
            manager,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            providers: providers
                .into_iter()
                .map(|cfg| (cfg.provider.clone(), cfg))
                .collect(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn providers(&self) -> Vec<String> {
        let mut out: Vec<String> = self.providers.keys().cloned().collect();
        out.sort();
        out
    }

    /// Resolved redirect URIs of every configured provider; the daemon binds
    /// sibling listeners for those that point at dedicated ports.
    pub fn redirect_uris(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .providers
            .values()
            .map(|cfg| self.resolve_redirect_uri(cfg))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    fn resolve_redirect_uri(&self, cfg: &ProviderConfig) -> String {
        let pinned = cfg.redirect_uri.trim();
        if pinned.is_empty() {
            format!("{}/auth/callback", self.base_url)
        } else {
            pinned.to_string()
        }
    }

    pub fn start(&self, provider: &str) -> AppResult<SessionSnapshot> {
        let key = provider.trim().to_lowercase();
        let cfg = self
            .providers
            .get(&key)
            .ok_or_else(|| AppError::validation(format!("unsupported provider: {provider}")))?;

        let state = generate_state();
        let code_verifier = generate_code_verifier();
        let challenge = code_challenge_s256(&code_verifier);
        let redirect_uri = self.resolve_redirect_uri(cfg);

        let mut auth_url = reqwest::Url::parse(&cfg.auth_url)
            .map_err(|err| AppError::internal(format!("invalid auth url for {key}: {err}")))?;
        {
            let mut query = auth_url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &cfg.client_id);
            query.append_pair("redirect_uri", &redirect_uri);
            query.append_pair("scope", &cfg.scopes.join(" "));
            query.append_pair("state", &state);
            query.append_pair("code_challenge", &challenge);
            query.append_pair("code_challenge_method", "S256");
            for (name, value) in &cfg.extra_auth_params {
                query.append_pair(name, value);
            }
        }

        let snapshot = SessionSnapshot {
            state: state.clone(),
            provider: cfg.provider.clone(),
            status: SessionStatus::Pending,
            auth_url: auth_url.to_string(),
            account_id: String::new(),
            error: String::new(),
            expires_at: Utc::now() + Duration::minutes(SESSION_LIFETIME_MINS),
        };
        self.sessions.lock_or_recover().insert(
            state,
            Session {
                snapshot: snapshot.clone(),
                code_verifier,
            },
        );
        Ok(snapshot)
    }

    pub fn status(&self, state: &str) -> AppResult<SessionSnapshot> {
        let mut sessions = self.sessions.lock_or_recover();
        let session = sessions
            .get_mut(state)
            .ok_or_else(|| AppError::not_found("state not found"))?;

        if session.snapshot.status == SessionStatus::Pending
            && Utc::now() > session.snapshot.expires_at
        {
            session.snapshot.status = SessionStatus::Expired;
            session.snapshot.error = SESSION_EXPIRED_MESSAGE.to_string();
        }
        Ok(session.snapshot.clone())
    }

    pub async fn handle_callback(&self, query: &HashMap<String, String>) -> CallbackOutcome {
        let state = query.get("state").map(String::as_str).unwrap_or_default();
        if state.is_empty() {
            return CallbackOutcome::failure("missing state");
        }

        // Snapshot what the exchange needs, then release the session lock
        // before touching the network.
        let (cfg, code_verifier) = {
            let mut sessions = self.sessions.lock_or_recover();
            let Some(session) = sessions.get_mut(state) else {
                return CallbackOutcome::failure("unknown state");
            };
            let Some(cfg) = self.providers.get(&session.snapshot.provider).cloned() else {
                session.snapshot.status = SessionStatus::Error;
                session.snapshot.error = "provider config missing".to_string();
                return CallbackOutcome::failure("provider config missing");
            };
            if Utc::now() > session.snapshot.expires_at {
                session.snapshot.status = SessionStatus::Expired;
                session.snapshot.error = SESSION_EXPIRED_MESSAGE.to_string();
                return CallbackOutcome::failure(SESSION_EXPIRED_MESSAGE);
            }
            (cfg, session.code_verifier.clone())
        };

        if let Some(provider_error) = query.get("error").filter(|v| !v.is_empty()) {
            let message = format!("oauth error: {provider_error}");
            self.fail_session(state, &message);
            return CallbackOutcome::failure(message);
        }

        let code = query.get("code").map(String::as_str).unwrap_or_default();
        if code.is_empty() {
            self.fail_session(state, "missing authorization code");
            return CallbackOutcome::failure("missing authorization code");
        }

        let tokens = match exchange_authorization_code(
            &self.client,
            &TokenExchangeRequest {
                token_url: cfg.token_url.clone(),
                client_id: cfg.client_id.clone(),
                code: code.to_string(),
                redirect_uri: self.resolve_redirect_uri(&cfg),
                code_verifier,
            },
        )
        .await
        {
            Ok(tokens) => tokens,
            Err(err) => {
                tracing::warn!(
                    provider = %cfg.provider,
                    "oauth callback token exchange failed: {err}"
                );
                self.fail_session(state, &err.to_string());
                return CallbackOutcome::failure(err.to_string());
            }
        };

        let (email, token_account_id) = decode_email_and_account_id(&tokens.id_token);
        let account_id = build_account_id(&cfg.provider, &email, &token_account_id);

        let added = self
            .manager
            .add_account(AddAccountInput {
                id: account_id.clone(),
                provider: cfg.provider.clone(),
                email: email.clone(),
                secrets: AuthSecrets {
                    access_token: tokens.access_token,
                    refresh_token: tokens.refresh_token,
                    id_token: tokens.id_token,
                    account_id: token_account_id,
                    access_expires_at: Some(tokens.access_expires_at),
                    refresh_expires_at: tokens.refresh_expires_at,
                },
            })
            .await;

        match added {
            Ok(account) => {
                if self.complete_session(state, &account.id) {
                    CallbackOutcome {
                        success: true,
                        message: "Login succeeded. You can close this tab.".to_string(),
                    }
                } else {
                    // The session expired while the exchange was in flight;
                    // the account itself was stored.
                    CallbackOutcome::failure(SESSION_EXPIRED_MESSAGE)
                }
            }
            Err(err) => {
                let (message, stage) = classify_add_account_error(&err);
                tracing::warn!(
                    provider = %cfg.provider,
                    account_id = %account_id,
                    stage,
                    "oauth callback add-account failed: {err}"
                );
                self.fail_session(state, &message);
                CallbackOutcome::failure(message)
            }
        }
    }

    fn fail_session(&self, state: &str, message: &str) {
        let mut sessions = self.sessions.lock_or_recover();
        if let Some(session) = sessions.get_mut(state) {
            if session.snapshot.status == SessionStatus::Pending {
                session.snapshot.status = SessionStatus::Error;
                session.snapshot.error = message.to_string();
            }
        }
    }

    fn complete_session(&self, state: &str, account_id: &str) -> bool {
        let mut sessions = self.sessions.lock_or_recover();
        match sessions.get_mut(state) {
            Some(session) if session.snapshot.status == SessionStatus::Pending => {
                session.snapshot.status = SessionStatus::Success;
                session.snapshot.account_id = account_id.to_string();
                session.snapshot.error = String::new();
                true
            }
            _ => false,
        }
    }
}

fn classify_add_account_error(err: &AppError) -> (String, &'static str) {
    match err.kind() {
        ErrorKind::PersistSecrets => (
            "failed to store OAuth credentials locally".to_string(),
            "secret_persist",
        ),
        ErrorKind::PersistState => (
            "failed to persist account metadata locally".to_string(),
            "state_persist",
        ),
        _ => (err.to_string(), "unknown"),
    }
}

/// Minimal page shown in the tab that finished the browser redirect.
pub fn render_callback_html(outcome: &CallbackOutcome) -> String {
    let (title, color) = if outcome.success {
        ("Login successful", "#166534")
    } else {
        ("Login failed", "#b91c1c")
    };
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">\
         <title>codex-account-hub OAuth</title></head>\
         <body style=\"font-family:Segoe UI,Arial,sans-serif;padding:24px;\">\
         <h2 style=\"color:{color}\">{title}</h2><p>{}</p></body></html>",
        html_escape(&outcome.message)
    )
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
