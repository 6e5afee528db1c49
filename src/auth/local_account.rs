//! Usage: Discover an existing upstream CLI login as an import candidate.

use crate::domain::accounts::{AuthSecrets, PROVIDER_CODEX};
use crate::shared::error::{AppError, AppResult};
use chrono::Utc;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::id_token::decode_email_and_account_id;

#[derive(Debug, Default, Deserialize)]
struct AuthFile {
    #[serde(default)]
    tokens: AuthFileTokens,
}

#[derive(Debug, Default, Deserialize)]
struct AuthFileTokens {
    #[serde(default)]
    id_token: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    account_id: String,
}

/// Candidate materialized from the CLI's own credential file; becomes an
/// `AddAccount` payload on import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAccount {
    pub id: String,
    pub email: String,
    pub secrets: AuthSecrets,
}

pub fn load_local_account(path: &Path) -> AppResult<LocalAccount> {
    let data = fs::read(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            AppError::not_found("codex auth file not found")
        } else {
            AppError::internal(format!("read codex auth file: {err}"))
        }
    })?;
    let auth: AuthFile = serde_json::from_slice(&data)
        .map_err(|err| AppError::validation(format!("decode codex auth file: {err}")))?;

    let access_token = auth.tokens.access_token.trim().to_string();
    if access_token.is_empty() {
        return Err(AppError::validation(
            "codex auth file does not contain access_token",
        ));
    }

    let (email, token_account_id) = decode_email_and_account_id(&auth.tokens.id_token);
    let account_id = first_non_empty(&auth.tokens.account_id, &token_account_id);

    Ok(LocalAccount {
        id: build_codex_account_id(&email, &account_id),
        email,
        secrets: AuthSecrets {
            access_token,
            refresh_token: auth.tokens.refresh_token.trim().to_string(),
            id_token: auth.tokens.id_token.trim().to_string(),
            account_id,
            access_expires_at: None,
            refresh_expires_at: None,
        },
    })
}

/// Canonical account id: lowercased email, then provider-side account id,
/// then a UTC timestamp so imports never collide on an empty identity.
pub fn build_codex_account_id(email: &str, account_id: &str) -> String {
    build_account_id(PROVIDER_CODEX, email, account_id)
}

pub fn build_account_id(provider: &str, email: &str, account_id: &str) -> String {
    let email = email.trim();
    if !email.is_empty() {
        return format!("{provider}:{}", email.to_lowercase());
    }
    let account_id = account_id.trim();
    if !account_id.is_empty() {
        return format!("{provider}:{account_id}");
    }
    format!("{provider}:{}", Utc::now().format("%Y%m%d%H%M%S"))
}

fn first_non_empty(a: &str, b: &str) -> String {
    let a = a.trim();
    if !a.is_empty() {
        return a.to_string();
    }
    b.trim().to_string()
}
