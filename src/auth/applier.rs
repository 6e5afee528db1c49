//! Usage: Write the active account's tokens into the upstream CLI auth file.

use crate::domain::accounts::{Account, AuthSecrets, PROVIDER_CODEX};
use crate::shared::error::{AppError, AppResult};
use crate::store::state::{create_private_dir, write_private_atomic};
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;

pub trait CredentialApplier: Send + Sync {
    fn apply(&self, account: &Account, secrets: &AuthSecrets) -> AppResult<()>;
}

/// Merges tokens into the codex CLI `auth.json`, preserving every top-level
/// field the CLI may keep there besides `tokens`.
pub struct CodexAuthFileApplier {
    path: PathBuf,
}

impl CodexAuthFileApplier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn at_default_path() -> AppResult<Self> {
        Ok(Self::new(super::paths::codex_auth_json_path()?))
    }
}

impl CredentialApplier for CodexAuthFileApplier {
    fn apply(&self, account: &Account, secrets: &AuthSecrets) -> AppResult<()> {
        if !account.provider.trim().eq_ignore_ascii_case(PROVIDER_CODEX) {
            return Ok(());
        }
        if secrets.access_token.trim().is_empty() {
            return Err(AppError::validation("codex access token is empty"));
        }

        if let Some(dir) = self.path.parent() {
            create_private_dir(dir)?;
        }

        let mut doc = match fs::read(&self.path) {
            Ok(data) if !data.is_empty() => {
                serde_json::from_slice::<Value>(&data).map_err(|err| {
                    AppError::internal(format!("decode codex auth file: {err}"))
                })?
            }
            Ok(_) => Value::Object(Map::new()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Value::Object(Map::new()),
            Err(err) => {
                return Err(AppError::internal(format!("read codex auth file: {err}")));
            }
        };

        let root = doc
            .as_object_mut()
            .ok_or_else(|| AppError::internal("codex auth file is not a JSON object"))?;
        let tokens_slot = root
            .entry("tokens")
            .or_insert_with(|| Value::Object(Map::new()));
        if !tokens_slot.is_object() {
            *tokens_slot = Value::Object(Map::new());
        }
        let Some(tokens) = tokens_slot.as_object_mut() else {
            return Err(AppError::internal("codex auth tokens section is not an object"));
        };
        tokens.insert("access_token".into(), Value::String(secrets.access_token.clone()));
        tokens.insert(
            "refresh_token".into(),
            Value::String(secrets.refresh_token.clone()),
        );
        tokens.insert("id_token".into(), Value::String(secrets.id_token.clone()));
        tokens.insert("account_id".into(), Value::String(secrets.account_id.clone()));

        let payload = serde_json::to_vec_pretty(&doc)?;
        write_private_atomic(&self.path, &payload)
    }
}
