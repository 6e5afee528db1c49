//! Usage: Resolve upstream CLI and daemon user-level paths.

use crate::shared::error::{AppError, AppResult};
use std::path::{Path, PathBuf};

const ENV_CODEX_HOME: &str = "CODEX_HOME";
const ENV_CONFIG_DIR: &str = "CODEX_ACCOUNT_HUB_CONFIG_DIR";
const CONFIG_DIR_NAME: &str = "codex-account-hub";

fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::internal("failed to resolve home dir"))
}

fn expand_tilde(home: &Path, raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed == "~" {
        return Some(home.to_path_buf());
    }

    let rest = trimmed
        .strip_prefix("~/")
        .or_else(|| trimmed.strip_prefix("~\\"));

    rest.map(|suffix| home.join(suffix))
}

fn resolve_under_home(home: &Path, raw: &str) -> PathBuf {
    if let Some(p) = expand_tilde(home, raw) {
        return p;
    }

    let candidate = PathBuf::from(raw);
    if candidate.is_absolute() {
        return candidate;
    }

    home.join(candidate)
}

pub fn codex_home_dir() -> AppResult<PathBuf> {
    let home = home_dir()?;
    let raw = std::env::var(ENV_CODEX_HOME)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    Ok(match raw {
        Some(v) => resolve_under_home(&home, &v),
        None => home.join(".codex"),
    })
}

pub fn codex_auth_json_path() -> AppResult<PathBuf> {
    Ok(codex_home_dir()?.join("auth.json"))
}

/// Per-user config dir holding the registry document and the `secrets/`
/// blob directory.
pub fn config_dir() -> AppResult<PathBuf> {
    if let Some(overridden) = std::env::var(ENV_CONFIG_DIR)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        return Ok(PathBuf::from(overridden));
    }

    let base = dirs::config_dir().ok_or_else(|| AppError::internal("failed to resolve config dir"))?;
    Ok(base.join(CONFIG_DIR_NAME))
}

pub fn registry_file_path() -> AppResult<PathBuf> {
    Ok(config_dir()?.join("accounts.json"))
}

pub fn secrets_dir() -> AppResult<PathBuf> {
    Ok(config_dir()?.join("secrets"))
}
