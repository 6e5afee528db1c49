//! Usage: Account registry data model (accounts, quota, auth secrets).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PROVIDER_CODEX: &str = "codex";

const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    #[default]
    RoundRobin,
    FillFirst,
}

impl RoutingStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "round-robin" => Some(Self::RoundRobin),
            "fill-first" => Some(Self::FillFirst),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::FillFirst => "fill-first",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Ready,
    NeedReauth,
    Disabled,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::NeedReauth => "need_reauth",
            Self::Disabled => "disabled",
        }
    }
}

/// A single reset horizon: how much of it is used and when it resets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct QuotaWindow {
    pub used_percent: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct QuotaSnapshot {
    #[serde(default)]
    pub session: QuotaWindow,
    #[serde(default)]
    pub weekly: QuotaWindow,
    /// `Some(false)` when the provider reports only a weekly window for this
    /// account tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_supported: Option<bool>,
    #[serde(default)]
    pub limit_reached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Registry-visible account record. The access token itself never lives
/// here; it is kept in the secret store under the same id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,
    #[serde(default)]
    pub quota: QuotaSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-account credentials persisted through the secret store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AuthSecrets {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

/// The persisted registry document. Account iteration order is never
/// observable through the API; listings sort explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    pub version: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub active_account_id: String,
    #[serde(default)]
    pub strategy: RoutingStrategy,
    #[serde(default)]
    pub accounts: HashMap<String, Account>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            active_account_id: String::new(),
            strategy: RoutingStrategy::default(),
            accounts: HashMap::new(),
            updated_at: None,
        }
    }
}

impl Registry {
    /// Accounts sorted by `updated_at` descending, ties broken by id
    /// ascending.
    pub fn sorted_accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        accounts
    }
}
