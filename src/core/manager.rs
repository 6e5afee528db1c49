//! Usage: Central coordinator owning every registry/secret mutation.

use crate::auth::applier::CredentialApplier;
use crate::domain::accounts::{
    Account, AccountStatus, AuthSecrets, QuotaSnapshot, QuotaWindow, Registry, RoutingStrategy,
    PROVIDER_CODEX,
};
use crate::quota;
use crate::quota::usage_api::QuotaFetcher;
use crate::shared::error::{AppError, AppResult};
use crate::shared::security::mask_token;
use crate::store::secrets::SecretStore;
use crate::store::state::StateStore;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::refresh::AccessTokenRefresher;

/// Access tokens expiring within this margin are refreshed before use.
const TOKEN_FRESHNESS_MARGIN_SECS: i64 = 30;
/// Fallback expiry for manually added tokens with no stated lifetime.
const DEFAULT_ACCESS_LIFETIME_MINS: i64 = 50;

const SWITCHABLE_MESSAGE_PATTERNS: &[&str] = &[
    "quota exceeded",
    "rate limit",
    "limit reached",
    "insufficient_quota",
    "resource_exhausted",
    "overloaded",
    "capacity",
    "too many requests",
    "throttl",
    "authentication",
    "unauthorized",
    "access denied",
];

#[derive(Debug, Clone)]
pub struct AddAccountInput {
    pub id: String,
    pub provider: String,
    pub email: String,
    pub secrets: AuthSecrets,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SwitchDecision {
    pub switched: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub from_account_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub to_account_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl SwitchDecision {
    fn not_switchable() -> Self {
        Self {
            switched: false,
            from_account_id: String::new(),
            to_account_id: String::new(),
            reason: "not-switchable-error".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub active_account_id: String,
    pub strategy: RoutingStrategy,
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaSyncResult {
    pub account_id: String,
    pub quota: QuotaSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaSyncItem {
    pub account_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<QuotaSyncResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaSyncAllResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<QuotaSyncItem>,
}

/// All public operations serialize on one process-wide lock; read-then-write
/// sequences never release it in between. The token refresh inside the
/// switch loop deliberately runs under the lock so two concurrent switches
/// cannot race on the active-account slot.
pub struct Manager {
    lock: Mutex<()>,
    state_store: Arc<dyn StateStore>,
    secret_store: Arc<dyn SecretStore>,
    applier: Arc<dyn CredentialApplier>,
    refresher: Arc<dyn AccessTokenRefresher>,
    quota_fetcher: Arc<dyn QuotaFetcher>,
}

impl Manager {
    pub fn new(
        state_store: Arc<dyn StateStore>,
        secret_store: Arc<dyn SecretStore>,
        applier: Arc<dyn CredentialApplier>,
        refresher: Arc<dyn AccessTokenRefresher>,
        quota_fetcher: Arc<dyn QuotaFetcher>,
    ) -> Self {
        Self {
            lock: Mutex::new(()),
            state_store,
            secret_store,
            applier,
            refresher,
            quota_fetcher,
        }
    }

    pub async fn add_account(&self, input: AddAccountInput) -> AppResult<Account> {
        if input.id.trim().is_empty() {
            return Err(AppError::validation("id is required"));
        }
        if input.provider.trim().is_empty() {
            return Err(AppError::validation("provider is required"));
        }
        if input.secrets.access_token.trim().is_empty() {
            return Err(AppError::validation("access_token is required"));
        }

        let now = Utc::now();
        let mut secrets = input.secrets;
        if secrets.access_expires_at.is_none() {
            secrets.access_expires_at = Some(now + Duration::minutes(DEFAULT_ACCESS_LIFETIME_MINS));
        }

        let _guard = self.lock.lock().await;
        let mut registry = self.state_store.load()?;

        let created_at = registry
            .accounts
            .get(&input.id)
            .map(|existing| existing.created_at)
            .unwrap_or(now);

        let account = Account {
            id: input.id.clone(),
            provider: input.provider.trim().to_lowercase(),
            email: input.email.trim().to_string(),
            status: AccountStatus::Ready,
            last_applied_at: None,
            access_expires_at: secrets.access_expires_at,
            refresh_expires_at: secrets.refresh_expires_at,
            last_refresh_at: None,
            last_error: String::new(),
            quota: QuotaSnapshot::default(),
            created_at,
            updated_at: now,
        };

        registry.accounts.insert(input.id.clone(), account.clone());
        if registry.active_account_id.is_empty() {
            registry.active_account_id = input.id.clone();
        }

        if let Err(err) = self.secret_store.put(&input.id, &secrets) {
            return Err(AppError::persist_secrets(format!(
                "persist secrets failed: {err}"
            )));
        }
        if let Err(err) = self.state_store.save(&registry) {
            if let Err(rollback_err) = self.secret_store.delete(&input.id) {
                return Err(AppError::persist_state(format!(
                    "persist state failed: {err} (rollback failed: {rollback_err})"
                )));
            }
            return Err(AppError::persist_state(format!(
                "persist state failed: {err}"
            )));
        }

        tracing::info!(
            account_id = %account.id,
            provider = %account.provider,
            access_token = %mask_token(&secrets.access_token),
            "account stored"
        );
        Ok(account)
    }

    pub async fn list_accounts(&self) -> AppResult<Vec<Account>> {
        let _guard = self.lock.lock().await;
        Ok(self.state_store.load()?.sorted_accounts())
    }

    pub async fn status(&self) -> AppResult<StatusSnapshot> {
        let _guard = self.lock.lock().await;
        let registry = self.state_store.load()?;
        Ok(StatusSnapshot {
            active_account_id: registry.active_account_id.clone(),
            strategy: registry.strategy,
            accounts: registry.sorted_accounts(),
        })
    }

    pub async fn set_active_account(&self, account_id: &str) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let mut registry = self.state_store.load()?;

        let mut account = registry
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| AppError::validation(format!("account {account_id} not found")))?;
        if matches!(
            account.status,
            AccountStatus::NeedReauth | AccountStatus::Disabled
        ) {
            return Err(AppError::validation(format!(
                "account {account_id} is not ready"
            )));
        }

        let secrets = self
            .secret_store
            .get(account_id)
            .map_err(|err| AppError::validation(format!("load secrets for {account_id}: {err}")))?;
        // Apply gates the mutation: a failed write into the CLI credential
        // file leaves the registry untouched.
        self.applier.apply(&account, &secrets)?;

        let now = Utc::now();
        account.last_applied_at = Some(now);
        account.updated_at = now;
        registry.accounts.insert(account_id.to_string(), account);
        registry.active_account_id = account_id.to_string();
        self.state_store.save(&registry)
    }

    pub async fn set_strategy(&self, strategy: RoutingStrategy) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let mut registry = self.state_store.load()?;
        registry.strategy = strategy;
        self.state_store.save(&registry)
    }

    pub async fn update_quota(&self, account_id: &str, mut quota: QuotaSnapshot) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let mut registry = self.state_store.load()?;

        let Some(account) = registry.accounts.get_mut(account_id) else {
            return Err(AppError::validation(format!(
                "account {account_id} not found"
            )));
        };
        let now = Utc::now();
        quota.session.used_percent = quota.session.used_percent.clamp(0, 100);
        quota.weekly.used_percent = quota.weekly.used_percent.clamp(0, 100);
        quota.last_updated = Some(now);
        account.quota = quota;
        account.updated_at = now;
        self.state_store.save(&registry)
    }

    /// Sync one account's quota from upstream; an empty id targets the
    /// active account.
    pub async fn sync_quota(&self, account_id: &str) -> AppResult<QuotaSyncResult> {
        let _guard = self.lock.lock().await;
        let mut registry = self.state_store.load()?;

        let account_id = if account_id.trim().is_empty() {
            if registry.active_account_id.is_empty() {
                return Err(AppError::validation("no active account configured"));
            }
            registry.active_account_id.clone()
        } else {
            account_id.trim().to_string()
        };

        let mut account = registry
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or_else(|| AppError::validation(format!("account {account_id} not found")))?;
        if account.provider != PROVIDER_CODEX {
            return Err(AppError::validation(format!(
                "quota sync for provider {} is not supported",
                account.provider
            )));
        }

        let secrets = match self.ensure_fresh_token(&mut account).await {
            Ok(secrets) => secrets,
            Err(err) => {
                account.status = AccountStatus::NeedReauth;
                account.last_error = err.to_string();
                account.updated_at = Utc::now();
                registry.accounts.insert(account_id.clone(), account);
                self.state_store.save(&registry)?;
                return Err(err);
            }
        };

        let snapshot = self
            .quota_fetcher
            .fetch(&secrets.access_token, &secrets.account_id)
            .await?;

        merge_snapshot(&mut account.quota, &snapshot);
        account.updated_at = Utc::now();
        registry.accounts.insert(account_id.clone(), account.clone());
        self.state_store.save(&registry)?;

        Ok(QuotaSyncResult {
            account_id,
            quota: account.quota,
        })
    }

    /// Sync every account, collecting per-account outcomes instead of
    /// aborting on individual failures.
    pub async fn sync_all_quotas(&self) -> AppResult<QuotaSyncAllResult> {
        let account_ids: Vec<String> = {
            let _guard = self.lock.lock().await;
            let registry = self.state_store.load()?;
            let mut ids: Vec<String> = registry.accounts.keys().cloned().collect();
            ids.sort();
            ids
        };

        let mut results = Vec::with_capacity(account_ids.len());
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for account_id in &account_ids {
            match self.sync_quota(account_id).await {
                Ok(result) => {
                    succeeded += 1;
                    results.push(QuotaSyncItem {
                        account_id: account_id.clone(),
                        success: true,
                        error: String::new(),
                        result: Some(result),
                    });
                }
                Err(err) => {
                    failed += 1;
                    results.push(QuotaSyncItem {
                        account_id: account_id.clone(),
                        success: false,
                        error: err.to_string(),
                        result: None,
                    });
                }
            }
        }

        Ok(QuotaSyncAllResult {
            total: account_ids.len(),
            succeeded,
            failed,
            results,
        })
    }

    /// The switch decision: on a switch-worthy upstream failure, rotate to
    /// the best usable candidate and apply its credentials.
    pub async fn handle_quota_error(
        &self,
        status_code: i64,
        error_message: &str,
    ) -> AppResult<SwitchDecision> {
        if !should_switch(status_code, error_message) {
            return Ok(SwitchDecision::not_switchable());
        }

        let _guard = self.lock.lock().await;
        let mut registry = self.state_store.load()?;
        if registry.active_account_id.is_empty() {
            return Err(AppError::validation("no active account configured"));
        }
        if registry.accounts.is_empty() {
            return Err(AppError::validation("no accounts configured"));
        }

        let active_id = registry.active_account_id.clone();
        for candidate_id in ordered_candidates(&registry, &active_id) {
            let Some(mut account) = registry.accounts.get(&candidate_id).cloned() else {
                continue;
            };
            if account.status == AccountStatus::Disabled {
                continue;
            }

            let secrets = match self.ensure_fresh_token(&mut account).await {
                Ok(secrets) => secrets,
                Err(err) => {
                    tracing::warn!(
                        account_id = %candidate_id,
                        "switch candidate unusable: {err}"
                    );
                    account.status = AccountStatus::NeedReauth;
                    account.last_error = err.to_string();
                    account.updated_at = Utc::now();
                    registry.accounts.insert(candidate_id.clone(), account);
                    continue;
                }
            };

            if let Err(err) = self.applier.apply(&account, &secrets) {
                tracing::warn!(
                    account_id = %candidate_id,
                    "switch candidate apply failed: {err}"
                );
                account.last_error = format!("apply credentials: {err}");
                account.updated_at = Utc::now();
                registry.accounts.insert(candidate_id.clone(), account);
                continue;
            }

            let now = Utc::now();
            account.status = AccountStatus::Ready;
            account.last_error = String::new();
            account.last_applied_at = Some(now);
            account.updated_at = now;
            registry.accounts.insert(candidate_id.clone(), account);
            registry.active_account_id = candidate_id.clone();
            self.state_store.save(&registry)?;

            tracing::info!(from = %active_id, to = %candidate_id, "switched active account");
            return Ok(SwitchDecision {
                switched: true,
                from_account_id: active_id,
                to_account_id: candidate_id,
                reason: "quota-exceeded".to_string(),
            });
        }

        // Persist the need_reauth marks accumulated during the scan.
        self.state_store.save(&registry)?;
        Ok(SwitchDecision {
            switched: false,
            from_account_id: active_id,
            to_account_id: String::new(),
            reason: "no-available-account".to_string(),
        })
    }

    /// Refresh the account's access token when it is within the freshness
    /// margin of expiry. Returns the usable secrets; account expiry fields
    /// mirror the secret record afterwards.
    async fn ensure_fresh_token(&self, account: &mut Account) -> AppResult<AuthSecrets> {
        // A failed read or unprotect means key-ring change or corruption;
        // the account needs a fresh login, not deletion.
        let mut secrets = self
            .secret_store
            .get(&account.id)
            .map_err(|err| AppError::need_reauth(format!("load account secrets: {err}")))?;

        let now = Utc::now();
        let fresh = match secrets.access_expires_at {
            None => true,
            Some(expiry) => expiry > now + Duration::seconds(TOKEN_FRESHNESS_MARGIN_SECS),
        };
        if fresh {
            account.access_expires_at = secrets.access_expires_at;
            account.refresh_expires_at = secrets.refresh_expires_at;
            return Ok(secrets);
        }

        if secrets.refresh_token.trim().is_empty() {
            return Err(AppError::need_reauth("refresh token missing"));
        }
        if let Some(refresh_expiry) = secrets.refresh_expires_at {
            if refresh_expiry < now {
                return Err(AppError::need_reauth("refresh token expired"));
            }
        }
        if account.provider != PROVIDER_CODEX {
            return Err(AppError::need_reauth(format!(
                "provider {} refresh is not implemented",
                account.provider
            )));
        }

        let tokens = self.refresher.refresh(&secrets.refresh_token).await?;
        secrets.access_token = tokens.access_token;
        secrets.access_expires_at = Some(tokens.access_expires_at);
        if !tokens.id_token.is_empty() {
            secrets.id_token = tokens.id_token;
        }
        if !tokens.refresh_token.is_empty() {
            secrets.refresh_token = tokens.refresh_token;
        }
        self.secret_store.put(&account.id, &secrets)?;

        account.access_expires_at = secrets.access_expires_at;
        account.refresh_expires_at = secrets.refresh_expires_at;
        account.last_refresh_at = Some(now);
        Ok(secrets)
    }
}

fn merge_snapshot(current: &mut QuotaSnapshot, snapshot: &quota::types::Snapshot) {
    // Missing windows keep their last-known value: a weekly-only report must
    // not wipe the session percent observed earlier.
    if let Some(session) = &snapshot.session {
        current.session = QuotaWindow {
            used_percent: session.used_percent,
            reset_at: session.reset_at,
        };
    }
    if let Some(weekly) = &snapshot.weekly {
        current.weekly = QuotaWindow {
            used_percent: weekly.used_percent,
            reset_at: weekly.reset_at,
        };
    }

    if snapshot.session_unsupported {
        current.session_supported = Some(false);
    } else if snapshot.session.is_some() {
        current.session_supported = Some(true);
    }

    current.limit_reached = snapshot.limit_reached
        || current.session.used_percent >= 100
        || current.weekly.used_percent >= 100;
    current.last_updated = Some(snapshot.source_timestamp);
}

fn ordered_candidates(registry: &Registry, active_id: &str) -> Vec<String> {
    let mut ids: Vec<String> = registry
        .accounts
        .keys()
        .filter(|id| id.as_str() != active_id)
        .cloned()
        .collect();

    match registry.strategy {
        RoutingStrategy::FillFirst => {
            ids.sort_by(|a, b| {
                let left = combined_used(registry, a);
                let right = combined_used(registry, b);
                left.cmp(&right).then_with(|| a.cmp(b))
            });
        }
        // Deterministic rotation order until a cursor-based scheme exists.
        RoutingStrategy::RoundRobin => ids.sort(),
    }
    ids
}

fn combined_used(registry: &Registry, id: &str) -> i64 {
    registry
        .accounts
        .get(id)
        .map(|a| a.quota.session.used_percent + a.quota.weekly.used_percent)
        .unwrap_or(0)
}

fn should_switch(status_code: i64, message: &str) -> bool {
    if matches!(status_code, 429 | 500 | 503) {
        return true;
    }
    let lower = message.to_lowercase();
    SWITCHABLE_MESSAGE_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}
