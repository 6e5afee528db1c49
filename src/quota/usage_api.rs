//! Usage: Read one account's quota windows from the upstream usage endpoint.

use crate::shared::error::{AppError, AppResult};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;

use super::types::{clamp_used_percent, Snapshot, Window};

pub const CODEX_USAGE_URL: &str = "https://chatgpt.com/backend-api/wham/usage";

const ERROR_BODY_LIMIT: usize = 512;

pub trait QuotaFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        access_token: &'a str,
        provider_account_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = AppResult<Snapshot>> + Send + 'a>>;
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    rate_limit: Option<RateLimit>,
}

#[derive(Debug, Deserialize)]
struct RateLimit {
    #[serde(default)]
    limit_reached: bool,
    primary_window: Option<RawWindow>,
    secondary_window: Option<RawWindow>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct RawWindow {
    #[serde(default)]
    used_percent: f64,
    #[serde(default)]
    reset_at: i64,
}

pub struct CodexUsageApi {
    client: reqwest::Client,
    usage_url: String,
}

impl CodexUsageApi {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_url(client, CODEX_USAGE_URL)
    }

    pub fn with_url(client: reqwest::Client, usage_url: impl Into<String>) -> Self {
        Self {
            client,
            usage_url: usage_url.into(),
        }
    }

    async fn fetch_snapshot(
        &self,
        access_token: &str,
        provider_account_id: &str,
    ) -> AppResult<Snapshot> {
        if access_token.trim().is_empty() {
            return Err(AppError::validation("codex access token is empty"));
        }

        let mut request = self
            .client
            .get(&self.usage_url)
            .header("Authorization", format!("Bearer {}", access_token.trim()))
            .header("Accept", "application/json");
        let provider_account_id = provider_account_id.trim();
        if !provider_account_id.is_empty() {
            request = request.header("ChatGPT-Account-Id", provider_account_id);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AppError::upstream(format!("quota usage request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
            let message = if snippet.is_empty() {
                format!("quota usage request failed: status {}", status.as_u16())
            } else {
                format!(
                    "quota usage request failed: status {}: {snippet}",
                    status.as_u16()
                )
            };
            return Err(AppError::upstream(message));
        }

        let parsed: UsageResponse = response
            .json()
            .await
            .map_err(|err| AppError::upstream(format!("quota usage response invalid: {err}")))?;
        let rate_limit = parsed
            .rate_limit
            .ok_or_else(|| AppError::upstream("quota usage response missing rate_limit"))?;

        Ok(map_rate_limit(
            rate_limit.primary_window,
            rate_limit.secondary_window,
            rate_limit.limit_reached,
            Utc::now(),
        ))
    }
}

impl QuotaFetcher for CodexUsageApi {
    fn fetch<'a>(
        &'a self,
        access_token: &'a str,
        provider_account_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = AppResult<Snapshot>> + Send + 'a>> {
        Box::pin(self.fetch_snapshot(access_token, provider_account_id))
    }
}

/// Assign the provider's primary/secondary windows to session/weekly slots.
/// Free-tier accounts report a single window with a multi-day horizon; that
/// is weekly usage, not a session window, and the session slot stays empty.
fn map_rate_limit(
    primary: Option<RawWindow>,
    secondary: Option<RawWindow>,
    limit_reached: bool,
    now: DateTime<Utc>,
) -> Snapshot {
    let weekly_horizon = now + Duration::hours(24);
    let primary_is_long = primary
        .map(|w| w.reset_at > weekly_horizon.timestamp())
        .unwrap_or(false);

    let secondary = secondary.filter(|w| {
        let placeholder = w.used_percent == 0.0 && w.reset_at == 0;
        !(placeholder && primary_is_long)
    });

    let (session, weekly, session_unsupported) = match (primary, secondary) {
        (primary, Some(secondary)) => (primary, Some(secondary), false),
        (Some(primary), None) if primary_is_long => (None, Some(primary), true),
        (primary, None) => (primary, None, false),
    };

    Snapshot {
        session: session.map(to_window),
        weekly: weekly.map(to_window),
        session_unsupported,
        limit_reached,
        source_timestamp: now,
    }
}

fn to_window(raw: RawWindow) -> Window {
    let reset_at = (raw.reset_at > 0)
        .then(|| Utc.timestamp_opt(raw.reset_at, 0).single())
        .flatten();
    Window {
        used_percent: clamp_used_percent(raw.used_percent),
        reset_at,
    }
}
