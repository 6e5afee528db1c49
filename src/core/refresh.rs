//! Usage: Access-token refresh seam used by the manager.

use crate::oauth::providers::codex_config;
use crate::oauth::token_exchange::{refresh_access_token, TokenRefreshRequest, TokenSet};
use crate::shared::error::AppResult;
use std::future::Future;
use std::pin::Pin;

pub trait AccessTokenRefresher: Send + Sync {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = AppResult<TokenSet>> + Send + 'a>>;
}

/// Production refresher against the codex token endpoint.
pub struct CodexTokenRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
}

impl CodexTokenRefresher {
    pub fn new(client: reqwest::Client) -> Self {
        let cfg = codex_config();
        Self::with_endpoint(client, cfg.token_url, cfg.client_id)
    }

    pub fn with_endpoint(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
        }
    }
}

impl AccessTokenRefresher for CodexTokenRefresher {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = AppResult<TokenSet>> + Send + 'a>> {
        Box::pin(async move {
            refresh_access_token(
                &self.client,
                &TokenRefreshRequest {
                    token_url: self.token_url.clone(),
                    client_id: self.client_id.clone(),
                    refresh_token: refresh_token.to_string(),
                },
            )
            .await
        })
    }
}
