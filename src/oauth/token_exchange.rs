//! Usage: OAuth token endpoint helpers (authorization_code + refresh_token grants).

use crate::shared::error::{AppError, AppResult};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;

const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
const ERROR_BODY_LIMIT: usize = 2048;

#[derive(Debug, Clone)]
pub struct TokenExchangeRequest {
    pub token_url: String,
    pub client_id: String,
    pub code: String,
    pub redirect_uri: String,
    pub code_verifier: String,
}

#[derive(Debug, Clone)]
pub struct TokenRefreshRequest {
    pub token_url: String,
    pub client_id: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    id_token: String,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    refresh_token_expires_in: i64,
}

pub async fn exchange_authorization_code(
    client: &reqwest::Client,
    req: &TokenExchangeRequest,
) -> AppResult<TokenSet> {
    let mut form: HashMap<&str, &str> = HashMap::new();
    form.insert("grant_type", "authorization_code");
    form.insert("code", req.code.trim());
    form.insert("redirect_uri", req.redirect_uri.trim());
    form.insert("client_id", req.client_id.trim());
    form.insert("code_verifier", req.code_verifier.trim());

    let response = client
        .post(req.token_url.trim())
        .form(&form)
        .send()
        .await
        .map_err(|err| AppError::upstream(format!("token exchange request failed: {err}")))?;

    parse_token_response(response, "token exchange").await
}

pub async fn refresh_access_token(
    client: &reqwest::Client,
    req: &TokenRefreshRequest,
) -> AppResult<TokenSet> {
    let mut form: HashMap<&str, &str> = HashMap::new();
    form.insert("grant_type", "refresh_token");
    form.insert("refresh_token", req.refresh_token.trim());
    form.insert("client_id", req.client_id.trim());

    let response = client
        .post(req.token_url.trim())
        .form(&form)
        .send()
        .await
        .map_err(|err| AppError::upstream(format!("token refresh request failed: {err}")))?;

    parse_token_response(response, "token refresh").await
}

async fn parse_token_response(response: reqwest::Response, op: &str) -> AppResult<TokenSet> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| AppError::upstream(format!("{op} response read failed: {err}")))?;

    if !status.is_success() {
        let snippet: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
        return Err(AppError::upstream(format!(
            "{op} failed: status {} body={snippet}",
            status.as_u16()
        )));
    }

    let parsed: TokenResponse = serde_json::from_str(&body)
        .map_err(|err| AppError::upstream(format!("{op} response json invalid: {err}")))?;
    if parsed.access_token.trim().is_empty() {
        return Err(AppError::upstream(format!(
            "{op} returned empty access_token"
        )));
    }

    let now = Utc::now();
    let expires_in = if parsed.expires_in > 0 {
        parsed.expires_in
    } else {
        DEFAULT_EXPIRES_IN_SECS
    };
    let refresh_expires_at = (parsed.refresh_token_expires_in > 0)
        .then(|| now + Duration::seconds(parsed.refresh_token_expires_in));

    Ok(TokenSet {
        access_token: parsed.access_token.trim().to_string(),
        refresh_token: parsed.refresh_token.trim().to_string(),
        id_token: parsed.id_token.trim().to_string(),
        access_expires_at: now + Duration::seconds(expires_in),
        refresh_expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::error::ErrorKind;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn refresh_parses_tokens_and_defaults_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-2",
                "id_token": "id-2"
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let before = Utc::now();
        let tokens = refresh_access_token(
            &client,
            &TokenRefreshRequest {
                token_url: format!("{}/oauth/token", server.uri()),
                client_id: "client-1".into(),
                refresh_token: "refresh-1".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(tokens.access_token, "access-2");
        assert_eq!(tokens.id_token, "id-2");
        let lifetime = tokens.access_expires_at - before;
        assert!(lifetime >= Duration::seconds(3590) && lifetime <= Duration::seconds(3610));
        assert!(tokens.refresh_expires_at.is_none());
    }

    #[tokio::test]
    async fn exchange_sends_pkce_form_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=code-1"))
            .and(body_string_contains("code_verifier=verifier-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_in": 600,
                "refresh_token_expires_in": 1200
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let tokens = exchange_authorization_code(
            &client,
            &TokenExchangeRequest {
                token_url: format!("{}/oauth/token", server.uri()),
                client_id: "client-1".into(),
                code: "code-1".into(),
                redirect_uri: "http://localhost:1455/auth/callback".into(),
                code_verifier: "verifier-1".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(tokens.access_token, "access-1");
        assert_eq!(tokens.refresh_token, "refresh-1");
        assert!(tokens.refresh_expires_at.is_some());
    }

    #[tokio::test]
    async fn non_2xx_is_tagged_with_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string("{\"error\":\"invalid_grant\"}"),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = refresh_access_token(
            &client,
            &TokenRefreshRequest {
                token_url: format!("{}/oauth/token", server.uri()),
                client_id: "client-1".into(),
                refresh_token: "refresh-1".into(),
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.to_string().contains("status 401"));
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn empty_access_token_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": ""
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = refresh_access_token(
            &client,
            &TokenRefreshRequest {
                token_url: format!("{}/oauth/token", server.uri()),
                client_id: "client-1".into(),
                refresh_token: "refresh-1".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("empty access_token"));
    }
}
