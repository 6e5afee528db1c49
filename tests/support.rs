//! Shared harness for API-level tests: a real daemon wired to temp state
//! and stubbed upstream endpoints.

#![allow(dead_code)]

use codex_account_hub::auth::applier::CodexAuthFileApplier;
use codex_account_hub::core::manager::Manager;
use codex_account_hub::core::refresh::CodexTokenRefresher;
use codex_account_hub::oauth::providers::ProviderConfig;
use codex_account_hub::oauth::service::OAuthService;
use codex_account_hub::quota::usage_api::CodexUsageApi;
use codex_account_hub::server::daemon_control::DaemonController;
use codex_account_hub::server::routes::build_router;
use codex_account_hub::server::AppState;
use codex_account_hub::store::secrets::ProtectedFileStore;
use codex_account_hub::store::state::FileStateStore;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub manager: Arc<Manager>,
    pub codex_auth_file: PathBuf,
    config_dir: TempDir,
}

#[derive(Default)]
pub struct TestAppConfig {
    /// Token endpoint for refresh + OAuth code exchange; unset means an
    /// unreachable host, so tests that never refresh stay hermetic.
    pub token_url: Option<String>,
    /// Usage endpoint for quota sync.
    pub usage_url: Option<String>,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(TestAppConfig::default()).await
}

pub async fn spawn_app_with(config: TestAppConfig) -> TestApp {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let dir = config_dir.path();
    let codex_auth_file = dir.join("codex-home").join("auth.json");

    let client = reqwest::Client::new();
    let token_url = config
        .token_url
        .unwrap_or_else(|| "http://127.0.0.1:1/oauth/token".to_string());
    let usage_url = config
        .usage_url
        .unwrap_or_else(|| "http://127.0.0.1:1/backend-api/wham/usage".to_string());

    let manager = Arc::new(Manager::new(
        Arc::new(FileStateStore::new(dir.join("accounts.json"))),
        Arc::new(ProtectedFileStore::with_default_cipher(dir.join("secrets"))),
        Arc::new(CodexAuthFileApplier::new(&codex_auth_file)),
        Arc::new(CodexTokenRefresher::with_endpoint(
            client.clone(),
            &token_url,
            "client-test",
        )),
        Arc::new(CodexUsageApi::with_url(client.clone(), &usage_url)),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let base_url = format!("http://{addr}");

    let oauth = Arc::new(OAuthService::with_providers(
        manager.clone(),
        client.clone(),
        &base_url,
        vec![ProviderConfig {
            provider: "codex".to_string(),
            client_id: "client-test".to_string(),
            auth_url: "https://auth.example.com/oauth/authorize".to_string(),
            token_url,
            // Derived from the public base URL, so the callback lands on
            // this test server's /auth/callback route.
            redirect_uri: String::new(),
            scopes: vec!["openid".to_string(), "email".to_string()],
            extra_auth_params: vec![("originator".to_string(), "codex_cli_rs".to_string())],
        }],
    ));
    let daemon = Arc::new(DaemonController::new(
        &addr.to_string(),
        &base_url,
        Some("true".to_string()),
    ));

    let state = AppState {
        manager: manager.clone(),
        oauth: Some(oauth),
        daemon: Some(daemon.clone()),
        codex_auth_file: codex_auth_file.clone(),
    };

    let shutdown_rx = daemon.register_server();
    let router = build_router(state);
    tokio::spawn(async move {
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let _ = serve.await;
    });

    TestApp {
        base_url,
        client: reqwest::Client::new(),
        manager,
        codex_auth_file,
        config_dir,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.expect("GET")
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("POST")
    }

    pub async fn post_empty(&self, path: &str) -> reqwest::Response {
        self.client.post(self.url(path)).send().await.expect("POST")
    }

    pub async fn patch_json(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .patch(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("PATCH")
    }

    /// Add a ready account with an unexpired token through the public API.
    pub async fn add_account(&self, id: &str, access_token: &str) {
        let expires = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let response = self
            .post_json(
                "/v1/accounts",
                serde_json::json!({
                    "id": id,
                    "provider": "codex",
                    "access_token": access_token,
                    "access_expires_at": expires,
                }),
            )
            .await;
        assert_eq!(response.status(), 201, "seed account {id}");
    }

    pub async fn status_json(&self) -> serde_json::Value {
        let response = self.get("/v1/status").await;
        assert_eq!(response.status(), 200);
        response.json().await.expect("status json")
    }
}

pub fn build_test_id_token(claims: serde_json::Value) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).expect("claims"));
    format!("header.{payload}.signature")
}

pub fn seed_codex_auth_file(path: &std::path::Path, tokens: serde_json::Value) {
    std::fs::create_dir_all(path.parent().expect("auth dir")).expect("create codex home");
    std::fs::write(path, serde_json::json!({ "tokens": tokens }).to_string())
        .expect("seed auth file");
}
