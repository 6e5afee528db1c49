//! Usage: Provider-specific OAuth endpoint, scope and extra-param table.

pub const CODEX_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";

/// Adding a provider is data, not code: the session engine only reads this
/// table.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: String,
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    /// Empty means the redirect URI is derived from the daemon's public base
    /// URL instead of a pinned localhost port.
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub extra_auth_params: Vec<(String, String)>,
}

pub fn codex_config() -> ProviderConfig {
    ProviderConfig {
        provider: "codex".to_string(),
        client_id: CODEX_CLIENT_ID.to_string(),
        auth_url: "https://auth.openai.com/oauth/authorize".to_string(),
        token_url: "https://auth.openai.com/oauth/token".to_string(),
        redirect_uri: "http://localhost:1455/auth/callback".to_string(),
        scopes: ["openid", "profile", "email", "offline_access"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        extra_auth_params: [
            ("id_token_add_organizations", "true"),
            ("codex_cli_simplified_flow", "true"),
            ("originator", "codex_cli_rs"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    }
}

pub fn default_providers() -> Vec<ProviderConfig> {
    vec![codex_config()]
}
