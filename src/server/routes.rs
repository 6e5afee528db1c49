//! Usage: Route table for the API server and the OAuth callback listeners.

use axum::middleware;
use axum::routing::{get, patch, post};
use axum::Router;

use super::cors::permissive_cors;
use super::handlers;
use super::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handlers::health))
        .route("/v1/status", get(handlers::status))
        .route("/v1/strategy", patch(handlers::set_strategy))
        .route(
            "/v1/accounts",
            get(handlers::list_accounts).post(handlers::add_account),
        )
        .route("/v1/accounts/:id/activate", post(handlers::activate_account))
        .route("/v1/accounts/:id/quota", patch(handlers::update_quota))
        .route(
            "/v1/accounts/import/codex/candidate",
            get(handlers::import_candidate),
        )
        .route("/v1/accounts/import/codex", post(handlers::import_codex))
        .route("/v1/quota/sync", post(handlers::sync_quota))
        .route("/v1/quota/sync-all", post(handlers::sync_all_quotas))
        .route("/v1/switch/on-error", post(handlers::switch_on_error))
        .route("/v1/oauth/providers", get(handlers::oauth_providers))
        .route("/v1/oauth/start", post(handlers::oauth_start))
        .route("/v1/oauth/status", get(handlers::oauth_status))
        .route("/v1/oauth/callback", get(handlers::oauth_callback))
        .route("/auth/callback", get(handlers::oauth_callback))
        .route("/v1/daemon/info", get(handlers::daemon_info))
        .route("/v1/daemon/shutdown", post(handlers::daemon_shutdown))
        .route("/v1/daemon/restart", post(handlers::daemon_restart))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn(permissive_cors))
        .with_state(state)
}

/// Minimal router for sibling listeners bound to provider redirect ports:
/// only the callback paths are served there.
pub fn build_callback_router(state: AppState, callback_paths: &[String]) -> Router {
    let mut router = Router::new().route("/v1/oauth/callback", get(handlers::oauth_callback));
    for path in callback_paths {
        if path == "/v1/oauth/callback" {
            continue;
        }
        router = router.route(path, get(handlers::oauth_callback));
    }
    router
        .fallback(handlers::not_found)
        .layer(middleware::from_fn(permissive_cors))
        .with_state(state)
}
