//! Usage: Daemon entrypoint: flags, wiring, listeners, background quota loop.

use clap::Parser;
use codex_account_hub::auth::applier::CodexAuthFileApplier;
use codex_account_hub::auth::paths;
use codex_account_hub::core::manager::Manager;
use codex_account_hub::core::refresh::CodexTokenRefresher;
use codex_account_hub::oauth::service::OAuthService;
use codex_account_hub::quota::usage_api::CodexUsageApi;
use codex_account_hub::server::daemon_control::{DaemonController, SHUTDOWN_DRAIN_DEADLINE};
use codex_account_hub::server::routes::{build_callback_router, build_router};
use codex_account_hub::server::AppState;
use codex_account_hub::shared::error::{AppError, AppResult};
use codex_account_hub::store::secrets::ProtectedFileStore;
use codex_account_hub::store::state::FileStateStore;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(20);
const QUOTA_REFRESH_STEADY: Duration = Duration::from_secs(5 * 60);
const QUOTA_REFRESH_BACKOFF_CAP: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Parser)]
#[command(name = "codex-account-hub", version, about = "Account-state daemon for codex subscriptions")]
struct Args {
    /// Listen address of the HTTP API.
    #[arg(long, default_value = "127.0.0.1:7777")]
    addr: String,

    /// Public base URL used to build OAuth redirect URIs when the provider
    /// config does not pin one.
    #[arg(long, default_value = "http://localhost:7777")]
    public_base_url: String,

    /// Command used by /v1/daemon/restart to spawn the replacement daemon.
    #[arg(long)]
    restart_cmd: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        tracing::error!("daemon failed: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> AppResult<()> {
    let registry_path = paths::registry_file_path()?;
    let secrets_dir = paths::secrets_dir()?;
    let codex_auth_file = paths::codex_auth_json_path()?;

    let client = reqwest::Client::builder()
        .timeout(HTTP_CLIENT_TIMEOUT)
        .user_agent(format!("codex-account-hub/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| AppError::internal(format!("http client init: {err}")))?;

    let manager = Arc::new(Manager::new(
        Arc::new(FileStateStore::new(&registry_path)),
        Arc::new(ProtectedFileStore::with_default_cipher(&secrets_dir)),
        Arc::new(CodexAuthFileApplier::new(&codex_auth_file)),
        Arc::new(CodexTokenRefresher::new(client.clone())),
        Arc::new(CodexUsageApi::new(client.clone())),
    ));
    let oauth = Arc::new(OAuthService::new(
        manager.clone(),
        client,
        &args.public_base_url,
    ));
    let daemon = Arc::new(DaemonController::new(
        &args.addr,
        &args.public_base_url,
        args.restart_cmd.clone(),
    ));

    let state = AppState {
        manager: manager.clone(),
        oauth: Some(oauth.clone()),
        daemon: Some(daemon.clone()),
        codex_auth_file,
    };

    let api_listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .map_err(|err| AppError::internal(format!("bind {}: {err}", args.addr)))?;
    tracing::info!(addr = %args.addr, registry = %registry_path.display(), "daemon listening");
    if daemon.info().default_restart_cmd.is_none() {
        tracing::info!("daemon restart API disabled (no stable executable; set --restart-cmd)");
    }

    let mut server_tasks = Vec::new();
    {
        let shutdown_rx = daemon.register_server();
        let router = build_router(state.clone());
        server_tasks.push(tokio::spawn(async move {
            let serve = axum::serve(api_listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = serve.await {
                tracing::error!("api server error: {err}");
            }
        }));
    }

    // Sibling listeners on each provider's pinned redirect host:port; the
    // browser lands there, not on the API address.
    for (authority, callback_paths) in callback_bindings(&oauth.redirect_uris())? {
        let listener = match tokio::net::TcpListener::bind(&authority).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::warn!(authority = %authority, "oauth callback bind failed: {err}");
                continue;
            }
        };
        tracing::info!(authority = %authority, "oauth callback listener bound");

        let shutdown_rx = daemon.register_server();
        let router = build_callback_router(state.clone(), &callback_paths);
        server_tasks.push(tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = serve.await {
                tracing::error!(authority = %authority, "oauth callback server error: {err}");
            }
        }));
    }

    tokio::spawn(run_quota_refresh_loop(
        manager.clone(),
        daemon.subscribe_shutdown(),
    ));

    {
        let daemon = daemon.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; shutting down");
                let _ = daemon.shutdown();
            }
        });
    }

    // Drain watchdog: once shutdown starts, in-flight requests get the
    // deadline and then the process exits regardless.
    {
        let mut shutdown_rx = daemon.subscribe_shutdown();
        tokio::spawn(async move {
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    return;
                }
            }
            tokio::time::sleep(SHUTDOWN_DRAIN_DEADLINE).await;
            tracing::warn!("drain deadline reached; exiting");
            std::process::exit(0);
        });
    }

    for task in server_tasks {
        let _ = task.await;
    }
    Ok(())
}

/// Periodic quota sync across all accounts; failures back off exponentially
/// up to the cap and a successful pass resets the cadence.
async fn run_quota_refresh_loop(manager: Arc<Manager>, mut shutdown: watch::Receiver<bool>) {
    let mut delay = QUOTA_REFRESH_STEADY;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
                continue;
            }
        }

        match manager.sync_all_quotas().await {
            Ok(out) if out.total > 0 && out.succeeded == 0 => {
                delay = next_backoff(delay);
                tracing::warn!(
                    failed = out.failed,
                    next_secs = delay.as_secs(),
                    "quota refresh pass failed for every account; backing off"
                );
            }
            Ok(out) => {
                delay = QUOTA_REFRESH_STEADY;
                tracing::debug!(
                    total = out.total,
                    succeeded = out.succeeded,
                    failed = out.failed,
                    "quota refresh pass complete"
                );
            }
            Err(err) => {
                delay = next_backoff(delay);
                tracing::warn!(next_secs = delay.as_secs(), "quota refresh pass errored: {err}");
            }
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(QUOTA_REFRESH_BACKOFF_CAP)
}

/// Group resolved redirect URIs into host:port listeners with the callback
/// paths each one must serve.
fn callback_bindings(redirect_uris: &[String]) -> AppResult<Vec<(String, Vec<String>)>> {
    let mut bindings: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for raw in redirect_uris {
        let url = reqwest::Url::parse(raw)
            .map_err(|err| AppError::validation(format!("invalid oauth redirect uri {raw}: {err}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| AppError::validation(format!("oauth redirect uri missing host: {raw}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| AppError::validation(format!("oauth redirect uri missing port: {raw}")))?;
        let path = if url.path().is_empty() {
            "/".to_string()
        } else {
            url.path().to_string()
        };
        bindings
            .entry(format!("{host}:{port}"))
            .or_default()
            .insert(path);
    }

    Ok(bindings
        .into_iter()
        .map(|(authority, paths)| (authority, paths.into_iter().collect()))
        .collect())
}
