//! Usage: Self-control endpoints' backing: info, delayed graceful shutdown,
//! spawn-then-exit restart.

use crate::shared::error::{AppError, AppResult};
use crate::shared::mutex_ext::MutexExt;
use serde::Serialize;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// Delay before the bound servers are told to stop, so the shutdown
/// response itself can flush.
const SHUTDOWN_KICKOFF_DELAY: Duration = Duration::from_millis(150);
/// In-flight requests get this long to drain before the process exits.
pub const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct DaemonInfo {
    pub pid: u32,
    pub addr: String,
    pub public_base_url: String,
    pub restart_supported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_restart_cmd: Option<String>,
}

struct ControllerInner {
    shutting_down: bool,
    shutdown_txs: Vec<oneshot::Sender<()>>,
}

pub struct DaemonController {
    addr: String,
    public_base_url: String,
    default_restart_cmd: Option<String>,
    inner: Mutex<ControllerInner>,
    shutdown_watch: watch::Sender<bool>,
}

impl DaemonController {
    pub fn new(addr: &str, public_base_url: &str, restart_cmd: Option<String>) -> Self {
        let default_restart_cmd = restart_cmd
            .map(|cmd| cmd.trim().to_string())
            .filter(|cmd| !cmd.is_empty())
            .or_else(|| derive_default_restart_cmd(addr, public_base_url));

        let (shutdown_watch, _) = watch::channel(false);
        Self {
            addr: addr.to_string(),
            public_base_url: public_base_url.to_string(),
            default_restart_cmd,
            inner: Mutex::new(ControllerInner {
                shutting_down: false,
                shutdown_txs: Vec::new(),
            }),
            shutdown_watch,
        }
    }

    /// Register one bound server; its graceful-shutdown future resolves when
    /// `shutdown` fires.
    pub fn register_server(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock_or_recover().shutdown_txs.push(tx);
        rx
    }

    /// Observers (the drain-deadline watchdog) see `true` once shutdown has
    /// been initiated.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_watch.subscribe()
    }

    pub fn info(&self) -> DaemonInfo {
        DaemonInfo {
            pid: std::process::id(),
            addr: self.addr.clone(),
            public_base_url: self.public_base_url.clone(),
            restart_supported: self.default_restart_cmd.is_some(),
            default_restart_cmd: self.default_restart_cmd.clone(),
        }
    }

    /// Idempotent: the first call schedules the stop, later calls are no-ops.
    pub fn shutdown(&self) -> AppResult<()> {
        let txs = {
            let mut inner = self.inner.lock_or_recover();
            if inner.shutting_down {
                return Ok(());
            }
            inner.shutting_down = true;
            std::mem::take(&mut inner.shutdown_txs)
        };

        let watch_tx = self.shutdown_watch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SHUTDOWN_KICKOFF_DELAY).await;
            tracing::info!("stopping bound servers");
            for tx in txs {
                let _ = tx.send(());
            }
            let _ = watch_tx.send(true);
        });
        Ok(())
    }

    /// Spawn the replacement process, then shut this one down.
    pub fn restart(&self, start_cmd: &str) -> AppResult<()> {
        let cmd_str = Some(start_cmd.trim())
            .filter(|cmd| !cmd.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_restart_cmd.clone())
            .ok_or_else(|| {
                AppError::internal(
                    "restart command is empty; provide start_cmd or run the daemon with --restart-cmd",
                )
            })?;

        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.args(["/C", &cmd_str]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", &cmd_str]);
            c
        };
        command
            .spawn()
            .map_err(|err| AppError::internal(format!("failed to start replacement daemon: {err}")))?;

        tracing::info!(cmd = %cmd_str, "replacement daemon spawned");
        self.shutdown()
    }
}

/// Self-restart needs a stable executable path; binaries under the OS temp
/// directory are ephemeral builds and cannot restart themselves.
fn derive_default_restart_cmd(addr: &str, public_base_url: &str) -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    if exe.starts_with(std::env::temp_dir()) {
        return None;
    }
    Some(format!(
        "\"{}\" --addr {addr} --public-base-url {public_base_url}",
        exe.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_reports_pid_and_addresses() {
        let ctrl = DaemonController::new(
            "127.0.0.1:7777",
            "http://localhost:7777",
            Some("run-me --addr x".to_string()),
        );
        let info = ctrl.info();

        assert_eq!(info.pid, std::process::id());
        assert_eq!(info.addr, "127.0.0.1:7777");
        assert!(info.restart_supported);
        assert_eq!(info.default_restart_cmd.as_deref(), Some("run-me --addr x"));
    }

    #[tokio::test]
    async fn shutdown_fires_registered_servers_once() {
        let ctrl = DaemonController::new("127.0.0.1:0", "http://localhost:0", None);
        let rx = ctrl.register_server();
        let mut watch_rx = ctrl.subscribe_shutdown();

        ctrl.shutdown().unwrap();
        ctrl.shutdown().unwrap();

        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("shutdown signal within deadline")
            .expect("sender fired");
        tokio::time::timeout(Duration::from_secs(2), watch_rx.changed())
            .await
            .expect("watch flip within deadline")
            .expect("watch alive");
        assert!(*watch_rx.borrow());
    }

    #[tokio::test]
    async fn restart_requires_some_command() {
        let ctrl = DaemonController {
            addr: "127.0.0.1:0".to_string(),
            public_base_url: "http://localhost:0".to_string(),
            default_restart_cmd: None,
            inner: Mutex::new(ControllerInner {
                shutting_down: false,
                shutdown_txs: Vec::new(),
            }),
            shutdown_watch: watch::channel(false).0,
        };

        let err = ctrl.restart("").unwrap_err();
        assert!(err.to_string().contains("restart command is empty"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restart_spawns_command_then_shuts_down() {
        let ctrl = DaemonController::new("127.0.0.1:0", "http://localhost:0", None);
        let rx = ctrl.register_server();

        ctrl.restart("true").unwrap();

        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("shutdown follows restart")
            .expect("sender fired");
    }
}
