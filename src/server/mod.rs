//! Usage: HTTP front door: router, handlers, CORS, and the process
//! controller behind the daemon endpoints.

pub mod cors;
pub mod daemon_control;
pub mod handlers;
pub mod routes;

use crate::core::manager::Manager;
use crate::oauth::service::OAuthService;
use daemon_control::DaemonController;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared handler state. `oauth` and `daemon` stay optional: endpoints that
/// need an absent collaborator answer 503.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub oauth: Option<Arc<OAuthService>>,
    pub daemon: Option<Arc<DaemonController>>,
    /// Upstream CLI credential file used by the local-import endpoints.
    pub codex_auth_file: PathBuf,
}
