//! Usage: Atomic load/save of the account registry document.

use crate::domain::accounts::Registry;
use crate::shared::error::{AppError, AppResult};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

pub trait StateStore: Send + Sync {
    fn load(&self) -> AppResult<Registry>;
    fn save(&self, registry: &Registry) -> AppResult<()>;
}

/// JSON document at a fixed path, written owner-only via a temp file and
/// rename so concurrent readers observe either the old or the new document.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> AppResult<Registry> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Registry::default());
            }
            Err(err) => {
                return Err(AppError::internal(format!(
                    "read registry {}: {err}",
                    self.path.display()
                )));
            }
        };

        let registry: Registry = serde_json::from_slice(&data).map_err(|err| {
            AppError::internal(format!("decode registry {}: {err}", self.path.display()))
        })?;
        Ok(registry)
    }

    fn save(&self, registry: &Registry) -> AppResult<()> {
        let mut stamped = registry.clone();
        stamped.updated_at = Some(Utc::now());

        let payload = serde_json::to_vec_pretty(&stamped)?;
        if let Some(dir) = self.path.parent() {
            create_private_dir(dir)?;
        }
        write_private_atomic(&self.path, &payload)
    }
}

pub fn create_private_dir(dir: &Path) -> AppResult<()> {
    fs::create_dir_all(dir)
        .map_err(|err| AppError::internal(format!("create dir {}: {err}", dir.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
    }
    Ok(())
}

/// Write `payload` owner-only, replacing `path` in one rename.
pub fn write_private_atomic(path: &Path, payload: &[u8]) -> AppResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, payload)
        .map_err(|err| AppError::internal(format!("write {}: {err}", tmp.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600));
    }
    fs::rename(&tmp, path).map_err(|err| {
        let _ = fs::remove_file(&tmp);
        AppError::internal(format!("replace {}: {err}", path.display()))
    })
}
