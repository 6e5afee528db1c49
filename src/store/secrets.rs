//! Usage: Per-account credential blobs behind the platform protect seam.

use crate::domain::accounts::AuthSecrets;
use crate::shared::error::{AppError, AppResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

pub trait SecretStore: Send + Sync {
    fn put(&self, account_id: &str, secrets: &AuthSecrets) -> AppResult<()>;
    fn get(&self, account_id: &str) -> AppResult<AuthSecrets>;
    fn delete(&self, account_id: &str) -> AppResult<()>;
}

/// Platform-native at-rest encryption. The concrete implementation is an
/// external collaborator; the default passes bytes through unchanged and the
/// blob files rely on owner-only permissions.
pub trait SecretCipher: Send + Sync {
    fn protect(&self, plain: &[u8]) -> AppResult<Vec<u8>>;
    fn unprotect(&self, protected: &[u8]) -> AppResult<Vec<u8>>;
}

pub struct PassthroughCipher;

impl SecretCipher for PassthroughCipher {
    fn protect(&self, plain: &[u8]) -> AppResult<Vec<u8>> {
        Ok(plain.to_vec())
    }

    fn unprotect(&self, protected: &[u8]) -> AppResult<Vec<u8>> {
        Ok(protected.to_vec())
    }
}

/// One owner-only blob per account under `secrets/`, named by the URL-safe
/// base64 (no padding) of the raw account id so arbitrary ids stay
/// collision-free and filesystem-safe.
pub struct ProtectedFileStore {
    base_dir: PathBuf,
    cipher: Arc<dyn SecretCipher>,
}

impl ProtectedFileStore {
    pub fn new(base_dir: impl Into<PathBuf>, cipher: Arc<dyn SecretCipher>) -> Self {
        Self {
            base_dir: base_dir.into(),
            cipher,
        }
    }

    pub fn with_default_cipher(base_dir: impl Into<PathBuf>) -> Self {
        Self::new(base_dir, Arc::new(PassthroughCipher))
    }

    fn blob_path(&self, account_id: &str) -> PathBuf {
        let name = URL_SAFE_NO_PAD.encode(account_id.as_bytes());
        self.base_dir.join(format!("{name}.bin"))
    }
}

impl SecretStore for ProtectedFileStore {
    fn put(&self, account_id: &str, secrets: &AuthSecrets) -> AppResult<()> {
        let payload = serde_json::to_vec(secrets)?;
        let protected = self.cipher.protect(&payload)?;
        super::state::create_private_dir(&self.base_dir)?;
        super::state::write_private_atomic(&self.blob_path(account_id), &protected)
    }

    fn get(&self, account_id: &str) -> AppResult<AuthSecrets> {
        let path = self.blob_path(account_id);
        let protected = fs::read(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AppError::not_found(format!("secrets for account {account_id} not found"))
            } else {
                AppError::internal(format!("read secrets {}: {err}", path.display()))
            }
        })?;

        // An unprotect failure usually means key-ring change or on-disk
        // corruption; callers mark the account need_reauth instead of
        // deleting it.
        let payload = self.cipher.unprotect(&protected)?;
        let secrets: AuthSecrets = serde_json::from_slice(&payload).map_err(|err| {
            AppError::internal(format!("decode secrets {}: {err}", path.display()))
        })?;
        Ok(secrets)
    }

    fn delete(&self, account_id: &str) -> AppResult<()> {
        match fs::remove_file(self.blob_path(account_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::internal(format!(
                "delete secrets for account {account_id}: {err}"
            ))),
        }
    }
}

pub fn blob_file_name(account_id: &str) -> String {
    format!("{}.bin", URL_SAFE_NO_PAD.encode(account_id.as_bytes()))
}
