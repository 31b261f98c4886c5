//! Credential persistence.
//!
//! Only [`PersistedCredential`] (access token, token type, user profile)
//! ever reaches storage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::state::CredentialState;
use super::types::PersistedCredential;
use crate::error::Result;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the credential saved by a previous session, if any.
    async fn load(&self) -> Result<Option<PersistedCredential>>;

    async fn save(&self, credential: &PersistedCredential) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Stores the credential as a JSON file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<PersistedCredential>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&raw) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unreadable credential file"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, credential: &PersistedCredential) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec_pretty(credential)?;

        // Write atomically using a temp file
        let temp_path = self.path.with_extension("tmp");
        write_private(&temp_path, &raw).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), "Credential saved");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `raw` to a fresh file readable only by its owner.
async fn write_private(path: &Path, raw: &[u8]) -> std::io::Result<()> {
    // A leftover file would keep its old permissions.
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(raw).await?;
    file.sync_all().await?;
    Ok(())
}

/// In-memory store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<PersistedCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<PersistedCredential> {
        self.slot.lock().clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<PersistedCredential>> {
        Ok(self.slot.lock().clone())
    }

    async fn save(&self, credential: &PersistedCredential) -> Result<()> {
        *self.slot.lock() = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

/// Mirror every credential change into `store` until `cancel` fires.
///
/// A signed-out state clears the store instead of saving an empty token.
pub fn spawn_persistence(
    state: &CredentialState,
    store: Arc<dyn CredentialStore>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = state.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Credential persistence shutting down");
                    break;
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }

                    let persisted = {
                        let snapshot = rx.borrow_and_update();
                        snapshot
                            .is_authenticated()
                            .then(|| PersistedCredential::from(&*snapshot))
                    };

                    let result = match persisted {
                        Some(credential) => store.save(&credential).await,
                        None => store.clear().await,
                    };
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to persist credential (non-fatal)");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::TokenResponse;
    use std::time::Duration;

    #[tokio::test]
    async fn test_file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested").join("auth.json"));

        assert_eq!(store.load().await.unwrap(), None);

        let credential = PersistedCredential {
            access_token: "A".to_string(),
            token_type: "Bearer".to_string(),
            user: None,
        };
        store.save(&credential).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(credential));

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
        // Clearing twice is fine.
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_replaces_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, b"{\"access_token\":\"old\",\"token_type\":\"Bearer\"}").unwrap();
        // Stale temp file from an interrupted save.
        std::fs::write(dir.path().join("auth.tmp"), b"{trunc").unwrap();

        let store = FileCredentialStore::new(&path);
        store
            .save(&PersistedCredential {
                access_token: "new".to_string(),
                token_type: "Bearer".to_string(),
                user: None,
            })
            .await
            .unwrap();

        assert_eq!(store.load().await.unwrap().unwrap().access_token, "new");
        assert!(!dir.path().join("auth.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, b"{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileCredentialStore::new(&path);
        store
            .save(&PersistedCredential {
                access_token: "A".to_string(),
                token_type: "Bearer".to_string(),
                user: None,
            })
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_file_store_ignores_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = FileCredentialStore::new(path);
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_never_writes_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(&path));

        let state = CredentialState::new();
        let cancel = CancellationToken::new();
        let task = spawn_persistence(&state, store.clone(), cancel.clone());

        state.set_token(&TokenResponse {
            access_token: "A".to_string(),
            token_type: Some("Bearer".to_string()),
            refresh_token: Some("secret-refresh".to_string()),
        });

        let mut saved = None;
        for _ in 0..50 {
            if let Ok(raw) = std::fs::read_to_string(&path) {
                if raw.ends_with('}') {
                    saved = Some(raw);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let saved = saved.expect("credential file written");
        assert!(saved.contains("\"access_token\": \"A\""));
        assert!(!saved.contains("secret-refresh"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_persistence_clears_store_on_sign_out() {
        let store = Arc::new(MemoryCredentialStore::new());
        let state = CredentialState::new();
        let cancel = CancellationToken::new();
        let task = spawn_persistence(&state, store.clone(), cancel.clone());

        state.set_token(&TokenResponse::bearer("A"));
        for _ in 0..50 {
            if store.current().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.current().unwrap().access_token, "A");

        state.clear();
        for _ in 0..50 {
            if store.current().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.current().is_none());

        cancel.cancel();
        task.await.unwrap();
    }
}
