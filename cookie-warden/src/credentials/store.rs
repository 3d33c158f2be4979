//! In-memory credential ownership and durable persistence.
//!
//! [`CredentialStore`] is the only place a target's credential lives. Readers
//! take an `Arc` snapshot; writers swap the whole value, so a reader sees
//! either the old or the new credential and never a mix. Every swap bumps a
//! generation counter that callers use to detect a concurrent refresh.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::error::CredentialError;
use super::types::Credential;

/// Durable storage for a target's credential.
#[async_trait]
pub trait CredentialPersistence: Send + Sync {
    /// Load the stored credential, `None` when nothing was saved yet.
    async fn load(&self, target_id: &str) -> Result<Option<Credential>, CredentialError>;

    /// Replace the stored credential.
    async fn save(&self, credential: &Credential) -> Result<(), CredentialError>;
}

/// One cookie file per target: `{dir}/{target_id}.cookie`.
///
/// The file holds a single `Cookie` header line with the refresh token
/// embedded as a pseudo-cookie.
#[derive(Debug, Clone)]
pub struct FileCredentialPersistence {
    dir: PathBuf,
}

impl FileCredentialPersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, target_id: &str) -> PathBuf {
        self.dir.join(format!("{target_id}.cookie"))
    }
}

fn write_atomically(dir: &Path, path: &Path, contents: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl CredentialPersistence for FileCredentialPersistence {
    async fn load(&self, target_id: &str) -> Result<Option<Credential>, CredentialError> {
        let path = self.path_for(target_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CredentialError::Persistence(format!(
                    "read {}: {e}",
                    path.display()
                )));
            }
        };

        // Newline-separated pairs are accepted as well as a single header line.
        let header = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        if header.is_empty() {
            return Ok(None);
        }

        let mut credential = Credential::from_cookie_header(target_id, &header);
        if let Ok(modified) = tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
            credential.updated_at = modified.into();
        }
        Ok(Some(credential))
    }

    async fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let dir = self.dir.clone();
        let path = self.path_for(&credential.target_id);
        let line = credential.to_persisted_line();

        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, &line))
            .await
            .map_err(|e| CredentialError::Persistence(e.to_string()))?
            .map_err(|e| CredentialError::Persistence(e.to_string()))?;

        debug!(target_id = %credential.target_id, "Cookie file written");
        Ok(())
    }
}

/// Owner of the current credential for one target.
pub struct CredentialStore {
    target_id: String,
    current: RwLock<Arc<Credential>>,
    generation: AtomicU64,
    /// Set when the in-memory value is ahead of durable storage.
    dirty: AtomicBool,
    persistence: Option<Arc<dyn CredentialPersistence>>,
}

impl CredentialStore {
    pub fn new(credential: Credential, persistence: Option<Arc<dyn CredentialPersistence>>) -> Self {
        Self {
            target_id: credential.target_id.clone(),
            current: RwLock::new(Arc::new(credential)),
            generation: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
            persistence,
        }
    }

    /// Load the persisted credential for `target_id`.
    ///
    /// Fails with [`CredentialError::NoCredentials`] when nothing is stored.
    pub async fn load(
        target_id: &str,
        persistence: Arc<dyn CredentialPersistence>,
    ) -> Result<Self, CredentialError> {
        let credential = persistence
            .load(target_id)
            .await?
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CredentialError::NoCredentials(target_id.to_string()))?;
        Ok(Self::new(credential, Some(persistence)))
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Current credential.
    pub fn get(&self) -> Arc<Credential> {
        Arc::clone(&self.current.read())
    }

    /// Current credential together with its generation.
    pub fn snapshot(&self) -> (Arc<Credential>, u64) {
        let guard = self.current.read();
        (Arc::clone(&guard), self.generation.load(Ordering::Acquire))
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace the credential. Returns the new generation.
    pub fn set(&self, credential: Credential) -> u64 {
        let mut guard = self.current.write();
        *guard = Arc::new(credential);
        self.dirty.store(true, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Write the current credential to durable storage.
    ///
    /// A failure leaves the in-memory value in place and the store dirty, so
    /// the next successful refresh or keepalive tick writes it again.
    pub async fn persist(&self) -> Result<(), CredentialError> {
        let Some(persistence) = self.persistence.as_ref() else {
            self.dirty.store(false, Ordering::Release);
            return Ok(());
        };

        let (credential, generation) = self.snapshot();
        match persistence.save(&credential).await {
            Ok(()) => {
                // A newer set() keeps the dirty flag.
                if self.generation() == generation {
                    self.dirty.store(false, Ordering::Release);
                }
                Ok(())
            }
            Err(e) => {
                warn!(target_id = %self.target_id, error = %e, "Failed to persist credential");
                self.dirty.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}
