//! Policy store adapters.
//!
//! The engine only ever loads a complete [`PolicySnapshot`] at startup and
//! saves a complete snapshot after each mutation. A successful `save` must be
//! durable before it returns.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::models::{PolicyRule, RoleEdge};
use super::postgres::PostgresStore;
use crate::config::{StoreBackend, StoreConfig};
use crate::error::{AuthzError, ErrorCode, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Snapshot
// ═══════════════════════════════════════════════════════════════════════════════

/// The full persisted policy state: role graph edges and policy tuples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    #[serde(default)]
    pub role_edges: Vec<RoleEdge>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl PolicySnapshot {
    pub fn is_empty(&self) -> bool {
        self.role_edges.is_empty() && self.rules.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Load/save boundary between the engine and durable storage.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Read the complete persisted state.
    async fn load(&self) -> Result<PolicySnapshot>;

    /// Replace the persisted state. Returns only once the write is durable.
    async fn save(&self, snapshot: &PolicySnapshot) -> Result<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Open the store selected by configuration.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn PolicyStore>> {
    let store: Arc<dyn PolicyStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => Arc::new(FileStore::new(&config.path)),
        StoreBackend::Postgres => {
            let url = config.url.as_deref().ok_or_else(|| {
                AuthzError::new(
                    ErrorCode::ConfigurationError,
                    "store.url is required for the postgres backend",
                )
            })?;
            let store = PostgresStore::connect(url, config.max_connections).await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
    };

    info!(backend = store.backend(), "Policy store opened");
    Ok(store)
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════════════════════════

/// Process-local store. Durable only for the lifetime of the process; used by
/// tests and single-shot tooling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<PolicySnapshot>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: PolicySnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    /// Make subsequent `load` calls fail.
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `save` calls fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The last successfully saved snapshot.
    pub fn snapshot(&self) -> PolicySnapshot {
        self.snapshot.lock().clone()
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn load(&self) -> Result<PolicySnapshot> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(AuthzError::new(
                ErrorCode::StoreLoadFailed,
                "In-memory store configured to fail loads",
            ));
        }
        Ok(self.snapshot.lock().clone())
    }

    async fn save(&self, snapshot: &PolicySnapshot) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AuthzError::new(
                ErrorCode::StoreUnavailable,
                "In-memory store configured to fail saves",
            ));
        }
        *self.snapshot.lock() = snapshot.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON file store
// ═══════════════════════════════════════════════════════════════════════════════

/// Stores the snapshot as a JSON document.
///
/// Saves write a sibling temp file, fsync it, rename it over the target and
/// then fsync the directory, so a crash leaves either the old or the new
/// document and a returned save survives power loss.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Directory holding the document; `.` for a bare file name.
    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

/// Flush a directory entry change (create, rename) to disk.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

// Directories cannot be opened for syncing here; the rename is the barrier.
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl PolicyStore for FileStore {
    async fn load(&self) -> Result<PolicySnapshot> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!(path = %self.path.display(), "Policy file absent, starting empty");
            return Ok(PolicySnapshot::default());
        }

        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AuthzError::with_internal(
                ErrorCode::StoreLoadFailed,
                "Policy file could not be read",
                format!("{}: {}", self.path.display(), e),
            )
            .with_source(e)
        })?;

        let snapshot: PolicySnapshot = serde_json::from_str(&content).map_err(|e| {
            AuthzError::with_internal(
                ErrorCode::StoreLoadFailed,
                "Policy file is malformed",
                format!("{}: {}", self.path.display(), e),
            )
            .with_source(e)
        })?;

        Ok(snapshot)
    }

    async fn save(&self, snapshot: &PolicySnapshot) -> Result<()> {
        let body = serde_json::to_vec_pretty(snapshot)?;

        let dir = self.dir();
        tokio::fs::create_dir_all(dir).await?;

        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        sync_dir(dir).await.map_err(|e| {
            AuthzError::with_internal(
                ErrorCode::StoreUnavailable,
                "Policy file could not be made durable",
                format!("fsync {}: {}", dir.display(), e),
            )
            .with_source(e)
        })?;

        debug!(
            path = %self.path.display(),
            edges = snapshot.role_edges.len(),
            rules = snapshot.rules.len(),
            "Policy file written"
        );
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::models::Subject;

    fn sample() -> PolicySnapshot {
        PolicySnapshot {
            role_edges: vec![RoleEdge::assignment(42, "user")],
            rules: vec![PolicyRule::new(Subject::role("user"), "course", "read")],
        }
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryStore::new();
        store.save(&sample()).await.unwrap();
        assert_eq!(store.save_count(), 1);

        store.set_fail_saves(true);
        let err = store.save(&PolicySnapshot::default()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StoreUnavailable);
        // Last good snapshot is untouched.
        assert_eq!(store.snapshot(), sample());

        store.set_fail_loads(true);
        assert_eq!(
            store.load().await.unwrap_err().code(),
            ErrorCode::StoreLoadFailed
        );
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("policy.json"));
        assert!(tokio_test::block_on(store.load()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_persists_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("policy.json");
        let store = FileStore::new(&path);

        store.save(&sample()).await.unwrap();
        assert!(path.exists());
        assert!(!store.temp_path().exists());

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.load().await.unwrap(), sample());
    }

    #[tokio::test]
    async fn test_file_store_replaces_document_durably() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("policy.json");
        let store = FileStore::new(&path);
        assert_eq!(store.dir(), dir.path().join("a").join("b"));

        store.save(&sample()).await.unwrap();
        store.save(&PolicySnapshot::default()).await.unwrap();

        assert!(!store.temp_path().exists());
        assert!(FileStore::new(&path).load().await.unwrap().is_empty());
        sync_dir(store.dir()).await.unwrap();
    }

    #[test]
    fn test_file_store_bare_name_uses_current_dir() {
        let store = FileStore::new("policy.json");
        assert_eq!(store.dir(), Path::new("."));
    }

    #[tokio::test]
    async fn test_file_store_rejects_malformed_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, r#"{"rules":[{"subject":"user","resource":"x","action":"y"}]}"#)
            .unwrap();

        let err = FileStore::new(&path).load().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StoreLoadFailed);
    }
}
