//! Object store capability.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Object store failure.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Flat key → bytes storage with per-object tags.
///
/// Tags travel with the object for operational inspection (owner, per-IP
/// access times) and are never read back by the core.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObjectStoreError>;

    /// Store an object, replacing body and tags.
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        tags: &[(String, String)],
    ) -> Result<(), ObjectStoreError>;
}

// ── In-memory store ───────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct StoredObject {
    body: Vec<u8>,
    tags: Vec<(String, String)>,
}

/// In-memory object store for tests and single-node development.
///
/// `fail_next` makes the next operation return a backend error, which is
/// how the failure-semantics tests exercise the "remote store down" path.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    fail_next: Mutex<bool>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `get` or `put` fail with a backend error.
    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }

    /// Tags currently attached to `key`.
    pub fn tags(&self, key: &str) -> Option<Vec<(String, String)>> {
        self.objects.lock().get(key).map(|o| o.tags.clone())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    fn check_fail(&self) -> Result<(), ObjectStoreError> {
        let mut fail = self.fail_next.lock();
        if *fail {
            *fail = false;
            return Err(ObjectStoreError::Backend("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        self.check_fail()?;
        Ok(self.objects.lock().get(key).map(|o| o.body.clone()))
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        tags: &[(String, String)],
    ) -> Result<(), ObjectStoreError> {
        self.check_fail()?;
        self.objects.lock().insert(
            key.to_string(),
            StoredObject {
                body,
                tags: tags.to_vec(),
            },
        );
        Ok(())
    }
}

// ── Filesystem store ──────────────────────────────────────────────

/// Sidecar format for object tags.
#[derive(Debug, Serialize, Deserialize)]
struct TagFile {
    tags: Vec<(String, String)>,
}

/// Object store over a local directory.
///
/// Bodies live at `<root>/<key>`, tags in a `<key>.tags` JSON sidecar.
/// Keys are hex digests produced by the credential store, so no path
/// traversal handling is needed beyond rejecting separators.
#[derive(Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`. The directory must already exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        if key.contains('/') || key.contains("..") {
            return Err(ObjectStoreError::Backend(format!("invalid key: {key}")));
        }
        Ok(self.root.join(key))
    }

    fn tag_path(path: &Path) -> PathBuf {
        let mut p = path.as_os_str().to_owned();
        p.push(".tags");
        PathBuf::from(p)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        tags: &[(String, String)],
    ) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        tokio::fs::write(&path, body).await?;

        let tag_file = TagFile {
            tags: tags.to_vec(),
        };
        let encoded = serde_json::to_vec(&tag_file)
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;
        tokio::fs::write(Self::tag_path(&path), encoded).await?;
        Ok(())
    }
}
