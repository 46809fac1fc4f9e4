//! Durable storage for the stored code and content versions

use crate::error::{Result, WarmerError};
use crate::models::VersionKey;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Key/value store for version fingerprints.
///
/// Implementations must read the authoritative value on every `get`; a cached
/// read could hide a deploy and skip the flush or the warmup.
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn get(&self, key: VersionKey) -> Result<Option<String>>;

    async fn set(&self, key: VersionKey, value: &str) -> Result<()>;
}

/// Version store backed by a JSON object on disk
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileVersionStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(WarmerError::VersionStoreError(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            WarmerError::VersionStoreError(format!(
                "Failed to parse {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let store_err = |e: std::io::Error| {
            WarmerError::VersionStoreError(format!(
                "Failed to write {}: {}",
                self.path.display(),
                e
            ))
        };

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(store_err)?;

        let json = serde_json::to_string_pretty(values)
            .map_err(|e| WarmerError::VersionStoreError(format!("Failed to encode: {}", e)))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(store_err)?;
        tmp.write_all(json.as_bytes()).map_err(store_err)?;
        tmp.persist(&self.path).map_err(|e| store_err(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl VersionStore for FileVersionStore {
    async fn get(&self, key: VersionKey) -> Result<Option<String>> {
        Ok(self.read_all()?.get(key.as_str()).cloned())
    }

    async fn set(&self, key: VersionKey, value: &str) -> Result<()> {
        let mut values = self.read_all()?;
        values.insert(key.as_str().to_string(), value.to_string());
        self.write_all(&values)?;
        debug!("Stored {} in {}", key, self.path.display());
        Ok(())
    }
}

/// Process-local version store, for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    values: Mutex<HashMap<VersionKey, String>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with both versions
    pub fn with_versions(code: Option<&str>, content: Option<&str>) -> Self {
        let store = Self::new();
        {
            let mut values = store.values.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(code) = code {
                values.insert(VersionKey::CacheCode, code.to_string());
            }
            if let Some(content) = content {
                values.insert(VersionKey::StaticContent, content.to_string());
            }
        }
        store
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn get(&self, key: VersionKey) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        Ok(values.get(&key).cloned())
    }

    async fn set(&self, key: VersionKey, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(key, value.to_string());
        Ok(())
    }
}
