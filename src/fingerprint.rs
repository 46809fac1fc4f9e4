//! Code and static content version fingerprints

use crate::error::{Result, WarmerError};
use crate::models::VersionKey;
use crate::version_store::VersionStore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reads the current fingerprints from disk and the stored ones from the
/// version store
pub struct Fingerprinter {
    lock_file: PathBuf,
    content_marker: PathBuf,
    store: Arc<dyn VersionStore>,
}

/// Current and stored fingerprints for both axes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSnapshot {
    pub current_code: String,
    pub stored_code: Option<String>,
    pub current_content: String,
    pub stored_content: Option<String>,
}

/// Which axes changed since the last recorded run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionDelta {
    pub code_changed: bool,
    pub content_changed: bool,
}

impl VersionSnapshot {
    /// Plain string inequality; a missing stored value always differs
    pub fn delta(&self) -> VersionDelta {
        VersionDelta {
            code_changed: self.stored_code.as_deref() != Some(self.current_code.as_str()),
            content_changed: self.stored_content.as_deref()
                != Some(self.current_content.as_str()),
        }
    }
}

impl Fingerprinter {
    pub fn new(
        lock_file: impl Into<PathBuf>,
        content_marker: impl Into<PathBuf>,
        store: Arc<dyn VersionStore>,
    ) -> Self {
        Fingerprinter {
            lock_file: lock_file.into(),
            content_marker: content_marker.into(),
            store,
        }
    }

    /// Lowercase hex SHA-256 of the dependency lock file
    pub fn current_code_version(&self) -> Result<String> {
        let bytes = read_marker(&self.lock_file)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Raw contents of the deployed static content marker
    pub fn current_content_version(&self) -> Result<String> {
        let bytes = read_marker(&self.content_marker)?;
        String::from_utf8(bytes).map_err(|e| {
            WarmerError::FingerprintError(format!(
                "{} is not valid UTF-8: {}",
                self.content_marker.display(),
                e
            ))
        })
    }

    pub async fn stored_code_version(&self) -> Result<Option<String>> {
        self.store.get(VersionKey::CacheCode).await
    }

    pub async fn stored_content_version(&self) -> Result<Option<String>> {
        self.store.get(VersionKey::StaticContent).await
    }

    /// Read all four fingerprints
    pub async fn snapshot(&self) -> Result<VersionSnapshot> {
        Ok(VersionSnapshot {
            current_code: self.current_code_version()?,
            current_content: self.current_content_version()?,
            stored_code: self.stored_code_version().await?,
            stored_content: self.stored_content_version().await?,
        })
    }
}

fn read_marker(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        WarmerError::FingerprintError(format!("Failed to read {}: {}", path.display(), e))
    })
}
