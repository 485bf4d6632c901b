//! Trust stores: persistence of trust decisions.
//!
//! A trust store keyed by certificate thumbprint records which peers have
//! been accepted permanently or rejected. The directory-backed store lays
//! certificates out as `trusted/<thumbprint>.der` and
//! `rejected/<thumbprint>.der` with a JSON metadata sidecar, so a decision
//! made in one session is visible to the next.

use crate::certificate::Certificate;
use crate::error::TrustError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Persistent record of trust decisions, keyed by thumbprint.
pub trait TrustStore: Send + Sync {
    /// Returns whether the thumbprint has a persisted accept decision.
    fn is_trusted(&self, thumbprint: &str) -> Result<bool, TrustError>;

    /// Returns whether the thumbprint has a persisted reject decision.
    fn is_rejected(&self, thumbprint: &str) -> Result<bool, TrustError>;

    /// Persists an accept decision; clears any previous rejection.
    fn persist_trusted(&self, certificate: &Certificate) -> Result<(), TrustError>;

    /// Persists a reject decision; clears any previous acceptance.
    fn persist_rejected(&self, certificate: &Certificate) -> Result<(), TrustError>;

    /// Lists the thumbprints with a persisted accept decision.
    fn trusted_thumbprints(&self) -> Result<Vec<String>, TrustError>;
}

/// Metadata sidecar written next to each stored certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMetadata {
    thumbprint: String,
    application_uri: Option<String>,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    added_at: DateTime<Utc>,
}

impl StoredMetadata {
    fn for_certificate(certificate: &Certificate) -> Self {
        Self {
            thumbprint: certificate.thumbprint().to_string(),
            application_uri: certificate.application_uri().map(str::to_string),
            not_before: certificate.not_before(),
            not_after: certificate.not_after(),
            added_at: Utc::now(),
        }
    }
}

/// Filesystem-backed trust store.
///
/// Writes are serialized behind a mutex so concurrent decisions for the
/// same store cannot interleave a move between the trusted and rejected
/// directories.
#[derive(Debug)]
pub struct DirectoryTrustStore {
    trusted_dir: PathBuf,
    rejected_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DirectoryTrustStore {
    /// Opens (creating if needed) a store under `base_dir`.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, TrustError> {
        let base_dir = base_dir.as_ref();
        let store = Self {
            trusted_dir: base_dir.join("trusted"),
            rejected_dir: base_dir.join("rejected"),
            write_lock: Mutex::new(()),
        };
        for dir in [&store.trusted_dir, &store.rejected_dir] {
            std::fs::create_dir_all(dir).map_err(|e| TrustError::StoreIo {
                path: dir.clone(),
                source: e,
            })?;
        }
        tracing::info!(base_dir = %base_dir.display(), "Opened trust store");
        Ok(store)
    }

    pub fn trusted_dir(&self) -> &Path {
        &self.trusted_dir
    }

    pub fn rejected_dir(&self) -> &Path {
        &self.rejected_dir
    }

    fn der_path(dir: &Path, thumbprint: &str) -> PathBuf {
        dir.join(format!("{}.der", thumbprint))
    }

    fn meta_path(dir: &Path, thumbprint: &str) -> PathBuf {
        dir.join(format!("{}.json", thumbprint))
    }

    fn write_entry(&self, dir: &Path, certificate: &Certificate) -> Result<(), TrustError> {
        let der_path = Self::der_path(dir, certificate.thumbprint());
        std::fs::write(&der_path, certificate.der()).map_err(|e| TrustError::StoreIo {
            path: der_path,
            source: e,
        })?;

        let meta_path = Self::meta_path(dir, certificate.thumbprint());
        let metadata = StoredMetadata::for_certificate(certificate);
        let json =
            serde_json::to_string_pretty(&metadata).map_err(|e| TrustError::StoreCorrupt {
                path: meta_path.clone(),
                detail: e.to_string(),
            })?;
        std::fs::write(&meta_path, json).map_err(|e| TrustError::StoreIo {
            path: meta_path,
            source: e,
        })
    }

    fn remove_entry(dir: &Path, thumbprint: &str) {
        // Best-effort cleanup of the opposite decision.
        let _ = std::fs::remove_file(Self::der_path(dir, thumbprint));
        let _ = std::fs::remove_file(Self::meta_path(dir, thumbprint));
    }
}

impl TrustStore for DirectoryTrustStore {
    fn is_trusted(&self, thumbprint: &str) -> Result<bool, TrustError> {
        Ok(Self::der_path(&self.trusted_dir, thumbprint).exists())
    }

    fn is_rejected(&self, thumbprint: &str) -> Result<bool, TrustError> {
        Ok(Self::der_path(&self.rejected_dir, thumbprint).exists())
    }

    fn persist_trusted(&self, certificate: &Certificate) -> Result<(), TrustError> {
        let _guard = self.write_lock.lock();
        self.write_entry(&self.trusted_dir, certificate)?;
        Self::remove_entry(&self.rejected_dir, certificate.thumbprint());
        tracing::info!(
            thumbprint = certificate.thumbprint(),
            "Persisted trusted certificate"
        );
        Ok(())
    }

    fn persist_rejected(&self, certificate: &Certificate) -> Result<(), TrustError> {
        let _guard = self.write_lock.lock();
        self.write_entry(&self.rejected_dir, certificate)?;
        Self::remove_entry(&self.trusted_dir, certificate.thumbprint());
        tracing::info!(
            thumbprint = certificate.thumbprint(),
            "Persisted rejected certificate"
        );
        Ok(())
    }

    fn trusted_thumbprints(&self) -> Result<Vec<String>, TrustError> {
        let entries = std::fs::read_dir(&self.trusted_dir).map_err(|e| TrustError::StoreIo {
            path: self.trusted_dir.clone(),
            source: e,
        })?;
        let mut thumbprints = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TrustError::StoreIo {
                path: self.trusted_dir.clone(),
                source: e,
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(thumbprint) = name.strip_suffix(".der") {
                thumbprints.push(thumbprint.to_string());
            }
        }
        Ok(thumbprints)
    }
}

/// In-memory trust store for tests.
#[derive(Debug, Default)]
pub struct MemoryTrustStore {
    trusted: Mutex<HashSet<String>>,
    rejected: Mutex<HashSet<String>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrustStore for MemoryTrustStore {
    fn is_trusted(&self, thumbprint: &str) -> Result<bool, TrustError> {
        Ok(self.trusted.lock().contains(thumbprint))
    }

    fn is_rejected(&self, thumbprint: &str) -> Result<bool, TrustError> {
        Ok(self.rejected.lock().contains(thumbprint))
    }

    fn persist_trusted(&self, certificate: &Certificate) -> Result<(), TrustError> {
        let thumbprint = certificate.thumbprint().to_string();
        self.rejected.lock().remove(&thumbprint);
        self.trusted.lock().insert(thumbprint);
        Ok(())
    }

    fn persist_rejected(&self, certificate: &Certificate) -> Result<(), TrustError> {
        let thumbprint = certificate.thumbprint().to_string();
        self.trusted.lock().remove(&thumbprint);
        self.rejected.lock().insert(thumbprint);
        Ok(())
    }

    fn trusted_thumbprints(&self) -> Result<Vec<String>, TrustError> {
        Ok(self.trusted.lock().iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::test_der;

    fn cert(content: &[u8]) -> Certificate {
        Certificate::from_der(test_der(content)).unwrap()
    }

    #[test]
    fn test_directory_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryTrustStore::open(dir.path()).unwrap();
        let certificate = cert(b"robot-cell-3");

        assert!(!store.is_trusted(certificate.thumbprint()).unwrap());
        store.persist_trusted(&certificate).unwrap();
        assert!(store.is_trusted(certificate.thumbprint()).unwrap());

        // The decision survives a fresh open of the same directory.
        let reopened = DirectoryTrustStore::open(dir.path()).unwrap();
        assert!(reopened.is_trusted(certificate.thumbprint()).unwrap());
        assert_eq!(
            reopened.trusted_thumbprints().unwrap(),
            vec![certificate.thumbprint().to_string()]
        );
    }

    #[test]
    fn test_decision_flip_clears_opposite() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryTrustStore::open(dir.path()).unwrap();
        let certificate = cert(b"hmi-panel");

        store.persist_rejected(&certificate).unwrap();
        assert!(store.is_rejected(certificate.thumbprint()).unwrap());

        store.persist_trusted(&certificate).unwrap();
        assert!(store.is_trusted(certificate.thumbprint()).unwrap());
        assert!(!store.is_rejected(certificate.thumbprint()).unwrap());
    }

    #[test]
    fn test_metadata_sidecar_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryTrustStore::open(dir.path()).unwrap();
        let certificate = cert(b"scada").with_application_uri("urn:plant:scada");
        store.persist_trusted(&certificate).unwrap();

        let meta_path = dir
            .path()
            .join("trusted")
            .join(format!("{}.json", certificate.thumbprint()));
        let json = std::fs::read_to_string(meta_path).unwrap();
        let metadata: StoredMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(metadata.thumbprint, certificate.thumbprint());
        assert_eq!(metadata.application_uri.as_deref(), Some("urn:plant:scada"));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTrustStore::new();
        let certificate = cert(b"test");
        store.persist_trusted(&certificate).unwrap();
        assert!(store.is_trusted(certificate.thumbprint()).unwrap());
        store.persist_rejected(&certificate).unwrap();
        assert!(!store.is_trusted(certificate.thumbprint()).unwrap());
        assert!(store.is_rejected(certificate.thumbprint()).unwrap());
    }

    #[test]
    fn test_concurrent_persist_same_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(DirectoryTrustStore::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let certificate = cert(format!("writer-{}", i).as_bytes());
                    store.persist_trusted(&certificate).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.trusted_thumbprints().unwrap().len(), 8);
    }
}
