//! Sled-backed snapshot storage with compare-and-swap writes

use super::{StateBackend, VersionedSnapshot};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, error, info};

/// Sled-based snapshot backend.
///
/// Each deployment maps to one value: an 8-byte big-endian version prefix
/// followed by the snapshot bytes. Conditional writes go through sled's
/// `compare_and_swap`, so the version check and the replacement are one
/// atomic step.
pub struct SledStateBackend {
    db: sled::Db,
    snapshots: sled::Tree,
}

const VERSION_PREFIX: usize = 8;

fn encode(version: u64, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(VERSION_PREFIX + data.len());
    buf.extend_from_slice(&version.to_be_bytes());
    buf.extend_from_slice(data);
    buf
}

fn decode(raw: &[u8]) -> Result<VersionedSnapshot> {
    if raw.len() < VERSION_PREFIX {
        return Err(Error::Validation(
            "stored snapshot shorter than its version prefix".to_string(),
        ));
    }
    let mut version = [0u8; VERSION_PREFIX];
    version.copy_from_slice(&raw[..VERSION_PREFIX]);
    Ok(VersionedSnapshot {
        version: u64::from_be_bytes(version),
        data: raw[VERSION_PREFIX..].to_vec(),
    })
}

impl SledStateBackend {
    /// Open (or create) a snapshot database at the given path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening snapshot database at {:?}", path);
        let db = sled::open(path)?;
        let snapshots = db.open_tree("snapshots")?;

        Ok(Self { db, snapshots })
    }

    /// Create an in-memory backend (for testing).
    pub async fn in_memory() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let snapshots = db.open_tree("snapshots")?;
        Ok(Self { db, snapshots })
    }
}

#[async_trait]
impl StateBackend for SledStateBackend {
    async fn read(&self, deployment: &str) -> Result<Option<VersionedSnapshot>> {
        debug!("Reading snapshot for deployment '{}'", deployment);

        match self.snapshots.get(deployment.as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, deployment: &str, data: &[u8], expected: Option<u64>) -> Result<u64> {
        let current = self.snapshots.get(deployment.as_bytes())?;

        let (old, new_version) = match (expected, &current) {
            (None, None) => (None, 1),
            (None, Some(raw)) => {
                let stored = decode(raw)?;
                return Err(Error::Conflict {
                    expected: 0,
                    actual: stored.version,
                });
            }
            (Some(v), Some(raw)) => {
                let stored = decode(raw)?;
                if stored.version != v {
                    return Err(Error::Conflict {
                        expected: v,
                        actual: stored.version,
                    });
                }
                (Some(raw.clone()), v + 1)
            }
            (Some(v), None) => {
                return Err(Error::Conflict {
                    expected: v,
                    actual: 0,
                });
            }
        };

        debug!(
            "Writing snapshot version {} for deployment '{}'",
            new_version, deployment
        );

        let swapped = self.snapshots.compare_and_swap(
            deployment.as_bytes(),
            old,
            Some(encode(new_version, data)),
        )?;
        if let Err(cas) = swapped {
            // Someone raced us between the read and the swap
            let actual = match cas.current {
                Some(raw) => decode(&raw)?.version,
                None => 0,
            };
            return Err(Error::Conflict {
                expected: expected.unwrap_or(0),
                actual,
            });
        }

        self.snapshots.flush_async().await?;
        Ok(new_version)
    }

    async fn delete(&self, deployment: &str) -> Result<()> {
        debug!("Deleting snapshot for deployment '{}'", deployment);
        self.snapshots.remove(deployment.as_bytes())?;
        self.snapshots.flush_async().await?;
        Ok(())
    }
}

impl Drop for SledStateBackend {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            error!("Failed to flush snapshot database on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_create_then_update() {
        let backend = SledStateBackend::in_memory().await.unwrap();

        assert!(backend.read("dev").await.unwrap().is_none());

        let v1 = backend.write("dev", b"{\"a\":1}", None).await.unwrap();
        assert_eq!(v1, 1);

        let snap = backend.read("dev").await.unwrap().unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.data, b"{\"a\":1}");

        let v2 = backend.write("dev", b"{\"a\":2}", Some(1)).await.unwrap();
        assert_eq!(v2, 2);
    }

    #[smol_potat::test]
    async fn test_stale_version_conflicts() {
        let backend = SledStateBackend::in_memory().await.unwrap();
        backend.write("dev", b"one", None).await.unwrap();
        backend.write("dev", b"two", Some(1)).await.unwrap();

        // A writer still holding version 1 must not clobber version 2
        let err = backend.write("dev", b"stale", Some(1)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict {
                expected: 1,
                actual: 2
            }
        ));

        // Create-if-absent against an existing snapshot conflicts too
        let err = backend.write("dev", b"fresh", None).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[smol_potat::test]
    async fn test_persistence_across_reopen() {
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let db_path = dir.path().join("state.db");

        {
            let backend = SledStateBackend::new(&db_path).await.unwrap();
            backend.write("dev", b"persisted", None).await.unwrap();
        }

        {
            let backend = SledStateBackend::new(&db_path).await.unwrap();
            let snap = backend.read("dev").await.unwrap().unwrap();
            assert_eq!(snap.version, 1);
            assert_eq!(snap.data, b"persisted");
        }
    }

    #[smol_potat::test]
    async fn test_delete_is_idempotent() {
        let backend = SledStateBackend::in_memory().await.unwrap();
        backend.write("dev", b"doc", None).await.unwrap();
        backend.delete("dev").await.unwrap();
        backend.delete("dev").await.unwrap();
        assert!(backend.read("dev").await.unwrap().is_none());

        // Version restarts after delete; the registry's id counters are
        // what protect against stale-id races, not the snapshot version.
        assert_eq!(backend.write("dev", b"doc2", None).await.unwrap(), 1);
    }
}
