//! Detection of out-of-band tampering with protected session data.
//!
//! A snapshot is taken at clean shutdown and compared at the next startup.
//! A mismatch is advisory: it is reported to the host and never blocks an
//! unlock or triggers destruction.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::partition::Partition;
use crate::clock::Clock;
use crate::error::Result;
use crate::storage::{keys, StateStore};

/// Per-partition SHA-256 digests, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHashSnapshot {
    pub per_partition_digest: BTreeMap<String, String>,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PartitionStatus {
    Match,
    Mismatch,
    /// Not present in the previous snapshot.
    New,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionCheck {
    pub name: String,
    pub status: PartitionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// No previous snapshot existed; trivially verified.
    pub first_run: bool,
    pub partitions: Vec<PartitionCheck>,
}

impl IntegrityReport {
    /// Names of partitions whose contents changed since the snapshot.
    pub fn mismatched(&self) -> Vec<String> {
        self.partitions
            .iter()
            .filter(|p| p.status == PartitionStatus::Mismatch)
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.partitions
            .iter()
            .all(|p| p.status != PartitionStatus::Mismatch)
    }
}

/// Computes, persists and verifies [`SessionHashSnapshot`]s.
pub struct SessionIntegrityGuard {
    store: Arc<StateStore>,
    clock: Arc<dyn Clock>,
}

impl SessionIntegrityGuard {
    pub fn new(store: Arc<StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Hash every partition.
    ///
    /// Files are visited in lexicographic order; each contributes its
    /// relative path and contents. Unreadable files are skipped, symlinks
    /// are not followed.
    pub fn snapshot(&self, partitions: &[Partition]) -> SessionHashSnapshot {
        let per_partition_digest = partitions
            .iter()
            .map(|p| (p.name.clone(), hex::encode(digest_partition(&p.path))))
            .collect();

        SessionHashSnapshot {
            per_partition_digest,
            taken_at: self.clock.now(),
        }
    }

    /// Compare the current contents against `previous`.
    pub fn verify(
        &self,
        partitions: &[Partition],
        previous: Option<&SessionHashSnapshot>,
    ) -> IntegrityReport {
        let Some(previous) = previous else {
            debug!("No previous integrity snapshot, treating as first run");
            return IntegrityReport {
                first_run: true,
                partitions: Vec::new(),
            };
        };

        let current = self.snapshot(partitions);
        let partitions = current
            .per_partition_digest
            .iter()
            .map(|(name, digest)| {
                let status = match previous.per_partition_digest.get(name) {
                    None => PartitionStatus::New,
                    Some(old) if old == digest => PartitionStatus::Match,
                    Some(_) => PartitionStatus::Mismatch,
                };
                PartitionCheck {
                    name: name.clone(),
                    status,
                }
            })
            .collect();

        let report = IntegrityReport {
            first_run: false,
            partitions,
        };
        if report.is_clean() {
            info!("Session integrity verified");
        } else {
            warn!(
                "Session data changed while the app was closed: {:?}",
                report.mismatched()
            );
        }
        report
    }

    /// Verify against the persisted snapshot.
    pub fn verify_stored(&self, partitions: &[Partition]) -> Result<IntegrityReport> {
        let previous = self.load_snapshot()?;
        Ok(self.verify(partitions, previous.as_ref()))
    }

    /// Take a snapshot and persist it.
    pub fn record_snapshot(&self, partitions: &[Partition]) -> Result<SessionHashSnapshot> {
        let snapshot = self.snapshot(partitions);
        self.store.set(keys::SESSION_HASHES, &snapshot)?;
        debug!("Recorded integrity snapshot for {} partitions", partitions.len());
        Ok(snapshot)
    }

    pub fn load_snapshot(&self) -> Result<Option<SessionHashSnapshot>> {
        self.store.get(keys::SESSION_HASHES)
    }

    /// Forget the persisted snapshot.
    pub fn invalidate(&self) -> Result<()> {
        self.store.remove(keys::SESSION_HASHES)
    }
}

fn digest_partition(root: &Path) -> [u8; 32] {
    let mut hasher = Sha256::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file());

    for entry in walker {
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        // Forward slashes keep digests stable across platforms.
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        match hash_file(entry.path()) {
            Ok(content) => {
                hasher.update((relative.len() as u64).to_le_bytes());
                hasher.update(relative.as_bytes());
                hasher.update(content);
            }
            Err(e) => debug!("Skipping unreadable file {:?}: {}", entry.path(), e),
        }
    }

    hasher.finalize().into()
}

fn hash_file(path: &Path) -> io::Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().into())
}
