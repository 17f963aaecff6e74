//! Irreversible destruction of protected session data.
//!
//! Each file gets three passes of CSPRNG output over its current length,
//! synced to disk between passes, before it is unlinked. Nothing here asks
//! for confirmation and there is no dry run: callers must obtain explicit
//! user confirmation before invoking any of these operations.
//!
//! Overwriting gives no guarantee on copy-on-write or wear-levelled storage;
//! it defeats casual recovery, not forensic analysis.

use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::integrity::SessionIntegrityGuard;
use super::partition::Partition;

/// Number of random overwrite passes per file.
pub const OVERWRITE_PASSES: usize = 3;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum EraseError {
    /// Neither the secure path nor the plain-unlink fallback removed the file.
    #[error("Failed to delete {path:?}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Some entries in a partition could not be removed.
    #[error("Partition {path:?} only partially erased: {failed} entries left, first: {first}")]
    Incomplete {
        path: PathBuf,
        failed: usize,
        first: String,
    },

    /// Invalidating the integrity snapshot after a wipe failed.
    #[error("Failed to invalidate integrity snapshot: {0}")]
    Snapshot(String),
}

/// How a single file was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum EraseMethod {
    /// Overwritten with random data, then unlinked.
    Overwritten,
    /// Overwrite failed; the file was only unlinked. Its old blocks may
    /// still be recoverable.
    Unlinked { reason: String },
}

/// Totals for one erased partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EraseReport {
    pub files_overwritten: usize,
    /// Files that fell back to a plain unlink.
    pub files_unlinked: Vec<PathBuf>,
    pub links_removed: usize,
    pub dirs_removed: usize,
}

impl EraseReport {
    fn record(&mut self, path: &Path, method: EraseMethod) {
        match method {
            EraseMethod::Overwritten => self.files_overwritten += 1,
            EraseMethod::Unlinked { .. } => self.files_unlinked.push(path.to_path_buf()),
        }
    }
}

/// Totals for a full wipe, per partition name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WipeReport {
    pub partitions: Vec<(String, EraseReport)>,
}

impl WipeReport {
    pub fn fallback_count(&self) -> usize {
        self.partitions
            .iter()
            .map(|(_, report)| report.files_unlinked.len())
            .sum()
    }
}

/// Overwrites and deletes files and partition directories.
#[derive(Debug, Clone)]
pub struct SecureEraser {
    passes: usize,
}

impl SecureEraser {
    pub fn new() -> Self {
        Self {
            passes: OVERWRITE_PASSES,
        }
    }

    /// Overwrite `path` with random bytes, then unlink it.
    ///
    /// If the overwrite fails (e.g. permissions), the file is unlinked
    /// anyway and `EraseMethod::Unlinked` tells the caller so.
    ///
    /// # Errors
    /// `EraseError::Delete` when the file could not be removed at all.
    pub fn secure_delete_file(&self, path: &Path) -> Result<EraseMethod, EraseError> {
        self.delete_with(path, |p| self.overwrite(p))
    }

    fn delete_with<F>(&self, path: &Path, overwrite: F) -> Result<EraseMethod, EraseError>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        let method = match overwrite(path) {
            Ok(()) => EraseMethod::Overwritten,
            Err(e) => {
                warn!("Overwrite of {:?} failed ({}), falling back to unlink", path, e);
                EraseMethod::Unlinked {
                    reason: e.to_string(),
                }
            }
        };

        remove_file_forcibly(path).map_err(|source| {
            error!("Failed to delete {:?}: {}", path, source);
            EraseError::Delete {
                path: path.to_path_buf(),
                source,
            }
        })?;

        debug!("Erased {:?} ({:?})", path, method);
        Ok(method)
    }

    /// Erase every file below `root` depth-first, then remove the emptied
    /// directories including `root` itself.
    ///
    /// Symlinks are removed without touching their targets. A missing
    /// partition is already erased. Failures do not stop the walk; they are
    /// reported once everything else has been destroyed.
    pub fn secure_delete_partition(&self, root: &Path) -> Result<EraseReport, EraseError> {
        let mut report = EraseReport::default();
        let meta = match fs::symlink_metadata(root) {
            Ok(meta) => meta,
            Err(_) => {
                debug!("Partition {:?} does not exist, nothing to erase", root);
                return Ok(report);
            }
        };
        if meta.file_type().is_symlink() {
            fs::remove_file(root).map_err(|source| EraseError::Delete {
                path: root.to_path_buf(),
                source,
            })?;
            report.links_removed += 1;
            return Ok(report);
        }

        let mut failures: Vec<String> = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .contents_first(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    failures.push(e.to_string());
                    continue;
                }
            };

            let path = entry.path();
            let file_type = entry.file_type();
            let result = if file_type.is_dir() {
                fs::remove_dir(path).map(|()| report.dirs_removed += 1)
            } else if file_type.is_symlink() {
                fs::remove_file(path).map(|()| report.links_removed += 1)
            } else {
                match self.secure_delete_file(path) {
                    Ok(method) => {
                        report.record(path, method);
                        Ok(())
                    }
                    Err(EraseError::Delete { source, .. }) => Err(source),
                    Err(other) => Err(io::Error::other(other.to_string())),
                }
            };

            if let Err(e) = result {
                failures.push(format!("{}: {}", path.display(), e));
            }
        }

        if let Some(first) = failures.first() {
            error!("Partition {:?}: {} entries could not be erased", root, failures.len());
            return Err(EraseError::Incomplete {
                path: root.to_path_buf(),
                failed: failures.len(),
                first: first.clone(),
            });
        }

        info!(
            "Erased partition {:?}: {} overwritten, {} unlinked, {} dirs",
            root,
            report.files_overwritten,
            report.files_unlinked.len(),
            report.dirs_removed
        );
        Ok(report)
    }

    /// Erase every partition and invalidate the integrity snapshot.
    ///
    /// Every partition is attempted even if an earlier one fails; the first
    /// failure is returned afterwards.
    pub fn wipe_all(
        &self,
        partitions: &[Partition],
        integrity: &SessionIntegrityGuard,
    ) -> Result<WipeReport, EraseError> {
        warn!("Wiping {} protected partitions", partitions.len());

        let mut report = WipeReport::default();
        let mut first_error = None;
        for partition in partitions {
            match self.secure_delete_partition(&partition.path) {
                Ok(erased) => report.partitions.push((partition.name.clone(), erased)),
                Err(e) => {
                    error!("Failed to erase partition {}: {}", partition.name, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        // A snapshot from before the wipe describes data that no longer exists.
        integrity
            .invalidate()
            .map_err(|e| EraseError::Snapshot(e.to_string()))?;

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn overwrite(&self, path: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(path)?;
        let len = file.metadata()?.len();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut rng = rand::rng();

        for _ in 0..self.passes {
            file.seek(SeekFrom::Start(0))?;
            let mut remaining = len;
            while remaining > 0 {
                let n = remaining.min(CHUNK_SIZE as u64) as usize;
                rng.fill_bytes(&mut buffer[..n]);
                file.write_all(&buffer[..n])?;
                remaining -= n as u64;
            }
            file.sync_all()?;
        }
        Ok(())
    }
}

impl Default for SecureEraser {
    fn default() -> Self {
        Self::new()
    }
}

/// Unlink `path`, clearing a read-only flag if the first attempt is refused.
fn remove_file_forcibly(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            let mut perms = fs::metadata(path)?.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            fs::set_permissions(path, perms)?;
            fs::remove_file(path)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::clock::SystemClock;
    use crate::storage::StateStore;

    #[test]
    fn test_secure_delete_file_removes_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Cookies");
        fs::write(&path, vec![0x42u8; CHUNK_SIZE * 2 + 17]).unwrap();

        let method = SecureEraser::new().secure_delete_file(&path).unwrap();
        assert_eq!(method, EraseMethod::Overwritten);
        assert!(!path.exists());
    }

    #[test]
    fn test_overwrite_replaces_contents_and_keeps_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Local State");
        let original = vec![0u8; 4096];
        fs::write(&path, &original).unwrap();

        SecureEraser::new().overwrite(&path).unwrap();
        let after = fs::read(&path).unwrap();
        assert_eq!(after.len(), original.len());
        assert_ne!(after, original, "Contents should be random after overwrite");
    }

    #[test]
    fn test_read_only_file_is_still_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readonly.db");
        fs::write(&path, b"session token").unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&path, perms).unwrap();

        // Privileged users can still open the file for writing, so either
        // method is acceptable; what matters is that the path is gone.
        let result = SecureEraser::new().secure_delete_file(&path);
        assert!(result.is_ok(), "Read-only file should degrade, not fail: {:?}", result);
        assert!(!path.exists());
    }

    #[test]
    fn test_failed_overwrite_falls_back_to_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Cookies");
        fs::write(&path, b"sid=abc").unwrap();

        let method = SecureEraser::new()
            .delete_with(&path, |_| {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "write denied"))
            })
            .unwrap();

        match method {
            EraseMethod::Unlinked { reason } => assert!(reason.contains("write denied")),
            other => panic!("Expected unlink fallback, got {:?}", other),
        }
        assert!(!path.exists(), "File must be unlinked after a failed overwrite");
    }

    #[test]
    fn test_unlinked_files_are_reported_as_fallbacks() {
        let mut report = EraseReport::default();
        report.record(Path::new("a"), EraseMethod::Overwritten);
        report.record(
            Path::new("b"),
            EraseMethod::Unlinked {
                reason: "write denied".into(),
            },
        );
        assert_eq!(report.files_overwritten, 1);
        assert_eq!(report.files_unlinked, vec![PathBuf::from("b")]);

        let wipe = WipeReport {
            partitions: vec![("persist_main".into(), report)],
        };
        assert_eq!(wipe.fallback_count(), 1);
    }

    #[test]
    fn test_missing_file_is_delete_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SecureEraser::new()
            .secure_delete_file(&dir.path().join("absent"))
            .unwrap_err();
        assert!(matches!(err, EraseError::Delete { .. }));
    }

    #[test]
    fn test_secure_delete_partition_removes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("persist_main");
        fs::create_dir_all(root.join("Cache/Index")).unwrap();
        fs::write(root.join("Cookies"), b"a").unwrap();
        fs::write(root.join("Cache/data_0"), b"bb").unwrap();
        fs::write(root.join("Cache/Index/idx"), b"ccc").unwrap();

        let report = SecureEraser::new().secure_delete_partition(&root).unwrap();
        assert_eq!(report.files_overwritten, 3);
        assert_eq!(report.dirs_removed, 3);
        assert!(!root.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_target_is_not_erased() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside.txt");
        fs::write(&outside, b"keep me").unwrap();
        let root = dir.path().join("persist_main");
        fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let report = SecureEraser::new().secure_delete_partition(&root).unwrap();
        assert_eq!(report.links_removed, 1);
        assert_eq!(fs::read(&outside).unwrap(), b"keep me");
    }

    #[test]
    fn test_wipe_all_invalidates_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open(&dir.path().join("state")).unwrap());
        let guard = SessionIntegrityGuard::new(store, Arc::new(SystemClock));

        let root = dir.path().join("persist_a");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("Cookies"), b"a").unwrap();
        let partitions = vec![
            Partition::from_path(&root),
            Partition::from_path(dir.path().join("never_created")),
        ];

        guard.record_snapshot(&partitions).unwrap();
        assert!(guard.load_snapshot().unwrap().is_some());

        let report = SecureEraser::new().wipe_all(&partitions, &guard).unwrap();
        assert_eq!(report.partitions.len(), 2);
        assert_eq!(report.fallback_count(), 0);
        assert!(!root.exists());
        assert!(guard.load_snapshot().unwrap().is_none());
    }
}
