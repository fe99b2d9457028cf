//! Atomic map installation with backup rotation
//!
//! The active map file is the single source of truth for downstream
//! consumers and is only ever replaced by an atomic rename. Install
//! order:
//! 1. Write the artifact to a staging file and fsync it.
//! 2. Copy the current active map into the backup directory.
//! 3. Prune backups past `max_backups` (oldest first).
//! 4. Rename staging over the active path.
//!
//! A failure at any step before the rename leaves the active map
//! byte-identical to before the attempt.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error while {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no backup available to roll back to")]
    NoBackup,
}

impl StorageError {
    fn io(op: &'static str) -> impl FnOnce(std::io::Error) -> StorageError {
        move |source| StorageError::Io { op, source }
    }
}

/// Owns the active, backup, and staging storage slots. The only writer
/// of the active map file.
pub struct StorageManager {
    active_path: PathBuf,
    backup_dir: PathBuf,
    staging_dir: PathBuf,
    max_backups: usize,
}

impl StorageManager {
    /// Create a storage manager, ensuring the backup and staging
    /// directories exist.
    pub fn new(
        active_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        max_backups: usize,
    ) -> Result<Self, StorageError> {
        let manager = Self {
            active_path: active_path.into(),
            backup_dir: backup_dir.into(),
            staging_dir: staging_dir.into(),
            max_backups,
        };
        fs::create_dir_all(&manager.backup_dir).map_err(StorageError::io("creating backup dir"))?;
        fs::create_dir_all(&manager.staging_dir)
            .map_err(StorageError::io("creating staging dir"))?;
        if let Some(parent) = manager.active_path.parent() {
            fs::create_dir_all(parent).map_err(StorageError::io("creating active dir"))?;
        }
        Ok(manager)
    }

    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    /// Install a verified artifact as the active map. All-or-nothing:
    /// on any error the active slot is unchanged.
    pub fn install(&self, artifact_bytes: &[u8]) -> Result<(), StorageError> {
        let staging_path = self.stage(artifact_bytes)?;

        if let Err(err) = self.rotate_backup() {
            // The staging file is ours to clean up; the active map has
            // not been touched yet.
            let _ = fs::remove_file(&staging_path);
            return Err(err);
        }

        if let Err(source) = fs::rename(&staging_path, &self.active_path) {
            let _ = fs::remove_file(&staging_path);
            return Err(StorageError::Io {
                op: "renaming staging file over active map",
                source,
            });
        }

        sync_dir(&self.active_path);
        info!(
            path = %self.active_path.display(),
            size = artifact_bytes.len(),
            "map installed"
        );
        Ok(())
    }

    /// Restore the most recent backup into the active slot, staging it
    /// first so the swap itself stays atomic.
    pub fn rollback(&self) -> Result<(), StorageError> {
        let newest = self
            .sorted_backups()?
            .into_iter()
            .next_back()
            .ok_or(StorageError::NoBackup)?;

        let bytes = fs::read(&newest).map_err(StorageError::io("reading backup"))?;
        let staging_path = self.stage(&bytes)?;
        fs::rename(&staging_path, &self.active_path)
            .map_err(StorageError::io("restoring backup over active map"))?;
        sync_dir(&self.active_path);

        info!(backup = %newest.display(), "rolled back to previous map");
        Ok(())
    }

    /// Bytes of the currently active map, if one is installed.
    pub fn active_bytes(&self) -> Option<Vec<u8>> {
        fs::read(&self.active_path).ok()
    }

    /// `metadata.version` of the installed map; 0 when no map is
    /// installed or the installed file is unreadable.
    pub fn installed_version(&self) -> u64 {
        self.active_bytes()
            .and_then(|bytes| crate::artifact::map_version(&bytes))
            .unwrap_or(0)
    }

    fn stage(&self, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let staging_path = self
            .staging_dir
            .join(format!("stage-{}.json", Uuid::new_v4()));

        let mut file =
            fs::File::create(&staging_path).map_err(StorageError::io("creating staging file"))?;
        if let Err(source) = file
            .write_all(bytes)
            .and_then(|_| file.sync_all())
        {
            let _ = fs::remove_file(&staging_path);
            return Err(StorageError::Io {
                op: "writing staging file",
                source,
            });
        }
        Ok(staging_path)
    }

    fn rotate_backup(&self) -> Result<(), StorageError> {
        if !self.active_path.exists() {
            return Ok(());
        }

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let backup_path = self.backup_dir.join(format!("map-{stamp}.json"));

        // Copy, not rename: the active map must stay in place until the
        // final atomic swap.
        fs::copy(&self.active_path, &backup_path)
            .map_err(StorageError::io("copying active map to backup"))?;

        self.prune_backups()?;
        Ok(())
    }

    fn prune_backups(&self) -> Result<(), StorageError> {
        let backups = self.sorted_backups()?;
        if backups.len() <= self.max_backups {
            return Ok(());
        }
        let excess = backups.len() - self.max_backups;
        for stale in backups.into_iter().take(excess) {
            if let Err(err) = fs::remove_file(&stale) {
                warn!(path = %stale.display(), error = %err, "failed to prune backup");
            }
        }
        Ok(())
    }

    /// Backup files sorted oldest-first by filename timestamp.
    fn sorted_backups(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut backups: Vec<PathBuf> = fs::read_dir(&self.backup_dir)
            .map_err(StorageError::io("listing backup dir"))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        backups.sort();
        Ok(backups)
    }
}

/// Best-effort fsync of the directory containing `path`, so the rename
/// itself is durable across a crash.
fn sync_dir(path: &Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
