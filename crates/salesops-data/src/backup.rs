//! Rotating database backups.
//!
//! Each backup is a plain copy of the database file named by its creation
//! time (`sales_backup_YYYYMMDD_HHMMSS.db`). Backups are never overwritten;
//! pruning removes those whose modification time falls outside the
//! retention window.

use chrono::NaiveDateTime;
use salesops_core::config::RunConfig;
use salesops_core::error::{Result, SalesOpsError};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const BACKUP_PREFIX: &str = "sales_backup_";
const BACKUP_SUFFIX: &str = ".db";

/// A backup file on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub created_at: NaiveDateTime,
    pub size_bytes: u64,
}

/// Outcome of one prune pass.
#[derive(Debug, Default)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    /// Files that should have been removed but could not be.
    pub failed: Vec<(PathBuf, String)>,
}

/// Creates and retires backups of the sales database.
#[derive(Debug, Clone)]
pub struct BackupManager {
    database_path: PathBuf,
    backup_dir: PathBuf,
    retention_days: u32,
}

impl BackupManager {
    pub fn new(database_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            database_path: database_path.into(),
            backup_dir: backup_dir.into(),
            retention_days,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            &config.database_path,
            &config.backup_path,
            config.backup_retention_days,
        )
    }

    /// File name for a backup taken at `at` (second resolution).
    pub fn backup_file_name(at: NaiveDateTime) -> String {
        format!("{BACKUP_PREFIX}{}{BACKUP_SUFFIX}", at.format("%Y%m%d_%H%M%S"))
    }

    /// Copy the database into the backup directory.
    ///
    /// Fails without touching existing backups if the source is missing, the
    /// copy fails, or a backup with the same timestamp already exists.
    pub fn create_backup(&self, at: NaiveDateTime) -> Result<BackupRecord> {
        if !self.database_path.is_file() {
            return Err(SalesOpsError::Backup(format!(
                "database file not found: {}",
                self.database_path.display()
            )));
        }

        std::fs::create_dir_all(&self.backup_dir).map_err(|e| {
            SalesOpsError::Backup(format!("create {}: {e}", self.backup_dir.display()))
        })?;

        let target = self.backup_dir.join(Self::backup_file_name(at));
        let mut source = File::open(&self.database_path).map_err(|e| {
            SalesOpsError::Backup(format!("open {}: {e}", self.database_path.display()))
        })?;

        // create_new: one backup per timestamp, never clobber an existing one
        let mut dest = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => SalesOpsError::Backup(format!(
                    "backup already exists for this timestamp: {}",
                    target.display()
                )),
                _ => SalesOpsError::Backup(format!("create {}: {e}", target.display())),
            })?;

        let copied = std::io::copy(&mut source, &mut dest).and_then(|n| dest.sync_all().map(|_| n));
        let size_bytes = match copied {
            Ok(n) => n,
            Err(e) => {
                drop(dest);
                // Only our own partial file is removed.
                std::fs::remove_file(&target).ok();
                return Err(SalesOpsError::Backup(format!(
                    "copy to {}: {e}",
                    target.display()
                )));
            }
        };

        tracing::info!("💾 Database backup created: {} ({} bytes)", target.display(), size_bytes);
        Ok(BackupRecord {
            path: target,
            created_at: at,
            size_bytes,
        })
    }

    /// All backup files currently in the backup directory, oldest name first.
    pub fn list_backups(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut backups: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_backup_file(p))
            .collect();
        backups.sort();
        backups
    }

    /// Delete every backup whose modification time is older than
    /// `now - retention_days`. Per-file failures are logged and skipped.
    pub fn prune_old_backups(&self, now: SystemTime) -> PruneReport {
        let mut report = PruneReport::default();
        let window = Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60);
        let cutoff = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);

        for path in self.list_backups() {
            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("⚠️ Cannot stat backup {}: {e}", path.display());
                    report.failed.push((path, e.to_string()));
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!("🗑️ Removed old backup: {}", path.display());
                    report.removed.push(path);
                }
                Err(e) => {
                    tracing::warn!("⚠️ Failed to remove old backup {}: {e}", path.display());
                    report.failed.push((path, e.to_string()));
                }
            }
        }
        report
    }
}

fn is_backup_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(BACKUP_SUFFIX))
}
