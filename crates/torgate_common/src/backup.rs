//! Backup registry - single-generation snapshots of files the run mutates
//!
//! Every file-touching rule snapshots its target here before the first
//! write, so uninstall can restore the exact pre-run bytes. Artifacts live
//! under one well-known directory and are named deterministically from the
//! original path, so restoration works from the disk layout alone even if
//! the in-memory registry is lost to a crash.
//!
//! Policy is single-generation: within one registry lifetime the first
//! snapshot of a path wins and later snapshots of the same path are no-ops;
//! a stale artifact left by a previous run is pruned and replaced on the
//! first snapshot of the next run.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

/// Suffix marking that the original file did not exist at snapshot time.
/// Restore deletes the live file instead of copying bytes back.
const ABSENT_SUFFIX: &str = ".absent";

/// A file whose content the orchestrator may back up and restore.
#[derive(Debug, Clone)]
pub struct ManagedFile {
    /// Original path (unique key)
    pub path: PathBuf,
    /// SHA-256 of the content at snapshot time, None when the file was absent
    pub content_sha256: Option<String>,
    /// Backup artifact location
    pub backup_path: PathBuf,
}

impl ManagedFile {
    /// True when the original existed when the snapshot was taken.
    pub fn existed(&self) -> bool {
        self.content_sha256.is_some()
    }
}

/// Snapshot store keyed by original path.
pub struct BackupRegistry {
    dir: PathBuf,
    entries: HashMap<PathBuf, ManagedFile>,
}

impl BackupRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: HashMap::new(),
        }
    }

    /// Deterministic, collision-free artifact name for a path: the path
    /// flattened into a filename plus a short hash of the full path, so
    /// `/etc/a_b` and `/etc/a/b` cannot collide.
    fn artifact_for(&self, path: &Path) -> PathBuf {
        let flat = path
            .to_string_lossy()
            .replace('/', "_")
            .trim_start_matches('_')
            .to_string();
        let digest = Sha256::digest(path.to_string_lossy().as_bytes());
        let short = hex::encode(&digest[..4]);
        self.dir.join(format!("{}-{}", flat, short))
    }

    fn absent_marker_for(&self, path: &Path) -> PathBuf {
        let artifact = self.artifact_for(path);
        let mut name = artifact.file_name().unwrap_or_default().to_os_string();
        name.push(ABSENT_SUFFIX);
        artifact.with_file_name(name)
    }

    /// Whether a snapshot has been recorded for `path` in this generation.
    pub fn has_backup(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Snapshot `path` before its first mutation in this run.
    ///
    /// First-snapshot-wins: a second call for the same path in this
    /// registry lifetime returns the existing record without touching the
    /// artifact, so the pre-change baseline is preserved.
    pub fn snapshot(&mut self, path: &Path) -> Result<&ManagedFile> {
        if self.entries.contains_key(path) {
            debug!(path = %path.display(), "backup already recorded this run");
            return Ok(&self.entries[path]);
        }

        fs::create_dir_all(&self.dir).map_err(|e| GatewayError::Backup {
            path: path.to_path_buf(),
            source: e,
        })?;

        let artifact = self.artifact_for(path);
        let marker = self.absent_marker_for(path);

        let managed = if path.exists() {
            // A leftover marker from an earlier run is stale now.
            if marker.exists() {
                let _ = fs::remove_file(&marker);
            }
            let content = fs::read(path).map_err(|e| GatewayError::Backup {
                path: path.to_path_buf(),
                source: e,
            })?;
            fs::write(&artifact, &content).map_err(|e| GatewayError::Backup {
                path: path.to_path_buf(),
                source: e,
            })?;
            let digest = Sha256::digest(&content);
            info!(path = %path.display(), backup = %artifact.display(), "snapshot taken");
            ManagedFile {
                path: path.to_path_buf(),
                content_sha256: Some(hex::encode(digest)),
                backup_path: artifact,
            }
        } else {
            if artifact.exists() {
                let _ = fs::remove_file(&artifact);
            }
            fs::write(&marker, b"").map_err(|e| GatewayError::Backup {
                path: path.to_path_buf(),
                source: e,
            })?;
            info!(path = %path.display(), "snapshot taken (file absent before run)");
            ManagedFile {
                path: path.to_path_buf(),
                content_sha256: None,
                backup_path: marker,
            }
        };

        self.entries.insert(path.to_path_buf(), managed);
        Ok(&self.entries[path])
    }

    /// Restore `path` from its backup artifact and drop the record.
    ///
    /// Works from the disk layout alone, so it also succeeds after a crash
    /// that lost the in-memory registry. Returns `Ok(false)` when nothing
    /// is recorded for the path (already-clean state is not a failure).
    pub fn restore(&mut self, path: &Path) -> Result<bool> {
        let artifact = self.artifact_for(path);
        let marker = self.absent_marker_for(path);

        if artifact.exists() {
            fs::copy(&artifact, path)?;
            fs::remove_file(&artifact)?;
            self.entries.remove(path);
            info!(path = %path.display(), "restored from backup");
            return Ok(true);
        }
        if marker.exists() {
            if path.exists() {
                fs::remove_file(path)?;
            }
            fs::remove_file(&marker)?;
            self.entries.remove(path);
            info!(path = %path.display(), "removed (absent before run)");
            return Ok(true);
        }
        if self.entries.remove(path).is_some() {
            warn!(path = %path.display(), "backup record had no artifact on disk");
        }
        Ok(false)
    }

    /// Paths with recorded snapshots in this generation.
    pub fn managed_paths(&self) -> Vec<PathBuf> {
        self.entries.keys().cloned().collect()
    }
}
