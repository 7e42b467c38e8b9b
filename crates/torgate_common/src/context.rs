//! Run context - per-invocation state owned by one orchestrator run
//!
//! There is no durable desired-state database. A run owns its context
//! exclusively; the only state that outlives it is the backup registry's
//! on-disk artifacts and the live system itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::backup::BackupRegistry;

/// What this invocation intends to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Configure the gateway
    Apply,
    /// Show what apply would do without side effects
    DryRun,
    /// Reverse a previous apply
    Uninstall,
}

impl RunMode {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, RunMode::DryRun)
    }
}

pub struct RunContext {
    pub mode: RunMode,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub backups: BackupRegistry,
    abort: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(mode: RunMode, backup_dir: &Path, abort: Arc<AtomicBool>) -> Self {
        Self {
            mode,
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            backups: BackupRegistry::new(backup_dir),
            abort,
        }
    }

    /// Checked at stage boundaries only, never mid-stage, so a rule is
    /// never left half-applied by cancellation.
    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}
