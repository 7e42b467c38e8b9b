//! Published health snapshot
//!
//! The orchestrator writes this JSON after a run and the `status` command
//! refreshes it; the status display daemon is a pure consumer that polls
//! the file and never mutates configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::verify::VerificationResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub generated_at: DateTime<Utc>,
    /// Relay daemon reports active
    pub relay_active: bool,
    /// Hotspot profile up and gateway address present
    pub ap_active: bool,
    /// Kernel forwarding flag reads 1
    pub forwarding: bool,
    /// Every redirect tuple the run intends is present
    pub redirects_ok: bool,
}

impl HealthSnapshot {
    /// Fold a verification pass into the snapshot the display consumes.
    pub fn from_verification(result: &VerificationResult) -> Self {
        let check = |name: &str| result.check(name).unwrap_or(false);
        Self {
            generated_at: result.generated_at,
            relay_active: check("relay-active"),
            ap_active: check("ap-address") && check("hotspot-profile"),
            forwarding: check("forwarding"),
            redirects_ok: check("redirect-dns") && check("redirect-tcp"),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn remove(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
