//! Package installer collaborator
//!
//! Peripheral to the core: invoked once before the pipeline so the
//! services the stages configure actually exist on the host.

use std::process::Command;
use tracing::info;

use crate::error::Result;

pub trait PackageInstaller: Send + Sync {
    fn ensure_installed(&self, names: &[&str]) -> Result<()>;
}

/// Debian-family implementation: dpkg for the installed check, apt-get
/// non-interactive for anything missing.
pub struct AptInstaller;

impl AptInstaller {
    fn is_installed(&self, name: &str) -> bool {
        Command::new("dpkg")
            .args(["-s", name])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl PackageInstaller for AptInstaller {
    fn ensure_installed(&self, names: &[&str]) -> Result<()> {
        let missing: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| !self.is_installed(n))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        info!(packages = ?missing, "installing missing packages");
        let mut args = vec!["install", "-y"];
        args.extend(&missing);
        super::run_checked("apt-get", "apt-get", &args)?;
        Ok(())
    }
}
