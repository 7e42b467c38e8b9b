//! Service manager collaborator - systemd unit control and probing

use std::process::Command;

use crate::error::Result;

pub trait ServiceManager: Send + Sync {
    fn enable(&self, unit: &str) -> Result<()>;
    fn start(&self, unit: &str) -> Result<()>;
    fn restart(&self, unit: &str) -> Result<()>;
    fn stop(&self, unit: &str) -> Result<()>;
    fn disable(&self, unit: &str) -> Result<()>;
    /// Pure read; probe failures count as inactive.
    fn is_active(&self, unit: &str) -> bool;
}

/// Production implementation backed by systemctl.
pub struct Systemctl;

impl Systemctl {
    fn run(&self, verb: &str, unit: &str) -> Result<()> {
        super::run_checked(unit, "systemctl", &[verb, unit])?;
        Ok(())
    }
}

impl ServiceManager for Systemctl {
    fn enable(&self, unit: &str) -> Result<()> {
        self.run("enable", unit)
    }

    fn start(&self, unit: &str) -> Result<()> {
        self.run("start", unit)
    }

    fn restart(&self, unit: &str) -> Result<()> {
        self.run("restart", unit)
    }

    fn stop(&self, unit: &str) -> Result<()> {
        self.run("stop", unit)
    }

    fn disable(&self, unit: &str) -> Result<()> {
        self.run("disable", unit)
    }

    fn is_active(&self, unit: &str) -> bool {
        Command::new("systemctl")
            .args(["is-active", "--quiet", unit])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}
