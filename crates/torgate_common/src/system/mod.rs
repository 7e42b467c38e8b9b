//! Narrow interfaces to the external subsystems the orchestrator drives
//!
//! Each collaborator is a small object-safe trait with a process-backed
//! production implementation. Tests substitute recording fakes, so the
//! core engine never depends on a live host.

pub mod firewall;
pub mod network;
pub mod packages;
pub mod services;

pub use firewall::{IptablesFilter, PacketFilter, Proto, RedirectTuple};
pub use network::{ApController, NmcliController};
pub use packages::{AptInstaller, PackageInstaller};
pub use services::{ServiceManager, Systemctl};

use std::process::{Command, Output};

use crate::error::{GatewayError, Result};

/// Run a command and surface a non-zero exit as a service error carrying
/// the trimmed stderr.
pub(crate) fn run_checked(name: &str, program: &str, args: &[&str]) -> Result<Output> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| GatewayError::Service {
            name: name.to_string(),
            message: format!("failed to run {}: {}", program, e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GatewayError::Service {
            name: name.to_string(),
            message: format!(
                "{} {} exited with {}: {}",
                program,
                args.join(" "),
                output.status,
                stderr.trim()
            ),
        });
    }
    Ok(output)
}

/// Whether a program is resolvable on PATH.
pub fn command_exists(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
