//! verify - re-check the gateway invariants without mutating anything

use anyhow::Result;
use owo_colors::OwoColorize;
use tracing::warn;

use torgate_common::{exit, Collaborators, GatewayConfig, HealthSnapshot, Orchestrator};

pub fn verify(config: GatewayConfig, json: bool) -> Result<i32> {
    let orchestrator = Orchestrator::new(config, Collaborators::production());
    let result = orchestrator.build_verifier().run();

    // Refresh the published snapshot so the status display catches up;
    // failing to write it (e.g. not root) does not fail the check.
    let path = orchestrator.config().snapshot_path();
    let snapshot = HealthSnapshot::from_verification(&result);
    if let Err(e) = snapshot.write(&path) {
        warn!(path = %path.display(), error = %e, "could not refresh health snapshot");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(if result.passed() {
            exit::OK
        } else {
            exit::VERIFICATION_FAILED
        });
    }

    super::print_verification(&result);
    if result.passed() {
        println!("\n{}", "All invariants hold.".green());
        Ok(exit::OK)
    } else {
        println!(
            "\n{} {}",
            "Failing:".red().bold(),
            result.failed_names().join(", ")
        );
        Ok(exit::VERIFICATION_FAILED)
    }
}
