mod run;
mod status;
mod verify;

pub use run::{apply, uninstall};
pub use status::status;
pub use verify::verify;

use owo_colors::OwoColorize;
use torgate_common::VerificationResult;

/// Shared rendering of a verification pass.
pub(crate) fn print_verification(result: &VerificationResult) {
    println!("\n{}", "Verification".bold());
    for check in &result.checks {
        let mark = if check.passed {
            "ok".green().to_string()
        } else {
            "FAIL".red().to_string()
        };
        println!("  [{:>4}] {:<16} {}", mark, check.name, check.detail);
    }
}
