//! Verifier - read-only post-run invariant checks
//!
//! Runs strictly after the pipeline, never interleaved with mutation.
//! Every invariant is a pure read of live state compared against what the
//! run intended to establish. Failures are diagnostic: they are reported
//! and mapped to a non-zero exit, but already-applied configuration is
//! left standing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One named invariant with its probe. The probe returns pass/fail plus a
/// human-readable detail; probe errors are folded into a failure detail so
/// verification can never abort the process.
pub struct Invariant {
    name: String,
    probe: Box<dyn Fn() -> (bool, String) + Send + Sync>,
}

impl Invariant {
    pub fn new(name: &str, probe: impl Fn() -> (bool, String) + Send + Sync + 'static) -> Self {
        Self {
            name: name.to_string(),
            probe: Box::new(probe),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Immutable result of one verification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub generated_at: DateTime<Utc>,
    pub checks: Vec<InvariantCheck>,
}

impl VerificationResult {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Outcome of a single named check, if it ran.
    pub fn check(&self, name: &str) -> Option<bool> {
        self.checks.iter().find(|c| c.name == name).map(|c| c.passed)
    }
}

#[derive(Default)]
pub struct Verifier {
    invariants: Vec<Invariant>,
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invariant(
        mut self,
        name: &str,
        probe: impl Fn() -> (bool, String) + Send + Sync + 'static,
    ) -> Self {
        self.invariants.push(Invariant::new(name, probe));
        self
    }

    pub fn run(&self) -> VerificationResult {
        let mut checks = Vec::with_capacity(self.invariants.len());
        for invariant in &self.invariants {
            let (passed, detail) = (invariant.probe)();
            if passed {
                debug!(invariant = %invariant.name, %detail, "invariant holds");
            } else {
                warn!(invariant = %invariant.name, %detail, "invariant violated");
            }
            checks.push(InvariantCheck {
                name: invariant.name.clone(),
                passed,
                detail,
            });
        }
        VerificationResult {
            generated_at: Utc::now(),
            checks,
        }
    }
}
