//! torgate_common - core engine of the torgate gateway orchestrator
//!
//! Turns a Linux host into an anonymizing-relay gateway by coordinating
//! several independently-failing subsystems (wireless AP, packet
//! redirection, the relay daemon) into one consistent, idempotent,
//! reversible state. The engine sequences configuration stages, applies
//! each change only if not already applied, records enough state to undo
//! everything, waits out readiness races, and verifies the end state
//! against explicit invariants.

pub mod backup;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod pipeline;
pub mod poller;
pub mod rules;
pub mod system;
pub mod verify;

pub use backup::{BackupRegistry, ManagedFile};
pub use config::{ConfigOverrides, GatewayConfig, DEFAULT_CONFIG_PATH};
pub use context::{RunContext, RunMode};
pub use error::{GatewayError, Result};
pub use health::HealthSnapshot;
pub use orchestrator::{exit, Collaborators, Orchestrator, RunReport};
pub use pipeline::{Pipeline, PipelineReport, PipelineStatus, Stage, StageReport, StageStatus};
pub use poller::{Clock, Poller, SystemClock};
pub use rules::Rule;
pub use verify::{VerificationResult, Verifier};
