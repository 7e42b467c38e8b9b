//! Orchestrator - top-level driver for a gateway configuration run
//!
//! Parses intent (apply, dry-run, uninstall), checks preconditions before
//! any mutation, builds the standard stage pipeline, executes it, runs the
//! verifier, publishes the health snapshot and maps the outcome to a
//! process exit code. Re-running after any failure is the documented
//! recovery path; uninstall is the explicit rollback mechanism.

use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::context::{RunContext, RunMode};
use crate::error::{GatewayError, Result};
use crate::health::HealthSnapshot;
use crate::pipeline::{Pipeline, PipelineReport, ReadinessGate, Stage};
use crate::rules::{HotspotPresent, LinePresent, RedirectPresent, ServiceRunning, SysctlValue};
use crate::system::{
    command_exists, ApController, AptInstaller, IptablesFilter, NmcliController, PacketFilter,
    PackageInstaller, Proto, RedirectTuple, ServiceManager, Systemctl,
};
use crate::verify::{VerificationResult, Verifier};

/// Process exit codes for the embedding CLI.
pub mod exit {
    /// Apply completed and verified, or uninstall completed
    pub const OK: i32 = 0;
    /// Environment does not meet requirements; nothing was mutated
    pub const PRECONDITION: i32 = 2;
    /// A stage failed and halted the pipeline
    pub const STAGE_FAILED: i32 = 3;
    /// Configuration stands but one or more invariants do not hold
    pub const VERIFICATION_FAILED: i32 = 4;
}

/// External subsystems the orchestrator drives, behind narrow traits so
/// tests can substitute fakes.
#[derive(Clone)]
pub struct Collaborators {
    pub packages: Arc<dyn PackageInstaller>,
    pub services: Arc<dyn ServiceManager>,
    pub ap: Arc<dyn ApController>,
    pub firewall: Arc<dyn PacketFilter>,
}

impl Collaborators {
    pub fn production() -> Self {
        Self {
            packages: Arc::new(AptInstaller),
            services: Arc::new(Systemctl),
            ap: Arc::new(NmcliController),
            firewall: Arc::new(IptablesFilter),
        }
    }
}

/// Structured result of one orchestrator invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub pipeline: PipelineReport,
    pub verification: Option<VerificationResult>,
    pub exit_code: i32,
}

pub struct Orchestrator {
    config: GatewayConfig,
    collab: Collaborators,
}

impl Orchestrator {
    pub fn new(config: GatewayConfig, collab: Collaborators) -> Self {
        Self { config, collab }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run one invocation. `Err` is returned only for precondition and
    /// configuration problems raised before any mutation; everything after
    /// that is captured in the report.
    pub fn run(&self, mode: RunMode, abort: Arc<AtomicBool>) -> Result<RunReport> {
        self.check_preconditions(mode)?;

        if mode == RunMode::Apply {
            let names: Vec<&str> = self.config.packages.iter().map(String::as_str).collect();
            self.collab
                .packages
                .ensure_installed(&names)
                .map_err(|e| GatewayError::Precondition(format!("package preflight: {}", e)))?;
        }

        let mut ctx = RunContext::new(mode, &self.config.backup_dir, abort);
        info!(run_id = %ctx.run_id, ?mode, "orchestrator run starting");

        let pipeline = self.build_pipeline();
        let pipeline_report = match mode {
            RunMode::Apply | RunMode::DryRun => pipeline.execute(&mut ctx),
            RunMode::Uninstall => pipeline.uninstall(&mut ctx),
        };

        // The verifier runs after every apply, including an aborted one,
        // so the operator always gets a diagnostic picture. Dry-run checks
        // nothing real; uninstall success is the reverse pipeline itself.
        let verification = match mode {
            RunMode::Apply => Some(self.build_verifier().run()),
            RunMode::DryRun | RunMode::Uninstall => None,
        };

        self.publish(mode, verification.as_ref());

        let exit_code = resolve_exit_code(&pipeline_report, verification.as_ref());
        info!(run_id = %ctx.run_id, exit_code, "orchestrator run finished");

        Ok(RunReport {
            run_id: ctx.run_id,
            mode,
            pipeline: pipeline_report,
            verification,
            exit_code,
        })
    }

    /// Show what uninstall would undo, querying live state only. No lock,
    /// no root, no mutation.
    pub fn preview_uninstall(&self, abort: Arc<AtomicBool>) -> Result<RunReport> {
        self.config.validate()?;
        let mut ctx = RunContext::new(RunMode::DryRun, &self.config.backup_dir, abort);
        info!(run_id = %ctx.run_id, "uninstall preview starting");
        let pipeline_report = self.build_pipeline().uninstall(&mut ctx);
        let exit_code = resolve_exit_code(&pipeline_report, None);
        Ok(RunReport {
            run_id: ctx.run_id,
            mode: RunMode::DryRun,
            pipeline: pipeline_report,
            verification: None,
            exit_code,
        })
    }

    /// Environment checks performed before any mutation.
    fn check_preconditions(&self, mode: RunMode) -> Result<()> {
        self.config.validate()?;

        if !cfg!(target_os = "linux") {
            return Err(GatewayError::Precondition(
                "torgate configures a Linux host".to_string(),
            ));
        }

        if mode != RunMode::DryRun && !nix::unistd::Uid::effective().is_root() {
            return Err(GatewayError::Precondition(
                "must run as root (configuration touches system services and firewall)"
                    .to_string(),
            ));
        }

        let missing: Vec<&str> = ["systemctl", "nmcli", "iptables", "ip"]
            .into_iter()
            .filter(|c| !command_exists(c))
            .collect();
        if !missing.is_empty() {
            return Err(GatewayError::Precondition(format!(
                "required commands not found: {}",
                missing.join(", ")
            )));
        }

        if mode != RunMode::Uninstall {
            for iface in [&self.config.wan_iface, &self.config.ap_iface] {
                if !Path::new("/sys/class/net").join(iface).exists() {
                    return Err(GatewayError::Precondition(format!(
                        "interface '{}' not present",
                        iface
                    )));
                }
            }
        }

        Ok(())
    }

    /// The standard four-stage pipeline. Order matters: later stages
    /// assume earlier stages' postconditions.
    pub fn build_pipeline(&self) -> Pipeline {
        let config = &self.config;
        let gateway_ip = config.gateway_ip().to_string();

        let forwarding = Stage::new("forwarding")
            .rule(SysctlValue::new("net.ipv4.ip_forward", "1", "0"))
            .rule(LinePresent::new(
                &config.sysctl_file,
                "net.ipv4.ip_forward=1",
            ));

        let services = self.collab.services.clone();
        let relay_unit = config.relay_service.clone();
        let relay = Stage::new("relay")
            .rule(LinePresent::new(
                &config.relay_config,
                "VirtualAddrNetworkIPv4 10.192.0.0/10",
            ))
            .rule(LinePresent::new(
                &config.relay_config,
                "AutomapHostsOnResolve 1",
            ))
            .rule(LinePresent::new(
                &config.relay_config,
                format!("TransPort {}:{}", gateway_ip, config.trans_port),
            ))
            .rule(LinePresent::new(
                &config.relay_config,
                format!("DNSPort {}:{}", gateway_ip, config.dns_port),
            ))
            .rule(ServiceRunning::new(
                &config.relay_service,
                self.collab.services.clone(),
            ))
            .post_apply(Box::new(move || services.restart(&relay_unit)));

        let ap = self.collab.ap.clone();
        let ap_iface = config.ap_iface.clone();
        let gateway_for_gate = gateway_ip.clone();
        let hotspot = Stage::new("hotspot")
            .rule(HotspotPresent::new(
                &config.hotspot_profile,
                &config.ap_iface,
                &config.ssid,
                &config.psk,
                &config.gateway_cidr,
                self.collab.ap.clone(),
            ))
            .readiness(ReadinessGate {
                what: format!("address {} on {}", gateway_ip, config.ap_iface),
                timeout: config.readiness_timeout(),
                interval: config.readiness_interval(),
                predicate: Box::new(move || {
                    ap.interface_has_address(&ap_iface, &gateway_for_gate)
                        .unwrap_or(false)
                }),
            });

        let firewall = self.collab.firewall.clone();
        let redirect = Stage::new("redirect")
            .rule(RedirectPresent::new(
                self.dns_redirect(),
                self.collab.firewall.clone(),
            ))
            .rule(RedirectPresent::new(
                self.tcp_redirect(),
                self.collab.firewall.clone(),
            ))
            .post_apply(Box::new(move || firewall.persist()));

        Pipeline::new(vec![forwarding, relay, hotspot, redirect])
    }

    fn dns_redirect(&self) -> RedirectTuple {
        RedirectTuple::new(
            &self.config.ap_iface,
            Proto::Udp,
            Some(53),
            self.config.dns_port,
        )
    }

    fn tcp_redirect(&self) -> RedirectTuple {
        RedirectTuple::new(&self.config.ap_iface, Proto::Tcp, None, self.config.trans_port)
    }

    /// Invariants compared against the configuration this run intends.
    pub fn build_verifier(&self) -> Verifier {
        let config = self.config.clone();
        let gateway_ip = config.gateway_ip().to_string();

        let services = self.collab.services.clone();
        let relay_unit = config.relay_service.clone();

        let ap = self.collab.ap.clone();
        let profile = config.hotspot_profile.clone();
        let ap_for_addr = self.collab.ap.clone();
        let ap_iface = config.ap_iface.clone();

        let firewall_dns = self.collab.firewall.clone();
        let dns_tuple = self.dns_redirect();
        let firewall_tcp = self.collab.firewall.clone();
        let tcp_tuple = self.tcp_redirect();

        Verifier::new()
            .invariant("relay-active", move || {
                let active = services.is_active(&relay_unit);
                (active, format!("systemd unit {} active: {}", relay_unit, active))
            })
            .invariant("forwarding", move || {
                match fs::read_to_string("/proc/sys/net/ipv4/ip_forward") {
                    Ok(v) => {
                        let value = v.trim().to_string();
                        (value == "1", format!("ip_forward reads {}", value))
                    }
                    Err(e) => (false, format!("cannot read ip_forward: {}", e)),
                }
            })
            .invariant("hotspot-profile", move || match ap.hotspot_exists(&profile) {
                Ok(exists) => (exists, format!("profile {} exists: {}", profile, exists)),
                Err(e) => (false, format!("profile query failed: {}", e)),
            })
            .invariant("ap-address", move || {
                match ap_for_addr.interface_has_address(&ap_iface, &gateway_ip) {
                    Ok(held) => (held, format!("{} holds {}: {}", ap_iface, gateway_ip, held)),
                    Err(e) => (false, format!("address query failed: {}", e)),
                }
            })
            .invariant("redirect-dns", move || match firewall_dns.rule_exists(&dns_tuple) {
                Ok(exists) => (exists, format!("{} present: {}", dns_tuple, exists)),
                Err(e) => (false, format!("rule query failed: {}", e)),
            })
            .invariant("redirect-tcp", move || match firewall_tcp.rule_exists(&tcp_tuple) {
                Ok(exists) => (exists, format!("{} present: {}", tcp_tuple, exists)),
                Err(e) => (false, format!("rule query failed: {}", e)),
            })
    }

    fn publish(&self, mode: RunMode, verification: Option<&VerificationResult>) {
        let path = self.config.snapshot_path();
        match mode {
            RunMode::Apply => {
                if let Some(result) = verification {
                    let snapshot = HealthSnapshot::from_verification(result);
                    if let Err(e) = snapshot.write(&path) {
                        warn!(path = %path.display(), error = %e, "failed to publish health snapshot");
                    }
                }
            }
            RunMode::Uninstall => {
                if let Err(e) = HealthSnapshot::remove(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove health snapshot");
                }
            }
            RunMode::DryRun => {}
        }
    }
}

/// Map a finished run onto the CLI exit code contract.
fn resolve_exit_code(
    pipeline: &PipelineReport,
    verification: Option<&VerificationResult>,
) -> i32 {
    if !pipeline.succeeded() {
        return exit::STAGE_FAILED;
    }
    if let Some(result) = verification {
        if !result.passed() {
            return exit::VERIFICATION_FAILED;
        }
    }
    exit::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineStatus, StageStatus};

    fn report(status: PipelineStatus, stage_status: StageStatus) -> PipelineReport {
        PipelineReport {
            status,
            stages: vec![crate::pipeline::StageReport {
                name: "forwarding".to_string(),
                status: stage_status,
                rules_total: 1,
                rules_applied: 0,
                rules_satisfied: 1,
                error: None,
                duration_ms: 0,
            }],
            duration_ms: 0,
        }
    }

    #[test]
    fn test_exit_code_mapping() {
        let ok = report(PipelineStatus::Completed, StageStatus::Succeeded);
        let halted = report(PipelineStatus::Halted, StageStatus::Failed);

        assert_eq!(resolve_exit_code(&ok, None), exit::OK);
        assert_eq!(resolve_exit_code(&halted, None), exit::STAGE_FAILED);

        let failing = Verifier::new()
            .invariant("forwarding", || (false, "reads 0".to_string()))
            .run();
        assert_eq!(
            resolve_exit_code(&ok, Some(&failing)),
            exit::VERIFICATION_FAILED
        );
        // a halted pipeline wins over verification
        assert_eq!(resolve_exit_code(&halted, Some(&failing)), exit::STAGE_FAILED);
    }

    #[test]
    fn test_standard_pipeline_shape() {
        let orchestrator = Orchestrator::new(GatewayConfig::default(), Collaborators::production());
        let pipeline = orchestrator.build_pipeline();
        assert_eq!(
            pipeline.stage_names(),
            vec!["forwarding", "relay", "hotspot", "redirect"]
        );
    }

    #[test]
    fn test_redirect_tuples_follow_config() {
        let config = GatewayConfig {
            ap_iface: "wlan1".to_string(),
            dns_port: 9053,
            trans_port: 9040,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(config, Collaborators::production());
        let dns = orchestrator.dns_redirect();
        assert_eq!(dns.to_string(), "udp/53 on wlan1 -> 9053");
        let tcp = orchestrator.tcp_redirect();
        assert_eq!(tcp.to_string(), "tcp/* on wlan1 -> 9040");
    }
}
