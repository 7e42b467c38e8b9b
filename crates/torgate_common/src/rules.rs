//! Rule engine - idempotent assertions about host state
//!
//! A rule states one fact the gateway needs ("this line is in that file",
//! "this redirect exists", "this service runs") together with the actions
//! that make it true or false again. The pipeline always calls `query()`
//! first and skips `apply()` when the fact already holds, so re-applying a
//! satisfied rule never duplicates state even when the underlying tool is
//! not idempotent itself.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::system::{ApController, PacketFilter, RedirectTuple, ServiceManager};

/// A declarative assertion about system state plus its apply/unapply
/// actions.
pub trait Rule: Send + Sync {
    /// Human-readable identity of the assertion target, used in reports
    /// and errors.
    fn target(&self) -> String;

    /// Is the assertion already true? Pure read.
    fn query(&self) -> Result<bool>;

    /// Make the assertion true. Only called when `query()` returned false.
    fn apply(&self) -> Result<()>;

    /// Make the assertion false, best-effort. Must only undo state this
    /// rule (or an identical assertion) could have created.
    fn unapply(&self) -> Result<()>;

    /// Files the apply action may mutate; the pipeline snapshots these
    /// before the first write.
    fn managed_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Exact line present in a line-oriented config file.
///
/// Insertion appends at the end; pre-existing unrelated lines are never
/// reordered or deduplicated. Removal drops only exact matches.
pub struct LinePresent {
    path: PathBuf,
    line: String,
}

impl LinePresent {
    pub fn new(path: impl Into<PathBuf>, line: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line: line.into(),
        }
    }
}

impl Rule for LinePresent {
    fn target(&self) -> String {
        format!("line '{}' in {}", self.line, self.path.display())
    }

    fn query(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(content.lines().any(|l| l == self.line))
    }

    fn apply(&self) -> Result<()> {
        let mut content = if self.path.exists() {
            fs::read_to_string(&self.path).map_err(|e| GatewayError::RuleApply {
                target: self.target(),
                cause: e.to_string(),
            })?
        } else {
            String::new()
        };
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&self.line);
        content.push('\n');
        fs::write(&self.path, content).map_err(|e| GatewayError::RuleApply {
            target: self.target(),
            cause: e.to_string(),
        })?;
        debug!(path = %self.path.display(), line = %self.line, "line appended");
        Ok(())
    }

    fn unapply(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&self.path)?;
        let kept: Vec<&str> = content.lines().filter(|l| *l != self.line).collect();
        let mut rebuilt = kept.join("\n");
        if !rebuilt.is_empty() {
            rebuilt.push('\n');
        }
        fs::write(&self.path, rebuilt)?;
        Ok(())
    }

    fn managed_paths(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }
}

/// Runtime kernel flag under /proc/sys equals a value.
///
/// Persistence across reboots is a separate [`LinePresent`] rule on a
/// sysctl drop-in; this rule covers the live kernel state.
pub struct SysctlValue {
    key: String,
    value: String,
    /// Value written back on unapply
    reset_value: String,
    proc_root: PathBuf,
}

impl SysctlValue {
    pub fn new(key: &str, value: &str, reset_value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            reset_value: reset_value.to_string(),
            proc_root: PathBuf::from("/proc/sys"),
        }
    }

    #[doc(hidden)]
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    fn proc_path(&self) -> PathBuf {
        self.proc_root.join(self.key.replace('.', "/"))
    }

    fn write(&self, value: &str) -> Result<()> {
        fs::write(self.proc_path(), value).map_err(|e| GatewayError::RuleApply {
            target: self.target(),
            cause: e.to_string(),
        })
    }
}

impl Rule for SysctlValue {
    fn target(&self) -> String {
        format!("sysctl {} = {}", self.key, self.value)
    }

    fn query(&self) -> Result<bool> {
        match fs::read_to_string(self.proc_path()) {
            Ok(current) => Ok(current.trim() == self.value),
            Err(_) => Ok(false),
        }
    }

    fn apply(&self) -> Result<()> {
        self.write(&self.value)
    }

    fn unapply(&self) -> Result<()> {
        self.write(&self.reset_value)
    }
}

/// NAT redirect matching an exact tuple exists in the filter backend.
pub struct RedirectPresent {
    tuple: RedirectTuple,
    filter: Arc<dyn PacketFilter>,
}

impl RedirectPresent {
    pub fn new(tuple: RedirectTuple, filter: Arc<dyn PacketFilter>) -> Self {
        Self { tuple, filter }
    }
}

impl Rule for RedirectPresent {
    fn target(&self) -> String {
        format!("redirect {}", self.tuple)
    }

    fn query(&self) -> Result<bool> {
        self.filter.rule_exists(&self.tuple)
    }

    fn apply(&self) -> Result<()> {
        self.filter.insert_rule(&self.tuple)
    }

    fn unapply(&self) -> Result<()> {
        // Only an exact tuple match is deleted; a differently-targeted
        // rule on the same port is out of reach by construction.
        if self.filter.rule_exists(&self.tuple)? {
            self.filter.delete_rule(&self.tuple)?;
        }
        Ok(())
    }
}

/// A systemd unit is enabled and active.
pub struct ServiceRunning {
    unit: String,
    services: Arc<dyn ServiceManager>,
}

impl ServiceRunning {
    pub fn new(unit: &str, services: Arc<dyn ServiceManager>) -> Self {
        Self {
            unit: unit.to_string(),
            services,
        }
    }
}

impl Rule for ServiceRunning {
    fn target(&self) -> String {
        format!("service {} active", self.unit)
    }

    fn query(&self) -> Result<bool> {
        Ok(self.services.is_active(&self.unit))
    }

    fn apply(&self) -> Result<()> {
        self.services.enable(&self.unit)?;
        self.services.start(&self.unit)
    }

    fn unapply(&self) -> Result<()> {
        // Stopping a unit the run never started would be wrong only if the
        // stage reached apply; uninstall tolerates an already-stopped unit.
        self.services.stop(&self.unit)?;
        self.services.disable(&self.unit)
    }
}

/// The hotspot connection profile exists on the AP interface.
pub struct HotspotPresent {
    profile: String,
    iface: String,
    ssid: String,
    psk: String,
    gateway_cidr: String,
    ap: Arc<dyn ApController>,
}

impl HotspotPresent {
    pub fn new(
        profile: &str,
        iface: &str,
        ssid: &str,
        psk: &str,
        gateway_cidr: &str,
        ap: Arc<dyn ApController>,
    ) -> Self {
        Self {
            profile: profile.to_string(),
            iface: iface.to_string(),
            ssid: ssid.to_string(),
            psk: psk.to_string(),
            gateway_cidr: gateway_cidr.to_string(),
            ap,
        }
    }
}

impl Rule for HotspotPresent {
    fn target(&self) -> String {
        format!("hotspot profile {} on {}", self.profile, self.iface)
    }

    fn query(&self) -> Result<bool> {
        self.ap.hotspot_exists(&self.profile)
    }

    fn apply(&self) -> Result<()> {
        self.ap.create_or_update_hotspot(
            &self.profile,
            &self.iface,
            &self.ssid,
            &self.psk,
            &self.gateway_cidr,
        )
    }

    fn unapply(&self) -> Result<()> {
        self.ap.delete_hotspot(&self.profile)
    }
}

/// Apply a rule only when its query reports unsatisfied; returns whether
/// anything changed.
pub fn ensure(rule: &dyn Rule) -> Result<bool> {
    if rule.query()? {
        return Ok(false);
    }
    rule.apply()?;
    Ok(true)
}
