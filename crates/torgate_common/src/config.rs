//! Gateway configuration - target parameters for an orchestrator run
//!
//! Loaded from a TOML file with per-field defaults, then overlaid with any
//! CLI overrides. There is no durable desired-state database: the live
//! system is inspected fresh each run, and this struct only carries the
//! parameters the run aims for.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Default location of the gateway configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/torgate/torgate.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Upstream (internet-facing) interface
    pub wan_iface: String,
    /// Wireless interface that hosts the access point
    pub ap_iface: String,
    /// Access point SSID
    pub ssid: String,
    /// WPA passphrase for the access point
    pub psk: String,
    /// Gateway address of the AP subnet, CIDR notation
    pub gateway_cidr: String,
    /// NetworkManager connection profile name for the hotspot
    pub hotspot_profile: String,
    /// Relay daemon systemd unit
    pub relay_service: String,
    /// Relay configuration file that receives the transparent-proxy lines
    pub relay_config: PathBuf,
    /// Port the relay exposes for transparently proxied TCP streams
    pub trans_port: u16,
    /// Port the relay answers DNS on
    pub dns_port: u16,
    /// Persistent sysctl drop-in written for IP forwarding
    pub sysctl_file: PathBuf,
    /// Directory holding backup artifacts
    pub backup_dir: PathBuf,
    /// Runtime state directory (health snapshot, run lock)
    pub state_dir: PathBuf,
    /// Packages required before configuration starts
    pub packages: Vec<String>,
    /// Seconds to wait for the AP interface to acquire its address
    pub readiness_timeout_secs: u64,
    /// Milliseconds between readiness polls
    pub readiness_interval_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            wan_iface: "eth0".to_string(),
            ap_iface: "wlan0".to_string(),
            ssid: "torgate".to_string(),
            psk: "onions-have-layers".to_string(),
            gateway_cidr: "192.168.42.1/24".to_string(),
            hotspot_profile: "torgate-ap".to_string(),
            relay_service: "tor".to_string(),
            relay_config: PathBuf::from("/etc/tor/torrc"),
            trans_port: 9040,
            dns_port: 9053,
            sysctl_file: PathBuf::from("/etc/sysctl.d/99-torgate.conf"),
            backup_dir: PathBuf::from("/var/lib/torgate/backups"),
            state_dir: PathBuf::from("/run/torgate"),
            packages: vec!["tor".to_string(), "network-manager".to_string()],
            readiness_timeout_secs: 30,
            readiness_interval_ms: 500,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Gateway IP without the prefix length.
    pub fn gateway_ip(&self) -> &str {
        self.gateway_cidr
            .split_once('/')
            .map(|(ip, _)| ip)
            .unwrap_or(&self.gateway_cidr)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    /// Path the health snapshot is published to.
    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join("status.json")
    }

    /// Path of the run lock file enforcing one orchestrator run at a time.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("torgatectl.lock")
    }

    /// Basic sanity checks on the parameters themselves, before any look
    /// at the live system.
    pub fn validate(&self) -> Result<()> {
        if self.wan_iface == self.ap_iface {
            return Err(GatewayError::Config(format!(
                "wan_iface and ap_iface are both '{}'",
                self.wan_iface
            )));
        }
        if self.psk.len() < 8 {
            return Err(GatewayError::Config(
                "psk must be at least 8 characters (WPA2 minimum)".to_string(),
            ));
        }
        if !self.gateway_cidr.contains('/') {
            return Err(GatewayError::Config(format!(
                "gateway_cidr '{}' is not in CIDR notation",
                self.gateway_cidr
            )));
        }
        Ok(())
    }
}

/// CLI-level overrides merged over the file configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub wan_iface: Option<String>,
    pub ap_iface: Option<String>,
    pub ssid: Option<String>,
    pub psk: Option<String>,
    pub gateway_cidr: Option<String>,
    pub trans_port: Option<u16>,
    pub dns_port: Option<u16>,
}

impl GatewayConfig {
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(v) = &overrides.wan_iface {
            self.wan_iface = v.clone();
        }
        if let Some(v) = &overrides.ap_iface {
            self.ap_iface = v.clone();
        }
        if let Some(v) = &overrides.ssid {
            self.ssid = v.clone();
        }
        if let Some(v) = &overrides.psk {
            self.psk = v.clone();
        }
        if let Some(v) = &overrides.gateway_cidr {
            self.gateway_cidr = v.clone();
        }
        if let Some(v) = overrides.trans_port {
            self.trans_port = v;
        }
        if let Some(v) = overrides.dns_port {
            self.dns_port = v;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway_ip(), "192.168.42.1");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = GatewayConfig::load(Path::new("/nonexistent/torgate.toml")).unwrap();
        assert_eq!(config.dns_port, 9053);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torgate.toml");
        std::fs::write(&path, "ssid = \"mygate\"\ndns_port = 5353\n").unwrap();
        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.ssid, "mygate");
        assert_eq!(config.dns_port, 5353);
        // untouched fields keep their defaults
        assert_eq!(config.trans_port, 9040);
    }

    #[test]
    fn test_overrides_win() {
        let overrides = ConfigOverrides {
            ap_iface: Some("wlan1".to_string()),
            dns_port: Some(15353),
            ..Default::default()
        };
        let config = GatewayConfig::default().with_overrides(&overrides);
        assert_eq!(config.ap_iface, "wlan1");
        assert_eq!(config.dns_port, 15353);
        assert_eq!(config.wan_iface, "eth0");
    }

    #[test]
    fn test_validate_rejects_same_iface() {
        let config = GatewayConfig {
            wan_iface: "wlan0".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_psk() {
        let config = GatewayConfig {
            psk: "short".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
