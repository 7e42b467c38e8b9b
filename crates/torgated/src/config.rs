//! Display daemon configuration
//!
//! Same shape as the gateway configuration: a TOML file with per-field
//! defaults, absent file means all defaults. Colors are RGB triples so the
//! file can say `ok = [0, 255, 0]`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use torgate_common::Result;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/torgate/display.toml";

pub type Rgb = (u8, u8, u8);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Master switch; a disabled daemon exits immediately
    pub enabled: bool,
    /// LED device backend: "auto", "console" or "none"
    pub device: String,
    /// Interface metered for the traffic quadrant; "auto" follows the
    /// default route
    pub iface: String,
    pub frame_ms: u64,
    pub brightness: f32,
    pub poll_interval_ms: u64,
    /// Health snapshot published by the orchestrator
    pub snapshot_path: PathBuf,
    /// Relay systemd unit shown in the relay quadrant
    pub relay_service: String,
    pub ap: ApSection,
    pub traffic: TrafficSection,
    pub host: HostSection,
    pub colors: Colors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApSection {
    pub iface: String,
    /// All of these must be active for the AP quadrant to show green
    pub service_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficSection {
    /// Ascending thresholds; throughput maps to level 1..=len+1
    pub buckets_kbps: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSection {
    pub warn_load: f64,
    pub warn_disk_pct: f32,
    pub crit_temp_c: f32,
    pub crit_disk_pct: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Colors {
    pub ok: Rgb,
    pub warn: Rgb,
    pub crit: Rgb,
    pub relay_on: Rgb,
    pub ap_on: Rgb,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: "auto".to_string(),
            iface: "auto".to_string(),
            frame_ms: 80,
            brightness: 0.35,
            poll_interval_ms: 1000,
            snapshot_path: PathBuf::from("/run/torgate/status.json"),
            relay_service: "tor".to_string(),
            ap: ApSection::default(),
            traffic: TrafficSection::default(),
            host: HostSection::default(),
            colors: Colors::default(),
        }
    }
}

impl Default for ApSection {
    fn default() -> Self {
        Self {
            iface: "wlan0".to_string(),
            service_names: vec!["NetworkManager".to_string()],
        }
    }
}

impl Default for TrafficSection {
    fn default() -> Self {
        Self {
            buckets_kbps: vec![64.0, 256.0, 1024.0],
        }
    }
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            warn_load: 2.0,
            warn_disk_pct: 85.0,
            crit_temp_c: 80.0,
            crit_disk_pct: 95.0,
        }
    }
}

impl Default for Colors {
    fn default() -> Self {
        Self {
            ok: (0, 255, 0),
            warn: (255, 165, 0),
            crit: (255, 0, 0),
            relay_on: (0, 255, 255),
            ap_on: (0, 128, 255),
        }
    }
}

impl DisplayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            torgate_common::GatewayError::Config(format!("{}: {}", path.display(), e))
        })
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
