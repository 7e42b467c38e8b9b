//! Status probes
//!
//! One poll cycle reads host vitals, service states, associated wifi
//! clients and interface throughput. Every probe degrades to a harmless
//! default on error; a broken sensor must never take the display down.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use sysinfo::Disks;
use tracing::debug;

use torgate_common::HealthSnapshot;

use crate::config::DisplayConfig;

/// Everything one render frame needs to know about the world.
#[derive(Debug, Clone, Default)]
pub struct DisplayState {
    pub host: HostStats,
    pub relay_active: bool,
    pub ap_active: bool,
    pub clients: usize,
    pub traffic_level: usize,
    /// Last orchestrator verification outcome, if one was published
    pub gateway: Option<HealthSnapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct HostStats {
    pub temp_c: f32,
    pub load1: f64,
    pub disk_pct: f32,
}

/// Stateful throughput meter: keeps the previous byte counters and turns
/// the delta between polls into a bucket level.
pub struct TrafficMeter {
    sys_net: PathBuf,
    last: Option<(Instant, u64)>,
}

impl Default for TrafficMeter {
    fn default() -> Self {
        Self {
            sys_net: PathBuf::from("/sys/class/net"),
            last: None,
        }
    }
}

impl TrafficMeter {
    #[cfg(test)]
    fn with_root(root: PathBuf) -> Self {
        Self {
            sys_net: root,
            last: None,
        }
    }

    fn read_bytes(&self, iface: &str) -> u64 {
        let stat = |name: &str| -> u64 {
            std::fs::read_to_string(self.sys_net.join(iface).join("statistics").join(name))
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0)
        };
        stat("rx_bytes") + stat("tx_bytes")
    }

    /// Bucket level for the throughput since the previous call; 0 until
    /// two samples exist.
    pub fn level(&mut self, iface: &str, buckets: &[f64]) -> usize {
        let now = Instant::now();
        let total = self.read_bytes(iface);
        let level = match self.last {
            Some((then, prev)) => {
                let secs = now.duration_since(then).as_secs_f64();
                if secs <= 0.0 {
                    0
                } else {
                    let kbps = total.saturating_sub(prev) as f64 * 8.0 / 1000.0 / secs;
                    bucket_level(kbps, buckets)
                }
            }
            None => 0,
        };
        self.last = Some((now, total));
        level
    }
}

/// Map a throughput to 1..=buckets.len()+1.
pub fn bucket_level(kbps: f64, buckets: &[f64]) -> usize {
    for (i, bound) in buckets.iter().enumerate() {
        if kbps <= *bound {
            return i + 1;
        }
    }
    buckets.len() + 1
}

pub fn read_cpu_temp() -> f32 {
    std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp")
        .ok()
        .and_then(|s| s.trim().parse::<f32>().ok())
        .map(|millis| millis / 1000.0)
        .unwrap_or(0.0)
}

pub fn host_stats() -> HostStats {
    let load1 = sysinfo::System::load_average().one;

    let disks = Disks::new_with_refreshed_list();
    let disk_pct = disks
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .map(|d| {
            let total = d.total_space();
            if total == 0 {
                0.0
            } else {
                (total - d.available_space()) as f32 / total as f32 * 100.0
            }
        })
        .unwrap_or(0.0);

    HostStats {
        temp_c: read_cpu_temp(),
        load1,
        disk_pct,
    }
}

pub fn service_active(name: &str) -> bool {
    Command::new("systemctl")
        .args(["is-active", "--quiet", name])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Associated stations on the AP interface.
pub fn ap_clients(iface: &str) -> usize {
    let output = Command::new("iw").args(["dev", iface, "station", "dump"]).output();
    match output {
        Ok(out) => count_stations(&String::from_utf8_lossy(&out.stdout)),
        Err(_) => 0,
    }
}

pub fn count_stations(dump: &str) -> usize {
    dump.lines()
        .filter(|line| line.trim_start().starts_with("Station"))
        .count()
}

/// Interface carrying the default route, for traffic metering.
pub fn default_route_iface() -> Option<String> {
    let output = Command::new("ip")
        .args(["route", "show", "default"])
        .output()
        .ok()?;
    parse_default_iface(&String::from_utf8_lossy(&output.stdout))
}

pub fn parse_default_iface(route: &str) -> Option<String> {
    let mut words = route.split_whitespace();
    while let Some(word) = words.next() {
        if word == "dev" {
            return words.next().map(str::to_string);
        }
    }
    None
}

/// One full poll cycle.
pub fn poll(config: &DisplayConfig, meter: &mut TrafficMeter) -> DisplayState {
    let iface = if config.iface == "auto" {
        default_route_iface().unwrap_or_else(|| config.ap.iface.clone())
    } else {
        config.iface.clone()
    };

    let state = DisplayState {
        host: host_stats(),
        relay_active: service_active(&config.relay_service),
        ap_active: config.ap.service_names.iter().all(|s| service_active(s)),
        clients: ap_clients(&config.ap.iface),
        traffic_level: meter.level(&iface, &config.traffic.buckets_kbps),
        gateway: HealthSnapshot::load(&config.snapshot_path).ok(),
    };
    debug!(?state, "poll complete");
    state
}
