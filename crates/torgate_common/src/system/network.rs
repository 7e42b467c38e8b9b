//! AP controller collaborator - NetworkManager hotspot profiles
//!
//! The hotspot profile uses ipv4.method=shared, which also covers the
//! DHCP/DNS side of the subnet through NetworkManager's built-in dnsmasq.
//! Address queries go through `ip -j` and serde_json rather than text
//! scraping.

use std::process::Command;

use crate::error::{GatewayError, Result};

pub trait ApController: Send + Sync {
    /// Whether the named connection profile exists.
    fn hotspot_exists(&self, profile: &str) -> Result<bool>;
    /// Create the profile, or reconfigure it in place if it exists, and
    /// bring it up on the interface.
    fn create_or_update_hotspot(
        &self,
        profile: &str,
        iface: &str,
        ssid: &str,
        psk: &str,
        gateway_cidr: &str,
    ) -> Result<()>;
    fn delete_hotspot(&self, profile: &str) -> Result<()>;
    /// Pure read: does `iface` currently hold `addr`?
    fn interface_has_address(&self, iface: &str, addr: &str) -> Result<bool>;
}

/// Production implementation backed by nmcli.
pub struct NmcliController;

impl NmcliController {
    fn profile_settings(ssid: &str, psk: &str, gateway_cidr: &str) -> Vec<(String, String)> {
        vec![
            ("802-11-wireless.mode".to_string(), "ap".to_string()),
            ("802-11-wireless.band".to_string(), "bg".to_string()),
            ("802-11-wireless.ssid".to_string(), ssid.to_string()),
            ("wifi-sec.key-mgmt".to_string(), "wpa-psk".to_string()),
            ("wifi-sec.psk".to_string(), psk.to_string()),
            ("ipv4.method".to_string(), "shared".to_string()),
            ("ipv4.addresses".to_string(), gateway_cidr.to_string()),
            ("autoconnect".to_string(), "yes".to_string()),
        ]
    }
}

impl ApController for NmcliController {
    fn hotspot_exists(&self, profile: &str) -> Result<bool> {
        let output = super::run_checked(
            "nmcli",
            "nmcli",
            &["-t", "-f", "NAME", "connection", "show"],
        )?;
        let names = String::from_utf8_lossy(&output.stdout);
        Ok(names.lines().any(|name| name == profile))
    }

    fn create_or_update_hotspot(
        &self,
        profile: &str,
        iface: &str,
        ssid: &str,
        psk: &str,
        gateway_cidr: &str,
    ) -> Result<()> {
        if !self.hotspot_exists(profile)? {
            super::run_checked(
                "nmcli",
                "nmcli",
                &[
                    "connection", "add", "type", "wifi", "ifname", iface, "con-name", profile,
                    "ssid", ssid,
                ],
            )?;
        }

        let mut args: Vec<String> = vec![
            "connection".to_string(),
            "modify".to_string(),
            profile.to_string(),
        ];
        for (key, value) in Self::profile_settings(ssid, psk, gateway_cidr) {
            args.push(key);
            args.push(value);
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        super::run_checked("nmcli", "nmcli", &arg_refs)?;

        super::run_checked("nmcli", "nmcli", &["connection", "up", profile])?;
        Ok(())
    }

    fn delete_hotspot(&self, profile: &str) -> Result<()> {
        if !self.hotspot_exists(profile)? {
            return Ok(());
        }
        super::run_checked("nmcli", "nmcli", &["connection", "delete", profile])?;
        Ok(())
    }

    fn interface_has_address(&self, iface: &str, addr: &str) -> Result<bool> {
        let output = Command::new("ip")
            .args(["-j", "addr", "show", "dev", iface])
            .output()
            .map_err(|e| GatewayError::Service {
                name: "ip".to_string(),
                message: format!("failed to run ip: {}", e),
            })?;
        if !output.status.success() {
            // Interface may not exist yet; that just means no address.
            return Ok(false);
        }
        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(iface_holds_address(&parsed, addr))
    }
}

/// Walk `ip -j addr show` output looking for a local address.
fn iface_holds_address(parsed: &serde_json::Value, addr: &str) -> bool {
    parsed
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|link| link.get("addr_info").and_then(|a| a.as_array()))
        .flatten()
        .any(|info| info.get("local").and_then(|l| l.as_str()) == Some(addr))
}
