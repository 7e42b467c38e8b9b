//! Packet filter backend - structured NAT redirect queries and mutations
//!
//! Redirect rules are identified by their exact tuple and existence is
//! checked with the backend's own would-match query (`iptables -C`), never
//! by grepping listing output. Insertion is guarded by that query because
//! iptables itself is not idempotent on append.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    Tcp,
    Udp,
}

impl Proto {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::Tcp => "tcp",
            Proto::Udp => "udp",
        }
    }
}

/// Identity of a NAT redirect: matching is on this exact tuple and nothing
/// looser, so removal can never touch a coincidentally similar rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectTuple {
    /// Ingress interface the rule matches
    pub iface: String,
    pub proto: Proto,
    /// Destination port match; None matches all ports of the protocol
    pub dport: Option<u16>,
    /// Local port traffic is redirected to
    pub to_port: u16,
}

impl RedirectTuple {
    pub fn new(iface: &str, proto: Proto, dport: Option<u16>, to_port: u16) -> Self {
        Self {
            iface: iface.to_string(),
            proto,
            dport,
            to_port,
        }
    }

    /// Argument vector shared by the check/append/delete verbs so all three
    /// always describe the same rule.
    fn match_args(&self) -> Vec<String> {
        let mut args = vec![
            "PREROUTING".to_string(),
            "-i".to_string(),
            self.iface.clone(),
            "-p".to_string(),
            self.proto.as_str().to_string(),
        ];
        if let Some(dport) = self.dport {
            args.push("--dport".to_string());
            args.push(dport.to_string());
        }
        args.push("-j".to_string());
        args.push("REDIRECT".to_string());
        args.push("--to-ports".to_string());
        args.push(self.to_port.to_string());
        args
    }
}

impl fmt::Display for RedirectTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dport {
            Some(dport) => write!(
                f,
                "{}/{} on {} -> {}",
                self.proto.as_str(),
                dport,
                self.iface,
                self.to_port
            ),
            None => write!(
                f,
                "{}/* on {} -> {}",
                self.proto.as_str(),
                self.iface,
                self.to_port
            ),
        }
    }
}

/// Packet filter collaborator consumed by redirect rules.
pub trait PacketFilter: Send + Sync {
    fn rule_exists(&self, tuple: &RedirectTuple) -> Result<bool>;
    fn insert_rule(&self, tuple: &RedirectTuple) -> Result<()>;
    fn delete_rule(&self, tuple: &RedirectTuple) -> Result<()>;
    /// Persist the live rule set across reboots.
    fn persist(&self) -> Result<()>;
}

/// Production backend driving iptables' nat table.
pub struct IptablesFilter;

impl IptablesFilter {
    fn run(&self, verb: &str, tuple: &RedirectTuple) -> Result<std::process::Output> {
        let mut args = vec!["-t".to_string(), "nat".to_string(), verb.to_string()];
        args.extend(tuple.match_args());
        Command::new("iptables")
            .args(&args)
            .output()
            .map_err(|e| GatewayError::Service {
                name: "iptables".to_string(),
                message: format!("failed to run iptables: {}", e),
            })
    }
}

impl PacketFilter for IptablesFilter {
    fn rule_exists(&self, tuple: &RedirectTuple) -> Result<bool> {
        // -C exits 0 when an identical rule exists, 1 when it does not;
        // anything else is a real failure (bad table, missing privilege).
        let output = self.run("-C", tuple)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(GatewayError::Service {
                name: "iptables".to_string(),
                message: format!(
                    "iptables -C failed for {}: {}",
                    tuple,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }),
        }
    }

    fn insert_rule(&self, tuple: &RedirectTuple) -> Result<()> {
        let output = self.run("-A", tuple)?;
        if !output.status.success() {
            return Err(GatewayError::RuleApply {
                target: tuple.to_string(),
                cause: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn delete_rule(&self, tuple: &RedirectTuple) -> Result<()> {
        let output = self.run("-D", tuple)?;
        if !output.status.success() {
            return Err(GatewayError::Service {
                name: "iptables".to_string(),
                message: format!(
                    "delete of {} failed: {}",
                    tuple,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        super::run_checked("netfilter-persistent", "netfilter-persistent", &["save"])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_args_with_dport() {
        let tuple = RedirectTuple::new("wlan0", Proto::Udp, Some(53), 9053);
        assert_eq!(
            tuple.match_args(),
            vec![
                "PREROUTING", "-i", "wlan0", "-p", "udp", "--dport", "53", "-j", "REDIRECT",
                "--to-ports", "9053"
            ]
        );
    }

    #[test]
    fn test_match_args_all_ports() {
        let tuple = RedirectTuple::new("wlan0", Proto::Tcp, None, 9040);
        let args = tuple.match_args();
        assert!(!args.contains(&"--dport".to_string()));
        assert_eq!(args.last().unwrap(), "9040");
    }

    #[test]
    fn test_display() {
        let dns = RedirectTuple::new("wlan0", Proto::Udp, Some(53), 9053);
        assert_eq!(dns.to_string(), "udp/53 on wlan0 -> 9053");
        let all_tcp = RedirectTuple::new("wlan0", Proto::Tcp, None, 9040);
        assert_eq!(all_tcp.to_string(), "tcp/* on wlan0 -> 9040");
    }

    #[test]
    fn test_tuple_equality_is_exact() {
        let a = RedirectTuple::new("wlan0", Proto::Udp, Some(53), 9053);
        let b = RedirectTuple::new("wlan0", Proto::Udp, Some(53), 5353);
        // Same port, different target: a distinct rule that must be left
        // untouched by removal of `a`.
        assert_ne!(a, b);
    }
}
