//! torgatectl - command line driver for the torgate orchestrator

mod commands;
mod lock;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use torgate_common::{ConfigOverrides, GatewayConfig, DEFAULT_CONFIG_PATH};

#[derive(Parser)]
#[command(name = "torgatectl")]
#[command(about = "Turn this host into a Tor wifi gateway", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    /// Verbose output (info-level logs)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Debug output (debug-level logs)
    #[arg(long, global = true)]
    debug: bool,

    /// Emit machine-readable JSON instead of the human report
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the gateway (idempotent; safe to re-run)
    Apply {
        /// Show what would change without touching anything
        #[arg(long)]
        dry_run: bool,

        /// Upstream (internet-facing) interface
        #[arg(long)]
        wan: Option<String>,

        /// Wireless interface for the access point
        #[arg(long)]
        ap: Option<String>,

        /// Access point SSID
        #[arg(long)]
        ssid: Option<String>,

        /// WPA passphrase (at least 8 characters)
        #[arg(long)]
        psk: Option<String>,

        /// Gateway address in CIDR notation, e.g. 192.168.42.1/24
        #[arg(long)]
        gateway: Option<String>,

        /// Relay port for transparently proxied TCP
        #[arg(long)]
        trans_port: Option<u16>,

        /// Relay DNS port
        #[arg(long)]
        dns_port: Option<u16>,
    },

    /// Undo a previous apply and restore original files
    Uninstall {
        /// Show what would be undone without touching anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-check the gateway invariants without changing anything
    Verify,

    /// Show the last published health snapshot
    Status,
}

fn init_tracing(verbose: bool, debug: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.debug);

    let config = GatewayConfig::load(&cli.config)?;

    let code = match cli.command {
        Commands::Apply {
            dry_run,
            wan,
            ap,
            ssid,
            psk,
            gateway,
            trans_port,
            dns_port,
        } => {
            let overrides = ConfigOverrides {
                wan_iface: wan,
                ap_iface: ap,
                ssid,
                psk,
                gateway_cidr: gateway,
                trans_port,
                dns_port,
            };
            commands::apply(config.with_overrides(&overrides), dry_run, cli.json).await?
        }
        Commands::Uninstall { dry_run } => commands::uninstall(config, dry_run, cli.json).await?,
        Commands::Verify => commands::verify(config, cli.json)?,
        Commands::Status => commands::status(config, cli.json)?,
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_overrides_parse() {
        let cli = Cli::parse_from([
            "torgatectl",
            "apply",
            "--dry-run",
            "--ssid",
            "mygate",
            "--dns-port",
            "5353",
        ]);
        match cli.command {
            Commands::Apply {
                dry_run,
                ssid,
                dns_port,
                ..
            } => {
                assert!(dry_run);
                assert_eq!(ssid.as_deref(), Some("mygate"));
                assert_eq!(dns_port, Some(5353));
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["torgatectl", "verify", "--config", "/tmp/t.toml"]);
        assert_eq!(cli.config, PathBuf::from("/tmp/t.toml"));
    }
}
