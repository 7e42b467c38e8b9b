//! status - render the last published health snapshot

use anyhow::Result;
use chrono::Utc;
use owo_colors::OwoColorize;

use torgate_common::{exit, GatewayConfig, HealthSnapshot};

pub fn status(config: GatewayConfig, json: bool) -> Result<i32> {
    let path = config.snapshot_path();
    let snapshot = match HealthSnapshot::load(&path) {
        Ok(s) => s,
        Err(_) if json => {
            println!("null");
            return Ok(exit::OK);
        }
        Err(_) => {
            println!(
                "{} no health snapshot at {}",
                "status:".bold(),
                path.display()
            );
            println!("run `torgatectl apply` or `torgatectl verify` to produce one");
            return Ok(exit::OK);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(exit::OK);
    }

    let age = Utc::now().signed_duration_since(snapshot.generated_at);
    println!(
        "{} {}",
        "Gateway status".bold(),
        format!(
            "(as of {}, {} min ago)",
            snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            age.num_minutes()
        )
        .dimmed()
    );

    let line = |label: &str, healthy: bool| {
        let mark = if healthy {
            "ok".green().to_string()
        } else {
            "DOWN".red().to_string()
        };
        println!("  [{:>4}] {}", mark, label);
    };
    line("relay daemon", snapshot.relay_active);
    line("access point", snapshot.ap_active);
    line("ip forwarding", snapshot.forwarding);
    line("traffic redirects", snapshot.redirects_ok);

    let healthy = snapshot.relay_active
        && snapshot.ap_active
        && snapshot.forwarding
        && snapshot.redirects_ok;
    if !healthy {
        println!(
            "\nrun {} for live detail",
            "torgatectl verify".bold()
        );
    }
    Ok(exit::OK)
}
