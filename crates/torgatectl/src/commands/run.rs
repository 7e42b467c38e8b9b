//! apply / uninstall - the two mutating commands
//!
//! Both funnel into one runner: take the run lock, wire ctrl-c to the
//! abort flag, drive the orchestrator on a blocking thread and render the
//! report. Dry-run skips the lock since it mutates nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use owo_colors::OwoColorize;

use torgate_common::{
    exit, Collaborators, GatewayConfig, GatewayError, Orchestrator, RunMode, RunReport, StageStatus,
};

use crate::lock::RunLock;

pub async fn apply(config: GatewayConfig, dry_run: bool, json: bool) -> Result<i32> {
    let mode = if dry_run {
        RunMode::DryRun
    } else {
        RunMode::Apply
    };
    run(config, mode, false, json).await
}

pub async fn uninstall(config: GatewayConfig, dry_run: bool, json: bool) -> Result<i32> {
    run(config, RunMode::Uninstall, dry_run, json).await
}

async fn run(config: GatewayConfig, mode: RunMode, preview_uninstall: bool, json: bool) -> Result<i32> {
    let dry = mode.is_dry_run() || preview_uninstall;
    let _lock = if dry {
        None
    } else {
        Some(RunLock::acquire(config.lock_path())?)
    };

    let abort = Arc::new(AtomicBool::new(false));
    let flag = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt received, finishing current stage then stopping");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let orchestrator = Orchestrator::new(config, Collaborators::production());
    let result = tokio::task::spawn_blocking(move || {
        if preview_uninstall {
            orchestrator.preview_uninstall(abort)
        } else {
            orchestrator.run(mode, abort)
        }
    })
    .await?;

    match result {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, mode, preview_uninstall);
            }
            Ok(report.exit_code)
        }
        Err(e @ (GatewayError::Precondition(_) | GatewayError::Config(_))) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            Ok(exit::PRECONDITION)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_report(report: &RunReport, mode: RunMode, preview_uninstall: bool) {
    let heading = match (mode, preview_uninstall) {
        (RunMode::Uninstall, true) => "Uninstall (dry run)",
        (RunMode::Uninstall, false) => "Uninstall",
        (RunMode::DryRun, _) => "Apply (dry run)",
        (RunMode::Apply, _) => "Apply",
    };
    println!(
        "{} {}",
        heading.bold(),
        format!("(run {})", report.run_id).dimmed()
    );

    let dry = report.mode.is_dry_run();
    for stage in &report.pipeline.stages {
        let mark = match stage.status {
            StageStatus::Succeeded => "ok".green().to_string(),
            StageStatus::Degraded => "degraded".yellow().to_string(),
            StageStatus::Failed => "FAIL".red().to_string(),
            StageStatus::Skipped => "skip".dimmed().to_string(),
            StageStatus::Pending | StageStatus::Running => "...".to_string(),
        };
        let verb = if dry { "would change" } else { "changed" };
        println!(
            "  [{:>8}] {:<12} {} {}, {} already in place ({} ms)",
            mark, stage.name, verb, stage.rules_applied, stage.rules_satisfied, stage.duration_ms
        );
        if let Some(error) = &stage.error {
            println!("             {}", error.red());
        }
    }

    if let Some(verification) = &report.verification {
        super::print_verification(verification);
    }

    match report.exit_code {
        exit::OK if mode == RunMode::Apply && !dry => {
            println!("\n{}", "Gateway configuration is in place.".green())
        }
        exit::OK if mode == RunMode::Uninstall && !dry => {
            println!("\n{}", "Gateway configuration removed.".green())
        }
        exit::STAGE_FAILED => println!(
            "\n{}",
            "A stage failed; re-run `torgatectl apply` after fixing the cause, or `torgatectl uninstall` to roll back."
                .red()
        ),
        exit::VERIFICATION_FAILED => println!(
            "\n{}",
            "Configuration applied but verification found problems (see above).".yellow()
        ),
        _ => {}
    }
}
