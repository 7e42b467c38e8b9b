//! torgated entrypoint - poll and render loops plus signal handling

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::info;

use torgated::config::{DisplayConfig, DEFAULT_CONFIG_PATH};
use torgated::matrix::{open_device, DummyMatrix, LedMatrix};
use torgated::probes::{self, DisplayState, TrafficMeter};
use torgated::render::{OverrideMode, OverrideSet, Quadrant, Renderer};

#[derive(Parser)]
#[command(name = "torgated")]
#[command(about = "LED status display for the torgate gateway", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured brightness (0.0 - 1.0)
    #[arg(long)]
    brightness: Option<f32>,

    /// Interface to meter for the traffic quadrant
    #[arg(long)]
    iface: Option<String>,

    /// Run without LED hardware output
    #[arg(long)]
    no_hat: bool,

    /// Cycle a test pattern through the quadrants
    #[arg(long)]
    demo: bool,

    /// Log the polled state every cycle
    #[arg(long)]
    print_debug: bool,
}

struct Shared {
    state: DisplayState,
    overrides: OverrideSet,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = DisplayConfig::load(&cli.config)?;
    if let Some(brightness) = cli.brightness {
        config.brightness = brightness;
    }
    if let Some(iface) = cli.iface {
        config.iface = iface;
    }
    if !config.enabled {
        info!("display disabled in configuration, exiting");
        return Ok(());
    }

    info!("torgated v{} starting", env!("CARGO_PKG_VERSION"));

    let device: Box<dyn LedMatrix> = if cli.no_hat {
        Box::new(DummyMatrix::default())
    } else {
        open_device(&config.device, config.brightness)
    };

    let shared = Arc::new(Mutex::new(Shared {
        state: DisplayState::default(),
        overrides: OverrideSet::default(),
    }));
    let shutdown = Arc::new(AtomicBool::new(false));
    let epoch = Instant::now();

    let poll_handle = spawn_poll_loop(
        config.clone(),
        shared.clone(),
        shutdown.clone(),
        cli.print_debug,
    );
    let render_handle = spawn_render_loop(config, device, shared.clone(), shutdown.clone(), epoch);

    if cli.demo {
        let shared = shared.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let colors = [(255, 0, 0), (0, 255, 0), (0, 0, 255), (255, 255, 0)];
            let mut i = 0usize;
            while !shutdown.load(Ordering::SeqCst) {
                let quadrant = Quadrant::ALL[i % 4];
                let now = epoch.elapsed().as_secs_f64();
                if let Ok(mut guard) = shared.lock() {
                    guard
                        .overrides
                        .set(quadrant, colors[i % 4], OverrideMode::Blink, Some(now + 1.5));
                }
                i += 1;
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        });
    }

    // systemctl stop delivers SIGTERM; both signals must clear the display
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = terminate.recv() => info!("received SIGTERM"),
    }
    info!("shutting down");
    shutdown.store(true, Ordering::SeqCst);
    poll_handle.await?;
    render_handle.await?;

    Ok(())
}

fn spawn_poll_loop(
    config: DisplayConfig,
    shared: Arc<Mutex<Shared>>,
    shutdown: Arc<AtomicBool>,
    print_debug: bool,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let interval = config.poll_interval();
        let mut meter = TrafficMeter::default();
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            let state = probes::poll(&config, &mut meter);
            if print_debug {
                info!(?state, "poll");
            }
            match shared.lock() {
                Ok(mut guard) => guard.state = state,
                Err(_) => break,
            }
            std::thread::sleep(interval.saturating_sub(started.elapsed()));
        }
    })
}

fn spawn_render_loop(
    config: DisplayConfig,
    mut device: Box<dyn LedMatrix>,
    shared: Arc<Mutex<Shared>>,
    shutdown: Arc<AtomicBool>,
    epoch: Instant,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let frame_interval = config.frame_interval();
        let renderer = Renderer::new(config);
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            let now = epoch.elapsed().as_secs_f64();
            let frame = match shared.lock() {
                Ok(guard) => renderer.render(&guard.state, &guard.overrides, now),
                Err(_) => break,
            };
            device.paint(&frame);
            std::thread::sleep(frame_interval.saturating_sub(started.elapsed()));
        }
        device.clear();
    })
}
