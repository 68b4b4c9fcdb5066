//! Parking gateway - slot occupancy, ticketing and gate control
//!
//! Runs on a small Linux board wired to per-bay IR sensors, an ultrasonic
//! entry sensor and a gate servo.
//!
//! Module structure:
//! - `domain/` - Occupancy data model (slots, tickets, snapshots)
//! - `services/` - Sampler, occupancy engine, gate, display, sensing loop
//! - `io/` - Dashboard, notification queue and transports, hardware adapters
//! - `infra/` - Config, metrics, task supervision

use anyhow::Context;
use clap::Parser;
use parking_gateway::infra::{spawn_supervised, Config, Metrics, RestartPolicy, TaskExit};
use parking_gateway::io::hardware::{FileRange, LogDisplay, PwmServo, SysfsPresence};
use parking_gateway::io::{build_transport, run_dashboard, start_notifications};
use parking_gateway::services::{ParkingLoop, Peripherals};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Parking gateway - slot occupancy and gate controller
#[derive(Parser, Debug)]
#[command(name = "parking-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

const RESTART_BACKOFF: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(
        git_hash = env!("GIT_HASH"),
        profile = env!("BUILD_PROFILE"),
        "parking-gateway starting"
    );

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        slots = ?config.slot_ids(),
        poll_ms = %config.poll_interval_ms(),
        exit_grace_ms = %config.exit_grace_ms(),
        fee_per_min = %config.fee_per_min(),
        transport = %config.notify_transport().as_str(),
        dashboard_ports = ?config.dashboard_ports(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Periodic metrics log
    let reporter_metrics = metrics.clone();
    let mut reporter_shutdown = shutdown_rx.clone();
    let metrics_interval = Duration::from_secs(config.metrics_interval_secs().max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(metrics_interval);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => reporter_metrics.report().log(),
                _ = reporter_shutdown.changed() => break,
            }
        }
    });

    // Notification queue and worker
    let mut background = Vec::new();
    let notifier = start_notifications(
        &config,
        build_transport(&config),
        metrics.clone(),
        shutdown_rx.clone(),
    )
    .map(|(notifier, worker)| {
        background.push(worker);
        notifier
    });

    let peripherals = Peripherals {
        presence: Box::new(SysfsPresence::from_config(&config)),
        range: Box::new(FileRange::new(config.range_path())),
        actuator: Box::new(PwmServo::new(config.servo_duty_path())),
        display: Some(Box::new(LogDisplay::default())),
    };
    let parking_loop = ParkingLoop::new(&config, peripherals, notifier, metrics.clone());
    let snapshots = parking_loop.subscribe();

    if config.dashboard_enabled() {
        let dashboard_config = config.clone();
        let dashboard_metrics = metrics.clone();
        let dashboard_shutdown = shutdown_rx.clone();
        background.push(spawn_supervised(
            "dashboard",
            RestartPolicy::OnPanic { backoff: RESTART_BACKOFF },
            shutdown_rx.clone(),
            move || {
                run_dashboard(
                    dashboard_config.clone(),
                    snapshots.clone(),
                    dashboard_metrics.clone(),
                    dashboard_shutdown.clone(),
                )
            },
        ));
    }

    // The sensing loop is never restarted: a panic there is a broken invariant
    let mut parking_loop = Some(parking_loop);
    let loop_shutdown = shutdown_rx.clone();
    let mut sensing = spawn_supervised("parking_loop", RestartPolicy::Never, shutdown_rx, move || {
        let taken = parking_loop.take();
        let shutdown = loop_shutdown.clone();
        async move {
            if let Some(mut parking_loop) = taken {
                parking_loop.run(shutdown).await;
            }
        }
    });

    let joined = tokio::select! {
        res = &mut sensing => res,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown_signal_received");
            let _ = shutdown_tx.send(true);
            (&mut sensing).await
        }
    };
    let exit = joined.context("parking loop task failed to join")?;

    let _ = shutdown_tx.send(true);
    for handle in background {
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            warn!("background_task_shutdown_timeout");
        }
    }

    if exit == TaskExit::Panicked {
        error!("parking_loop_panicked");
        anyhow::bail!("parking loop panicked");
    }

    info!("parking-gateway shutdown complete");
    Ok(())
}
