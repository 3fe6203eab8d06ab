//! Binary entry point.
//!
//! Grounded on the teacher's `main.rs` wiring order (load config → init
//! tracing before anything can log → build shared state → run → cleanup)
//! and its `ShutdownCoordinator` usage, minus the pieces this crate has no
//! use for (no database, no Prometheus exporter in this crate's dependency
//! set — see DESIGN.md).

use std::path::PathBuf;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ocpp_sim::config::AppConfig;
use ocpp_sim::support::shutdown::ShutdownCoordinator;
use ocpp_sim::{default_config_path, Supervisor};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let config_path = std::env::var("OCPP_SIM_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path());

    let app_config = match AppConfig::load(&config_path) {
        Ok(cfg) => {
            init_tracing(&cfg.log.level, cfg.log.json);
            info!(path = %config_path.display(), "configuration loaded");
            cfg
        }
        Err(err) => {
            init_tracing("info", false);
            error!(%err, "failed to load configuration, using defaults");
            AppConfig::default()
        }
    };

    let assets_dir = std::env::var("OCPP_SIM_ASSETS")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("assets"));

    let supervisor = Supervisor::new(config_path, assets_dir);

    if let Err(err) = supervisor.start().await {
        error!(%err, "supervisor failed to start");
        return std::process::ExitCode::FAILURE;
    }
    info!("fleet simulator started, press Ctrl+C to shut down");

    let shutdown = ShutdownCoordinator::new(app_config.worker.pool_max_inactive_time_ms.max(30_000) / 1000);
    shutdown.start_signal_listener();

    let clean = shutdown
        .shutdown_with_cleanup(|| async move {
            supervisor.stop().await;
        })
        .await;

    if clean {
        info!("fleet simulator shutdown complete");
        std::process::ExitCode::SUCCESS
    } else {
        warn!("fleet simulator shutdown timed out");
        std::process::ExitCode::FAILURE
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
