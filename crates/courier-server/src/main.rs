mod intake;
mod sender;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use courier_core::{
    CourierConfig, DispatcherPool, FixedWindowLimiter, JobStore, QueueFront, RetryPolicy,
    RocksDbStorage, Sender,
};
use tracing::info;

use sender::StdoutSender;

fn load_config() -> CourierConfig {
    let paths = ["courier.toml", "/etc/courier/courier.toml"];

    for path in &paths {
        if Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => {
                        info!(path, "loaded configuration");
                        return config;
                    }
                    Err(e) => {
                        eprintln!("error parsing {path}: {e}");
                        std::process::exit(1);
                    }
                },
                Err(e) => {
                    eprintln!("error reading {path}: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    info!("no config file found, using defaults");
    CourierConfig::default()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    courier_core::telemetry::init_tracing();

    let config = load_config();

    let data_dir = std::env::var("COURIER_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let storage = Arc::new(RocksDbStorage::open(&data_dir)?);
    let store = Arc::new(JobStore::new(storage));

    let limiter = Arc::new(FixedWindowLimiter::new(
        config.limiter.max_per_window,
        Duration::from_millis(config.limiter.window_ms),
    ));
    let retry = RetryPolicy::from_config(&config.retry);

    let pool = DispatcherPool::start(
        &config,
        Arc::clone(&store),
        limiter,
        retry,
        Arc::new(StdoutSender) as Arc<dyn Sender>,
    )?;
    let front = QueueFront::new(Arc::clone(&store), pool.wake_handle());

    info!(%data_dir, "courier started, reading events from stdin");
    let intake_task = tokio::spawn(intake::run(front));

    shutdown_signal().await;

    intake_task.abort();
    pool.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to install CTRL+C handler");
    }

    info!("received shutdown signal");
}
