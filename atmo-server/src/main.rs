use std::path::PathBuf;
use std::sync::Arc;

use atmo_core::{Clock, SystemClock};
use atmo_ingest::Ingestor;
use atmo_ingest::store::{
    DeviceDirectory, MeasurementStore, MemoryMeasurementStore, SqliteMeasurementStore,
};
use atmo_notify::{
    ConnectionWatch, EmailTransport, MemoryEmailTransport, Notifier, SmtpEmailTransport,
};
use atmo_queue::{CommandQueue, DeliveryPump, MemoryCommandQueue, SqliteCommandQueue};
use atmo_server::api::{ApiState, api_router};
use atmo_server::config::{Config, StorageConfig};
use atmo_server::delivery::LogQueueTransport;
use atmo_server::identity::ApiKeys;
use atmo_server::registry::{DeviceRegistry, InMemoryDeviceRegistry, SqliteDeviceRegistry};
use atmo_server::simulator::Simulator;
use atmo_server::sweep::Sweeper;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "atmo-server")]
#[command(about = "Atmo environmental telemetry server")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "atmo.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    match config.storage.clone() {
        StorageConfig::Memory => {
            info!("Using in-memory storage backends");
            let registry = InMemoryDeviceRegistry::new();
            let store = MemoryMeasurementStore::new();
            let queue = MemoryCommandQueue::new();
            run_server(registry, store, queue, config).await?;
        }
        StorageConfig::Sqlite { data_dir } => {
            info!(path = ?data_dir, "Using SQLite storage backends");
            std::fs::create_dir_all(&data_dir)?;
            let registry = SqliteDeviceRegistry::new(data_dir.join("devices.db")).await?;
            let store = SqliteMeasurementStore::new(data_dir.join("measurements.db")).await?;
            let queue = SqliteCommandQueue::new(data_dir.join("commands.db")).await?;
            run_server(registry, store, queue, config).await?;
        }
    }

    Ok(())
}

async fn run_server<R, S, Q>(
    registry: R,
    store: S,
    queue: Q,
    config: Config,
) -> color_eyre::Result<()>
where
    R: DeviceRegistry + DeviceDirectory,
    S: MeasurementStore,
    Q: CommandQueue,
{
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let watch = Arc::new(ConnectionWatch::new());
    let keys = Arc::new(ApiKeys::from_config(&config.api_keys));
    let policy = config.health.policy();
    let ingestor = Ingestor::new(store.clone(), registry.clone());

    let transport: Arc<dyn EmailTransport> = match &config.notifications.smtp {
        Some(smtp) => Arc::new(SmtpEmailTransport::new(smtp.clone())?),
        None => {
            info!("No SMTP configured; connection notifications will not leave the process");
            Arc::new(MemoryEmailTransport::new())
        }
    };
    let notifier = Notifier::new(
        config.notifications.templates(),
        transport,
        config.notifications.recipients.clone(),
        config.notifications.dashboard_url.clone(),
    );

    let cancel = CancellationToken::new();

    let sweeper = Sweeper::new(
        registry.clone(),
        store.clone(),
        watch.clone(),
        notifier,
        policy,
        clock.clone(),
        config.sweep.interval(),
    );
    tokio::spawn(sweeper.run(cancel.clone()));

    let pump = DeliveryPump::new(
        queue.clone(),
        LogQueueTransport::new(),
        clock.clone(),
        config.delivery.pump_config(),
    );
    tokio::spawn(pump.run(cancel.clone()));

    if config.simulator.enabled {
        let simulator = Simulator::new(
            registry.clone(),
            ingestor.clone(),
            clock.clone(),
            config.simulator.clone(),
        );
        tokio::spawn(simulator.run(cancel.clone()));
    }

    let state = ApiState {
        registry,
        ingestor,
        queue,
        watch,
        policy,
        clock,
        keys,
    };
    let app = api_router(state);

    let listener = TcpListener::bind(config.server.http_addr).await?;
    info!(http_addr = %config.server.http_addr, "HTTP server listening");

    let cancel_clone = cancel.clone();
    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_clone.cancelled().await;
        }) => {
            if let Err(e) = result {
                tracing::error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    }

    Ok(())
}
