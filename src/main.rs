use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use realtime_analytics::client::{ClientHandle, DashboardClient, DashboardEvent};
use realtime_analytics::logging::init_logging;
use realtime_analytics::{AnalyticsConfig, AnalyticsEngine, AnalyticsServer, MetricGenerator};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Real-time analytics streaming server and dashboard client
#[derive(Parser)]
#[command(name = "realtime-analytics")]
#[command(about = "Real-time metrics streaming with predictive analytics", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ANALYTICS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides the configuration file)
    #[arg(long, env = "ANALYTICS_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the metrics streaming server
    Serve {
        /// Bind address (e.g. 0.0.0.0:3001)
        #[arg(short, long)]
        bind: Option<String>,

        /// Disable injected activity spikes
        #[arg(long)]
        no_anomalies: bool,
    },

    /// Connect to a server and run the analytics engine
    Watch {
        /// Server WebSocket URL
        #[arg(short, long)]
        url: Option<String>,

        /// Requested push interval in milliseconds
        #[arg(short, long)]
        interval: Option<u64>,

        /// Write a JSON export here on exit
        #[arg(short, long)]
        export: Option<PathBuf>,
    },

    /// Print a commented sample configuration
    SampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::SampleConfig = cli.command {
        print!("{}", AnalyticsConfig::sample_toml()?);
        return Ok(());
    }

    let mut config =
        AnalyticsConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    let _log_guard = init_logging(&config.log)?;

    match cli.command {
        Commands::Serve { bind, no_anomalies } => serve(config, bind, no_anomalies).await,
        Commands::Watch {
            url,
            interval,
            export,
        } => watch(config, url, interval, export).await,
        Commands::SampleConfig => Ok(()),
    }
}

async fn serve(
    mut config: AnalyticsConfig,
    bind: Option<String>,
    no_anomalies: bool,
) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind_addr = bind;
    }
    if no_anomalies {
        config.generator.anomaly_injection = false;
    }
    config.validate()?;

    let generator = MetricGenerator::new(config.generator_config()).shared();
    let mut server = AnalyticsServer::new(config.server_config()?, generator);
    let addr = server.start().await?;
    info!(
        max_connections = config.server.max_connections,
        "📡 Streaming metrics on ws://{}/ws",
        addr
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown signal received");

    let stats = server.dispatcher().statistics().await;
    info!(
        total_connections = stats.total_connections,
        active_connections = stats.active_connections,
        "Final dispatch statistics"
    );
    server.stop().await?;
    Ok(())
}

async fn watch(
    mut config: AnalyticsConfig,
    url: Option<String>,
    interval: Option<u64>,
    export: Option<PathBuf>,
) -> Result<()> {
    if let Some(url) = url {
        config.client.url = url;
    }
    if let Some(interval) = interval {
        config.client.update_interval_ms = interval;
    }

    let engine = AnalyticsEngine::new(config.engine_config())?;
    let client = DashboardClient::new(config.client_config(), engine);
    let events = client.events().subscribe();
    let (handle, mut task) = client.spawn();
    let printer = tokio::spawn(log_events(events));

    info!(url = %config.client.url, "👀 Watching analytics stream");

    tokio::select! {
        result = &mut task => {
            printer.abort();
            return result.context("Client task panicked")?.map_err(Into::into);
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
        }
    }

    info!("Shutdown signal received");
    if let Some(path) = export {
        write_export(&handle, &path).await?;
    }

    handle.shutdown().await.ok();
    if let Err(e) = task.await.context("Client task panicked")? {
        warn!("Client stopped with error: {}", e);
    }
    printer.abort();
    Ok(())
}

async fn write_export(handle: &ClientHandle, path: &Path) -> Result<()> {
    let snapshot = handle.export().await?;
    snapshot
        .write_json(path)
        .with_context(|| format!("Failed to write export to {}", path.display()))?;
    info!(
        events = snapshot.metrics.total_events,
        "💾 Exported dashboard state to {}",
        path.display()
    );
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<DashboardEvent>) {
    loop {
        match events.recv().await {
            Ok(DashboardEvent::SampleReceived(sample)) => {
                debug!(stream = %sample.kind(), "{:?}", sample.fields());
            }
            Ok(DashboardEvent::AnomalyDetected(anomaly)) => {
                warn!("🚨 {}", anomaly.describe());
            }
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!(event = event.name(), "{}", json),
                Err(e) => error!("Failed to serialize event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event consumer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
