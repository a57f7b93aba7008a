use anyhow::Result;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

use cloudwatch_bridge::config::{LogLevel, load_bridge_config};
use cloudwatch_bridge::pipeline::Exporter;
use cloudwatch_bridge::publisher::{MemoryPublisher, Publisher};
use cloudwatch_bridge::scheduler::Scheduler;
use cloudwatch_bridge::stats::ExportStats;
use cloudwatch_bridge::util::logging;

#[derive(Parser, Debug)]
#[command(
    name = "cloudwatch-bridge",
    about = "Periodically export metric snapshots to CloudWatch",
    version
)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "cloudwatch-bridge.toml")]
    config: PathBuf,

    /// Log batches instead of sending them
    #[arg(long)]
    dry_run: bool,
}

#[cfg(feature = "http")]
fn remote_publisher(
    config: &cloudwatch_bridge::config::BridgeConfig,
) -> Result<Arc<dyn Publisher>> {
    use cloudwatch_bridge::publisher::{Anonymous, HttpPublisher};

    let publisher = HttpPublisher::new(config, Arc::new(Anonymous))?;
    info!("Publishing to {}", config.endpoint());
    Ok(Arc::new(publisher))
}

#[cfg(not(feature = "http"))]
fn remote_publisher(
    _config: &cloudwatch_bridge::config::BridgeConfig,
) -> Result<Arc<dyn Publisher>> {
    Err(anyhow::anyhow!(
        "Built without the `http` feature, only --dry-run is available"
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_bridge_config(&args.config) {
        Ok(config) => {
            logging::init(&config.log_level)?;
            info!("Configuration loaded from {}", args.config.display());
            config
        }
        Err(e) => {
            logging::init(&LogLevel::Error)?;
            error!("Failed to load configuration: {}", e);
            return Err(anyhow::anyhow!("Failed to load configuration: {}", e));
        }
    };

    let publisher: Arc<dyn Publisher> = if args.dry_run {
        info!("Dry run, batches will only be logged");
        Arc::new(MemoryPublisher::logging("dry-run"))
    } else {
        remote_publisher(&config)?
    };

    // the exporter reports on itself
    let stats = Arc::new(ExportStats::new());
    let exporter = Exporter::new(&config, stats.clone(), publisher, stats.clone())?;
    let scheduler = Scheduler::from_config(Arc::new(exporter), &config);

    let shutdown = scheduler.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt signal, shutting down...");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for interrupt signal: {}", e),
        }
    });

    info!(
        "Exporting to namespace {} in {}",
        config.namespace, config.region
    );
    scheduler.run().await;

    let totals = stats.snapshot();
    info!(
        "Exporter stopped after {} cycles, {} batches delivered, {} samples lost",
        totals.cycles_completed, totals.batches_succeeded, totals.samples_lost
    );
    Ok(())
}
