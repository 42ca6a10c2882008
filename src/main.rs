use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use syncsched::auth::{AuthGate, LoginStatus};
use syncsched::config::Config;
use syncsched::events::{EventBus, SyncEvent};
use syncsched::registry::CollectionRegistry;
use syncsched::scheduler::{SyncRunner, SyncScheduler};
use syncsched::tracker::SCORE_INCREMENT_MEDIUM;

/// Demo driver for the score-driven sync scheduler.
///
/// Wires a registry, auth gate, and scheduler together, feeds synthetic
/// score traffic, and prints the scheduler's decisions until interrupted.
#[derive(Parser, Debug)]
#[command(name = "syncsched", version, about)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the sync threshold
    #[arg(long)]
    threshold: Option<u32>,

    /// Known device count (selects the threshold tier)
    #[arg(long)]
    devices: Option<u32>,

    /// Milliseconds between synthetic score bumps
    #[arg(long, default_value_t = 1000)]
    traffic_interval_ms: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(config: &Config) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = config.log_level.as_deref() {
        builder.parse_filters(level);
    }
    builder.try_init().context("Failed to initialize logging")?;
    Ok(())
}

/// Runner that pretends to sync: logs the cycle and reports completion on
/// the bus after a short delay.
struct DemoRunner {
    bus: EventBus,
    cycle_duration: Duration,
}

#[async_trait]
impl SyncRunner for DemoRunner {
    async fn start(&self) -> syncsched::Result<()> {
        info!("demo sync cycle started");
        let bus = self.bus.clone();
        let duration = self.cycle_duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            bus.publish(SyncEvent::SyncFinished);
        });
        Ok(())
    }
}

/// Print scheduler decisions as they happen.
async fn print_events(mut rx: tokio::sync::broadcast::Receiver<SyncEvent>, verbose: bool) {
    while let Ok(event) = rx.recv().await {
        match event {
            SyncEvent::SyncAttemptStarted => {
                println!("{}", "sync attempt started".green().bold());
            }
            SyncEvent::SyncAttemptFinished => {
                println!("{}", "sync attempt finished".green());
            }
            SyncEvent::ScoreChanged { collection, score } if verbose => {
                println!("{} {} -> {}", "score".yellow(), collection, score);
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref())?;
    setup_logging(&config)?;

    info!("Starting syncsched demo");

    let bus = EventBus::new();
    let registry = Arc::new(CollectionRegistry::new(bus.clone()));
    let auth = Arc::new(AuthGate::new(bus.clone()));
    let runner = Arc::new(DemoRunner {
        bus: bus.clone(),
        cycle_duration: Duration::from_millis(500),
    });

    for collection in &config.collections {
        registry
            .register(collection)
            .context(format!("Failed to register collection '{collection}'"))?;
    }

    let mut scheduler_config = config.scheduler.to_scheduler_config();
    if let Some(devices) = cli.devices {
        scheduler_config.threshold = syncsched::scheduler::threshold_for_devices(devices);
    }
    if let Some(threshold) = cli.threshold {
        scheduler_config.threshold = threshold;
    }

    let collections = config.collections.join(", ");
    let threshold = scheduler_config.threshold.to_string();
    println!(
        "collections: {} | threshold: {} | debounce: {:?}",
        collections.as_str().cyan(),
        threshold.as_str().cyan(),
        scheduler_config.debounce,
    );

    let handle = SyncScheduler::new(
        registry.clone(),
        auth.clone(),
        runner,
        bus.clone(),
        scheduler_config,
    )
    .spawn();

    tokio::spawn(print_events(bus.subscribe(), cli.verbose));

    // The demo is "logged in" from the start; flip this to see the
    // scheduler hold score instead of syncing.
    auth.set_status(LoginStatus::Succeeded);

    // Synthetic traffic: round-robin bumps across collections, with the
    // clients tracker standing in for device-list churn.
    let traffic = {
        let registry = registry.clone();
        let collections = config.collections.clone();
        let interval = Duration::from_millis(cli.traffic_interval_ms);
        tokio::spawn(async move {
            let mut tick: usize = 0;
            loop {
                tokio::time::sleep(interval).await;
                if collections.is_empty() || tick % 5 == 4 {
                    registry.clients().bump(SCORE_INCREMENT_MEDIUM);
                } else if let Ok(tracker) = registry.get(&collections[tick % collections.len()]) {
                    tracker.bump(SCORE_INCREMENT_MEDIUM);
                }
                tick += 1;
            }
        })
    };

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    println!("{}", "shutting down".yellow());

    traffic.abort();
    handle.shutdown().await;

    Ok(())
}
