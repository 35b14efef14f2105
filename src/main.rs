//! alert-relay - delivers catalog change events to subscription destinations
//!
//! Loads subscriptions, change events and an optional recipient directory from
//! JSON files, then polls and dispatches on a fixed interval until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use alert_relay::DispatchConfig;
use alert_relay::consumer::DispatchScheduler;
use alert_relay::destination::DestinationFactory;
use alert_relay::store::{InMemoryDirectory, InMemoryEventStore, InMemoryFeedStore, InMemorySubscriptionStore, LogBroadcaster};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "alert-relay",
    about = "Delivers catalog change events to webhook, chat, email and activity feed destinations",
    version
)]
struct Args {
    /// JSON array of event subscriptions
    #[arg(long)]
    subscriptions: PathBuf,

    /// JSON array of change events
    #[arg(long)]
    events: PathBuf,

    /// Recipient directory (users, teams, admins, followers)
    #[arg(long)]
    directory: Option<PathBuf>,

    /// Run a single poll cycle per subscription and exit
    #[arg(long)]
    once: bool,

    /// Send test messages to every destination of the named subscription and exit
    #[arg(long, value_name = "SUBSCRIPTION")]
    test: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = Arc::new(DispatchConfig::from_env().context("invalid dispatcher configuration")?);

    let events = Arc::new(InMemoryEventStore::from_json_file(&args.events).context("failed to load change events")?);
    let subscriptions = Arc::new(
        InMemorySubscriptionStore::from_json_file(&args.subscriptions).context("failed to load subscriptions")?,
    );
    let directory = match &args.directory {
        Some(path) => InMemoryDirectory::from_json_file(path).context("failed to load recipient directory")?,
        None => InMemoryDirectory::default(),
    };

    let factory = DestinationFactory::new(
        Arc::clone(&config),
        Arc::new(directory),
        Arc::new(InMemoryFeedStore::new()),
        Arc::new(LogBroadcaster),
    )?;
    let scheduler = DispatchScheduler::from_store(events, subscriptions, Arc::new(factory)).await?;

    if let Some(name) = args.test {
        return send_tests(&scheduler, &name).await;
    }

    if args.once {
        let mut failed_runs = 0;
        for (name, result) in scheduler.run_all_once().await {
            match result {
                Ok(summary) => info!(
                    subscription = %name,
                    fetched = summary.fetched,
                    dispatched = summary.dispatched,
                    failed = summary.failed,
                    offset = summary.committed_offset,
                    "Run finished"
                ),
                Err(e) => {
                    failed_runs += 1;
                    error!(subscription = %name, "Run failed: {}", e);
                }
            }
        }
        if failed_runs > 0 {
            anyhow::bail!("{} subscription run(s) failed", failed_runs);
        }
        return Ok(());
    }

    let shutdown = scheduler.shutdown_signal();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                shutdown.store(true, Ordering::SeqCst);
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    scheduler.run().await;
    Ok(())
}

async fn send_tests(scheduler: &DispatchScheduler, name: &str) -> Result<()> {
    let Some(results) = scheduler.send_test_messages(name).await else {
        let known: Vec<&str> = scheduler.subscription_names().collect();
        anyhow::bail!("unknown subscription {} (known: {})", name, known.join(", "));
    };

    let mut failures = 0;
    for (destination_id, outcome) in results? {
        match outcome {
            Ok(()) => info!(destination_id = %destination_id, "Test message delivered"),
            Err(failure) => {
                failures += 1;
                error!(destination_id = %destination_id, "Test message failed: {}", failure);
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{} test message(s) failed", failures);
    }
    Ok(())
}
