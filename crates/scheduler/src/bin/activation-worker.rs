//! activation-worker — background reconciler for scheduled activations.
//!
//! Publishes events:
//! - `devflix.materials.synced` — per instance with activated entities
//! - `devflix.schedule.completed` — per pass that applied changes
//! - `devflix.cache.changed` — cache invalidations for activated instances

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use devflix_bus::{topics, NotificationBus, SubscribeOptions};
use devflix_cache::{CacheConfig, CoherenceChannel, CoherentCache, MemorySessionStore};
use devflix_core::config::load_dotenv;
use devflix_core::{Config, Instance};
use devflix_scheduler::{Scheduler, SchedulerConfig};
use devflix_store::MemoryStore;

// ── CLI ─────────────────────────────────────────────────────────────

/// Devflix activation worker — activates scheduled banners, materials, and
/// header links.
#[derive(Parser, Debug)]
#[command(name = "activation-worker", version, about)]
struct Cli {
    /// JSON file with the instances to serve (array of instance documents).
    #[arg(long, env = "DEVFLIX_SEED")]
    seed: Option<String>,

    /// Override the configured check interval, in seconds.
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Run a single reconciliation pass and exit.
    #[arg(long, default_value_t = false)]
    once: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(secs) = cli.interval_secs {
        config.scheduler.check_interval_secs = secs;
    }
    config.log_summary();

    let store = Arc::new(match &cli.seed {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("reading seed file {path}: {e}"))?;
            let instances: Vec<Instance> = serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("parsing seed file {path}: {e}"))?;
            info!(path = %path, count = instances.len(), "seeded instance store");
            MemoryStore::seeded(instances)
        }
        None => MemoryStore::new(),
    });

    let bus = NotificationBus::new();
    let session = Arc::new(match config.cache.quota_bytes {
        Some(quota) => MemorySessionStore::with_quota(quota),
        None => MemorySessionStore::new(),
    });
    let cache = CoherentCache::new(
        CacheConfig::from_settings(&config.cache),
        session,
        CoherenceChannel::new(),
        bus.clone(),
    );

    // Log every activation event so the worker's effects are visible
    // without attaching a UI.
    let _synced_log = bus.subscribe(
        topics::MATERIALS_SYNCED,
        SubscribeOptions::default(),
        |notification| {
            info!(payload = %notification.payload, "materials synced");
            Ok(())
        },
    );
    let _completed_log = bus.subscribe(
        topics::SCHEDULE_CHECK_COMPLETED,
        SubscribeOptions::default(),
        |notification| {
            info!(payload = %notification.payload, "schedule check completed");
            Ok(())
        },
    );

    let scheduler = Scheduler::new(
        SchedulerConfig::from_settings(&config.scheduler),
        store,
        cache,
        bus,
    );

    if cli.once {
        let summary = scheduler.force_check().await?;
        info!(
            items = summary.activated.total(),
            instances = summary.instances_updated,
            failed = summary.errors.len(),
            elapsed_ms = summary.elapsed_ms,
            "single pass complete"
        );
        return Ok(());
    }

    scheduler.start();
    info!("activation-worker running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    scheduler.stop();
    info!("activation-worker exited cleanly");

    Ok(())
}
