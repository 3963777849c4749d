//! # SpawnWatch: respawn window tracker daemon
//!
//! Seeds the entity catalog, then runs the scheduler loop for every tenant.
//!
//! Usage:
//!   spawnwatch                          # Run with ~/.spawnwatch/config.toml
//!   spawnwatch --config ./sw.toml       # Custom config file
//!   spawnwatch --dry-run --once         # One tick against an in-memory transport

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use spawnwatch_channels::{DiscordTransport, MemoryTransport};
use spawnwatch_core::SpawnWatchConfig;
use spawnwatch_core::traits::Transport;
use spawnwatch_scheduler::{
    Catalog, EventBus, Reconciler, Scheduler, StateStore, TenantDefaults, spawn_scheduler,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "spawnwatch",
    version,
    about = "⏰ SpawnWatch: multi-tenant respawn window tracker"
)]
struct Cli {
    /// Config file (default: ~/.spawnwatch/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path, overrides [database] path
    #[arg(long)]
    db: Option<String>,

    /// Log messages instead of sending them to Discord
    #[arg(long)]
    dry_run: bool,

    /// Run a single tick for all tenants and exit
    #[arg(long)]
    once: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "spawnwatch=debug,spawnwatch_scheduler=debug,spawnwatch_channels=debug"
    } else {
        "spawnwatch=info,spawnwatch_scheduler=info,spawnwatch_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => SpawnWatchConfig::load_from(&expand_path(path))?,
        None => SpawnWatchConfig::load()?,
    };

    let db_path = match &cli.db {
        Some(path) => expand_path(path),
        None => config.database.resolved_path(),
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let defaults = TenantDefaults {
        lookahead_hours: config.scheduler.default_lookahead_hours,
        ping_minutes: config.scheduler.default_ping_minutes,
        alert_minutes: config.scheduler.default_alert_minutes,
    };
    let store = Arc::new(
        StateStore::open(&db_path)
            .with_context(|| format!("opening {}", db_path.display()))?
            .with_defaults(defaults),
    );
    tracing::info!("💾 State store: {}", db_path.display());

    if let Some(catalog_path) = &config.catalog_path {
        let catalog = Catalog::load(&expand_path(catalog_path))
            .with_context(|| format!("loading catalog {catalog_path}"))?;
        catalog.seed(&store)?;
    }

    let transport: Arc<dyn Transport> = if cli.dry_run {
        tracing::info!("🧪 Dry run: messages stay in memory");
        Arc::new(MemoryTransport::new())
    } else {
        let token = config
            .discord_token()
            .context("no Discord token: set [discord] bot_token or DISCORD_TOKEN")?;
        let discord = DiscordTransport::new(config.discord.clone(), token);
        discord.connect().await?;
        Arc::new(discord)
    };

    let scheduler = Arc::new(Scheduler::from_config(
        store.clone(),
        transport.clone(),
        &config.scheduler,
    ));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        transport.clone(),
        config.scheduler.reconcile_scan_limit,
    ));
    let bus = Arc::new(EventBus::new());
    bus.subscribe(reconciler);
    bus.subscribe(scheduler.clone());
    tracing::info!(
        "🚌 Event bus ready ({} subscribers, transport: {})",
        bus.subscriber_count(),
        transport.name()
    );

    if cli.once {
        let report = scheduler.run_tick(None).await?;
        tracing::info!(
            "✅ Tick done: {} tenants, {} pings, {} DMs, {} cleaned, {} failed",
            report.tenants,
            report.pings,
            report.alerts,
            report.cleaned,
            report.failed_tenants
        );
        return Ok(());
    }

    let handle = tokio::spawn(spawn_scheduler(
        scheduler,
        config.scheduler.tick_interval_secs,
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("👋 Shutting down");
    handle.abort();
    Ok(())
}
