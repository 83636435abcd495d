//! Pentabot entrypoint.
//!
//! Boots the store, venue client and model gateway, initialises the five
//! firm portfolios, then serves the admin API while background schedulers
//! drive the daily cycle and the 30-minute order monitor.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pentabot::api::{self, AppState};
use pentabot::cache::CycleCache;
use pentabot::collectors::CollectorSet;
use pentabot::config::Config;
use pentabot::cycle::{run_cycle, EngineContext};
use pentabot::llm::ChatGatewayClient;
use pentabot::models::{default_roster, Portfolio};
use pentabot::orders::{MonitorConfig, OrderMonitor};
use pentabot::store::Store;
use pentabot::venue::{HttpVenueClient, VenueApi};

#[derive(Debug, Parser)]
#[command(name = "pentabot", about = "Five-firm prediction-market trading engine")]
struct Cli {
    /// Bind host; overrides HOST.
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Bind port; overrides PORT.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// SQLite database path; overrides DATABASE_PATH.
    #[arg(long, env = "DATABASE_PATH")]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration invalid");
            std::process::exit(1);
        }
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    info!(
        mode = config.bankroll_mode.as_str(),
        dry_run = config.dry_run,
        db = %config.database_path,
        "pentabot starting"
    );

    let store = Store::open(&config.database_path)
        .map_err(|e| anyhow::anyhow!("open store at {}: {e}", config.database_path))?;

    let venue: Arc<dyn VenueApi> = Arc::new(HttpVenueClient::new(
        &config.venue_base_url,
        &config.venue_api_key,
        config.request_timeout,
    )?);

    // Trading must be enabled before anything is submitted; dry runs never
    // touch the venue.
    if !config.dry_run {
        venue
            .enable_trading()
            .await
            .context("enable_trading failed at startup")?;
        info!("venue trading enabled");
    }

    let model = Arc::new(ChatGatewayClient::new(
        &config.llm_base_url,
        &config.llm_api_key,
        config.request_timeout,
    )?);

    let config = Arc::new(config);
    let ctx = EngineContext {
        store: store.clone(),
        venue,
        model,
        collectors: CollectorSet::default(),
        cache: Arc::new(CycleCache::new()),
        config: config.clone(),
        roster: default_roster(),
    };

    initialize_portfolios(&ctx).await?;

    let state = AppState::new(ctx.clone());
    if config.system_enabled {
        spawn_schedulers(ctx.clone(), state.clone());
    } else {
        warn!("SYSTEM_ENABLED=false, schedulers not started");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "api listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("api server")?;

    info!("shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn initialize_portfolios(ctx: &EngineContext) -> Result<()> {
    let initial = ctx.config.bankroll_mode.initial_balance();
    let roster = ctx.roster.clone();
    let now = chrono::Utc::now();

    let created = ctx
        .store
        .with_tx(move |tx| {
            let mut created = 0usize;
            for firm in &roster {
                if tx.get_portfolio(&firm.name)?.is_none() {
                    tx.upsert_portfolio(&Portfolio::new(&firm.name, initial, now))?;
                    created += 1;
                }
            }
            Ok(created)
        })
        .await
        .map_err(|e| anyhow::anyhow!("initialize portfolios: {e}"))?;

    if created > 0 {
        info!(created, initial, "portfolios initialised");
    }
    Ok(())
}

fn spawn_schedulers(ctx: EngineContext, state: AppState) {
    // Daily trading cycle.
    {
        let ctx = ctx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ctx.config.cycle_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let Ok(_guard) = state.cycle_lock.try_lock() else {
                    warn!("scheduled cycle skipped, previous still running");
                    continue;
                };
                match run_cycle(&ctx).await {
                    Ok(summary) => info!(
                        status = summary.status.as_str(),
                        executed = summary.bets_executed,
                        "scheduled cycle finished"
                    ),
                    Err(e) => error!(error = %e, "scheduled cycle failed"),
                }
            }
        });
    }

    // 30-minute order monitor.
    tokio::spawn(async move {
        let reevaluator = Arc::new(pentabot::analysis::PipelineReevaluator {
            venue: ctx.venue.clone(),
            model: ctx.model.clone(),
            collectors: ctx.collectors.clone(),
            cache: ctx.cache.clone(),
            roster: ctx.roster.clone(),
            retry: pentabot::retry::RetryPolicy::default(),
        });
        let monitor = OrderMonitor::new(
            ctx.store.clone(),
            ctx.venue.clone(),
            reevaluator,
            MonitorConfig::default(),
        );

        let mut ticker = tokio::time::interval(ctx.config.monitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match monitor.run_pass(chrono::Utc::now()).await {
                Ok(summary) => info!(
                    reviewed = summary.reviewed,
                    strikes = summary.strikes_issued,
                    cancelled = summary.cancelled,
                    "scheduled monitor pass finished"
                ),
                Err(e) => error!(error = %e, "scheduled monitor pass failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
