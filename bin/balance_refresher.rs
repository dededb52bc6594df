//! # Balance Refresher Service
//!
//! Periodically refreshes the owned-token sets of the watched wallets.
//!
//! ## Overview
//!
//! This service:
//! - Fetches the token listing (`registry.token_list_url`)
//! - Every `watch.refresh_interval_seconds`, runs the per-token and wrapper balance
//!   queries for `watch.wallets` and logs what each wallet holds
//! - Handles graceful shutdown on Ctrl+C
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin balance_refresher -- --once
//! cargo run --bin balance_refresher -- --wallet 0x0101010101010101010101010101010101010101
//! ```

use anyhow::{Context, Result};
use balance_aggregator_sdk::{
    encoder::parse_address,
    metrics,
    token_registry::{fetch_token_list, index_by_uuid, tradable_contracts},
    BalanceService, BalanceServiceConfig, EndpointPool, HoldingsRefresher, ResilientInvoker,
    Settings,
};
use clap::Parser;
use ethers::types::Address;
use ethers::utils::to_checksum;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Parser)]
#[command(name = "balance_refresher", about = "Refresh owned tokens of watched wallets")]
struct Args {
    /// Run a single refresh cycle and exit
    #[arg(long)]
    once: bool,

    /// Refresh only this wallet (interactive policy) and exit
    #[arg(long)]
    wallet: Option<String>,

    /// Settings file (defaults to ./Config.toml plus environment overrides)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::new().context("loading settings")?,
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.log.level.as_str()))
        .init();

    settings.validate()?;
    info!("Settings loaded ({} RPC endpoints)", settings.rpc.http_urls.len());

    #[cfg(feature = "observability")]
    {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .install()
            .context("installing Prometheus exporter")?;
    }
    metrics::describe_metrics();

    let pool = EndpointPool::from_http_urls(&settings.rpc.http_urls)?;
    let invoker = Arc::new(ResilientInvoker::new(
        pool,
        settings.contracts.multicall_address()?,
        settings.invoker.background.to_policy(),
    ));
    let service = BalanceService::new(
        Arc::clone(&invoker),
        BalanceServiceConfig {
            wrapper_address: settings.contracts.wrapper_address()?,
            max_subcalls_balance_of: settings.balances.max_subcalls_balance_of,
            max_subcalls_wrapper: settings.balances.max_subcalls_wrapper,
            inter_batch_pause: settings.balances.inter_batch_pause(),
        },
    )?;
    let refresher = HoldingsRefresher::new(
        service,
        settings.invoker.interactive.to_policy(),
        settings.balances.threshold_raw()?,
    );

    let mut tokens = load_tokens(&settings).await;

    if let Some(raw) = &args.wallet {
        let wallet = parse_address(raw)?;
        let owned = refresher.refresh_wallet(wallet, &tokens).await?;
        info!("{} holds {} tokens", to_checksum(&wallet, None), owned.len());
        for token in owned {
            info!("   {}", to_checksum(&token, None));
        }
        return Ok(());
    }

    let wallets = settings.watched_wallets()?;
    if wallets.is_empty() {
        warn!("watch.wallets is empty; cycles will only refresh the token listing");
    }

    let mut ticker = interval(settings.watch.refresh_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Refreshing {} wallets every {:?}. Press Ctrl+C to stop.",
        wallets.len(),
        settings.watch.refresh_interval()
    );

    let mut cycle = 0u64;
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                info!("Shutdown signal received, stopping");
                break;
            }
            _ = async {
                ticker.tick().await;
                cycle += 1;
                if cycle > 1 {
                    let fresh = load_tokens(&settings).await;
                    if !fresh.is_empty() {
                        tokens = fresh;
                    }
                }
                run_cycle(cycle, &refresher, &invoker, &wallets, &tokens).await;
            } => {
                if args.once {
                    break;
                }
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Tradable contracts from the listing; an unreachable listing yields no tokens.
async fn load_tokens(settings: &Settings) -> Vec<Address> {
    match fetch_token_list(&settings.registry.token_list_url, settings.registry.timeout()).await {
        Ok(listings) => {
            let index = index_by_uuid(listings);
            let contracts = tradable_contracts(index.values());
            info!("Token listing: {} entries, {} tradable contracts", index.len(), contracts.len());
            contracts
        }
        Err(e) => {
            warn!("Continuing without token listing: {:#}", e);
            Vec::new()
        }
    }
}

async fn run_cycle(
    cycle: u64,
    refresher: &HoldingsRefresher,
    invoker: &ResilientInvoker,
    wallets: &[Address],
    tokens: &[Address],
) {
    if wallets.is_empty() {
        return;
    }
    let start = Instant::now();
    match refresher.refresh_fleet(wallets, tokens).await {
        Ok(owned) => {
            let holding = owned.values().filter(|set| !set.is_empty()).count();
            info!(
                "[cycle #{}] {} wallets refreshed, {} hold tokens ({:?})",
                cycle,
                owned.len(),
                holding,
                start.elapsed()
            );
        }
        Err(e) => error!("[cycle #{}] refresh failed: {}", cycle, e),
    }

    for snapshot in invoker.pool().snapshot() {
        info!(
            "   {} attempts={} ok={} failed={} cooldown={:?}",
            snapshot.url, snapshot.attempts, snapshot.successes, snapshot.failures, snapshot.cooldown_remaining
        );
    }
}
