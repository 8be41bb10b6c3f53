// =============================================================================
// Funding Scanner — Main Entry Point
// =============================================================================
//
// Strict startup order: load+validate config, build the exchange client,
// fetch instruments and build the category map, run the first watchlist
// pass, start the volatility refresher, start the WS connector(s), start the
// scheduler, then sit in a liveness-check wait loop until shutdown. Shutdown
// fans a single `CancellationToken` out to every spawned worker and then
// waits, bounded by `config.shutdown_timeout_secs`, on all of their
// `JoinHandle`s together before clearing shared state.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod config;
mod error;
mod exchange;
mod scheduler;
mod snapshot;
mod store;
mod types;
mod volatility;
mod watchlist;
mod ws;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::exchange::{ExchangeClient, ExchangeClientConfig};
use crate::store::Store;
use crate::types::Category;
use crate::volatility::{VolatilityEngine, VolatilityEngineConfig};
use crate::watchlist::builder::build_watchlist;
use crate::ws::{WSConnector, WSConnectorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("funding scanner starting up");

    let config_path = std::env::var("FUNDING_SCANNER_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Arc::new(config::load_or_fail(&config_path)?);
    info!(category = ?config.category, limit = config.limit, "config loaded and validated");

    // ── 2. Exchange client (rate limiter + breaker) ──────────────────────
    let client = Arc::new(ExchangeClient::new(ExchangeClientConfig {
        base_url: "https://api.bybit.com".to_string(),
        http_timeout: Duration::from_secs(config.http_timeout_secs),
        rate_limit_n: config.rate_limit_n,
        rate_limit_window: Duration::from_secs(config.rate_limit_window_secs),
        retry_max_attempts: config.retry_max_attempts,
        retry_base: Duration::from_secs_f64(config.retry_base_secs),
        breaker_failure_threshold: config.breaker_failure_threshold,
        breaker_open_duration: Duration::from_secs(config.breaker_open_secs),
    }));

    let store = Arc::new(Store::new());
    let cancel = CancellationToken::new();
    let mut worker_handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    // ── 3 & 4. First watchlist pass — fetch instruments, build category map,
    // populate Store ──────────────────────────────────────────────────────
    let volatility = Arc::new(VolatilityEngine::new(VolatilityEngineConfig {
        ttl_secs: config.volatility_ttl_sec,
        parallelism: config.volatility_parallelism,
        max_cache_entries: 2000,
        kline_window: crate::volatility::sigma::DEFAULT_WINDOW,
    }));

    let first_pass = build_watchlist(&client, &volatility, &config, None).await?;
    let mut category_map = HashMap::new();
    for s in &first_pass.linear_symbols {
        category_map.insert(s.clone(), Category::Linear);
    }
    for s in &first_pass.inverse_symbols {
        category_map.insert(s.clone(), Category::Inverse);
    }
    store.install_watchlist(
        first_pass.linear_symbols.clone(),
        first_pass.inverse_symbols.clone(),
        category_map,
        first_pass.funding_table,
    );
    info!(
        linear = first_pass.linear_symbols.len(),
        inverse = first_pass.inverse_symbols.len(),
        "initial watchlist installed"
    );

    // ── 5. Volatility refresher ───────────────────────────────────────────
    {
        let volatility = volatility.clone();
        let client = client.clone();
        let store = store.clone();
        let ttl = config.volatility_ttl_sec;
        let cancel = cancel.clone();
        worker_handles.push(tokio::spawn(async move {
            crate::volatility::engine::run_refresh_loop(volatility, client, store, ttl, cancel).await;
        }));
    }

    // ── 6. WS connector(s) ────────────────────────────────────────────────
    let mut ws_connectors: HashMap<Category, WSConnector> = HashMap::new();
    let ws_config_base = WSConnectorConfig {
        idle_timeout: Duration::from_secs(config.ws_idle_secs),
        subscribe_chunk: config.ws_subscribe_chunk,
        ..WSConnectorConfig::default()
    };

    let active_categories = config.category.categories();
    if active_categories.contains(&Category::Linear) {
        let (connector, handle) = WSConnector::spawn(
            Category::Linear,
            store.clone(),
            first_pass.linear_symbols.clone(),
            WSConnectorConfig {
                idle_timeout: ws_config_base.idle_timeout,
                subscribe_chunk: ws_config_base.subscribe_chunk,
                ..WSConnectorConfig::default()
            },
            cancel.clone(),
        );
        ws_connectors.insert(Category::Linear, connector);
        worker_handles.push(handle);
    }
    if active_categories.contains(&Category::Inverse) {
        let (connector, handle) = WSConnector::spawn(
            Category::Inverse,
            store.clone(),
            first_pass.inverse_symbols.clone(),
            WSConnectorConfig {
                idle_timeout: ws_config_base.idle_timeout,
                subscribe_chunk: ws_config_base.subscribe_chunk,
                ..WSConnectorConfig::default()
            },
            cancel.clone(),
        );
        ws_connectors.insert(Category::Inverse, connector);
        worker_handles.push(handle);
    }
    info!(connectors = ws_connectors.len(), "WS connector(s) started");

    // ── 7. Scheduler (rescan + imminent-funding watch) ───────────────────
    {
        let client = client.clone();
        let volatility = volatility.clone();
        let store = store.clone();
        let ws_connectors = ws_connectors.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        worker_handles.push(tokio::spawn(async move {
            scheduler::run_rescan_loop(client, volatility, store, ws_connectors, config, cancel).await;
        }));
    }

    let (imminent_tx, mut imminent_rx) = mpsc::channel(64);
    {
        let store = store.clone();
        let live_ttl = config.live_ttl_secs as i64;
        let threshold = config.funding_threshold_minutes;
        let interval = config.imminent_scan_secs;
        let cancel = cancel.clone();
        worker_handles.push(tokio::spawn(async move {
            scheduler::run_imminent_watch_loop(store, live_ttl, threshold, interval, imminent_tx, cancel).await;
        }));
    }
    worker_handles.push(tokio::spawn(async move {
        while let Some(event) = imminent_rx.recv().await {
            info!(symbol = %event.symbol, seconds_remaining = event.seconds_remaining, "imminent-funding event (trading layer out of scope)");
        }
    }));

    // ── Snapshot delivery: stdout table + read-only HTTP endpoint ─────────
    {
        let store = store.clone();
        let live_ttl = config.live_ttl_secs as i64;
        let interval = config.display_interval_seconds;
        let cancel = cancel.clone();
        worker_handles.push(tokio::spawn(async move {
            snapshot::run_display_loop(store, live_ttl, interval, cancel).await;
        }));
    }

    {
        let store = store.clone();
        let live_ttl = config.live_ttl_secs as i64;
        let bind_addr = config.bind_addr.clone();
        let cancel = cancel.clone();
        worker_handles.push(tokio::spawn(async move {
            let app = api::rest::router(store, live_ttl);
            match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(listener) => {
                    info!(addr = %bind_addr, "snapshot API listening");
                    let result = axum::serve(listener, app)
                        .with_graceful_shutdown(async move { cancel.cancelled().await })
                        .await;
                    if let Err(e) = result {
                        error!(error = %e, "snapshot API server failed");
                    }
                }
                Err(e) => error!(error = %e, addr = %bind_addr, "failed to bind snapshot API"),
            }
        }));
    }

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 8. Wait state; liveness checks until shutdown signal ─────────────
    let mut liveness = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("shutdown signal received — stopping gracefully");
                break;
            }
            _ = liveness.tick() => {
                debug_liveness(&store);
            }
        }
    }

    // ── Shutdown: fan out cancellation, wait bounded on every worker ──────
    cancel.cancel();
    let shutdown_wait = tokio::time::timeout(
        Duration::from_secs(config.shutdown_timeout_secs),
        futures_util::future::join_all(worker_handles),
    );
    match shutdown_wait.await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    warn!(error = %e, "worker task panicked during shutdown");
                }
            }
        }
        Err(_) => warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "shutdown timed out waiting on workers — proceeding to clear state anyway"
        ),
    }

    store.clear();
    info!("funding scanner shut down complete");
    Ok(())
}

fn debug_liveness(store: &Store) {
    let active = store.active_symbols().len();
    tracing::debug!(active_symbols = active, "liveness check");
}
