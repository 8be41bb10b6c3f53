// =============================================================================
// Scheduler — periodic rescan + imminent-funding watch
// =============================================================================
//
// Two independent `tokio::time::interval` loops, each observing a
// `CancellationToken` at every tick, matching the teacher's `tokio::spawn` +
// `interval.tick()` loop idiom used for the strategy/exit-monitor/reconcile
// loops in `main.rs`.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::exchange::client::ExchangeClient;
use crate::store::Store;
use crate::types::{Category, Symbol};
use crate::volatility::VolatilityEngine;
use crate::watchlist::builder::build_watchlist;
use crate::ws::WSConnector;

/// Fired when the top-ranked opportunity's funding countdown drops below
/// `funding_threshold_minutes`. At most once per `(symbol, funding epoch)`.
#[derive(Debug, Clone)]
pub struct OpportunityImminent {
    pub symbol: Symbol,
    pub seconds_remaining: i64,
}

/// Rescan every `config.rescan_secs`: rebuild the watchlist from fresh REST
/// data, install it atomically, and extend WS subscriptions for newly added
/// symbols. A rescan failure leaves the previous watchlist live and is only
/// logged — it never tears down the loop.
pub async fn run_rescan_loop(
    client: Arc<ExchangeClient>,
    volatility: Arc<VolatilityEngine>,
    store: Arc<Store>,
    ws_connectors: HashMap<Category, WSConnector>,
    config: Arc<Config>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.rescan_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("rescan loop shutting down");
                return;
            }
            _ = interval.tick() => {
                rescan_once(&client, &volatility, &store, &ws_connectors, &config).await;
            }
        }
    }
}

async fn rescan_once(
    client: &ExchangeClient,
    volatility: &VolatilityEngine,
    store: &Store,
    ws_connectors: &HashMap<Category, WSConnector>,
    config: &Config,
) {
    match build_watchlist(client, volatility, config, None).await {
        Ok(result) => {
            let mut category_map = HashMap::new();
            for s in &result.linear_symbols {
                category_map.insert(s.clone(), Category::Linear);
            }
            for s in &result.inverse_symbols {
                category_map.insert(s.clone(), Category::Inverse);
            }

            let added_count = result.linear_symbols.len() + result.inverse_symbols.len();
            let delta = store.install_watchlist(
                result.linear_symbols,
                result.inverse_symbols,
                category_map,
                result.funding_table,
            );

            if !delta.added.is_empty() {
                let mut by_category: HashMap<Category, Vec<Symbol>> = HashMap::new();
                for symbol in &delta.added {
                    let category = store
                        .category_of(symbol)
                        .unwrap_or_else(|| Category::from_symbol_heuristic(symbol.as_str()));
                    by_category.entry(category).or_default().push(symbol.clone());
                }
                for (category, symbols) in by_category {
                    if let Some(connector) = ws_connectors.get(&category) {
                        connector.add_symbols(symbols).await;
                    }
                }
            }

            info!(
                watchlist_size = added_count,
                newly_added = delta.added.len(),
                "rescan installed fresh watchlist"
            );
        }
        Err(err) => {
            warn!(error = %err, "rescan failed — previous watchlist remains live");
        }
    }
}

/// Watch every `interval_secs` for the top-ranked opportunity's funding
/// countdown dropping below `funding_threshold_minutes`, firing at most one
/// event per `(symbol, funding epoch)`.
pub async fn run_imminent_watch_loop(
    store: Arc<Store>,
    live_ttl_secs: i64,
    funding_threshold_minutes: u32,
    interval_secs: u64,
    listener: mpsc::Sender<OpportunityImminent>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut fired: HashSet<(Symbol, i64)> = HashSet::new();
    let threshold_ms = funding_threshold_minutes as i64 * 60_000;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("imminent-funding watch loop shutting down");
                return;
            }
            _ = interval.tick() => {
                let snapshot = store.snapshot(live_ttl_secs);
                let Some(top) = snapshot.rows.first() else {
                    continue;
                };

                let remaining_ms = top.next_funding_ts - snapshot.generated_at_ms;
                fired.retain(|(_, epoch)| *epoch >= snapshot.generated_at_ms);

                if remaining_ms <= threshold_ms {
                    let key = (Symbol::new(top.symbol.clone()), top.next_funding_ts);
                    if fired.insert(key) {
                        let event = OpportunityImminent {
                            symbol: Symbol::new(top.symbol.clone()),
                            seconds_remaining: remaining_ms.max(0) / 1000,
                        };
                        info!(symbol = %event.symbol, seconds_remaining = event.seconds_remaining, "opportunity imminent");
                        if listener.send(event).await.is_err() {
                            debug!("imminent-funding listener dropped — no active consumer");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FundingRecord;

    #[tokio::test]
    async fn imminent_watch_fires_once_per_funding_epoch() {
        let store = Arc::new(Store::new());
        let symbol = Symbol::new("BTCUSDT");
        let mut category_map = HashMap::new();
        category_map.insert(symbol.clone(), Category::Linear);
        store.install_watchlist(
            vec![symbol.clone()],
            vec![],
            category_map,
            HashMap::from([(
                symbol.clone(),
                FundingRecord {
                    funding_rate: 0.001,
                    volume_24h: 1_000_000.0,
                    next_funding_ts: chrono::Utc::now().timestamp_millis() + 60_000,
                    spread_pct: 0.001,
                    volatility_pct: None,
                    weight: Some(10.0),
                },
            )]),
        );

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let store_clone = store.clone();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move {
            run_imminent_watch_loop(store_clone, 120, 10, 1, tx, cancel_clone).await;
        });

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event should fire within timeout")
            .expect("channel should not be closed");
        assert_eq!(event.symbol, symbol);

        cancel.cancel();
        let _ = handle.await;
    }
}
