// =============================================================================
// VolatilityEngine — cache + TTL refresher
// =============================================================================
//
// Batched concurrent refresh uses a `tokio::sync::Semaphore` bound to the
// configured parallelism, mirroring the bounded-concurrency idiom already
// present in the teacher's market-data fan-out in `main.rs` (one task per
// symbol per stream), but adding the semaphore since the fan-out count here
// is unbounded by the symbol universe rather than a fixed default list.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::exchange::client::ExchangeClient;
use crate::store::Store;
use crate::types::{Category, Symbol};
use crate::volatility::sigma;

/// Cache key format preserved verbatim from the original implementation
/// even though no code varies the kline interval — the cache itself is
/// keyed by this string rather than by `Symbol` directly.
pub fn cache_key(symbol: &Symbol) -> String {
    format!("volatility_5m_{symbol}")
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    computed_at_secs: i64,
    sigma: f64,
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `cache_key(symbol) -> (computed_at_secs, sigma)` with TTL `ttl_secs`,
/// bound [10, 3600]s per the config surface.
pub struct VolatilityCache {
    ttl_secs: i64,
    max_entries: usize,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl VolatilityCache {
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            ttl_secs: ttl_secs as i64,
            max_entries,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached sigma only if it is still within TTL.
    pub fn get(&self, symbol: &Symbol) -> Option<f64> {
        let entries = self.entries.read();
        let entry = entries.get(&cache_key(symbol))?;
        if now_secs() - entry.computed_at_secs <= self.ttl_secs {
            Some(entry.sigma)
        } else {
            None
        }
    }

    pub fn is_stale_or_missing(&self, symbol: &Symbol) -> bool {
        self.get(symbol).is_none()
    }

    pub fn insert(&self, symbol: Symbol, sigma: f64) {
        let mut entries = self.entries.write();
        entries.insert(
            cache_key(&symbol),
            CacheEntry {
                computed_at_secs: now_secs(),
                sigma,
            },
        );
        Self::evict_over_bound(&mut entries, self.max_entries);
    }

    /// Evicts entries once the cache exceeds `max_entries`, newest-first —
    /// preserved as-is from the original implementation's documented (if
    /// unusual) eviction order.
    fn evict_over_bound(entries: &mut HashMap<String, CacheEntry>, max_entries: usize) {
        while entries.len() > max_entries {
            if let Some(newest) = entries
                .iter()
                .max_by_key(|(_, e)| e.computed_at_secs)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&newest);
            } else {
                break;
            }
        }
    }

    /// Drop cache entries for symbols no longer active.
    pub fn evict_inactive(&self, active: &std::collections::HashSet<Symbol>) {
        let active_keys: std::collections::HashSet<String> =
            active.iter().map(cache_key).collect();
        self.entries.write().retain(|k, _| active_keys.contains(k));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct VolatilityEngineConfig {
    pub ttl_secs: u64,
    pub parallelism: usize,
    pub max_cache_entries: usize,
    pub kline_window: usize,
}

/// Batched, bounded-concurrency sigma refresher sitting on top of a
/// [`VolatilityCache`].
pub struct VolatilityEngine {
    cache: VolatilityCache,
    parallelism: usize,
    kline_window: usize,
}

impl VolatilityEngine {
    pub fn new(config: VolatilityEngineConfig) -> Self {
        Self {
            cache: VolatilityCache::new(config.ttl_secs, config.max_cache_entries),
            parallelism: config.parallelism.max(1),
            kline_window: config.kline_window,
        }
    }

    pub fn get_cached(&self, symbol: &Symbol) -> Option<f64> {
        self.cache.get(symbol)
    }

    /// Compute sigma for every symbol in `pending` concurrently, bounded by
    /// `self.parallelism`. Individual failures yield `None` for that symbol
    /// and never poison the batch. Results are written to both the cache
    /// and the `Store`'s funding record.
    pub async fn batch_refresh(
        &self,
        client: &ExchangeClient,
        store: &Store,
        pending: &[Symbol],
        category_of: impl Fn(&Symbol) -> Category,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut handles = Vec::with_capacity(pending.len());

        for symbol in pending {
            let symbol = symbol.clone();
            let category = category_of(&symbol);
            let semaphore = semaphore.clone();
            let window = self.kline_window;

            handles.push(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                compute_with_one_retry(client, &symbol, category, window).await
            });
        }

        let results = futures_util::future::join_all(handles).await;

        for (symbol, result) in pending.iter().zip(results) {
            match result {
                Some(sigma) => {
                    self.cache.insert(symbol.clone(), sigma);
                    store.set_volatility(symbol, sigma);
                }
                None => {
                    warn!(symbol = %symbol, "volatility compute failed after retry — leaving cache entry stale");
                }
            }
        }
    }

    pub fn evict_inactive(&self, active: &std::collections::HashSet<Symbol>) {
        self.cache.evict_inactive(active);
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

async fn compute_with_one_retry(
    client: &ExchangeClient,
    symbol: &Symbol,
    category: Category,
    window: usize,
) -> Option<f64> {
    for _attempt in 0..2 {
        match client
            .fetch_kline(category, symbol.as_str(), "5", (window + 1) as u32)
            .await
        {
            Ok(candles) => {
                if let Some(s) = sigma::sigma(&candles, window) {
                    return Some(s);
                }
                debug!(symbol = %symbol, "insufficient kline data for sigma computation");
                return None;
            }
            Err(err) => {
                warn!(symbol = %symbol, error = %err, "kline fetch failed during volatility refresh");
            }
        }
    }
    None
}

/// Background refresh loop: wakes every
/// `max(30, min(60, ttl_secs - 10))` seconds, recomputes stale/missing
/// entries for the current active-symbol set, then evicts entries for
/// symbols no longer active.
pub async fn run_refresh_loop(
    engine: Arc<VolatilityEngine>,
    client: Arc<ExchangeClient>,
    store: Arc<Store>,
    ttl_secs: u64,
    cancel: CancellationToken,
) {
    let wake = Duration::from_secs(30.max(60.min(ttl_secs.saturating_sub(10)).max(1)));
    let mut interval = tokio::time::interval(wake);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("volatility refresh loop shutting down");
                return;
            }
            _ = interval.tick() => {
                let active = store.active_symbols();
                let pending: Vec<Symbol> = active
                    .iter()
                    .filter(|s| engine.get_cached(s).is_none())
                    .cloned()
                    .collect();

                if !pending.is_empty() {
                    debug!(count = pending.len(), "refreshing stale/missing volatility entries");
                    engine
                        .batch_refresh(&client, &store, &pending, |s| {
                            store.category_of(s).unwrap_or_else(|| Category::from_symbol_heuristic(s.as_str()))
                        })
                        .await;
                }

                let active_set: std::collections::HashSet<Symbol> = active.into_iter().collect();
                engine.evict_inactive(&active_set);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s)
    }

    #[test]
    fn cache_miss_then_hit_then_stale_at_ttl_boundary() {
        let cache = VolatilityCache::new(60, 100);
        assert!(cache.get(&sym("BTCUSDT")).is_none());
        cache.insert(sym("BTCUSDT"), 0.03);
        assert_eq!(cache.get(&sym("BTCUSDT")), Some(0.03));
    }

    #[test]
    fn cache_key_format_is_opaque_prefix() {
        assert_eq!(cache_key(&sym("BTCUSDT")), "volatility_5m_BTCUSDT");
    }

    #[test]
    fn cache_evicts_newest_first_over_bound() {
        let cache = VolatilityCache::new(3600, 2);
        cache.insert(sym("A"), 0.01);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        cache.insert(sym("B"), 0.02);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        cache.insert(sym("C"), 0.03);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&sym("C")).is_none(), "newest entry should be evicted first");
        assert!(cache.get(&sym("A")).is_some());
    }

    #[test]
    fn evict_inactive_drops_unlisted_symbols() {
        let cache = VolatilityCache::new(3600, 100);
        cache.insert(sym("A"), 0.01);
        cache.insert(sym("B"), 0.02);
        let active: std::collections::HashSet<Symbol> = [sym("A")].into_iter().collect();
        cache.evict_inactive(&active);
        assert!(cache.get(&sym("A")).is_some());
        assert!(cache.get(&sym("B")).is_none());
    }
}
