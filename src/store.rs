// =============================================================================
// Store — process-wide shared state (funding table ⋈ realtime table)
// =============================================================================
//
// Two independent `parking_lot::RwLock`-guarded maps plus a read-mostly
// category/symbol-list pair, matching the teacher's one-`RwLock`-per-logical
// collection style (see `AppState`) rather than a single global lock.
// No lock here is ever held across an `.await` point: every method takes
// the lock, builds the owned result, and drops the guard before returning.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::{Category, Symbol};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// One REST-sourced record per watched symbol.
#[derive(Debug, Clone, Serialize)]
pub struct FundingRecord {
    pub funding_rate: f64,
    pub volume_24h: f64,
    pub next_funding_ts: i64,
    pub spread_pct: f64,
    pub volatility_pct: Option<f64>,
    pub weight: Option<f64>,
}

impl FundingRecord {
    pub fn funding_time_remaining(&self, now_ms: i64) -> String {
        format_remaining(self.next_funding_ts - now_ms)
    }
}

/// Formats a millisecond duration as `"2h 15m 30s"`, dropping leading zero
/// units, per spec's funding-countdown scenario.
pub fn format_remaining(remaining_ms: i64) -> String {
    if remaining_ms <= 0 {
        return "0s".to_string();
    }
    let total_secs = remaining_ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// WS-sourced per-symbol live record. Every field is independently
/// last-writer-wins; a `None` patch field never overwrites a known value.
#[derive(Debug, Clone, Default)]
pub struct LiveTicker {
    pub funding_rate: Option<f64>,
    pub volume_24h: Option<f64>,
    pub bid1: Option<f64>,
    pub ask1: Option<f64>,
    pub next_funding_ts: Option<i64>,
    pub mark_price: Option<f64>,
    pub last_price: Option<f64>,
    pub ts: i64,
}

/// A patch produced by the WS connector for a single inbound frame. Same
/// shape as [`LiveTicker`], minus `ts` (always supplied by the merge call).
#[derive(Debug, Clone, Default)]
pub struct TickerPatch {
    pub funding_rate: Option<f64>,
    pub volume_24h: Option<f64>,
    pub bid1: Option<f64>,
    pub ask1: Option<f64>,
    pub next_funding_ts: Option<i64>,
    pub mark_price: Option<f64>,
    pub last_price: Option<f64>,
}

impl LiveTicker {
    /// Apply `patch` per §4.3's merge rule: non-`None` fields overwrite,
    /// `None` fields preserve the prior value. `ts` always advances.
    fn merge(&mut self, patch: &TickerPatch, ts: i64) {
        if patch.funding_rate.is_some() {
            self.funding_rate = patch.funding_rate;
        }
        if patch.volume_24h.is_some() {
            self.volume_24h = patch.volume_24h;
        }
        if patch.bid1.is_some() {
            self.bid1 = patch.bid1;
        }
        if patch.ask1.is_some() {
            self.ask1 = patch.ask1;
        }
        if patch.next_funding_ts.is_some() {
            self.next_funding_ts = patch.next_funding_ts;
        }
        if patch.mark_price.is_some() {
            self.mark_price = patch.mark_price;
        }
        if patch.last_price.is_some() {
            self.last_price = patch.last_price;
        }
        self.ts = ts;
    }

    pub fn spread_pct(&self) -> Option<f64> {
        match (self.bid1, self.ask1) {
            (Some(bid), Some(ask)) if bid > 0.0 && ask > 0.0 => {
                let mid = (bid + ask) / 2.0;
                Some((ask - bid) / mid)
            }
            _ => None,
        }
    }
}

/// One row of the consistent join served to renderers / the trading layer.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRow {
    pub symbol: String,
    pub category: Category,
    pub funding_rate: f64,
    pub volume_24h: f64,
    pub spread_pct: f64,
    pub volatility_pct: Option<f64>,
    pub funding_time_remaining: String,
    pub next_funding_ts: i64,
    pub weight: Option<f64>,
}

/// Full `Store::snapshot()` result.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generated_at_ms: i64,
    pub rows: Vec<SnapshotRow>,
}

/// Result of installing a freshly built watchlist: which symbols are brand
/// new relative to what was already tracked (`Δ = new \ existing`), used by
/// the scheduler to decide which symbols need a WS subscription extended.
pub struct InstallDelta {
    pub added: Vec<Symbol>,
}

/// Default freshness window for preferring live over REST values in
/// [`Store::snapshot`].
pub const DEFAULT_T_LIVE_SECS: i64 = 120;

struct FundingTable {
    records: HashMap<Symbol, FundingRecord>,
}

struct RealtimeTable {
    tickers: HashMap<Symbol, LiveTicker>,
}

struct SymbolIndex {
    linear_symbols: Vec<Symbol>,
    inverse_symbols: Vec<Symbol>,
    category_map: HashMap<Symbol, Category>,
}

/// Process-wide shared state: `init -> live -> clear` lifecycle.
pub struct Store {
    funding: RwLock<FundingTable>,
    realtime: RwLock<RealtimeTable>,
    index: RwLock<SymbolIndex>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            funding: RwLock::new(FundingTable {
                records: HashMap::new(),
            }),
            realtime: RwLock::new(RealtimeTable {
                tickers: HashMap::new(),
            }),
            index: RwLock::new(SymbolIndex {
                linear_symbols: Vec::new(),
                inverse_symbols: Vec::new(),
                category_map: HashMap::new(),
            }),
        }
    }

    /// Whole-record replace of a symbol's REST-sourced funding data.
    pub fn update_funding(&self, symbol: Symbol, record: FundingRecord) {
        self.funding.write().records.insert(symbol, record);
    }

    /// Per-field merge of a WS patch into the symbol's live record.
    pub fn merge_ticker(&self, symbol: &Symbol, patch: &TickerPatch, ts: i64) {
        let mut realtime = self.realtime.write();
        let entry = realtime.tickers.entry(symbol.clone()).or_default();
        entry.merge(patch, ts);
    }

    /// Atomically install a freshly-built watchlist: `(linear, inverse,
    /// funding_table)` replaces the previous triple in one locked section so
    /// readers between rescans never observe a partial update. Returns the
    /// set of symbols newly present relative to the prior index.
    pub fn install_watchlist(
        &self,
        linear_symbols: Vec<Symbol>,
        inverse_symbols: Vec<Symbol>,
        category_map: HashMap<Symbol, Category>,
        funding_table: HashMap<Symbol, FundingRecord>,
    ) -> InstallDelta {
        let existing: HashSet<Symbol> = {
            let index = self.index.read();
            index
                .linear_symbols
                .iter()
                .chain(index.inverse_symbols.iter())
                .cloned()
                .collect()
        };

        let added: Vec<Symbol> = linear_symbols
            .iter()
            .chain(inverse_symbols.iter())
            .filter(|s| !existing.contains(*s))
            .cloned()
            .collect();

        {
            let mut index = self.index.write();
            index.linear_symbols = linear_symbols;
            index.inverse_symbols = inverse_symbols;
            index.category_map = category_map;
        }
        {
            let mut funding = self.funding.write();
            for (symbol, record) in funding_table {
                funding.records.insert(symbol, record);
            }
        }

        InstallDelta { added }
    }

    pub fn active_symbols(&self) -> Vec<Symbol> {
        let index = self.index.read();
        index
            .linear_symbols
            .iter()
            .chain(index.inverse_symbols.iter())
            .cloned()
            .collect()
    }

    pub fn category_of(&self, symbol: &Symbol) -> Option<Category> {
        self.index.read().category_map.get(symbol).copied()
    }

    pub fn linear_symbols(&self) -> Vec<Symbol> {
        self.index.read().linear_symbols.clone()
    }

    pub fn inverse_symbols(&self) -> Vec<Symbol> {
        self.index.read().inverse_symbols.clone()
    }

    /// Write a freshly computed volatility fraction back onto a symbol's
    /// funding record, if that symbol is still tracked.
    pub fn set_volatility(&self, symbol: &Symbol, volatility_pct: f64) {
        if let Some(record) = self.funding.write().records.get_mut(symbol) {
            record.volatility_pct = Some(volatility_pct);
        }
    }

    pub fn set_weight(&self, symbol: &Symbol, weight: f64) {
        if let Some(record) = self.funding.write().records.get_mut(symbol) {
            record.weight = Some(weight);
        }
    }

    /// Join `funding_table ⋈ realtime_table`; prefer the live value when
    /// present and fresher than `t_live_secs`, else fall back to REST.
    pub fn snapshot(&self, t_live_secs: i64) -> Snapshot {
        let now = now_ms();
        let funding = self.funding.read();
        let realtime = self.realtime.read();
        let index = self.index.read();

        let mut rows: Vec<SnapshotRow> = funding
            .records
            .iter()
            .map(|(symbol, record)| {
                let live = realtime.tickers.get(symbol).filter(|t| {
                    now.saturating_sub(t.ts) <= t_live_secs * 1000
                });

                let funding_rate = live.and_then(|t| t.funding_rate).unwrap_or(record.funding_rate);
                let volume_24h = live.and_then(|t| t.volume_24h).unwrap_or(record.volume_24h);
                let spread_pct = live.and_then(|t| t.spread_pct()).unwrap_or(record.spread_pct);
                let next_funding_ts = live
                    .and_then(|t| t.next_funding_ts)
                    .unwrap_or(record.next_funding_ts);

                SnapshotRow {
                    symbol: symbol.to_string(),
                    category: index
                        .category_map
                        .get(symbol)
                        .copied()
                        .unwrap_or_else(|| Category::from_symbol_heuristic(symbol.as_str())),
                    funding_rate,
                    volume_24h,
                    spread_pct,
                    volatility_pct: record.volatility_pct,
                    funding_time_remaining: format_remaining(next_funding_ts - now),
                    next_funding_ts,
                    weight: record.weight,
                }
            })
            .collect();

        rows.sort_by(|a, b| {
            b.weight
                .unwrap_or(f64::MIN)
                .partial_cmp(&a.weight.unwrap_or(f64::MIN))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        Snapshot {
            generated_at_ms: now,
            rows,
        }
    }

    /// Remove realtime rows older than `t_live_secs`.
    pub fn purge_expired(&self, t_live_secs: i64) {
        let now = now_ms();
        self.realtime
            .write()
            .tickers
            .retain(|_, t| now.saturating_sub(t.ts) <= t_live_secs * 1000);
    }

    /// Clear all state; called on shutdown.
    pub fn clear(&self) {
        self.funding.write().records.clear();
        self.realtime.write().tickers.clear();
        let mut index = self.index.write();
        index.linear_symbols.clear();
        index.inverse_symbols.clear();
        index.category_map.clear();
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s)
    }

    #[test]
    fn merge_ticker_none_patch_only_advances_ts() {
        let store = Store::new();
        let s = sym("BTCUSDT");
        store.merge_ticker(&s, &TickerPatch { bid1: Some(100.0), ..Default::default() }, 1000);
        store.merge_ticker(&s, &TickerPatch::default(), 2000);

        let realtime = store.realtime.read();
        let t = realtime.tickers.get(&s).unwrap();
        assert_eq!(t.bid1, Some(100.0));
        assert_eq!(t.ts, 2000);
    }

    #[test]
    fn merge_ticker_overwrites_only_present_fields() {
        let store = Store::new();
        let s = sym("ETHUSDT");
        store.merge_ticker(
            &s,
            &TickerPatch {
                bid1: Some(10.0),
                ask1: Some(10.5),
                ..Default::default()
            },
            1,
        );
        store.merge_ticker(
            &s,
            &TickerPatch {
                bid1: Some(11.0),
                ..Default::default()
            },
            2,
        );

        let realtime = store.realtime.read();
        let t = realtime.tickers.get(&s).unwrap();
        assert_eq!(t.bid1, Some(11.0));
        assert_eq!(t.ask1, Some(10.5));
    }

    #[test]
    fn install_watchlist_reports_only_new_symbols() {
        let store = Store::new();
        let mut cat = HashMap::new();
        cat.insert(sym("AUSDT"), Category::Linear);
        let delta = store.install_watchlist(vec![sym("AUSDT")], vec![], cat.clone(), HashMap::new());
        assert_eq!(delta.added, vec![sym("AUSDT")]);

        cat.insert(sym("BUSDT"), Category::Linear);
        let delta2 = store.install_watchlist(
            vec![sym("AUSDT"), sym("BUSDT")],
            vec![],
            cat,
            HashMap::new(),
        );
        assert_eq!(delta2.added, vec![sym("BUSDT")]);
    }

    #[test]
    fn snapshot_prefers_fresh_live_value_over_rest() {
        let store = Store::new();
        let s = sym("AUSDT");
        store.update_funding(
            s.clone(),
            FundingRecord {
                funding_rate: 0.0001,
                volume_24h: 1_000_000.0,
                next_funding_ts: 9_999_999_999_999,
                spread_pct: 0.001,
                volatility_pct: None,
                weight: Some(1.0),
            },
        );
        store.merge_ticker(
            &s,
            &TickerPatch {
                funding_rate: Some(0.0002),
                ..Default::default()
            },
            now_ms(),
        );

        let snap = store.snapshot(120);
        let row = snap.rows.iter().find(|r| r.symbol == "AUSDT").unwrap();
        assert_eq!(row.funding_rate, 0.0002);
    }

    #[test]
    fn snapshot_falls_back_to_rest_when_live_stale() {
        let store = Store::new();
        let s = sym("BUSDT");
        store.update_funding(
            s.clone(),
            FundingRecord {
                funding_rate: 0.0001,
                volume_24h: 1_000_000.0,
                next_funding_ts: 9_999_999_999_999,
                spread_pct: 0.001,
                volatility_pct: None,
                weight: Some(1.0),
            },
        );
        store.merge_ticker(
            &s,
            &TickerPatch {
                funding_rate: Some(0.0009),
                ..Default::default()
            },
            0,
        );

        let snap = store.snapshot(120);
        let row = snap.rows.iter().find(|r| r.symbol == "BUSDT").unwrap();
        assert_eq!(row.funding_rate, 0.0001);
    }

    #[test]
    fn purge_expired_removes_stale_realtime_rows() {
        let store = Store::new();
        let s = sym("CUSDT");
        store.merge_ticker(&s, &TickerPatch::default(), 0);
        store.purge_expired(0);
        assert!(store.realtime.read().tickers.is_empty());
    }

    #[test]
    fn format_remaining_matches_scenario() {
        assert_eq!(format_remaining((2 * 3600 + 15 * 60 + 30) * 1000), "2h 15m 30s");
        assert_eq!(format_remaining(90 * 1000), "1m 30s");
        assert_eq!(format_remaining(0), "0s");
        assert_eq!(format_remaining(-500), "0s");
    }
}
