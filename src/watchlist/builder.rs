// =============================================================================
// WatchlistBuilder — the seven-stage filter pipeline
// =============================================================================
//
// Each stage is a free function over the previous stage's `Vec`, matching
// the teacher's `smart_filters.rs` style of one function per independent
// filter. Per-row failures produce a skip (logged, dropped) rather than
// aborting the pipeline; only a total REST failure (propagated as `Err`
// from the caller) aborts a rescan.
// =============================================================================

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::{Config, Weights};
use crate::exchange::client::ExchangeClient;
use crate::exchange::types::{InstrumentInfo, TickerRow};
use crate::store::FundingRecord;
use crate::types::{Category, Symbol};
use crate::volatility::VolatilityEngine;
use crate::watchlist::scoring::score;

/// Static blacklist of symbols known to be mid-delisting or otherwise
/// problematic even while still reported `Trading` by instruments-info —
/// kept alongside the dynamic status check per the design note that both
/// paths are preserved.
pub const DELIST_BLACKLIST: &[&str] = &["LAUNCHCOINUSDT", "AI16ZUSDT"];

/// A row as it survives successive pipeline stages. Optional fields are
/// populated by the stage that computes them; earlier stages leave them
/// `None`.
#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub symbol: Symbol,
    pub category: Category,
    pub funding_rate: f64,
    pub volume_24h: f64,
    pub next_funding_ts: i64,
    pub bid1: Option<f64>,
    pub ask1: Option<f64>,
    pub spread_pct: Option<f64>,
    pub sigma: Option<f64>,
    pub weight: Option<f64>,
}

/// Output of a full pipeline run.
pub struct BuildResult {
    pub linear_symbols: Vec<Symbol>,
    pub inverse_symbols: Vec<Symbol>,
    pub funding_table: HashMap<Symbol, FundingRecord>,
}

/// Run the full seven-stage pipeline against freshly fetched instruments +
/// tickers. A total REST failure (propagated by `?`) aborts the rescan and
/// leaves the caller's previous watchlist live; individual row problems are
/// skipped with a log line instead.
pub async fn build_watchlist(
    client: &ExchangeClient,
    volatility: &VolatilityEngine,
    config: &Config,
    is_spot_listed: Option<&(dyn Fn(&Symbol) -> bool + Sync)>,
) -> anyhow::Result<BuildResult> {
    let categories = config.category.categories();
    let now_ms = chrono::Utc::now().timestamp_millis();

    let mut rows: Vec<CandidateRow> = Vec::new();

    for category in categories {
        let instruments = client.fetch_instruments(category).await?;
        let tickers = client.fetch_tickers(category).await?;

        let universe = stage1_universe(&instruments, category);
        let ticker_by_symbol: HashMap<Symbol, &TickerRow> =
            tickers.iter().map(|t| (t.symbol(), t)).collect();

        let stage2 = stage2_funding_volume_time(universe, &ticker_by_symbol, config, now_ms);
        rows.extend(stage2);
    }

    let rows = stage3_spot_availability(rows, is_spot_listed);
    let rows = stage4_spread(rows, config.spread_max);
    let rows = apply_volatility_filter(
        rows,
        volatility,
        client,
        config.volatility_min,
        config.volatility_max,
    )
    .await;
    let rows = stage6_hard_limit(rows, config.limit);
    let rows = stage7_score_and_rank(rows, &config.weights, config.weights.top_symbols);

    let mut linear_symbols = Vec::new();
    let mut inverse_symbols = Vec::new();
    let mut funding_table = HashMap::new();

    for row in rows {
        match row.category {
            Category::Linear => linear_symbols.push(row.symbol.clone()),
            Category::Inverse => inverse_symbols.push(row.symbol.clone()),
        }
        funding_table.insert(
            row.symbol.clone(),
            FundingRecord {
                funding_rate: row.funding_rate,
                volume_24h: row.volume_24h,
                next_funding_ts: row.next_funding_ts,
                spread_pct: row.spread_pct.unwrap_or(0.0),
                volatility_pct: row.sigma,
                weight: row.weight,
            },
        );
    }

    Ok(BuildResult {
        linear_symbols,
        inverse_symbols,
        funding_table,
    })
}

/// Stage 1 — universe assembly: active linear/inverse perpetuals minus the
/// static delist blacklist.
pub fn stage1_universe(instruments: &[InstrumentInfo], category: Category) -> Vec<(Symbol, Category)> {
    instruments
        .iter()
        .filter(|i| i.is_active_perpetual())
        .filter(|i| !DELIST_BLACKLIST.contains(&i.symbol.as_str()))
        .map(|i| (i.symbol(), category))
        .collect()
}

/// Stage 2 — funding/volume/time filter.
pub fn stage2_funding_volume_time(
    universe: Vec<(Symbol, Category)>,
    tickers: &HashMap<Symbol, &TickerRow>,
    config: &Config,
    now_ms: i64,
) -> Vec<CandidateRow> {
    universe
        .into_iter()
        .filter_map(|(symbol, cat)| {
            let Some(ticker) = tickers.get(&symbol) else {
                debug!(symbol = %symbol, "skipping row — missing ticker data");
                return None;
            };

            let Some(funding_rate) = ticker.funding_rate_f64() else {
                debug!(symbol = %symbol, "skipping row — unparsable funding rate");
                return None;
            };
            let volume_24h = ticker.volume_24h_f64().unwrap_or(0.0);
            let Some(next_funding_ts) = ticker.next_funding_ts() else {
                debug!(symbol = %symbol, "skipping row — unparsable next funding time");
                return None;
            };

            if let Some(min) = config.funding_min {
                if funding_rate < min {
                    return None;
                }
            }
            if let Some(max) = config.funding_max {
                if funding_rate > max {
                    return None;
                }
            }
            if let Some(vol_min) = config.volume_min_millions {
                if volume_24h < vol_min * 1e6 {
                    return None;
                }
            }

            let minutes_to_funding = (next_funding_ts - now_ms) as f64 / 60_000.0;
            if minutes_to_funding < config.funding_time_min_minutes as f64
                || minutes_to_funding > config.funding_time_max_minutes as f64
            {
                return None;
            }

            Some(CandidateRow {
                symbol,
                category: cat,
                funding_rate,
                volume_24h,
                next_funding_ts,
                bid1: ticker.bid1_f64(),
                ask1: ticker.ask1_f64(),
                spread_pct: None,
                sigma: None,
                weight: None,
            })
        })
        .collect()
}

/// Stage 3 — optional spot-availability filter.
pub fn stage3_spot_availability(
    rows: Vec<CandidateRow>,
    is_spot_listed: Option<&(dyn Fn(&Symbol) -> bool + Sync)>,
) -> Vec<CandidateRow> {
    match is_spot_listed {
        None => rows,
        Some(check) => rows
            .into_iter()
            .filter(|r| {
                let keep = check(&r.symbol);
                if !keep {
                    debug!(symbol = %r.symbol, "dropped — not spot-listed");
                }
                keep
            })
            .collect(),
    }
}

/// Stage 4 — spread filter. Bid/ask are already present on the ticker row
/// fetched in stage 2 (Bybit's `/v5/market/tickers` carries `bid1Price`/
/// `ask1Price` directly), so no second REST pass is needed here.
pub fn stage4_spread(rows: Vec<CandidateRow>, spread_max: Option<f64>) -> Vec<CandidateRow> {
    rows.into_iter()
        .filter_map(|mut r| {
            let (bid, ask) = match (r.bid1, r.ask1) {
                (Some(b), Some(a)) if b > 0.0 && a > 0.0 && a >= b => (b, a),
                _ => {
                    debug!(symbol = %r.symbol, "dropped — invalid bid/ask");
                    return None;
                }
            };
            let mid = (bid + ask) / 2.0;
            let spread_pct = (ask - bid) / mid;

            if let Some(max) = spread_max {
                if spread_pct > max {
                    return None;
                }
            }

            r.spread_pct = Some(spread_pct);
            Some(r)
        })
        .collect()
}

/// Stage 5 — volatility filter. Cache misses are always batched through the
/// volatility engine; only the *drop* decision below is conditional on a
/// bound actually being configured.
async fn apply_volatility_filter(
    rows: Vec<CandidateRow>,
    volatility: &VolatilityEngine,
    client: &ExchangeClient,
    volatility_min: Option<f64>,
    volatility_max: Option<f64>,
) -> Vec<CandidateRow> {
    let category_map: HashMap<Symbol, Category> =
        rows.iter().map(|r| (r.symbol.clone(), r.category)).collect();

    let pending: Vec<Symbol> = rows
        .iter()
        .filter(|r| volatility.get_cached(&r.symbol).is_none())
        .map(|r| r.symbol.clone())
        .collect();

    if !pending.is_empty() {
        // `batch_refresh` also writes through to a `Store`, but the watchlist
        // being built here hasn't been installed yet — the cache write is
        // what this stage actually needs, so a scratch `Store` absorbs the
        // otherwise-unwanted side write.
        let scratch_store = crate::store::Store::new();
        volatility
            .batch_refresh(client, &scratch_store, &pending, |s| {
                category_map.get(s).copied().unwrap_or(Category::Linear)
            })
            .await;
    }

    if volatility_min.is_none() && volatility_max.is_none() {
        // No bound configured — sigma is still attached when now cached,
        // but a miss is not fatal to the row.
        return rows
            .into_iter()
            .map(|mut r| {
                r.sigma = volatility.get_cached(&r.symbol);
                r
            })
            .collect();
    }

    rows.into_iter()
        .filter_map(|mut r| {
            let sigma = volatility.get_cached(&r.symbol);
            match sigma {
                Some(s) => {
                    if let Some(min) = volatility_min {
                        if s < min {
                            return None;
                        }
                    }
                    if let Some(max) = volatility_max {
                        if s > max {
                            return None;
                        }
                    }
                    r.sigma = Some(s);
                    Some(r)
                }
                None => {
                    warn!(symbol = %r.symbol, "dropped — volatility bound configured but sigma unknown");
                    None
                }
            }
        })
        .collect()
}

/// Stage 6 — hard cap at `limit` symbols.
pub fn stage6_hard_limit(mut rows: Vec<CandidateRow>, limit: u32) -> Vec<CandidateRow> {
    rows.truncate(limit as usize);
    rows
}

/// Stage 7 — score, sort descending, truncate to `top_symbols`. Ties break
/// by symbol ascending.
pub fn stage7_score_and_rank(mut rows: Vec<CandidateRow>, weights: &Weights, top_symbols: u32) -> Vec<CandidateRow> {
    for row in &mut rows {
        row.weight = Some(score(
            weights,
            row.funding_rate,
            row.volume_24h,
            row.spread_pct.unwrap_or(0.0),
            row.sigma,
        ));
    }

    rows.sort_by(|a, b| {
        b.weight
            .unwrap()
            .partial_cmp(&a.weight.unwrap())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    rows.truncate(top_symbols as usize);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, funding: &str, volume: &str, next_funding_ms: i64) -> TickerRow {
        TickerRow {
            symbol: symbol.to_string(),
            funding_rate: Some(funding.to_string()),
            volume_24h: Some(volume.to_string()),
            bid1_price: Some("100.0".into()),
            ask1_price: Some("100.5".into()),
            next_funding_time: Some(next_funding_ms.to_string()),
            mark_price: Some("100.2".into()),
            last_price: Some("100.1".into()),
        }
    }

    #[test]
    fn stage2_funding_filter_inclusivity_scenario() {
        let config = {
            let mut c = Config::default();
            c.funding_min = Some(0.0001);
            c.funding_max = Some(0.0005);
            c.volume_min_millions = Some(10.0);
            c
        };

        let now = 0i64;
        let far_future = now + 10 * 60_000;

        let rows = vec![
            ticker("AUSDT", "0.0001", "20000000", far_future),
            ticker("BUSDT", "0.0005", "20000000", far_future),
            ticker("CUSDT", "0.00009", "20000000", far_future),
            ticker("DUSDT", "0.0003", "5000000", far_future),
        ];
        let tickers: HashMap<Symbol, &TickerRow> = rows.iter().map(|t| (t.symbol(), t)).collect();
        let universe: Vec<(Symbol, Category)> =
            rows.iter().map(|t| (t.symbol(), Category::Linear)).collect();

        let survivors = stage2_funding_volume_time(universe, &tickers, &config, now);
        let symbols: std::collections::HashSet<String> =
            survivors.iter().map(|r| r.symbol.to_string()).collect();

        assert_eq!(
            symbols,
            std::collections::HashSet::from(["AUSDT".to_string(), "BUSDT".to_string()])
        );
    }

    #[test]
    fn stage4_spread_boundary_scenario() {
        let row = CandidateRow {
            symbol: Symbol::new("BTCUSDT"),
            category: Category::Linear,
            funding_rate: 0.0001,
            volume_24h: 1_000_000.0,
            next_funding_ts: 0,
            bid1: Some(100.0),
            ask1: Some(100.5),
            spread_pct: None,
            sigma: None,
            weight: None,
        };

        let kept = stage4_spread(vec![row.clone()], Some(0.005));
        assert_eq!(kept.len(), 1);

        let dropped = stage4_spread(vec![row], Some(0.004));
        assert_eq!(dropped.len(), 0);
    }

    #[test]
    fn stage6_truncates_to_limit() {
        let rows: Vec<CandidateRow> = (0..10)
            .map(|i| CandidateRow {
                symbol: Symbol::new(format!("S{i}")),
                category: Category::Linear,
                funding_rate: 0.0,
                volume_24h: 0.0,
                next_funding_ts: 0,
                bid1: None,
                ask1: None,
                spread_pct: None,
                sigma: None,
                weight: None,
            })
            .collect();
        let limited = stage6_hard_limit(rows, 3);
        assert_eq!(limited.len(), 3);
    }

    #[test]
    fn stage7_breaks_ties_by_symbol_ascending() {
        let rows = vec![
            CandidateRow {
                symbol: Symbol::new("BUSDT"),
                category: Category::Linear,
                funding_rate: 0.0001,
                volume_24h: 1_000_000.0,
                next_funding_ts: 0,
                bid1: None,
                ask1: None,
                spread_pct: Some(0.0),
                sigma: None,
                weight: None,
            },
            CandidateRow {
                symbol: Symbol::new("AUSDT"),
                category: Category::Linear,
                funding_rate: 0.0001,
                volume_24h: 1_000_000.0,
                next_funding_ts: 0,
                bid1: None,
                ask1: None,
                spread_pct: Some(0.0),
                sigma: None,
                weight: None,
            },
        ];
        let weights = Weights {
            funding: 10.0,
            volume: 0.5,
            spread: 5.0,
            volatility: 2.0,
            top_symbols: 20,
        };
        let ranked = stage7_score_and_rank(rows, &weights, 20);
        assert_eq!(ranked[0].symbol.to_string(), "AUSDT");
        assert_eq!(ranked[1].symbol.to_string(), "BUSDT");
    }
}
