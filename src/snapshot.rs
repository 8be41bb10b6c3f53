// =============================================================================
// Snapshot rendering — periodic stdout table
// =============================================================================
//
// The crate's only "renderer": a `prettytable-rs` table dump, printed every
// `display_interval_seconds`. This is the tabular-stdout boundary named in
// the trading-layer's Non-goals — no interactivity, no persistence.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use prettytable::{row, Table};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::store::{Snapshot, Store};

/// Render one `Snapshot` as a `prettytable` and print it to stdout.
pub fn render_table(snapshot: &Snapshot) {
    let mut table = Table::new();
    table.set_titles(row![
        "Symbol",
        "Category",
        "Funding Rate",
        "Volume 24h",
        "Spread %",
        "Volatility %",
        "Funding In",
        "Weight"
    ]);

    for r in &snapshot.rows {
        table.add_row(row![
            r.symbol,
            r.category,
            format!("{:.4}%", r.funding_rate * 100.0),
            format!("{:.0}", r.volume_24h),
            format!("{:.3}%", r.spread_pct * 100.0),
            r.volatility_pct
                .map(|v| format!("{:.3}%", v * 100.0))
                .unwrap_or_else(|| "-".to_string()),
            r.funding_time_remaining,
            r.weight
                .map(|w| format!("{w:.3}"))
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    table.printstd();
}

/// Print `store.snapshot()` every `interval_secs` until cancelled.
pub async fn run_display_loop(store: Arc<Store>, live_ttl_secs: i64, interval_secs: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("display loop shutting down");
                return;
            }
            _ = interval.tick() => {
                let snapshot = store.snapshot(live_ttl_secs);
                render_table(&snapshot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SnapshotRow;
    use crate::types::Category;

    #[test]
    fn render_table_handles_missing_optional_fields() {
        let snapshot = Snapshot {
            generated_at_ms: 0,
            rows: vec![SnapshotRow {
                symbol: "BTCUSDT".to_string(),
                category: Category::Linear,
                funding_rate: 0.0001,
                volume_24h: 1_000_000.0,
                spread_pct: 0.0005,
                volatility_pct: None,
                funding_time_remaining: "1h 0m 0s".to_string(),
                next_funding_ts: 3_600_000,
                weight: None,
            }],
        };
        // Exercises the full render path without panicking on `None` fields.
        render_table(&snapshot);
    }
}
