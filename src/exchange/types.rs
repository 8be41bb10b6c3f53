// =============================================================================
// Wire types — Bybit v5 REST response shapes
// =============================================================================

use serde::{de::DeserializeOwned, Deserialize};

use crate::types::{Category, Symbol};

/// Envelope wrapping every Bybit v5 REST response:
/// `{retCode, retMsg, result:{list:[…], nextPageCursor}}`.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(rename = "retCode")]
    pub ret_code: i64,
    #[serde(rename = "retMsg")]
    pub ret_msg: String,
    pub result: ApiResult<T>,
}

#[derive(Debug, Deserialize)]
pub struct ApiResult<T> {
    #[serde(default)]
    pub list: Vec<T>,
    #[serde(rename = "nextPageCursor", default)]
    pub next_page_cursor: String,
}

impl<T: DeserializeOwned> ApiEnvelope<T> {
    pub fn is_success(&self) -> bool {
        self.ret_code == 0
    }
}

/// One row of `/v5/market/instruments-info`.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentInfo {
    pub symbol: String,
    #[serde(rename = "contractType")]
    pub contract_type: String,
    pub status: String,
}

impl InstrumentInfo {
    /// Whether this instrument should enter the universe per stage 1 of the
    /// watchlist pipeline: a live perpetual, linear or inverse.
    pub fn is_active_perpetual(&self) -> bool {
        matches!(
            self.contract_type.as_str(),
            "LinearPerpetual" | "InversePerpetual"
        ) && matches!(self.status.as_str(), "Trading" | "Listed")
    }

    pub fn symbol(&self) -> Symbol {
        Symbol::new(self.symbol.clone())
    }
}

/// One row of `/v5/market/tickers`. Numeric fields arrive as strings on the
/// wire and are parsed to `f64`/`i64`, matching Bybit's convention of
/// stringly-typed decimals.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerRow {
    pub symbol: String,
    #[serde(rename = "fundingRate", default)]
    pub funding_rate: Option<String>,
    #[serde(rename = "volume24h", default)]
    pub volume_24h: Option<String>,
    #[serde(rename = "bid1Price", default)]
    pub bid1_price: Option<String>,
    #[serde(rename = "ask1Price", default)]
    pub ask1_price: Option<String>,
    #[serde(rename = "nextFundingTime", default)]
    pub next_funding_time: Option<String>,
    #[serde(rename = "markPrice", default)]
    pub mark_price: Option<String>,
    #[serde(rename = "lastPrice", default)]
    pub last_price: Option<String>,
}

impl TickerRow {
    pub fn symbol(&self) -> Symbol {
        Symbol::new(self.symbol.clone())
    }

    pub fn funding_rate_f64(&self) -> Option<f64> {
        self.funding_rate.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn volume_24h_f64(&self) -> Option<f64> {
        self.volume_24h.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn bid1_f64(&self) -> Option<f64> {
        self.bid1_price.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn ask1_f64(&self) -> Option<f64> {
        self.ask1_price.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn next_funding_ts(&self) -> Option<i64> {
        self.next_funding_time.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn mark_price_f64(&self) -> Option<f64> {
        self.mark_price.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn last_price_f64(&self) -> Option<f64> {
        self.last_price.as_deref().and_then(|s| s.parse().ok())
    }
}

/// One 5-minute kline candle, decoded from Bybit's array-of-strings row:
/// `[start, open, high, low, close, volume, turnover]`.
#[derive(Debug, Clone, Copy)]
pub struct Candle {
    pub start_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn from_wire_row(row: &[serde_json::Value]) -> Option<Self> {
        if row.len() < 6 {
            return None;
        }
        let parse = |v: &serde_json::Value| -> Option<f64> {
            v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64())
        };
        Some(Self {
            start_ms: row[0].as_str()?.parse().ok()?,
            open: parse(&row[1])?,
            high: parse(&row[2])?,
            low: parse(&row[3])?,
            close: parse(&row[4])?,
            volume: parse(&row[5])?,
        })
    }
}

/// Bybit category as sent on the wire (`linear`/`inverse`) — the exact
/// string every REST call builds its `category=` query parameter from.
pub fn category_query_value(category: Category) -> &'static str {
    category.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_active_perpetual_filters_status_and_type() {
        let active = InstrumentInfo {
            symbol: "BTCUSDT".into(),
            contract_type: "LinearPerpetual".into(),
            status: "Trading".into(),
        };
        assert!(active.is_active_perpetual());

        let delisted = InstrumentInfo {
            symbol: "OLDUSDT".into(),
            contract_type: "LinearPerpetual".into(),
            status: "Closed".into(),
        };
        assert!(!delisted.is_active_perpetual());

        let futures = InstrumentInfo {
            symbol: "BTCUSD_240927".into(),
            contract_type: "LinearFutures".into(),
            status: "Trading".into(),
        };
        assert!(!futures.is_active_perpetual());
    }

    #[test]
    fn ticker_row_parses_stringly_typed_numerics() {
        let row = TickerRow {
            symbol: "BTCUSDT".into(),
            funding_rate: Some("0.0001".into()),
            volume_24h: Some("123456.7".into()),
            bid1_price: Some("100.0".into()),
            ask1_price: Some("100.5".into()),
            next_funding_time: Some("1700000000000".into()),
            mark_price: Some("100.2".into()),
            last_price: Some("100.1".into()),
        };
        assert_eq!(row.funding_rate_f64(), Some(0.0001));
        assert_eq!(row.next_funding_ts(), Some(1_700_000_000_000));
    }

    #[test]
    fn candle_parses_wire_row() {
        let row = vec![
            serde_json::json!("1700000000000"),
            serde_json::json!("100.0"),
            serde_json::json!("101.0"),
            serde_json::json!("99.0"),
            serde_json::json!("100.5"),
            serde_json::json!("42.0"),
        ];
        let candle = Candle::from_wire_row(&row).unwrap();
        assert_eq!(candle.start_ms, 1_700_000_000_000);
        assert_eq!(candle.close, 100.5);
    }

    #[test]
    fn candle_rejects_short_row() {
        let row = vec![serde_json::json!("1700000000000")];
        assert!(Candle::from_wire_row(&row).is_none());
    }
}
