// =============================================================================
// Bybit v5 public WS wire protocol — subscribe frames + ticker parsing
// =============================================================================

use serde::Serialize;
use serde_json::Value;

use crate::store::TickerPatch;
use crate::types::Symbol;

/// Per-frame topic cap; subscriptions above this are chunked.
pub const DEFAULT_SUBSCRIBE_CHUNK: usize = 200;

#[derive(Debug, Serialize)]
struct SubscribeFrame<'a> {
    op: &'static str,
    args: &'a [String],
}

/// Build one or more `{"op":"subscribe","args":[...]}` frames for `symbols`,
/// chunked so no frame exceeds `chunk_size` topics.
pub fn subscribe_frames(symbols: &[Symbol], chunk_size: usize) -> Vec<String> {
    build_frames("subscribe", symbols, chunk_size)
}

pub fn unsubscribe_frames(symbols: &[Symbol], chunk_size: usize) -> Vec<String> {
    build_frames("unsubscribe", symbols, chunk_size)
}

#[derive(Debug, Serialize)]
struct PingFrame {
    op: &'static str,
}

/// Bybit v5 public WS application-level ping: `{"op":"ping"}`.
pub fn ping_frame() -> String {
    serde_json::to_string(&PingFrame { op: "ping" }).expect("ping frame is always serializable")
}

fn build_frames(op: &'static str, symbols: &[Symbol], chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    symbols
        .chunks(chunk_size)
        .map(|chunk| {
            let args: Vec<String> = chunk.iter().map(|s| format!("tickers.{s}")).collect();
            serde_json::to_string(&SubscribeFrame { op, args: &args })
                .expect("subscribe frame is always serializable")
        })
        .collect()
}

/// Result of parsing one inbound WS text frame.
pub enum InboundFrame {
    /// A ticker update for a symbol: `(symbol, patch)`.
    Ticker(Symbol, TickerPatch),
    /// A frame this connector doesn't act on (subscribe ack, pong, etc.).
    Other,
}

/// Parse an inbound frame per the `{topic, data, ts}` shape. Unknown topics
/// or malformed frames resolve to [`InboundFrame::Other`] rather than
/// erroring — a single bad frame must never take down the connector.
pub fn parse_inbound(text: &str) -> InboundFrame {
    let root: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return InboundFrame::Other,
    };

    let topic = match root.get("topic").and_then(Value::as_str) {
        Some(t) => t,
        None => return InboundFrame::Other,
    };
    let Some(symbol_str) = topic.strip_prefix("tickers.") else {
        return InboundFrame::Other;
    };

    let Some(data) = root.get("data") else {
        return InboundFrame::Other;
    };

    let patch = TickerPatch {
        funding_rate: parse_f64(data, "fundingRate"),
        volume_24h: parse_f64(data, "volume24h"),
        bid1: parse_f64(data, "bid1Price"),
        ask1: parse_f64(data, "ask1Price"),
        next_funding_ts: parse_i64(data, "nextFundingTime"),
        mark_price: parse_f64(data, "markPrice"),
        last_price: parse_f64(data, "lastPrice"),
    };

    InboundFrame::Ticker(Symbol::new(symbol_str), patch)
}

fn parse_f64(data: &Value, field: &str) -> Option<f64> {
    data.get(field).and_then(Value::as_str).and_then(|s| s.parse().ok())
}

fn parse_i64(data: &Value, field: &str) -> Option<i64> {
    data.get(field).and_then(Value::as_str).and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_frame_matches_bybit_shape() {
        assert_eq!(ping_frame(), r#"{"op":"ping"}"#);
    }

    #[test]
    fn subscribe_frames_chunk_at_boundary() {
        let symbols: Vec<Symbol> = (0..250).map(|i| Symbol::new(format!("SYM{i}"))).collect();
        let frames = subscribe_frames(&symbols, 200);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"op\":\"subscribe\""));
    }

    #[test]
    fn parse_inbound_extracts_ticker_patch() {
        let text = r#"{"topic":"tickers.BTCUSDT","type":"snapshot","data":{"symbol":"BTCUSDT","fundingRate":"0.0001","bid1Price":"100.0","ask1Price":"100.5","nextFundingTime":"1700000000000"},"ts":1700000000000}"#;
        match parse_inbound(text) {
            InboundFrame::Ticker(symbol, patch) => {
                assert_eq!(symbol.as_str(), "BTCUSDT");
                assert_eq!(patch.funding_rate, Some(0.0001));
                assert_eq!(patch.bid1, Some(100.0));
            }
            InboundFrame::Other => panic!("expected a ticker frame"),
        }
    }

    #[test]
    fn parse_inbound_ignores_unknown_topic() {
        assert!(matches!(
            parse_inbound(r#"{"topic":"orderbook.BTCUSDT","data":{}}"#),
            InboundFrame::Other
        ));
    }

    #[test]
    fn parse_inbound_tolerates_garbage() {
        assert!(matches!(parse_inbound("not json"), InboundFrame::Other));
    }
}
