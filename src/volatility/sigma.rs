// =============================================================================
// Volatility (sigma) — stddev of log-returns over a kline window
// =============================================================================
//
// Same "guard non-finite, return Option" discipline as the teacher's ATR/EMA
// indicators: any non-finite intermediate aborts the computation rather than
// propagating a NaN into the Store.
// =============================================================================

use crate::exchange::types::Candle;

/// Default look-back window (5-minute candles).
pub const DEFAULT_WINDOW: usize = 30;

/// Standard deviation of log-returns over the most recent `window` closes.
/// `candles` must be oldest-first. Returns `None` if there are fewer than
/// `window + 1` candles or any intermediate value is non-finite.
pub fn sigma(candles: &[Candle], window: usize) -> Option<f64> {
    if window == 0 || candles.len() < window + 1 {
        return None;
    }

    let recent = &candles[candles.len() - (window + 1)..];
    let mut returns: Vec<f64> = Vec::with_capacity(window);
    for pair in recent.windows(2) {
        let (prev, cur) = (pair[0].close, pair[1].close);
        if prev <= 0.0 || cur <= 0.0 {
            return None;
        }
        let r = (cur / prev).ln();
        if !r.is_finite() {
            return None;
        }
        returns.push(r);
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let sd = variance.sqrt();

    if sd.is_finite() {
        Some(sd)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64) -> Candle {
        Candle {
            start_ms: 0,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn sigma_none_below_minimum_window() {
        let candles: Vec<Candle> = (0..5).map(|i| candle(100.0 + i as f64)).collect();
        assert!(sigma(&candles, 30).is_none());
    }

    #[test]
    fn sigma_zero_for_constant_price() {
        let candles: Vec<Candle> = (0..31).map(|_| candle(100.0)).collect();
        assert_eq!(sigma(&candles, 30), Some(0.0));
    }

    #[test]
    fn sigma_positive_for_varying_price() {
        let closes = [100.0, 101.0, 99.0, 102.0, 98.0, 103.0];
        let candles: Vec<Candle> = closes.iter().map(|&c| candle(c)).collect();
        let result = sigma(&candles, 5).unwrap();
        assert!(result > 0.0);
    }

    #[test]
    fn sigma_none_on_non_positive_price() {
        let mut candles: Vec<Candle> = (0..31).map(|_| candle(100.0)).collect();
        candles[15].close = 0.0;
        assert!(sigma(&candles, 30).is_none());
    }
}
