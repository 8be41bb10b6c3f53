// =============================================================================
// Scoring — ranks surviving watchlist rows
// =============================================================================

use crate::config::Weights;

/// `w_f·|funding_rate| + w_v·ln(1+volume_24h) − w_s·spread_pct − w_σ·σ`.
/// `sigma` of `None` is treated as `0.0` (callers are expected to have
/// already dropped rows with an unknown sigma when a volatility bound is
/// configured — see stage 5 of the pipeline).
pub fn score(weights: &Weights, funding_rate: f64, volume_24h: f64, spread_pct: f64, sigma: Option<f64>) -> f64 {
    let sigma = sigma.unwrap_or(0.0);
    weights.funding * funding_rate.abs() + weights.volume * (1.0 + volume_24h).ln()
        - weights.spread * spread_pct
        - weights.volatility * sigma
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_matches_worked_example() {
        let weights = Weights {
            funding: 10.0,
            volume: 0.5,
            spread: 5.0,
            volatility: 2.0,
            top_symbols: 20,
        };
        let result = score(&weights, 0.001, 1_000_000.0, 0.0005, Some(0.02));
        assert!((result - 6.876).abs() < 0.01, "got {result}");
    }

    #[test]
    fn score_treats_missing_sigma_as_zero() {
        let weights = Weights {
            funding: 10.0,
            volume: 0.5,
            spread: 5.0,
            volatility: 2.0,
            top_symbols: 20,
        };
        let with_zero = score(&weights, 0.001, 1_000_000.0, 0.0005, Some(0.0));
        let with_none = score(&weights, 0.001, 1_000_000.0, 0.0005, None);
        assert_eq!(with_zero, with_none);
    }
}
