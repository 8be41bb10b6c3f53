// =============================================================================
// Error taxonomy — exchange client error kinds
// =============================================================================
//
// `anyhow` is used at the orchestration boundary (main.rs, config loading)
// exactly where the teacher uses it. This enum exists because the retry
// and circuit-breaker logic in `exchange::client` need to match on error
// *kind* (transient vs. fatal) rather than downcast an opaque `anyhow::Error`.
// =============================================================================

use thiserror::Error;

/// Errors surfaced by [`crate::exchange::client::ExchangeClient`].
///
/// Only [`ExchangeError::TransientNetwork`], [`ExchangeError::RateLimited`],
/// and [`ExchangeError::ServerError`] are retried by the client; everything
/// else fails fast.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("rate limited (retry-after={retry_after_ms:?})")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("server error: {status}")]
    ServerError { status: u16 },

    #[error("api error {code}: {msg}")]
    ApiError { code: i64, msg: String },

    #[error("symbol delisted")]
    Delisted,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("circuit breaker open")]
    BreakerOpen,
}

impl ExchangeError {
    /// Whether this error class should be retried by the REST client.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::TransientNetwork(_)
                | ExchangeError::RateLimited { .. }
                | ExchangeError::ServerError { .. }
        )
    }
}

/// Hard-coded delisting return codes from the Bybit v5 API, kept alongside
/// the dynamic delisted-row detection per spec's note that the original
/// implementation keeps both paths.
pub const DELIST_RET_CODES: &[i64] = &[10001, 10002, 130021, 130150];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classes_are_retryable() {
        assert!(ExchangeError::TransientNetwork("timeout".into()).is_retryable());
        assert!(ExchangeError::RateLimited { retry_after_ms: None }.is_retryable());
        assert!(ExchangeError::ServerError { status: 503 }.is_retryable());
    }

    #[test]
    fn fatal_classes_are_not_retryable() {
        assert!(!ExchangeError::Delisted.is_retryable());
        assert!(!ExchangeError::Malformed("bad json".into()).is_retryable());
        assert!(!ExchangeError::ApiError { code: 10001, msg: "x".into() }.is_retryable());
        assert!(!ExchangeError::BreakerOpen.is_retryable());
    }
}
