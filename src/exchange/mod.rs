pub mod client;
pub mod rate_limit;
pub mod retry;
pub mod types;

pub use client::{ExchangeClient, ExchangeClientConfig};
