pub mod engine;
pub mod sigma;

pub use engine::{VolatilityCache, VolatilityEngine, VolatilityEngineConfig};
