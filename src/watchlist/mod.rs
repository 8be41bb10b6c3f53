pub mod builder;
pub mod scoring;

pub use builder::{build_watchlist, BuildResult, CandidateRow};
