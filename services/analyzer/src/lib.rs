pub mod adapters;
pub mod classifier;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod rate_limit;
pub mod recommender;
pub mod retry;

pub use orchestrator::{AnalysisOptions, Analyzer};
pub use recommender::{RecommendationSummary, Recommender};
