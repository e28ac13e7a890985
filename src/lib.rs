pub mod cli;
pub mod config;
pub mod detector;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod probe;
pub mod search;
pub mod single_flight;
pub mod store;
pub mod tracker;

pub use config::Config;
pub use detector::{DetectedPattern, PatternDetector};
pub use embedding::{EmbeddingService, HashedEmbedder};
pub use engine::Engine;
pub use indexer::{IndexReport, Indexer};
pub use probe::{ProbeRegistry, TranscriptProbe};
pub use store::MessageStore;
pub use tracker::{PatternSuggestion, RepeatTracker};
