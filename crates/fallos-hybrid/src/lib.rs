//! fallos-hybrid
//!
//! Index builds into atomically published generations, and the hybrid query
//! engine: dense and BM25 candidates merged by position, optionally boosted by
//! enrichment metadata and re-ranked by a cross-encoder.
pub mod boost;
pub mod build;
pub mod cache;
pub mod engine;
pub mod manifest;
pub mod merge;

pub use boost::DomainBooster;
pub use build::{index_status, IndexBuilder, IndexStatus};
pub use cache::QueryVectorCache;
pub use engine::{EngineStats, HybridQueryEngine};
pub use manifest::{IndexManifest, MANIFEST_FILE};
pub use merge::{merge_hits, select_top};
