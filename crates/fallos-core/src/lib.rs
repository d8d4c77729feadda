//! fallos-core
//!
//! Shared domain types, settings, the corpus loader, change detection and the
//! seams (`Embedder`, `CrossEncoder`, `DenseIndex`, `DenseStore`) the other
//! crates plug into.
pub mod config;
pub mod corpus;
pub mod error;
pub mod fingerprint;
pub mod memory;
pub mod traits;
pub mod types;

pub use config::{expand_path, resolve_with_base, Settings};
pub use error::{BuildStage, Error, Result};
