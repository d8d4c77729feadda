//! fallos-dense
//!
//! Dense (embedding) collections behind the `DenseStore`/`DenseIndex` seams:
//! a LanceDB store for production and an in-process store for tests.
pub mod ann;
pub mod lance;
pub mod memory;
pub mod schema;
pub mod table;

pub use lance::{LanceCollection, LanceStore};
pub use memory::{MemoryCollection, MemoryDenseStore};
