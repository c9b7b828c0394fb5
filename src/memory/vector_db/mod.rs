//! Vector storage: exact similarity index, snapshots and the shared store

pub mod index;
pub mod snapshot;
pub mod store;

pub use index::{Chunk, PendingChunk, SearchHit, VectorIndex};
pub use store::IndexStore;
