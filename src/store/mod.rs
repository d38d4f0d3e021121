//! Storage Layer
//!
//! `GameStore` abstracts the transactional data store the engine runs
//! against; `MemoryStore` is the bundled implementation.

pub mod traits;
pub mod memory;

pub use traits::{GameStore, StoreError, StoreResult};
pub use memory::MemoryStore;
