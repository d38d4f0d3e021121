//! Core primitives shared by the engine.
//!
//! Pure functions with no I/O: answer normalization, the seeded RNG behind
//! round construction, and idempotency key derivation.

pub mod text;
pub mod rng;
pub mod hash;

// Re-export core types
pub use text::normalize;
pub use rng::SeededRng;
pub use hash::reward_key;
