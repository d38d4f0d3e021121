//! Game Logic Module
//!
//! The match and round engine.
//!
//! ## Module Structure
//!
//! - `state`: Rooms, rounds, participation slots, match phase
//! - `builder`: Letter and category draws for a match
//! - `scoring`: Validation, point award, scoring lock, winner
//! - `timer`: Per-room countdowns
//! - `runtime`: Room-scoped in-process state (phase, timer, activations)
//! - `effects`: Power-up catalogue and processor
//! - `rewards`: Match-end credits and the ledger seam
//! - `events`: Outbound engine events
//! - `engine`: The orchestrator tying it together

pub mod state;
pub mod builder;
pub mod scoring;
pub mod timer;
pub mod runtime;
pub mod effects;
pub mod rewards;
pub mod events;
pub mod engine;

// Re-export key types
pub use state::{CategoryId, MatchPhase, PlayerId, Room, RoomId, Round, RoundId, RoundStatus};
pub use scoring::{MatchOutcome, RoundScore, ScoringEngine};
pub use effects::{EffectKind, EffectRequest};
pub use events::{Audience, Dispatch, EngineEvent, EventHub};
pub use rewards::{MemoryLedger, RewardLedger};
pub use engine::{MatchEngine, MatchError, RoundSnapshot};
