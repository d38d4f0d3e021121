//! # Stop Arena Server
//!
//! Match and round engine for Stop Arena, a real-time multiplayer word game
//! in the style of "Stop" / "Adedonha".
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    STOP ARENA SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Pure primitives                           │
//! │  ├── text.rs     - Answer normalization                      │
//! │  ├── rng.rs      - Seeded Xorshift128+ for round draws       │
//! │  └── hash.rs     - Reward idempotency keys                   │
//! │                                                              │
//! │  game/           - Match and round engine                    │
//! │  ├── state.rs    - Rooms, rounds, participation slots        │
//! │  ├── builder.rs  - Letter/category draws                     │
//! │  ├── scoring.rs  - Validation, points, scoring lock          │
//! │  ├── timer.rs    - Per-room countdowns                       │
//! │  ├── effects.rs  - Power-ups                                 │
//! │  ├── rewards.rs  - Match-end credits                         │
//! │  └── engine.rs   - Orchestrator                              │
//! │                                                              │
//! │  store/          - GameStore trait + in-memory store         │
//! │  lexicon.rs      - Accepted answers by letter and category   │
//! │                                                              │
//! │  network/        - WebSocket gateway                         │
//! │  ├── server.rs   - Connections and event fan-out             │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - Player identity (JWT)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Every room and round status change is a compare-and-set in the store.
//! Of the countdown and any number of "stop" calls racing to end a round,
//! exactly one wins the scoring lock; the others read back the committed
//! result.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod lexicon;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use config::{EngineConfig, RewardConfig};
pub use game::engine::{MatchEngine, MatchError, RoundSnapshot};
pub use game::events::{EngineEvent, EventHub};
pub use game::state::{CategoryId, PlayerId, RoomId, RoundId};
pub use lexicon::{Lexicon, MemoryLexicon};
pub use store::{GameStore, MemoryStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
