//! Game State Definitions
//!
//! Records the engine reads from and writes to the data store, plus the
//! per-room match phase. Maps are BTreeMaps so score payloads and logs come
//! out in a stable order.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// IDENTIFIERS
// =============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create from raw bytes.
            pub const fn new(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Generate a fresh random identifier.
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from a UUID string.
            pub fn from_uuid_str(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
            }

            /// Get raw bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// First four bytes as hex, for log lines.
            pub fn short(&self) -> String {
                hex::encode(&self.as_bytes()[..4])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Stable player identifier, resolved by the identity layer.
    PlayerId
);
uuid_id!(
    /// Room identifier. A room hosts exactly one match.
    RoomId
);
uuid_id!(
    /// Round identifier.
    RoundId
);

/// Category identifier, as assigned by the lexicon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub u32);

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A category players answer for ("Animal", "Fruta", ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category identifier.
    pub id: CategoryId,
    /// Display name.
    pub name: String,
}

// =============================================================================
// ROOM
// =============================================================================

/// Room lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Accepting players, match not started.
    Open,
    /// Match running.
    InProgress,
    /// Match ended or room abandoned.
    Closed,
}

/// A room of players. Created and joined outside the engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Room {
    /// Room identifier.
    pub id: RoomId,
    /// Display name.
    pub name: String,
    /// Player who created the room; the only one allowed to start it.
    pub creator: PlayerId,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Member players.
    pub members: BTreeSet<PlayerId>,
}

impl Room {
    /// Create an open room with the creator as its first member.
    pub fn new(id: RoomId, name: impl Into<String>, creator: PlayerId) -> Self {
        let mut members = BTreeSet::new();
        members.insert(creator);
        Self {
            id,
            name: name.into(),
            creator,
            status: RoomStatus::Open,
            members,
        }
    }

    /// Add a member (builder style, for seeding).
    pub fn with_member(mut self, player_id: PlayerId) -> Self {
        self.members.insert(player_id);
        self
    }

    /// Check membership.
    pub fn is_member(&self, player_id: &PlayerId) -> bool {
        self.members.contains(player_id)
    }
}

// =============================================================================
// ROUND
// =============================================================================

/// Round lifecycle status.
///
/// `Ready -> InProgress -> Scoring -> Done`. The move into `Scoring` is the
/// scoring lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Built, not yet announced.
    Ready,
    /// Announced and accepting answers.
    InProgress,
    /// Locked by a scoring pass.
    Scoring,
    /// Points committed.
    Done,
}

impl RoundStatus {
    /// Statuses from which the scoring lock may be taken.
    pub const LOCKABLE: [RoundStatus; 2] = [RoundStatus::Ready, RoundStatus::InProgress];

    /// True while the round occupies the room's single active slot.
    pub fn is_active(self) -> bool {
        matches!(self, RoundStatus::InProgress | RoundStatus::Scoring)
    }
}

/// One timed unit of play.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Round identifier.
    pub id: RoundId,
    /// Owning room.
    pub room_id: RoomId,
    /// 1-based position in the match.
    pub sequence: u32,
    /// Assigned letter (uppercase).
    pub letter: char,
    /// Categories for this round.
    pub categories: Vec<Category>,
    /// Lifecycle status.
    pub status: RoundStatus,
    /// Configured duration in seconds.
    pub duration_secs: u32,
}

impl Round {
    /// Check whether a category belongs to this round.
    pub fn has_category(&self, category_id: CategoryId) -> bool {
        self.categories.iter().any(|c| c.id == category_id)
    }

    /// Category ids in round order.
    pub fn category_ids(&self) -> Vec<CategoryId> {
        self.categories.iter().map(|c| c.id).collect()
    }
}

// =============================================================================
// PARTICIPATION SLOT
// =============================================================================

/// Key of a participation slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    /// Round.
    pub round_id: RoundId,
    /// Player.
    pub player_id: PlayerId,
    /// Category.
    pub category_id: CategoryId,
}

/// Outcome of validating a slot's answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validation {
    /// Not scored yet.
    Pending,
    /// Starts with the letter and is in the lexicon.
    Valid,
    /// Non-empty but rejected.
    Invalid,
    /// Nothing submitted.
    Empty,
}

/// A player's answer for one category in one round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Slot {
    /// Slot key.
    pub key: SlotKey,
    /// Raw submitted text.
    pub answer: String,
    /// Normalized answer, filled by scoring.
    pub normalized: String,
    /// Awarded points, filled by scoring.
    pub points: u32,
    /// Validation status, filled by scoring.
    pub validation: Validation,
}

impl Slot {
    /// Empty placeholder for a key.
    pub fn placeholder(key: SlotKey) -> Self {
        Self {
            key,
            answer: String::new(),
            normalized: String::new(),
            points: 0,
            validation: Validation::Pending,
        }
    }
}

/// Scoring result for one slot, written back by the lock holder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScoredSlot {
    /// Player.
    pub player_id: PlayerId,
    /// Category.
    pub category_id: CategoryId,
    /// Normalized answer.
    pub normalized: String,
    /// Final points after power-up overrides.
    pub points: u32,
    /// Validation status.
    pub validation: Validation,
}

// =============================================================================
// MATCH PHASE
// =============================================================================

/// In-process phase of a room's match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Not started.
    #[default]
    Waiting,
    /// A round is accepting answers.
    RoundActive,
    /// A scoring pass holds the lock.
    Scoring,
    /// Between rounds.
    InterRoundDelay,
    /// Final round scored, room closed.
    MatchEnded,
}
