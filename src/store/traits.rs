//! Data store interface
//!
//! The operations the engine needs from durable storage. Implementations
//! must make each call atomic on its own; the engine never holds a
//! transaction across calls. Cross-task coordination relies on the two
//! compare-and-set primitives (`transition_room`, `transition_round`) and on
//! the status-guarded writes (`record_answers`, `clear_answers`,
//! `write_scores`).

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::game::state::{
    CategoryId, PlayerId, Room, RoomId, RoomStatus, Round, RoundId, RoundStatus, ScoredSlot,
    Slot, SlotKey,
};

/// Store errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Backend unavailable or failed the call.
    #[error("store backend failure: {0}")]
    Backend(String),

    /// A uniqueness constraint rejected an insert.
    #[error("conflicting record: {0}")]
    Conflict(String),

    /// A referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),
}

/// Result alias for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations used by the engine.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Point read of a room.
    async fn room(&self, room_id: RoomId) -> StoreResult<Option<Room>>;

    /// Compare-and-set on the room status. Returns whether a row changed.
    async fn transition_room(
        &self,
        room_id: RoomId,
        from: &[RoomStatus],
        to: RoomStatus,
    ) -> StoreResult<bool>;

    /// Batch insert of freshly built rounds. Fails with `Conflict` if a
    /// round id or (room, sequence) pair already exists.
    async fn insert_rounds(&self, rounds: &[Round]) -> StoreResult<()>;

    /// Point read of a round.
    async fn round(&self, round_id: RoundId) -> StoreResult<Option<Round>>;

    /// All rounds of a room, ordered by sequence.
    async fn rounds_for_room(&self, room_id: RoomId) -> StoreResult<Vec<Round>>;

    /// Compare-and-set on the round status. Returns whether a row changed.
    async fn transition_round(
        &self,
        round_id: RoundId,
        from: &[RoundStatus],
        to: RoundStatus,
    ) -> StoreResult<bool>;

    /// Insert empty slots, ignoring keys that already exist. Returns how
    /// many were created.
    async fn upsert_placeholders(&self, keys: &[SlotKey]) -> StoreResult<usize>;

    /// Write a player's answers, only while the round is `InProgress`.
    /// Returns `false` (and writes nothing) once the round has been locked.
    async fn record_answers(
        &self,
        round_id: RoundId,
        player_id: PlayerId,
        answers: &[(CategoryId, String)],
    ) -> StoreResult<bool>;

    /// Blank every answer of a player in a round, only while `InProgress`.
    /// Returns `None` if the round is no longer accepting changes, else the
    /// number of slots cleared.
    async fn clear_answers(
        &self,
        round_id: RoundId,
        player_id: PlayerId,
    ) -> StoreResult<Option<usize>>;

    /// All slots of a round.
    async fn slots_for_round(&self, round_id: RoundId) -> StoreResult<Vec<Slot>>;

    /// Persist scoring results. Only accepted while the round is `Scoring`,
    /// so a pass that lost the lock cannot overwrite committed points.
    async fn write_scores(&self, round_id: RoundId, scored: &[ScoredSlot]) -> StoreResult<bool>;

    /// Sum of persisted points per player across every round of a room.
    async fn room_totals(&self, room_id: RoomId) -> StoreResult<BTreeMap<PlayerId, u32>>;

    /// Decrement a consumable if the player holds at least one unit.
    async fn consume_item(&self, player_id: PlayerId, item_code: &str) -> StoreResult<bool>;

    /// Give back one unit taken by `consume_item`.
    async fn restore_item(&self, player_id: PlayerId, item_code: &str) -> StoreResult<()>;
}
