//! In-memory store
//!
//! Tables behind a single `RwLock`, so every trait call is atomic with
//! respect to every other. Used by the server binary for single-node
//! deployments and by the test suite.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::game::state::{
    CategoryId, PlayerId, Room, RoomId, RoomStatus, Round, RoundId, RoundStatus, ScoredSlot,
    Slot, SlotKey,
};
use crate::store::traits::{GameStore, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    rooms: BTreeMap<RoomId, Room>,
    rounds: BTreeMap<RoundId, Round>,
    slots: BTreeMap<SlotKey, Slot>,
    inventory: BTreeMap<(PlayerId, String), u32>,
}

impl Tables {
    fn round_status(&self, round_id: RoundId) -> Option<RoundStatus> {
        self.rounds.get(&round_id).map(|r| r.status)
    }
}

/// Store keeping every table in process memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a room. Room bookkeeping lives outside the engine;
    /// this is the seam the hosting service uses.
    pub async fn insert_room(&self, room: Room) {
        self.tables.write().await.rooms.insert(room.id, room);
    }

    /// Add a member to an existing room.
    pub async fn add_member(&self, room_id: RoomId, player_id: PlayerId) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let room = tables
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| StoreError::NotFound(format!("room {}", room_id)))?;
        room.members.insert(player_id);
        Ok(())
    }

    /// Credit consumable units to a player.
    pub async fn grant_item(&self, player_id: PlayerId, item_code: &str, units: u32) {
        let mut tables = self.tables.write().await;
        *tables
            .inventory
            .entry((player_id, item_code.to_string()))
            .or_insert(0) += units;
    }

    /// Units of a consumable a player holds.
    pub async fn item_count(&self, player_id: PlayerId, item_code: &str) -> u32 {
        let tables = self.tables.read().await;
        tables
            .inventory
            .get(&(player_id, item_code.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Point read of a slot.
    pub async fn slot(&self, key: &SlotKey) -> Option<Slot> {
        self.tables.read().await.slots.get(key).cloned()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn room(&self, room_id: RoomId) -> StoreResult<Option<Room>> {
        Ok(self.tables.read().await.rooms.get(&room_id).cloned())
    }

    async fn transition_room(
        &self,
        room_id: RoomId,
        from: &[RoomStatus],
        to: RoomStatus,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.rooms.get_mut(&room_id) {
            Some(room) if from.contains(&room.status) => {
                room.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_rounds(&self, rounds: &[Round]) -> StoreResult<()> {
        let mut tables = self.tables.write().await;

        for round in rounds {
            let taken = tables.rounds.contains_key(&round.id)
                || tables
                    .rounds
                    .values()
                    .any(|r| r.room_id == round.room_id && r.sequence == round.sequence);
            if taken {
                return Err(StoreError::Conflict(format!(
                    "round {} of room {}",
                    round.sequence, round.room_id
                )));
            }
        }

        for round in rounds {
            tables.rounds.insert(round.id, round.clone());
        }
        Ok(())
    }

    async fn round(&self, round_id: RoundId) -> StoreResult<Option<Round>> {
        Ok(self.tables.read().await.rounds.get(&round_id).cloned())
    }

    async fn rounds_for_room(&self, room_id: RoomId) -> StoreResult<Vec<Round>> {
        let tables = self.tables.read().await;
        let mut rounds: Vec<Round> = tables
            .rounds
            .values()
            .filter(|r| r.room_id == room_id)
            .cloned()
            .collect();
        rounds.sort_by_key(|r| r.sequence);
        Ok(rounds)
    }

    async fn transition_round(
        &self,
        round_id: RoundId,
        from: &[RoundStatus],
        to: RoundStatus,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.rounds.get_mut(&round_id) {
            Some(round) if from.contains(&round.status) => {
                round.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_placeholders(&self, keys: &[SlotKey]) -> StoreResult<usize> {
        let mut tables = self.tables.write().await;
        let mut created = 0;
        for key in keys {
            if !tables.slots.contains_key(key) {
                tables.slots.insert(*key, Slot::placeholder(*key));
                created += 1;
            }
        }
        Ok(created)
    }

    async fn record_answers(
        &self,
        round_id: RoundId,
        player_id: PlayerId,
        answers: &[(CategoryId, String)],
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.round_status(round_id) != Some(RoundStatus::InProgress) {
            return Ok(false);
        }

        for (category_id, answer) in answers {
            let key = SlotKey {
                round_id,
                player_id,
                category_id: *category_id,
            };
            let slot = tables
                .slots
                .entry(key)
                .or_insert_with(|| Slot::placeholder(key));
            slot.answer = answer.clone();
        }
        Ok(true)
    }

    async fn clear_answers(
        &self,
        round_id: RoundId,
        player_id: PlayerId,
    ) -> StoreResult<Option<usize>> {
        let mut tables = self.tables.write().await;
        if tables.round_status(round_id) != Some(RoundStatus::InProgress) {
            return Ok(None);
        }

        let mut cleared = 0;
        for slot in tables.slots.values_mut() {
            if slot.key.round_id == round_id
                && slot.key.player_id == player_id
                && !slot.answer.is_empty()
            {
                slot.answer.clear();
                cleared += 1;
            }
        }
        Ok(Some(cleared))
    }

    async fn slots_for_round(&self, round_id: RoundId) -> StoreResult<Vec<Slot>> {
        let tables = self.tables.read().await;
        Ok(tables
            .slots
            .values()
            .filter(|s| s.key.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn write_scores(&self, round_id: RoundId, scored: &[ScoredSlot]) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.round_status(round_id) != Some(RoundStatus::Scoring) {
            return Ok(false);
        }

        for entry in scored {
            let key = SlotKey {
                round_id,
                player_id: entry.player_id,
                category_id: entry.category_id,
            };
            let slot = tables
                .slots
                .entry(key)
                .or_insert_with(|| Slot::placeholder(key));
            slot.normalized = entry.normalized.clone();
            slot.points = entry.points;
            slot.validation = entry.validation;
        }
        Ok(true)
    }

    async fn room_totals(&self, room_id: RoomId) -> StoreResult<BTreeMap<PlayerId, u32>> {
        let tables = self.tables.read().await;
        let mut totals = BTreeMap::new();
        for slot in tables.slots.values() {
            let in_room = tables
                .rounds
                .get(&slot.key.round_id)
                .map(|r| r.room_id == room_id)
                .unwrap_or(false);
            if in_room {
                *totals.entry(slot.key.player_id).or_insert(0) += slot.points;
            }
        }
        Ok(totals)
    }

    async fn consume_item(&self, player_id: PlayerId, item_code: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.inventory.get_mut(&(player_id, item_code.to_string())) {
            Some(units) if *units > 0 => {
                *units -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restore_item(&self, player_id: PlayerId, item_code: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        *tables
            .inventory
            .entry((player_id, item_code.to_string()))
            .or_insert(0) += 1;
        Ok(())
    }
}
