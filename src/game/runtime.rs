//! Room Runtime State
//!
//! In-process, room-scoped state owned by the match engine: the match phase,
//! the running countdown and the power-up activation record of the open
//! round. Handed explicitly to the timer and the effect processor.
//!
//! The activation record is created when a round opens and taken by the
//! scoring pass that wins the lock. A pass that fails hands it back.
//! A room's entry is dropped when its match ends.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::game::scoring::ScoringOverrides;
use crate::game::state::{CategoryId, MatchPhase, PlayerId, RoomId, RoundId};

/// A pending reveal: `actor` sees `target`'s answer for `category_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reveal {
    /// Player who paid for the reveal.
    pub actor: PlayerId,
    /// Whose answer.
    pub target: PlayerId,
    /// Category.
    pub category_id: CategoryId,
}

/// Power-up state of one open round.
#[derive(Debug, Clone)]
pub struct ActivationRecord {
    /// Round this record belongs to.
    pub round_id: RoundId,
    skip_grants: BTreeMap<PlayerId, u32>,
    skipped: BTreeSet<(PlayerId, CategoryId)>,
    disregarded: BTreeSet<(PlayerId, CategoryId)>,
    reveals: Vec<Reveal>,
}

impl ActivationRecord {
    /// Empty record for a round.
    pub fn new(round_id: RoundId) -> Self {
        Self {
            round_id,
            skip_grants: BTreeMap::new(),
            skipped: BTreeSet::new(),
            disregarded: BTreeSet::new(),
            reveals: Vec::new(),
        }
    }

    /// Give a player one skip to use this round.
    pub fn grant_skip(&mut self, player_id: PlayerId) {
        *self.skip_grants.entry(player_id).or_insert(0) += 1;
    }

    /// Unused skips held by a player.
    pub fn skips_available(&self, player_id: PlayerId) -> u32 {
        self.skip_grants.get(&player_id).copied().unwrap_or(0)
    }

    /// Spend a skip on a category. `false` if the player holds none or has
    /// already skipped that category.
    pub fn exercise_skip(&mut self, player_id: PlayerId, category_id: CategoryId) -> bool {
        let Some(grants) = self.skip_grants.get_mut(&player_id) else {
            return false;
        };
        if *grants == 0 || self.skipped.contains(&(player_id, category_id)) {
            return false;
        }
        *grants -= 1;
        self.skipped.insert((player_id, category_id));
        true
    }

    /// Force a player's category to zero.
    pub fn mark_disregarded(&mut self, target: PlayerId, category_id: CategoryId) {
        self.disregarded.insert((target, category_id));
    }

    /// Queue a reveal for delivery after scoring.
    pub fn push_reveal(&mut self, reveal: Reveal) {
        self.reveals.push(reveal);
    }

    /// Queued reveals.
    pub fn reveals(&self) -> &[Reveal] {
        &self.reveals
    }

    /// Overrides to feed the scoring pass.
    pub fn overrides(&self) -> ScoringOverrides {
        ScoringOverrides {
            skipped: self.skipped.clone(),
            disregarded: self.disregarded.clone(),
        }
    }
}

struct TimerSlot {
    round_id: RoundId,
    deadline: Instant,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RoomRuntime {
    phase: MatchPhase,
    timer: Option<TimerSlot>,
    activation: Option<ActivationRecord>,
    /// Round whose stop has been announced.
    stopping: Option<RoundId>,
    /// Failed scoring passes of the open round.
    failed_passes: u32,
}

impl RoomRuntime {
    fn cancel_timer(&mut self) {
        if let Some(slot) = self.timer.take() {
            slot.handle.abort();
        }
    }
}

/// Runtime state of every room hosted by this process.
#[derive(Default)]
pub struct RoomRuntimes {
    rooms: Mutex<BTreeMap<RoomId, RoomRuntime>>,
}

impl RoomRuntimes {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase; `Waiting` for rooms never seen.
    pub async fn phase(&self, room_id: RoomId) -> MatchPhase {
        self.rooms
            .lock()
            .await
            .get(&room_id)
            .map(|r| r.phase)
            .unwrap_or_default()
    }

    /// Set the phase.
    pub async fn set_phase(&self, room_id: RoomId, phase: MatchPhase) {
        self.rooms.lock().await.entry(room_id).or_default().phase = phase;
    }

    /// Open a round: fresh activation record, phase `RoundActive`.
    pub async fn open_round(&self, room_id: RoomId, round_id: RoundId) {
        let mut rooms = self.rooms.lock().await;
        let runtime = rooms.entry(room_id).or_default();
        runtime.phase = MatchPhase::RoundActive;
        runtime.activation = Some(ActivationRecord::new(round_id));
        runtime.stopping = None;
        runtime.failed_passes = 0;
    }

    /// Hand back the record of a round whose scoring pass failed and make
    /// it the open round again. Returns how many passes have failed so far.
    pub async fn restore_activation(&self, room_id: RoomId, record: ActivationRecord) -> u32 {
        let mut rooms = self.rooms.lock().await;
        let runtime = rooms.entry(room_id).or_default();
        runtime.phase = MatchPhase::RoundActive;
        runtime.activation = Some(record);
        runtime.stopping = None;
        runtime.failed_passes += 1;
        runtime.failed_passes
    }

    /// True while `round_id` is the open round of the room.
    pub async fn is_round_open(&self, room_id: RoomId, round_id: RoundId) -> bool {
        self.rooms
            .lock()
            .await
            .get(&room_id)
            .map(|r| {
                r.phase == MatchPhase::RoundActive
                    && r.activation.as_ref().map(|a| a.round_id) == Some(round_id)
            })
            .unwrap_or(false)
    }

    /// Round currently holding the activation record.
    pub async fn open_round_id(&self, room_id: RoomId) -> Option<RoundId> {
        self.rooms
            .lock()
            .await
            .get(&room_id)
            .and_then(|r| r.activation.as_ref().map(|a| a.round_id))
    }

    /// Run `f` against the activation record of an open round.
    pub async fn with_activation<R>(
        &self,
        room_id: RoomId,
        round_id: RoundId,
        f: impl FnOnce(&mut ActivationRecord) -> R,
    ) -> Option<R> {
        let mut rooms = self.rooms.lock().await;
        let runtime = rooms.get_mut(&room_id)?;
        if runtime.phase != MatchPhase::RoundActive {
            return None;
        }
        runtime
            .activation
            .as_mut()
            .filter(|a| a.round_id == round_id)
            .map(f)
    }

    /// Close the round for scoring: phase `Scoring`, record removed and
    /// returned. Any other round's record is left in place.
    pub async fn take_activation(
        &self,
        room_id: RoomId,
        round_id: RoundId,
    ) -> Option<ActivationRecord> {
        let mut rooms = self.rooms.lock().await;
        let runtime = rooms.entry(room_id).or_default();
        runtime.phase = MatchPhase::Scoring;
        if runtime.activation.as_ref().map(|a| a.round_id) == Some(round_id) {
            runtime.activation.take()
        } else {
            None
        }
    }

    /// Install a countdown for a round, aborting any countdown the room
    /// already had. `spawn` runs under the registry lock, so the task cannot
    /// observe the registry before its own slot is in place.
    pub async fn install_timer(
        &self,
        room_id: RoomId,
        round_id: RoundId,
        duration: Duration,
        spawn: impl FnOnce(Instant) -> JoinHandle<()>,
    ) {
        let mut rooms = self.rooms.lock().await;
        let runtime = rooms.entry(room_id).or_default();
        runtime.cancel_timer();

        let deadline = Instant::now() + duration;
        let handle = spawn(deadline);
        runtime.timer = Some(TimerSlot {
            round_id,
            deadline,
            handle,
        });
    }

    /// True if the room's countdown is the one for `round_id`.
    pub async fn timer_matches(&self, room_id: RoomId, round_id: RoundId) -> bool {
        self.rooms
            .lock()
            .await
            .get(&room_id)
            .and_then(|r| r.timer.as_ref())
            .map(|t| t.round_id == round_id)
            .unwrap_or(false)
    }

    /// Detach the countdown of `round_id` without aborting it. Called by the
    /// countdown itself when it reaches zero. `false` if it was superseded.
    pub async fn release_timer(&self, room_id: RoomId, round_id: RoundId) -> bool {
        let mut rooms = self.rooms.lock().await;
        let Some(runtime) = rooms.get_mut(&room_id) else {
            return false;
        };
        if runtime.timer.as_ref().map(|t| t.round_id) == Some(round_id) {
            runtime.timer = None;
            runtime.stopping = Some(round_id);
            true
        } else {
            false
        }
    }

    /// Stop `round_id`: abort its countdown if one is running and claim the
    /// stop announcement. `false` if the round's stop was already announced,
    /// by an earlier stop or by the countdown reaching zero.
    pub async fn begin_stop(&self, room_id: RoomId, round_id: RoundId) -> bool {
        let mut rooms = self.rooms.lock().await;
        let Some(runtime) = rooms.get_mut(&room_id) else {
            return true;
        };
        if runtime.timer.as_ref().map(|t| t.round_id) == Some(round_id) {
            runtime.cancel_timer();
        }
        if runtime.stopping == Some(round_id) {
            return false;
        }
        runtime.stopping = Some(round_id);
        true
    }

    /// Abort the countdown of `round_id`, if it is still running.
    pub async fn cancel_timer(&self, room_id: RoomId, round_id: RoundId) -> bool {
        let mut rooms = self.rooms.lock().await;
        let Some(runtime) = rooms.get_mut(&room_id) else {
            return false;
        };
        if runtime.timer.as_ref().map(|t| t.round_id) == Some(round_id) {
            runtime.cancel_timer();
            true
        } else {
            false
        }
    }

    /// Deadline of the running countdown of `round_id`.
    pub async fn timer_deadline(&self, room_id: RoomId, round_id: RoundId) -> Option<Instant> {
        self.rooms
            .lock()
            .await
            .get(&room_id)
            .and_then(|r| r.timer.as_ref())
            .filter(|t| t.round_id == round_id)
            .map(|t| t.deadline)
    }

    /// Drop a room whose match is over, aborting its countdown.
    pub async fn close(&self, room_id: RoomId) {
        if let Some(mut runtime) = self.rooms.lock().await.remove(&room_id) {
            runtime.cancel_timer();
        }
    }

    /// Rooms currently running a match.
    pub async fn active_rooms(&self) -> usize {
        self.rooms
            .lock()
            .await
            .values()
            .filter(|r| r.phase != MatchPhase::Waiting)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    #[test]
    fn test_skip_grant_is_single_use() {
        let mut record = ActivationRecord::new(RoundId::new([1; 16]));
        assert!(!record.exercise_skip(p(1), CategoryId(1)));

        record.grant_skip(p(1));
        assert!(record.exercise_skip(p(1), CategoryId(1)));
        assert!(!record.exercise_skip(p(1), CategoryId(2)));
        assert_eq!(record.skips_available(p(1)), 0);
        assert!(record.overrides().skipped.contains(&(p(1), CategoryId(1))));
    }

    #[test]
    fn test_same_category_not_skipped_twice() {
        let mut record = ActivationRecord::new(RoundId::new([1; 16]));
        record.grant_skip(p(1));
        record.grant_skip(p(1));
        assert!(record.exercise_skip(p(1), CategoryId(1)));
        assert!(!record.exercise_skip(p(1), CategoryId(1)));
        assert_eq!(record.skips_available(p(1)), 1);
    }

    #[tokio::test]
    async fn test_activation_lifecycle() {
        let runtimes = RoomRuntimes::new();
        let room = RoomId::new([1; 16]);
        let round = RoundId::new([2; 16]);

        runtimes.open_round(room, round).await;
        assert!(runtimes.is_round_open(room, round).await);
        runtimes
            .with_activation(room, round, |a| a.mark_disregarded(p(1), CategoryId(1)))
            .await
            .unwrap();

        let record = runtimes.take_activation(room, round).await.unwrap();
        assert!(record.overrides().disregarded.contains(&(p(1), CategoryId(1))));
        assert_eq!(runtimes.phase(room).await, MatchPhase::Scoring);
        assert!(!runtimes.is_round_open(room, round).await);
        assert!(runtimes.take_activation(room, round).await.is_none());
    }

    #[tokio::test]
    async fn test_with_activation_wrong_round() {
        let runtimes = RoomRuntimes::new();
        let room = RoomId::new([1; 16]);
        runtimes.open_round(room, RoundId::new([2; 16])).await;

        let result = runtimes
            .with_activation(room, RoundId::new([3; 16]), |a| a.grant_skip(p(1)))
            .await;
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_timer_replaces_old() {
        let runtimes = RoomRuntimes::new();
        let room = RoomId::new([1; 16]);
        let first = RoundId::new([2; 16]);
        let second = RoundId::new([3; 16]);

        runtimes
            .install_timer(room, first, Duration::from_secs(20), |_| {
                tokio::spawn(std::future::pending())
            })
            .await;
        runtimes
            .install_timer(room, second, Duration::from_secs(20), |_| {
                tokio::spawn(std::future::pending())
            })
            .await;

        assert!(!runtimes.timer_matches(room, first).await);
        assert!(runtimes.timer_matches(room, second).await);
        assert!(!runtimes.release_timer(room, first).await);
        assert!(runtimes.timer_deadline(room, second).await.is_some());

        assert!(runtimes.cancel_timer(room, second).await);
        assert!(runtimes.timer_deadline(room, second).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drops_room() {
        let runtimes = RoomRuntimes::new();
        let room = RoomId::new([1; 16]);
        let round = RoundId::new([2; 16]);
        runtimes.open_round(room, round).await;
        runtimes
            .install_timer(room, round, Duration::from_secs(20), |_| {
                tokio::spawn(std::future::pending())
            })
            .await;
        assert_eq!(runtimes.active_rooms().await, 1);

        runtimes.close(room).await;
        assert!(runtimes.open_round_id(room).await.is_none());
        assert!(runtimes.timer_deadline(room, round).await.is_none());
        assert_eq!(runtimes.active_rooms().await, 0);
        assert!(runtimes.rooms.lock().await.is_empty());
        assert_eq!(runtimes.phase(room).await, MatchPhase::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_announced_once_per_round() {
        let runtimes = RoomRuntimes::new();
        let room = RoomId::new([1; 16]);
        let round = RoundId::new([2; 16]);
        runtimes.open_round(room, round).await;
        runtimes
            .install_timer(room, round, Duration::from_secs(20), |_| {
                tokio::spawn(std::future::pending())
            })
            .await;

        assert!(runtimes.begin_stop(room, round).await);
        assert!(runtimes.timer_deadline(room, round).await.is_none());
        assert!(!runtimes.begin_stop(room, round).await);

        // A countdown that reached zero has announced the stop itself.
        let next = RoundId::new([3; 16]);
        runtimes.open_round(room, next).await;
        runtimes
            .install_timer(room, next, Duration::from_secs(20), |_| {
                tokio::spawn(std::future::pending())
            })
            .await;
        assert!(runtimes.release_timer(room, next).await);
        assert!(!runtimes.begin_stop(room, next).await);
    }

    #[tokio::test]
    async fn test_restored_record_reopens_round() {
        let runtimes = RoomRuntimes::new();
        let room = RoomId::new([1; 16]);
        let round = RoundId::new([2; 16]);
        runtimes.open_round(room, round).await;
        runtimes
            .with_activation(room, round, |a| a.mark_disregarded(p(1), CategoryId(1)))
            .await
            .unwrap();
        assert!(runtimes.begin_stop(room, round).await);

        let record = runtimes.take_activation(room, round).await.unwrap();
        assert!(!runtimes.is_round_open(room, round).await);

        assert_eq!(runtimes.restore_activation(room, record).await, 1);
        assert!(runtimes.is_round_open(room, round).await);
        assert!(runtimes.begin_stop(room, round).await);

        let record = runtimes.take_activation(room, round).await.unwrap();
        assert!(record.overrides().disregarded.contains(&(p(1), CategoryId(1))));
        assert_eq!(runtimes.restore_activation(room, record).await, 2);
    }
}
