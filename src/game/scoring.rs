//! Scoring Engine
//!
//! Validates answers against the lexicon, awards points per category and
//! commits them exactly once per round.
//!
//! ## Locking
//!
//! A pass starts by moving the round from `ready|in_progress` to `scoring`
//! with a compare-and-set. Only the caller whose CAS changed the row computes
//! and writes points; every other caller waits for the round to reach `done`
//! and rebuilds the result from what was persisted.
//!
//! ## Points
//!
//! Per category: an answer held by exactly one valid player is worth 10, an
//! answer shared by several valid players is worth 5 to each, anything else
//! is worth 0. Power-up overrides run afterwards: a skipped category that
//! scored 0 becomes 10, a disregarded one becomes 0. Disregard is applied
//! last and wins when both target the same slot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::text::{normalize, starts_with_letter};
use crate::game::state::{
    CategoryId, PlayerId, RoomId, Round, RoundId, RoundStatus, ScoredSlot, SlotKey, Validation,
};
use crate::lexicon::{Lexicon, LexiconError};
use crate::store::{GameStore, StoreError};

/// Points for an answer nobody else gave.
pub const UNIQUE_POINTS: u32 = 10;

/// Points for an answer shared with at least one other player.
pub const SHARED_POINTS: u32 = 5;

/// Points credited to a skipped category.
pub const SKIP_POINTS: u32 = UNIQUE_POINTS;

/// Scoring errors.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    /// Round does not exist (or belongs to another room).
    #[error("round {0} not found")]
    RoundNotFound(RoundId),

    /// Room does not exist.
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    /// The lock was held but the round left `scoring` before points landed.
    #[error("lost the scoring lock on round {0}")]
    LockLost(RoundId),

    /// Another pass holds the lock and did not commit within the wait.
    #[error("round {0} is still being scored elsewhere")]
    StillScoring(RoundId),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Lexicon failure.
    #[error(transparent)]
    Lexicon(#[from] LexiconError),
}

// =============================================================================
// PURE SCORING
// =============================================================================

/// One player's answer for a category, ready for point award.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judged {
    /// Player.
    pub player_id: PlayerId,
    /// Normalized answer.
    pub normalized: String,
    /// Validation outcome.
    pub validation: Validation,
}

/// Validate a raw answer for a round letter against accepted answers.
pub fn judge(answer: &str, letter: char, accepted: &BTreeSet<String>) -> (String, Validation) {
    let normalized = normalize(answer);
    let validation = if normalized.is_empty() {
        Validation::Empty
    } else if starts_with_letter(&normalized, letter) && accepted.contains(&normalized) {
        Validation::Valid
    } else {
        Validation::Invalid
    };
    (normalized, validation)
}

/// Base points for one category.
///
/// Every judged player gets an entry, so absent and invalid answers show up
/// as explicit zeros.
pub fn award_points(judged: &[Judged]) -> BTreeMap<PlayerId, u32> {
    let mut holders: BTreeMap<&str, usize> = BTreeMap::new();
    for j in judged.iter().filter(|j| j.validation == Validation::Valid) {
        *holders.entry(j.normalized.as_str()).or_insert(0) += 1;
    }

    judged
        .iter()
        .map(|j| {
            let points = match (j.validation, holders.get(j.normalized.as_str())) {
                (Validation::Valid, Some(1)) => UNIQUE_POINTS,
                (Validation::Valid, Some(_)) => SHARED_POINTS,
                _ => 0,
            };
            (j.player_id, points)
        })
        .collect()
}

/// Power-up state resolved during scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoringOverrides {
    /// (player, category) pairs the player skipped.
    pub skipped: BTreeSet<(PlayerId, CategoryId)>,
    /// (player, category) pairs an opponent disregarded.
    pub disregarded: BTreeSet<(PlayerId, CategoryId)>,
}

impl ScoringOverrides {
    /// Final points for a slot given its base points.
    pub fn apply(&self, player_id: PlayerId, category_id: CategoryId, base: u32) -> u32 {
        let key = (player_id, category_id);
        let mut points = base;
        if points == 0 && self.skipped.contains(&key) {
            points = SKIP_POINTS;
        }
        if self.disregarded.contains(&key) {
            points = 0;
        }
        points
    }
}

/// Match result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// One player holds the top total.
    Winner {
        /// Winning player.
        player_id: PlayerId,
        /// Their total.
        total: u32,
    },
    /// Two or more players share the top total.
    Tie {
        /// Every tied player.
        players: Vec<PlayerId>,
        /// Shared total.
        total: u32,
    },
    /// Nobody took part.
    NoPlayers,
}

/// Winner or tie from final totals.
pub fn determine_outcome(totals: &BTreeMap<PlayerId, u32>) -> MatchOutcome {
    let Some(top) = totals.values().copied().max() else {
        return MatchOutcome::NoPlayers;
    };

    let players: Vec<PlayerId> = totals
        .iter()
        .filter(|(_, total)| **total == top)
        .map(|(player, _)| *player)
        .collect();

    if players.len() == 1 {
        MatchOutcome::Winner {
            player_id: players[0],
            total: top,
        }
    } else {
        MatchOutcome::Tie {
            players,
            total: top,
        }
    }
}

// =============================================================================
// ROUND SCORING
// =============================================================================

/// Committed result of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundScore {
    /// Round.
    pub round_id: RoundId,
    /// 1-based position.
    pub sequence: u32,
    /// Points per category per player.
    pub scores: BTreeMap<CategoryId, BTreeMap<PlayerId, u32>>,
    /// Cumulative room totals after this round.
    pub totals: BTreeMap<PlayerId, u32>,
}

/// Scores rounds against a store and a lexicon.
pub struct ScoringEngine {
    store: Arc<dyn GameStore>,
    lexicon: Arc<dyn Lexicon>,
    wait: Duration,
    poll: Duration,
}

impl ScoringEngine {
    /// Create a scoring engine. Losers of the lock wait up to `wait` for the
    /// winner to commit, checking every `poll`.
    pub fn new(
        store: Arc<dyn GameStore>,
        lexicon: Arc<dyn Lexicon>,
        wait: Duration,
        poll: Duration,
    ) -> Self {
        Self {
            store,
            lexicon,
            wait,
            poll,
        }
    }

    /// Read a round and check that it belongs to the room.
    pub async fn load_round(&self, room_id: RoomId, round_id: RoundId) -> Result<Round, ScoringError> {
        match self.store.round(round_id).await? {
            Some(round) if round.room_id == room_id => Ok(round),
            _ => Err(ScoringError::RoundNotFound(round_id)),
        }
    }

    /// Take the scoring lock. `true` means this caller owns the pass.
    pub async fn try_lock(&self, round: &Round) -> Result<bool, ScoringError> {
        let won = self
            .store
            .transition_round(round.id, &RoundStatus::LOCKABLE, RoundStatus::Scoring)
            .await?;

        if won {
            info!(round = %round.id.short(), sequence = round.sequence, "Scoring lock won");
        } else {
            debug!(round = %round.id.short(), "Scoring lock already taken");
        }
        Ok(won)
    }

    /// Compute, persist and release. Caller must hold the lock.
    #[instrument(skip(self, round, overrides), fields(round = %round.id.short()))]
    pub async fn score_locked(
        &self,
        round: &Round,
        overrides: &ScoringOverrides,
    ) -> Result<RoundScore, ScoringError> {
        let room = self
            .store
            .room(round.room_id)
            .await?
            .ok_or(ScoringError::RoomNotFound(round.room_id))?;

        // Members who joined after preparation get their zero slots now.
        let keys = slot_keys(round, room.members.iter().copied());
        let created = self.store.upsert_placeholders(&keys).await?;
        if created > 0 {
            debug!(created, "Placeholders reconciled before scoring");
        }

        let slots = self.store.slots_for_round(round.id).await?;
        let mut answers: BTreeMap<(PlayerId, CategoryId), &str> = BTreeMap::new();
        let mut players: BTreeSet<PlayerId> = room.members.clone();
        for slot in &slots {
            players.insert(slot.key.player_id);
            answers.insert((slot.key.player_id, slot.key.category_id), slot.answer.as_str());
        }

        let category_ids = round.category_ids();
        let accepted = self.lexicon.lookup(round.letter, &category_ids).await?;
        let empty = BTreeSet::new();

        let mut scored = Vec::with_capacity(players.len() * category_ids.len());
        let mut scores = BTreeMap::new();

        for category_id in &category_ids {
            let accepted = accepted.get(category_id).unwrap_or(&empty);
            let judged: Vec<Judged> = players
                .iter()
                .map(|player_id| {
                    let answer = answers.get(&(*player_id, *category_id)).copied().unwrap_or("");
                    let (normalized, validation) = judge(answer, round.letter, accepted);
                    Judged {
                        player_id: *player_id,
                        normalized,
                        validation,
                    }
                })
                .collect();

            let base = award_points(&judged);
            let mut per_player = BTreeMap::new();
            for j in judged {
                let base_points = base.get(&j.player_id).copied().unwrap_or(0);
                let points = overrides.apply(j.player_id, *category_id, base_points);
                per_player.insert(j.player_id, points);
                scored.push(ScoredSlot {
                    player_id: j.player_id,
                    category_id: *category_id,
                    normalized: j.normalized,
                    points,
                    validation: j.validation,
                });
            }
            scores.insert(*category_id, per_player);
        }

        if !self.store.write_scores(round.id, &scored).await? {
            warn!("Round left scoring before points were written");
            return Err(ScoringError::LockLost(round.id));
        }
        self.store
            .transition_round(round.id, &[RoundStatus::Scoring], RoundStatus::Done)
            .await?;

        let totals = self.store.room_totals(round.room_id).await?;
        info!(
            players = players.len(),
            slots = scored.len(),
            "Round scored"
        );

        Ok(RoundScore {
            round_id: round.id,
            sequence: round.sequence,
            scores,
            totals,
        })
    }

    /// Rebuild a round's result from persisted points, waiting for an
    /// in-flight pass to commit first.
    pub async fn reconstruct(&self, round: &Round) -> Result<RoundScore, ScoringError> {
        let deadline = tokio::time::Instant::now() + self.wait;
        loop {
            let status = self
                .store
                .round(round.id)
                .await?
                .map(|r| r.status)
                .ok_or(ScoringError::RoundNotFound(round.id))?;

            if status == RoundStatus::Done {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(round = %round.id.short(), ?status, "Gave up waiting for scoring pass");
                return Err(ScoringError::StillScoring(round.id));
            }
            tokio::time::sleep(self.poll).await;
        }

        let slots = self.store.slots_for_round(round.id).await?;
        let mut scores: BTreeMap<CategoryId, BTreeMap<PlayerId, u32>> = BTreeMap::new();
        for slot in slots {
            scores
                .entry(slot.key.category_id)
                .or_default()
                .insert(slot.key.player_id, slot.points);
        }
        let totals = self.store.room_totals(round.room_id).await?;

        Ok(RoundScore {
            round_id: round.id,
            sequence: round.sequence,
            scores,
            totals,
        })
    }
}

/// Every (player, category) key of a round for the given players.
pub fn slot_keys(round: &Round, players: impl IntoIterator<Item = PlayerId>) -> Vec<SlotKey> {
    players
        .into_iter()
        .flat_map(|player_id| {
            round.categories.iter().map(move |c| SlotKey {
                round_id: round.id,
                player_id,
                category_id: c.id,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Category, Room, RoomStatus};
    use crate::lexicon::MemoryLexicon;
    use crate::store::MemoryStore;
    use proptest::prelude::*;

    const ANIMAL: CategoryId = CategoryId(1);

    fn p(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: ScoringEngine,
        room_id: RoomId,
        round: Round,
    }

    async fn fixture(players: &[PlayerId]) -> Fixture {
        let mut lexicon = MemoryLexicon::new();
        lexicon.add_category(1, "Animal");
        for word in ["Baleia", "Borboleta", "Boi", "Gato"] {
            lexicon.add_word(ANIMAL, word);
        }

        let store = Arc::new(MemoryStore::new());
        let room_id = RoomId::random();
        let mut room = Room::new(room_id, "Sala", players[0]);
        for player in &players[1..] {
            room = room.with_member(*player);
        }
        room.status = RoomStatus::InProgress;
        store.insert_room(room).await;

        let round = Round {
            id: RoundId::random(),
            room_id,
            sequence: 1,
            letter: 'B',
            categories: vec![Category {
                id: ANIMAL,
                name: "Animal".into(),
            }],
            status: RoundStatus::InProgress,
            duration_secs: 20,
        };
        store.insert_rounds(&[round.clone()]).await.unwrap();

        let engine = ScoringEngine::new(
            store.clone(),
            Arc::new(lexicon),
            Duration::from_secs(1),
            Duration::from_millis(10),
        );
        Fixture {
            store,
            engine,
            room_id,
            round,
        }
    }

    struct Pass {
        score: RoundScore,
        lock_won: bool,
    }

    /// Lock, score and commit, or rebuild the committed result on a lost lock.
    async fn pass(
        engine: &ScoringEngine,
        room_id: RoomId,
        round_id: RoundId,
        overrides: &ScoringOverrides,
    ) -> Result<Pass, ScoringError> {
        let round = engine.load_round(room_id, round_id).await?;
        if !engine.try_lock(&round).await? {
            let score = engine.reconstruct(&round).await?;
            return Ok(Pass {
                score,
                lock_won: false,
            });
        }
        let score = engine.score_locked(&round, overrides).await?;
        Ok(Pass {
            score,
            lock_won: true,
        })
    }

    async fn answer(f: &Fixture, player: PlayerId, text: &str) {
        f.store
            .record_answers(f.round.id, player, &[(ANIMAL, text.to_string())])
            .await
            .unwrap();
    }

    fn judged(player: PlayerId, normalized: &str, validation: Validation) -> Judged {
        Judged {
            player_id: player,
            normalized: normalized.into(),
            validation,
        }
    }

    #[test]
    fn test_judge() {
        let accepted: BTreeSet<String> = ["boi".to_string()].into();
        assert_eq!(judge(" BÓI ", 'B', &accepted), ("boi".to_string(), Validation::Valid));
        assert_eq!(judge("gato", 'B', &accepted).1, Validation::Invalid);
        assert_eq!(judge("   ", 'B', &accepted).1, Validation::Empty);
        assert_eq!(judge("burro", 'B', &accepted).1, Validation::Invalid);
    }

    #[test]
    fn test_award_unique_and_shared() {
        let points = award_points(&[
            judged(p(1), "boi", Validation::Valid),
            judged(p(2), "boi", Validation::Valid),
            judged(p(3), "baleia", Validation::Valid),
            judged(p(4), "boi", Validation::Invalid),
        ]);
        assert_eq!(points[&p(1)], 5);
        assert_eq!(points[&p(2)], 5);
        assert_eq!(points[&p(3)], 10);
        assert_eq!(points[&p(4)], 0);
    }

    #[test]
    fn test_overrides_disregard_wins() {
        let mut overrides = ScoringOverrides::default();
        overrides.skipped.insert((p(1), ANIMAL));
        assert_eq!(overrides.apply(p(1), ANIMAL, 0), 10);
        assert_eq!(overrides.apply(p(1), ANIMAL, 5), 5);

        overrides.disregarded.insert((p(1), ANIMAL));
        assert_eq!(overrides.apply(p(1), ANIMAL, 0), 0);
        assert_eq!(overrides.apply(p(2), ANIMAL, 10), 10);
    }

    #[test]
    fn test_scenario_e_sole_winner() {
        // A: 10 + 5 + 0, B: 5 + 5 + 10
        let totals = BTreeMap::from([(p(1), 15), (p(2), 20)]);
        assert_eq!(
            determine_outcome(&totals),
            MatchOutcome::Winner {
                player_id: p(2),
                total: 20
            }
        );
    }

    #[test]
    fn test_scenario_f_tie() {
        let totals = BTreeMap::from([(p(1), 20), (p(2), 20), (p(3), 5)]);
        assert_eq!(
            determine_outcome(&totals),
            MatchOutcome::Tie {
                players: vec![p(1), p(2)],
                total: 20
            }
        );
        assert_eq!(determine_outcome(&BTreeMap::new()), MatchOutcome::NoPlayers);
    }

    proptest! {
        #[test]
        fn prop_category_points_sum(answers in proptest::collection::vec((0u8..6, any::<bool>()), 1..12)) {
            let judged: Vec<Judged> = answers
                .iter()
                .enumerate()
                .map(|(i, (word, valid))| Judged {
                    player_id: PlayerId::new([i as u8 + 1; 16]),
                    normalized: format!("word{}", word),
                    validation: if *valid { Validation::Valid } else { Validation::Invalid },
                })
                .collect();

            let mut holders: BTreeMap<&str, u32> = BTreeMap::new();
            for j in judged.iter().filter(|j| j.validation == Validation::Valid) {
                *holders.entry(j.normalized.as_str()).or_insert(0) += 1;
            }
            let unique = holders.values().filter(|n| **n == 1).count() as u32;
            let shared: u32 = holders.values().filter(|n| **n > 1).sum();
            let valid = judged.iter().filter(|j| j.validation == Validation::Valid).count() as u32;

            let total: u32 = award_points(&judged).values().sum();
            prop_assert_eq!(total, 10 * unique + 5 * shared);
            prop_assert!(total <= 10 * valid);
        }
    }

    #[tokio::test]
    async fn test_scenario_a_distinct_valid() {
        let f = fixture(&[p(1), p(2)]).await;
        answer(&f, p(1), "Baleia").await;
        answer(&f, p(2), "Borboleta").await;

        let out = pass(&f.engine, f.room_id, f.round.id, &ScoringOverrides::default())
            .await
            .unwrap();
        assert!(out.lock_won);
        assert_eq!(out.score.scores[&ANIMAL][&p(1)], 10);
        assert_eq!(out.score.scores[&ANIMAL][&p(2)], 10);
    }

    #[tokio::test]
    async fn test_scenario_b_duplicate() {
        let f = fixture(&[p(1), p(2)]).await;
        answer(&f, p(1), "Boi").await;
        answer(&f, p(2), " boi").await;

        let out = pass(&f.engine, f.room_id, f.round.id, &ScoringOverrides::default())
            .await
            .unwrap();
        assert_eq!(out.score.scores[&ANIMAL][&p(1)], 5);
        assert_eq!(out.score.scores[&ANIMAL][&p(2)], 5);
        assert_eq!(out.score.totals[&p(1)], 5);
    }

    #[tokio::test]
    async fn test_scenario_c_wrong_letter_and_empty() {
        let f = fixture(&[p(1), p(2)]).await;
        answer(&f, p(1), "Gato").await;
        answer(&f, p(2), "").await;

        let out = pass(&f.engine, f.room_id, f.round.id, &ScoringOverrides::default())
            .await
            .unwrap();
        assert_eq!(out.score.scores[&ANIMAL][&p(1)], 0);
        assert_eq!(out.score.scores[&ANIMAL][&p(2)], 0);

        let key = SlotKey {
            round_id: f.round.id,
            player_id: p(2),
            category_id: ANIMAL,
        };
        assert_eq!(f.store.slot(&key).await.unwrap().validation, Validation::Empty);
    }

    #[tokio::test]
    async fn test_scenario_d_skip_credits_zero_slot() {
        let f = fixture(&[p(1), p(2)]).await;
        answer(&f, p(1), "Gato").await;
        answer(&f, p(2), "Boi").await;

        let mut overrides = ScoringOverrides::default();
        overrides.skipped.insert((p(1), ANIMAL));
        let out = pass(&f.engine, f.room_id, f.round.id, &overrides)
            .await
            .unwrap();
        assert_eq!(out.score.scores[&ANIMAL][&p(1)], 10);
        assert_eq!(out.score.scores[&ANIMAL][&p(2)], 10);
    }

    #[tokio::test]
    async fn test_absent_member_gets_zero_slot() {
        let f = fixture(&[p(1), p(2), p(3)]).await;
        answer(&f, p(1), "Boi").await;

        let out = pass(&f.engine, f.room_id, f.round.id, &ScoringOverrides::default())
            .await
            .unwrap();
        assert_eq!(out.score.scores[&ANIMAL].len(), 3);
        assert_eq!(out.score.scores[&ANIMAL][&p(3)], 0);
        assert_eq!(out.score.totals[&p(3)], 0);
    }

    #[tokio::test]
    async fn test_second_caller_reconstructs() {
        let f = fixture(&[p(1), p(2)]).await;
        answer(&f, p(1), "Baleia").await;
        answer(&f, p(2), "Boi").await;

        let first = pass(&f.engine, f.room_id, f.round.id, &ScoringOverrides::default())
            .await
            .unwrap();

        // Overrides on the losing call must not change anything.
        let mut overrides = ScoringOverrides::default();
        overrides.disregarded.insert((p(1), ANIMAL));
        let second = pass(&f.engine, f.room_id, f.round.id, &overrides)
            .await
            .unwrap();

        assert!(first.lock_won);
        assert!(!second.lock_won);
        assert_eq!(first.score, second.score);
    }

    #[tokio::test]
    async fn test_concurrent_passes_commit_once() {
        let f = Arc::new(fixture(&[p(1), p(2)]).await);
        answer(&f, p(1), "Baleia").await;
        answer(&f, p(2), "Baleia").await;

        let a = {
            let f = f.clone();
            tokio::spawn(async move {
                pass(&f.engine, f.room_id, f.round.id, &ScoringOverrides::default())
                    .await
                    .unwrap()
            })
        };
        let b = {
            let f = f.clone();
            tokio::spawn(async move {
                pass(&f.engine, f.room_id, f.round.id, &ScoringOverrides::default())
                    .await
                    .unwrap()
            })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_ne!(a.lock_won, b.lock_won);
        assert_eq!(a.score.scores, b.score.scores);
        assert_eq!(a.score.totals[&p(1)], 5);
    }

    #[tokio::test]
    async fn test_round_of_other_room_rejected() {
        let f = fixture(&[p(1), p(2)]).await;
        let result = pass(&f.engine, RoomId::random(), f.round.id, &ScoringOverrides::default())
            .await;
        assert!(matches!(result, Err(ScoringError::RoundNotFound(_))));
    }
}
