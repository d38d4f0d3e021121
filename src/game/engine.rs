//! Match Orchestrator
//!
//! Drives a room through its rounds:
//!
//! ```text
//! WAITING --start--> ROUND_ACTIVE --expiry | stop--> SCORING
//!                         ^                            |
//!                         +---- INTER_ROUND_DELAY <----+ next round exists
//!                                                      |
//!                                   MATCH_ENDED <------+ last round
//! ```
//!
//! The countdown and player stop requests both end up in [`MatchEngine::end_round`];
//! the scoring lock decides which of them scores, broadcasts and schedules
//! the next round. The other returns the committed result.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::rng::{derive_room_seed, SeededRng};
use crate::game::builder::{BuildError, RoundBuilder};
use crate::game::effects::{EffectError, EffectKind, EffectProcessor, EffectRequest};
use crate::game::events::{EngineEvent, EventHub};
use crate::game::rewards::{plan_rewards, LedgerError, RewardLedger};
use crate::game::runtime::{ActivationRecord, Reveal, RoomRuntimes};
use crate::game::scoring::{
    determine_outcome, slot_keys, MatchOutcome, RoundScore, ScoringEngine, ScoringError,
};
use crate::game::state::{
    CategoryId, MatchPhase, PlayerId, Room, RoomId, RoomStatus, Round, RoundId, RoundStatus,
};
use crate::game::timer::{ExpiryTask, RoundTimer};
use crate::lexicon::Lexicon;
use crate::store::{GameStore, StoreError};

/// Orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// Room does not exist.
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    /// Round does not exist in this room.
    #[error("round {0} not found")]
    RoundNotFound(RoundId),

    /// Only the room creator may start the match.
    #[error("only the room creator can start the match")]
    NotCreator,

    /// Room is not open.
    #[error("room is not open (status {0:?})")]
    NotOpen(RoomStatus),

    /// Too few members to start.
    #[error("at least {need} players are needed, room has {have}")]
    InsufficientPlayers {
        /// Current members.
        have: usize,
        /// Required members.
        need: usize,
    },

    /// Round is not accepting input.
    #[error("round {0} is not active")]
    RoundNotActive(RoundId),

    /// Caller is not in the room.
    #[error("player is not a member of the room")]
    NotAMember,

    /// Answer for a category outside the round.
    #[error("category {0} is not part of this round")]
    UnknownCategory(CategoryId),

    /// Placeholder materialization failed; the round was not announced.
    #[error("round preparation failed: {0}")]
    PreparationFailed(String),

    /// Round building failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Scoring failed.
    #[error(transparent)]
    Scoring(#[from] ScoringError),

    /// Power-up rejected.
    #[error(transparent)]
    Effect(#[from] EffectError),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reward ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl MatchError {
    /// Machine-readable reason.
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::RoomNotFound(_) => "room_not_found",
            MatchError::RoundNotFound(_) => "round_not_found",
            MatchError::NotCreator => "not_creator",
            MatchError::NotOpen(_) => "not_open",
            MatchError::InsufficientPlayers { .. } => "insufficient_players",
            MatchError::RoundNotActive(_) => "round_not_active",
            MatchError::NotAMember => "not_a_member",
            MatchError::UnknownCategory(_) => "unknown_category",
            MatchError::PreparationFailed(_) => "preparation_failed",
            MatchError::Build(_) => "insufficient_content",
            MatchError::Scoring(ScoringError::StillScoring(_)) => "scoring_pending",
            MatchError::Effect(e) => e.code(),
            MatchError::Scoring(_) | MatchError::Store(_) | MatchError::Ledger(_) => {
                "internal_error"
            }
        }
    }
}

/// Non-mutating view of a room for clients that reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Room.
    pub room_id: RoomId,
    /// Match phase.
    pub phase: MatchPhase,
    /// Round holding the active slot, if any.
    pub round: Option<Round>,
    /// Seconds left on its countdown, if running.
    pub remaining_secs: Option<u32>,
    /// The caller's own answers for that round.
    pub answers: BTreeMap<CategoryId, String>,
    /// Cumulative totals.
    pub totals: BTreeMap<PlayerId, u32>,
    /// Rounds in the match.
    pub round_count: usize,
}

/// Match engine for every room of this process.
pub struct MatchEngine {
    config: EngineConfig,
    store: Arc<dyn GameStore>,
    ledger: Arc<dyn RewardLedger>,
    events: EventHub,
    runtimes: Arc<RoomRuntimes>,
    timer: RoundTimer,
    scoring: ScoringEngine,
    effects: EffectProcessor,
    builder: RoundBuilder,
}

impl MatchEngine {
    /// Create an engine.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn GameStore>,
        lexicon: Arc<dyn Lexicon>,
        ledger: Arc<dyn RewardLedger>,
        events: EventHub,
    ) -> Arc<Self> {
        let runtimes = Arc::new(RoomRuntimes::new());
        let timer = RoundTimer::new(
            runtimes.clone(),
            events.clone(),
            config.tick_interval,
            config.grace_period,
        );
        let scoring = ScoringEngine::new(
            store.clone(),
            lexicon.clone(),
            config.scoring_wait,
            config.scoring_poll,
        );
        let effects = EffectProcessor::new(
            store.clone(),
            runtimes.clone(),
            events.clone(),
            config.blur_secs,
        );
        let builder = RoundBuilder::new(lexicon, config.categories_per_round);

        Arc::new(Self {
            config,
            store,
            ledger,
            events,
            runtimes,
            timer,
            scoring,
            effects,
            builder,
        })
    }

    /// Event hub the engine publishes to.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rooms currently running a match.
    pub async fn active_rooms(&self) -> usize {
        self.runtimes.active_rooms().await
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Start a room's match. Returns the first round.
    ///
    /// Preconditions are checked before anything is written, so a rejected
    /// start leaves the room untouched.
    #[instrument(skip(self), fields(room = %room_id.short()))]
    pub async fn start_match(
        self: &Arc<Self>,
        room_id: RoomId,
        caller: PlayerId,
    ) -> Result<Round, MatchError> {
        let room = self.load_room(room_id).await?;
        if room.creator != caller {
            return Err(MatchError::NotCreator);
        }
        if room.status != RoomStatus::Open {
            return Err(MatchError::NotOpen(room.status));
        }
        if room.members.len() < self.config.min_players {
            return Err(MatchError::InsufficientPlayers {
                have: room.members.len(),
                need: self.config.min_players,
            });
        }

        let seed = derive_room_seed(room_id.as_bytes(), Uuid::new_v4().as_u128());
        let mut rng = SeededRng::new(seed);
        let rounds = self
            .builder
            .build_rounds(
                room_id,
                self.config.round_count,
                self.config.round_duration_secs(),
                &mut rng,
            )
            .await?;

        if !self
            .store
            .transition_room(room_id, &[RoomStatus::Open], RoomStatus::InProgress)
            .await?
        {
            return Err(MatchError::NotOpen(RoomStatus::InProgress));
        }
        self.store.insert_rounds(&rounds).await?;

        info!(rounds = rounds.len(), players = room.members.len(), "Match started");

        let first = rounds[0].clone();
        self.activate_round(room_id, first.id).await?;
        Ok(first)
    }

    /// Record a player's answers. Returns how many were written.
    pub async fn submit_answers(
        &self,
        room_id: RoomId,
        round_id: RoundId,
        player_id: PlayerId,
        answers: Vec<(CategoryId, String)>,
    ) -> Result<usize, MatchError> {
        let round = self.load_round(room_id, round_id).await?;
        if round.status != RoundStatus::InProgress {
            return Err(MatchError::RoundNotActive(round_id));
        }
        let room = self.load_room(room_id).await?;
        if !room.is_member(&player_id) {
            return Err(MatchError::NotAMember);
        }
        if let Some((category_id, _)) = answers.iter().find(|(c, _)| !round.has_category(*c)) {
            return Err(MatchError::UnknownCategory(*category_id));
        }

        if !self
            .store
            .record_answers(round_id, player_id, &answers)
            .await?
        {
            return Err(MatchError::RoundNotActive(round_id));
        }
        debug!(player = %player_id.short(), count = answers.len(), "Answers recorded");
        Ok(answers.len())
    }

    /// A player calls "stop": the countdown is cancelled, the grace period
    /// runs, then the round is scored (or its committed result returned).
    #[instrument(skip(self), fields(room = %room_id.short(), player = %player_id.short()))]
    pub async fn request_stop(
        self: &Arc<Self>,
        room_id: RoomId,
        round_id: RoundId,
        player_id: PlayerId,
    ) -> Result<RoundScore, MatchError> {
        let round = self.load_round(room_id, round_id).await?;
        if round.status != RoundStatus::InProgress {
            return Err(MatchError::RoundNotActive(round_id));
        }
        let room = self.load_room(room_id).await?;
        if !room.is_member(&player_id) {
            return Err(MatchError::NotAMember);
        }

        if self.timer.begin_stop(room_id, round_id).await {
            info!("Stop requested");
            self.events.to_room(
                room_id,
                EngineEvent::RoundStopping {
                    round_id,
                    by: Some(player_id),
                },
            );
        } else {
            debug!("Round already stopping");
        }

        sleep(self.timer.grace()).await;
        self.end_round(room_id, round_id).await
    }

    /// Use a power-up on the open round.
    pub async fn use_power_up(&self, request: EffectRequest) -> Result<EffectKind, MatchError> {
        Ok(self.effects.apply(request).await?)
    }

    /// Spend a granted skip on a category.
    pub async fn skip_category(
        &self,
        room_id: RoomId,
        round_id: RoundId,
        player_id: PlayerId,
        category_id: CategoryId,
    ) -> Result<(), MatchError> {
        Ok(self
            .effects
            .exercise_skip(room_id, round_id, player_id, category_id)
            .await?)
    }

    /// Current state for a member. Reads only; never touches the countdown.
    pub async fn round_state(
        &self,
        room_id: RoomId,
        player_id: PlayerId,
    ) -> Result<RoundSnapshot, MatchError> {
        let room = self.load_room(room_id).await?;
        if !room.is_member(&player_id) {
            return Err(MatchError::NotAMember);
        }

        let phase = if room.status == RoomStatus::Closed {
            MatchPhase::MatchEnded
        } else {
            self.runtimes.phase(room_id).await
        };
        let rounds = self.store.rounds_for_room(room_id).await?;
        let round = rounds.iter().find(|r| r.status.is_active()).cloned();

        let mut answers = BTreeMap::new();
        let mut remaining_secs = None;
        if let Some(round) = &round {
            remaining_secs = self.timer.remaining(room_id, round.id).await;
            for slot in self.store.slots_for_round(round.id).await? {
                if slot.key.player_id == player_id {
                    answers.insert(slot.key.category_id, slot.answer);
                }
            }
        }

        Ok(RoundSnapshot {
            room_id,
            phase,
            round,
            remaining_secs,
            answers,
            totals: self.store.room_totals(room_id).await?,
            round_count: rounds.len(),
        })
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// End a round. The caller that wins the scoring lock scores, announces
    /// and moves the match on; any other caller gets the committed result.
    ///
    /// A failed scoring pass puts the round back in play so a later stop or
    /// the retry countdown can score it.
    pub async fn end_round(
        self: &Arc<Self>,
        room_id: RoomId,
        round_id: RoundId,
    ) -> Result<RoundScore, MatchError> {
        let round = self.scoring.load_round(room_id, round_id).await?;

        if !self.scoring.try_lock(&round).await? {
            return Ok(self.scoring.reconstruct(&round).await?);
        }

        self.timer.cancel(room_id, round_id).await;
        let activation = self.runtimes.take_activation(room_id, round_id).await;
        let overrides = activation
            .as_ref()
            .map(|a| a.overrides())
            .unwrap_or_default();

        let score = match self.scoring.score_locked(&round, &overrides).await {
            Ok(score) => score,
            Err(e) => {
                error!(room = %room_id.short(), round = %round_id.short(), error = %e, "Scoring failed");
                self.events.to_room(
                    room_id,
                    EngineEvent::RoomError {
                        message: format!("round {} could not be scored", round.sequence),
                    },
                );
                let record = activation.unwrap_or_else(|| ActivationRecord::new(round_id));
                self.reopen_round(&round, record).await;
                return Err(e.into());
            }
        };

        self.events.to_room(
            room_id,
            EngineEvent::RoundEnded {
                round_id,
                sequence: round.sequence,
                scores: score.scores.clone(),
                totals: score.totals.clone(),
            },
        );

        if let Some(record) = activation {
            self.deliver_reveals(room_id, round_id, record.reveals()).await;
        }

        if let Err(e) = self.move_on(room_id, &round, &score).await {
            error!(room = %room_id.short(), round = %round_id.short(), error = %e, "Match could not move on");
            self.events.to_room(
                room_id,
                EngineEvent::RoomError {
                    message: format!("match could not continue after round {}", round.sequence),
                },
            );
            return Err(e);
        }

        Ok(score)
    }

    /// Schedule the next round by sequence, or finish the match after the last.
    async fn move_on(
        self: &Arc<Self>,
        room_id: RoomId,
        round: &Round,
        score: &RoundScore,
    ) -> Result<(), MatchError> {
        let rounds = self.store.rounds_for_room(room_id).await?;
        match rounds.iter().find(|r| r.sequence == round.sequence + 1) {
            Some(next) => {
                self.runtimes
                    .set_phase(room_id, MatchPhase::InterRoundDelay)
                    .await;
                debug!(room = %room_id.short(), next = next.sequence, "Next round scheduled");
                tokio::spawn(self.clone().advance_task(room_id, next.id));
            }
            None => {
                self.finish_match(room_id, &score.totals).await?;
            }
        }
        Ok(())
    }

    /// Move a round whose scoring pass failed back to `in_progress` with its
    /// activation record. While automatic retries remain, a grace-length
    /// countdown scores it again.
    async fn reopen_round(self: &Arc<Self>, round: &Round, record: ActivationRecord) {
        let (room_id, round_id) = (round.room_id, round.id);
        match self
            .store
            .transition_round(round_id, &[RoundStatus::Scoring], RoundStatus::InProgress)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(round = %round_id.short(), "Round left scoring, not reopened");
                return;
            }
            Err(e) => {
                error!(round = %round_id.short(), error = %e, "Round could not be reopened");
                return;
            }
        }

        let failed = self.runtimes.restore_activation(room_id, record).await;
        if failed > self.config.scoring_retries {
            warn!(round = %round_id.short(), failed, "Scoring retries exhausted, waiting for a stop");
            return;
        }

        self.timer
            .start(
                room_id,
                round_id,
                self.config.grace_period,
                self.clone().expiry_task(room_id, round_id),
            )
            .await;
        info!(round = %round_id.short(), failed, "Round reopened for another scoring pass");
    }

    /// Prepare and announce a round.
    ///
    /// Re-checks that the round is still `ready` and that no other round of
    /// the room is active; if another path got there first this is a no-op.
    /// A failure is reported to the room and the round is not announced.
    pub async fn activate_round(
        self: &Arc<Self>,
        room_id: RoomId,
        round_id: RoundId,
    ) -> Result<(), MatchError> {
        match self.prepare_and_announce(room_id, round_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(room = %room_id.short(), round = %round_id.short(), error = %e, "Round activation failed");
                self.events.to_room(
                    room_id,
                    EngineEvent::RoomError {
                        message: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn prepare_and_announce(
        self: &Arc<Self>,
        room_id: RoomId,
        round_id: RoundId,
    ) -> Result<(), MatchError> {
        let round = self.load_round(room_id, round_id).await?;
        if round.status != RoundStatus::Ready {
            debug!(round = %round_id.short(), status = ?round.status, "Round already past ready");
            return Ok(());
        }

        let rounds = self.store.rounds_for_room(room_id).await?;
        if let Some(active) = rounds.iter().find(|r| r.id != round_id && r.status.is_active()) {
            warn!(active = active.sequence, "Another round is active, not activating");
            return Ok(());
        }

        let room = self.load_room(room_id).await?;
        let keys = slot_keys(&round, room.members.iter().copied());
        let created = self
            .store
            .upsert_placeholders(&keys)
            .await
            .map_err(|e| MatchError::PreparationFailed(e.to_string()))?;

        if !self
            .store
            .transition_round(round_id, &[RoundStatus::Ready], RoundStatus::InProgress)
            .await?
        {
            debug!(round = %round_id.short(), "Round activated elsewhere");
            return Ok(());
        }

        self.runtimes.open_round(room_id, round_id).await;
        self.events.to_room(
            room_id,
            EngineEvent::RoundPrepared {
                round_id,
                sequence: round.sequence,
                letter: round.letter,
                categories: round.categories.clone(),
                duration_secs: round.duration_secs,
            },
        );

        let duration = Duration::from_secs(u64::from(round.duration_secs));
        self.timer
            .start(
                room_id,
                round_id,
                duration,
                self.clone().expiry_task(room_id, round_id),
            )
            .await;

        info!(
            room = %room_id.short(),
            sequence = round.sequence,
            letter = %round.letter,
            placeholders = created,
            "Round prepared"
        );
        Ok(())
    }

    /// Close the room, announce the outcome and credit rewards. Only the
    /// caller that moves the room to `closed` does any of it.
    async fn finish_match(
        &self,
        room_id: RoomId,
        totals: &BTreeMap<PlayerId, u32>,
    ) -> Result<Option<MatchOutcome>, MatchError> {
        if !self
            .store
            .transition_room(room_id, &[RoomStatus::InProgress], RoomStatus::Closed)
            .await?
        {
            debug!(room = %room_id.short(), "Match already finished");
            return Ok(None);
        }

        let outcome = determine_outcome(totals);
        self.runtimes.close(room_id).await;
        self.events.to_room(
            room_id,
            EngineEvent::MatchEnded {
                totals: totals.clone(),
                outcome: outcome.clone(),
            },
        );
        info!(room = %room_id.short(), ?outcome, "Match ended");

        for credit in plan_rewards(room_id, totals, &outcome, &self.config.rewards) {
            match self.ledger.credit(&credit).await {
                Ok(true) => {
                    info!(player = %credit.player_id.short(), amount = credit.amount, "Reward issued")
                }
                Ok(false) => debug!(player = %credit.player_id.short(), "Reward already issued"),
                Err(e) => {
                    error!(player = %credit.player_id.short(), error = %e, "Reward issuance failed")
                }
            }
        }

        Ok(Some(outcome))
    }

    async fn deliver_reveals(&self, room_id: RoomId, round_id: RoundId, reveals: &[Reveal]) {
        if reveals.is_empty() {
            return;
        }
        let slots = match self.store.slots_for_round(round_id).await {
            Ok(slots) => slots,
            Err(e) => {
                warn!(error = %e, "Could not load answers for reveals");
                return;
            }
        };

        for reveal in reveals {
            let answer = slots
                .iter()
                .find(|s| s.key.player_id == reveal.target && s.key.category_id == reveal.category_id)
                .map(|s| s.answer.clone())
                .unwrap_or_default();
            self.events.to_player(
                room_id,
                reveal.actor,
                EngineEvent::AnswerRevealed {
                    round_id,
                    player_id: reveal.target,
                    category_id: reveal.category_id,
                    answer,
                },
            );
        }
    }

    fn expiry_task(self: Arc<Self>, room_id: RoomId, round_id: RoundId) -> ExpiryTask {
        Box::pin(async move {
            if let Err(e) = self.end_round(room_id, round_id).await {
                error!(room = %room_id.short(), round = %round_id.short(), error = %e, "Round end after expiry failed");
            }
        })
    }

    fn advance_task(self: Arc<Self>, room_id: RoomId, next: RoundId) -> ExpiryTask {
        Box::pin(async move {
            sleep(self.config.inter_round_delay).await;
            // Failures were already reported to the room.
            let _ = self.activate_round(room_id, next).await;
        })
    }

    async fn load_room(&self, room_id: RoomId) -> Result<Room, MatchError> {
        self.store
            .room(room_id)
            .await?
            .ok_or(MatchError::RoomNotFound(room_id))
    }

    async fn load_round(&self, room_id: RoomId, round_id: RoundId) -> Result<Round, MatchError> {
        self.store
            .round(round_id)
            .await?
            .filter(|r| r.room_id == room_id)
            .ok_or(MatchError::RoundNotFound(round_id))
    }
}
