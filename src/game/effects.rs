//! Power-Up Effects
//!
//! Effects are requested by code, resolved through [`EFFECT_CODES`] into an
//! [`EffectKind`], checked against the live round, paid for with one unit of
//! the matching consumable and then applied.
//!
//! | Class              | Kinds                    | Applied                     |
//! |--------------------|--------------------------|-----------------------------|
//! | Immediate broadcast| blur, jumpscare          | event to the target now     |
//! | Self grant         | skip own category        | skip capability this round  |
//! | Deferred modifier  | reveal, disregard        | activation record, scoring  |
//! | Targeted mutation  | clear opponent answers   | target's slots now          |

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::game::events::{EngineEvent, EventHub};
use crate::game::runtime::{Reveal, RoomRuntimes};
use crate::game::state::{CategoryId, PlayerId, Room, RoomId, Round, RoundId, RoundStatus};
use crate::store::{GameStore, StoreError};

/// Effect kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// Blur the target's screen for a few seconds.
    BlurScreen,
    /// Jumpscare the target.
    Jumpscare,
    /// Grant the actor one skip of their own category.
    SkipOwnCategory,
    /// Show the actor the target's answer for a category after scoring.
    RevealOpponentAnswer,
    /// Force the target's category to zero points.
    DisregardOpponentWord,
    /// Wipe the target's answers for the round.
    ClearOpponentAnswers,
}

/// Code lookup, aliases included.
pub const EFFECT_CODES: &[(&str, EffectKind)] = &[
    ("BLUR_OPPONENT_SCREEN_5S", EffectKind::BlurScreen),
    ("JUMPSCARE", EffectKind::Jumpscare),
    ("SKIP_OWN_CATEGORY", EffectKind::SkipOwnCategory),
    ("SKIP_WORD", EffectKind::SkipOwnCategory),
    ("REVEAL_OPPONENT_ANSWER", EffectKind::RevealOpponentAnswer),
    ("DISREGARD_OPPONENT_WORD", EffectKind::DisregardOpponentWord),
    ("SKIP_OPPONENT_CATEGORY", EffectKind::DisregardOpponentWord),
    ("CLEAR_OPPONENT_ANSWERS", EffectKind::ClearOpponentAnswers),
];

impl EffectKind {
    /// Resolve a requested code. Case and surrounding whitespace are ignored.
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        EFFECT_CODES
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(code))
            .map(|(_, kind)| *kind)
    }

    /// Canonical code, also the inventory item consumed.
    pub fn code(self) -> &'static str {
        match self {
            EffectKind::BlurScreen => "BLUR_OPPONENT_SCREEN_5S",
            EffectKind::Jumpscare => "JUMPSCARE",
            EffectKind::SkipOwnCategory => "SKIP_OWN_CATEGORY",
            EffectKind::RevealOpponentAnswer => "REVEAL_OPPONENT_ANSWER",
            EffectKind::DisregardOpponentWord => "DISREGARD_OPPONENT_WORD",
            EffectKind::ClearOpponentAnswers => "CLEAR_OPPONENT_ANSWERS",
        }
    }

    /// Whether an opponent must be named.
    pub fn needs_target(self) -> bool {
        self != EffectKind::SkipOwnCategory
    }

    /// Whether a category must be named.
    pub fn needs_category(self) -> bool {
        matches!(
            self,
            EffectKind::RevealOpponentAnswer | EffectKind::DisregardOpponentWord
        )
    }
}

/// A resolved effect with everything needed to apply it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Client effect on the target.
    Broadcast {
        /// Kind (blur or jumpscare).
        kind: EffectKind,
        /// Target player.
        target: PlayerId,
        /// Display length, if timed.
        duration_secs: Option<u32>,
    },
    /// One skip for the actor.
    GrantSkip,
    /// Reveal after scoring.
    Reveal {
        /// Target player.
        target: PlayerId,
        /// Category.
        category_id: CategoryId,
    },
    /// Zero the target's category.
    Disregard {
        /// Target player.
        target: PlayerId,
        /// Category.
        category_id: CategoryId,
    },
    /// Wipe the target's answers.
    ClearAnswers {
        /// Target player.
        target: PlayerId,
    },
}

/// A request to use a power-up.
#[derive(Debug, Clone)]
pub struct EffectRequest {
    /// Room.
    pub room_id: RoomId,
    /// Round the effect is meant for.
    pub round_id: RoundId,
    /// Player using the power-up.
    pub actor: PlayerId,
    /// Effect code as sent by the client.
    pub code: String,
    /// Opponent, for targeted effects.
    pub target_player: Option<PlayerId>,
    /// Category, for category-scoped effects.
    pub target_category: Option<CategoryId>,
}

/// Effect rejections. All are reported to the actor only.
#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    /// Code not in the catalogue.
    #[error("unknown effect: {0}")]
    UnknownEffect(String),

    /// Round locked, finished or not this room's open round.
    #[error("round {0} is not accepting effects")]
    RoundNotActive(RoundId),

    /// Actor is not in the room.
    #[error("player is not a member of the room")]
    NotAMember,

    /// Target missing, not a member, or the actor themselves.
    #[error("invalid target player")]
    InvalidTarget,

    /// Category missing or not part of the round.
    #[error("invalid target category")]
    InvalidCategory,

    /// Actor holds no unit of the consumable.
    #[error("no {0} left in inventory")]
    NoStock(&'static str),

    /// A skip was exercised without a granted skip.
    #[error("no skip available")]
    CapabilityMissing,

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EffectError {
    /// Machine-readable reason.
    pub fn code(&self) -> &'static str {
        match self {
            EffectError::UnknownEffect(_) => "unknown_effect",
            EffectError::RoundNotActive(_) => "round_not_active",
            EffectError::NotAMember => "not_a_member",
            EffectError::InvalidTarget => "invalid_target",
            EffectError::InvalidCategory => "invalid_category",
            EffectError::NoStock(_) => "no_stock",
            EffectError::CapabilityMissing => "capability_missing",
            EffectError::Store(_) => "internal_error",
        }
    }
}

/// Build the effect for a kind, checking targets against the round.
pub fn resolve_effect(
    kind: EffectKind,
    request: &EffectRequest,
    room: &Room,
    round: &Round,
    blur_secs: u32,
) -> Result<Effect, EffectError> {
    let target = if kind.needs_target() {
        match request.target_player {
            Some(t) if t != request.actor && room.is_member(&t) => Some(t),
            _ => return Err(EffectError::InvalidTarget),
        }
    } else {
        None
    };

    let category_id = if kind.needs_category() {
        match request.target_category {
            Some(c) if round.has_category(c) => Some(c),
            _ => return Err(EffectError::InvalidCategory),
        }
    } else {
        None
    };

    let effect = match (kind, target, category_id) {
        (EffectKind::BlurScreen, Some(target), _) => Effect::Broadcast {
            kind,
            target,
            duration_secs: Some(blur_secs),
        },
        (EffectKind::Jumpscare, Some(target), _) => Effect::Broadcast {
            kind,
            target,
            duration_secs: None,
        },
        (EffectKind::SkipOwnCategory, _, _) => Effect::GrantSkip,
        (EffectKind::RevealOpponentAnswer, Some(target), Some(category_id)) => {
            Effect::Reveal { target, category_id }
        }
        (EffectKind::DisregardOpponentWord, Some(target), Some(category_id)) => {
            Effect::Disregard { target, category_id }
        }
        (EffectKind::ClearOpponentAnswers, Some(target), _) => Effect::ClearAnswers { target },
        _ => return Err(EffectError::InvalidTarget),
    };
    Ok(effect)
}

/// Applies power-ups to live rounds.
pub struct EffectProcessor {
    store: Arc<dyn GameStore>,
    runtimes: Arc<RoomRuntimes>,
    events: EventHub,
    blur_secs: u32,
}

impl EffectProcessor {
    /// Create a processor.
    pub fn new(
        store: Arc<dyn GameStore>,
        runtimes: Arc<RoomRuntimes>,
        events: EventHub,
        blur_secs: u32,
    ) -> Self {
        Self {
            store,
            runtimes,
            events,
            blur_secs,
        }
    }

    /// Use a power-up. Rejections also reach the actor as a `PlayerError`.
    pub async fn apply(&self, request: EffectRequest) -> Result<EffectKind, EffectError> {
        match self.try_apply(&request).await {
            Ok(kind) => {
                self.events.to_player(
                    request.room_id,
                    request.actor,
                    EngineEvent::EffectAcknowledged {
                        round_id: request.round_id,
                        effect: kind.code().to_string(),
                    },
                );
                Ok(kind)
            }
            Err(e) => {
                debug!(actor = %request.actor.short(), code = %request.code, error = %e, "Effect rejected");
                self.events.to_player(
                    request.room_id,
                    request.actor,
                    EngineEvent::PlayerError {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn try_apply(&self, request: &EffectRequest) -> Result<EffectKind, EffectError> {
        let kind = EffectKind::from_code(&request.code)
            .ok_or_else(|| EffectError::UnknownEffect(request.code.clone()))?;

        let round = self.live_round(request.room_id, request.round_id).await?;
        let room = self
            .store
            .room(request.room_id)
            .await?
            .ok_or(EffectError::RoundNotActive(request.round_id))?;
        if !room.is_member(&request.actor) {
            return Err(EffectError::NotAMember);
        }

        let effect = resolve_effect(kind, request, &room, &round, self.blur_secs)?;

        if !self.store.consume_item(request.actor, kind.code()).await? {
            return Err(EffectError::NoStock(kind.code()));
        }

        // Stock is only spent on an effect that took hold.
        if let Err(e) = self.execute(request, kind, effect).await {
            if let Err(refund) = self.store.restore_item(request.actor, kind.code()).await {
                error!(
                    actor = %request.actor.short(),
                    effect = kind.code(),
                    error = %refund,
                    "Failed to restore consumed unit"
                );
            }
            return Err(e);
        }

        info!(
            room = %request.room_id.short(),
            actor = %request.actor.short(),
            effect = kind.code(),
            "Effect applied"
        );
        Ok(kind)
    }

    async fn execute(
        &self,
        request: &EffectRequest,
        kind: EffectKind,
        effect: Effect,
    ) -> Result<(), EffectError> {
        let room_id = request.room_id;
        let round_id = request.round_id;
        let actor = request.actor;

        match effect {
            Effect::Broadcast {
                target,
                duration_secs,
                ..
            } => {
                self.events.to_player(
                    room_id,
                    target,
                    EngineEvent::EffectApplied {
                        round_id,
                        effect: kind.code().to_string(),
                        from: actor,
                        duration_secs,
                    },
                );
            }
            Effect::GrantSkip => {
                self.runtimes
                    .with_activation(room_id, round_id, |a| a.grant_skip(actor))
                    .await
                    .ok_or(EffectError::RoundNotActive(round_id))?;
            }
            Effect::Reveal {
                target,
                category_id,
            } => {
                self.runtimes
                    .with_activation(room_id, round_id, |a| {
                        a.push_reveal(Reveal {
                            actor,
                            target,
                            category_id,
                        })
                    })
                    .await
                    .ok_or(EffectError::RoundNotActive(round_id))?;
            }
            Effect::Disregard {
                target,
                category_id,
            } => {
                self.runtimes
                    .with_activation(room_id, round_id, |a| {
                        a.mark_disregarded(target, category_id)
                    })
                    .await
                    .ok_or(EffectError::RoundNotActive(round_id))?;
                self.events.to_player(
                    room_id,
                    target,
                    EngineEvent::EffectApplied {
                        round_id,
                        effect: kind.code().to_string(),
                        from: actor,
                        duration_secs: None,
                    },
                );
            }
            Effect::ClearAnswers { target } => {
                let cleared = self
                    .store
                    .clear_answers(round_id, target)
                    .await?
                    .ok_or(EffectError::RoundNotActive(round_id))?;
                debug!(target = %target.short(), cleared, "Answers cleared");
                self.events.to_player(
                    room_id,
                    target,
                    EngineEvent::AnswersCleared { round_id, by: actor },
                );
            }
        }
        Ok(())
    }

    /// Spend a granted skip on one of the actor's categories.
    pub async fn exercise_skip(
        &self,
        room_id: RoomId,
        round_id: RoundId,
        player_id: PlayerId,
        category_id: CategoryId,
    ) -> Result<(), EffectError> {
        let round = self.live_round(room_id, round_id).await?;
        if !round.has_category(category_id) {
            return Err(EffectError::InvalidCategory);
        }

        let exercised = self
            .runtimes
            .with_activation(room_id, round_id, |a| a.exercise_skip(player_id, category_id))
            .await
            .ok_or(EffectError::RoundNotActive(round_id))?;

        if !exercised {
            warn!(player = %player_id.short(), "Skip without a granted capability");
            return Err(EffectError::CapabilityMissing);
        }
        info!(player = %player_id.short(), category = %category_id, "Category skipped");
        Ok(())
    }

    /// The round if it is `in_progress` and open in this room's runtime.
    async fn live_round(&self, room_id: RoomId, round_id: RoundId) -> Result<Round, EffectError> {
        let round = self
            .store
            .round(round_id)
            .await?
            .filter(|r| r.room_id == room_id && r.status == RoundStatus::InProgress)
            .ok_or(EffectError::RoundNotActive(round_id))?;

        if !self.runtimes.is_round_open(room_id, round_id).await {
            return Err(EffectError::RoundNotActive(round_id));
        }
        Ok(round)
    }
}
