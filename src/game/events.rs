//! Engine Events
//!
//! Everything the engine tells the outside world goes through the
//! [`EventHub`] as a [`Dispatch`]: an event plus the audience it is meant
//! for. The transport layer subscribes and routes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::game::scoring::MatchOutcome;
use crate::game::state::{Category, CategoryId, PlayerId, RoomId, RoundId};

/// Default buffer of the event channel.
pub const EVENT_BUFFER: usize = 1024;

/// Outbound engine event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A round is open for answers.
    RoundPrepared {
        /// Round.
        round_id: RoundId,
        /// 1-based position.
        sequence: u32,
        /// Assigned letter.
        letter: char,
        /// Categories to answer.
        categories: Vec<Category>,
        /// Answer window.
        duration_secs: u32,
    },

    /// Countdown tick.
    RoundTick {
        /// Round.
        round_id: RoundId,
        /// Whole seconds left, rounded up.
        remaining_secs: u32,
    },

    /// Grace period begun; answers still land until scoring locks the round.
    RoundStopping {
        /// Round.
        round_id: RoundId,
        /// Player who asked to stop, `None` on expiry.
        by: Option<PlayerId>,
    },

    /// Round scored.
    RoundEnded {
        /// Round.
        round_id: RoundId,
        /// 1-based position.
        sequence: u32,
        /// Points per category per player.
        scores: BTreeMap<CategoryId, BTreeMap<PlayerId, u32>>,
        /// Cumulative match totals.
        totals: BTreeMap<PlayerId, u32>,
    },

    /// Final round scored, room closed.
    MatchEnded {
        /// Final totals.
        totals: BTreeMap<PlayerId, u32>,
        /// Winner or tie.
        outcome: MatchOutcome,
    },

    /// A power-up went through (to the actor).
    EffectAcknowledged {
        /// Round.
        round_id: RoundId,
        /// Canonical effect code.
        effect: String,
    },

    /// An opponent used an effect on you.
    EffectApplied {
        /// Round.
        round_id: RoundId,
        /// Canonical effect code.
        effect: String,
        /// Actor.
        from: PlayerId,
        /// Display length, for timed visual effects.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_secs: Option<u32>,
    },

    /// An opponent's answer, delivered after scoring to the player who paid
    /// for the reveal.
    AnswerRevealed {
        /// Round.
        round_id: RoundId,
        /// Whose answer.
        player_id: PlayerId,
        /// Category.
        category_id: CategoryId,
        /// Submitted text, empty if nothing was submitted.
        answer: String,
    },

    /// Your answers for the round were wiped by an opponent.
    AnswersCleared {
        /// Round.
        round_id: RoundId,
        /// Actor.
        by: PlayerId,
    },

    /// A room-wide failure (round preparation, match setup).
    RoomError {
        /// Human-readable reason.
        message: String,
    },

    /// A failure scoped to one player.
    PlayerError {
        /// Machine-readable reason.
        code: String,
        /// Human-readable reason.
        message: String,
    },
}

/// Who an event is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every subscriber of the room.
    Room,
    /// A single player of the room.
    Player(PlayerId),
}

/// An event addressed to an audience in a room.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Room.
    pub room_id: RoomId,
    /// Recipients.
    pub audience: Audience,
    /// Payload.
    pub event: EngineEvent,
}

/// Fan-out point for engine events.
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<Dispatch>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EVENT_BUFFER)
    }
}

impl EventHub {
    /// Create a hub buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every future dispatch.
    pub fn subscribe(&self) -> broadcast::Receiver<Dispatch> {
        self.sender.subscribe()
    }

    /// Send to the whole room.
    pub fn to_room(&self, room_id: RoomId, event: EngineEvent) {
        self.publish(Dispatch {
            room_id,
            audience: Audience::Room,
            event,
        });
    }

    /// Send to one player.
    pub fn to_player(&self, room_id: RoomId, player_id: PlayerId, event: EngineEvent) {
        self.publish(Dispatch {
            room_id,
            audience: Audience::Player(player_id),
            event,
        });
    }

    fn publish(&self, dispatch: Dispatch) {
        // No subscribers is fine; nobody is listening yet.
        let _ = self.sender.send(dispatch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tag() {
        let event = EngineEvent::RoundTick {
            round_id: RoundId::new([1; 16]),
            remaining_secs: 7,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"round_tick""#));
        assert!(json.contains(r#""remaining_secs":7"#));
    }

    #[test]
    fn test_round_ended_maps_serialize() {
        let player = PlayerId::new([2; 16]);
        let mut per_player = BTreeMap::new();
        per_player.insert(player, 10);
        let mut scores = BTreeMap::new();
        scores.insert(CategoryId(3), per_player);

        let event = EngineEvent::RoundEnded {
            round_id: RoundId::new([1; 16]),
            sequence: 1,
            scores,
            totals: BTreeMap::from([(player, 10)]),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[tokio::test]
    async fn test_hub_addresses_audience() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe();
        let room = RoomId::new([5; 16]);
        let player = PlayerId::new([6; 16]);

        hub.to_player(
            room,
            player,
            EngineEvent::RoomError {
                message: "x".into(),
            },
        );

        let dispatch = rx.recv().await.unwrap();
        assert_eq!(dispatch.room_id, room);
        assert_eq!(dispatch.audience, Audience::Player(player));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = EventHub::new(4);
        hub.to_room(
            RoomId::new([1; 16]),
            EngineEvent::RoomError {
                message: "nobody home".into(),
            },
        );
    }
}
