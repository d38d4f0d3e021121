//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::game::effects::EffectError;
use crate::game::engine::{MatchError, RoundSnapshot};
use crate::game::events::EngineEvent;
use crate::game::state::{CategoryId, PlayerId, RoomId, RoundId};
use crate::network::auth::IdentityError;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with the server.
    Auth(AuthRequest),

    /// Receive the events of a room.
    Subscribe {
        /// Room.
        room_id: RoomId,
    },

    /// Start the room's match (creator only).
    StartMatch {
        /// Room.
        room_id: RoomId,
    },

    /// Bulk answers for the open round.
    SubmitAnswers {
        /// Room.
        room_id: RoomId,
        /// Round.
        round_id: RoundId,
        /// Answers keyed by category.
        answers: Vec<AnswerEntry>,
    },

    /// Call "stop" on the open round.
    StopRound {
        /// Room.
        room_id: RoomId,
        /// Round.
        round_id: RoundId,
    },

    /// Use a power-up.
    UsePowerUp {
        /// Room.
        room_id: RoomId,
        /// Round.
        round_id: RoundId,
        /// Effect code.
        code: String,
        /// Opponent, for targeted effects.
        #[serde(default)]
        target_player: Option<PlayerId>,
        /// Category, for category-scoped effects.
        #[serde(default)]
        target_category: Option<CategoryId>,
    },

    /// Spend a granted skip.
    SkipCategory {
        /// Room.
        room_id: RoomId,
        /// Round.
        round_id: RoundId,
        /// Category to skip.
        category_id: CategoryId,
    },

    /// Request current round state (for reconnection).
    SyncRequest {
        /// Room.
        room_id: RoomId,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },

    /// Stop receiving room events.
    Leave,
}

/// Authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Authentication token (JWT).
    #[serde(default)]
    pub token: String,
    /// Raw player id, only honoured when insecure ids are allowed.
    #[serde(default)]
    pub player_id: Option<String>,
    /// Client version for compatibility check.
    #[serde(default)]
    pub client_version: String,
}

/// One answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEntry {
    /// Category.
    pub category_id: CategoryId,
    /// Raw text.
    pub answer: String,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Subscription confirmed.
    Subscribed {
        /// Room.
        room_id: RoomId,
    },

    /// Command accepted; its effects arrive as events.
    Ack {
        /// Command name.
        command: String,
    },

    /// Answers stored.
    AnswersAccepted {
        /// Round.
        round_id: RoundId,
        /// Answers written.
        count: usize,
    },

    /// Reply to a sync request.
    RoundState(RoundSnapshot),

    /// Engine event for a subscribed room.
    Event {
        /// Room.
        room_id: RoomId,
        /// Payload.
        event: EngineEvent,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (ms since epoch).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether authentication succeeded.
    pub success: bool,
    /// Resolved player id.
    pub player_id: Option<PlayerId>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Build an error reply.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// Token expired.
    TokenExpired,
    /// Invalid token.
    InvalidToken,
    /// Invalid input.
    InvalidInput,
    /// Room not found.
    RoomNotFound,
    /// Round not found.
    RoundNotFound,
    /// Only the creator may start.
    NotCreator,
    /// Room not open.
    NotOpen,
    /// Not enough players.
    InsufficientPlayers,
    /// Lexicon cannot fill the match.
    InsufficientContent,
    /// Round not accepting input.
    RoundNotActive,
    /// Not a member of the room.
    NotAMember,
    /// Category not in the round.
    UnknownCategory,
    /// Effect code unknown.
    UnknownEffect,
    /// Bad effect target.
    InvalidTarget,
    /// Bad effect category.
    InvalidCategory,
    /// Consumable out of stock.
    NoStock,
    /// No skip granted.
    CapabilityMissing,
    /// Round could not be prepared.
    PreparationFailed,
    /// Round still being scored.
    ScoringPending,
    /// Server overloaded.
    ServerOverloaded,
    /// Version mismatch.
    VersionMismatch,
    /// Internal error.
    InternalError,
}

impl From<&EffectError> for ErrorCode {
    fn from(err: &EffectError) -> Self {
        match err {
            EffectError::UnknownEffect(_) => ErrorCode::UnknownEffect,
            EffectError::RoundNotActive(_) => ErrorCode::RoundNotActive,
            EffectError::NotAMember => ErrorCode::NotAMember,
            EffectError::InvalidTarget => ErrorCode::InvalidTarget,
            EffectError::InvalidCategory => ErrorCode::InvalidCategory,
            EffectError::NoStock(_) => ErrorCode::NoStock,
            EffectError::CapabilityMissing => ErrorCode::CapabilityMissing,
            EffectError::Store(_) => ErrorCode::InternalError,
        }
    }
}

impl From<&MatchError> for ErrorCode {
    fn from(err: &MatchError) -> Self {
        use crate::game::scoring::ScoringError;
        match err {
            MatchError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            MatchError::RoundNotFound(_) => ErrorCode::RoundNotFound,
            MatchError::NotCreator => ErrorCode::NotCreator,
            MatchError::NotOpen(_) => ErrorCode::NotOpen,
            MatchError::InsufficientPlayers { .. } => ErrorCode::InsufficientPlayers,
            MatchError::RoundNotActive(_) => ErrorCode::RoundNotActive,
            MatchError::NotAMember => ErrorCode::NotAMember,
            MatchError::UnknownCategory(_) => ErrorCode::UnknownCategory,
            MatchError::PreparationFailed(_) => ErrorCode::PreparationFailed,
            MatchError::Build(_) => ErrorCode::InsufficientContent,
            MatchError::Scoring(ScoringError::StillScoring(_)) => ErrorCode::ScoringPending,
            MatchError::Effect(e) => ErrorCode::from(e),
            MatchError::Scoring(_) | MatchError::Store(_) | MatchError::Ledger(_) => {
                ErrorCode::InternalError
            }
        }
    }
}

impl From<&MatchError> for ServerError {
    fn from(err: &MatchError) -> Self {
        // Backend details stay in the logs.
        let message = match ErrorCode::from(err) {
            ErrorCode::InternalError => "internal error".to_string(),
            _ => err.to_string(),
        };
        Self {
            code: err.into(),
            message,
        }
    }
}

impl From<&IdentityError> for ServerError {
    fn from(err: &IdentityError) -> Self {
        let code = match err {
            IdentityError::Expired => ErrorCode::TokenExpired,
            IdentityError::InvalidFormat | IdentityError::InvalidSignature => {
                ErrorCode::InvalidToken
            }
            _ => ErrorCode::AuthFailed,
        };
        Self::new(code, err.to_string())
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_answers_from_client_json() {
        let room = RoomId::new([1; 16]);
        let round = RoundId::new([2; 16]);
        let json = format!(
            r#"{{"type":"submit_answers","room_id":"{}","round_id":"{}","answers":[{{"category_id":3,"answer":"Baleia"}}]}}"#,
            room, round
        );

        let parsed = ClientMessage::from_json(&json).unwrap();
        if let ClientMessage::SubmitAnswers {
            room_id,
            round_id,
            answers,
        } = parsed
        {
            assert_eq!(room_id, room);
            assert_eq!(round_id, round);
            assert_eq!(answers[0].category_id, CategoryId(3));
            assert_eq!(answers[0].answer, "Baleia");
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_power_up_optional_targets() {
        let json = format!(
            r#"{{"type":"use_power_up","room_id":"{}","round_id":"{}","code":"SKIP_WORD"}}"#,
            RoomId::new([1; 16]),
            RoundId::new([2; 16])
        );
        let parsed = ClientMessage::from_json(&json).unwrap();
        assert!(matches!(
            parsed,
            ClientMessage::UsePowerUp {
                target_player: None,
                target_category: None,
                ..
            }
        ));
    }

    #[test]
    fn test_event_nests_engine_tag() {
        let msg = ServerMessage::Event {
            room_id: RoomId::new([1; 16]),
            event: EngineEvent::RoundTick {
                round_id: RoundId::new([2; 16]),
                remaining_secs: 4,
            },
        };

        let json = msg.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["type"], "round_tick");

        let parsed = ServerMessage::from_json(&json).unwrap();
        assert!(matches!(parsed, ServerMessage::Event { .. }));
    }

    #[test]
    fn test_error_code_serialization() {
        let error = ServerError::from(&MatchError::NotCreator);
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("not_creator"));
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = MatchError::Store(crate::store::StoreError::Backend("db password wrong".into()));
        let error = ServerError::from(&err);
        assert_eq!(error.code, ErrorCode::InternalError);
        assert!(!error.message.contains("password"));
    }

    #[test]
    fn test_effect_codes_match_engine_codes() {
        let err = MatchError::Effect(EffectError::NoStock("JUMPSCARE"));
        assert_eq!(ErrorCode::from(&err), ErrorCode::NoStock);
        let code = serde_json::to_value(ErrorCode::from(&err)).unwrap();
        assert_eq!(code, err.code());
    }
}
