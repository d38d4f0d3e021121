//! Network Layer
//!
//! WebSocket gateway for real-time clients.
//! Match rules live in `game/`; this layer only authenticates, routes
//! commands to the engine and forwards its events.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{resolve_identity, validate_token, IdentityConfig, IdentityError, TokenClaims};
pub use protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
