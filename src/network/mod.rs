//! Network Layer
//!
//! Connections, login, matchmaking and session orchestration. Match rules
//! live in `game/`; this layer only drives them.

pub mod auth;
pub mod connection;
pub mod matchmaking;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use auth::{resolve_username, validate_token, AuthConfig, AuthError, TokenClaims};
pub use connection::{ClientEnd, Connection, ConnectionError, Outbound};
pub use matchmaking::{
    select_game_mode, EnterOutcome, GameMode, Matchmaker, MatchmakingConfig, MatchmakingError,
};
pub use protocol::{Pdu, PduKind};
pub use registry::{PlayerRegistry, Profile, RegistryError};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{
    start_session, MatchEnding, MatchReport, SessionConfig, SessionContext, SessionHandle,
    SessionId,
};
