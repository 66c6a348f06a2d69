//! # Tower Clash Server
//!
//! Two-player, turn-based tower battle server. Players are paired by game
//! mode, given a hand of troop cards and three towers each, and take turns
//! spending mana to attack the opponent's towers until the King Tower falls
//! or the clock runs out.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TOWER CLASH SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/            - Match rules (no I/O)                     │
//! │  ├── catalog.rs   - Troop/tower content and hand draws       │
//! │  ├── state.rs     - Player and match state                   │
//! │  ├── combat.rs    - Damage, targeting, healing               │
//! │  ├── timer.rs     - Match clock for timed games              │
//! │  └── mana.rs      - Background mana regeneration             │
//! │                                                              │
//! │  network/         - Connections and orchestration            │
//! │  ├── protocol.rs  - Typed text messages                      │
//! │  ├── connection.rs- Channel-backed client connection         │
//! │  ├── auth.rs      - Optional JWT login                       │
//! │  ├── registry.rs  - Player progression between matches       │
//! │  ├── matchmaking.rs - Per-mode single-slot pairing           │
//! │  ├── session.rs   - Turn loop, endings, rematch              │
//! │  └── server.rs    - WebSocket server and login flow          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Each session runs its turn loop in its own task. A mana ticker and (for
//! timed games) a clock watcher run beside it, sharing the session's match
//! state through one mutex. Whichever path ends the match flips the session's
//! ended flag, which stops the background tasks and any pending client read.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::catalog::{ContentSource, JsonContent, StaticContent, Tower, TowerKind, Troop};
pub use game::state::{MatchState, Player, Seat};
pub use network::matchmaking::{GameMode, Matchmaker};
pub use network::session::{start_session, SessionConfig, SessionContext, SessionHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Troops held in a hand at once.
pub const HAND_SIZE: usize = 3;

/// Mana cap.
pub const MAX_MANA: i32 = 10;

/// Mana at the start of every match.
pub const STARTING_MANA: i32 = 10;

/// Mana gained per regeneration tick.
pub const MANA_REGEN_RATE: i32 = 1;

/// Critical-hit tokens each player gets per match.
pub const CRIT_TOKENS_PER_MATCH: u32 = 5;

/// Hit points restored by a healer troop.
pub const HEAL_AMOUNT: i32 = 200;

/// Healing never raises a tower above this many hit points.
pub const HEAL_CAP: i32 = 1000;

/// Timed match length (seconds).
pub const MATCH_DURATION_SECS: u64 = 180;

/// How long a lone player waits in matchmaking (seconds).
pub const MATCHMAKING_TIMEOUT_SECS: u64 = 30;

/// Experience for destroying the King Tower.
pub const EXP_KING_WIN: u32 = 30;

/// Experience for losing the King Tower.
pub const EXP_KING_LOSS: u32 = 10;

/// Experience for winning on time (or by the opponent leaving).
pub const EXP_TIMEOUT_WIN: u32 = 20;

/// Experience for losing on time.
pub const EXP_TIMEOUT_LOSS: u32 = 5;

/// Experience each player gets for a draw.
pub const EXP_DRAW: u32 = 10;
