//! Game Logic Module
//!
//! Match rules. Nothing here touches a socket; the network layer drives it.
//!
//! ## Module Structure
//!
//! - `catalog`: Troop and tower content, hand draws
//! - `state`: Player and match state, attack and ending rules
//! - `combat`: Damage, target legality, healing
//! - `timer`: Match clock
//! - `mana`: Background mana regeneration

pub mod catalog;
pub mod combat;
pub mod mana;
pub mod state;
pub mod timer;

// Re-export key types
pub use catalog::{ContentError, ContentSource, Tower, TowerKind, Troop};
pub use combat::{calculate_damage, legal_targets, HealOutcome};
pub use mana::{spawn_mana_regen, ManaConfig};
pub use state::{AttackError, EndReason, MatchOutcome, MatchPhase, MatchState, Player, Seat};
pub use timer::{GameTimer, TimerState};
