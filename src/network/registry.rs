//! Player Registry
//!
//! In-memory store of player progression between matches. A username can be
//! checked out by one connection at a time.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::game::state::Player;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The username is in use by another connection.
    #[error("{0} is already logged in")]
    AlreadyOnline(String),
    /// Blank username.
    #[error("username must not be empty")]
    EmptyUsername,
}

/// Stored progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    /// Level.
    pub level: u32,
    /// Experience toward the next level.
    pub exp: u32,
}

#[derive(Debug)]
struct Entry {
    profile: Profile,
    online: bool,
}

/// Player progression store.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: RwLock<HashMap<String, Entry>>,
}

impl PlayerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `username` for a connection, creating a level-1 profile on
    /// first sight.
    pub async fn check_out(&self, username: &str) -> Result<Player, RegistryError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(RegistryError::EmptyUsername);
        }

        let mut players = self.players.write().await;
        let entry = players.entry(username.to_string()).or_insert_with(|| {
            debug!(username, "new player");
            Entry {
                profile: Profile { level: 1, exp: 0 },
                online: false,
            }
        });

        if entry.online {
            return Err(RegistryError::AlreadyOnline(username.to_string()));
        }
        entry.online = true;

        Ok(Player::with_progress(username, entry.profile.level, entry.profile.exp))
    }

    /// Store a player's progression. The player stays checked out.
    pub async fn record(&self, player: &Player) {
        let mut players = self.players.write().await;
        let entry = players.entry(player.username.clone()).or_insert(Entry {
            profile: Profile { level: 1, exp: 0 },
            online: true,
        });
        entry.profile = Profile {
            level: player.level,
            exp: player.exp,
        };
    }

    /// Store progression and release the username.
    pub async fn check_in(&self, player: &Player) {
        self.record(player).await;
        self.release(&player.username).await;
    }

    /// Release a username without touching its progression.
    pub async fn release(&self, username: &str) {
        if let Some(entry) = self.players.write().await.get_mut(username) {
            entry.online = false;
        }
    }

    /// Stored progression for a username.
    pub async fn profile(&self, username: &str) -> Option<Profile> {
        self.players.read().await.get(username).map(|e| e.profile)
    }

    /// Number of checked-out usernames.
    pub async fn online_count(&self) -> usize {
        self.players.read().await.values().filter(|e| e.online).count()
    }
}
