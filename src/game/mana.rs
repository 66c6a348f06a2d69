//! Mana Regeneration
//!
//! Background ticker that adds mana to both players of a match until it ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::trace;

use crate::game::state::MatchState;
use crate::{MANA_REGEN_RATE, MAX_MANA};

/// Regeneration settings.
#[derive(Clone, Copy, Debug)]
pub struct ManaConfig {
    /// Time between ticks.
    pub tick: Duration,
    /// Mana added per tick.
    pub rate: i32,
    /// Mana cap.
    pub max: i32,
}

impl Default for ManaConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            rate: MANA_REGEN_RATE,
            max: MAX_MANA,
        }
    }
}

/// Spawn the ticker. It exits on the first tick after the match is over.
pub fn spawn_mana_regen(state: Arc<Mutex<MatchState>>, config: ManaConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + config.tick, config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let mut state = state.lock().await;
            if state.is_over() {
                break;
            }
            state.regenerate_mana(config.rate, config.max);
        }

        trace!("mana ticker stopped");
    })
}
