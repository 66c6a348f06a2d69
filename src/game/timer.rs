//! Match Clock
//!
//! Elapsed-time tracker for timed matches. Uses `tokio::time::Instant` so a
//! paused test clock drives it.

use std::time::Duration;
use tokio::time::Instant;

use crate::MATCH_DURATION_SECS;

/// Timer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// `start` not called yet.
    NotStarted,
    /// Counting down.
    Running,
    /// Duration elapsed.
    Expired,
}

/// Countdown for one match.
#[derive(Debug, Clone, Copy)]
pub struct GameTimer {
    started_at: Option<Instant>,
    duration: Duration,
}

impl Default for GameTimer {
    fn default() -> Self {
        Self::new(Duration::from_secs(MATCH_DURATION_SECS))
    }
}

impl GameTimer {
    /// Create a stopped timer.
    pub fn new(duration: Duration) -> Self {
        Self {
            started_at: None,
            duration,
        }
    }

    /// Record the start instant. Later calls keep the first instant.
    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TimerState {
        match self.started_at {
            None => TimerState::NotStarted,
            Some(start) if start.elapsed() >= self.duration => TimerState::Expired,
            Some(_) => TimerState::Running,
        }
    }

    /// Has the match run its full length?
    pub fn is_time_up(&self) -> bool {
        self.state() == TimerState::Expired
    }

    /// Time left, zero once expired.
    pub fn time_remaining(&self) -> Duration {
        match self.started_at {
            None => self.duration,
            Some(start) => self.duration.saturating_sub(start.elapsed()),
        }
    }

    /// Time left as `MM:SS`, counting a started second as whole.
    pub fn formatted_time_remaining(&self) -> String {
        let remaining = self.time_remaining();
        let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}
