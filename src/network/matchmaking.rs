//! Matchmaking
//!
//! One waiting slot per game mode. The second player to enter a mode is
//! paired with the one waiting there and a session starts. A lone player
//! waits a bounded time and is handed back on timeout.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::game::state::Player;
use crate::network::connection::{Connection, ConnectionError};
use crate::network::protocol::{numbered, PduKind};
use crate::network::session::{start_session, SessionContext, SessionHandle, SessionId};
use crate::{MATCHMAKING_TIMEOUT_SECS, MATCH_DURATION_SECS};

/// Game modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameMode {
    /// Three-minute clock; most towers destroyed wins on time.
    Timed,
    /// Played until a King Tower falls.
    Untimed,
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameMode::Timed => f.write_str("timed"),
            GameMode::Untimed => f.write_str("untimed"),
        }
    }
}

/// Ask a client for a game mode until they answer 1 or 2.
pub async fn select_game_mode(conn: &mut Connection) -> Result<GameMode, ConnectionError> {
    let timed = format!("Timed ({} minutes)", MATCH_DURATION_SECS / 60);
    let menu = format!("Select game mode:\n{}", numbered([timed.as_str(), "Untimed"]));
    loop {
        conn.send(PduKind::Menu, menu.as_str()).await?;
        match conn.recv().await?.text() {
            "1" => return Ok(GameMode::Timed),
            "2" => return Ok(GameMode::Untimed),
            _ => {
                conn.send(PduKind::Error, "Invalid choice. Please enter 1 or 2.")
                    .await?
            }
        }
    }
}

/// Matchmaking settings.
#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    /// How long a lone player waits before being handed back.
    pub wait_timeout: Duration,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(MATCHMAKING_TIMEOUT_SECS),
        }
    }
}

/// Matchmaking errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchmakingError {
    /// The waiting entry was taken but no session was reported.
    #[error("matchmaking for {username} ended without a session")]
    Abandoned {
        /// Waiting player.
        username: String,
    },
}

/// Result of entering matchmaking.
#[derive(Debug)]
pub enum EnterOutcome {
    /// The caller completed a pair and started the session.
    Paired(SessionHandle),
    /// The caller was waiting and another player started the session.
    Matched(SessionId),
    /// Nobody arrived in time. The player and connection are handed back.
    TimedOut {
        /// Waiting player.
        player: Player,
        /// Their connection.
        conn: Connection,
    },
}

struct WaitingEntry {
    ticket: u64,
    player: Player,
    conn: Connection,
    matched: oneshot::Sender<SessionId>,
}

#[derive(Default)]
struct Slots {
    timed: Option<WaitingEntry>,
    untimed: Option<WaitingEntry>,
}

impl Slots {
    fn slot(&mut self, mode: GameMode) -> &mut Option<WaitingEntry> {
        match mode {
            GameMode::Timed => &mut self.timed,
            GameMode::Untimed => &mut self.untimed,
        }
    }
}

/// Pairs players by game mode.
pub struct Matchmaker {
    slots: Mutex<Slots>,
    ctx: SessionContext,
    config: MatchmakingConfig,
    next_ticket: AtomicU64,
}

impl Matchmaker {
    /// Create a matchmaker that starts sessions with `ctx`.
    pub fn new(ctx: SessionContext, config: MatchmakingConfig) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            ctx,
            config,
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Session collaborators.
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Enter matchmaking for `mode`.
    ///
    /// Pairs immediately with a waiting player (who moves first), or waits
    /// in the mode's slot for up to the configured timeout.
    pub async fn enter(
        &self,
        player: Player,
        mut conn: Connection,
        mode: GameMode,
    ) -> Result<EnterOutcome, MatchmakingError> {
        let mut slots = self.slots.lock().await;

        if let Some(waiting) = slots.slot(mode).take() {
            drop(slots);

            let WaitingEntry {
                player: first,
                conn: mut first_conn,
                matched,
                ..
            } = waiting;
            info!(p1 = %first.username, p2 = %player.username, %mode, "players paired");

            for c in [&mut first_conn, &mut conn] {
                c.discard_pending();
                let _ = c.send(PduKind::Info, "Opponent found! Starting game...").await;
            }

            let handle = start_session(&self.ctx, [first, player], [first_conn, conn], mode);
            let _ = matched.send(handle.id());
            return Ok(EnterOutcome::Paired(handle));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let username = player.username.clone();
        let outbound = conn.outbound();
        let (matched, mut rx) = oneshot::channel();
        *slots.slot(mode) = Some(WaitingEntry {
            ticket,
            player,
            conn,
            matched,
        });
        drop(slots);

        debug!(%username, %mode, "waiting for opponent");
        let _ = outbound.send(PduKind::Info, "Waiting for an opponent...").await;

        match timeout(self.config.wait_timeout, &mut rx).await {
            Ok(Ok(id)) => return Ok(EnterOutcome::Matched(id)),
            Ok(Err(_)) => return Err(MatchmakingError::Abandoned { username }),
            Err(_) => {}
        }

        // Only reclaim our own entry; if it was taken meanwhile, the pairing
        // side is about to signal.
        let reclaimed = {
            let mut slots = self.slots.lock().await;
            let slot = slots.slot(mode);
            if slot.as_ref().is_some_and(|entry| entry.ticket == ticket) {
                slot.take()
            } else {
                None
            }
        };

        match reclaimed {
            Some(entry) => {
                info!(%username, %mode, "matchmaking timed out");
                let _ = entry
                    .conn
                    .send(PduKind::Info, "No opponent found. Please choose a mode again.")
                    .await;
                Ok(EnterOutcome::TimedOut {
                    player: entry.player,
                    conn: entry.conn,
                })
            }
            None => rx
                .await
                .map(EnterOutcome::Matched)
                .map_err(|_| MatchmakingError::Abandoned { username }),
        }
    }

    /// Is someone waiting for `mode`?
    pub async fn is_waiting(&self, mode: GameMode) -> bool {
        self.slots.lock().await.slot(mode).is_some()
    }

    /// Number of waiting players across both modes.
    pub async fn waiting_count(&self) -> usize {
        let slots = self.slots.lock().await;
        usize::from(slots.timed.is_some()) + usize::from(slots.untimed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::StaticContent;
    use crate::network::connection::ClientEnd;
    use crate::network::registry::PlayerRegistry;
    use std::sync::Arc;

    fn matchmaker() -> Arc<Matchmaker> {
        let ctx = SessionContext::new(
            Arc::new(StaticContent::standard()),
            Arc::new(PlayerRegistry::new()),
        );
        Arc::new(Matchmaker::new(ctx, MatchmakingConfig::default()))
    }

    fn join(name: &str) -> (Player, Connection, ClientEnd) {
        let (conn, client) = Connection::pair(None);
        (Player::new(name), conn, client)
    }

    async fn until_waiting(mm: &Matchmaker, mode: GameMode) {
        while !mm.is_waiting(mode).await {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_second_entrant_pairs() {
        let mm = matchmaker();
        let (alice, alice_conn, mut alice_client) = join("alice");
        let (bob, bob_conn, mut bob_client) = join("bob");

        let waiter = {
            let mm = mm.clone();
            tokio::spawn(async move { mm.enter(alice, alice_conn, GameMode::Timed).await })
        };
        until_waiting(&mm, GameMode::Timed).await;

        let outcome = mm.enter(bob, bob_conn, GameMode::Timed).await.unwrap();
        let EnterOutcome::Paired(handle) = outcome else {
            panic!("expected the second entrant to pair");
        };

        match waiter.await.unwrap().unwrap() {
            EnterOutcome::Matched(id) => assert_eq!(id, handle.id()),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(mm.waiting_count().await, 0);

        let waiting = alice_client.next().await.unwrap();
        assert!(waiting.payload.contains("Waiting for an opponent"));
        for client in [&mut alice_client, &mut bob_client] {
            let found = client.next().await.unwrap();
            assert!(found.payload.contains("Opponent found"));
        }

        // Waiting player moves first.
        let banner = bob_client.next().await.unwrap();
        assert_eq!(banner.payload, "Game started! alice vs bob (timed, 03:00)");
    }

    #[tokio::test]
    async fn test_modes_do_not_mix() {
        let mm = matchmaker();
        let (alice, alice_conn, _alice_client) = join("alice");
        let (bob, bob_conn, _bob_client) = join("bob");

        {
            let mm = mm.clone();
            tokio::spawn(async move { mm.enter(alice, alice_conn, GameMode::Timed).await });
        }
        until_waiting(&mm, GameMode::Timed).await;

        {
            let mm = mm.clone();
            tokio::spawn(async move { mm.enter(bob, bob_conn, GameMode::Untimed).await });
        }
        until_waiting(&mm, GameMode::Untimed).await;

        assert_eq!(mm.waiting_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_player_times_out() {
        let mm = matchmaker();
        let (alice, alice_conn, mut alice_client) = join("alice");

        let outcome = mm.enter(alice, alice_conn, GameMode::Untimed).await.unwrap();
        let EnterOutcome::TimedOut { player, conn } = outcome else {
            panic!("expected a timeout");
        };
        assert_eq!(player.username, "alice");
        assert!(!mm.is_waiting(GameMode::Untimed).await);

        alice_client.next().await.unwrap();
        let notice = alice_client.next().await.unwrap();
        assert!(notice.payload.contains("No opponent found"));

        // The handed-back connection still works.
        conn.send(PduKind::Info, "still here").await.unwrap();
        assert_eq!(alice_client.next().await.unwrap().payload, "still here");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_entry_taken_waits_for_match() {
        let mm = matchmaker();
        let (alice, alice_conn, _alice_client) = join("alice");

        let waiter = {
            let mm = mm.clone();
            tokio::spawn(async move { mm.enter(alice, alice_conn, GameMode::Timed).await })
        };
        until_waiting(&mm, GameMode::Timed).await;

        // A pairing takes the entry but has not signalled yet.
        let taken = mm.slots.lock().await.slot(GameMode::Timed).take().unwrap();

        tokio::time::advance(mm.config.wait_timeout + Duration::from_secs(1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!waiter.is_finished());

        let id = SessionId::new();
        taken.matched.send(id).unwrap();

        match waiter.await.unwrap().unwrap() {
            EnterOutcome::Matched(matched) => assert_eq!(matched, id),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!mm.is_waiting(GameMode::Timed).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_taken_entry_dropped_reports_abandoned() {
        let mm = matchmaker();
        let (alice, alice_conn, _alice_client) = join("alice");

        let waiter = {
            let mm = mm.clone();
            tokio::spawn(async move { mm.enter(alice, alice_conn, GameMode::Untimed).await })
        };
        until_waiting(&mm, GameMode::Untimed).await;

        let taken = mm.slots.lock().await.slot(GameMode::Untimed).take().unwrap();
        tokio::time::advance(mm.config.wait_timeout + Duration::from_secs(1)).await;
        drop(taken);

        let result = waiter.await.unwrap();
        assert_eq!(
            result.unwrap_err(),
            MatchmakingError::Abandoned { username: "alice".into() }
        );
    }

    #[tokio::test]
    async fn test_select_game_mode_retries() {
        let (mut conn, mut client) = Connection::pair(None);
        client.reply("3").await.unwrap();
        client.reply("untimed").await.unwrap();
        client.reply("2").await.unwrap();

        assert_eq!(select_game_mode(&mut conn).await.unwrap(), GameMode::Untimed);

        let mut errors = 0;
        drop(conn);
        while let Some(pdu) = client.next().await {
            if pdu.kind == PduKind::Error {
                errors += 1;
            }
        }
        assert_eq!(errors, 2);
    }

    #[tokio::test]
    async fn test_select_game_mode_disconnect() {
        let (mut conn, client) = Connection::pair(None);
        drop(client);
        assert_eq!(select_game_mode(&mut conn).await, Err(ConnectionError::Closed));
    }
}
