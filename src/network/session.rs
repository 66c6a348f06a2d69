//! Match Session Management
//!
//! One task per match. It deals hands, runs the turn loop, resolves the
//! ending, reports the result and negotiates a rematch. A mana ticker and,
//! for timed games, a clock watcher run beside the turn loop and share the
//! match state through one mutex.
//!
//! Every ending path (King Tower, clock, disconnect) concludes the match
//! under the state lock, broadcasts, then flips the session's `ended` flag.
//! The flag cancels any pending client read and stops the clock watcher.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::game::catalog::{ContentError, ContentSource, TowerSet, Troop};
use crate::game::combat::HealOutcome;
use crate::game::mana::{spawn_mana_regen, ManaConfig};
use crate::game::state::{
    AttackError, AttackReport, EndReason, HealReport, MatchOutcome, MatchState, Player, Seat,
    TimeoutResult,
};
use crate::game::timer::GameTimer;
use crate::network::connection::{Connection, ConnectionError, Outbound};
use crate::network::matchmaking::{select_game_mode, GameMode};
use crate::network::protocol::{numbered, Pdu, PduKind};
use crate::network::registry::PlayerRegistry;
use crate::{CRIT_TOKENS_PER_MATCH, HEAL_AMOUNT, HEAL_CAP, MATCH_DURATION_SECS};

// =============================================================================
// IDENTIFIERS AND CONFIG
// =============================================================================

/// Unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Configuration for a match session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Length of a timed match.
    pub match_duration: Duration,
    /// How often the clock watcher checks a timed match.
    pub timer_poll: Duration,
    /// Mana regeneration.
    pub mana: ManaConfig,
    /// Critical-hit tokens per player per match.
    pub crit_tokens: u32,
    /// Hit points restored by a healer.
    pub heal_amount: i32,
    /// Healing never raises a tower above this.
    pub heal_cap: i32,
    /// Pause between the result and the rematch prompt.
    pub rematch_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            match_duration: Duration::from_secs(MATCH_DURATION_SECS),
            timer_poll: Duration::from_secs(1),
            mana: ManaConfig::default(),
            crit_tokens: CRIT_TOKENS_PER_MATCH,
            heal_amount: HEAL_AMOUNT,
            heal_cap: HEAL_CAP,
            rematch_delay: Duration::from_secs(2),
        }
    }
}

/// Collaborators every session needs.
#[derive(Clone)]
pub struct SessionContext {
    /// Troop and tower content.
    pub content: Arc<dyn ContentSource>,
    /// Progression store.
    pub registry: Arc<PlayerRegistry>,
    /// Session settings.
    pub config: SessionConfig,
}

impl SessionContext {
    /// Context with default session settings.
    pub fn new(content: Arc<dyn ContentSource>, registry: Arc<PlayerRegistry>) -> Self {
        Self {
            content,
            registry,
            config: SessionConfig::default(),
        }
    }

    /// Replace the session settings.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }
}

// =============================================================================
// COMPLETION
// =============================================================================

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEnding {
    /// The match was played to an end.
    Finished {
        /// Why it ended.
        reason: EndReason,
        /// Winner's username, `None` for a draw.
        winner: Option<String>,
    },
    /// Content failed to load; no match was played.
    ContentUnavailable(String),
}

/// Final report of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchReport {
    /// Session that produced it.
    pub session_id: SessionId,
    /// Usernames, first seat first.
    pub players: [String; 2],
    /// How it ended.
    pub ending: MatchEnding,
}

/// Completion handle returned when a session starts.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    done: oneshot::Receiver<MatchReport>,
}

impl SessionHandle {
    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Wait for the match to end. Fires once per session, before rematch
    /// negotiation. `None` if the session task died without reporting.
    pub async fn finished(self) -> Option<MatchReport> {
        self.done.await.ok()
    }
}

/// Start a match between two players. The first player moves first.
///
/// The session owns both connections from here on and closes them itself
/// once the match and any rematch are resolved.
pub fn start_session(
    ctx: &SessionContext,
    players: [Player; 2],
    conns: [Connection; 2],
    mode: GameMode,
) -> SessionHandle {
    let id = SessionId::new();
    let (done_tx, done) = oneshot::channel();
    tokio::spawn(run_session(ctx.clone(), id, players, conns, mode, done_tx));
    SessionHandle { id, done }
}

// =============================================================================
// SESSION TASK
// =============================================================================

fn load_content(content: &dyn ContentSource) -> Result<(Vec<Troop>, TowerSet), ContentError> {
    Ok((content.load_troop_catalog()?, content.load_tower_template()?))
}

fn run_session(
    ctx: SessionContext,
    id: SessionId,
    players: [Player; 2],
    conns: [Connection; 2],
    mode: GameMode,
    done: oneshot::Sender<MatchReport>,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let usernames = [players[0].username.clone(), players[1].username.clone()];

        let (catalog, towers) = match load_content(ctx.content.as_ref()) {
            Ok(content) => content,
            Err(e) => {
                error!(session = %id, error = %e, "game content unavailable");
                for conn in &conns {
                    let _ = conn
                        .send(PduKind::Error, format!("Game content unavailable: {}", e))
                        .await;
                }
                for player in &players {
                    ctx.registry.check_in(player).await;
                }
                drop(conns);
                let _ = done.send(MatchReport {
                    session_id: id,
                    players: usernames,
                    ending: MatchEnding::ContentUnavailable(e.to_string()),
                });
                return;
            }
        };

        let mut rng = StdRng::from_entropy();
        let [first, second] = players;
        let mut state = MatchState::new(first, second);
        state.deal(&catalog, &towers, ctx.config.crit_tokens, &mut rng);
        let state = Arc::new(Mutex::new(state));

        let (ended, ended_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            id,
            state: state.clone(),
            outbound: [conns[0].outbound(), conns[1].outbound()],
            usernames: usernames.clone(),
            ended,
        });

        info!(session = %id, p1 = %usernames[0], p2 = %usernames[1], ?mode, "session started");

        let _ = spawn_mana_regen(state.clone(), ctx.config.mana);
        let timer = match mode {
            GameMode::Timed => {
                let mut timer = GameTimer::new(ctx.config.match_duration);
                timer.start();
                Some(timer)
            }
            GameMode::Untimed => None,
        };
        let watcher = timer.map(|t| spawn_clock_watch(shared.clone(), t, ctx.config.timer_poll));

        let mut banner = format!("Game started! {} vs {}", usernames[0], usernames[1]);
        if let Some(timer) = &timer {
            banner.push_str(&format!(" (timed, {})", timer.formatted_time_remaining()));
        }
        shared.broadcast(&banner);
        shared.broadcast(&format!("{} goes first.", usernames[0]));

        let turns = Turns {
            shared: shared.clone(),
            conns,
            ended: ended_rx,
            catalog,
            rng,
            timer,
            config: ctx.config.clone(),
        };
        let conns = turns.run().await;

        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }
        drop(shared);

        let (players, outcome) = {
            let mut state = state.lock().await;
            let outcome = state.outcome();
            state.begin_rematch();
            (state.players().clone(), outcome)
        };
        for player in &players {
            ctx.registry.record(player).await;
        }

        let ending = match outcome {
            Some(MatchOutcome { reason, winner }) => MatchEnding::Finished {
                reason,
                winner: winner.map(|seat| usernames[seat.index()].clone()),
            },
            None => {
                warn!(session = %id, "turn loop stopped without an outcome");
                MatchEnding::Finished {
                    reason: EndReason::Disconnected,
                    winner: None,
                }
            }
        };
        info!(session = %id, ?ending, "session ended");
        let _ = done.send(MatchReport {
            session_id: id,
            players: usernames,
            ending,
        });

        negotiate_rematch(ctx, conns, players).await;
    })
}

/// State shared by the turn loop and the clock watcher.
struct Shared {
    id: SessionId,
    state: Arc<Mutex<MatchState>>,
    outbound: [Outbound; 2],
    usernames: [String; 2],
    ended: watch::Sender<bool>,
}

impl Shared {
    fn name(&self, seat: Seat) -> &str {
        &self.usernames[seat.index()]
    }

    async fn send(&self, seat: Seat, kind: PduKind, text: impl Into<String>) {
        let _ = self.outbound[seat.index()].send(kind, text).await;
    }

    /// Send to both players without waiting, so a stalled client cannot
    /// hold up an ending. A full queue drops the message.
    fn broadcast(&self, text: &str) {
        for (seat, outbound) in Seat::BOTH.into_iter().zip(&self.outbound) {
            if let Err(ConnectionError::Full) = outbound.try_send(PduKind::Broadcast, text) {
                warn!(session = %self.id, player = %self.name(seat), "outbound queue full, broadcast dropped");
            }
        }
    }

    fn finish(&self) {
        self.ended.send_replace(true);
    }

    async fn end_by_time(&self) {
        let result = self.state.lock().await.conclude_by_time();
        if let Some(result) = result {
            info!(session = %self.id, winner = ?result.outcome.winner, "time expired");
            self.broadcast(&self.timeout_message(&result));
            self.finish();
        }
    }

    async fn end_by_disconnect(&self, dropped: Seat) {
        let outcome = self.state.lock().await.conclude_by_disconnect(dropped);
        if outcome.is_some() {
            warn!(session = %self.id, player = %self.name(dropped), "player disconnected");
            let text = format!(
                "{} disconnected. {} wins!",
                self.name(dropped),
                self.name(dropped.other())
            );
            self.broadcast(&text);
            self.finish();
        }
    }

    fn timeout_message(&self, result: &TimeoutResult) -> String {
        match result.outcome.winner {
            Some(seat) => format!(
                "Time's up! {} wins, destroying {} towers to {}.",
                self.name(seat),
                result.destroyed[seat.index()],
                result.destroyed[seat.other().index()]
            ),
            None => format!(
                "Time's up! It's a draw with {} towers destroyed each.",
                result.destroyed[0]
            ),
        }
    }
}

fn spawn_clock_watch(shared: Arc<Shared>, timer: GameTimer, poll: Duration) -> JoinHandle<()> {
    let mut ended = shared.ended.subscribe();
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + poll, poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = async { let _ = ended.wait_for(|ended| *ended).await; } => break,
                _ = ticker.tick() => {
                    if timer.is_time_up() {
                        shared.end_by_time().await;
                        break;
                    }
                }
            }
        }

        debug!(session = %shared.id, "clock watcher stopped");
    })
}

// =============================================================================
// TURN LOOP
// =============================================================================

enum Read {
    Input(Pdu),
    Ended,
    Closed,
}

struct Turns {
    shared: Arc<Shared>,
    conns: [Connection; 2],
    ended: watch::Receiver<bool>,
    catalog: Vec<Troop>,
    rng: StdRng,
    timer: Option<GameTimer>,
    config: SessionConfig,
}

impl Turns {
    /// Play turns until the match is over. Hands back the connections once
    /// the ending has been broadcast.
    async fn run(mut self) -> [Connection; 2] {
        loop {
            if self.timer.is_some_and(|t| t.is_time_up()) {
                self.shared.end_by_time().await;
                break;
            }

            let seat = {
                let state = self.shared.state.lock().await;
                if state.is_over() {
                    break;
                }
                state.turn()
            };
            self.play_turn(seat).await;
        }

        let _ = self.ended.wait_for(|ended| *ended).await;
        self.conns
    }

    async fn read(&mut self, seat: Seat) -> Read {
        let conn = &mut self.conns[seat.index()];
        tokio::select! {
            biased;
            _ = self.ended.wait_for(|ended| *ended) => Read::Ended,
            received = conn.recv() => match received {
                Ok(pdu) => Read::Input(pdu),
                Err(_) => Read::Closed,
            },
        }
    }

    /// Send a prompt and wait for the reply. `None` once the match is over.
    async fn prompt(&mut self, seat: Seat, kind: PduKind, text: impl Into<String>) -> Option<Pdu> {
        self.shared.send(seat, kind, text).await;
        match self.read(seat).await {
            Read::Input(pdu) => Some(pdu),
            Read::Ended => None,
            Read::Closed => {
                self.shared.end_by_disconnect(seat).await;
                None
            }
        }
    }

    async fn reject(&self, seat: Seat, error: AttackError) {
        self.shared.send(seat, PduKind::Error, error.to_string()).await;
    }

    async fn play_turn(&mut self, seat: Seat) {
        let name = self.shared.name(seat).to_string();
        let mut menu = format!(
            "{}, it's your turn.\n{}",
            name,
            numbered(["Attack Tower", "Show Status"])
        );
        if let Some(timer) = &self.timer {
            menu.push_str(&format!("\nTime Left: {}", timer.formatted_time_remaining()));
        }

        self.shared
            .send(seat.other(), PduKind::Info, format!("Waiting for {}...", name))
            .await;
        let Some(choice) = self.prompt(seat, PduKind::Menu, menu).await else {
            return;
        };

        match choice.text() {
            "1" => self.attack(seat).await,
            "2" => self.show_status(seat).await,
            _ => self.shared.send(seat, PduKind::Error, "Invalid choice.").await,
        }

        self.end_turn(seat).await;
    }

    async fn end_turn(&mut self, seat: Seat) {
        let drawn = {
            let mut state = self.shared.state.lock().await;
            if state.is_over() {
                return;
            }
            let drawn = state.replenish_hand(seat, &self.catalog, &mut self.rng);
            state.rotate_turn();
            drawn
        };

        if let Some(troop) = drawn {
            self.shared
                .send(seat, PduKind::Event, format!("You drew a new troop: {}", describe_troop(&troop)))
                .await;
        }
    }

    async fn attack(&mut self, seat: Seat) {
        let (hand, mana, crits_left) = {
            let state = self.shared.state.lock().await;
            let player = state.player(seat);
            (player.hand.clone(), player.mana, player.crits_left)
        };
        if hand.is_empty() {
            self.reject(seat, AttackError::NoTroops).await;
            return;
        }

        let list = numbered(hand.iter().map(describe_troop));
        let text = format!("Choose a troop (mana: {}):\n{}", mana, list);
        let Some(pick) = self.prompt(seat, PduKind::Select, text).await else {
            return;
        };
        let Some(troop_index) = pick.choice() else {
            self.reject(seat, AttackError::InvalidTroop).await;
            return;
        };

        let checked = self.shared.state.lock().await.check_troop(seat, troop_index);
        let troop = match checked {
            Ok(troop) => troop,
            Err(e) => {
                self.reject(seat, e).await;
                return;
            }
        };
        if troop.is_healer() {
            self.heal(seat, troop_index).await;
            return;
        }

        let critical = if crits_left > 0 {
            let text = format!(
                "Use a critical hit? ({} left)\n{}",
                crits_left,
                numbered(["Yes", "No"])
            );
            let Some(answer) = self.prompt(seat, PduKind::Select, text).await else {
                return;
            };
            answer.text() == "1"
        } else {
            false
        };

        let defender = seat.other();
        let targets: Vec<(usize, String)> = {
            let state = self.shared.state.lock().await;
            let towers = &state.player(defender).towers;
            state
                .legal_targets(defender)
                .into_iter()
                .map(|i| (i, format!("{} (HP {})", towers[i].kind, towers[i].hp)))
                .collect()
        };
        if targets.is_empty() {
            self.reject(seat, AttackError::NoValidTarget).await;
            return;
        }

        let text = format!(
            "Choose a tower to attack:\n{}",
            numbered(targets.iter().map(|(_, label)| label))
        );
        let Some(pick) = self.prompt(seat, PduKind::Select, text).await else {
            return;
        };
        let Some(&(target_index, _)) = pick.choice().and_then(|i| targets.get(i)) else {
            self.reject(seat, AttackError::InvalidTarget).await;
            return;
        };

        let result = self
            .shared
            .state
            .lock()
            .await
            .apply_attack(seat, troop_index, target_index, critical);
        match result {
            Ok(report) => self.report_attack(seat, report).await,
            Err(AttackError::MatchOver) => {}
            Err(e) => self.reject(seat, e).await,
        }
    }

    async fn report_attack(&self, seat: Seat, report: AttackReport) {
        let attacker = self.shared.name(seat);
        let hp = report.tower_hp.max(0);
        let crit = if report.critical { " Critical hit!" } else { "" };

        self.shared
            .send(
                seat,
                PduKind::Result,
                format!(
                    "{} dealt {} damage to the enemy {}.{} Remaining HP: {}",
                    report.troop, report.damage, report.tower, crit, hp
                ),
            )
            .await;
        self.shared
            .send(
                seat.other(),
                PduKind::Event,
                format!(
                    "{}'s {} hit your {} for {} damage. Remaining HP: {}",
                    attacker, report.troop, report.tower, report.damage, hp
                ),
            )
            .await;

        if report.destroyed {
            let text = format!("{}'s {} has been destroyed!", self.shared.name(seat.other()), report.tower);
            self.shared.broadcast(&text);
        }

        if report.outcome.is_some() {
            info!(session = %self.shared.id, winner = %attacker, "king tower destroyed");
            let text = format!("{} destroyed the King Tower and wins the game!", attacker);
            self.shared.broadcast(&text);
            self.shared.finish();
        }
    }

    async fn heal(&mut self, seat: Seat, troop_index: usize) {
        let result = self.shared.state.lock().await.apply_heal(
            seat,
            troop_index,
            self.config.heal_amount,
            self.config.heal_cap,
        );

        let HealReport { troop, outcome } = match result {
            Ok(report) => report,
            Err(AttackError::MatchOver) => return,
            Err(e) => {
                self.reject(seat, e).await;
                return;
            }
        };

        match outcome {
            HealOutcome::Healed { kind, from, to, .. } => {
                self.shared
                    .send(seat, PduKind::Success, format!("{} healed your {} from {} to {} HP.", troop, kind, from, to))
                    .await;
                let text = format!("{}'s {} healed their {}.", self.shared.name(seat), troop, kind);
                self.shared.send(seat.other(), PduKind::Event, text).await;
            }
            HealOutcome::AlreadyFull { kind } => {
                let text = format!("Your {} is already at full health. {} stays in your hand.", kind, troop);
                self.shared.send(seat, PduKind::Info, text).await;
            }
            HealOutcome::NoStandingTowers => {
                self.shared.send(seat, PduKind::Error, "You have no standing tower to heal.").await;
            }
        }
    }

    async fn show_status(&self, seat: Seat) {
        let snapshot = self.shared.state.lock().await.status(seat);
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => self.shared.send(seat, PduKind::Status, json).await,
            Err(e) => {
                error!(session = %self.shared.id, error = %e, "status serialization failed");
                self.shared.send(seat, PduKind::Error, "Status unavailable.").await;
            }
        }
    }
}

fn describe_troop(troop: &Troop) -> String {
    if troop.is_healer() {
        format!("{} (Heal, Mana {})", troop.name, troop.mana)
    } else {
        format!(
            "{} (ATK {}, DEF {}, Mana {})",
            troop.name, troop.attack, troop.defense, troop.mana
        )
    }
}

// =============================================================================
// REMATCH
// =============================================================================

async fn ask_rematch(conn: &mut Connection) -> Result<(), &'static str> {
    let text = format!("Play again?\n{}", numbered(["Yes", "No"]));
    conn.send(PduKind::Menu, text).await.map_err(|_| "disconnected")?;
    match conn.recv().await {
        Ok(pdu) if pdu.text() == "1" => Ok(()),
        Ok(_) => Err("declined"),
        Err(_) => Err("disconnected"),
    }
}

async fn negotiate_rematch(ctx: SessionContext, mut conns: [Connection; 2], players: [Player; 2]) {
    tokio::time::sleep(ctx.config.rematch_delay).await;
    for conn in conns.iter_mut() {
        conn.discard_pending();
    }

    let [first, second] = &mut conns;
    let answers = tokio::try_join!(ask_rematch(first), ask_rematch(second));
    if let Err(reason) = answers {
        debug!(reason, "no rematch");
    } else {
        let _ = first.send(PduKind::Info, "Restarting game...").await;
        let _ = second.send(PduKind::Info, "Restarting game...").await;

        let modes = tokio::try_join!(select_game_mode(first), select_game_mode(second));
        match modes {
            Ok((a, b)) => {
                // Timed only if both asked for it.
                let mode = if a == GameMode::Timed && b == GameMode::Timed {
                    GameMode::Timed
                } else {
                    GameMode::Untimed
                };
                info!(p1 = %players[0].username, p2 = %players[1].username, ?mode, "rematch accepted");
                start_session(&ctx, players, conns, mode);
                return;
            }
            Err(e) => debug!(error = %e, "rematch mode selection failed"),
        }
    }

    for conn in &conns {
        let _ = conn.send(PduKind::Info, "Thanks for playing. Goodbye!").await;
    }
    for player in &players {
        ctx.registry.check_in(player).await;
    }
    drop(conns);
}
