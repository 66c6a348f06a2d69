//! WebSocket Game Server
//!
//! Accepts WebSocket clients and bridges each socket to a `Connection`:
//! one JSON `Pdu` per text frame. A handler task logs the player in, asks
//! for a game mode and hands the connection to matchmaking.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::game::state::Player;
use crate::network::auth::{resolve_username, AuthConfig};
use crate::network::connection::{Connection, ConnectionError};
use crate::network::matchmaking::{select_game_mode, EnterOutcome, Matchmaker, MatchmakingConfig};
use crate::network::protocol::{Pdu, PduKind};
use crate::network::registry::PlayerRegistry;
use crate::network::session::SessionContext;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Troop catalog file.
    pub troops_path: PathBuf,
    /// Tower definitions file.
    pub towers_path: PathBuf,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            max_connections: 1000,
            troops_path: PathBuf::from("data/troops.json"),
            towers_path: PathBuf::from("data/towers.json"),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `TOWER_CLASH_*` environment variables.
    pub fn from_env() -> Result<Self, GameServerError> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("TOWER_CLASH_BIND") {
            config.bind_addr = addr
                .parse()
                .map_err(|_| GameServerError::InvalidConfig(format!("TOWER_CLASH_BIND={}", addr)))?;
        }
        if let Ok(max) = std::env::var("TOWER_CLASH_MAX_CONNECTIONS") {
            config.max_connections = max.parse().map_err(|_| {
                GameServerError::InvalidConfig(format!("TOWER_CLASH_MAX_CONNECTIONS={}", max))
            })?;
        }
        if let Ok(path) = std::env::var("TOWER_CLASH_TROOPS") {
            config.troops_path = path.into();
        }
        if let Ok(path) = std::env::var("TOWER_CLASH_TOWERS") {
            config.towers_path = path.into();
        }

        Ok(config)
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Bad configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Connected client state.
struct ConnectedClient {
    /// Connection time.
    connected_at: Instant,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Login settings.
    auth: AuthConfig,
    /// Pairs players and starts sessions.
    matchmaker: Arc<Matchmaker>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, auth: AuthConfig, ctx: SessionContext) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            auth,
            matchmaker: Arc::new(Matchmaker::new(ctx, MatchmakingConfig::default())),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(
            "Tower Clash server {} listening on {}",
            self.config.version, self.config.bind_addr
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Bridge a new WebSocket connection to a `Connection`.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let matchmaker = self.matchmaker.clone();
        let auth = self.auth.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (conn, client) = Connection::pair(Some(addr));
            let (to_server, mut from_server) = client.into_parts();

            clients.write().await.insert(
                addr,
                ConnectedClient {
                    connected_at: Instant::now(),
                },
            );

            // Writer: runs until every server-side sender is gone, which is
            // when the session (or handler) drops the connection.
            tokio::spawn(async move {
                while let Some(pdu) = from_server.recv().await {
                    let text = match pdu.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            tokio::spawn(handle_client(conn, matchmaker, auth));

            // Reader
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                // Bare text counts as an input reply.
                                let pdu = Pdu::from_json(&text).unwrap_or_else(|_| Pdu::input(text));
                                if to_server.send(pdu).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Dropping the inbound sender reports the close to whoever owns
            // the connection now.
            drop(to_server);

            if let Some(client) = clients.write().await.remove(&addr) {
                info!("Client {} cleaned up after {:?}", addr, client.connected_at.elapsed());
            }
        });
    }

    /// Pairing service.
    pub fn matchmaker(&self) -> &Arc<Matchmaker> {
        &self.matchmaker
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

// =============================================================================
// CLIENT FLOW
// =============================================================================

/// Ask for a username (or token) until one can be checked out.
pub async fn login(
    conn: &mut Connection,
    registry: &PlayerRegistry,
    auth: &AuthConfig,
) -> Result<Player, ConnectionError> {
    let prompt = if auth.is_configured() {
        "Enter your login token:"
    } else {
        "Enter your username:"
    };

    loop {
        conn.send(PduKind::Input, prompt).await?;
        let reply = conn.recv().await?;

        let username = match resolve_username(reply.text(), auth) {
            Ok(name) => name,
            Err(e) => {
                debug!(error = %e, "login rejected");
                conn.send(PduKind::Error, format!("Login failed: {}", e)).await?;
                continue;
            }
        };

        match registry.check_out(&username).await {
            Ok(player) => return Ok(player),
            Err(e) => conn.send(PduKind::Error, e.to_string()).await?,
        }
    }
}

/// Drive one client from login into a session.
///
/// Loops on mode selection while matchmaking times out. Once a session owns
/// the connection, this task is done.
pub async fn handle_client(mut conn: Connection, matchmaker: Arc<Matchmaker>, auth: AuthConfig) {
    let registry = matchmaker.context().registry.clone();

    let mut player = match login(&mut conn, &registry, &auth).await {
        Ok(player) => player,
        Err(_) => {
            debug!(peer = ?conn.peer(), "client left before logging in");
            return;
        }
    };
    let username = player.username.clone();
    info!(%username, peer = ?conn.peer(), "player logged in");

    let welcome = format!(
        "Welcome, {}! Level {}, {} exp.",
        username, player.level, player.exp
    );
    let _ = conn.send(PduKind::Success, welcome).await;

    loop {
        let mode = match select_game_mode(&mut conn).await {
            Ok(mode) => mode,
            Err(_) => {
                debug!(%username, "client left during mode selection");
                registry.check_in(&player).await;
                return;
            }
        };

        match matchmaker.enter(player, conn, mode).await {
            Ok(EnterOutcome::Paired(handle)) => {
                debug!(%username, session = %handle.id(), "paired");
                return;
            }
            Ok(EnterOutcome::Matched(id)) => {
                debug!(%username, session = %id, "matched");
                return;
            }
            Ok(EnterOutcome::TimedOut { player: p, conn: c }) => {
                player = p;
                conn = c;
            }
            Err(e) => {
                warn!(error = %e, "matchmaking abandoned");
                registry.release(&username).await;
                return;
            }
        }
    }
}
