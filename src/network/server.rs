//! WebSocket Game Server
//!
//! Async WebSocket gateway in front of the [`MatchEngine`].
//! Handles authentication, room subscriptions, command routing and the
//! fan-out of engine events to connected players.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::game::effects::EffectRequest;
use crate::game::engine::MatchEngine;
use crate::game::events::{Audience, Dispatch};
use crate::game::state::{PlayerId, RoomId};
use crate::network::auth::{resolve_identity, IdentityConfig};
use crate::network::protocol::{
    AuthRequest, AuthResult, ClientMessage, ErrorCode, ServerError, ServerMessage,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle connections are dropped after this long.
    pub connection_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            connection_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `STOP_BIND_ADDR`, `STOP_MAX_CONNECTIONS` and
    /// `STOP_IDLE_TIMEOUT_SECS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(addr) = std::env::var("STOP_BIND_ADDR").ok().and_then(|v| v.parse().ok()) {
            config.bind_addr = addr;
        }
        if let Some(max) = std::env::var("STOP_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_connections = max;
        }
        if let Some(secs) = std::env::var("STOP_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.connection_timeout = Duration::from_secs(secs);
        }
        config
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
}

/// Connected client state.
struct ConnectedClient {
    /// Player identifier (after auth).
    player_id: Option<PlayerId>,
    /// Room whose events this client receives.
    room_id: Option<RoomId>,
    /// Last activity.
    last_activity: Instant,
    /// Message sender (for direct messaging to client).
    sender: mpsc::Sender<ServerMessage>,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// Shared handles for connection tasks.
#[derive(Clone)]
struct Gateway {
    engine: Arc<MatchEngine>,
    identity: Arc<IdentityConfig>,
    config: ServerConfig,
    clients: Clients,
}

/// The game server.
pub struct GameServer {
    gateway: Gateway,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, identity: IdentityConfig, engine: Arc<MatchEngine>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            gateway: Gateway {
                engine,
                identity: Arc::new(identity),
                config,
                clients: Arc::new(RwLock::new(BTreeMap::new())),
            },
            shutdown_tx,
        }
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.gateway.config.bind_addr).await?;
        info!("Game server listening on {}", self.gateway.config.bind_addr);

        let events = self.gateway.engine.events().subscribe();
        let forward_handle = tokio::spawn(run_event_forwarder(events, self.gateway.clients.clone()));
        let cleanup_handle = tokio::spawn(run_cleanup_loop(
            self.gateway.clients.clone(),
            self.gateway.config.connection_timeout,
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.gateway.clients.read().await.len();
                            if clients_count >= self.gateway.config.max_connections {
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

        forward_handle.abort();
        cleanup_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let gateway = self.gateway.clone();
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
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            gateway.clients.write().await.insert(
                addr,
                ConnectedClient {
                    player_id: None,
                    room_id: None,
                    last_activity: Instant::now(),
                    sender: msg_tx.clone(),
                },
            );

            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
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
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError::new(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        ))).await;
                                        continue;
                                    }
                                };

                                if let Some(client) = gateway.clients.write().await.get_mut(&addr) {
                                    client.last_activity = Instant::now();
                                }

                                gateway.handle_client_message(addr, client_msg, &msg_tx).await;
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
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            sender_task.abort();
            gateway.clients.write().await.remove(&addr);
            info!("Client {} cleaned up", addr);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.gateway.clients.read().await.len()
    }
}

impl Gateway {
    /// Handle a client message.
    async fn handle_client_message(
        &self,
        addr: SocketAddr,
        msg: ClientMessage,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let reply = match msg {
            ClientMessage::Auth(auth) => Some(self.handle_auth(addr, auth).await),
            ClientMessage::Ping { timestamp } => Some(ServerMessage::Pong {
                timestamp,
                server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
            }),
            msg => match self.player_id(addr).await {
                Some(player_id) => self.handle_command(addr, player_id, msg, sender).await,
                None => Some(ServerMessage::Error(ServerError::new(
                    ErrorCode::NotAuthenticated,
                    "Must authenticate first",
                ))),
            },
        };

        if let Some(reply) = reply {
            let _ = sender.send(reply).await;
        }
    }

    async fn player_id(&self, addr: SocketAddr) -> Option<PlayerId> {
        self.clients.read().await.get(&addr).and_then(|c| c.player_id)
    }

    async fn set_room(&self, addr: SocketAddr, room_id: Option<RoomId>) {
        if let Some(client) = self.clients.write().await.get_mut(&addr) {
            client.room_id = room_id;
        }
    }

    /// Handle authentication.
    async fn handle_auth(&self, addr: SocketAddr, auth: AuthRequest) -> ServerMessage {
        match resolve_identity(&auth, &self.identity) {
            Ok(player_id) => {
                if let Some(client) = self.clients.write().await.get_mut(&addr) {
                    client.player_id = Some(player_id);
                }
                debug!("Client {} authenticated as {}", addr, player_id.short());
                ServerMessage::AuthResult(AuthResult {
                    success: true,
                    player_id: Some(player_id),
                    error: None,
                    server_version: self.config.version.clone(),
                })
            }
            Err(e) => {
                warn!("Authentication failed for {}: {}", addr, e);
                ServerMessage::AuthResult(AuthResult {
                    success: false,
                    player_id: None,
                    error: Some(ServerError::from(&e).message),
                    server_version: self.config.version.clone(),
                })
            }
        }
    }

    /// Commands that need an authenticated player.
    async fn handle_command(
        &self,
        addr: SocketAddr,
        player_id: PlayerId,
        msg: ClientMessage,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Option<ServerMessage> {
        let engine = &self.engine;
        match msg {
            ClientMessage::Subscribe { room_id } => {
                // Membership is checked by the snapshot read.
                match engine.round_state(room_id, player_id).await {
                    Ok(snapshot) => {
                        self.set_room(addr, Some(room_id)).await;
                        let _ = sender.send(ServerMessage::Subscribed { room_id }).await;
                        Some(ServerMessage::RoundState(snapshot))
                    }
                    Err(e) => Some(ServerMessage::Error((&e).into())),
                }
            }
            ClientMessage::StartMatch { room_id } => {
                match engine.start_match(room_id, player_id).await {
                    Ok(_) => Some(ack("start_match")),
                    Err(e) => Some(ServerMessage::Error((&e).into())),
                }
            }
            ClientMessage::SubmitAnswers {
                room_id,
                round_id,
                answers,
            } => {
                let answers = answers
                    .into_iter()
                    .map(|a| (a.category_id, a.answer))
                    .collect();
                match engine
                    .submit_answers(room_id, round_id, player_id, answers)
                    .await
                {
                    Ok(count) => Some(ServerMessage::AnswersAccepted { round_id, count }),
                    Err(e) => Some(ServerMessage::Error((&e).into())),
                }
            }
            ClientMessage::StopRound { room_id, round_id } => {
                // The grace period runs inside; keep reading this socket meanwhile.
                let engine = engine.clone();
                let sender = sender.clone();
                tokio::spawn(async move {
                    if let Err(e) = engine.request_stop(room_id, round_id, player_id).await {
                        debug!("Stop from {} rejected: {}", player_id.short(), e);
                        let _ = sender.send(ServerMessage::Error((&e).into())).await;
                    }
                });
                Some(ack("stop_round"))
            }
            ClientMessage::UsePowerUp {
                room_id,
                round_id,
                code,
                target_player,
                target_category,
            } => {
                let request = EffectRequest {
                    room_id,
                    round_id,
                    actor: player_id,
                    code,
                    target_player,
                    target_category,
                };
                match engine.use_power_up(request).await {
                    Ok(_) => Some(ack("use_power_up")),
                    // Already reported to the actor as a player event.
                    Err(_) => None,
                }
            }
            ClientMessage::SkipCategory {
                room_id,
                round_id,
                category_id,
            } => match engine
                .skip_category(room_id, round_id, player_id, category_id)
                .await
            {
                Ok(()) => Some(ack("skip_category")),
                Err(e) => Some(ServerMessage::Error((&e).into())),
            },
            ClientMessage::SyncRequest { room_id } => {
                match engine.round_state(room_id, player_id).await {
                    Ok(snapshot) => Some(ServerMessage::RoundState(snapshot)),
                    Err(e) => Some(ServerMessage::Error((&e).into())),
                }
            }
            ClientMessage::Leave => {
                self.set_room(addr, None).await;
                Some(ack("leave"))
            }
            ClientMessage::Auth(_) | ClientMessage::Ping { .. } => None,
        }
    }
}

fn ack(command: &str) -> ServerMessage {
    ServerMessage::Ack {
        command: command.to_string(),
    }
}

/// Route engine events to the clients subscribed to their room.
async fn run_event_forwarder(mut events: broadcast::Receiver<Dispatch>, clients: Clients) {
    loop {
        let dispatch = match events.recv().await {
            Ok(d) => d,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event forwarder lagging, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let targets: Vec<_> = {
            let clients = clients.read().await;
            clients
                .values()
                .filter(|c| c.room_id == Some(dispatch.room_id))
                .filter(|c| match dispatch.audience {
                    Audience::Room => true,
                    Audience::Player(player_id) => c.player_id == Some(player_id),
                })
                .map(|c| c.sender.clone())
                .collect()
        };

        for sender in targets {
            let msg = ServerMessage::Event {
                room_id: dispatch.room_id,
                event: dispatch.event.clone(),
            };
            if sender.try_send(msg).is_err() {
                debug!("Client queue full or closed, event dropped");
            }
        }
    }
}

/// Drop idle connections.
async fn run_cleanup_loop(clients: Clients, idle_timeout: Duration) {
    let mut interval = interval(Duration::from_secs(60));

    loop {
        interval.tick().await;

        let now = Instant::now();
        let mut clients = clients.write().await;
        let before = clients.len();
        clients.retain(|addr, c| {
            let keep = now.duration_since(c.last_activity) <= idle_timeout;
            if !keep {
                info!("Removed idle client {}", addr);
            }
            keep
        });
        if clients.len() != before {
            debug!(removed = before - clients.len(), "Idle cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::game::events::{EngineEvent, EventHub};
    use crate::game::rewards::MemoryLedger;
    use crate::lexicon::MemoryLexicon;
    use crate::store::MemoryStore;

    fn engine() -> Arc<MatchEngine> {
        MatchEngine::new(
            EngineConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLexicon::new()),
            Arc::new(MemoryLedger::new()),
            EventHub::default(),
        )
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = GameServer::new(config, IdentityConfig::default(), engine());
        assert_eq!(server.connection_count().await, 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_commands_need_auth() {
        let server = GameServer::new(ServerConfig::default(), IdentityConfig::default(), engine());
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        server.gateway.clients.write().await.insert(
            addr,
            ConnectedClient {
                player_id: None,
                room_id: None,
                last_activity: Instant::now(),
                sender: tx.clone(),
            },
        );

        server
            .gateway
            .handle_client_message(addr, ClientMessage::SyncRequest { room_id: RoomId::random() }, &tx)
            .await;

        match rx.recv().await {
            Some(ServerMessage::Error(e)) => assert_eq!(e.code, ErrorCode::NotAuthenticated),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_insecure_auth_then_unknown_room() {
        let identity = IdentityConfig {
            allow_insecure_ids: true,
            ..Default::default()
        };
        let server = GameServer::new(ServerConfig::default(), identity, engine());
        let addr: SocketAddr = "127.0.0.1:5001".parse().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        server.gateway.clients.write().await.insert(
            addr,
            ConnectedClient {
                player_id: None,
                room_id: None,
                last_activity: Instant::now(),
                sender: tx.clone(),
            },
        );

        let player = PlayerId::random();
        let auth = ClientMessage::Auth(AuthRequest {
            token: String::new(),
            player_id: Some(player.to_string()),
            client_version: "1.0.0".into(),
        });
        server.gateway.handle_client_message(addr, auth, &tx).await;
        match rx.recv().await {
            Some(ServerMessage::AuthResult(r)) => {
                assert!(r.success);
                assert_eq!(r.player_id, Some(player));
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        let subscribe = ClientMessage::Subscribe { room_id: RoomId::random() };
        server.gateway.handle_client_message(addr, subscribe, &tx).await;
        match rx.recv().await {
            Some(ServerMessage::Error(e)) => assert_eq!(e.code, ErrorCode::RoomNotFound),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forwarder_routes_by_room_and_audience() {
        let hub = EventHub::default();
        let clients: Clients = Arc::new(RwLock::new(BTreeMap::new()));
        let room = RoomId::random();
        let alice = PlayerId::random();
        let bob = PlayerId::random();

        let mut inboxes = Vec::new();
        for (port, player, room_id) in [
            (6000, alice, Some(room)),
            (6001, bob, Some(room)),
            (6002, PlayerId::random(), Some(RoomId::random())),
        ] {
            let (tx, rx) = mpsc::channel(8);
            clients.write().await.insert(
                SocketAddr::from(([127, 0, 0, 1], port)),
                ConnectedClient {
                    player_id: Some(player),
                    room_id,
                    last_activity: Instant::now(),
                    sender: tx,
                },
            );
            inboxes.push(rx);
        }

        let task = tokio::spawn(run_event_forwarder(hub.subscribe(), clients));
        hub.to_player(
            room,
            bob,
            EngineEvent::PlayerError {
                code: "no_stock".into(),
                message: "out".into(),
            },
        );
        hub.to_room(room, EngineEvent::RoomError { message: "x".into() });

        // Bob gets both, Alice only the room event, the other room nothing.
        let first = inboxes[1].recv().await;
        assert!(matches!(
            first,
            Some(ServerMessage::Event { event: EngineEvent::PlayerError { .. }, .. })
        ));
        assert!(matches!(
            inboxes[1].recv().await,
            Some(ServerMessage::Event { event: EngineEvent::RoomError { .. }, .. })
        ));
        assert!(matches!(
            inboxes[0].recv().await,
            Some(ServerMessage::Event { event: EngineEvent::RoomError { .. }, .. })
        ));
        assert!(inboxes[2].try_recv().is_err());

        task.abort();
    }
}
