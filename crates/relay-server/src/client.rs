use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use relay_core::ids::{SessionId, SubscriberId};
use relay_coordinator::Broadcaster;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Unique client identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live membership in one session's broadcast group.
struct Subscription {
    subscriber_id: SubscriberId,
    forward_task: tokio::task::JoinHandle<()>,
}

/// A connected WebSocket client.
pub struct Client {
    pub id: ClientId,
    pub tx: mpsc::Sender<String>,
    pub connected: AtomicBool,
    pub last_pong: AtomicU64,
    subscriptions: HashMap<SessionId, Subscription>,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
            subscriptions: HashMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients and their subscriptions.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Mutex<Client>>>,
    broadcaster: Arc<Broadcaster>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(broadcaster: Arc<Broadcaster>, max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            broadcaster,
            max_send_queue,
        }
    }

    /// Register a new client and return its ID + outbound message stream.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let client = Arc::new(Mutex::new(Client::new(id.clone(), tx)));
        self.clients.insert(id.clone(), client);
        (id, rx)
    }

    /// Remove a client, tearing down every broadcast subscription it held.
    pub async fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            let mut c = client.lock().await;
            c.connected.store(false, Ordering::Relaxed);
            for (session_id, sub) in c.subscriptions.drain() {
                self.broadcaster.leave(&session_id, &sub.subscriber_id);
                sub.forward_task.abort();
            }
        }
    }

    /// Join the session's broadcast group on behalf of a client. Events
    /// published after this point stream to the client's socket; catch-up
    /// is via `session.resync`, not replay.
    pub async fn subscribe(
        self: &Arc<Self>,
        client_id: &ClientId,
        session_id: &SessionId,
    ) -> Option<SubscriberId> {
        let client = self.clients.get(client_id)?.clone();
        let mut guard = client.lock().await;

        if let Some(existing) = guard.subscriptions.get(session_id) {
            return Some(existing.subscriber_id.clone());
        }

        let (subscriber_id, mut rx) = self.broadcaster.join(session_id);
        let registry = Arc::clone(self);
        let forward_cid = client_id.clone();
        let forward_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        let _ = registry.send_to(&forward_cid, json).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed serializing session event");
                    }
                }
            }
        });

        guard.subscriptions.insert(
            session_id.clone(),
            Subscription {
                subscriber_id: subscriber_id.clone(),
                forward_task,
            },
        );
        Some(subscriber_id)
    }

    /// Leave the session's broadcast group. Returns false if the client
    /// held no subscription for it.
    pub async fn unsubscribe(&self, client_id: &ClientId, session_id: &SessionId) -> bool {
        let Some(client) = self.clients.get(client_id).map(|c| c.clone()) else {
            return false;
        };
        let mut guard = client.lock().await;
        match guard.subscriptions.remove(session_id) {
            Some(sub) => {
                self.broadcaster.leave(session_id, &sub.subscriber_id);
                sub.forward_task.abort();
                true
            }
            None => false,
        }
    }

    /// Send a message to a specific client. Drops the message if the
    /// client's queue is full; a slow socket never backs up the server.
    pub async fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        if let Some(client) = self.clients.get(client_id) {
            let tx = client.lock().await.tx.clone();
            match tx.try_send(message) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(msg)) => {
                    tracing::warn!(
                        client_id = %client_id,
                        msg_len = msg.len(),
                        "send queue full, dropping message"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        } else {
            false
        }
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Remove clients that haven't answered pings within the timeout.
    pub async fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter_map(|entry| {
                entry.value().try_lock().ok().and_then(|client| {
                    if client.is_connected() && client.is_alive() {
                        None
                    } else {
                        Some(client.id.clone())
                    }
                })
            })
            .collect();

        let mut removed = 0;
        for id in dead {
            self.unregister(&id).await;
            removed += 1;
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        removed
    }
}

/// Handle a WebSocket connection: split into reader/writer, manage
/// lifecycle with heartbeat, unregister on either side closing.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward messages from channel to WebSocket + periodic ping
    let writer_cid = client_id.clone();
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "sent ping");
                }
            }
        }

        if let Some(client) = writer_registry.clients.get(&writer_cid) {
            if let Ok(c) = client.try_lock() {
                c.connected.store(false, Ordering::Relaxed);
            }
        }
    });

    // Reader task: forward WebSocket messages to the handler, track pongs
    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_message.send((reader_cid.clone(), text.to_string())).await;
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.clients.get(&reader_cid) {
                        if let Ok(c) = client.try_lock() {
                            c.record_pong();
                        }
                    }
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pongs automatically
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&client_id).await;
}

/// Start a background task that periodically cleans up dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients().await;
            if removed > 0 {
                tracing::info!(removed = removed, "dead client cleanup");
            }
        }
    })
}
