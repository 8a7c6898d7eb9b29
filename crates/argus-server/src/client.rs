use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

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

/// A connected live-viewer.
///
/// The sender half of the client's bounded outbound queue lives here; the
/// receiver half is owned by the connection's writer task. The cancellation
/// token is the teardown signal: cancelling it unblocks both of the
/// connection's tasks.
pub struct Client {
    pub id: ClientId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
    cancel: CancellationToken,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>, cancel: CancellationToken) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
            cancel,
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

/// Registry of all connected live-viewers.
///
/// The only structure shared across tasks: handlers register/unregister,
/// the event bridge fans out, the cleanup task reaps dead peers. Each
/// client's queue and socket halves stay exclusively owned by its own tasks.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new client. Returns its ID, the receiver half of its
    /// outbound queue, and the token that tears the connection down.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>, CancellationToken) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let cancel = CancellationToken::new();
        let client = Arc::new(Client::new(id.clone(), tx, cancel.clone()));
        if self.clients.insert(id.clone(), client).is_some() {
            // IDs are uuidv7-unique, so this indicates broken hub discipline.
            tracing::warn!(client_id = %id, "client was already registered, replacing");
        }
        (id, rx, cancel)
    }

    /// Remove a client by ID and tear its connection down.
    /// No-op if already absent: teardown races (read error vs. write error
    /// vs. eviction) are expected, so unregistration is idempotent.
    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
            client.cancel.cancel();
        }
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Copy-on-read view of the current membership, safe to walk while
    /// registrations and removals continue concurrently.
    pub fn snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Fan a serialized message out to every connected client.
    ///
    /// Enqueue is a non-blocking `try_send`; the cost is membership size x
    /// O(1), never a function of any subscriber's drain rate. A client whose
    /// queue is full is too slow to keep: it is evicted (closed and
    /// unregistered) and the message is discarded for it, so publishers
    /// never wait on a slow subscriber. Evictions are applied after the
    /// snapshot walk.
    pub fn broadcast_all(&self, message: &str) {
        let mut evicted: Vec<ClientId> = Vec::new();

        for client in self.snapshot() {
            if !client.is_connected() {
                continue;
            }
            match client.tx.try_send(message.to_string()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        client_id = %client.id,
                        capacity = self.max_send_queue,
                        "send queue full, evicting slow client"
                    );
                    evicted.push(client.id.clone());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evicted.push(client.id.clone());
                }
            }
        }

        for id in evicted {
            self.unregister(&id);
        }
    }

    /// Remove clients that haven't responded to pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.value().id.clone())
            .collect();

        let removed = dead.len();
        for id in dead {
            self.unregister(&id);
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        removed
    }

    #[cfg(test)]
    fn get(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|e| Arc::clone(e.value()))
    }
}

/// Run a registered WebSocket connection to completion.
///
/// Two cooperating tasks: the writer drains the client's bounded queue into
/// the socket and sends periodic pings; the reader watches for pongs and
/// client-initiated close. Either one finishing (or the cancellation token
/// firing, e.g. on eviction) tears the whole connection down, and the final
/// unregister is idempotent against teardown races.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
    registry: Arc<ClientRegistry>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: queue drain + heartbeat. Any write error ends the connection.
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
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
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader task: liveness tracking and close detection. Live-viewers are
    // passive, so inbound text frames are ignored.
    let reader_cid = client_id.clone();
    let reader_cancel = cancel.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reader_cancel.cancelled() => break,
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(WsMessage::Pong(_))) => {
                            if let Some(client) = reader_registry.clients.get(&reader_cid) {
                                client.record_pong();
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => break,
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    cancel.cancel();
    registry.unregister(&client_id);
    tracing::info!(client_id = %client_id, "WebSocket client disconnected");
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
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed = removed, "dead client cleanup");
            }
        }
    })
}
