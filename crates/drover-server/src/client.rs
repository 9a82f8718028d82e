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

/// A connected control client (dashboard).
pub struct Client {
    pub id: ClientId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
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

    /// Queue a frame. A full queue drops the frame; telemetry is periodic
    /// and the next snapshot supersedes it.
    fn offer(&self, message: String) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(client_id = %self.id, msg_len = msg.len(), "send queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected control clients.
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

    /// Register a new client and return its ID + outbound queue.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue.max(1));
        self.clients.insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        (id, rx)
    }

    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    pub fn get(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Send a message to one client. Returns `false` if it was dropped.
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        match self.get(client_id) {
            Some(client) => client.offer(message),
            None => false,
        }
    }

    /// Send a message to every connected client. Returns how many took it.
    pub fn broadcast(&self, message: &str) -> usize {
        let targets: Vec<Arc<Client>> = self
            .clients
            .iter()
            .filter(|c| c.is_connected())
            .map(|c| Arc::clone(c.value()))
            .collect();
        targets
            .iter()
            .filter(|c| c.offer(message.to_string()))
            .count()
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Remove clients that haven't answered a ping within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|c| !c.is_alive())
            .map(|c| c.key().clone())
            .collect();
        for id in &dead {
            self.unregister(id);
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        dead.len()
    }
}

/// Run one WebSocket connection: a writer that drains the client's queue and
/// pings, and a reader that forwards text frames to `on_message`.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "sent ping");
                }
            }
        }
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if on_message.send((reader_cid.clone(), text.to_string())).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.get(&reader_cid) {
                        client.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&client_id);
    tracing::info!(client_id = %client_id, "client disconnected");
}

/// Periodically drop clients that stopped answering pings.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.cleanup_dead_clients();
                    if removed > 0 {
                        tracing::info!(removed, "dead client cleanup");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_unique() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
        assert!(a.0.starts_with("client_"));
    }

    #[test]
    fn registry_register_and_unregister() {
        let registry = ClientRegistry::new(32);
        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_eq!(registry.count(), 2);

        registry.unregister(&id1);
        assert_eq!(registry.count(), 1);
        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn broadcast_reaches_every_client() {
        let registry = ClientRegistry::new(32);
        let (_a, mut rx1) = registry.register();
        let (_b, mut rx2) = registry.register();

        assert_eq!(registry.broadcast("hello"), 2);
        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(rx2.try_recv().unwrap(), "hello");
    }

    #[test]
    fn send_to_specific_client() {
        let registry = ClientRegistry::new(32);
        let (id, mut rx) = registry.register();
        let (_other, mut other_rx) = registry.register();

        assert!(registry.send_to(&id, "test message".into()));
        assert_eq!(rx.try_recv().unwrap(), "test message");
        assert!(other_rx.try_recv().is_err());
        assert!(!registry.send_to(&ClientId::new(), "test".into()));
    }

    #[test]
    fn full_queue_drops() {
        let registry = ClientRegistry::new(2);
        let (id, _rx) = registry.register();
        assert!(registry.send_to(&id, "msg1".into()));
        assert!(registry.send_to(&id, "msg2".into()));
        assert!(!registry.send_to(&id, "msg3".into()));
        assert_eq!(registry.broadcast("msg4"), 0);
    }

    #[test]
    fn cleanup_dead_clients_removes_expired() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register();
        let (_live, _rx2) = registry.register();

        registry.get(&id).unwrap().last_pong.store(0, Ordering::Relaxed);

        assert_eq!(registry.cleanup_dead_clients(), 1);
        assert_eq!(registry.count(), 1);
        assert!(registry.get(&id).is_none());
    }
}
