//! In-process session backend.
//!
//! `SimulatedConnector` hands out sessions that accept every outbound request,
//! remember the most recent ones, and let the caller inject lifecycle events.
//! It backs `--simulate` runs and the engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover_core::errors::SessionError;
use drover_core::session::{
    Action, BlockView, Session, SessionConnector, SessionEvent, SessionHandle, SessionOptions,
    Vec3, WorldView,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

/// Buffered lifecycle events per session.
pub const EVENT_CAPACITY: usize = 64;
const SENT_HISTORY: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Chat(String),
    Action(Action),
}

pub struct SimSession {
    options: Option<SessionOptions>,
    events: Option<mpsc::Sender<SessionEvent>>,
    sent: Mutex<VecDeque<Sent>>,
    sent_total: AtomicU64,
    world: Mutex<Option<WorldView>>,
    closed: AtomicBool,
}

fn default_world() -> WorldView {
    let position = Vec3::new(0.5, 64.0, 0.5);
    WorldView {
        position,
        on_ground: true,
        blocks: vec![BlockView {
            name: "grass_block".to_string(),
            position: position.offset(0.0, -1.0, 0.0).floored(),
            diggable: true,
        }],
        ..Default::default()
    }
}

impl SimSession {
    /// A detached session with no event channel.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None, None))
    }

    /// A session plus the receiving end of its events.
    pub fn pair(options: SessionOptions) -> (Arc<Self>, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        (Arc::new(Self::build(Some(options), Some(tx))), rx)
    }

    fn build(options: Option<SessionOptions>, events: Option<mpsc::Sender<SessionEvent>>) -> Self {
        Self {
            options,
            events,
            sent: Mutex::new(VecDeque::new()),
            sent_total: AtomicU64::new(0),
            world: Mutex::new(Some(default_world())),
            closed: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> Option<&SessionOptions> {
        self.options.as_ref()
    }

    pub fn username(&self) -> &str {
        self.options.as_ref().map_or("", |o| o.username.as_str())
    }

    /// Inject a lifecycle event. Returns `false` if it could not be queued.
    pub fn emit(&self, event: SessionEvent) -> bool {
        match &self.events {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// The most recent outbound requests, oldest first.
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().iter().cloned().collect()
    }

    pub fn sent_total(&self) -> u64 {
        self.sent_total.load(Ordering::Relaxed)
    }

    pub fn set_world(&self, world: Option<WorldView>) {
        *self.world.lock() = world;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn record(&self, entry: Sent) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let mut sent = self.sent.lock();
        if sent.len() == SENT_HISTORY {
            sent.pop_front();
        }
        sent.push_back(entry);
        self.sent_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Session for SimSession {
    fn send_chat(&self, text: &str) -> Result<(), SessionError> {
        self.record(Sent::Chat(text.to_string()))
    }

    fn send_action(&self, action: Action) -> Result<(), SessionError> {
        self.record(Sent::Action(action))
    }

    fn world(&self) -> Option<WorldView> {
        self.world.lock().clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Hands out [`SimSession`]s.
pub struct SimulatedConnector {
    login_delay: Option<Duration>,
    fail_creates: AtomicBool,
    created: AtomicUsize,
    sessions: Mutex<Vec<Arc<SimSession>>>,
}

impl Default for SimulatedConnector {
    fn default() -> Self {
        Self::with_login_delay(Some(Duration::ZERO))
    }
}

impl SimulatedConnector {
    /// Sessions log in immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` leaves login to the caller (see [`SimSession::emit`]).
    pub fn with_login_delay(login_delay: Option<Duration>) -> Self {
        Self {
            login_delay,
            fail_creates: AtomicBool::new(false),
            created: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn manual() -> Self {
        Self::with_login_delay(None)
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::Relaxed);
    }

    /// Sessions created so far, including closed ones since pruned.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Sessions that are still open.
    pub fn open_sessions(&self) -> Vec<Arc<SimSession>> {
        self.sessions
            .lock()
            .iter()
            .filter(|s| !s.is_closed())
            .cloned()
            .collect()
    }

    pub fn session_for(&self, username: &str) -> Option<Arc<SimSession>> {
        self.sessions
            .lock()
            .iter()
            .find(|s| s.username() == username)
            .cloned()
    }
}

impl SessionConnector for SimulatedConnector {
    fn create(&self, options: SessionOptions) -> Result<SessionHandle, SessionError> {
        if self.fail_creates.load(Ordering::Relaxed) {
            return Err(SessionError::Create("simulated connector refused".into()));
        }
        trace!(username = %options.username, proxy = ?options.proxy, "simulated session");
        let (session, events) = SimSession::pair(options);
        self.created.fetch_add(1, Ordering::Relaxed);
        {
            let mut sessions = self.sessions.lock();
            sessions.retain(|s| !s.is_closed());
            sessions.push(Arc::clone(&session));
        }

        match self.login_delay {
            Some(delay) if delay.is_zero() => {
                session.emit(SessionEvent::Login);
            }
            Some(delay) => {
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if !session.is_closed() {
                        session.emit(SessionEvent::Login);
                    }
                });
            }
            None => {}
        }

        Ok(SessionHandle { session, events })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::session::{AuthMode, Hand};

    fn options(username: &str) -> SessionOptions {
        SessionOptions {
            host: "h".into(),
            port: 25565,
            username: username.into(),
            version: None,
            proxy: None,
            auth: AuthMode::Offline,
            connect_timeout: Duration::from_secs(120),
        }
    }

    #[tokio::test]
    async fn auto_login_is_queued() {
        let connector = SimulatedConnector::new();
        let mut handle = connector.create(options("a")).unwrap();
        assert_eq!(handle.events.recv().await, Some(SessionEvent::Login));
        assert_eq!(connector.created_count(), 1);
        assert!(connector.session_for("a").is_some());
    }

    #[tokio::test]
    async fn manual_connector_waits_for_emit() {
        let connector = SimulatedConnector::manual();
        let mut handle = connector.create(options("b")).unwrap();
        assert!(handle.events.try_recv().is_err());

        let session = connector.session_for("b").unwrap();
        assert!(session.emit(SessionEvent::Kicked("banned".into())));
        assert_eq!(
            handle.events.recv().await,
            Some(SessionEvent::Kicked("banned".into()))
        );
    }

    #[test]
    fn refused_creates() {
        let connector = SimulatedConnector::new();
        connector.set_fail_creates(true);
        assert!(matches!(
            connector.create(options("c")),
            Err(SessionError::Create(_))
        ));
        assert_eq!(connector.created_count(), 0);
    }

    #[test]
    fn closed_session_rejects_sends() {
        let session = SimSession::new();
        session.send_chat("hi").unwrap();
        assert!(!session.emit(SessionEvent::Login));
        session.close();
        assert_eq!(
            session.send_action(Action::Swing { hand: Hand::Left }),
            Err(SessionError::Closed)
        );
        assert_eq!(session.sent_total(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let session = SimSession::new();
        for i in 0..(SENT_HISTORY + 10) {
            session.send_chat(&i.to_string()).unwrap();
        }
        let sent = session.sent();
        assert_eq!(sent.len(), SENT_HISTORY);
        assert_eq!(sent[0], Sent::Chat("10".into()));
        assert_eq!(session.sent_total(), (SENT_HISTORY + 10) as u64);
    }

    #[test]
    fn default_world_has_ground() {
        let world = SimSession::new().world().unwrap();
        assert!(world.on_ground);
        assert_eq!(world.nearest_block().unwrap().position, Vec3::new(0.0, 63.0, 0.0));
    }
}
