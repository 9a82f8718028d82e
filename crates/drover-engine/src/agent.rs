//! One managed session plus its dispatch path.
//!
//! The agent owns its session exclusively. Everything outbound goes through
//! [`Agent::chat`] and [`Agent::act`], which consult the pause gate and count
//! the action for telemetry. State transitions are compare-and-swap on an
//! atomic so `Terminated` is reached exactly once.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use drover_core::agent::AgentState;
use drover_core::ids::AgentId;
use drover_core::session::{Action, Session, WorldView};
use drover_telemetry::TrafficCounters;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pause::PauseGate;

/// Usernames longer than this are rejected by the target server.
pub const MAX_USERNAME_LEN: usize = 16;
/// Health reported on login, before the server sends an update.
pub const INITIAL_HEALTH: f32 = 20.0;

/// `{template}_{ordinal}_{5 random digits}`, truncated to 16 characters.
pub fn generate_username<R: Rng + ?Sized>(template: &str, ordinal: usize, rng: &mut R) -> String {
    let suffix: u32 = rng.gen_range(10_000..=99_999);
    format!("{template}_{ordinal}_{suffix}")
        .chars()
        .take(MAX_USERNAME_LEN)
        .collect()
}

/// Fleet-wide state every agent dispatches through.
#[derive(Clone, Debug)]
pub struct DispatchContext {
    pub pause: PauseGate,
    pub counters: Arc<TrafficCounters>,
    /// Delay each chat line by a random amount up to `stealth_jitter`.
    pub stealth: Arc<AtomicBool>,
    pub stealth_jitter: Duration,
}

impl DispatchContext {
    pub fn new(pause: PauseGate, counters: Arc<TrafficCounters>, stealth_jitter: Duration) -> Self {
        Self {
            pause,
            counters,
            stealth: Arc::new(AtomicBool::new(false)),
            stealth_jitter,
        }
    }
}

/// Identity assigned when the slot is reserved.
#[derive(Clone, Debug)]
pub struct AgentSpec {
    pub username: String,
    pub ordinal: usize,
    /// Monotonic creation order; resize retires the highest first.
    pub seq: u64,
    pub proxy: Option<String>,
}

pub struct Agent {
    id: AgentId,
    spec: AgentSpec,
    state: AtomicU8,
    health: AtomicU32,
    session: OnceLock<Arc<dyn Session>>,
    cancel: CancellationToken,
    ctx: DispatchContext,
}

impl Agent {
    pub fn new(spec: AgentSpec, ctx: DispatchContext, cancel: CancellationToken) -> Self {
        Self {
            id: AgentId::new(),
            spec,
            state: AtomicU8::new(AgentState::Pending as u8),
            health: AtomicU32::new(INITIAL_HEALTH.to_bits()),
            session: OnceLock::new(),
            cancel,
            ctx,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn username(&self) -> &str {
        &self.spec.username
    }

    pub fn ordinal(&self) -> usize {
        self.spec.ordinal
    }

    pub fn seq(&self) -> u64 {
        self.spec.seq
    }

    pub fn proxy(&self) -> Option<&str> {
        self.spec.proxy.as_deref()
    }

    pub fn state(&self) -> AgentState {
        AgentState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(AgentState::Terminated)
    }

    pub fn is_active(&self) -> bool {
        self.state() == AgentState::Active
    }

    pub fn health(&self) -> f32 {
        f32::from_bits(self.health.load(Ordering::Relaxed))
    }

    pub fn set_health(&self, value: f32) {
        self.health.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Cancelled when the agent terminates. Per-agent tasks select on it.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        self.session.get()
    }

    pub fn context(&self) -> &DispatchContext {
        &self.ctx
    }

    /// Move to `next` if the transition is legal from the current state.
    pub fn transition(&self, next: AgentState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let legal = AgentState::from_u8(current).is_some_and(|s| s.can_transition_to(next));
            if !legal {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Bind the created session and enter `Connecting`. Returns `false` if
    /// the agent was terminated meanwhile; the caller must close the session.
    pub fn attach(&self, session: Arc<dyn Session>) -> bool {
        if self.session.set(session).is_err() {
            return false;
        }
        self.transition(AgentState::Connecting)
    }

    /// One-shot guard for cleanup: only the first caller gets `true`.
    pub fn mark_terminated(&self) -> bool {
        self.transition(AgentState::Terminated)
    }

    /// Cancel per-agent tasks and release the session. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(session) = self.session.get() {
            session.close();
        }
    }

    fn may_dispatch(&self) -> bool {
        !self.ctx.pause.is_paused() && self.is_active() && !self.cancel.is_cancelled()
    }

    /// Send one chat line. With stealth pacing on, the line goes out after a
    /// random delay on its own task. Returns whether it was sent or queued.
    pub fn chat(self: &Arc<Self>, text: &str) -> bool {
        if !self.may_dispatch() {
            return false;
        }
        let max = self.ctx.stealth_jitter.as_millis() as u64;
        if self.ctx.stealth.load(Ordering::Relaxed) && max > 0 {
            let delay = Duration::from_millis(rand::thread_rng().gen_range(0..max));
            let agent = Arc::clone(self);
            let text = text.to_string();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    () = agent.cancel.cancelled() => {}
                    () = tokio::time::sleep(delay) => {
                        if agent.may_dispatch() {
                            agent.send_chat_now(&text);
                        }
                    }
                }
            });
            return true;
        }
        self.send_chat_now(text)
    }

    fn send_chat_now(&self, text: &str) -> bool {
        let Some(session) = self.session.get() else {
            return false;
        };
        match session.send_chat(text) {
            Ok(()) => {
                self.ctx.counters.record_actions(1);
                true
            }
            Err(e) => {
                debug!(agent = %self.spec.username, error = %e, "chat not sent");
                false
            }
        }
    }

    /// Send one low-level action.
    pub fn act(&self, action: Action) -> bool {
        if !self.may_dispatch() {
            return false;
        }
        let Some(session) = self.session.get() else {
            return false;
        };
        let name = action.name();
        match session.send_action(action) {
            Ok(()) => {
                self.ctx.counters.record_actions(1);
                true
            }
            Err(e) => {
                debug!(agent = %self.spec.username, action = name, error = %e, "action not sent");
                false
            }
        }
    }

    /// Send a burst of actions, stopping at the first refused one. Returns
    /// how many went out.
    pub fn act_all(&self, actions: impl IntoIterator<Item = Action>) -> usize {
        let mut sent = 0;
        for action in actions {
            if !self.act(action) {
                break;
            }
            sent += 1;
        }
        sent
    }

    pub fn world(&self) -> Option<WorldView> {
        self.session.get().and_then(|s| s.world())
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("username", &self.spec.username)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Sent, SimSession};
    use drover_core::session::Hand;

    fn ctx() -> DispatchContext {
        DispatchContext::new(
            PauseGate::new(),
            Arc::new(TrafficCounters::new()),
            Duration::from_millis(2000),
        )
    }

    fn agent(ctx: DispatchContext) -> Arc<Agent> {
        Arc::new(Agent::new(
            AgentSpec {
                username: "drover_0_12345".into(),
                ordinal: 0,
                seq: 1,
                proxy: None,
            },
            ctx,
            CancellationToken::new(),
        ))
    }

    fn active(ctx: DispatchContext) -> (Arc<Agent>, Arc<SimSession>) {
        let agent = agent(ctx);
        let session = SimSession::new();
        assert!(agent.attach(session.clone()));
        assert!(agent.transition(AgentState::Active));
        (agent, session)
    }

    #[test]
    fn username_shape() {
        let mut rng = rand::thread_rng();
        let name = generate_username("bot", 3, &mut rng);
        assert!(name.starts_with("bot_3_"));
        assert_eq!(name.len(), 11);

        let long = generate_username("averyverylongname", 120, &mut rng);
        assert_eq!(long.chars().count(), MAX_USERNAME_LEN);
    }

    #[test]
    fn lifecycle_is_one_shot() {
        let (agent, _session) = active(ctx());
        assert!(agent.mark_terminated());
        assert!(!agent.mark_terminated());
        assert_eq!(agent.state(), AgentState::Terminated);
        assert!(!agent.transition(AgentState::Active));
    }

    #[test]
    fn attach_after_termination_fails() {
        let agent = agent(ctx());
        assert!(agent.mark_terminated());
        assert!(!agent.attach(SimSession::new()));
    }

    #[test]
    fn dispatch_counts_actions() {
        let c = ctx();
        let counters = Arc::clone(&c.counters);
        let (agent, session) = active(c);

        assert!(agent.chat("hello"));
        assert_eq!(
            agent.act_all([
                Action::Swing { hand: Hand::Right },
                Action::Swing { hand: Hand::Left },
            ]),
            2
        );
        assert_eq!(counters.window_actions(), 3);
        assert_eq!(session.sent().len(), 3);
        assert_eq!(session.sent()[0], Sent::Chat("hello".into()));
    }

    #[test]
    fn pause_suppresses_dispatch() {
        let c = ctx();
        let counters = Arc::clone(&c.counters);
        c.pause.pause();
        let (agent, session) = active(c);

        assert!(!agent.chat("x"));
        assert!(!agent.act(Action::Swing { hand: Hand::Right }));
        assert_eq!(counters.window_actions(), 0);
        assert!(session.sent().is_empty());
        assert!(agent.is_active());
    }

    #[test]
    fn connecting_agent_does_not_dispatch() {
        let agent = agent(ctx());
        let session = SimSession::new();
        agent.attach(session.clone());
        assert!(!agent.act(Action::Swing { hand: Hand::Left }));
        assert!(session.sent().is_empty());
    }

    #[test]
    fn shutdown_closes_session() {
        let (agent, session) = active(ctx());
        agent.shutdown();
        assert!(session.is_closed());
        assert!(agent.cancel_token().is_cancelled());
        assert!(!agent.act(Action::Swing { hand: Hand::Left }));
    }

    #[tokio::test(start_paused = true)]
    async fn stealth_chat_is_delayed() {
        let c = ctx();
        c.stealth.store(true, Ordering::Relaxed);
        let (agent, session) = active(c);

        assert!(agent.chat("later"));
        assert!(session.sent().is_empty());
        tokio::time::sleep(Duration::from_millis(2001)).await;
        assert_eq!(session.sent(), vec![Sent::Chat("later".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn stealth_chat_dropped_on_shutdown() {
        let c = ctx();
        c.stealth.store(true, Ordering::Relaxed);
        let (agent, session) = active(c);

        agent.chat("never");
        agent.shutdown();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(session.sent().is_empty());
    }
}
