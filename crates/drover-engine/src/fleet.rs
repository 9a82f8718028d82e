//! The fleet orchestrator.
//!
//! [`Fleet`] owns the configuration, the live set, the spawn scheduler and
//! the behavior engine, and turns operator commands into lifecycle changes.
//! Each agent gets one driver task that consumes its session events; all
//! state transitions for an agent happen on that task or under the one-shot
//! termination guard, so login is never observed after cleanup.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover_advisor::Advisor;
use drover_core::agent::{AgentState, TerminationCause};
use drover_core::config::{ConfigPatch, Intensity, StartRequest};
use drover_core::errors::ConfigError;
use drover_core::events::{FleetEvent, HealthStatus, LifecycleStatus, StatusSnapshot};
use drover_core::ids::ScriptRunId;
use drover_core::session::{AuthMode, SessionConnector, SessionEvent, SessionOptions};
use drover_settings::FleetSettings;
use drover_telemetry::{spawn_latency_probe, TelemetryAggregator, TrafficCounters};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::agent::{generate_username, Agent, AgentSpec, DispatchContext, INITIAL_HEALTH};
use crate::behavior::BehaviorEngine;
use crate::config::SharedConfig;
use crate::error::{ProxyError, ScriptError};
use crate::live::LiveSet;
use crate::pause::PauseGate;
use crate::proxy::{load_list, ProxyListKind, ProxyPool};
use crate::reconnect::ReconnectPolicy;
use crate::script::{self, Script, ScriptStore};
use crate::spawn::{SpawnPlan, SpawnScheduler};
use crate::tuning::{FleetTuner, TuneOutcome};
use crate::wheel::TickWheel;

#[derive(Clone, Debug)]
pub struct FleetOptions {
    pub settings: FleetSettings,
    /// Directory holding `http.txt`, `socks4.txt` and `socks5.txt`.
    pub proxy_dir: PathBuf,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            settings: FleetSettings::default(),
            proxy_dir: PathBuf::from("proxies"),
        }
    }
}

/// `run-script` parameters: a saved script name or inline content.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct RunScript {
    pub name: Option<String>,
    pub content: Option<String>,
}

/// Cheap handle to the fleet.
#[derive(Clone)]
pub struct Fleet {
    inner: Arc<FleetInner>,
}

struct FleetInner {
    connector: Arc<dyn SessionConnector>,
    config: SharedConfig,
    pool: RwLock<ProxyPool>,
    live: Arc<LiveSet>,
    scheduler: SpawnScheduler,
    behavior: BehaviorEngine,
    ctx: DispatchContext,
    running: AtomicBool,
    ai_active: AtomicBool,
    next_seq: AtomicU64,
    scripts: ScriptStore,
    aggregator: Arc<TelemetryAggregator>,
    tuner: FleetTuner,
    events: broadcast::Sender<FleetEvent>,
    settings: FleetSettings,
    proxy_dir: PathBuf,
    /// Parent of every per-agent token and of the tick wheel.
    shutdown: CancellationToken,
}

impl Fleet {
    /// Must be called inside a tokio runtime: the tick wheel task starts here.
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        advisor: Arc<Advisor>,
        events: broadcast::Sender<FleetEvent>,
        options: FleetOptions,
    ) -> Self {
        let FleetOptions { settings, proxy_dir } = options;
        let shutdown = CancellationToken::new();
        let config = SharedConfig::default();
        let live = Arc::new(LiveSet::new());
        let counters = Arc::new(TrafficCounters::new());
        let ctx = DispatchContext::new(
            PauseGate::new(),
            Arc::clone(&counters),
            Duration::from_millis(settings.stealth_jitter_ms),
        );

        let (wheel, _) = TickWheel::spawn(shutdown.child_token());
        let behavior = BehaviorEngine::new(wheel, config.clone(), Arc::clone(&advisor), Arc::clone(&live));

        let live_for_telemetry = Arc::clone(&live);
        let aggregator = Arc::new(TelemetryAggregator::new(
            counters,
            move || live_for_telemetry.len(),
            events.clone(),
        ));
        let tuner = FleetTuner::new(config.clone(), advisor, Arc::clone(&aggregator));

        Self {
            inner: Arc::new(FleetInner {
                connector,
                config,
                pool: RwLock::new(ProxyPool::default()),
                live,
                scheduler: SpawnScheduler::new(SpawnPlan::from(&settings)),
                behavior,
                ctx,
                running: AtomicBool::new(false),
                ai_active: AtomicBool::new(false),
                next_seq: AtomicU64::new(0),
                scripts: ScriptStore::new(),
                aggregator,
                tuner,
                events,
                settings,
                proxy_dir,
                shutdown,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.inner.status()
    }

    pub fn publish_status(&self) {
        self.inner.publish_status();
    }

    pub fn live_count(&self) -> usize {
        self.inner.live.len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.ctx.pause.is_paused()
    }

    pub fn config(&self) -> SharedConfig {
        self.inner.config.clone()
    }

    pub fn counters(&self) -> Arc<TrafficCounters> {
        Arc::clone(&self.inner.ctx.counters)
    }

    pub fn aggregator(&self) -> Arc<TelemetryAggregator> {
        Arc::clone(&self.inner.aggregator)
    }

    /// Replace the running fleet: stop, reset counters, apply the request
    /// (intensity defaults to 5) and schedule `count` staggered spawns.
    pub fn start(&self, request: StartRequest) {
        let inner = &self.inner;
        inner.halt();
        inner.ctx.counters.reset();
        inner.config.update(|c| c.intensity = Intensity::default());
        let rejected = inner.apply_patch(&request.config);
        inner.publish_rejections(rejected);
        inner.ai_active.store(request.ai_active, Ordering::Release);
        inner.ctx.stealth.store(request.stealth_mode, Ordering::Relaxed);

        let config = inner.config.snapshot();
        inner.running.store(true, Ordering::Release);
        info!(
            count = config.count,
            host = %config.host,
            port = config.port,
            mode = %config.mode,
            intensity = config.intensity.get(),
            proxies = config.proxies.len(),
            ai = request.ai_active,
            stealth = request.stealth_mode,
            "fleet starting"
        );
        inner.spawn_batch(config.count as usize);
        inner.publish_status();
    }

    /// Apply a partial configuration. A changed `count` resizes a running
    /// fleet; a changed mode applies to agents that log in afterwards.
    pub fn update_config(&self, patch: ConfigPatch) {
        let inner = &self.inner;
        let before = inner.config.desired();
        let rejected = inner.apply_patch(&patch);
        inner.publish_rejections(rejected);
        let after = inner.config.desired();

        if inner.running.load(Ordering::Acquire) && after != before {
            info!(from = before, to = after, "resizing fleet");
            if after < before {
                inner.shrink(after as usize);
            }
            inner.fill();
        }
        inner.publish_status();
    }

    pub fn toggle_ai(&self, enabled: bool) {
        self.inner.ai_active.store(enabled, Ordering::Release);
        info!(enabled, "ai control toggled");
        self.inner.publish_status();
    }

    pub fn pause(&self) {
        if self.inner.ctx.pause.pause() {
            info!("fleet paused");
        }
        self.inner.publish(FleetEvent::PauseStatus { is_paused: true });
        self.inner.publish_status();
    }

    pub fn resume(&self) {
        if self.inner.ctx.pause.resume() {
            info!("fleet resumed");
        }
        self.inner.publish(FleetEvent::PauseStatus { is_paused: false });
        self.inner.publish_status();
    }

    /// Cancel pending spawns, clear the live set, close every session.
    /// Publishes exactly one status snapshot.
    pub fn stop(&self) {
        self.inner.halt();
        self.inner.publish_status();
    }

    /// Send `text` from every active agent. Returns how many sent it.
    pub fn broadcast_chat(&self, text: &str) -> usize {
        let text = text.trim();
        if text.is_empty() {
            return 0;
        }
        let sent = self
            .inner
            .live
            .agents()
            .iter()
            .filter(|a| a.chat(text))
            .count();
        debug!(sent, "broadcast chat");
        sent
    }

    /// Replace the proxy list from `<proxy_dir>/<kind>.txt`. On any failure
    /// the previous list stays.
    pub async fn load_proxies(&self, kind: &str) -> Result<usize, ProxyError> {
        let inner = &self.inner;
        let result = match ProxyListKind::parse(kind) {
            Ok(kind) => load_list(&inner.proxy_dir, kind).await.map(|list| (kind, list)),
            Err(e) => Err(e),
        };
        match result {
            Ok((kind, list)) => {
                let count = list.len();
                inner.config.update(|c| c.proxies = list.clone());
                inner.refresh_pool();
                info!(count, kind = kind.as_str(), "proxy list loaded");
                inner.publish(FleetEvent::ProxyLoaded {
                    count,
                    proxy_type: kind.as_str().to_string(),
                    list,
                });
                inner.publish_status();
                Ok(count)
            }
            Err(e) => {
                warn!(kind, error = %e, "proxy list not loaded");
                inner.publish_status();
                Err(e)
            }
        }
    }

    pub fn save_script(&self, name: &str, content: &str) -> Result<(), ScriptError> {
        match self.inner.scripts.save(name, content) {
            Ok(script) => {
                self.inner.publish(FleetEvent::ScriptSaved {
                    name: script.name.clone(),
                });
                Ok(())
            }
            Err(e) => {
                self.inner.publish_script_error(name, &e);
                Err(e)
            }
        }
    }

    /// Run a saved or inline script on every live agent.
    pub fn run_script(&self, request: RunScript) -> Result<ScriptRunId, ScriptError> {
        let label = request.name.clone().unwrap_or_else(|| "inline".to_string());
        let resolved: Result<Arc<Script>, ScriptError> = match (&request.content, &request.name) {
            (Some(content), _) => script::parse(&label, content).map(Arc::new),
            (None, Some(name)) => self.inner.scripts.get(name),
            (None, None) => Err(ScriptError::InvalidName),
        };
        match resolved {
            Ok(script) => {
                let agents = self.inner.live.agents();
                info!(script = %script.name, agents = agents.len(), "running script");
                Ok(script::run(script, agents))
            }
            Err(e) => {
                self.inner.publish_script_error(&label, &e);
                Err(e)
            }
        }
    }

    /// Start the telemetry sampler, latency probe and tuning loop.
    pub fn spawn_background(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let settings = &self.inner.settings;
        let window = Duration::from_millis(settings.telemetry_interval_ms.max(1));
        let aggregator = Arc::clone(&self.inner.aggregator);
        vec![
            spawn_latency_probe(aggregator.latency_cell(), window, cancel.clone()),
            aggregator.spawn(window, cancel.clone()),
            self.spawn_tuning(
                Duration::from_millis(settings.tuning_interval_ms.max(1)),
                cancel,
            ),
        ]
    }

    fn spawn_tuning(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => inner.tune_once().await,
                }
            }
            debug!("tuning loop stopped");
        })
    }

    /// Stop the fleet and its internal tasks.
    pub fn shutdown(&self) {
        self.inner.halt();
        self.inner.shutdown.cancel();
    }
}

impl FleetInner {
    fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            count: self.live.len(),
            active: self.live.active_count(),
            config: self.config.snapshot(),
            is_paused: self.ctx.pause.is_paused(),
            ai_active: self.ai_active.load(Ordering::Acquire),
        }
    }

    fn publish(&self, event: FleetEvent) {
        trace!(event = event.event_type(), "publish");
        let _ = self.events.send(event);
    }

    fn publish_status(&self) {
        self.publish(FleetEvent::Status(self.status()));
    }

    fn publish_rejections(&self, rejected: Vec<ConfigError>) {
        for e in rejected {
            warn!(field = e.field(), error = %e, "config value rejected");
            self.publish(FleetEvent::ConfigRejected {
                field: e.field().to_string(),
                reason: e.to_string(),
            });
        }
    }

    fn publish_script_error(&self, name: &str, e: &ScriptError) {
        warn!(script = name, error = %e, "script rejected");
        self.publish(FleetEvent::ScriptError {
            name: name.to_string(),
            line: e.line(),
            message: e.to_string(),
        });
    }

    fn health_status(&self) -> HealthStatus {
        if self.ctx.pause.is_paused() {
            HealthStatus::Idle
        } else {
            HealthStatus::Engaged
        }
    }

    /// Apply a patch in one write; a new proxy list is normalized in the
    /// same write.
    fn apply_patch(&self, patch: &ConfigPatch) -> Vec<ConfigError> {
        let rejected = self.config.update(|c| {
            let rejected = c.apply(patch);
            if patch.proxies.is_some() {
                c.proxies = ProxyPool::from_list(&c.proxies).endpoints().to_vec();
            }
            rejected
        });
        if patch.proxies.is_some() {
            self.refresh_pool();
        }
        rejected
    }

    fn refresh_pool(&self) {
        let proxies = self.config.snapshot().proxies;
        *self.pool.write() = ProxyPool::from_list(&proxies);
    }

    /// Stop without publishing: used by `stop` and `start`.
    fn halt(&self) {
        self.running.store(false, Ordering::Release);
        self.ctx.pause.resume();
        let cancelled = self.scheduler.cancel_all();
        let agents = self.live.drain();
        for agent in &agents {
            if agent.mark_terminated() {
                agent.shutdown();
                self.behavior.stop(agent.id());
            }
        }
        if cancelled > 0 || !agents.is_empty() {
            info!(pending = cancelled, agents = agents.len(), "fleet stopped");
        }
    }

    /// Cancel pending spawns and retire the newest agents above `desired`.
    fn shrink(&self, desired: usize) {
        self.scheduler.cancel_all();
        let surplus = self.live.len().saturating_sub(desired);
        for agent in self.live.remove_newest(surplus) {
            if agent.mark_terminated() {
                agent.shutdown();
                self.behavior.stop(agent.id());
                debug!(agent = %agent.username(), cause = %TerminationCause::Retired, "agent retired");
                self.publish(FleetEvent::AgentStatus {
                    username: agent.username().to_string(),
                    status: LifecycleStatus::Disconnected,
                });
            }
        }
    }

    async fn tune_once(&self) {
        let ai_active = self.ai_active.load(Ordering::Acquire);
        match self.tuner.tune_once(ai_active, self.live.len()).await {
            TuneOutcome::Applied(suggestion) => {
                self.publish(FleetEvent::AdvisorLog {
                    msg: format!("advisor tuning applied: {}", suggestion.reason),
                    settings: serde_json::to_value(&suggestion).ok(),
                });
                self.publish_status();
            }
            TuneOutcome::Skipped(reason) => trace!(reason, "tuning skipped"),
            TuneOutcome::Failed(e) => debug!(error = %e, "tuning suggestion discarded"),
        }
    }

    // Spawn and lifecycle paths need an owning handle: timers and driver
    // tasks outlive the call.

    fn spawn_batch(self: &Arc<Self>, count: usize) {
        if count == 0 {
            return;
        }
        let inner = Arc::clone(self);
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.scheduler
            .schedule_batch(count, Arc::new(move |generation: &CancellationToken| inner.spawn_agent(generation)));
    }

    /// Schedule spawns for the gap between desired and live plus pending.
    fn fill(self: &Arc<Self>) {
        let desired = self.config.desired() as usize;
        let missing = desired.saturating_sub(self.live.len() + self.scheduler.pending());
        self.spawn_batch(missing);
    }

    fn spawn_agent(self: &Arc<Self>, generation: &CancellationToken) {
        let config = self.config.snapshot();
        let desired = config.count as usize;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let admitted = self.live.reserve(
            |live| !generation.is_cancelled() && self.running.load(Ordering::Acquire) && live < desired,
            |ordinal| {
                let username = generate_username(&config.username, ordinal, &mut rand::thread_rng());
                let proxy = self.pool.read().assign(ordinal).map(str::to_string);
                Agent::new(
                    AgentSpec {
                        username,
                        ordinal,
                        seq,
                        proxy,
                    },
                    self.ctx.clone(),
                    self.shutdown.child_token(),
                )
            },
        );
        let Some(agent) = admitted else {
            trace!(live = self.live.len(), desired, "spawn dropped");
            return;
        };

        let options = SessionOptions {
            host: config.host.clone(),
            port: config.port,
            username: agent.username().to_string(),
            version: config.version.clone(),
            proxy: agent.proxy().map(str::to_string),
            auth: AuthMode::Offline,
            connect_timeout: Duration::from_millis(self.settings.connect_timeout_ms),
        };
        debug!(
            agent = %agent.username(),
            ordinal = agent.ordinal(),
            proxy = ?agent.proxy(),
            "creating session"
        );

        match self.connector.create(options) {
            Ok(handle) => {
                if !agent.attach(Arc::clone(&handle.session)) {
                    handle.session.close();
                    return;
                }
                self.drive(agent, handle.events);
            }
            Err(e) => {
                warn!(agent = %agent.username(), error = %e, "session creation failed");
                self.terminate(&agent, TerminationCause::CreateFailed(e.to_string()));
            }
        }
    }

    fn drive(self: &Arc<Self>, agent: Arc<Agent>, mut events: mpsc::Receiver<SessionEvent>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    () = agent.cancel_token().cancelled() => break,
                    event = events.recv() => event.unwrap_or(SessionEvent::Closed),
                };
                match event {
                    SessionEvent::Login => inner.on_login(&agent),
                    SessionEvent::Health(value) => inner.on_health(&agent, value),
                    terminal => {
                        if let Some(cause) = TerminationCause::from_event(&terminal) {
                            inner.terminate(&agent, cause);
                        }
                        break;
                    }
                }
            }
            trace!(agent = %agent.username(), "driver stopped");
        });
    }

    fn on_login(self: &Arc<Self>, agent: &Arc<Agent>) {
        if !agent.transition(AgentState::Active) {
            return;
        }
        agent.set_health(INITIAL_HEALTH);
        self.ctx.counters.record_join();
        info!(agent = %agent.username(), proxy = ?agent.proxy(), "agent joined");
        self.publish(FleetEvent::AgentStatus {
            username: agent.username().to_string(),
            status: LifecycleStatus::Joined,
        });
        self.publish(FleetEvent::AgentHealth {
            username: agent.username().to_string(),
            health: INITIAL_HEALTH,
            status: self.health_status(),
        });
        self.publish_status();
        self.behavior.start(agent);
    }

    fn on_health(&self, agent: &Agent, health: f32) {
        agent.set_health(health);
        self.publish(FleetEvent::AgentHealth {
            username: agent.username().to_string(),
            health,
            status: self.health_status(),
        });
    }

    fn terminate(self: &Arc<Self>, agent: &Arc<Agent>, cause: TerminationCause) {
        if !agent.mark_terminated() {
            return;
        }
        agent.shutdown();
        self.behavior.stop(agent.id());
        if self.live.remove(agent.id()).is_none() {
            return;
        }
        info!(agent = %agent.username(), cause = %cause, kind = cause.kind(), "agent terminated");
        self.publish(FleetEvent::AgentStatus {
            username: agent.username().to_string(),
            status: LifecycleStatus::Disconnected,
        });
        self.publish_status();

        let config = self.config.snapshot();
        let running = self.running.load(Ordering::Acquire);
        if !running || config.count == 0 || self.ctx.pause.is_paused() {
            return;
        }
        let join_delay = Duration::from_millis(config.join_delay_ms);
        if let Some(delay) = ReconnectPolicy::replacement_delay(&cause, join_delay) {
            debug!(agent = %agent.username(), delay_ms = delay.as_millis() as u64, "replacement scheduled");
            let inner = Arc::clone(self);
            self.scheduler.schedule_after(
                delay,
                Arc::new(move |generation: &CancellationToken| inner.spawn_agent(generation)),
            );
        }
    }
}
