use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover_core::events::{FleetEvent, TelemetrySnapshot};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::host::HostSampler;
use crate::traffic::TrafficCounters;

type LiveCount = Box<dyn Fn() -> usize + Send + Sync>;

/// Samples traffic once per window and publishes a [`FleetEvent::Traffic`].
pub struct TelemetryAggregator {
    counters: Arc<TrafficCounters>,
    latency_ms: Arc<AtomicU64>,
    live_agents: LiveCount,
    host: Mutex<HostSampler>,
    events: broadcast::Sender<FleetEvent>,
    last: RwLock<TelemetrySnapshot>,
}

impl TelemetryAggregator {
    pub fn new(
        counters: Arc<TrafficCounters>,
        live_agents: impl Fn() -> usize + Send + Sync + 'static,
        events: broadcast::Sender<FleetEvent>,
    ) -> Self {
        Self {
            counters,
            latency_ms: Arc::new(AtomicU64::new(0)),
            live_agents: Box::new(live_agents),
            host: Mutex::new(HostSampler::new()),
            events,
            last: RwLock::new(TelemetrySnapshot::default()),
        }
    }

    /// Cell the latency probe writes into.
    pub fn latency_cell(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.latency_ms)
    }

    /// Close the current window and publish it. Never blocks: a full or
    /// receiver-less channel just drops the snapshot.
    pub fn sample(&self) -> TelemetrySnapshot {
        let snapshot = TelemetrySnapshot {
            actions: self.counters.take_window(),
            agents: (self.live_agents)(),
            total_joins: self.counters.total_joins(),
            latency_ms: self.latency_ms.load(Ordering::Relaxed),
            timestamp: chrono::Utc::now().timestamp_millis(),
            performance: self.host.lock().sample(),
        };
        *self.last.write() = snapshot.clone();
        let _ = self.events.send(FleetEvent::Traffic(snapshot.clone()));
        snapshot
    }

    /// Most recent published snapshot.
    pub fn last(&self) -> TelemetrySnapshot {
        self.last.read().clone()
    }

    pub fn spawn(self: Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sample();
                    }
                }
            }
            tracing::debug!("telemetry aggregator stopped");
        })
    }
}

/// Measure scheduler delay every `period`: the time between yielding to the
/// runtime and being polled again.
pub fn spawn_latency_probe(
    latency_ms: Arc<AtomicU64>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let start = Instant::now();
                    tokio::task::yield_now().await;
                    let lag = start.elapsed().as_millis() as u64;
                    latency_ms.store(lag, Ordering::Relaxed);
                }
            }
        }
    })
}
