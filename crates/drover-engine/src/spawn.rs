//! Staggered spawn timers.
//!
//! Attempts are released in batches: `batch_size` attempts per batch, batches
//! `batch_stagger` apart, slots inside a batch `slot_stagger` apart plus a
//! little jitter. Every timer belongs to the current generation token, so a
//! stop or downward resize cancels all of them with one call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover_settings::FleetSettings;
use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Largest delay a timer accepts (`i32::MAX` milliseconds).
pub const MAX_SPAWN_DELAY: Duration = Duration::from_millis(i32::MAX as u64);

/// Callback run when a timer fires. Receives the generation token the timer
/// was scheduled under so the callee can re-check it under its own lock.
pub type SpawnFn = Arc<dyn Fn(&CancellationToken) + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnPlan {
    pub batch_size: u32,
    pub batch_stagger: Duration,
    pub slot_stagger: Duration,
    pub max_jitter: Duration,
}

impl Default for SpawnPlan {
    fn default() -> Self {
        Self::from(&FleetSettings::default())
    }
}

impl From<&FleetSettings> for SpawnPlan {
    fn from(s: &FleetSettings) -> Self {
        Self {
            batch_size: s.batch_size.max(1),
            batch_stagger: Duration::from_millis(s.batch_stagger_ms),
            slot_stagger: Duration::from_millis(s.slot_stagger_ms),
            max_jitter: Duration::from_millis(s.spawn_jitter_ms),
        }
    }
}

impl SpawnPlan {
    /// Delay for the `index`-th attempt of a batch run, given its jitter.
    pub fn delay_for(&self, index: u32, jitter: Duration) -> Duration {
        let batch_size = self.batch_size.max(1);
        let batch = index / batch_size;
        let slot = index % batch_size;
        let raw = self
            .batch_stagger
            .saturating_mul(batch)
            .saturating_add(self.slot_stagger.saturating_mul(slot))
            .saturating_add(jitter);
        raw.min(MAX_SPAWN_DELAY)
    }

    pub fn sample_delay<R: Rng + ?Sized>(&self, index: u32, rng: &mut R) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        let jitter = if max == 0 { 0 } else { rng.gen_range(0..max) };
        self.delay_for(index, Duration::from_millis(jitter))
    }
}

pub struct SpawnScheduler {
    plan: SpawnPlan,
    generation: Mutex<CancellationToken>,
    pending: Arc<AtomicUsize>,
}

impl SpawnScheduler {
    pub fn new(plan: SpawnPlan) -> Self {
        Self {
            plan,
            generation: Mutex::new(CancellationToken::new()),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn plan(&self) -> &SpawnPlan {
        &self.plan
    }

    /// Timers that have neither fired nor been cancelled yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Schedule `count` staggered attempts.
    pub fn schedule_batch(&self, count: u32, on_fire: SpawnFn) {
        let token = self.generation.lock().clone();
        let delays: Vec<Duration> = {
            let mut rng = rand::thread_rng();
            (0..count).map(|i| self.plan.sample_delay(i, &mut rng)).collect()
        };
        debug!(count, "scheduling spawn batch");
        for delay in delays {
            self.spawn_timer(token.clone(), delay, Arc::clone(&on_fire));
        }
    }

    /// Schedule one attempt after `delay`.
    pub fn schedule_after(&self, delay: Duration, on_fire: SpawnFn) {
        let token = self.generation.lock().clone();
        self.spawn_timer(token, delay.min(MAX_SPAWN_DELAY), on_fire);
    }

    /// Cancel every pending timer and start a fresh generation. Returns how
    /// many timers were pending.
    pub fn cancel_all(&self) -> usize {
        let mut generation = self.generation.lock();
        generation.cancel();
        *generation = CancellationToken::new();
        self.pending()
    }

    fn spawn_timer(&self, token: CancellationToken, delay: Duration, on_fire: SpawnFn) {
        let pending = Arc::clone(&self.pending);
        pending.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if !token.is_cancelled() {
                        on_fire(&token);
                    }
                }
            }
            pending.fetch_sub(1, Ordering::AcqRel);
        });
    }
}
