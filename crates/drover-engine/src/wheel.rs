//! Single-task timer queue for per-agent behavior ticks.
//!
//! Every active agent owns at most one slot keyed by its id. The wheel runs
//! one tokio task holding a min-heap of deadlines; removing an agent drops its
//! slot and any heap entries for it are skipped when they come due.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover_core::ids::AgentId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Periodic work run on the wheel task. `tick` must not block: anything that
/// awaits spawns its own task.
pub trait TickTask: Send + Sync {
    /// Run one tick. Returns the delay to the next tick, or `None` to stop.
    fn tick(&self) -> Option<Duration>;
}

enum Command {
    Insert {
        id: AgentId,
        delay: Duration,
        task: Arc<dyn TickTask>,
    },
    Remove(AgentId),
}

struct Slot {
    task: Arc<dyn TickTask>,
    seq: u64,
}

/// Handle to the wheel task. Cheap to clone.
#[derive(Clone)]
pub struct TickWheel {
    tx: mpsc::UnboundedSender<Command>,
    slots: Arc<AtomicUsize>,
}

impl TickWheel {
    pub fn spawn(cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let slots = Arc::new(AtomicUsize::new(0));
        let handle = tokio::spawn(run(rx, Arc::clone(&slots), cancel));
        (Self { tx, slots }, handle)
    }

    /// Schedule `task` for `id`, replacing any existing slot. The first tick
    /// runs after `delay`.
    pub fn insert(&self, id: AgentId, delay: Duration, task: Arc<dyn TickTask>) {
        let _ = self.tx.send(Command::Insert { id, delay, task });
    }

    /// Remove all scheduled work for `id`.
    pub fn remove(&self, id: &AgentId) {
        let _ = self.tx.send(Command::Remove(id.clone()));
    }

    /// Slots currently scheduled, as last seen by the wheel task.
    pub fn len(&self) -> usize {
        self.slots.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Command>,
    size: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    let mut heap: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();
    let mut due: HashMap<u64, AgentId> = HashMap::new();
    let mut slots: HashMap<AgentId, Slot> = HashMap::new();
    let mut next_seq: u64 = 0;

    loop {
        let deadline = heap.peek().map(|Reverse((at, _))| *at);
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            cmd = rx.recv() => match cmd {
                None => break,
                Some(Command::Insert { id, delay, task }) => {
                    next_seq += 1;
                    heap.push(Reverse((Instant::now() + delay, next_seq)));
                    due.insert(next_seq, id.clone());
                    slots.insert(id, Slot { task, seq: next_seq });
                }
                Some(Command::Remove(id)) => {
                    slots.remove(&id);
                }
            },
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                let now = Instant::now();
                while let Some(Reverse((at, seq))) = heap.peek().copied() {
                    if at > now {
                        break;
                    }
                    heap.pop();
                    let Some(id) = due.remove(&seq) else { continue };
                    let Some(slot) = slots.get_mut(&id) else { continue };
                    if slot.seq != seq {
                        trace!(agent = %id, "skipping stale tick");
                        continue;
                    }
                    match slot.task.tick() {
                        Some(delay) => {
                            next_seq += 1;
                            slot.seq = next_seq;
                            heap.push(Reverse((now + delay, next_seq)));
                            due.insert(next_seq, id);
                        }
                        None => {
                            slots.remove(&id);
                        }
                    }
                }
            }
        }
        size.store(slots.len(), Ordering::Release);
    }

    size.store(0, Ordering::Release);
    debug!("tick wheel stopped");
}
