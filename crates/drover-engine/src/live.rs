use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashSet;
use drover_core::ids::AgentId;
use parking_lot::Mutex;

use crate::agent::Agent;

/// The live agents (pending, connecting and active), keyed by id.
///
/// Admission and removal take one lock, so the size check and the insert are
/// a single step. Usernames are mirrored in a lock-free roster for the
/// per-tick "is this one of ours" lookups.
#[derive(Default)]
pub struct LiveSet {
    agents: Mutex<HashMap<AgentId, Arc<Agent>>>,
    roster: DashSet<String>,
}

impl LiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new agent if `admit(current_len)` allows it. `make` receives
    /// the current length as the agent's ordinal.
    pub fn reserve(
        &self,
        admit: impl FnOnce(usize) -> bool,
        make: impl FnOnce(usize) -> Agent,
    ) -> Option<Arc<Agent>> {
        let mut agents = self.agents.lock();
        let live = agents.len();
        if !admit(live) {
            return None;
        }
        let agent = Arc::new(make(live));
        self.roster.insert(agent.username().to_string());
        agents.insert(agent.id().clone(), Arc::clone(&agent));
        Some(agent)
    }

    pub fn remove(&self, id: &AgentId) -> Option<Arc<Agent>> {
        let removed = self.agents.lock().remove(id);
        if let Some(agent) = &removed {
            self.roster.remove(agent.username());
        }
        removed
    }

    /// Empty the set in one step.
    pub fn drain(&self) -> Vec<Arc<Agent>> {
        let drained: Vec<_> = self.agents.lock().drain().map(|(_, a)| a).collect();
        self.roster.clear();
        drained
    }

    /// Remove the `n` most recently created agents.
    pub fn remove_newest(&self, n: usize) -> Vec<Arc<Agent>> {
        let mut agents = self.agents.lock();
        let mut newest: Vec<_> = agents.values().cloned().collect();
        newest.sort_by_key(|a| std::cmp::Reverse(a.seq()));
        newest.truncate(n);
        for agent in &newest {
            agents.remove(agent.id());
            self.roster.remove(agent.username());
        }
        newest
    }

    pub fn get(&self, id: &AgentId) -> Option<Arc<Agent>> {
        self.agents.lock().get(id).cloned()
    }

    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.agents.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        self.agents.lock().values().filter(|a| a.is_active()).count()
    }

    pub fn is_member(&self, username: &str) -> bool {
        self.roster.contains(username)
    }

    /// Up to `limit` usernames other than `exclude`.
    pub fn teammates(&self, exclude: &str, limit: usize) -> Vec<String> {
        self.roster
            .iter()
            .map(|u| u.key().clone())
            .filter(|u| u != exclude)
            .take(limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentSpec, DispatchContext};
    use crate::pause::PauseGate;
    use drover_telemetry::TrafficCounters;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn make(name: &str, seq: u64) -> impl FnOnce(usize) -> Agent + '_ {
        move |ordinal| {
            Agent::new(
                AgentSpec {
                    username: name.to_string(),
                    ordinal,
                    seq,
                    proxy: None,
                },
                DispatchContext::new(PauseGate::new(), Arc::new(TrafficCounters::new()), Duration::ZERO),
                CancellationToken::new(),
            )
        }
    }

    #[test]
    fn reserve_respects_admission() {
        let live = LiveSet::new();
        let a = live.reserve(|n| n < 1, make("a", 1)).unwrap();
        assert_eq!(a.ordinal(), 0);
        assert!(live.reserve(|n| n < 1, make("b", 2)).is_none());
        assert_eq!(live.len(), 1);
        assert!(live.is_member("a"));
        assert!(!live.is_member("b"));
    }

    #[test]
    fn ordinal_is_live_count() {
        let live = LiveSet::new();
        live.reserve(|_| true, make("a", 1));
        let b = live.reserve(|_| true, make("b", 2)).unwrap();
        assert_eq!(b.ordinal(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let live = LiveSet::new();
        let a = live.reserve(|_| true, make("a", 1)).unwrap();
        assert!(live.remove(a.id()).is_some());
        assert!(live.remove(a.id()).is_none());
        assert!(!live.is_member("a"));
        assert!(live.is_empty());
    }

    #[test]
    fn remove_newest_by_seq() {
        let live = LiveSet::new();
        for (name, seq) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            live.reserve(|_| true, make(name, seq));
        }
        let removed: Vec<_> = live
            .remove_newest(2)
            .iter()
            .map(|a| a.username().to_string())
            .collect();
        assert_eq!(removed, vec!["d", "c"]);
        assert_eq!(live.len(), 2);
        assert!(live.is_member("a") && !live.is_member("d"));
    }

    #[test]
    fn drain_empties_roster() {
        let live = LiveSet::new();
        live.reserve(|_| true, make("a", 1));
        live.reserve(|_| true, make("b", 2));
        assert_eq!(live.teammates("a", 5), vec!["b".to_string()]);
        assert_eq!(live.drain().len(), 2);
        assert!(live.is_empty());
        assert!(live.teammates("a", 5).is_empty());
    }
}
