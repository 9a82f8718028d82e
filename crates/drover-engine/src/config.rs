use std::sync::Arc;

use drover_core::config::{ConfigPatch, FleetConfig, Intensity, Mode};
use drover_core::errors::ConfigError;
use parking_lot::RwLock;

/// The fleet's single configuration, shared by the orchestrator, behavior
/// ticks and the tuning loop. Every write replaces fields under one lock, so
/// readers never observe a half-applied patch.
#[derive(Clone, Debug, Default)]
pub struct SharedConfig(Arc<RwLock<FleetConfig>>);

impl SharedConfig {
    pub fn new(config: FleetConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    pub fn snapshot(&self) -> FleetConfig {
        self.0.read().clone()
    }

    /// The two fields behavior ticks read on every tick.
    pub fn pacing(&self) -> (Mode, Intensity) {
        let config = self.0.read();
        (config.mode, config.intensity)
    }

    pub fn desired(&self) -> u32 {
        self.0.read().count
    }

    /// Apply a patch atomically; returns the rejected fields.
    pub fn apply_patch(&self, patch: &ConfigPatch) -> Vec<ConfigError> {
        self.0.write().apply(patch)
    }

    /// Read-modify-write under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut FleetConfig) -> R) -> R {
        f(&mut self.0.write())
    }
}
