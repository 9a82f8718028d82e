use serde::{Deserialize, Serialize};

/// Timing knobs for spawning, tuning and telemetry.
///
/// Defaults reproduce the stock pacing: batches of 5, 2 s between batches,
/// 300 ms between slots within a batch plus up to 200 ms of jitter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FleetSettings {
    pub batch_size: u32,
    pub batch_stagger_ms: u64,
    pub slot_stagger_ms: u64,
    pub spawn_jitter_ms: u64,
    /// Session connect timeout handed to the connector.
    pub connect_timeout_ms: u64,
    /// Interval of the fleet-wide advisory tuning loop.
    pub tuning_interval_ms: u64,
    /// How long a rate-limit response suppresses advisory calls.
    pub breaker_cooldown_ms: u64,
    /// Upper bound of the random delay before each chat line in stealth mode.
    pub stealth_jitter_ms: u64,
    /// Telemetry sampling window.
    pub telemetry_interval_ms: u64,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_stagger_ms: 2_000,
            slot_stagger_ms: 300,
            spawn_jitter_ms: 200,
            connect_timeout_ms: 120_000,
            tuning_interval_ms: 30_000,
            breaker_cooldown_ms: 600_000,
            stealth_jitter_ms: 2_000,
            telemetry_interval_ms: 1_000,
        }
    }
}
