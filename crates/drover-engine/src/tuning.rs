//! Periodic fleet-wide pacing adjustments from the advisory service.

use std::sync::Arc;

use drover_advisor::{Advisor, FleetReading, TuningSuggestion};
use drover_core::errors::AdvisoryError;
use drover_telemetry::TelemetryAggregator;
use tracing::{debug, info};

use crate::config::SharedConfig;

#[derive(Debug)]
pub enum TuneOutcome {
    /// AI control off, no agents, or the advisor is unavailable.
    Skipped(&'static str),
    Applied(TuningSuggestion),
    /// The suggestion was discarded; configuration is unchanged.
    Failed(AdvisoryError),
}

pub struct FleetTuner {
    config: SharedConfig,
    advisor: Arc<Advisor>,
    aggregator: Arc<TelemetryAggregator>,
}

impl FleetTuner {
    pub fn new(config: SharedConfig, advisor: Arc<Advisor>, aggregator: Arc<TelemetryAggregator>) -> Self {
        Self {
            config,
            advisor,
            aggregator,
        }
    }

    pub fn reading(&self, live_agents: usize) -> FleetReading {
        let config = self.config.snapshot();
        let traffic = self.aggregator.last();
        FleetReading {
            live_agents,
            desired_agents: config.count,
            actions_per_sec: traffic.actions,
            latency_ms: traffic.latency_ms,
            join_delay_ms: config.join_delay_ms,
            intensity: config.intensity,
            mode: config.mode,
        }
    }

    /// One tuning round. Applied fields replace the current values in a
    /// single write.
    pub async fn tune_once(&self, ai_active: bool, live_agents: usize) -> TuneOutcome {
        if !ai_active {
            return TuneOutcome::Skipped("ai control is off");
        }
        if live_agents == 0 {
            return TuneOutcome::Skipped("no live agents");
        }
        if !self.advisor.is_available() {
            return TuneOutcome::Skipped("advisor unavailable");
        }

        let reading = self.reading(live_agents);
        match self.advisor.tune_fleet(&reading).await {
            Ok(suggestion) => {
                self.config.update(|c| {
                    if let Some(delay) = suggestion.join_delay_ms {
                        c.join_delay_ms = delay;
                    }
                    if let Some(intensity) = suggestion.intensity {
                        c.intensity = intensity;
                    }
                });
                info!(
                    join_delay_ms = ?suggestion.join_delay_ms,
                    intensity = ?suggestion.intensity.map(|i| i.get()),
                    reason = %suggestion.reason,
                    "advisor tuning applied"
                );
                TuneOutcome::Applied(suggestion)
            }
            Err(e) => {
                debug!(error = %e, kind = e.error_kind(), "tuning round failed");
                TuneOutcome::Failed(e)
            }
        }
    }
}
