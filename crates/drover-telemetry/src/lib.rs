mod aggregator;
mod host;
mod traffic;

pub use aggregator::{spawn_latency_probe, TelemetryAggregator};
pub use host::HostSampler;
pub use traffic::TrafficCounters;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "drover_advisor" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    fn filter_directive(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Initialize the tracing subscriber and panic hook. Call once at startup.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let installed = tracing_subscriber::registry().with(fmt_layer).try_init().is_ok();
    if installed {
        install_panic_hook();
    }
    installed
}

/// Route panics through tracing. A panicking agent task is torn down by the
/// runtime; the rest of the fleet keeps running.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(%location, panic = %payload, "uncaught panic");
    }));
}

/// Parse a level name, falling back to INFO.
pub fn parse_level(name: &str) -> Level {
    name.parse().unwrap_or(Level::INFO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_directive_includes_modules() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("drover_engine".into(), Level::DEBUG)],
            json: true,
        };
        assert_eq!(config.filter_directive(), "warn,drover_engine=debug");
    }

    #[test]
    fn parse_level_falls_back() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("chatty"), Level::INFO);
    }
}
