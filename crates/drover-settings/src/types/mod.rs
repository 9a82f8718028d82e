//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may name any subset of fields and the rest keep their defaults.

mod advisor;
mod fleet;
mod server;

pub use advisor::*;
pub use fleet::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type for the drover process.
///
/// Loaded from `~/.drover/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "server": { "port": 4000 },
///   "fleet": { "batchSize": 10 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DroverSettings {
    /// Settings schema version.
    pub version: String,
    /// Control channel network settings.
    pub server: ServerSettings,
    /// Spawn pacing and fleet timing.
    pub fleet: FleetSettings,
    /// Advisory completion service.
    pub advisor: AdvisorSettings,
    pub logging: LoggingSettings,
}

impl Default for DroverSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            fleet: FleetSettings::default(),
            advisor: AdvisorSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_sections() {
        let json = serde_json::to_value(DroverSettings::default()).unwrap();
        assert_eq!(json["server"]["proxyDir"], "proxies");
        assert_eq!(json["fleet"]["batchStaggerMs"], 2000);
        assert_eq!(json["advisor"]["model"], "gpt-4o-mini");
        assert_eq!(json["logging"]["level"], "info");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: DroverSettings =
            serde_json::from_str(r#"{"fleet": {"batchSize": 8}}"#).unwrap();
        assert_eq!(settings.fleet.batch_size, 8);
        assert_eq!(settings.fleet.slot_stagger_ms, 300);
        assert_eq!(settings.server.port, 3000);
    }
}
