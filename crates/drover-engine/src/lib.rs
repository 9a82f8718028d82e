//! Fleet engine: spawn scheduling, agent lifecycle, behaviors and scripts.

pub mod agent;
pub mod behavior;
pub mod config;
pub mod error;
pub mod fleet;
pub mod live;
pub mod pause;
pub mod proxy;
pub mod reconnect;
pub mod script;
pub mod sim;
pub mod spawn;
pub mod tuning;
pub mod wheel;

pub use agent::Agent;
pub use config::SharedConfig;
pub use error::{ProxyError, ScriptError};
pub use fleet::{Fleet, FleetOptions, RunScript};
pub use pause::PauseGate;
pub use proxy::{ProxyListKind, ProxyPool};
pub use sim::SimulatedConnector;
