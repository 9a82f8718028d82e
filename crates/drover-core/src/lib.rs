pub mod advisory;
pub mod agent;
pub mod config;
pub mod errors;
pub mod events;
pub mod ids;
pub mod session;

pub use advisory::{Advisory, CompletionRequest};
pub use agent::{AgentState, TerminationCause};
pub use config::{ConfigPatch, FleetConfig, Intensity, Mode, StartRequest};
pub use errors::{AdvisoryError, ConfigError, SessionError};
pub use events::FleetEvent;
pub use ids::{AgentId, ScriptRunId};
