pub mod advisor;
pub mod breaker;
pub mod provider;

pub mod mock;

pub use advisor::{ActionSuggestion, Advisor, AgentAction, AgentReading, FleetReading, TuningSuggestion};
pub use breaker::CircuitBreaker;
pub use mock::{MockAdvisory, MockResponse};
pub use provider::{OpenAiAdvisory, OpenAiConfig};
