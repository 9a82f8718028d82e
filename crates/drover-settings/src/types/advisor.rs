use serde::{Deserialize, Serialize};

/// Advisory completion service settings.
///
/// The API key is never stored here; it is read from the environment
/// variable named by `api_key_env`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvisorSettings {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    pub model: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for AdvisorSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_ms: 20_000,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}
