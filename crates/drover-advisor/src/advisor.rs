//! Prompting and response handling for the two advisory call sites: fleet
//! tuning and per-agent suggestions.
//!
//! Every call goes through [`Advisor::call`], which checks the shared breaker
//! first and trips it on a rate-limit response. Callers fall back locally on
//! any error.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use drover_core::advisory::{Advisory, CompletionRequest};
use drover_core::config::{parse_int, Intensity, Mode, MAX_JOIN_DELAY_MS};
use drover_core::errors::AdvisoryError;
use drover_core::session::Vec3;

use crate::breaker::CircuitBreaker;

/// Longest chat line accepted from the service.
pub const MAX_CHAT_CHARS: usize = 80;

const TUNING_MAX_TOKENS: u32 = 150;
const CHAT_MAX_TOKENS: u32 = 30;
const ACTION_MAX_TOKENS: u32 = 150;

/// Local lines used while the service is unavailable.
pub const FALLBACK_PHRASES: &[&str] = &[
    "anyone found diamonds yet?",
    "this spawn is busy today",
    "heading out to explore",
    "nice build over there",
    "lag check, all good here",
    "gg everyone",
];

pub fn fallback_phrase<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    FALLBACK_PHRASES.choose(rng).copied().unwrap_or("hello")
}

/// Fleet state fed to the tuning prompt.
#[derive(Clone, Debug)]
pub struct FleetReading {
    pub live_agents: usize,
    pub desired_agents: u32,
    pub actions_per_sec: u64,
    pub latency_ms: u64,
    pub join_delay_ms: u64,
    pub intensity: Intensity,
    pub mode: Mode,
}

/// Validated tuning output. Numeric fields are already clamped.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TuningSuggestion {
    #[serde(rename = "joinDelay", skip_serializing_if = "Option::is_none")]
    pub join_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity: Option<Intensity>,
    pub reason: String,
}

/// Agent surroundings fed to the action prompt.
#[derive(Clone, Debug, Default)]
pub struct AgentReading {
    pub username: String,
    pub position: Vec3,
    /// Other fleet agents, at most five.
    pub teammates: Vec<String>,
    /// Names of solid blocks within reach.
    pub surroundings: Vec<String>,
    pub nearby_entities: usize,
}

/// Fixed action vocabulary. Anything else parses as `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    Jump,
    Sprint,
    Wander,
    Crouch,
    Swing,
    LookAtEntity,
    LookAtFriend,
    Mine,
    PunchEntity,
    ChatSocial,
    #[serde(other)]
    Idle,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ActionSuggestion {
    pub action: AgentAction,
    pub chat: Option<String>,
}

pub struct Advisor {
    backend: Option<Arc<dyn Advisory>>,
    breaker: Arc<CircuitBreaker>,
}

impl Advisor {
    pub fn new(backend: Option<Arc<dyn Advisory>>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { backend, breaker }
    }

    /// An advisor with no backend: every call fails with `NotConfigured`.
    pub fn disabled() -> Self {
        Self::new(None, Arc::new(CircuitBreaker::default()))
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    /// Configured and not cooling down.
    pub fn is_available(&self) -> bool {
        self.is_configured() && !self.breaker.is_open()
    }

    pub async fn call(&self, request: &CompletionRequest) -> Result<String, AdvisoryError> {
        let backend = self.backend.as_ref().ok_or(AdvisoryError::NotConfigured)?;
        if self.breaker.is_open() {
            return Err(AdvisoryError::CircuitOpen);
        }
        match backend.complete(request).await {
            Err(e) if e.is_rate_limited() => {
                self.breaker.trip();
                Err(e)
            }
            Err(e) => {
                debug!(backend = backend.name(), error = %e, kind = e.error_kind(), "advisory call failed");
                Err(e)
            }
            ok => ok,
        }
    }

    pub async fn tune_fleet(&self, reading: &FleetReading) -> Result<TuningSuggestion, AdvisoryError> {
        let request = CompletionRequest::json(tuning_prompt(reading), TUNING_MAX_TOKENS);
        let text = self.call(&request).await?;
        parse_tuning(&text)
    }

    pub async fn chat_line(&self, username: &str) -> Result<String, AdvisoryError> {
        let request = CompletionRequest::text(chat_prompt(username), CHAT_MAX_TOKENS);
        let text = self.call(&request).await?;
        clean_chat(&text).ok_or_else(|| AdvisoryError::MalformedResponse("empty chat line".into()))
    }

    pub async fn suggest_action(&self, reading: &AgentReading) -> Result<ActionSuggestion, AdvisoryError> {
        let request = CompletionRequest::json(action_prompt(reading), ACTION_MAX_TOKENS);
        let text = self.call(&request).await?;
        parse_action(&text)
    }
}

fn tuning_prompt(r: &FleetReading) -> String {
    format!(
        "You are pacing a load test against a game server.\n\
         Current status:\n\
         - Agents: {live}/{desired}\n\
         - Actions/sec: {actions}\n\
         - Scheduler latency: {latency}ms\n\
         - Join delay: {delay}ms\n\
         - Intensity: {intensity} (1-10)\n\
         - Mode: {mode}\n\n\
         If actions/sec fall while the agent count is steady, or agents keep dropping, the \
         server is throttling: raise joinDelay and lower intensity. Only raise intensity when \
         the server is clearly keeping up.\n\
         Return ONLY a JSON object: {{\"joinDelay\": number, \"intensity\": number, \"reason\": \"string\"}}",
        live = r.live_agents,
        desired = r.desired_agents,
        actions = r.actions_per_sec,
        latency = r.latency_ms,
        delay = r.join_delay_ms,
        intensity = r.intensity.get(),
        mode = r.mode,
    )
}

fn chat_prompt(username: &str) -> String {
    format!(
        "You are {username}, a player on a game server. Write one short, friendly chat \
         message about the game. Keep it under {MAX_CHAT_CHARS} characters. No emojis."
    )
}

fn action_prompt(r: &AgentReading) -> String {
    let teammates = if r.teammates.is_empty() {
        "none".to_string()
    } else {
        r.teammates.join(", ")
    };
    let surroundings = if r.surroundings.is_empty() {
        "open area".to_string()
    } else {
        r.surroundings.join(", ")
    };
    format!(
        "You are a game player named {name}.\n\
         Position: {x}, {y}, {z}.\n\
         Teammates: {teammates}.\n\
         Surroundings: {surroundings}.\n\
         Nearby entities: {entities}.\n\n\
         Choose a natural action: [\"jump\", \"sprint\", \"swing\", \"look_at_friend\", \"chat_social\", \
         \"crouch\", \"wander\", \"look_at_entity\", \"mine\", \"punch_entity\"].\n\
         \"mine\" only if blocks are nearby. \"punch_entity\" only if a teammate is very close.\n\
         Return ONLY JSON: {{\"action\": \"string\", \"chat\": \"string\" or null}}",
        name = r.username,
        x = r.position.x.round(),
        y = r.position.y.round(),
        z = r.position.z.round(),
        entities = r.nearby_entities,
    )
}

/// Slice out the outermost `{...}`; models sometimes wrap JSON in prose or
/// code fences.
fn json_object(text: &str) -> Result<serde_json::Map<String, Value>, AdvisoryError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let slice = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => return Err(AdvisoryError::MalformedResponse("no JSON object".into())),
    };
    match serde_json::from_str(slice) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AdvisoryError::MalformedResponse("not a JSON object".into())),
        Err(e) => Err(AdvisoryError::MalformedResponse(e.to_string())),
    }
}

pub fn parse_tuning(text: &str) -> Result<TuningSuggestion, AdvisoryError> {
    let map = json_object(text)?;

    let join_delay_ms = map
        .get("joinDelay")
        .and_then(parse_int)
        .map(|d| d.clamp(0, MAX_JOIN_DELAY_MS as i64) as u64);
    let intensity = map.get("intensity").and_then(parse_int).map(Intensity::clamped);
    if join_delay_ms.is_none() && intensity.is_none() {
        return Err(AdvisoryError::MalformedResponse(
            "suggestion has no usable fields".into(),
        ));
    }

    let reason = map
        .get("reason")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("no reason given")
        .to_string();

    Ok(TuningSuggestion {
        join_delay_ms,
        intensity,
        reason,
    })
}

pub fn parse_action(text: &str) -> Result<ActionSuggestion, AdvisoryError> {
    let map = json_object(text)?;
    let action = match map.get("action") {
        Some(v @ Value::String(_)) => serde_json::from_value(v.clone())
            .map_err(|e| AdvisoryError::MalformedResponse(e.to_string()))?,
        _ => return Err(AdvisoryError::MalformedResponse("missing action".into())),
    };
    let chat = map.get("chat").and_then(Value::as_str).and_then(clean_chat);
    Ok(ActionSuggestion { action, chat })
}

/// Trim, drop wrapping quotes, cap the length. `None` if nothing is left.
pub fn clean_chat(text: &str) -> Option<String> {
    let trimmed = text.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    let line = trimmed.lines().next().unwrap_or_default();
    let capped: String = line.chars().take(MAX_CHAT_CHARS).collect();
    (!capped.is_empty()).then_some(capped)
}
