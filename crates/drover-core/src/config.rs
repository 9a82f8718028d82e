//! Fleet configuration and operator-supplied patches.
//!
//! The fleet keeps exactly one [`FleetConfig`]. Operators mutate it through
//! [`ConfigPatch`]es, whose fields arrive as loosely typed JSON from the control
//! channel. A field that fails to parse is rejected on its own and the previous
//! value stays in effect; the rest of the patch still applies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConfigError;

/// Upper bound on the desired agent count accepted from operators.
pub const MAX_AGENTS: u32 = 5_000;
/// Upper bound on the join delay, in milliseconds.
pub const MAX_JOIN_DELAY_MS: u64 = 600_000;

/// Action tick rate selector for the non-advisory modes, 1 (slowest) to 10.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Intensity(u8);

impl Intensity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    /// Clamp an arbitrary integer into range.
    pub fn clamped(value: i64) -> Self {
        let v = value.clamp(i64::from(Self::MIN), i64::from(Self::MAX));
        Self(v as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Coerce a JSON value the way the control UI sends it: a number or a
    /// numeric string. Zero and non-numeric input are rejected, anything else
    /// is clamped into `1..=10`.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        match parse_int(value) {
            Some(0) | None => Err(ConfigError::InvalidIntensity(value.to_string())),
            Some(n) => Ok(Self::clamped(n)),
        }
    }
}

impl Default for Intensity {
    fn default() -> Self {
        Self(5)
    }
}

impl TryFrom<u8> for Intensity {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| ConfigError::InvalidIntensity(value.to_string()))
    }
}

impl From<Intensity> for u8 {
    fn from(value: Intensity) -> Self {
        value.0
    }
}

/// Behavior pattern an active agent runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Connect and idle.
    #[default]
    Stay,
    Spam,
    Move,
    PositionFlood,
    TabSpam,
    ArmSpam,
    BlockInteract,
    AiChat,
    AiMove,
    AiHuman,
}

impl Mode {
    pub const ALL: [Mode; 10] = [
        Mode::Stay,
        Mode::Spam,
        Mode::Move,
        Mode::PositionFlood,
        Mode::TabSpam,
        Mode::ArmSpam,
        Mode::BlockInteract,
        Mode::AiChat,
        Mode::AiMove,
        Mode::AiHuman,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stay => "stay",
            Self::Spam => "spam",
            Self::Move => "move",
            Self::PositionFlood => "position-flood",
            Self::TabSpam => "tab-spam",
            Self::ArmSpam => "arm-spam",
            Self::BlockInteract => "block-interact",
            Self::AiChat => "ai-chat",
            Self::AiMove => "ai-move",
            Self::AiHuman => "ai-human",
        }
    }

    /// Modes that consult the advisory service.
    pub fn uses_advisor(self) -> bool {
        matches!(self, Self::AiChat | Self::AiMove | Self::AiHuman)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownMode(s.to_string()))
    }
}

/// The single process-wide fleet configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FleetConfig {
    /// Target server host.
    pub host: String,
    /// Target server port.
    pub port: u16,
    /// Protocol version; `None` means auto-detect.
    pub version: Option<String>,
    /// Desired number of live agents.
    pub count: u32,
    /// Proxy endpoints, assigned round-robin by agent ordinal.
    pub proxies: Vec<String>,
    pub mode: Mode,
    pub intensity: Intensity,
    /// Floor on the delay before a replacement spawn, in milliseconds.
    #[serde(rename = "joinDelay")]
    pub join_delay_ms: u64,
    /// Username template; agents append an ordinal and a random suffix.
    pub username: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 25565,
            version: None,
            count: 0,
            proxies: Vec::new(),
            mode: Mode::Stay,
            intensity: Intensity::default(),
            join_delay_ms: 500,
            username: "drover".to_string(),
        }
    }
}

impl FleetConfig {
    /// Apply every valid field of `patch`. Returns the rejected fields; for
    /// those the previous value is kept.
    pub fn apply(&mut self, patch: &ConfigPatch) -> Vec<ConfigError> {
        let mut rejected = Vec::new();

        if let Some(host) = patch.host.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            self.host = host.to_string();
        }
        if let Some(raw) = &patch.port {
            match parse_int(raw).and_then(|p| u16::try_from(p).ok()).filter(|p| *p > 0) {
                Some(port) => self.port = port,
                None => rejected.push(ConfigError::InvalidPort(raw.to_string())),
            }
        }
        if let Some(raw) = &patch.version {
            self.version = parse_version(raw);
        }
        if let Some(raw) = &patch.count {
            match parse_int(raw)
                .and_then(|c| u32::try_from(c).ok())
                .filter(|c| *c <= MAX_AGENTS)
            {
                Some(count) => self.count = count,
                None => rejected.push(ConfigError::InvalidCount(raw.to_string())),
            }
        }
        if let Some(proxies) = &patch.proxies {
            self.proxies = proxies.clone();
        }
        if let Some(raw) = &patch.mode {
            match raw.parse::<Mode>() {
                Ok(mode) => self.mode = mode,
                Err(e) => rejected.push(e),
            }
        }
        if let Some(raw) = &patch.intensity {
            match Intensity::from_value(raw) {
                Ok(intensity) => self.intensity = intensity,
                Err(e) => rejected.push(e),
            }
        }
        if let Some(raw) = &patch.join_delay {
            match parse_int(raw)
                .and_then(|d| u64::try_from(d).ok())
                .filter(|d| *d <= MAX_JOIN_DELAY_MS)
            {
                Some(delay) => self.join_delay_ms = delay,
                None => rejected.push(ConfigError::InvalidJoinDelay(raw.to_string())),
            }
        }
        if let Some(username) = patch.username.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            self.username = username.to_string();
        }

        rejected
    }
}

/// A partial update from the control channel. Unknown keys are ignored.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    pub host: Option<String>,
    pub port: Option<Value>,
    pub version: Option<Value>,
    pub count: Option<Value>,
    pub proxies: Option<Vec<String>>,
    pub mode: Option<String>,
    pub intensity: Option<Value>,
    pub join_delay: Option<Value>,
    pub username: Option<String>,
}

/// Parameters of the `start` command: a full patch plus the session flags.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(flatten)]
    pub config: ConfigPatch,
    #[serde(default)]
    pub ai_active: bool,
    #[serde(default)]
    pub stealth_mode: bool,
}

/// Lenient integer parse: JSON integers, finite floats (truncated) and
/// strings with a leading run of digits (`"7"`, `" 12ms"`).
pub fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            let (sign, digits) = match s.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, s.strip_prefix('+').unwrap_or(s)),
            };
            let end = digits
                .char_indices()
                .find(|(_, c)| !c.is_ascii_digit())
                .map_or(digits.len(), |(i, _)| i);
            digits[..end].parse::<i64>().ok().map(|n| sign * n)
        }
        _ => None,
    }
}

/// `false`, `null`, empty and `"auto"` all mean auto-detect.
pub fn parse_version(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("auto"))
        .map(str::to_string)
}
