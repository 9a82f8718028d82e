use serde::{Deserialize, Serialize};

use crate::config::FleetConfig;

/// Fleet-wide status pushed after every operator command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Live agents (pending, connecting and active).
    pub count: usize,
    /// Agents that completed login.
    pub active: usize,
    pub config: FleetConfig,
    pub is_paused: bool,
    pub ai_active: bool,
}

/// Host resource utilization sampled alongside traffic counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostUsage {
    /// One-minute load average.
    pub cpu_load: f64,
    /// Used memory as a percentage of total.
    pub memory_percent: f64,
    pub uptime_secs: u64,
}

/// Per-second traffic sample.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    /// Outbound actions in the last window.
    pub actions: u64,
    pub agents: usize,
    pub total_joins: u64,
    /// Scheduling delay measured by the latency probe.
    pub latency_ms: u64,
    /// Unix millis.
    pub timestamp: i64,
    pub performance: HostUsage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Joined,
    Disconnected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Connected but the fleet is paused.
    Idle,
    /// Connected and running its behavior.
    Engaged,
}

/// Everything the fleet publishes to observers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FleetEvent {
    Status(StatusSnapshot),

    Traffic(TelemetrySnapshot),

    AgentStatus {
        username: String,
        status: LifecycleStatus,
    },

    AgentHealth {
        username: String,
        health: f32,
        status: HealthStatus,
    },

    AdvisorLog {
        msg: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        settings: Option<serde_json::Value>,
    },

    #[serde(rename_all = "camelCase")]
    PauseStatus {
        is_paused: bool,
    },

    #[serde(rename_all = "camelCase")]
    ProxyLoaded {
        count: usize,
        proxy_type: String,
        list: Vec<String>,
    },

    ConfigRejected {
        field: String,
        reason: String,
    },

    ScriptSaved {
        name: String,
    },

    ScriptError {
        name: String,
        line: usize,
        message: String,
    },
}

impl FleetEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Traffic(_) => "traffic",
            Self::AgentStatus { .. } => "agent-status",
            Self::AgentHealth { .. } => "agent-health",
            Self::AdvisorLog { .. } => "advisor-log",
            Self::PauseStatus { .. } => "pause-status",
            Self::ProxyLoaded { .. } => "proxy-loaded",
            Self::ConfigRejected { .. } => "config-rejected",
            Self::ScriptSaved { .. } => "script-saved",
            Self::ScriptError { .. } => "script-error",
        }
    }

    /// The agent this event is about, if any.
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::AgentStatus { username, .. } | Self::AgentHealth { username, .. } => Some(username),
            _ => None,
        }
    }
}
