//! Agent lifecycle states and the causes that end them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::session::SessionEvent;

/// Lifecycle of one agent. `Terminated` is absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AgentState {
    /// Slot reserved in the live set, session not yet requested.
    Pending = 0,
    /// Session created, login not confirmed.
    Connecting = 1,
    /// Logged in; behavior running.
    Active = 2,
    Terminated = 3,
}

impl AgentState {
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, next),
            (Pending, Connecting) | (Connecting, Active) | (Pending | Connecting | Active, Terminated)
        )
    }

    pub fn is_live(self) -> bool {
        self != Self::Terminated
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Pending),
            1 => Some(Self::Connecting),
            2 => Some(Self::Active),
            3 => Some(Self::Terminated),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an agent reached `Terminated`.
#[derive(Clone, Debug, PartialEq)]
pub enum TerminationCause {
    Error(SessionError),
    Closed,
    Ended,
    Kicked(String),
    /// The connector refused to create a session.
    CreateFailed(String),
    /// Retired by the operator (stop or downward resize).
    Retired,
}

impl TerminationCause {
    /// Map a terminal session event. `Login` and `Health` are not terminal.
    pub fn from_event(event: &SessionEvent) -> Option<Self> {
        match event {
            SessionEvent::Error(e) => Some(Self::Error(e.clone())),
            SessionEvent::Closed => Some(Self::Closed),
            SessionEvent::Ended => Some(Self::Ended),
            SessionEvent::Kicked(reason) => Some(Self::Kicked(reason.clone())),
            SessionEvent::Login | SessionEvent::Health(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Error(e) if e.is_network() => "network_error",
            Self::Error(_) => "error",
            Self::Closed => "closed",
            Self::Ended => "ended",
            Self::Kicked(_) => "kicked",
            Self::CreateFailed(_) => "create_failed",
            Self::Retired => "retired",
        }
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => write!(f, "error: {e}"),
            Self::Kicked(reason) => write!(f, "kicked: {reason}"),
            Self::CreateFailed(msg) => write!(f, "create failed: {msg}"),
            other => f.write_str(other.kind()),
        }
    }
}
