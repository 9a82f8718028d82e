//! The session capability the fleet drives.
//!
//! A session is one protocol connection to the target server. The fleet never
//! encodes packets itself: it asks a [`SessionConnector`] for a session and
//! then speaks to it through typed [`Action`]s. Lifecycle notifications arrive
//! on the event channel returned alongside the session.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::SessionError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn distance_to(self, other: Vec3) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Integer block coordinates containing this point.
    pub fn floored(self) -> Self {
        Self::new(self.x.floor(), self.y.floor(), self.z.floor())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hand {
    Left,
    Right,
}

/// Movement controls held down by the client until released.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    Forward,
    Sprint,
    Jump,
    Sneak,
}

/// Outbound request to a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Action {
    /// Raw position update, bypassing client-side movement validation.
    Position { at: Vec3, on_ground: bool },
    Look { yaw: f32, pitch: f32 },
    Swing { hand: Hand },
    TabComplete { text: String },
    ActivateBlock { at: Vec3 },
    Dig { at: Vec3 },
    Attack { entity_id: u64 },
    Control { control: Control, active: bool },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Position { .. } => "position",
            Self::Look { .. } => "look",
            Self::Swing { .. } => "swing",
            Self::TabComplete { .. } => "tab_complete",
            Self::ActivateBlock { .. } => "activate_block",
            Self::Dig { .. } => "dig",
            Self::Attack { .. } => "attack",
            Self::Control { .. } => "control",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Mob,
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityView {
    pub id: u64,
    pub kind: EntityKind,
    pub username: Option<String>,
    pub position: Vec3,
    pub height: f64,
}

impl EntityView {
    /// Point to aim at: the top of the entity's bounding box.
    pub fn eye_target(&self) -> Vec3 {
        self.position.offset(0.0, self.height, 0.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockView {
    pub name: String,
    pub position: Vec3,
    pub diggable: bool,
}

/// Read-only snapshot of what the session currently sees.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldView {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
    /// Other entities within view distance, excluding self.
    pub entities: Vec<EntityView>,
    /// Solid blocks near the agent.
    pub blocks: Vec<BlockView>,
}

impl WorldView {
    pub fn entities_within(&self, radius: f64) -> impl Iterator<Item = &EntityView> {
        let origin = self.position;
        self.entities
            .iter()
            .filter(move |e| e.position.distance_to(origin) < radius)
    }

    pub fn nearest_block(&self) -> Option<&BlockView> {
        let origin = self.position;
        self.blocks.iter().min_by(|a, b| {
            a.position
                .distance_to(origin)
                .total_cmp(&b.position.distance_to(origin))
        })
    }
}

/// Lifecycle notifications emitted by a session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Login,
    Health(f32),
    Error(SessionError),
    Closed,
    Ended,
    Kicked(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Offline,
}

/// Everything needed to open one session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// `None` lets the session negotiate the protocol version.
    pub version: Option<String>,
    /// Normalized proxy URL, e.g. `socks5://1.2.3.4:1080`.
    pub proxy: Option<String>,
    pub auth: AuthMode,
    pub connect_timeout: Duration,
}

/// A live protocol session. All methods must return promptly; I/O happens on
/// the session's own tasks.
pub trait Session: Send + Sync {
    fn send_chat(&self, text: &str) -> Result<(), SessionError>;

    fn send_action(&self, action: Action) -> Result<(), SessionError>;

    /// `None` until the agent has spawned into the world.
    fn world(&self) -> Option<WorldView>;

    /// Release the connection. Idempotent.
    fn close(&self);
}

/// A freshly created session and the receiving end of its events.
pub struct SessionHandle {
    pub session: Arc<dyn Session>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Factory for sessions.
pub trait SessionConnector: Send + Sync {
    fn create(&self, options: SessionOptions) -> Result<SessionHandle, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_distance() {
        let a = Vec3::new(0.0, 64.0, 0.0);
        let b = Vec3::new(3.0, 64.0, 4.0);
        assert!((a.distance_to(b) - 5.0).abs() < 1e-9);
        assert_eq!(Vec3::new(1.7, -0.2, 3.0).floored(), Vec3::new(1.0, -1.0, 3.0));
    }

    #[test]
    fn action_names() {
        assert_eq!(Action::TabComplete { text: "/".into() }.name(), "tab_complete");
        assert_eq!(Action::Swing { hand: Hand::Left }.name(), "swing");
        let json = serde_json::to_value(Action::Attack { entity_id: 9 }).unwrap();
        assert_eq!(json["name"], "attack");
    }

    #[test]
    fn world_view_queries() {
        let view = WorldView {
            position: Vec3::new(0.0, 64.0, 0.0),
            entities: vec![
                EntityView {
                    id: 1,
                    kind: EntityKind::Player,
                    username: Some("near".into()),
                    position: Vec3::new(2.0, 64.0, 0.0),
                    height: 1.8,
                },
                EntityView {
                    id: 2,
                    kind: EntityKind::Mob,
                    username: None,
                    position: Vec3::new(20.0, 64.0, 0.0),
                    height: 1.0,
                },
            ],
            blocks: vec![
                BlockView {
                    name: "stone".into(),
                    position: Vec3::new(3.0, 63.0, 0.0),
                    diggable: true,
                },
                BlockView {
                    name: "dirt".into(),
                    position: Vec3::new(0.0, 63.0, 0.0),
                    diggable: true,
                },
            ],
            ..Default::default()
        };

        let close: Vec<_> = view.entities_within(4.5).map(|e| e.id).collect();
        assert_eq!(close, vec![1]);
        assert_eq!(view.nearest_block().unwrap().name, "dirt");
        assert!((view.entities[0].eye_target().y - 65.8).abs() < 1e-9);
    }
}
