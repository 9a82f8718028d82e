//! Operator action lists.
//!
//! A script is a short list of steps from a fixed instruction set, parsed up
//! front and then replayed on every live agent through the normal dispatch
//! path (pause gate and counters included). One instruction per line:
//!
//! ```text
//! # comment
//! chat hello there
//! swing left
//! jump
//! crouch
//! look 1.57 0
//! move 2 -1.5
//! wait 500
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use drover_core::ids::ScriptRunId;
use drover_core::session::{Action, Control, Hand};
use tracing::{debug, info};

use crate::agent::Agent;
use crate::error::ScriptError;

pub const MAX_STEPS: usize = 64;
pub const MAX_WAIT: Duration = Duration::from_secs(10);
/// Largest horizontal offset a single `move` may request.
pub const MAX_MOVE: f64 = 8.0;
pub const MAX_CHAT_LEN: usize = 256;

const JUMP_HOLD: Duration = Duration::from_millis(500);
const CROUCH_HOLD: Duration = Duration::from_millis(1000);

#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    Chat(String),
    Swing(Hand),
    Jump,
    Crouch,
    Look { yaw: f32, pitch: f32 },
    Move { dx: f64, dz: f64 },
    Wait(Duration),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Script {
    pub name: String,
    pub steps: Vec<Step>,
}

fn parse_err(line: usize, message: impl Into<String>) -> ScriptError {
    ScriptError::Parse {
        line,
        message: message.into(),
    }
}

fn finite<T: std::str::FromStr + Into<f64> + Copy>(raw: Option<&str>, line: usize, what: &str) -> Result<T, ScriptError> {
    let raw = raw.ok_or_else(|| parse_err(line, format!("missing {what}")))?;
    let value: T = raw
        .parse()
        .map_err(|_| parse_err(line, format!("{what} is not a number: {raw}")))?;
    if !value.into().is_finite() {
        return Err(parse_err(line, format!("{what} must be finite")));
    }
    Ok(value)
}

fn parse_step(line_no: usize, line: &str) -> Result<Step, ScriptError> {
    let (op, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let mut args = rest.split_whitespace();

    let step = match op.to_ascii_lowercase().as_str() {
        "chat" => {
            if rest.is_empty() {
                return Err(parse_err(line_no, "chat needs text"));
            }
            if rest.chars().count() > MAX_CHAT_LEN {
                return Err(parse_err(line_no, format!("chat is longer than {MAX_CHAT_LEN} characters")));
            }
            return Ok(Step::Chat(rest.to_string()));
        }
        "swing" => match args.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("right") => Step::Swing(Hand::Right),
            Some("left") => Step::Swing(Hand::Left),
            Some(other) => return Err(parse_err(line_no, format!("unknown hand: {other}"))),
        },
        "jump" => Step::Jump,
        "crouch" => Step::Crouch,
        "look" => Step::Look {
            yaw: finite::<f32>(args.next(), line_no, "yaw")?,
            pitch: finite::<f32>(args.next(), line_no, "pitch")?,
        },
        "move" => {
            let dx = finite::<f64>(args.next(), line_no, "dx")?;
            let dz = finite::<f64>(args.next(), line_no, "dz")?;
            if dx.abs() > MAX_MOVE || dz.abs() > MAX_MOVE {
                return Err(parse_err(line_no, format!("move is limited to {MAX_MOVE} blocks per axis")));
            }
            Step::Move { dx, dz }
        }
        "wait" => {
            let raw = args.next().ok_or_else(|| parse_err(line_no, "missing milliseconds"))?;
            let ms: u64 = raw
                .parse()
                .map_err(|_| parse_err(line_no, format!("invalid wait: {raw}")))?;
            let wait = Duration::from_millis(ms);
            if wait > MAX_WAIT {
                return Err(parse_err(line_no, format!("wait is limited to {} ms", MAX_WAIT.as_millis())));
            }
            Step::Wait(wait)
        }
        other => return Err(parse_err(line_no, format!("unknown instruction: {other}"))),
    };

    if args.next().is_some() {
        return Err(parse_err(line_no, "too many arguments"));
    }
    Ok(step)
}

pub fn parse(name: &str, source: &str) -> Result<Script, ScriptError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ScriptError::InvalidName);
    }
    let mut steps = Vec::new();
    for (idx, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if steps.len() == MAX_STEPS {
            return Err(ScriptError::TooLong { max: MAX_STEPS });
        }
        steps.push(parse_step(idx + 1, line)?);
    }
    if steps.is_empty() {
        return Err(ScriptError::Empty);
    }
    Ok(Script {
        name: name.to_string(),
        steps,
    })
}

/// Saved scripts by name. Lives for the process.
#[derive(Default)]
pub struct ScriptStore {
    scripts: DashMap<String, Arc<Script>>,
}

impl ScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and store, replacing any script with the same name.
    pub fn save(&self, name: &str, source: &str) -> Result<Arc<Script>, ScriptError> {
        let script = Arc::new(parse(name, source)?);
        self.scripts.insert(script.name.clone(), Arc::clone(&script));
        info!(script = %script.name, steps = script.steps.len(), "script saved");
        Ok(script)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Script>, ScriptError> {
        self.scripts
            .get(name.trim())
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| ScriptError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.scripts.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Replay `script` on each agent, one task per agent. Tasks end early when
/// their agent terminates.
pub fn run(script: Arc<Script>, agents: Vec<Arc<Agent>>) -> ScriptRunId {
    let run_id = ScriptRunId::new();
    debug!(run = %run_id, script = %script.name, agents = agents.len(), "script run started");
    for agent in agents {
        tokio::spawn(execute(agent, Arc::clone(&script)));
    }
    run_id
}

/// Sleep unless the agent ends first. Returns `false` if it ended.
async fn pause_for(agent: &Agent, d: Duration) -> bool {
    tokio::select! {
        biased;
        () = agent.cancel_token().cancelled() => false,
        () = tokio::time::sleep(d) => true,
    }
}

async fn press(agent: &Agent, control: Control, hold: Duration) -> bool {
    agent.act(Action::Control { control, active: true });
    let alive = pause_for(agent, hold).await;
    agent.act(Action::Control { control, active: false });
    alive
}

async fn execute(agent: Arc<Agent>, script: Arc<Script>) {
    for step in &script.steps {
        if agent.cancel_token().is_cancelled() {
            return;
        }
        let alive = match step {
            Step::Chat(text) => {
                agent.chat(text);
                true
            }
            Step::Swing(hand) => {
                agent.act(Action::Swing { hand: *hand });
                true
            }
            Step::Jump => press(&agent, Control::Jump, JUMP_HOLD).await,
            Step::Crouch => press(&agent, Control::Sneak, CROUCH_HOLD).await,
            Step::Look { yaw, pitch } => {
                agent.act(Action::Look {
                    yaw: *yaw,
                    pitch: *pitch,
                });
                true
            }
            Step::Move { dx, dz } => {
                if let Some(world) = agent.world() {
                    agent.act(Action::Position {
                        at: world.position.offset(*dx, 0.0, *dz),
                        on_ground: world.on_ground,
                    });
                }
                true
            }
            Step::Wait(d) => pause_for(&agent, *d).await,
        };
        if !alive {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentSpec, DispatchContext};
    use crate::pause::PauseGate;
    use crate::sim::{Sent, SimSession};
    use drover_core::agent::AgentState;
    use drover_core::session::Vec3;
    use drover_telemetry::TrafficCounters;
    use tokio_util::sync::CancellationToken;

    fn active_agent() -> (Arc<Agent>, Arc<SimSession>) {
        let agent = Arc::new(Agent::new(
            AgentSpec {
                username: "s".into(),
                ordinal: 0,
                seq: 0,
                proxy: None,
            },
            DispatchContext::new(PauseGate::new(), Arc::new(TrafficCounters::new()), Duration::ZERO),
            CancellationToken::new(),
        ));
        let session = SimSession::new();
        agent.attach(session.clone());
        agent.transition(AgentState::Active);
        (agent, session)
    }

    #[test]
    fn parses_every_instruction() {
        let script = parse(
            "warmup",
            "# greet\nchat hello  there\nswing left\nswing\njump\ncrouch\nlook 1.5 -0.25\nmove 2 -1\nwait 250\n",
        )
        .unwrap();
        assert_eq!(
            script.steps,
            vec![
                Step::Chat("hello  there".into()),
                Step::Swing(Hand::Left),
                Step::Swing(Hand::Right),
                Step::Jump,
                Step::Crouch,
                Step::Look { yaw: 1.5, pitch: -0.25 },
                Step::Move { dx: 2.0, dz: -1.0 },
                Step::Wait(Duration::from_millis(250)),
            ]
        );
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = parse("x", "jump\n\nteleport 0 0\n").unwrap_err();
        assert_eq!(err.line(), 3);
        assert!(err.to_string().contains("unknown instruction"));

        assert_eq!(parse("x", "wait 10001").unwrap_err().line(), 1);
        assert_eq!(parse("x", "jump\nmove 9 0").unwrap_err().line(), 2);
        assert_eq!(parse("x", "look 1").unwrap_err().line(), 1);
        assert_eq!(parse("x", "look NaN 0").unwrap_err().line(), 1);
        assert_eq!(parse("x", "jump high").unwrap_err().line(), 1);
        assert_eq!(parse("x", "chat").unwrap_err().line(), 1);
    }

    #[test]
    fn rejects_empty_long_and_unnamed() {
        assert_eq!(parse("x", "# only a comment\n"), Err(ScriptError::Empty));
        assert_eq!(
            parse("x", &"jump\n".repeat(MAX_STEPS + 1)),
            Err(ScriptError::TooLong { max: MAX_STEPS })
        );
        assert!(parse("x", &"jump\n".repeat(MAX_STEPS)).is_ok());
        assert_eq!(parse("  ", "jump"), Err(ScriptError::InvalidName));
    }

    #[test]
    fn store_round_trip() {
        let store = ScriptStore::new();
        store.save("a", "jump").unwrap();
        store.save("a", "crouch").unwrap();
        assert_eq!(store.get("a").unwrap().steps, vec![Step::Crouch]);
        assert!(matches!(store.get("b"), Err(ScriptError::NotFound(_))));
        assert!(store.save("c", "fly").is_err());
        assert_eq!(store.names(), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_replays_steps_in_order() {
        let (agent, session) = active_agent();
        let script = Arc::new(parse("s", "chat hi\nwait 1000\nswing\nmove 1 1").unwrap());
        run(script, vec![Arc::clone(&agent)]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.sent(), vec![Sent::Chat("hi".into())]);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let sent = session.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1], Sent::Action(Action::Swing { hand: Hand::Right }));
        assert_eq!(
            sent[2],
            Sent::Action(Action::Position {
                at: Vec3::new(1.5, 64.0, 1.5),
                on_ground: true
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_agent_ends() {
        let (agent, session) = active_agent();
        let script = Arc::new(parse("s", "wait 5000\nchat late").unwrap());
        run(script, vec![Arc::clone(&agent)]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        agent.mark_terminated();
        agent.shutdown();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(session.sent().is_empty());
    }
}
