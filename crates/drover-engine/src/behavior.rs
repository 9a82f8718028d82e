//! Mode-specific periodic actions for active agents.
//!
//! Each active agent gets one [`AgentBehavior`] slot on the shared
//! [`TickWheel`]. The mode is fixed when the agent logs in; intensity is read
//! from the live configuration on every tick, so period changes take effect
//! at the next tick. Ticks never block: advisory calls and timed control
//! releases run on their own tasks, tied to the agent's cancel token.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover_advisor::advisor::{fallback_phrase, ActionSuggestion, AgentAction, AgentReading};
use drover_advisor::Advisor;
use drover_core::agent::AgentState;
use drover_core::config::{Intensity, Mode};
use drover_core::errors::AdvisoryError;
use drover_core::ids::AgentId;
use drover_core::session::{Action, Control, EntityKind, EntityView, Hand, Vec3, WorldView};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, trace};

use crate::agent::Agent;
use crate::config::SharedConfig;
use crate::live::LiveSet;
use crate::wheel::{TickTask, TickWheel};

/// Height of the eyes above the feet.
pub const EYE_HEIGHT: f64 = 1.62;
/// Reach for the combat heuristic.
pub const MELEE_RANGE: f64 = 4.5;
/// Radius for "nearby entities" in advisory readings.
pub const AWARENESS_RANGE: f64 = 15.0;
/// Fraction of ai-move ticks that consult the advisor.
pub const ADVISORY_TICK_CHANCE: f64 = 0.05;

const MAX_COMBAT_JITTER_MS: u64 = 150;
const CRIT_JUMP_CHANCE: f64 = 0.3;
const CRIT_JUMP_HOLD: Duration = Duration::from_millis(100);
const STRAFE_STEP: f64 = 0.2;
const JUMP_HOLD: Duration = Duration::from_millis(500);
const CROUCH_HOLD: Duration = Duration::from_millis(1000);
const FALLBACK_WALK: Duration = Duration::from_millis(1000);
const SURROUNDING_BLOCK_RANGE: f64 = 4.0;
const MAX_TEAMMATES: usize = 5;

fn scaled(base: u64, step: u64, floor: u64, intensity: Intensity) -> Duration {
    let ms = base.saturating_sub(step * u64::from(intensity.get()));
    Duration::from_millis(ms.max(floor))
}

/// Delay until the next tick. `None` for modes with no periodic work.
pub fn tick_period<R: Rng + ?Sized>(mode: Mode, intensity: Intensity, rng: &mut R) -> Option<Duration> {
    let period = match mode {
        Mode::Stay => return None,
        Mode::Spam => scaled(100, 8, 20, intensity),
        Mode::Move => Duration::from_millis(1000),
        Mode::PositionFlood => scaled(250, 24, 10, intensity),
        Mode::TabSpam => scaled(500, 45, 10, intensity),
        Mode::ArmSpam => scaled(150, 14, 10, intensity),
        Mode::BlockInteract => scaled(2000, 180, 200, intensity),
        Mode::AiChat => scaled(30_000, 2_000, 15_000, intensity),
        Mode::AiMove | Mode::AiHuman => Duration::from_millis(5_000 + rng.gen_range(0..3_000)),
    };
    Some(period)
}

/// Yaw and pitch that point from `eye` at `target`.
pub fn look_angles(eye: Vec3, target: Vec3) -> (f32, f32) {
    let (dx, dy, dz) = (target.x - eye.x, target.y - eye.y, target.z - eye.z);
    let yaw = (-dx).atan2(-dz);
    let ground = (dx * dx + dz * dz).sqrt();
    let pitch = dy.atan2(ground);
    (yaw as f32, pitch as f32)
}

fn look_at(world: &WorldView, target: Vec3) -> Action {
    let (yaw, pitch) = look_angles(world.position.offset(0.0, EYE_HEIGHT, 0.0), target);
    Action::Look { yaw, pitch }
}

fn random_token<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// Two distinct filler lines for the spam mode.
pub fn spam_lines<R: Rng + ?Sized>(rng: &mut R, millis: u128) -> [String; 2] {
    [
        format!("[drover] {} {:04}", random_token(rng, 8), millis % 10_000),
        format!("[drover-load] {}", random_token(rng, 10)),
    ]
}

fn position_nudge<R: Rng + ?Sized>(world: &WorldView, spread: f64, rng: &mut R) -> Action {
    Action::Position {
        at: world.position.offset(
            (rng.gen::<f64>() - 0.5) * spread,
            0.0,
            (rng.gen::<f64>() - 0.5) * spread,
        ),
        on_ground: true,
    }
}

/// Press `controls`, then release them after `hold` unless the agent ends first.
fn hold(agent: &Arc<Agent>, controls: &[Control], hold: Duration) {
    for &control in controls {
        agent.act(Action::Control { control, active: true });
    }
    let agent = Arc::clone(agent);
    let controls = controls.to_vec();
    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = agent.cancel_token().cancelled() => {}
            () = tokio::time::sleep(hold) => {
                for control in controls {
                    agent.act(Action::Control { control, active: false });
                }
            }
        }
    });
}

/// Nearest fleet-controlled player within `range`, excluding `me`.
fn nearest_teammate<'a>(
    world: &'a WorldView,
    live: &LiveSet,
    me: &str,
    range: f64,
) -> Option<&'a EntityView> {
    world
        .entities_within(range)
        .filter(|e| e.kind == EntityKind::Player)
        .filter(|e| e.username.as_deref().is_some_and(|u| u != me && live.is_member(u)))
        .min_by(|a, b| {
            a.position
                .distance_to(world.position)
                .total_cmp(&b.position.distance_to(world.position))
        })
}

/// Owns the tick-wheel slots of every active agent.
pub struct BehaviorEngine {
    wheel: TickWheel,
    config: SharedConfig,
    advisor: Arc<Advisor>,
    live: Arc<LiveSet>,
}

impl BehaviorEngine {
    pub fn new(wheel: TickWheel, config: SharedConfig, advisor: Arc<Advisor>, live: Arc<LiveSet>) -> Self {
        Self {
            wheel,
            config,
            advisor,
            live,
        }
    }

    /// Start the current mode for `agent`. Returns the mode started.
    pub fn start(&self, agent: &Arc<Agent>) -> Mode {
        let (mode, intensity) = self.config.pacing();
        let Some(first) = tick_period(mode, intensity, &mut rand::thread_rng()) else {
            return mode;
        };
        debug!(agent = %agent.username(), mode = %mode, "behavior started");
        let behavior = AgentBehavior {
            agent: Arc::clone(agent),
            mode,
            config: self.config.clone(),
            advisor: Arc::clone(&self.advisor),
            live: Arc::clone(&self.live),
            in_flight: Arc::new(AtomicBool::new(false)),
        };
        self.wheel.insert(agent.id().clone(), first, Arc::new(behavior));
        mode
    }

    pub fn stop(&self, id: &AgentId) {
        self.wheel.remove(id);
    }

    pub fn scheduled(&self) -> usize {
        self.wheel.len()
    }
}

struct AgentBehavior {
    agent: Arc<Agent>,
    mode: Mode,
    config: SharedConfig,
    advisor: Arc<Advisor>,
    live: Arc<LiveSet>,
    /// At most one advisory call per agent at a time.
    in_flight: Arc<AtomicBool>,
}

impl TickTask for AgentBehavior {
    fn tick(&self) -> Option<Duration> {
        if self.agent.state() == AgentState::Terminated || self.agent.cancel_token().is_cancelled() {
            return None;
        }
        let (_, intensity) = self.config.pacing();
        if !self.agent.context().pause.is_paused() {
            if let Some(world) = self.agent.world() {
                self.run(&world);
            }
        }
        tick_period(self.mode, intensity, &mut rand::thread_rng())
    }
}

impl AgentBehavior {
    fn run(&self, world: &WorldView) {
        let agent = &self.agent;
        let mut rng = rand::thread_rng();
        match self.mode {
            Mode::Stay => {}
            Mode::Spam => {
                let millis = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map_or(0, |d| d.as_millis());
                for line in spam_lines(&mut rng, millis) {
                    agent.chat(&line);
                }
            }
            Mode::Move => {
                agent.act(position_nudge(world, 1.0, &mut rng));
            }
            Mode::PositionFlood => {
                let mut at = world.position;
                let steps: Vec<Action> = (0..5)
                    .map(|_| {
                        at = at.offset(
                            (rng.gen::<f64>() - 0.5) * 0.1,
                            0.0,
                            (rng.gen::<f64>() - 0.5) * 0.1,
                        );
                        Action::Position { at, on_ground: true }
                    })
                    .collect();
                agent.act_all(steps);
            }
            Mode::TabSpam => {
                agent.act_all((0..3).map(|_| Action::TabComplete { text: "/".to_string() }));
            }
            Mode::ArmSpam => {
                agent.act_all([
                    Action::Swing { hand: Hand::Right },
                    Action::Swing { hand: Hand::Left },
                    Action::Look {
                        yaw: world.yaw + 0.1,
                        pitch: world.pitch,
                    },
                ]);
            }
            Mode::BlockInteract => {
                agent.act(Action::Swing { hand: Hand::Right });
                let below = world.position.offset(0.0, -1.0, 0.0).floored();
                if world.blocks.iter().any(|b| b.position == below) {
                    agent.act(Action::ActivateBlock { at: below });
                }
            }
            Mode::AiChat => self.ai_chat(),
            Mode::AiMove | Mode::AiHuman => {
                self.combat(world);
                if self.advisor.is_available() && rng.gen::<f64>() < ADVISORY_TICK_CHANCE {
                    self.ai_move(world);
                } else {
                    agent.act(position_nudge(world, 2.0, &mut rng));
                }
            }
        }
    }

    fn ai_chat(&self) {
        if !self.advisor.is_available() {
            self.agent.chat(fallback_phrase(&mut rand::thread_rng()));
            return;
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let agent = Arc::clone(&self.agent);
        let advisor = Arc::clone(&self.advisor);
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = agent.cancel_token().cancelled() => None,
                r = advisor.chat_line(agent.username()) => Some(r),
            };
            match result {
                Some(Ok(line)) => {
                    agent.chat(&line);
                }
                Some(Err(e)) => {
                    trace!(agent = %agent.username(), error = %e, "chat fallback");
                    agent.chat(fallback_phrase(&mut rand::thread_rng()));
                }
                None => {}
            }
            in_flight.store(false, Ordering::Release);
        });
    }

    fn ai_move(&self, world: &WorldView) {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let username = self.agent.username();
        let reading = AgentReading {
            username: username.to_string(),
            position: world.position,
            teammates: self.live.teammates(username, MAX_TEAMMATES),
            surroundings: world
                .blocks
                .iter()
                .filter(|b| b.position.distance_to(world.position) <= SURROUNDING_BLOCK_RANGE)
                .take(5)
                .map(|b| b.name.clone())
                .collect(),
            nearby_entities: world.entities_within(AWARENESS_RANGE).count(),
        };
        let agent = Arc::clone(&self.agent);
        let advisor = Arc::clone(&self.advisor);
        let live = Arc::clone(&self.live);
        let in_flight = Arc::clone(&self.in_flight);
        let world = world.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = agent.cancel_token().cancelled() => None,
                r = advisor.suggest_action(&reading) => Some(r),
            };
            match result {
                Some(Ok(suggestion)) => apply_suggestion(&agent, &live, &world, &suggestion),
                Some(Err(AdvisoryError::MalformedResponse(reason))) => {
                    debug!(agent = %agent.username(), %reason, "discarding advisory suggestion");
                }
                Some(Err(e)) => {
                    trace!(agent = %agent.username(), error = %e, "advisory failed, walking");
                    hold(&agent, &[Control::Forward], FALLBACK_WALK);
                }
                None => {}
            }
            in_flight.store(false, Ordering::Release);
        });
    }

    /// Attack the nearest fleet teammate in melee range after a short random
    /// delay.
    fn combat(&self, world: &WorldView) {
        let Some(target) = nearest_teammate(world, &self.live, self.agent.username(), MELEE_RANGE) else {
            return;
        };
        let target = target.clone();
        let mut rng = rand::thread_rng();
        let jitter = Duration::from_millis(rng.gen_range(0..MAX_COMBAT_JITTER_MS));
        let crit = rng.gen::<f64>() < CRIT_JUMP_CHANCE && world.on_ground;
        let angle = rng.gen::<f64>() * PI * 2.0;
        let agent = Arc::clone(&self.agent);
        let world = world.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = agent.cancel_token().cancelled() => return,
                () = tokio::time::sleep(jitter) => {}
            }
            agent.act(look_at(&world, target.eye_target()));
            if crit {
                hold(&agent, &[Control::Jump], CRIT_JUMP_HOLD);
            }
            agent.act(Action::Attack { entity_id: target.id });
            agent.act(Action::Position {
                at: world
                    .position
                    .offset(angle.cos() * STRAFE_STEP, 0.0, angle.sin() * STRAFE_STEP),
                on_ground: world.on_ground,
            });
        });
    }
}

/// Carry out one advisory suggestion.
fn apply_suggestion(agent: &Arc<Agent>, live: &LiveSet, world: &WorldView, suggestion: &ActionSuggestion) {
    let mut rng = rand::thread_rng();
    match suggestion.action {
        AgentAction::Jump => hold(agent, &[Control::Jump], JUMP_HOLD),
        AgentAction::Sprint | AgentAction::Wander => {
            let run_for = Duration::from_millis(1_500 + rng.gen_range(0..2_500));
            hold(agent, &[Control::Forward, Control::Sprint], run_for);
            if suggestion.action == AgentAction::Wander {
                let yaw = world.yaw as f64 + (rng.gen::<f64>() - 0.5) * PI;
                agent.act(Action::Look {
                    yaw: yaw as f32,
                    pitch: 0.0,
                });
            }
        }
        AgentAction::Crouch => hold(agent, &[Control::Sneak], CROUCH_HOLD),
        AgentAction::Swing => {
            agent.act(Action::Swing { hand: Hand::Right });
        }
        AgentAction::LookAtEntity => {
            let nearest = world.entities_within(AWARENESS_RANGE).min_by(|a, b| {
                a.position
                    .distance_to(world.position)
                    .total_cmp(&b.position.distance_to(world.position))
            });
            if let Some(entity) = nearest {
                agent.act(look_at(world, entity.eye_target()));
            }
        }
        AgentAction::LookAtFriend => {
            if let Some(friend) = nearest_teammate(world, live, agent.username(), AWARENESS_RANGE) {
                agent.act(look_at(world, friend.eye_target()));
            }
        }
        AgentAction::Mine => {
            let block = world
                .blocks
                .iter()
                .filter(|b| b.diggable && b.position.distance_to(world.position) <= SURROUNDING_BLOCK_RANGE)
                .min_by(|a, b| {
                    a.position
                        .distance_to(world.position)
                        .total_cmp(&b.position.distance_to(world.position))
                });
            if let Some(block) = block {
                agent.act(look_at(world, block.position));
                agent.act(Action::Dig { at: block.position });
            }
        }
        AgentAction::PunchEntity => {
            if let Some(target) = nearest_teammate(world, live, agent.username(), MELEE_RANGE) {
                agent.act(look_at(world, target.eye_target()));
                agent.act(Action::Attack { entity_id: target.id });
            }
        }
        AgentAction::ChatSocial | AgentAction::Idle => {}
    }
    if let Some(chat) = &suggestion.chat {
        agent.chat(chat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentSpec, DispatchContext};
    use crate::pause::PauseGate;
    use crate::sim::{Sent, SimSession};
    use drover_advisor::{CircuitBreaker, MockAdvisory, MockResponse};
    use drover_core::advisory::Advisory;
    use drover_core::config::FleetConfig;
    use drover_telemetry::TrafficCounters;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn intensity(n: u8) -> Intensity {
        Intensity::new(n).unwrap()
    }

    struct Harness {
        engine: BehaviorEngine,
        config: SharedConfig,
        live: Arc<LiveSet>,
        pause: PauseGate,
        counters: Arc<TrafficCounters>,
    }

    impl Harness {
        fn new(mode: Mode, level: u8, advisor: Advisor) -> Self {
            let config = SharedConfig::new(FleetConfig {
                mode,
                intensity: intensity(level),
                ..Default::default()
            });
            let live = Arc::new(LiveSet::new());
            let (wheel, _) = TickWheel::spawn(CancellationToken::new());
            Self {
                engine: BehaviorEngine::new(wheel, config.clone(), Arc::new(advisor), Arc::clone(&live)),
                config,
                live,
                pause: PauseGate::new(),
                counters: Arc::new(TrafficCounters::new()),
            }
        }

        fn agent(&self, name: &str) -> (Arc<Agent>, Arc<SimSession>) {
            let ctx = DispatchContext::new(self.pause.clone(), Arc::clone(&self.counters), Duration::ZERO);
            let agent = self
                .live
                .reserve(
                    |_| true,
                    |ordinal| {
                        Agent::new(
                            AgentSpec {
                                username: name.to_string(),
                                ordinal,
                                seq: ordinal as u64,
                                proxy: None,
                            },
                            ctx,
                            CancellationToken::new(),
                        )
                    },
                )
                .unwrap();
            let session = SimSession::new();
            assert!(agent.attach(session.clone()));
            assert!(agent.transition(AgentState::Active));
            (agent, session)
        }
    }

    fn mock_advisor(responses: Vec<MockResponse>) -> Advisor {
        let backend: Arc<dyn Advisory> = Arc::new(MockAdvisory::new(responses));
        Advisor::new(Some(backend), Arc::new(CircuitBreaker::default()))
    }

    fn teammate(id: u64, name: &str, at: Vec3) -> EntityView {
        EntityView {
            id,
            kind: EntityKind::Player,
            username: Some(name.to_string()),
            position: at,
            height: 1.8,
        }
    }

    #[test]
    fn periods_follow_intensity() {
        let mut rng = rand::thread_rng();
        let ms = |mode, level| {
            tick_period(mode, intensity(level), &mut rand::thread_rng())
                .unwrap()
                .as_millis()
        };
        assert_eq!(ms(Mode::Spam, 5), 60);
        assert_eq!(ms(Mode::Spam, 10), 20);
        assert_eq!(ms(Mode::Move, 10), 1000);
        assert_eq!(ms(Mode::PositionFlood, 1), 226);
        assert_eq!(ms(Mode::PositionFlood, 10), 10);
        assert_eq!(ms(Mode::TabSpam, 10), 50);
        assert_eq!(ms(Mode::ArmSpam, 10), 10);
        assert_eq!(ms(Mode::BlockInteract, 5), 1100);
        assert_eq!(ms(Mode::BlockInteract, 10), 200);
        assert_eq!(ms(Mode::AiChat, 1), 28_000);
        assert_eq!(ms(Mode::AiChat, 10), 15_000);
        assert!(tick_period(Mode::Stay, intensity(5), &mut rng).is_none());
        for _ in 0..20 {
            let d = tick_period(Mode::AiMove, intensity(1), &mut rng).unwrap();
            assert!(d >= Duration::from_secs(5) && d < Duration::from_secs(8));
        }
    }

    #[test]
    fn look_angles_point_at_target() {
        let eye = Vec3::new(0.0, 0.0, 0.0);
        let (yaw, pitch) = look_angles(eye, Vec3::new(0.0, 0.0, -5.0));
        assert!(yaw.abs() < 1e-6 && pitch.abs() < 1e-6);

        let (yaw, _) = look_angles(eye, Vec3::new(-5.0, 0.0, 0.0));
        assert!((yaw - std::f32::consts::FRAC_PI_2).abs() < 1e-6);

        let (_, pitch) = look_angles(eye, Vec3::new(0.0, 5.0, -5.0));
        assert!((pitch - std::f32::consts::FRAC_PI_4).abs() < 1e-6);
    }

    #[test]
    fn spam_lines_are_distinct() {
        let [a, b] = spam_lines(&mut rand::thread_rng(), 1_234_567);
        assert_ne!(a, b);
        assert!(a.ends_with(" 4567"));
        assert!(b.starts_with("[drover-load] "));
    }

    #[tokio::test(start_paused = true)]
    async fn spam_sends_two_lines_per_tick() {
        let h = Harness::new(Mode::Spam, 5, Advisor::disabled());
        let (agent, session) = h.agent("a");
        assert_eq!(h.engine.start(&agent), Mode::Spam);

        tokio::time::sleep(Duration::from_millis(130)).await;
        let sent = session.sent();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|s| matches!(s, Sent::Chat(_))));
        assert_eq!(h.counters.window_actions(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn intensity_change_applies_on_next_tick() {
        let h = Harness::new(Mode::Spam, 1, Advisor::disabled());
        let (agent, session) = h.agent("a");
        h.engine.start(&agent);

        tokio::time::sleep(Duration::from_millis(93)).await;
        assert_eq!(session.sent_total(), 2);
        h.config.update(|c| c.intensity = intensity(10));

        // The tick already queued at 184 ms still uses the old period.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(session.sent_total() >= 20);
    }

    #[tokio::test(start_paused = true)]
    async fn stay_schedules_nothing() {
        let h = Harness::new(Mode::Stay, 5, Advisor::disabled());
        let (agent, session) = h.agent("a");
        assert_eq!(h.engine.start(&agent), Mode::Stay);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(session.sent().is_empty());
        assert_eq!(h.engine.scheduled(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_suppresses_ticks_but_keeps_slot() {
        let h = Harness::new(Mode::TabSpam, 10, Advisor::disabled());
        let (agent, session) = h.agent("a");
        h.pause.pause();
        h.engine.start(&agent);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(session.sent().is_empty());
        assert_eq!(h.counters.window_actions(), 0);
        assert_eq!(h.engine.scheduled(), 1);

        h.pause.resume();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            session.sent()[..3],
            vec![Sent::Action(Action::TabComplete { text: "/".into() }); 3][..]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn arm_spam_swings_and_looks() {
        let h = Harness::new(Mode::ArmSpam, 5, Advisor::disabled());
        let (agent, session) = h.agent("a");
        h.engine.start(&agent);

        tokio::time::sleep(Duration::from_millis(81)).await;
        assert_eq!(
            session.sent(),
            vec![
                Sent::Action(Action::Swing { hand: Hand::Right }),
                Sent::Action(Action::Swing { hand: Hand::Left }),
                Sent::Action(Action::Look { yaw: 0.1, pitch: 0.0 }),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn block_interact_targets_block_below() {
        let h = Harness::new(Mode::BlockInteract, 10, Advisor::disabled());
        let (agent, session) = h.agent("a");
        h.engine.start(&agent);

        tokio::time::sleep(Duration::from_millis(201)).await;
        assert_eq!(
            session.sent(),
            vec![
                Sent::Action(Action::Swing { hand: Hand::Right }),
                Sent::Action(Action::ActivateBlock {
                    at: Vec3::new(0.0, 63.0, 0.0)
                }),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn position_flood_sends_five_small_steps() {
        let h = Harness::new(Mode::PositionFlood, 10, Advisor::disabled());
        let (agent, session) = h.agent("a");
        h.engine.start(&agent);

        tokio::time::sleep(Duration::from_millis(11)).await;
        let sent = session.sent();
        assert_eq!(sent.len(), 5);
        let origin = Vec3::new(0.5, 64.0, 0.5);
        for s in sent {
            let Sent::Action(Action::Position { at, .. }) = s else {
                panic!("unexpected {s:?}");
            };
            assert!(at.distance_to(origin) < 0.5);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_agent_leaves_the_wheel() {
        let h = Harness::new(Mode::Spam, 5, Advisor::disabled());
        let (agent, session) = h.agent("a");
        h.engine.start(&agent);
        tokio::time::sleep(Duration::from_millis(70)).await;

        agent.mark_terminated();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(session.sent_total(), 2);
        assert_eq!(h.engine.scheduled(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ai_chat_falls_back_without_advisor() {
        let h = Harness::new(Mode::AiChat, 10, Advisor::disabled());
        let (agent, session) = h.agent("a");
        h.engine.start(&agent);

        tokio::time::sleep(Duration::from_millis(15_001)).await;
        let sent = session.sent();
        assert_eq!(sent.len(), 1);
        let Sent::Chat(line) = &sent[0] else { panic!() };
        assert!(drover_advisor::advisor::FALLBACK_PHRASES.contains(&line.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn ai_chat_uses_advisor_line() {
        let h = Harness::new(
            Mode::AiChat,
            10,
            mock_advisor(vec![MockResponse::text("anyone up for a build?")]),
        );
        let (agent, session) = h.agent("a");
        h.engine.start(&agent);

        tokio::time::sleep(Duration::from_millis(15_010)).await;
        assert_eq!(session.sent(), vec![Sent::Chat("anyone up for a build?".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn ai_chat_rate_limit_trips_and_falls_back() {
        let h = Harness::new(Mode::AiChat, 10, mock_advisor(vec![MockResponse::rate_limited()]));
        let (agent, session) = h.agent("a");
        h.engine.start(&agent);

        tokio::time::sleep(Duration::from_millis(30_010)).await;
        let sent = session.sent();
        assert_eq!(sent.len(), 2);
        for s in sent {
            let Sent::Chat(line) = s else { panic!() };
            assert!(drover_advisor::advisor::FALLBACK_PHRASES.contains(&line.as_str()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ai_move_attacks_nearby_teammate_only() {
        let h = Harness::new(Mode::AiMove, 5, Advisor::disabled());
        let (agent, session) = h.agent("a");
        let _mate = h.agent("mate");
        let origin = Vec3::new(0.5, 64.0, 0.5);
        session.set_world(Some(WorldView {
            position: origin,
            on_ground: false,
            entities: vec![
                teammate(7, "mate", origin.offset(2.0, 0.0, 0.0)),
                teammate(8, "stranger", origin.offset(1.0, 0.0, 0.0)),
            ],
            ..Default::default()
        }));
        h.engine.start(&agent);

        tokio::time::sleep(Duration::from_millis(8_200)).await;
        let sent = session.sent();
        assert!(sent.contains(&Sent::Action(Action::Attack { entity_id: 7 })));
        assert!(!sent.contains(&Sent::Action(Action::Attack { entity_id: 8 })));
    }

    #[tokio::test(start_paused = true)]
    async fn ai_move_nudges_without_advisor() {
        let h = Harness::new(Mode::AiHuman, 5, Advisor::disabled());
        let (agent, session) = h.agent("a");
        h.engine.start(&agent);

        tokio::time::sleep(Duration::from_millis(8_001)).await;
        let sent = session.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], Sent::Action(Action::Position { on_ground: true, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn jump_suggestion_presses_and_releases() {
        let h = Harness::new(Mode::AiMove, 5, Advisor::disabled());
        let (agent, session) = h.agent("a");
        let world = agent.world().unwrap();
        let suggestion = drover_advisor::advisor::parse_action(
            &json!({"action": "jump", "chat": "hop"}).to_string(),
        )
        .unwrap();

        apply_suggestion(&agent, &h.live, &world, &suggestion);
        assert_eq!(
            session.sent(),
            vec![
                Sent::Action(Action::Control {
                    control: Control::Jump,
                    active: true
                }),
                Sent::Chat("hop".into()),
            ]
        );
        tokio::time::sleep(Duration::from_millis(501)).await;
        assert_eq!(
            session.sent().last(),
            Some(&Sent::Action(Action::Control {
                control: Control::Jump,
                active: false
            }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mine_suggestion_digs_nearest_block() {
        let h = Harness::new(Mode::AiMove, 5, Advisor::disabled());
        let (agent, session) = h.agent("a");
        let world = agent.world().unwrap();
        apply_suggestion(
            &agent,
            &h.live,
            &world,
            &ActionSuggestion {
                action: AgentAction::Mine,
                chat: None,
            },
        );
        let sent = session.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1],
            Sent::Action(Action::Dig {
                at: Vec3::new(0.0, 63.0, 0.0)
            })
        );
    }
}
