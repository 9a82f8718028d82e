//! Control command handlers.
//!
//! Commands are fire-and-forget: an accepted command produces events (at
//! least a status snapshot) on the fleet broadcast and no direct reply. Only
//! requests that cannot be acted on get a reply frame.

use drover_core::config::{ConfigPatch, StartRequest};
use drover_engine::{Fleet, RunScript};
use serde::Deserialize;

use crate::rpc::{self, RpcResponse};

/// Shared state available to all handlers.
pub struct HandlerState {
    pub fleet: Fleet,
}

impl HandlerState {
    pub fn new(fleet: Fleet) -> Self {
        Self { fleet }
    }
}

#[derive(Deserialize)]
struct SaveScript {
    name: String,
    content: String,
}

/// Dispatch one control command. Returns the reply frame to send back to the
/// requesting client, if any.
pub async fn dispatch(
    state: &HandlerState,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> Option<RpcResponse> {
    let fleet = &state.fleet;
    tracing::debug!(method, "control command");

    match method {
        "start" | "start-test" => match rpc::params_as::<StartRequest>(params) {
            Ok(request) => fleet.start(request),
            Err(e) => return Some(RpcResponse::invalid_params(id, e)),
        },
        "update-config" => match rpc::params_as::<ConfigPatch>(params) {
            Ok(patch) => fleet.update_config(patch),
            Err(e) => return Some(RpcResponse::invalid_params(id, e)),
        },
        "toggle-ai" => match rpc::optional_bool(params, "enabled") {
            Some(enabled) => fleet.toggle_ai(enabled),
            None => return Some(RpcResponse::invalid_params(id, "Missing required parameter: enabled")),
        },
        "pause" | "pause-test" => fleet.pause(),
        "resume" | "resume-test" => fleet.resume(),
        "stop" | "stop-test" => fleet.stop(),
        "broadcast-chat" => match string_param(params, "text") {
            Some(text) => {
                fleet.broadcast_chat(text);
            }
            None => return Some(RpcResponse::invalid_params(id, "Missing required parameter: text")),
        },
        "load-proxies" | "load-proxy-file" => match string_param(params, "type") {
            Some(kind) => {
                // Failures are logged by the fleet and answered with a status push.
                let _ = fleet.load_proxies(kind).await;
            }
            None => return Some(RpcResponse::invalid_params(id, "Missing required parameter: type")),
        },
        "save-script" => match rpc::params_as::<SaveScript>(params) {
            Ok(script) => {
                let _ = fleet.save_script(&script.name, &script.content);
            }
            Err(e) => return Some(RpcResponse::invalid_params(id, e)),
        },
        "run-script" => match rpc::params_as::<RunScript>(params) {
            Ok(request) => {
                let _ = fleet.run_script(request);
            }
            Err(e) => return Some(RpcResponse::invalid_params(id, e)),
        },
        "status" => {
            let snapshot = serde_json::to_value(fleet.status()).unwrap_or_default();
            return Some(RpcResponse::success(id, snapshot));
        }
        _ => return Some(RpcResponse::method_not_found(id, method)),
    }
    None
}

/// `params.key` as a string, or `params` itself when the client sent a bare
/// string.
fn string_param<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params
        .as_str()
        .or_else(|| rpc::require_str(params, key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use drover_advisor::Advisor;
    use drover_core::events::FleetEvent;
    use drover_core::session::SessionConnector;
    use drover_engine::fleet::FleetOptions;
    use drover_engine::SimulatedConnector;
    use serde_json::json;
    use tokio::sync::broadcast;

    fn setup() -> (HandlerState, Arc<SimulatedConnector>, broadcast::Receiver<FleetEvent>) {
        let connector = Arc::new(SimulatedConnector::new());
        let (tx, rx) = broadcast::channel(4096);
        let fleet = Fleet::new(
            Arc::clone(&connector) as Arc<dyn SessionConnector>,
            Arc::new(Advisor::disabled()),
            tx,
            FleetOptions::default(),
        );
        (HandlerState::new(fleet), connector, rx)
    }

    fn drain(rx: &mut broadcast::Receiver<FleetEvent>) -> Vec<FleetEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn start_test_alias_starts_fleet() {
        let (state, connector, mut rx) = setup();
        let reply = dispatch(
            &state,
            "start-test",
            &json!({"count": "3", "host": "mc.test", "mode": "move", "intensity": "8"}),
            Some(json!(1)),
        )
        .await;
        assert!(reply.is_none());
        assert!(matches!(drain(&mut rx).last(), Some(FleetEvent::Status(_))));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(connector.created_count(), 3);
        let status = state.fleet.status();
        assert_eq!(status.config.host, "mc.test");
        assert_eq!(status.config.intensity.get(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_method_gets_error_frame() {
        let (state, _, mut rx) = setup();
        let reply = dispatch(&state, "teleport", &json!({}), Some(json!(7))).await.unwrap();
        assert!(!reply.success);
        assert_eq!(reply.error.unwrap().code, "METHOD_NOT_FOUND");
        assert_eq!(reply.id, Some(json!(7)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_push_pause_status() {
        let (state, _, mut rx) = setup();
        assert!(dispatch(&state, "pause-test", &serde_json::Value::Null, None).await.is_none());
        assert!(state.fleet.is_paused());
        let events = drain(&mut rx);
        assert!(matches!(events[0], FleetEvent::PauseStatus { is_paused: true }));

        dispatch(&state, "resume", &serde_json::Value::Null, None).await;
        assert!(!state.fleet.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_ai_requires_flag() {
        let (state, _, _rx) = setup();
        let reply = dispatch(&state, "toggle-ai", &json!({}), None).await.unwrap();
        assert_eq!(reply.error.unwrap().code, "INVALID_PARAMS");

        assert!(dispatch(&state, "toggle-ai", &json!({"enabled": true}), None).await.is_none());
        assert!(state.fleet.status().ai_active);
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_chat_accepts_bare_string() {
        let (state, connector, _rx) = setup();
        dispatch(&state, "start", &json!({"count": 1}), None).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        dispatch(&state, "broadcast-chat", &json!("gg"), None).await;
        dispatch(&state, "broadcast-chat", &json!({"text": "wp"}), None).await;
        let sent = connector.open_sessions()[0].sent();
        assert!(sent.contains(&drover_engine::sim::Sent::Chat("gg".into())));
        assert!(sent.contains(&drover_engine::sim::Sent::Chat("wp".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_alias_clears_fleet() {
        let (state, _, mut rx) = setup();
        dispatch(&state, "start", &json!({"count": 2}), None).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        drain(&mut rx);

        assert!(dispatch(&state, "stop-test", &serde_json::Value::Null, None).await.is_none());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], FleetEvent::Status(s) if s.count == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn bad_script_is_reported_as_event() {
        let (state, _, mut rx) = setup();
        let reply = dispatch(
            &state,
            "save-script",
            &json!({"name": "warmup", "content": "jump\nwait forever"}),
            None,
        )
        .await;
        assert!(reply.is_none());
        let events = drain(&mut rx);
        assert!(matches!(&events[0], FleetEvent::ScriptError { name, line: 2, .. } if name == "warmup"));

        let reply = dispatch(&state, "save-script", &json!({"name": "warmup"}), None).await.unwrap();
        assert_eq!(reply.error.unwrap().code, "INVALID_PARAMS");
    }

    #[tokio::test(start_paused = true)]
    async fn load_proxies_requires_type() {
        let (state, _, _rx) = setup();
        let reply = dispatch(&state, "load-proxies", &json!({}), None).await.unwrap();
        assert_eq!(reply.error.unwrap().code, "INVALID_PARAMS");
    }

    #[tokio::test(start_paused = true)]
    async fn status_query_replies_with_snapshot() {
        let (state, _, _rx) = setup();
        let reply = dispatch(&state, "status", &json!({}), Some(json!("s1"))).await.unwrap();
        assert!(reply.success);
        let result = reply.result.unwrap();
        assert_eq!(result["count"], 0);
        assert_eq!(result["isPaused"], false);
    }
}
