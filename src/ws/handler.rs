//! Bridge WebSocket upgrade handler

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::control::{ControlEvent, ControllerHandle, InboundEvent};
use crate::util::rate_limit::BridgeRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{InboundMsg, OutboundMsg};
use crate::ws::BridgeInfo;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    info!(remote = %remote, "WebSocket upgrade for bridge");
    ws.on_upgrade(move |socket| handle_socket(socket, remote, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, remote: SocketAddr, state: AppState) {
    let bridge_id = Uuid::new_v4();
    info!(bridge_id = %bridge_id, remote = %remote, "Bridge connected");

    let (mut ws_sink, ws_stream) = socket.split();

    // Subscribe before greeting so no command slips between the two
    let command_rx = state.controller.subscribe();

    let welcome = OutboundMsg::Welcome {
        bridge_id,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(bridge_id = %bridge_id, error = %e, "Failed to send welcome");
        return;
    }

    state.bridges.insert(BridgeInfo {
        bridge_id,
        connected_at: unix_millis(),
        remote: Some(remote.to_string()),
    });

    let rate_limiter = BridgeRateLimiter::new(state.config.bridge_rate_limit);
    run_session(
        bridge_id,
        ws_sink,
        ws_stream,
        state.controller.clone(),
        command_rx,
        rate_limiter,
    )
    .await;

    state.bridges.remove(&bridge_id);

    info!(bridge_id = %bridge_id, "Bridge disconnected");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    bridge_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    controller: ControllerHandle,
    mut command_rx: broadcast::Receiver<OutboundMsg>,
    rate_limiter: BridgeRateLimiter,
) {
    // Spawn writer task: published commands -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            match command_rx.recv().await {
                Ok(msg) => {
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(bridge_id = %bridge_id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // a dropped command leaves the gate closed until time-up or timeout
                    warn!(
                        bridge_id = %bridge_id,
                        lagged_count = n,
                        "Bridge lagged, skipped {} commands", n
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(bridge_id = %bridge_id, "Command channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> control loop
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<InboundMsg>(&text) {
                    Ok(msg) => {
                        let event = ControlEvent::from(msg);
                        if !admit(&rate_limiter, &event) {
                            warn!(
                                bridge_id = %bridge_id,
                                channel = event.channel(),
                                "Rate limited inbound message"
                            );
                            continue;
                        }

                        let event = InboundEvent {
                            bridge_id,
                            event,
                            received_at: unix_millis(),
                        };

                        if controller.submit(event).await.is_err() {
                            debug!(bridge_id = %bridge_id, "Event channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(bridge_id = %bridge_id, error = %e, "Failed to parse bridge message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(bridge_id = %bridge_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(bridge_id = %bridge_id, "Bridge initiated close");
                break;
            }
            Err(e) => {
                error!(bridge_id = %bridge_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Only state updates count against the bridge quota. Acknowledgments and
/// session frames always pass, since a dropped one leaves the gate closed.
fn admit(rate_limiter: &BridgeRateLimiter, event: &ControlEvent) -> bool {
    event.is_acknowledgment() || event.is_session_control() || rate_limiter.check_inbound()
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &OutboundMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use crate::config::Config;
    use crate::control::snapshot::Features;
    use crate::control::{Controller, Position};
    use crate::http::build_router;
    use crate::policy::Policy;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Always sends the arm to the middle
    struct MidArm;

    impl Policy for MidArm {
        fn predict(&self, _features: &Features) -> f64 {
            1.0
        }
    }

    async fn spawn_server(rate_limit: &str) -> (SocketAddr, AppState) {
        let rate_limit = rate_limit.to_string();
        let config = Config::from_lookup(|var| match var {
            "CONTROL_HZ" => Some("100".to_string()),
            "BRIDGE_RATE_LIMIT" => Some(rate_limit.clone()),
            _ => None,
        })
        .unwrap();
        let (controller, handle) =
            Controller::new(config.control.clone(), Some(Arc::new(MidArm)), 64, 16);
        tokio::spawn(controller.run());

        let state = AppState::new(config, handle);
        let router = build_router(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        (addr, state)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        client
    }

    async fn send_text(client: &mut Client, text: &str) {
        client.send(WsMessage::Text(text.to_string())).await.unwrap();
    }

    async fn next_json(client: &mut Client) -> serde_json::Value {
        loop {
            let frame = timeout(Duration::from_secs(2), client.next())
                .await
                .expect("no frame from server")
                .expect("socket closed")
                .unwrap();
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn wait_for(what: &str, check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn bridge_session_round_trip() {
        let (addr, state) = spawn_server("200").await;
        let mut client = connect(addr).await;

        let welcome = next_json(&mut client).await;
        assert_eq!(welcome["channel"], "welcome");
        assert!(welcome["data"]["bridge_id"].is_string());
        assert!(welcome["data"]["server_time"].is_u64());
        wait_for("registration", || state.bridges.connected() == 1).await;

        // garbage is logged and skipped, the session stays up
        send_text(&mut client, "not json").await;
        send_text(&mut client, r#"{"channel":"laser","data":1}"#).await;
        send_text(&mut client, r#"{"channel":"state_data","data":[1,0,0,0,0,0,0]}"#).await;
        wait_for("state update", || {
            state.controller.status().mole_states == [1, 0, 0, 0, 0, 0, 0]
        })
        .await;

        send_text(&mut client, r#"{"channel":"game_started"}"#).await;
        send_text(&mut client, r#"{"channel":"autonomous_mode","data":1}"#).await;
        send_text(&mut client, r#"{"channel":"state_data","data":[0,0,1,0,0,0,0]}"#).await;

        let command = next_json(&mut client).await;
        assert_eq!(
            command,
            serde_json::json!({"channel": "cmd_arm_pos", "data": 2})
        );

        let _ = client.close(None).await;
        wait_for("unregistration", || state.bridges.connected() == 0).await;
    }

    #[tokio::test]
    async fn acknowledgments_pass_an_exhausted_quota() {
        let (addr, state) = spawn_server("1").await;
        let mut client = connect(addr).await;
        next_json(&mut client).await;

        send_text(&mut client, r#"{"channel":"game_started"}"#).await;
        send_text(&mut client, r#"{"channel":"autonomous_mode","data":1}"#).await;
        send_text(&mut client, r#"{"channel":"state_data","data":[0,0,1,0,0,0,0]}"#).await;
        assert_eq!(next_json(&mut client).await["channel"], "cmd_arm_pos");
        assert!(state.controller.status().action_in_flight);

        // quota spent: this update is dropped, the ack is not
        send_text(&mut client, r#"{"channel":"state_data","data":[0,0,0,1,0,0,0]}"#).await;
        send_text(&mut client, r#"{"channel":"whack_complete","data":3}"#).await;
        wait_for("acknowledgment", || !state.controller.status().action_in_flight).await;

        let status = state.controller.status();
        assert_eq!(status.mole_states, [0, 0, 1, 0, 0, 0, 0]);
        assert_eq!(status.arm_pos, Position::Mid);
        assert_eq!(status.dispatched, 1);
    }

    #[test]
    fn quota_only_applies_to_state_updates() {
        let limiter = BridgeRateLimiter::new(1);
        let update = ControlEvent::StateUpdate { moles: vec![0; 7] };

        assert!(admit(&limiter, &update));
        assert!(!admit(&limiter, &update));
        assert!(admit(&limiter, &ControlEvent::WhackComplete { slot: 3 }));
        assert!(admit(&limiter, &ControlEvent::RobotArrived { pos: 2 }));
        assert!(admit(&limiter, &ControlEvent::TimeLeft { seconds: 0 }));
        assert!(admit(&limiter, &ControlEvent::GameStarted));
        assert!(admit(&limiter, &ControlEvent::AutonomousModeSet { enabled: true }));
        assert!(!admit(&limiter, &update));
    }
}
