//! Control loop: owns all controller state and runs the fixed-cadence tick

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc::error::{SendError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ControlConfig;
use crate::policy::Policy;
use crate::util::time::{tick_duration, Timer};
use crate::ws::protocol::OutboundMsg;

use super::dispatch::{ActionCommand, ActionDispatcher};
use super::gate::ActionGate;
use super::session::{SessionPhase, SessionState};
use super::snapshot::{SensorSnapshot, MOLE_COUNT};
use super::{ControlError, ControlEvent, InboundEvent, Position};

/// Point-in-time view of the controller, published after every tick
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub phase: SessionPhase,
    pub session_id: Option<Uuid>,
    pub active: bool,
    pub autonomous_enabled: bool,
    pub policy_ready: bool,
    pub new_state_available: bool,
    pub action_in_flight: bool,
    pub robot_pos: Position,
    pub arm_pos: Position,
    pub mole_states: [i32; MOLE_COUNT],
    /// Last reported seconds remaining
    pub time_left: Option<i64>,
    pub tick: u64,
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub rejected_events: u64,
    pub stale_acks: u64,
    pub timeouts: u64,
    pub last_command: Option<OutboundMsg>,
    pub last_dispatch_at: Option<DateTime<Utc>>,
}

/// Handle to the running control loop
#[derive(Clone)]
pub struct ControllerHandle {
    event_tx: mpsc::Sender<InboundEvent>,
    command_tx: broadcast::Sender<OutboundMsg>,
    status: Arc<RwLock<ControllerStatus>>,
}

impl ControllerHandle {
    /// Queue an event for the next tick
    pub async fn submit(&self, event: InboundEvent) -> Result<(), SendError<InboundEvent>> {
        self.event_tx.send(event).await
    }

    /// Receive every command published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMsg> {
        self.command_tx.subscribe()
    }

    pub fn status(&self) -> ControllerStatus {
        self.status.read().clone()
    }
}

/// The controller. Session, snapshot and gate are touched only from here,
/// so ingest and the gate check never interleave.
pub struct Controller {
    config: ControlConfig,
    session: SessionState,
    snapshot: SensorSnapshot,
    gate: ActionGate,
    policy: Option<Arc<dyn Policy>>,
    dispatcher: ActionDispatcher,
    event_rx: mpsc::Receiver<InboundEvent>,
    status: Arc<RwLock<ControllerStatus>>,
    phase: SessionPhase,
    tick: u64,
    time_left: Option<i64>,
    rejected_events: u64,
    stale_acks: u64,
    dispatch_failures: u64,
    timeouts: u64,
    last_command: Option<ActionCommand>,
    last_dispatch_at: Option<DateTime<Utc>>,
}

impl Controller {
    /// Create a controller. `policy` is `None` when the model could not be
    /// built; autonomous decisions are then never made.
    pub fn new(
        config: ControlConfig,
        policy: Option<Arc<dyn Policy>>,
        event_buffer: usize,
        command_buffer: usize,
    ) -> (Self, ControllerHandle) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer.max(1));
        let (command_tx, _) = broadcast::channel(command_buffer.max(1));

        let mut controller = Self {
            config,
            session: SessionState::default(),
            snapshot: SensorSnapshot::default(),
            gate: ActionGate::default(),
            policy,
            dispatcher: ActionDispatcher::new(command_tx.clone()),
            event_rx,
            status: Arc::new(RwLock::new(ControllerStatus {
                phase: SessionPhase::Idle,
                session_id: None,
                active: false,
                autonomous_enabled: false,
                policy_ready: false,
                new_state_available: false,
                action_in_flight: false,
                robot_pos: Position::Mid,
                arm_pos: Position::Mid,
                mole_states: [0; MOLE_COUNT],
                time_left: None,
                tick: 0,
                dispatched: 0,
                dispatch_failures: 0,
                rejected_events: 0,
                stale_acks: 0,
                timeouts: 0,
                last_command: None,
                last_dispatch_at: None,
            })),
            phase: SessionPhase::Idle,
            tick: 0,
            time_left: None,
            rejected_events: 0,
            stale_acks: 0,
            dispatch_failures: 0,
            timeouts: 0,
            last_command: None,
            last_dispatch_at: None,
        };
        controller.publish_status();

        let handle = ControllerHandle {
            event_tx,
            command_tx,
            status: controller.status.clone(),
        };

        (controller, handle)
    }

    /// Run the control loop until every event sender is gone
    pub async fn run(mut self) {
        info!(
            tick_hz = self.config.tick_hz,
            policy_ready = self.policy_ready(),
            "Control loop started"
        );

        let mut tick_interval = interval(tick_duration(self.config.tick_hz));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            let open = self.drain_events();
            self.step(Instant::now());
            self.publish_status();

            if !open {
                info!(tick = self.tick, "Event queue closed, control loop stopping");
                break;
            }
        }
    }

    /// Apply every queued event in arrival order. Returns false once the
    /// queue is closed and empty.
    fn drain_events(&mut self) -> bool {
        loop {
            match self.event_rx.try_recv() {
                Ok(inbound) => {
                    debug!(
                        bridge_id = %inbound.bridge_id,
                        channel = inbound.event.channel(),
                        received_at = inbound.received_at,
                        "Applying event"
                    );
                    self.apply(inbound.event);
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Apply a single event to session, snapshot and gate
    pub fn apply(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::WhackComplete { slot } => {
                if let Err(err) = self.snapshot.record_whack(slot) {
                    self.reject(err);
                }
                self.acknowledge("whack_complete");
            }
            ControlEvent::RobotArrived { pos } => {
                if let Err(err) = self.snapshot.record_arrival(pos) {
                    self.reject(err);
                }
                self.acknowledge("robot_position_arrive");
            }
            ControlEvent::StateUpdate { moles } => match self.snapshot.replace_moles(&moles) {
                Ok(()) => self.gate.mark_new_state(),
                Err(err) => self.reject(err),
            },
            ControlEvent::AutonomousModeSet { enabled } => {
                if enabled != self.session.autonomous_enabled {
                    info!(enabled, "Autonomous mode changed");
                }
                self.session.set_autonomous(enabled);
            }
            ControlEvent::GameStarted => match self.session.start() {
                Some(session_id) => info!(session_id = %session_id, "Game started"),
                None => debug!("Game start repeated during active session"),
            },
            ControlEvent::TimeLeft { seconds } => {
                self.time_left = Some(seconds);
                if seconds <= 0 {
                    self.end_session();
                }
            }
        }
        self.track_phase();
    }

    /// Run one gate evaluation and, if permitted, one decision
    pub fn step(&mut self, now: Instant) -> Option<ActionCommand> {
        self.tick += 1;

        if let Some(timeout) = self.config.action_timeout {
            if self.gate.expired(now, timeout) {
                if let Some(expired) = self.gate.release() {
                    self.timeouts += 1;
                    warn!(
                        channel = expired.command.channel(),
                        waited_ms = now.saturating_duration_since(expired.since).as_millis() as u64,
                        "No acknowledgment before timeout, reopening gate"
                    );
                }
            }
        }

        let outcome = self.decide(now);
        self.track_phase();
        outcome
    }

    fn decide(&mut self, now: Instant) -> Option<ActionCommand> {
        let policy_ready = self.policy_ready();
        if !self.gate.try_acquire(&self.session, policy_ready) {
            return None;
        }
        let Some(policy) = self.policy.clone() else {
            self.gate.release();
            return None;
        };

        let features = self.snapshot.features();
        let timer = Timer::new();
        let raw_action = policy.predict(&features);
        let elapsed = timer.elapsed();

        debug!(
            tick = self.tick,
            ?features,
            raw_action,
            predict_micros = timer.elapsed_micros(),
            "Policy decision"
        );
        if elapsed > tick_duration(self.config.tick_hz) {
            warn!(
                predict_ms = elapsed.as_millis() as u64,
                "Policy predict overran the tick period"
            );
        }

        match self.dispatcher.dispatch(raw_action) {
            Ok(command) => {
                self.gate.commit(command, now);
                self.last_command = Some(command);
                self.last_dispatch_at = Some(Utc::now());
                Some(command)
            }
            Err(err) => {
                self.gate.release();
                self.dispatch_failures += 1;
                warn!(error = %err, "Dispatch failed, gate reopened");
                None
            }
        }
    }

    fn acknowledge(&mut self, channel: &'static str) {
        if !self.gate.action_in_flight() {
            self.stale_acks += 1;
            let err = ControlError::StaleAcknowledgment { channel };
            debug!(error = %err, "Ignoring acknowledgment");
            return;
        }
        if let Some(done) = self.gate.release() {
            info!(
                channel,
                command = done.command.channel(),
                latency_ms = done.since.elapsed().as_millis() as u64,
                "Action acknowledged"
            );
        }
    }

    fn end_session(&mut self) {
        if let Some(pending) = self.gate.in_flight() {
            // the apparatus may still execute it
            warn!(
                channel = pending.command.channel(),
                value = pending.command.position().wire(),
                "Session ended with a command in flight"
            );
        }
        if self.session.active {
            info!(
                session_id = ?self.session.session_id,
                dispatched = self.dispatcher.dispatched(),
                "Game over"
            );
        }
        self.session.end();
        self.gate.reset();
        self.snapshot.reset_positions();
    }

    fn reject(&mut self, err: ControlError) {
        self.rejected_events += 1;
        warn!(error = %err, "Rejected event");
    }

    fn track_phase(&mut self) {
        let phase = SessionPhase::derive(&self.session, &self.gate);
        if phase != self.phase {
            info!(
                from = ?self.phase,
                to = ?phase,
                session_id = ?self.session.session_id,
                "Phase transition"
            );
            self.phase = phase;
        }
    }

    fn publish_status(&mut self) {
        let status = ControllerStatus {
            phase: self.phase,
            session_id: self.session.session_id,
            active: self.session.active,
            autonomous_enabled: self.session.autonomous_enabled,
            policy_ready: self.policy_ready(),
            new_state_available: self.gate.new_state_available(),
            action_in_flight: self.gate.action_in_flight(),
            robot_pos: self.snapshot.robot_pos,
            arm_pos: self.snapshot.arm_pos,
            mole_states: self.snapshot.mole_states,
            time_left: self.time_left,
            tick: self.tick,
            dispatched: self.dispatcher.dispatched(),
            dispatch_failures: self.dispatch_failures,
            rejected_events: self.rejected_events,
            stale_acks: self.stale_acks,
            timeouts: self.timeouts,
            last_command: self.last_command.map(OutboundMsg::from),
            last_dispatch_at: self.last_dispatch_at,
        };
        *self.status.write() = status;
    }

    pub fn policy_ready(&self) -> bool {
        self.policy.is_some()
    }
}

#[cfg(test)]
impl Controller {
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn snapshot(&self) -> &SensorSnapshot {
        &self.snapshot
    }

    pub fn gate(&self) -> &ActionGate {
        &self.gate
    }
}
