//! UE Actor
//!
//! One task per emulated UE. The actor owns the [`UeContext`], relays
//! scenario commands to the signaling engine, reports MM state changes
//! back to its supervisor, and provisions the UE tunnel once the UE is
//! registered and the device message has arrived.
//!
//! The run loop polls, in priority order:
//! 1. the kill token
//! 2. engine events
//! 3. scenario commands
//!
//! Every lifecycle ends with exactly one `StateChange { state: Null }`
//! event, after which the actor returns its [`UeOutcome`].

use std::fmt;
use std::sync::Arc;

use nextgsim_gtp::{DeviceMessage, TunnelConfigurator};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::{UeContext, UeIdentity};
use crate::engine::{EngineEvent, ProcedureRequest, SignalingEngine};
use crate::error::ActorError;
use crate::state::{Attachment, MmState};
use crate::tasks::{
    signalled, ScenarioEvent, ScenarioMessage, COMMAND_CHANNEL_CAPACITY, DEFAULT_CHANNEL_CAPACITY,
};

/// How a UE lifecycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UeStatus {
    /// Detached normally
    Completed,
    /// Ended after a failure
    Failed(String),
    /// Cancelled by the supervisor
    Killed,
}

impl fmt::Display for UeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UeStatus::Completed => write!(f, "completed"),
            UeStatus::Failed(reason) => write!(f, "failed: {reason}"),
            UeStatus::Killed => write!(f, "killed"),
        }
    }
}

/// Result of one UE lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeOutcome {
    /// Fleet slot
    pub slot: u32,
    /// Wave
    pub wave: u32,
    /// SUPI
    pub supi: String,
    /// Final status
    pub status: UeStatus,
    /// PDU sessions established
    pub pdu_sessions: u32,
}

/// Handle held by the owner of a UE actor.
#[derive(Debug)]
pub struct UeHandle {
    /// Command channel
    pub commands: mpsc::Sender<ScenarioMessage>,
    /// Event channel
    pub events: mpsc::Receiver<ScenarioEvent>,
    /// Actor task
    pub task: JoinHandle<UeOutcome>,
}

/// Spawns a UE actor.
///
/// `tunnel` enables data-plane provisioning. `kill` cancels the actor as
/// soon as it carries `true`.
pub fn spawn_ue(
    identity: UeIdentity,
    engine: Arc<dyn SignalingEngine>,
    tunnel: Option<TunnelConfigurator>,
    kill: watch::Receiver<bool>,
) -> UeHandle {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (events_tx, events_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);

    let actor = UeActor::new(identity, tunnel, events_tx);
    let task = tokio::spawn(actor.run(engine, commands_rx, kill));

    UeHandle {
        commands: commands_tx,
        events: events_rx,
        task,
    }
}

enum Flow {
    Continue,
    Finish,
}

struct UeActor {
    ctx: UeContext,
    supi: String,
    tunnel: Option<TunnelConfigurator>,
    events: mpsc::Sender<ScenarioEvent>,
    engine_tx: Option<mpsc::Sender<ProcedureRequest>>,
    /// Device message waiting for registration and a UE address
    pending_message: Option<Vec<u8>>,
    killed: bool,
}

impl UeActor {
    fn new(
        identity: UeIdentity,
        tunnel: Option<TunnelConfigurator>,
        events: mpsc::Sender<ScenarioEvent>,
    ) -> Self {
        Self {
            supi: identity.supi(),
            ctx: UeContext::new(identity),
            tunnel,
            events,
            engine_tx: None,
            pending_message: None,
            killed: false,
        }
    }

    async fn run(
        mut self,
        engine: Arc<dyn SignalingEngine>,
        mut commands: mpsc::Receiver<ScenarioMessage>,
        mut kill: watch::Receiver<bool>,
    ) -> UeOutcome {
        info!(
            supi = %self.supi,
            slot = self.ctx.identity.slot,
            wave = self.ctx.identity.wave,
            gnb = %self.ctx.gnb,
            "UE actor started"
        );

        let link = match engine.attach(&self.ctx.identity).await {
            Ok(link) => link,
            Err(e) => {
                self.fail(e).await;
                return self.finish().await;
            }
        };
        self.engine_tx = Some(link.requests);
        let mut engine_rx = link.events;
        let mut commands_open = true;

        loop {
            let flow = tokio::select! {
                biased;

                _ = signalled(&mut kill) => {
                    info!(supi = %self.supi, "Kill signal received");
                    self.killed = true;
                    Flow::Finish
                }

                event = engine_rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        self.engine_tx = None;
                        self.fail(ActorError::EngineLost).await
                    }
                },

                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        debug!(supi = %self.supi, "Command channel closed");
                        commands_open = false;
                        Flow::Continue
                    }
                },
            };

            if let Flow::Finish = flow {
                break;
            }
        }

        self.finish().await
    }

    async fn handle_command(&mut self, cmd: ScenarioMessage) -> Flow {
        debug!(supi = %self.supi, "Command {cmd}");
        match cmd {
            ScenarioMessage::Registration => self.request(ProcedureRequest::Register).await,
            ScenarioMessage::NewPduSession => {
                if !self.ctx.mm_state.is_registered() {
                    warn!(
                        supi = %self.supi,
                        state = %self.ctx.mm_state,
                        "NewPDUSession ignored, UE is not registered"
                    );
                    return Flow::Continue;
                }
                match self.ctx.allocate_psi() {
                    Some(psi) => {
                        self.request(ProcedureRequest::EstablishPduSession { psi })
                            .await
                    }
                    None => {
                        warn!(supi = %self.supi, "No PDU session identity left");
                        Flow::Continue
                    }
                }
            }
            ScenarioMessage::Handover { target } => {
                info!(supi = %self.supi, "Handover from gNB {} to gNB {}", self.ctx.gnb, target.id);
                self.request(ProcedureRequest::Handover { target }).await
            }
            ScenarioMessage::Terminate => self.request(ProcedureRequest::Deregister).await,
            ScenarioMessage::Kill => {
                info!(supi = %self.supi, "Kill command received");
                self.killed = true;
                Flow::Finish
            }
        }
    }

    async fn handle_event(&mut self, event: EngineEvent) -> Flow {
        match event {
            EngineEvent::StateChanged(state) => {
                let previous = self.ctx.mm_state;
                if self.ctx.set_state(state) {
                    info!(supi = %self.supi, "Switched from state {previous} to state {state}");
                    if state != MmState::Null {
                        self.emit(ScenarioEvent::StateChange { state }).await;
                    }
                }
                match state.attachment() {
                    Attachment::Null => Flow::Finish,
                    Attachment::Registered => self.try_provision().await,
                    Attachment::Other => Flow::Continue,
                }
            }
            EngineEvent::PduSessionEstablished { psi, ue_ip } => {
                self.ctx.pdu_sessions += 1;
                if self.ctx.ip.is_none() {
                    self.ctx.ip = Some(ue_ip);
                }
                info!(supi = %self.supi, psi, ue_ip = %ue_ip, "PDU session established");
                self.try_provision().await
            }
            EngineEvent::DeviceMessage(payload) => {
                if self.tunnel.is_none() {
                    debug!(supi = %self.supi, "Tunnel disabled, device message ignored");
                    return Flow::Continue;
                }
                self.pending_message = Some(payload);
                self.try_provision().await
            }
            EngineEvent::HandoverComplete { gnb, gtp_ip } => {
                info!(supi = %self.supi, "Handover to gNB {gnb} complete");
                self.ctx.gnb = gnb;
                self.ctx.gnb_ip = gtp_ip;
                Flow::Continue
            }
            EngineEvent::ProcedureFailed { reason } => {
                self.fail(ActorError::Procedure(reason)).await
            }
        }
    }

    /// Provisions the tunnel once the UE is registered, has an address and
    /// a device message is pending.
    async fn try_provision(&mut self) -> Flow {
        let Some(configurator) = self.tunnel.clone() else {
            return Flow::Continue;
        };
        if !self.ctx.mm_state.is_registered() {
            return Flow::Continue;
        }
        let Some(ue_ip) = self.ctx.ip else {
            return Flow::Continue;
        };
        let Some(payload) = self.pending_message.take() else {
            return Flow::Continue;
        };

        let msg = match DeviceMessage::from_slice(&payload) {
            Ok(msg) => msg,
            Err(e) => return self.fail(e.into()).await,
        };
        self.ctx.gnb_ip = msg.gnb_ip;

        if let Some(previous) = self.ctx.tunnel.take() {
            configurator.teardown(&previous).await;
        }

        let msin = self.ctx.identity.msin.clone();
        match configurator.provision(&msin, ue_ip, &msg).await {
            Ok(resources) => {
                self.ctx.tunnel = Some(resources);
                Flow::Continue
            }
            Err(e) => {
                configurator.discard(&msin, ue_ip, msg.table()).await;
                self.fail(e.into()).await
            }
        }
    }

    async fn request(&mut self, request: ProcedureRequest) -> Flow {
        let Some(tx) = &self.engine_tx else {
            debug!(supi = %self.supi, "No engine link, {request:?} dropped");
            return Flow::Continue;
        };
        if tx.send(request).await.is_err() {
            self.engine_tx = None;
            return self.fail(ActorError::EngineLost).await;
        }
        Flow::Continue
    }

    /// Records a failure and starts detaching. The lifecycle ends at once
    /// when there is nothing to detach or no engine to detach through.
    async fn fail(&mut self, err: ActorError) -> Flow {
        let reason = err.to_string();
        warn!(supi = %self.supi, "UE failed: {reason}");
        self.ctx.record_failure(&reason);
        self.emit(ScenarioEvent::Failure { reason }).await;

        match self.ctx.mm_state {
            MmState::Null => return Flow::Finish,
            MmState::DeregisteredInitiated if self.engine_tx.is_some() => return Flow::Continue,
            _ => {}
        }
        if let Some(tx) = &self.engine_tx {
            if tx.send(ProcedureRequest::Deregister).await.is_ok() {
                return Flow::Continue;
            }
        }
        self.engine_tx = None;
        Flow::Finish
    }

    async fn emit(&self, event: ScenarioEvent) {
        if self.events.send(event).await.is_err() {
            debug!(supi = %self.supi, "Supervisor gone, event dropped");
        }
    }

    async fn finish(mut self) -> UeOutcome {
        if let (Some(configurator), Some(resources)) = (&self.tunnel, self.ctx.tunnel.take()) {
            configurator.teardown(&resources).await;
        }
        self.engine_tx = None;

        if self.ctx.mm_state != MmState::Null {
            info!(supi = %self.supi, "Switched from state {} to state {}", self.ctx.mm_state, MmState::Null);
            self.ctx.set_state(MmState::Null);
        }
        self.emit(ScenarioEvent::StateChange {
            state: MmState::Null,
        })
        .await;

        let status = if self.killed {
            UeStatus::Killed
        } else if let Some(reason) = self.ctx.failure.take() {
            UeStatus::Failed(reason)
        } else {
            UeStatus::Completed
        };
        info!(supi = %self.supi, pdu_sessions = self.ctx.pdu_sessions, "UE {status}");

        UeOutcome {
            slot: self.ctx.identity.slot,
            wave: self.ctx.identity.wave,
            supi: self.supi,
            status,
            pdu_sessions: self.ctx.pdu_sessions,
        }
    }
}
