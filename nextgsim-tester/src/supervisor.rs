//! Per-UE supervision sub-loop
//!
//! Sole sender of commands to one UE actor. Reacts, in priority order, to:
//! 1. the slot's kill token (forwarding disabled)
//! 2. actor events (first REGISTERED triggers the PDU session burst, NULL
//!    ends the loop)
//! 3. the deregistration timer (one `Terminate`, forwarding disabled)
//! 4. the handover timer (one `Handover`)
//! 5. scenario messages injected by the fleet loop
//!
//! Every send blocks on the actor's single-slot command channel, so at most
//! one command is outstanding at any time.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use nextgsim_ue::{
    signalled, Attachment, GnbHandle, ScenarioEvent, ScenarioMessage, UeHandle, UeIdentity,
    UeOutcome, UeStatus,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;
use tracing::{debug, info, warn};

/// Scenario knobs of one supervision sub-loop.
#[derive(Debug, Clone, Default)]
pub struct SupervisionParams {
    /// `NewPduSession` commands sent on the first REGISTERED
    pub pdu_sessions: u32,
    /// Delay before `Terminate`
    pub deregister_after: Option<Duration>,
    /// Delay before `Handover`
    pub handover_after: Option<Duration>,
    /// Handover target; the handover timer is inert without one
    pub handover_target: Option<GnbHandle>,
}

/// What one sub-loop did and how its actor ended.
#[derive(Debug, Clone)]
pub struct SupervisionReport {
    /// Actor outcome
    pub outcome: UeOutcome,
    /// `NewPduSession` commands delivered
    pub pdu_requests: u32,
    /// A `Terminate` was delivered by the deregistration timer
    pub terminate_sent: bool,
    /// A `Handover` was delivered by the handover timer
    pub handover_sent: bool,
    /// Failure diagnostics reported by the actor
    pub failures: Vec<String>,
}

struct SubLoop {
    supi: String,
    commands: Option<mpsc::Sender<ScenarioMessage>>,
    registered_once: bool,
    pdu_requests: u32,
    terminate_sent: bool,
    handover_sent: bool,
    failures: Vec<String>,
}

impl SubLoop {
    /// Delivers a command unless forwarding is disabled. A closed channel
    /// disables forwarding.
    async fn forward(&mut self, msg: ScenarioMessage) -> bool {
        let Some(tx) = &self.commands else {
            debug!(supi = %self.supi, "Forwarding disabled, {msg} dropped");
            return false;
        };
        debug!(supi = %self.supi, "Forwarding {msg}");
        if tx.send(msg).await.is_err() {
            debug!(supi = %self.supi, "Actor stopped accepting commands");
            self.commands = None;
            return false;
        }
        true
    }

    async fn pdu_session_burst(&mut self, count: u32) {
        for _ in 0..count {
            if !self.forward(ScenarioMessage::NewPduSession).await {
                break;
            }
            self.pdu_requests += 1;
        }
    }
}

/// Runs the supervision sub-loop of `ue` until the actor reports NULL, then
/// returns its report.
///
/// `Registration` is sent first. `injected` carries messages from the fleet
/// loop; once closed it is no longer polled. `kill` is the slot's token.
pub async fn supervise(
    identity: UeIdentity,
    ue: UeHandle,
    mut injected: mpsc::Receiver<ScenarioMessage>,
    mut kill: watch::Receiver<bool>,
    params: SupervisionParams,
) -> SupervisionReport {
    let UeHandle {
        commands,
        mut events,
        task,
    } = ue;
    let mut sub = SubLoop {
        supi: identity.supi(),
        commands: Some(commands),
        registered_once: false,
        pdu_requests: 0,
        terminate_sent: false,
        handover_sent: false,
        failures: Vec::new(),
    };

    let mut deregister_timer = params.deregister_after.map(|d| Box::pin(tokio::time::sleep(d)));
    let mut handover_timer = params.handover_after.map(|d| Box::pin(tokio::time::sleep(d)));
    let mut killed = false;
    let mut injected_open = true;

    sub.forward(ScenarioMessage::Registration).await;

    loop {
        tokio::select! {
            biased;

            _ = signalled(&mut kill), if !killed => {
                debug!(supi = %sub.supi, "Slot retired, forwarding disabled");
                killed = true;
                sub.commands = None;
            }

            event = events.recv() => match event {
                Some(ScenarioEvent::StateChange { state }) => match state.attachment() {
                    Attachment::Registered if !sub.registered_once => {
                        sub.registered_once = true;
                        sub.pdu_session_burst(params.pdu_sessions).await;
                    }
                    Attachment::Null => break,
                    _ => {}
                },
                Some(ScenarioEvent::Failure { reason }) => {
                    warn!(supi = %sub.supi, "UE reported failure: {reason}");
                    sub.failures.push(reason);
                }
                None => break,
            },

            _ = expired(&mut deregister_timer) => {
                deregister_timer = None;
                info!(supi = %sub.supi, "Deregistration timer expired");
                sub.terminate_sent = sub.forward(ScenarioMessage::Terminate).await;
                sub.commands = None;
            }

            _ = expired(&mut handover_timer) => {
                handover_timer = None;
                match params.handover_target.clone() {
                    Some(target) => {
                        info!(supi = %sub.supi, "Handover timer expired, target gNB {}", target.id);
                        sub.handover_sent = sub.forward(ScenarioMessage::Handover { target }).await;
                    }
                    None => warn!(supi = %sub.supi, "Handover timer expired without a target gNB"),
                }
            }

            msg = injected.recv(), if injected_open => match msg {
                Some(msg) => {
                    sub.forward(msg).await;
                }
                None => injected_open = false,
            },
        }
    }

    // Closes the actor's command channel
    sub.commands = None;

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => UeOutcome {
            slot: identity.slot,
            wave: identity.wave,
            supi: sub.supi.clone(),
            status: UeStatus::Failed(format!("actor task: {e}")),
            pdu_sessions: 0,
        },
    };
    debug!(supi = %sub.supi, status = %outcome.status, "Supervision ended");

    SupervisionReport {
        outcome,
        pdu_requests: sub.pdu_requests,
        terminate_sent: sub.terminate_sent,
        handover_sent: sub.handover_sent,
        failures: sub.failures,
    }
}

/// Completes when the timer fires; never completes without a timer.
async fn expired(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
