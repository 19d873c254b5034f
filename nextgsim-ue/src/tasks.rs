//! UE Task Messages
//!
//! Messages exchanged between the scenario supervisor, the UE actors and
//! the simulated gNBs.
//!
//! # Channels
//!
//! - supervisor → actor: [`ScenarioMessage`], capacity
//!   [`COMMAND_CHANNEL_CAPACITY`] so that at most one command is outstanding
//! - actor → supervisor: [`ScenarioEvent`], capacity
//!   [`DEFAULT_CHANNEL_CAPACITY`]
//! - anyone → gNB: [`GnbMessage`] through a [`GnbHandle`]
//! - supervisor → actor, out of band: a `watch::Receiver<bool>` kill token

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use tokio::sync::{mpsc, oneshot, watch};

use crate::state::MmState;

/// Default channel capacity for task message queues.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of an actor's command channel.
pub const COMMAND_CHANNEL_CAPACITY: usize = 1;

/// gNB identity (22-32 bit gNB ID, rendered as hex).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GnbId(pub u32);

impl fmt::Display for GnbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

impl FromStr for GnbId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u32::from_str_radix(s.trim(), 16)
            .map(GnbId)
            .map_err(|e| format!("invalid gNB ID '{s}': {e}"))
    }
}

/// Confirmation returned by a handover target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoverAck {
    /// Target gNB
    pub gnb: GnbId,
    /// GTP-U address of the target gNB
    pub gtp_ip: Ipv4Addr,
}

/// Messages for a gNB.
#[derive(Debug)]
pub enum GnbMessage {
    /// A UE is being handed over to this gNB
    HandoverRequest {
        /// SUPI of the UE
        supi: String,
        /// Source gNB
        source: GnbId,
        /// Acknowledgement channel
        ack: oneshot::Sender<HandoverAck>,
    },
}

/// Handle to a gNB task.
#[derive(Debug, Clone)]
pub struct GnbHandle {
    /// gNB identity
    pub id: GnbId,
    /// GTP-U address
    pub gtp_ip: Ipv4Addr,
    inbound: mpsc::Sender<GnbMessage>,
}

impl GnbHandle {
    /// Creates a handle around the gNB inbound channel.
    pub fn new(id: GnbId, gtp_ip: Ipv4Addr, inbound: mpsc::Sender<GnbMessage>) -> Self {
        Self {
            id,
            gtp_ip,
            inbound,
        }
    }

    /// Inbound channel of the gNB, used as a handover target.
    pub fn inbound(&self) -> &mpsc::Sender<GnbMessage> {
        &self.inbound
    }
}

/// Commands into a UE actor.
#[derive(Debug, Clone)]
pub enum ScenarioMessage {
    /// Start initial registration
    Registration,
    /// Establish one more PDU session
    NewPduSession,
    /// Hand over to the given gNB
    Handover {
        /// Target gNB
        target: GnbHandle,
    },
    /// Deregister gracefully
    Terminate,
    /// Stop immediately
    Kill,
}

impl fmt::Display for ScenarioMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioMessage::Registration => write!(f, "Registration"),
            ScenarioMessage::NewPduSession => write!(f, "NewPDUSession"),
            ScenarioMessage::Handover { target } => write!(f, "Handover(gnb={})", target.id),
            ScenarioMessage::Terminate => write!(f, "Terminate"),
            ScenarioMessage::Kill => write!(f, "Kill"),
        }
    }
}

/// Events out of a UE actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioEvent {
    /// MM state changed
    StateChange {
        /// New state
        state: MmState,
    },
    /// The UE failed; a `StateChange` to NULL follows
    Failure {
        /// Diagnostic
        reason: String,
    },
}

/// Resolves once `token` carries `true`.
///
/// A dropped sender never counts as a signal; the future then stays
/// pending forever.
pub async fn signalled(token: &mut watch::Receiver<bool>) {
    loop {
        if *token.borrow_and_update() {
            return;
        }
        if token.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
