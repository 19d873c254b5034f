//! Signaling engine interface
//!
//! The NAS/NGAP procedures themselves run behind [`SignalingEngine`]. A UE
//! actor attaches once and then talks to the engine over an [`EngineLink`]:
//! it sends [`ProcedureRequest`]s and receives [`EngineEvent`]s.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::context::UeIdentity;
use crate::error::ActorError;
use crate::state::MmState;
use crate::tasks::{GnbHandle, GnbId};

/// Procedures a UE actor asks the engine to run.
#[derive(Debug, Clone)]
pub enum ProcedureRequest {
    /// Initial registration
    Register,
    /// UE-requested PDU session establishment
    EstablishPduSession {
        /// PDU session identity
        psi: u8,
    },
    /// Handover to another gNB
    Handover {
        /// Target gNB
        target: GnbHandle,
    },
    /// UE-initiated deregistration
    Deregister,
}

/// Notifications from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// MM state changed
    StateChanged(MmState),
    /// A PDU session was established
    PduSessionEstablished {
        /// PDU session identity
        psi: u8,
        /// Address assigned to the UE
        ue_ip: Ipv4Addr,
    },
    /// The serving gNB's tunnel endpoint is ready (JSON device message)
    DeviceMessage(Vec<u8>),
    /// Handover finished
    HandoverComplete {
        /// New serving gNB
        gnb: GnbId,
        /// GTP-U address of the new serving gNB
        gtp_ip: Ipv4Addr,
    },
    /// A procedure failed
    ProcedureFailed {
        /// Diagnostic
        reason: String,
    },
}

/// Per-UE connection to the engine.
#[derive(Debug)]
pub struct EngineLink {
    /// Procedure requests
    pub requests: mpsc::Sender<ProcedureRequest>,
    /// Engine notifications
    pub events: mpsc::Receiver<EngineEvent>,
}

/// Runs the control-plane procedures of emulated UEs.
#[async_trait]
pub trait SignalingEngine: Send + Sync {
    /// Attaches a UE to the engine.
    async fn attach(&self, identity: &UeIdentity) -> Result<EngineLink, ActorError>;
}
