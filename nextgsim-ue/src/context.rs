//! UE context

use std::net::Ipv4Addr;

use nextgsim_gtp::TunnelResources;

use crate::state::MmState;
use crate::tasks::GnbId;

/// Upper bound on PDU sessions per UE.
pub const MAX_PDU_SESSIONS: u8 = 16;

/// Identity and placement of one emulated UE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeIdentity {
    /// MSIN (10 digits)
    pub msin: String,
    /// Fleet slot (1-based)
    pub slot: u32,
    /// Wave the UE was spawned in (1-based)
    pub wave: u32,
    /// Initial serving gNB
    pub gnb: GnbId,
    /// GTP-U address of the initial serving gNB
    pub gnb_ip: Ipv4Addr,
}

impl UeIdentity {
    /// SUPI in `imsi-<msin>` form.
    pub fn supi(&self) -> String {
        format!("imsi-{}", self.msin)
    }
}

/// Mutable state of one UE, owned by its actor.
#[derive(Debug)]
pub struct UeContext {
    /// Identity
    pub identity: UeIdentity,
    /// UE address, known once a PDU session is up
    pub ip: Option<Ipv4Addr>,
    /// Current serving gNB
    pub gnb: GnbId,
    /// GTP-U address of the current serving gNB
    pub gnb_ip: Ipv4Addr,
    /// MM state
    pub mm_state: MmState,
    /// Provisioned tunnel, if any
    pub tunnel: Option<TunnelResources>,
    /// Established PDU sessions
    pub pdu_sessions: u32,
    /// First failure seen
    pub failure: Option<String>,
    next_psi: u8,
}

impl UeContext {
    /// Creates the context of a UE that has not registered yet.
    pub fn new(identity: UeIdentity) -> Self {
        Self {
            gnb: identity.gnb,
            gnb_ip: identity.gnb_ip,
            identity,
            ip: None,
            mm_state: MmState::Null,
            tunnel: None,
            pdu_sessions: 0,
            failure: None,
            next_psi: 1,
        }
    }

    /// Updates the MM state; returns true if it changed.
    pub fn set_state(&mut self, state: MmState) -> bool {
        let changed = self.mm_state != state;
        self.mm_state = state;
        changed
    }

    /// Allocates the next PDU session identity (1..=[`MAX_PDU_SESSIONS`]).
    pub fn allocate_psi(&mut self) -> Option<u8> {
        if self.next_psi > MAX_PDU_SESSIONS {
            return None;
        }
        let psi = self.next_psi;
        self.next_psi += 1;
        Some(psi)
    }

    /// Records a failure; only the first one is kept.
    pub fn record_failure(&mut self, reason: &str) {
        if self.failure.is_none() {
            self.failure = Some(reason.to_string());
        }
    }
}
