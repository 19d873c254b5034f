//! MM State
//!
//! 5GMM main states as per 3GPP TS 24.501 Section 5.1.3.2.
//!
//! The signaling engine reports the full state; the scenario supervisor
//! only needs to know whether a UE is attached, detached, or in between,
//! which [`MmState::attachment`] provides.

use std::fmt;

/// Main MM state.
///
/// 3GPP TS 24.501 Section 5.1.3.2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MmState {
    /// 5GMM-NULL
    #[default]
    Null,
    /// 5GMM-DEREGISTERED
    Deregistered,
    /// 5GMM-REGISTERED-INITIATED
    RegisteredInitiated,
    /// 5GMM-REGISTERED
    Registered,
    /// 5GMM-DEREGISTERED-INITIATED
    DeregisteredInitiated,
    /// 5GMM-SERVICE-REQUEST-INITIATED
    ServiceRequestInitiated,
}

impl fmt::Display for MmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmState::Null => write!(f, "5GMM-NULL"),
            MmState::Deregistered => write!(f, "5GMM-DEREGISTERED"),
            MmState::RegisteredInitiated => write!(f, "5GMM-REGISTERED-INITIATED"),
            MmState::Registered => write!(f, "5GMM-REGISTERED"),
            MmState::DeregisteredInitiated => write!(f, "5GMM-DEREGISTERED-INITIATED"),
            MmState::ServiceRequestInitiated => write!(f, "5GMM-SERVICE-REQUEST-INITIATED"),
        }
    }
}

/// Coarse view of an MM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// Detached; the UE lifecycle is over
    Null,
    /// Attached; the data plane may be provisioned
    Registered,
    /// Any procedure in progress
    Other,
}

impl MmState {
    /// Returns the coarse attachment state.
    pub fn attachment(self) -> Attachment {
        match self {
            MmState::Null => Attachment::Null,
            MmState::Registered => Attachment::Registered,
            _ => Attachment::Other,
        }
    }

    /// Returns true if the UE is registered.
    pub fn is_registered(self) -> bool {
        self == MmState::Registered
    }
}
