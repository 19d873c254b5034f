//! nextgsim UE actor library
//!
//! This crate provides the per-UE side of the multi-UE tester:
//!
//! - [`UeContext`] and the MM state it tracks
//! - the scenario command/event messages exchanged with the supervisor
//! - the [`SignalingEngine`] interface behind which NAS/NGAP procedures run,
//!   and [`LoopbackEngine`], a built-in engine for tests and dry runs
//! - the UE actor task ([`spawn_ue`]), which also drives tunnel
//!   provisioning once the UE is registered

pub mod actor;
pub mod context;
pub mod engine;
pub mod error;
pub mod loopback;
pub mod state;
pub mod tasks;

pub use actor::{spawn_ue, UeHandle, UeOutcome, UeStatus};
pub use context::{UeContext, UeIdentity, MAX_PDU_SESSIONS};
pub use engine::{EngineEvent, EngineLink, ProcedureRequest, SignalingEngine};
pub use error::ActorError;
pub use loopback::{LoopbackEngine, DOWNLINK_TEID_BASE, UPLINK_TEID_BASE};
pub use state::{Attachment, MmState};
pub use tasks::{
    signalled, GnbHandle, GnbId, GnbMessage, HandoverAck, ScenarioEvent, ScenarioMessage,
    COMMAND_CHANNEL_CAPACITY, DEFAULT_CHANNEL_CAPACITY,
};
