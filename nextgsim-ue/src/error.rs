//! UE actor errors

use nextgsim_gtp::TunnelError;
use thiserror::Error;

/// Errors that end a UE lifecycle early.
#[derive(Debug, Error)]
pub enum ActorError {
    /// The signaling engine refused to attach the UE
    #[error("signaling engine unavailable: {0}")]
    EngineUnavailable(String),
    /// The signaling engine went away
    #[error("signaling engine link lost")]
    EngineLost,
    /// A NAS procedure failed
    #[error("procedure failed: {0}")]
    Procedure(String),
    /// Tunnel provisioning failed
    #[error("tunnel: {0}")]
    Tunnel(#[from] TunnelError),
}
