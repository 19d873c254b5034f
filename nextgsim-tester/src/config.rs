//! Scenario parameters and their validation.
//!
//! Every check runs before the first gNB or UE task is spawned; an invalid
//! scenario never reaches a running task.

use std::time::Duration;

use nextgsim_ue::{GnbId, MAX_PDU_SESSIONS};
use thiserror::Error;

/// Maximum number of UEs in a fleet.
pub const MAX_UES: u32 = 512;

/// Minimum pacing between registrations when tunnels are enabled.
///
/// The gtp5g module becomes unstable when interfaces are created faster.
pub const MIN_TUNNEL_REGISTRATION_INTERVAL_MS: u64 = 500;

/// Largest MSIN value (10 digits).
const MAX_MSIN: u64 = 9_999_999_999;

/// Errors that can occur during scenario validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// Tunnels need one gNB per UE
    #[error("--tunnel requires --dedicated-gnb")]
    TunnelRequiresDedicatedGnb,

    /// Registrations too fast for tunnel creation
    #[error(
        "with --tunnel, --time-between-registration must be at least {min_ms} ms (got {interval_ms} ms)"
    )]
    RegistrationIntervalTooShort {
        /// Configured interval
        interval_ms: u64,
        /// Required minimum
        min_ms: u64,
    },

    /// More PDU sessions than a UE can hold
    #[error("at most 16 PDU sessions per UE are allowed (got {0})")]
    TooManyPduSessions(u32),

    /// UE count out of range
    #[error("number of UEs must be between 1 and 512 (got {0})")]
    InvalidUeCount(u32),

    /// Base MSIN unusable
    #[error("invalid MSIN: {0}")]
    InvalidMsin(String),

    /// gNB ID template unusable
    #[error("invalid gNB ID: {0}")]
    InvalidGnbId(String),
}

/// Parameters of one multi-UE run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    /// Number of UEs (slots)
    pub num_ues: u32,
    /// Provision a kernel tunnel per UE
    pub tunnel_enabled: bool,
    /// One gNB per UE instead of a single shared gNB
    pub dedicated_gnb: bool,
    /// Repeat waves until stopped
    pub loop_waves: bool,
    /// Pause after each spawn
    pub time_between_registration_ms: u64,
    /// Deregister this long after spawn (0 = never)
    pub time_before_deregistration_ms: u64,
    /// Hand over this long after spawn (0 = never)
    pub time_before_handover_ms: u64,
    /// PDU sessions requested once registered
    pub num_pdu_sessions: u32,
    /// Base MSIN
    pub msin: String,
    /// gNB ID template (hex)
    pub gnb_id: String,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            num_ues: 1,
            tunnel_enabled: false,
            dedicated_gnb: false,
            loop_waves: false,
            time_between_registration_ms: 500,
            time_before_deregistration_ms: 0,
            time_before_handover_ms: 0,
            num_pdu_sessions: 1,
            msin: "0000000120".to_string(),
            gnb_id: "000008".to_string(),
        }
    }
}

impl ScenarioConfig {
    /// Validates the scenario.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.tunnel_enabled && !self.dedicated_gnb {
            return Err(ConfigValidationError::TunnelRequiresDedicatedGnb);
        }
        if self.tunnel_enabled
            && self.time_between_registration_ms < MIN_TUNNEL_REGISTRATION_INTERVAL_MS
        {
            return Err(ConfigValidationError::RegistrationIntervalTooShort {
                interval_ms: self.time_between_registration_ms,
                min_ms: MIN_TUNNEL_REGISTRATION_INTERVAL_MS,
            });
        }
        if self.num_pdu_sessions > u32::from(MAX_PDU_SESSIONS) {
            return Err(ConfigValidationError::TooManyPduSessions(self.num_pdu_sessions));
        }
        if self.num_ues == 0 || self.num_ues > MAX_UES {
            return Err(ConfigValidationError::InvalidUeCount(self.num_ues));
        }

        let base = self.msin_base()?;
        if base + u64::from(self.num_ues) - 1 > MAX_MSIN {
            return Err(ConfigValidationError::InvalidMsin(format!(
                "{} UEs starting at {} exceed 10 digits",
                self.num_ues, self.msin
            )));
        }
        let first_gnb = self.first_gnb_id()?;
        if generate_gnb_id(first_gnb, self.num_gnbs()).is_none() {
            return Err(ConfigValidationError::InvalidGnbId(format!(
                "{} gNB(s) starting at {} exceed 32 bits",
                self.num_gnbs(),
                self.gnb_id
            )));
        }
        Ok(())
    }

    /// Parses the base MSIN.
    pub fn msin_base(&self) -> Result<u64, ConfigValidationError> {
        let msin = self.msin.trim();
        if msin.is_empty() || msin.len() > 10 || !msin.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigValidationError::InvalidMsin(format!(
                "'{}' is not a number of at most 10 digits",
                self.msin
            )));
        }
        msin.parse()
            .map_err(|e| ConfigValidationError::InvalidMsin(format!("'{}': {e}", self.msin)))
    }

    /// Parses the gNB ID template.
    pub fn first_gnb_id(&self) -> Result<GnbId, ConfigValidationError> {
        self.gnb_id
            .parse()
            .map_err(ConfigValidationError::InvalidGnbId)
    }

    /// Number of gNBs the scenario needs.
    ///
    /// One per UE with dedicated gNBs, one otherwise; at least two when a
    /// handover is scheduled.
    pub fn num_gnbs(&self) -> u32 {
        let base = if self.dedicated_gnb { self.num_ues } else { 1 };
        if self.needs_extra_gnb() {
            base + 1
        } else {
            base
        }
    }

    /// True when handovers are requested but the fleet alone would have a
    /// single gNB.
    pub fn needs_extra_gnb(&self) -> bool {
        let base = if self.dedicated_gnb { self.num_ues } else { 1 };
        base <= 1 && self.time_before_handover_ms != 0
    }

    /// Pause after each spawn.
    pub fn time_between_registration(&self) -> Duration {
        Duration::from_millis(self.time_between_registration_ms)
    }

    /// Deregistration delay, if enabled.
    pub fn time_before_deregistration(&self) -> Option<Duration> {
        non_zero_ms(self.time_before_deregistration_ms)
    }

    /// Handover delay, if enabled.
    pub fn time_before_handover(&self) -> Option<Duration> {
        non_zero_ms(self.time_before_handover_ms)
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms != 0).then(|| Duration::from_millis(ms))
}

/// MSIN of the UE in `slot` (1-based): the base MSIN plus `slot - 1`,
/// zero-padded to 10 digits.
pub fn generate_msin(base: u64, slot: u32) -> String {
    format!("{:010}", base + u64::from(slot.saturating_sub(1)))
}

/// ID of the `n`-th gNB (1-based), or `None` past the 32-bit gNB ID range.
pub fn generate_gnb_id(first: GnbId, n: u32) -> Option<GnbId> {
    first.0.checked_add(n.saturating_sub(1)).map(GnbId)
}
