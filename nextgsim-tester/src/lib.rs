//! nextgsim multi-UE tester
//!
//! Runs fleets of emulated UEs against a signaling engine:
//!
//! - [`Scenario`]: the fleet loop, wave after wave of UE actors over a
//!   [`SlotTable`]
//! - [`supervise`]: the per-UE supervision sub-loop (PDU session burst,
//!   deregistration and handover timers)
//! - [`GnbRegistry`]: the simulated gNBs serving as handover targets
//! - [`ScenarioConfig`]: run parameters, validated before anything spawns
//!
//! # Example
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use nextgsim_tester::{Scenario, ScenarioConfig};
//! use nextgsim_ue::LoopbackEngine;
//! use tokio::sync::watch;
//!
//! # async fn example() -> Result<(), nextgsim_tester::ConfigValidationError> {
//! let engine = Arc::new(LoopbackEngine::new(
//!     Duration::from_millis(50),
//!     Ipv4Addr::new(10, 60, 0, 1),
//!     Ipv4Addr::new(127, 0, 0, 8),
//! ));
//! let config = ScenarioConfig {
//!     num_ues: 10,
//!     time_before_deregistration_ms: 5000,
//!     ..Default::default()
//! };
//! let scenario = Scenario::new(config, Ipv4Addr::new(127, 0, 0, 10), engine)?;
//! let (_stop_tx, stop_rx) = watch::channel(false);
//! let report = scenario.run(stop_rx).await;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod gnb;
pub mod report;
pub mod scenario;
pub mod slots;
pub mod supervisor;

pub use config::{
    generate_gnb_id, generate_msin, ConfigValidationError, ScenarioConfig, MAX_UES,
    MIN_TUNNEL_REGISTRATION_INTERVAL_MS,
};
pub use gnb::GnbRegistry;
pub use report::{RunReport, WaveReport};
pub use scenario::Scenario;
pub use slots::{SlotHandle, SlotTable};
pub use supervisor::{supervise, SupervisionParams, SupervisionReport};
