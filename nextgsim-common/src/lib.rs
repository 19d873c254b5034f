//! Common types and utilities for nextgsim
//!
//! This crate provides the configuration structures, error type and logging
//! set-up shared by the tester crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{EngineConfig, GnbSection, TesterConfig, TunnelSection, UeSection};
pub use error::Error;
pub use logging::{format_command, init_logging, init_logging_with_filter, log_command, LogLevel};
pub use types::{offset_ipv4, Ipv4Prefix};
