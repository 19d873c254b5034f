//! Tester configuration
//!
//! The tester reads one YAML file describing the UE subscription base, the
//! simulated gNBs, the kernel tunnel set-up and the built-in signaling
//! engine. Every section has defaults so that a minimal file (or none at
//! all) yields a runnable loopback configuration.
//!
//! ```yaml
//! ue:
//!   msin: "0000000120"
//!   ip_base: 10.60.0.1
//! gnb:
//!   gnb_id: "000008"
//!   gtp_ip_base: 127.0.0.10
//!   upf_ip: 127.0.0.8
//! tunnel:
//!   route_prefix: 30.103.12.0/24
//!   link_timeout_ms: 1000
//! engine:
//!   procedure_latency_ms: 50
//! ```

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::Ipv4Prefix;

/// UE subscription base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UeSection {
    /// Base MSIN; slot `n` uses `msin + n - 1`
    pub msin: String,
    /// First UE address handed out by the loopback engine
    pub ip_base: Ipv4Addr,
}

impl Default for UeSection {
    fn default() -> Self {
        Self {
            msin: "0000000120".to_string(),
            ip_base: Ipv4Addr::new(10, 60, 0, 1),
        }
    }
}

/// Simulated gNB set-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GnbSection {
    /// gNB ID template (hex); gNB `n` uses `gnb_id + n - 1`
    pub gnb_id: String,
    /// GTP-U address of the first gNB; gNB `n` uses `gtp_ip_base + n - 1`
    pub gtp_ip_base: Ipv4Addr,
    /// UPF N3 address advertised to the UEs
    pub upf_ip: Ipv4Addr,
}

impl Default for GnbSection {
    fn default() -> Self {
        Self {
            gnb_id: "000008".to_string(),
            gtp_ip_base: Ipv4Addr::new(127, 0, 0, 10),
            upf_ip: Ipv4Addr::new(127, 0, 0, 8),
        }
    }
}

/// Kernel tunnel (gtp5g) set-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSection {
    /// Destination prefix routed through each UE's tunnel
    pub route_prefix: Ipv4Prefix,
    /// Upper bound on waiting for a tunnel interface to be created
    pub link_timeout_ms: u64,
    /// Path of the `gtp5g-link` tool
    pub gtp5g_link: String,
    /// Path of the `gtp5g-tunnel` tool
    pub gtp5g_tunnel: String,
    /// Path of the iproute2 `ip` tool
    pub ip: String,
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            route_prefix: Ipv4Prefix {
                addr: Ipv4Addr::new(30, 103, 12, 0),
                len: 24,
            },
            link_timeout_ms: 1000,
            gtp5g_link: "gtp5g-link".to_string(),
            gtp5g_tunnel: "gtp5g-tunnel".to_string(),
            ip: "ip".to_string(),
        }
    }
}

/// Built-in loopback signaling engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Simulated duration of each NAS procedure
    pub procedure_latency_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            procedure_latency_ms: 50,
        }
    }
}

/// Complete tester configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesterConfig {
    /// UE subscription base
    pub ue: UeSection,
    /// Simulated gNBs
    pub gnb: GnbSection,
    /// Kernel tunnel set-up
    pub tunnel: TunnelSection,
    /// Loopback signaling engine
    pub engine: EngineConfig,
}

impl TesterConfig {
    /// Parses a tester configuration from a YAML string.
    ///
    /// # Example
    /// ```
    /// use nextgsim_common::TesterConfig;
    ///
    /// let yaml = r#"
    /// ue:
    ///   msin: "0000000001"
    /// tunnel:
    ///   route_prefix: 10.0.0.0/8
    /// "#;
    ///
    /// let config = TesterConfig::from_yaml(yaml).unwrap();
    /// assert_eq!(config.ue.msin, "0000000001");
    /// assert_eq!(config.tunnel.route_prefix.len, 8);
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Loads a tester configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}
