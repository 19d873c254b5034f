//! Small network value types shared by the tester crates.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An IPv4 network prefix such as `30.103.12.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Prefix {
    /// Network address
    pub addr: Ipv4Addr,
    /// Prefix length (0-32)
    pub len: u8,
}

impl Ipv4Prefix {
    /// Creates a prefix, rejecting lengths above 32.
    pub fn new(addr: Ipv4Addr, len: u8) -> Result<Self, String> {
        if len > 32 {
            return Err(format!("invalid prefix length {len}: must be at most 32"));
        }
        Ok(Self { addr, len })
    }

    /// A single-host prefix (`/32`).
    pub fn host(addr: Ipv4Addr) -> Self {
        Self { addr, len: 32 }
    }
}

impl fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for Ipv4Prefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => (addr, len),
            None => (s, "32"),
        };
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|e| format!("invalid prefix address '{addr}': {e}"))?;
        let len: u8 = len
            .trim()
            .parse()
            .map_err(|e| format!("invalid prefix length '{len}': {e}"))?;
        Self::new(addr, len)
    }
}

impl TryFrom<String> for Ipv4Prefix {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Prefix> for String {
    fn from(prefix: Ipv4Prefix) -> Self {
        prefix.to_string()
    }
}

/// Returns `base` advanced by `offset` addresses.
///
/// Wraps around at 255.255.255.255.
pub fn offset_ipv4(base: Ipv4Addr, offset: u32) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(base).wrapping_add(offset))
}
