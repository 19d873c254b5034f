//! Device message carrying the tunnel endpoint parameters of a UE.
//!
//! The signaling layer hands this payload to the UE once its serving gNB
//! has a tunnel endpoint ready:
//!
//! ```json
//! {"gnbIp": "127.0.0.10", "upfIp": "127.0.0.8", "oTeid": "4660", "iTeid": "1"}
//! ```

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::configurator::TunnelError;

/// Kernel routing tables a UE must never claim: unspec, default, main, local.
const RESERVED_TABLES: [u32; 4] = [0, 253, 254, 255];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeviceMessage {
    gnb_ip: String,
    upf_ip: String,
    o_teid: String,
    i_teid: String,
}

/// Parsed and validated device message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMessage {
    /// GTP-U address of the serving gNB (local tunnel endpoint)
    pub gnb_ip: Ipv4Addr,
    /// N3 address of the UPF (remote tunnel endpoint)
    pub upf_ip: Ipv4Addr,
    /// TEID written on packets sent to the UPF
    #[serde(serialize_with = "teid_as_string")]
    pub o_teid: u32,
    /// TEID the UPF uses towards the gNB
    #[serde(serialize_with = "teid_as_string")]
    pub i_teid: u32,
}

fn teid_as_string<S: serde::Serializer>(teid: &u32, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&teid.to_string())
}

impl DeviceMessage {
    /// Parses a JSON device message.
    pub fn from_slice(payload: &[u8]) -> Result<Self, TunnelError> {
        let raw: RawDeviceMessage = serde_json::from_slice(payload)
            .map_err(|e| TunnelError::MalformedMessage(e.to_string()))?;

        let o_teid = parse_teid("oTeid", &raw.o_teid)?;
        // The outgoing TEID doubles as the UE's routing table
        if RESERVED_TABLES.contains(&o_teid) {
            return Err(TunnelError::MalformedMessage(format!(
                "oTeid: {o_teid} is a reserved routing table"
            )));
        }

        Ok(Self {
            gnb_ip: parse_addr("gnbIp", &raw.gnb_ip)?,
            upf_ip: parse_addr("upfIp", &raw.upf_ip)?,
            o_teid,
            i_teid: parse_teid("iTeid", &raw.i_teid)?,
        })
    }

    /// Serializes the message in its wire form.
    pub fn to_vec(&self) -> Vec<u8> {
        // Four plain fields, serialization cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Routing table used for the UE's policy rules.
    pub fn table(&self) -> u32 {
        self.o_teid
    }
}

fn parse_addr(field: &str, value: &str) -> Result<Ipv4Addr, TunnelError> {
    value
        .trim()
        .parse()
        .map_err(|_| TunnelError::MalformedMessage(format!("{field}: invalid IPv4 address '{value}'")))
}

fn parse_teid(field: &str, value: &str) -> Result<u32, TunnelError> {
    value
        .trim()
        .parse()
        .map_err(|_| TunnelError::MalformedMessage(format!("{field}: invalid TEID '{value}'")))
}
