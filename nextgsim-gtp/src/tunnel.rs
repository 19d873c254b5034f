//! GTP-U tunnel resources
//!
//! Forwarding/detection rules installed on a gtp5g interface, and the
//! complete set of kernel objects that make up one UE's tunnel.

use std::net::Ipv4Addr;

use nextgsim_common::Ipv4Prefix;

use crate::kernel::{LinkHandle, PolicyRule, Route};

/// GTP-U default port
pub const GTP_U_PORT: u16 = 2152;

/// FAR used by the uplink PDR.
pub const UPLINK_FAR_ID: u32 = 1;
/// FAR used by the downlink PDR.
pub const DOWNLINK_FAR_ID: u32 = 2;
/// PDR matching GTP-encapsulated traffic arriving at the interface.
pub const UPLINK_PDR_ID: u16 = 1;
/// PDR matching traffic leaving the UE towards the UPF.
pub const DOWNLINK_PDR_ID: u16 = 2;

/// Outer header creation description for GTP-U/UDP/IPv4.
const HEADER_CREATION_GTPU_UDP_IPV4: u16 = 0;

/// Outer header removal description passed to the uplink PDR.
const HEADER_REMOVAL_GTPU_UDP_IPV4: u8 = 1;

/// FAR apply action (TS 29.244 8.2.26).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FarAction {
    /// Drop the packet
    Drop = 1,
    /// Forward the packet
    Forward = 2,
    /// Buffer the packet
    Buffer = 4,
}

/// Outer header to push on packets matched by a FAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OuterHeaderCreation {
    /// Outer header creation description
    pub description: u16,
    /// TEID written into the GTP-U header
    pub teid: u32,
    /// Remote tunnel endpoint
    pub peer: Ipv4Addr,
    /// Remote UDP port
    pub port: u16,
}

/// Forwarding Action Rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Far {
    /// FAR ID
    pub id: u32,
    /// Apply action
    pub action: FarAction,
    /// Outer header creation, if the FAR encapsulates
    pub header_creation: Option<OuterHeaderCreation>,
}

impl Far {
    /// A plain forwarding FAR.
    pub fn forward(id: u32) -> Self {
        Self {
            id,
            action: FarAction::Forward,
            header_creation: None,
        }
    }

    /// A forwarding FAR that encapsulates towards `peer` with `teid`.
    pub fn forward_encap(id: u32, teid: u32, peer: Ipv4Addr) -> Self {
        Self {
            id,
            action: FarAction::Forward,
            header_creation: Some(OuterHeaderCreation {
                description: HEADER_CREATION_GTPU_UDP_IPV4,
                teid,
                peer,
                port: GTP_U_PORT,
            }),
        }
    }

    /// Arguments following `gtp5g-tunnel add far <ifname>`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            self.id.to_string(),
            "--action".to_string(),
            (self.action as u8).to_string(),
        ];
        if let Some(hc) = &self.header_creation {
            args.extend([
                "--hdr-creation".to_string(),
                hc.description.to_string(),
                hc.teid.to_string(),
                hc.peer.to_string(),
                hc.port.to_string(),
            ]);
        }
        args
    }
}

/// Fully qualified TEID matched by a PDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fteid {
    /// Local TEID
    pub teid: u32,
    /// Local tunnel endpoint address
    pub addr: Ipv4Addr,
}

/// Packet Detection Rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdr {
    /// PDR ID
    pub id: u16,
    /// Precedence
    pub precedence: u32,
    /// UE address matched by the rule
    pub ue_ip: Ipv4Addr,
    /// F-TEID matched on encapsulated packets
    pub fteid: Option<Fteid>,
    /// Outer header removal description
    pub outer_header_removal: Option<u8>,
    /// FAR applied to matched packets
    pub far_id: u32,
}

impl Pdr {
    /// The PDR matching encapsulated packets for the UE and stripping the
    /// GTP-U header.
    pub fn uplink(ue_ip: Ipv4Addr, fteid: Fteid) -> Self {
        Self {
            id: UPLINK_PDR_ID,
            precedence: 1,
            ue_ip,
            fteid: Some(fteid),
            outer_header_removal: Some(HEADER_REMOVAL_GTPU_UDP_IPV4),
            far_id: UPLINK_FAR_ID,
        }
    }

    /// The PDR matching plain packets for the UE.
    pub fn downlink(ue_ip: Ipv4Addr) -> Self {
        Self {
            id: DOWNLINK_PDR_ID,
            precedence: 2,
            ue_ip,
            fteid: None,
            outer_header_removal: None,
            far_id: DOWNLINK_FAR_ID,
        }
    }

    /// Arguments following `gtp5g-tunnel add pdr <ifname>`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            self.id.to_string(),
            "--pcd".to_string(),
            self.precedence.to_string(),
        ];
        if let Some(rm) = self.outer_header_removal {
            args.extend(["--hdr-rm".to_string(), rm.to_string()]);
        }
        args.extend(["--ue-ipv4".to_string(), self.ue_ip.to_string()]);
        if let Some(fteid) = &self.fteid {
            args.extend([
                "--f-teid".to_string(),
                fteid.teid.to_string(),
                fteid.addr.to_string(),
            ]);
        }
        args.extend(["--far-id".to_string(), self.far_id.to_string()]);
        args
    }
}

/// Every kernel object provisioned for one attached UE.
///
/// Exactly one set exists per attached UE; it is handed back to
/// [`TunnelConfigurator::teardown`](crate::TunnelConfigurator::teardown)
/// when the UE detaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelResources {
    /// The gtp5g interface
    pub link: LinkHandle,
    /// FAR 1
    pub uplink_far: Far,
    /// FAR 2
    pub downlink_far: Far,
    /// PDR 1
    pub uplink_pdr: Pdr,
    /// PDR 2
    pub downlink_pdr: Pdr,
    /// UE address assigned to the interface
    pub address: Ipv4Prefix,
    /// Test-traffic route in the UE table
    pub route: Route,
    /// Policy rules selecting the UE table
    pub rules: Vec<PolicyRule>,
}

impl TunnelResources {
    /// Routing table holding the UE route.
    pub fn table(&self) -> u32 {
        self.route.table
    }

    /// Name of the tunnel interface.
    pub fn interface(&self) -> &str {
        &self.link.name
    }
}
