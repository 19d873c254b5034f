//! Kernel networking API
//!
//! The tunnel configurator only talks to the kernel through
//! [`KernelNetworking`]. The production backend is
//! [`CommandNetworking`](crate::CommandNetworking); tests plug in an
//! in-memory implementation.

use std::fmt;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use nextgsim_common::Ipv4Prefix;
use thiserror::Error;

use crate::tunnel::{Far, Pdr};

/// `RTPROT_STATIC`
pub const ROUTE_PROTOCOL_STATIC: u8 = 4;

/// Errors reported by a kernel networking backend.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A command ran but reported failure
    #[error("`{command}` failed: {stderr}")]
    CommandFailed {
        /// Command line that failed
        command: String,
        /// Captured standard error
        stderr: String,
    },
    /// A command could not be started
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The named object does not exist
    #[error("{0} not found")]
    NotFound(String),
    /// Backend output could not be understood
    #[error("unexpected output: {0}")]
    Parse(String),
}

/// A kernel network interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkHandle {
    /// Interface name
    pub name: String,
    /// Interface index
    pub index: u32,
}

/// Route scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteScope {
    /// Destination is on the attached link
    Link,
    /// Destination is reached through a gateway
    Universe,
}

impl fmt::Display for RouteScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteScope::Link => write!(f, "link"),
            RouteScope::Universe => write!(f, "global"),
        }
    }
}

/// A route installed in a specific table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination prefix
    pub dst: Ipv4Prefix,
    /// Output interface name
    pub dev: String,
    /// Output interface index
    pub link_index: u32,
    /// Scope
    pub scope: RouteScope,
    /// Routing protocol
    pub protocol: u8,
    /// Metric
    pub priority: u32,
    /// Routing table
    pub table: u32,
}

impl Route {
    /// A link-scoped static route to `dst` through `link` in `table`.
    pub fn through(link: &LinkHandle, dst: Ipv4Prefix, table: u32) -> Self {
        Self {
            dst,
            dev: link.name.clone(),
            link_index: link.index,
            scope: RouteScope::Link,
            protocol: ROUTE_PROTOCOL_STATIC,
            priority: 1,
            table,
        }
    }
}

/// A policy-routing rule selecting a table for traffic entering an
/// interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    /// Input interface
    pub iif: String,
    /// Source filter
    pub src: Option<Ipv4Prefix>,
    /// Table to look up
    pub table: u32,
}

impl PolicyRule {
    /// Rule matching everything entering `iif`.
    pub fn ingress(iif: &str, table: u32) -> Self {
        Self {
            iif: iif.to_string(),
            src: None,
            table,
        }
    }

    /// Rule matching traffic entering `iif` from `src`.
    pub fn ingress_from(iif: &str, src: Ipv4Addr, table: u32) -> Self {
        Self {
            iif: iif.to_string(),
            src: Some(Ipv4Prefix::host(src)),
            table,
        }
    }
}

/// Kernel operations needed to provision a UE tunnel.
///
/// Every operation is scoped to a named interface, so concurrent callers
/// working on different interfaces never interfere.
#[async_trait]
pub trait KernelNetworking: Send + Sync {
    /// Creates a gtp5g interface with `local` as the GTP-U endpoint.
    ///
    /// Returns once the interface exists.
    async fn link_add_gtp(&self, name: &str, local: Ipv4Addr) -> Result<(), KernelError>;

    /// Deletes an interface.
    async fn link_del(&self, name: &str) -> Result<(), KernelError>;

    /// Looks an interface up by name.
    async fn link_by_name(&self, name: &str) -> Result<LinkHandle, KernelError>;

    /// Installs a FAR on a gtp5g interface.
    async fn add_far(&self, ifname: &str, far: &Far) -> Result<(), KernelError>;

    /// Installs a PDR on a gtp5g interface.
    async fn add_pdr(&self, ifname: &str, pdr: &Pdr) -> Result<(), KernelError>;

    /// Assigns an address to an interface.
    async fn addr_add(&self, link: &LinkHandle, addr: Ipv4Prefix) -> Result<(), KernelError>;

    /// Installs or replaces a route.
    async fn route_replace(&self, route: &Route) -> Result<(), KernelError>;

    /// Removes a route.
    async fn route_del(&self, route: &Route) -> Result<(), KernelError>;

    /// Installs a policy rule.
    async fn rule_add(&self, rule: &PolicyRule) -> Result<(), KernelError>;

    /// Removes a policy rule.
    async fn rule_del(&self, rule: &PolicyRule) -> Result<(), KernelError>;
}
