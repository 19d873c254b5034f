//! Tunnel provisioning for one UE.
//!
//! [`TunnelConfigurator::provision`] turns a device message into a working
//! gtp5g tunnel: interface, FARs, PDRs, UE address, route and policy rules.
//! Any failure is returned to the caller as a [`TunnelError`] naming the
//! step; the caller decides whether to [`discard`](TunnelConfigurator::discard)
//! the partial state.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use nextgsim_common::Ipv4Prefix;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::kernel::{KernelError, KernelNetworking, PolicyRule, Route};
use crate::message::DeviceMessage;
use crate::tunnel::{Far, Fteid, Pdr, TunnelResources, DOWNLINK_FAR_ID, UPLINK_FAR_ID};

/// Derives the tunnel interface name of a UE from its MSIN.
pub fn interface_name(msin: &str) -> String {
    format!("val{msin}")
}

/// A step of the provisioning sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    /// Creating the gtp5g interface
    CreateLink,
    /// Installing FAR 1
    UplinkFar,
    /// Installing FAR 2
    DownlinkFar,
    /// Installing PDR 1
    UplinkPdr,
    /// Installing PDR 2
    DownlinkPdr,
    /// Looking up the created interface
    ResolveLink,
    /// Assigning the UE address
    AssignAddress,
    /// Installing the UE route
    InstallRoute,
    /// Installing the policy rules
    InstallRules,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisionStep::CreateLink => "create link",
            ProvisionStep::UplinkFar => "uplink FAR",
            ProvisionStep::DownlinkFar => "downlink FAR",
            ProvisionStep::UplinkPdr => "uplink PDR",
            ProvisionStep::DownlinkPdr => "downlink PDR",
            ProvisionStep::ResolveLink => "resolve link",
            ProvisionStep::AssignAddress => "assign address",
            ProvisionStep::InstallRoute => "install route",
            ProvisionStep::InstallRules => "install rules",
        };
        write!(f, "{s}")
    }
}

/// Tunnel provisioning errors
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The device message could not be parsed
    #[error("malformed device message: {0}")]
    MalformedMessage(String),
    /// The interface did not appear in time
    #[error("interface {name} not created within {timeout_ms} ms")]
    LinkTimeout {
        /// Interface name
        name: String,
        /// Configured bound
        timeout_ms: u64,
    },
    /// A kernel operation failed
    #[error("{step} failed: {source}")]
    Kernel {
        /// Step that failed
        step: ProvisionStep,
        /// Backend error
        #[source]
        source: KernelError,
    },
    /// The interface creation task ended without reporting
    #[error("interface creation task aborted")]
    LinkTaskAborted,
}

impl TunnelError {
    fn kernel(step: ProvisionStep) -> impl FnOnce(KernelError) -> Self {
        move |source| TunnelError::Kernel { step, source }
    }
}

/// Provisions and releases UE tunnels over a [`KernelNetworking`] backend.
///
/// Cloning is cheap; all clones share the backend.
#[derive(Clone)]
pub struct TunnelConfigurator {
    kernel: Arc<dyn KernelNetworking>,
    route_prefix: Ipv4Prefix,
    link_timeout: Duration,
}

impl fmt::Debug for TunnelConfigurator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfigurator")
            .field("route_prefix", &self.route_prefix)
            .field("link_timeout", &self.link_timeout)
            .finish_non_exhaustive()
    }
}

impl TunnelConfigurator {
    /// Creates a configurator routing `route_prefix` through each tunnel
    /// and waiting at most `link_timeout` for interface creation.
    pub fn new(
        kernel: Arc<dyn KernelNetworking>,
        route_prefix: Ipv4Prefix,
        link_timeout: Duration,
    ) -> Self {
        Self {
            kernel,
            route_prefix,
            link_timeout,
        }
    }

    /// Destination prefix routed through the tunnels.
    pub fn route_prefix(&self) -> Ipv4Prefix {
        self.route_prefix
    }

    /// Bound on interface creation.
    pub fn link_timeout(&self) -> Duration {
        self.link_timeout
    }

    /// Provisions the tunnel of the UE identified by `msin`, owning
    /// `ue_ip`, with the endpoints carried by `msg`.
    ///
    /// Any stale interface with the same name is deleted first, so calling
    /// this twice leaves a single interface behind.
    pub async fn provision(
        &self,
        msin: &str,
        ue_ip: Ipv4Addr,
        msg: &DeviceMessage,
    ) -> Result<TunnelResources, TunnelError> {
        let name = interface_name(msin);
        let table = msg.table();

        if let Err(e) = self.kernel.link_del(&name).await {
            debug!(ifname = %name, "no stale interface removed: {e}");
        }
        // Rules survive link deletion
        for rule in Self::rules(&name, ue_ip, table) {
            let _ = self.kernel.rule_del(&rule).await;
        }

        self.create_link(&name, msg.gnb_ip).await?;

        let uplink_far = Far::forward(UPLINK_FAR_ID);
        let downlink_far = Far::forward_encap(DOWNLINK_FAR_ID, msg.o_teid, msg.upf_ip);
        let uplink_pdr = Pdr::uplink(
            ue_ip,
            Fteid {
                teid: msg.i_teid,
                addr: msg.gnb_ip,
            },
        );
        let downlink_pdr = Pdr::downlink(ue_ip);

        self.kernel
            .add_far(&name, &uplink_far)
            .await
            .map_err(TunnelError::kernel(ProvisionStep::UplinkFar))?;
        self.kernel
            .add_far(&name, &downlink_far)
            .await
            .map_err(TunnelError::kernel(ProvisionStep::DownlinkFar))?;
        self.kernel
            .add_pdr(&name, &uplink_pdr)
            .await
            .map_err(TunnelError::kernel(ProvisionStep::UplinkPdr))?;
        self.kernel
            .add_pdr(&name, &downlink_pdr)
            .await
            .map_err(TunnelError::kernel(ProvisionStep::DownlinkPdr))?;

        let link = self
            .kernel
            .link_by_name(&name)
            .await
            .map_err(TunnelError::kernel(ProvisionStep::ResolveLink))?;

        let address = Ipv4Prefix::host(ue_ip);
        self.kernel
            .addr_add(&link, address)
            .await
            .map_err(TunnelError::kernel(ProvisionStep::AssignAddress))?;

        let route = Route::through(&link, self.route_prefix, table);
        self.kernel
            .route_replace(&route)
            .await
            .map_err(TunnelError::kernel(ProvisionStep::InstallRoute))?;

        let rules = Self::rules(&name, ue_ip, table);
        for rule in &rules {
            self.kernel
                .rule_add(rule)
                .await
                .map_err(TunnelError::kernel(ProvisionStep::InstallRules))?;
        }

        info!(ifname = %name, ue_ip = %ue_ip, table, "Interface configured");

        Ok(TunnelResources {
            link,
            uplink_far,
            downlink_far,
            uplink_pdr,
            downlink_pdr,
            address,
            route,
            rules,
        })
    }

    /// Releases a provisioned tunnel. Failures are logged and skipped.
    pub async fn teardown(&self, resources: &TunnelResources) {
        for rule in &resources.rules {
            if let Err(e) = self.kernel.rule_del(rule).await {
                warn!(ifname = %resources.link.name, "failed to remove rule: {e}");
            }
        }
        if let Err(e) = self.kernel.route_del(&resources.route).await {
            debug!(ifname = %resources.link.name, "route already gone: {e}");
        }
        if let Err(e) = self.kernel.link_del(&resources.link.name).await {
            warn!(ifname = %resources.link.name, "failed to delete interface: {e}");
        }
        info!(ifname = %resources.link.name, "Interface released");
    }

    /// Removes whatever a failed [`provision`](Self::provision) call may
    /// have left behind for `msin`.
    pub async fn discard(&self, msin: &str, ue_ip: Ipv4Addr, table: u32) {
        let name = interface_name(msin);
        for rule in Self::rules(&name, ue_ip, table) {
            let _ = self.kernel.rule_del(&rule).await;
        }
        // Deleting the link also drops its FARs, PDRs, address and route
        if let Err(e) = self.kernel.link_del(&name).await {
            debug!(ifname = %name, "nothing to discard: {e}");
        }
    }

    fn rules(name: &str, ue_ip: Ipv4Addr, table: u32) -> Vec<PolicyRule> {
        vec![
            PolicyRule::ingress(name, table),
            PolicyRule::ingress_from(name, ue_ip, table),
        ]
    }

    /// Creates the interface on its own task and waits for its completion
    /// signal, bounded by the link timeout.
    async fn create_link(&self, name: &str, local: Ipv4Addr) -> Result<(), TunnelError> {
        let (done_tx, done_rx) = oneshot::channel();
        let kernel = Arc::clone(&self.kernel);
        let task_name = name.to_string();
        let task = tokio::spawn(async move {
            let result = kernel.link_add_gtp(&task_name, local).await;
            let _ = done_tx.send(result);
        });

        match tokio::time::timeout(self.link_timeout, done_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(source))) => Err(TunnelError::Kernel {
                step: ProvisionStep::CreateLink,
                source,
            }),
            Ok(Err(_)) => Err(TunnelError::LinkTaskAborted),
            Err(_) => {
                task.abort();
                Err(TunnelError::LinkTimeout {
                    name: name.to_string(),
                    timeout_ms: self.link_timeout.as_millis() as u64,
                })
            }
        }
    }
}
