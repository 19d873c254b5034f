//! Kernel GTP-U tunnel provisioning
//!
//! Once an emulated UE is attached, its user plane is carried by a gtp5g
//! kernel interface. This crate builds that interface and the chain of
//! kernel objects hanging off it:
//!
//! - two FARs (forwarding action rules) and two PDRs (packet detection rules)
//! - the UE address (/32) on the interface
//! - a route for the test-traffic prefix in a per-UE routing table
//! - policy rules sending traffic that enters the interface to that table
//!
//! The kernel itself is reached through the [`KernelNetworking`] trait.
//! [`CommandNetworking`] implements it with the gtp5g userspace tools and
//! iproute2.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nextgsim_gtp::{CommandNetworking, DeviceMessage, TunnelConfigurator};
//!
//! let kernel = Arc::new(CommandNetworking::default());
//! let configurator = TunnelConfigurator::new(kernel, "30.103.12.0/24".parse()?, timeout);
//! let peer = DeviceMessage::from_slice(payload)?;
//! let resources = configurator.provision("0000000120", ue_ip, &peer).await?;
//! // ...
//! configurator.teardown(&resources).await;
//! ```

pub mod command;
pub mod configurator;
pub mod kernel;
pub mod message;
pub mod tunnel;

pub use command::CommandNetworking;
pub use configurator::{interface_name, ProvisionStep, TunnelConfigurator, TunnelError};
pub use kernel::{KernelError, KernelNetworking, LinkHandle, PolicyRule, Route, RouteScope};
pub use message::DeviceMessage;
pub use tunnel::{
    Far, FarAction, Fteid, OuterHeaderCreation, Pdr, TunnelResources, DOWNLINK_FAR_ID,
    DOWNLINK_PDR_ID, GTP_U_PORT, UPLINK_FAR_ID, UPLINK_PDR_ID,
};
