//! Loopback signaling engine
//!
//! Emulates the network side of registration, PDU session establishment,
//! handover and deregistration without an AMF. Each procedure takes a
//! configurable latency. Addresses and TEIDs are derived from the UE slot so
//! that concurrently live UEs never share a tunnel interface or table.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use nextgsim_common::{offset_ipv4, TesterConfig};
use nextgsim_gtp::DeviceMessage;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::context::UeIdentity;
use crate::engine::{EngineEvent, EngineLink, ProcedureRequest, SignalingEngine};
use crate::error::ActorError;
use crate::state::MmState;
use crate::tasks::{GnbId, GnbMessage, HandoverAck, DEFAULT_CHANNEL_CAPACITY};

/// Base of the TEIDs used towards the UPF (also the routing table ids).
pub const UPLINK_TEID_BASE: u32 = 0x1000;
/// Base of the TEIDs used by the UPF towards the gNB.
pub const DOWNLINK_TEID_BASE: u32 = 0x2000;

/// Built-in [`SignalingEngine`].
#[derive(Debug, Clone)]
pub struct LoopbackEngine {
    latency: Duration,
    ip_base: Ipv4Addr,
    upf_ip: Ipv4Addr,
}

impl LoopbackEngine {
    /// Creates an engine with the given per-procedure latency.
    pub fn new(latency: Duration, ip_base: Ipv4Addr, upf_ip: Ipv4Addr) -> Self {
        Self {
            latency,
            ip_base,
            upf_ip,
        }
    }

    /// Creates an engine from the tester configuration.
    pub fn from_config(config: &TesterConfig) -> Self {
        Self::new(
            Duration::from_millis(config.engine.procedure_latency_ms),
            config.ue.ip_base,
            config.gnb.upf_ip,
        )
    }

    /// Address handed to the UE in `slot`.
    pub fn ue_ip(&self, slot: u32) -> Ipv4Addr {
        offset_ipv4(self.ip_base, slot.saturating_sub(1))
    }
}

#[async_trait]
impl SignalingEngine for LoopbackEngine {
    async fn attach(&self, identity: &UeIdentity) -> Result<EngineLink, ActorError> {
        let (requests_tx, requests_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);

        let session = LoopbackSession {
            supi: identity.supi(),
            latency: self.latency,
            ue_ip: self.ue_ip(identity.slot),
            upf_ip: self.upf_ip,
            o_teid: UPLINK_TEID_BASE + identity.slot,
            i_teid: DOWNLINK_TEID_BASE + identity.slot,
            gnb: identity.gnb,
            gnb_ip: identity.gnb_ip,
            state: MmState::Null,
            sessions: 0,
            events: events_tx,
        };
        tokio::spawn(session.run(requests_rx));

        Ok(EngineLink {
            requests: requests_tx,
            events: events_rx,
        })
    }
}

struct LoopbackSession {
    supi: String,
    latency: Duration,
    ue_ip: Ipv4Addr,
    upf_ip: Ipv4Addr,
    o_teid: u32,
    i_teid: u32,
    gnb: GnbId,
    gnb_ip: Ipv4Addr,
    state: MmState,
    sessions: u32,
    events: mpsc::Sender<EngineEvent>,
}

impl LoopbackSession {
    async fn run(mut self, mut requests: mpsc::Receiver<ProcedureRequest>) {
        while let Some(request) = requests.recv().await {
            let keep_going = match request {
                ProcedureRequest::Register => self.register().await,
                ProcedureRequest::EstablishPduSession { psi } => self.establish(psi).await,
                ProcedureRequest::Handover { target } => {
                    let (ack_tx, ack_rx) = oneshot::channel();
                    let request = GnbMessage::HandoverRequest {
                        supi: self.supi.clone(),
                        source: self.gnb,
                        ack: ack_tx,
                    };
                    if target.inbound().send(request).await.is_err() {
                        self.report(EngineEvent::ProcedureFailed {
                            reason: format!("gNB {} unreachable", target.id),
                        })
                        .await
                    } else {
                        self.handover(ack_rx).await
                    }
                }
                ProcedureRequest::Deregister => {
                    self.deregister().await;
                    break;
                }
            };
            if !keep_going {
                break;
            }
        }
        debug!(supi = %self.supi, "Loopback session closed");
    }

    async fn report(&self, event: EngineEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    async fn set_state(&mut self, state: MmState) -> bool {
        self.state = state;
        self.report(EngineEvent::StateChanged(state)).await
    }

    async fn register(&mut self) -> bool {
        if !matches!(self.state, MmState::Null | MmState::Deregistered) {
            warn!(supi = %self.supi, state = %self.state, "Registration ignored");
            return true;
        }
        if !self.set_state(MmState::RegisteredInitiated).await {
            return false;
        }
        tokio::time::sleep(self.latency).await;
        self.set_state(MmState::Registered).await
    }

    async fn establish(&mut self, psi: u8) -> bool {
        if self.state != MmState::Registered {
            return self
                .report(EngineEvent::ProcedureFailed {
                    reason: format!("PDU session {psi} requested in {}", self.state),
                })
                .await;
        }
        tokio::time::sleep(self.latency).await;
        self.sessions += 1;
        if !self
            .report(EngineEvent::PduSessionEstablished {
                psi,
                ue_ip: self.ue_ip,
            })
            .await
        {
            return false;
        }
        if self.sessions == 1 {
            return self.report(EngineEvent::DeviceMessage(self.device_message())).await;
        }
        true
    }

    async fn handover(&mut self, ack: oneshot::Receiver<HandoverAck>) -> bool {
        tokio::time::sleep(self.latency).await;
        let ack = match ack.await {
            Ok(ack) => ack,
            Err(_) => {
                return self
                    .report(EngineEvent::ProcedureFailed {
                        reason: "handover not acknowledged".to_string(),
                    })
                    .await
            }
        };
        self.gnb = ack.gnb;
        self.gnb_ip = ack.gtp_ip;
        if !self
            .report(EngineEvent::HandoverComplete {
                gnb: ack.gnb,
                gtp_ip: ack.gtp_ip,
            })
            .await
        {
            return false;
        }
        // The tunnel now terminates on the target gNB
        if self.sessions > 0 {
            return self.report(EngineEvent::DeviceMessage(self.device_message())).await;
        }
        true
    }

    async fn deregister(&mut self) {
        if self.state == MmState::Null {
            self.set_state(MmState::Null).await;
            return;
        }
        if !self.set_state(MmState::DeregisteredInitiated).await {
            return;
        }
        tokio::time::sleep(self.latency).await;
        self.set_state(MmState::Null).await;
    }

    fn device_message(&self) -> Vec<u8> {
        DeviceMessage {
            gnb_ip: self.gnb_ip,
            upf_ip: self.upf_ip,
            o_teid: self.o_teid,
            i_teid: self.i_teid,
        }
        .to_vec()
    }
}
