//! Mock signaling engine for integration testing
//!
//! Answers every procedure after a fixed latency and records what each UE
//! asked for, in processing order, so tests can check ordering and timing.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nextgsim_gtp::DeviceMessage;
use nextgsim_ue::{
    ActorError, EngineEvent, EngineLink, GnbId, MmState, ProcedureRequest, SignalingEngine,
    UeIdentity,
};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

/// What the engine saw or did for one UE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    /// The actor attached
    Attached,
    /// Registration requested
    Register,
    /// PDU session requested
    EstablishPduSession { psi: u8 },
    /// Handover requested
    Handover { target: GnbId },
    /// Deregistration requested
    Deregister,
    /// The network deregistered the UE on its own
    NetworkDetach,
    /// A state change was reported to the actor
    StateReported(MmState),
    /// The actor dropped its side of the link
    LinkClosed,
}

/// One log entry
#[derive(Debug, Clone)]
pub struct RecordedEntry {
    /// MSIN of the UE
    pub msin: String,
    /// Fleet slot
    pub slot: u32,
    /// Wave
    pub wave: u32,
    /// Serving gNB at attach time
    pub gnb: GnbId,
    /// When it happened
    pub at: Instant,
    /// What happened
    pub what: Recorded,
}

/// Mock engine configuration
#[derive(Debug, Clone)]
pub struct MockEngineConfig {
    /// Duration of each procedure
    pub latency: Duration,
    /// Address of the UE in slot 1
    pub ue_ip_base: Ipv4Addr,
    /// UPF address put in device messages
    pub upf_ip: Ipv4Addr,
    /// Send a device message after the first PDU session
    pub send_device_message: bool,
    /// MSINs whose PDU session requests are rejected
    pub reject_pdu_sessions_for: Vec<String>,
    /// MSINs whose attach is refused
    pub refuse_attach_for: Vec<String>,
    /// Deregister the UE from the network side once this many PDU
    /// sessions are up
    pub detach_after_pdu_sessions: Option<u32>,
}

impl Default for MockEngineConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(20),
            ue_ip_base: Ipv4Addr::new(10, 60, 0, 1),
            upf_ip: Ipv4Addr::new(127, 0, 0, 8),
            send_device_message: false,
            reject_pdu_sessions_for: Vec::new(),
            refuse_attach_for: Vec::new(),
            detach_after_pdu_sessions: None,
        }
    }
}

/// Recording signaling engine
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    config: MockEngineConfig,
    log: Arc<Mutex<Vec<RecordedEntry>>>,
}

impl MockEngine {
    /// Creates an engine with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine with a custom configuration
    pub fn with_config(config: MockEngineConfig) -> Self {
        Self {
            config,
            log: Arc::default(),
        }
    }

    /// Every recorded entry, in order
    pub async fn entries(&self) -> Vec<RecordedEntry> {
        self.log.lock().await.clone()
    }

    /// Entries of one UE lifecycle, in order
    pub async fn lifecycle(&self, msin: &str, wave: u32) -> Vec<RecordedEntry> {
        self.log
            .lock()
            .await
            .iter()
            .filter(|e| e.msin == msin && e.wave == wave)
            .cloned()
            .collect()
    }

    /// Number of entries matching `what`
    pub async fn count(&self, what: impl Fn(&Recorded) -> bool) -> usize {
        self.log.lock().await.iter().filter(|e| what(&e.what)).count()
    }
}

#[async_trait]
impl SignalingEngine for MockEngine {
    async fn attach(&self, identity: &UeIdentity) -> Result<EngineLink, ActorError> {
        if self.config.refuse_attach_for.contains(&identity.msin) {
            return Err(ActorError::EngineUnavailable(format!(
                "attach of {} refused",
                identity.msin
            )));
        }

        let (requests_tx, requests_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(16);
        let session = MockSession {
            identity: identity.clone(),
            config: self.config.clone(),
            log: self.log.clone(),
            gnb_ip: identity.gnb_ip,
            state: MmState::Null,
            sessions: 0,
            events: events_tx,
        };
        session.record(Recorded::Attached).await;
        tokio::spawn(session.run(requests_rx));

        Ok(EngineLink {
            requests: requests_tx,
            events: events_rx,
        })
    }
}

struct MockSession {
    identity: UeIdentity,
    config: MockEngineConfig,
    log: Arc<Mutex<Vec<RecordedEntry>>>,
    gnb_ip: Ipv4Addr,
    state: MmState,
    sessions: u32,
    events: mpsc::Sender<EngineEvent>,
}

impl MockSession {
    async fn record(&self, what: Recorded) {
        self.log.lock().await.push(RecordedEntry {
            msin: self.identity.msin.clone(),
            slot: self.identity.slot,
            wave: self.identity.wave,
            gnb: self.identity.gnb,
            at: Instant::now(),
            what,
        });
    }

    async fn report(&mut self, state: MmState) {
        self.state = state;
        self.record(Recorded::StateReported(state)).await;
        let _ = self.events.send(EngineEvent::StateChanged(state)).await;
    }

    async fn run(mut self, mut requests: mpsc::Receiver<ProcedureRequest>) {
        let latency = self.config.latency;
        loop {
            let Some(request) = requests.recv().await else {
                self.record(Recorded::LinkClosed).await;
                return;
            };
            match request {
                ProcedureRequest::Register => {
                    self.record(Recorded::Register).await;
                    self.report(MmState::RegisteredInitiated).await;
                    tokio::time::sleep(latency).await;
                    self.report(MmState::Registered).await;
                }
                ProcedureRequest::EstablishPduSession { psi } => {
                    self.record(Recorded::EstablishPduSession { psi }).await;
                    tokio::time::sleep(latency).await;
                    if self.config.reject_pdu_sessions_for.contains(&self.identity.msin) {
                        let _ = self
                            .events
                            .send(EngineEvent::ProcedureFailed {
                                reason: format!("PDU session {psi} rejected"),
                            })
                            .await;
                        continue;
                    }
                    self.sessions += 1;
                    let ue_ip = self.ue_ip();
                    let _ = self
                        .events
                        .send(EngineEvent::PduSessionEstablished { psi, ue_ip })
                        .await;
                    if self.sessions == 1 && self.config.send_device_message {
                        let _ = self
                            .events
                            .send(EngineEvent::DeviceMessage(self.device_message()))
                            .await;
                    }
                    if self.config.detach_after_pdu_sessions == Some(self.sessions) {
                        self.record(Recorded::NetworkDetach).await;
                        self.detach().await;
                        return;
                    }
                }
                ProcedureRequest::Handover { target } => {
                    self.record(Recorded::Handover { target: target.id }).await;
                    tokio::time::sleep(latency).await;
                    self.gnb_ip = target.gtp_ip;
                    let _ = self
                        .events
                        .send(EngineEvent::HandoverComplete {
                            gnb: target.id,
                            gtp_ip: target.gtp_ip,
                        })
                        .await;
                    if self.sessions > 0 && self.config.send_device_message {
                        let _ = self
                            .events
                            .send(EngineEvent::DeviceMessage(self.device_message()))
                            .await;
                    }
                }
                ProcedureRequest::Deregister => {
                    self.record(Recorded::Deregister).await;
                    self.detach().await;
                    return;
                }
            }
        }
    }

    async fn detach(&mut self) {
        if self.state != MmState::Null {
            self.report(MmState::DeregisteredInitiated).await;
            tokio::time::sleep(self.config.latency).await;
        }
        self.report(MmState::Null).await;
    }

    fn ue_ip(&self) -> Ipv4Addr {
        let base = u32::from(self.config.ue_ip_base);
        Ipv4Addr::from(base + self.identity.slot - 1)
    }

    fn device_message(&self) -> Vec<u8> {
        DeviceMessage {
            gnb_ip: self.gnb_ip,
            upf_ip: self.config.upf_ip,
            o_teid: 0x1000 + self.identity.slot,
            i_teid: 0x2000 + self.identity.slot,
        }
        .to_vec()
    }
}
