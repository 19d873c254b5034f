//! Simulated gNB registry
//!
//! Each gNB is a small task owning an inbound channel. The registry holds
//! their [`GnbHandle`]s and picks the serving and handover-target gNB of
//! each fleet slot.

use std::net::Ipv4Addr;

use nextgsim_common::offset_ipv4;
use nextgsim_ue::{
    signalled, GnbHandle, GnbId, GnbMessage, HandoverAck, DEFAULT_CHANNEL_CAPACITY,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::generate_gnb_id;

/// Registry of running gNB tasks.
#[derive(Debug)]
pub struct GnbRegistry {
    gnbs: Vec<GnbHandle>,
    tasks: Vec<JoinHandle<u32>>,
    shutdown: watch::Sender<bool>,
}

impl GnbRegistry {
    /// Spawns `count` gNBs. gNB `n` (1-based) gets ID `first_id + n - 1`
    /// and GTP-U address `gtp_ip_base + n - 1`.
    ///
    /// Stops early at the end of the gNB ID range; a validated scenario
    /// never gets there.
    pub fn spawn(count: u32, first_id: GnbId, gtp_ip_base: Ipv4Addr) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut gnbs = Vec::with_capacity(count as usize);
        let mut tasks = Vec::with_capacity(count as usize);

        for n in 1..=count {
            let Some(id) = generate_gnb_id(first_id, n) else {
                warn!(first = %first_id, "gNB ID range exhausted after {} gNB(s)", n - 1);
                break;
            };
            let gtp_ip = offset_ipv4(gtp_ip_base, n - 1);
            let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
            tasks.push(tokio::spawn(run_gnb(id, gtp_ip, rx, shutdown_rx.clone())));
            gnbs.push(GnbHandle::new(id, gtp_ip, tx));
        }
        info!("{} gNB(s) started", gnbs.len());

        Self {
            gnbs,
            tasks,
            shutdown,
        }
    }

    /// Number of gNBs.
    pub fn len(&self) -> u32 {
        self.gnbs.len() as u32
    }

    /// Returns true if the registry holds no gNB.
    pub fn is_empty(&self) -> bool {
        self.gnbs.is_empty()
    }

    /// The `n`-th gNB (1-based).
    pub fn nth(&self, n: u32) -> Option<&GnbHandle> {
        self.gnbs.get(n.checked_sub(1)? as usize)
    }

    /// Serving gNB of a fleet slot: gNB `slot % len + 1`.
    pub fn serving(&self, slot: u32) -> Option<&GnbHandle> {
        if self.is_empty() {
            return None;
        }
        self.nth(slot % self.len() + 1)
    }

    /// Handover target of a fleet slot: gNB `(slot + 1) % len + 1`, which
    /// differs from the serving gNB whenever there are at least two.
    pub fn handover_target(&self, slot: u32) -> Option<&GnbHandle> {
        if self.len() < 2 {
            return None;
        }
        self.nth((slot + 1) % self.len() + 1)
    }

    /// Stops every gNB and returns the number of handovers they accepted.
    pub async fn shutdown(self) -> u32 {
        self.shutdown.send_replace(true);
        drop(self.gnbs);
        let mut handovers = 0;
        for task in self.tasks {
            handovers += task.await.unwrap_or(0);
        }
        handovers
    }
}

async fn run_gnb(
    id: GnbId,
    gtp_ip: Ipv4Addr,
    mut inbound: mpsc::Receiver<GnbMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> u32 {
    debug!(gnb = %id, gtp_ip = %gtp_ip, "gNB started");
    let mut handovers = 0;

    loop {
        tokio::select! {
            _ = signalled(&mut shutdown) => break,
            msg = inbound.recv() => match msg {
                Some(GnbMessage::HandoverRequest { supi, source, ack }) => {
                    info!(gnb = %id, "Handover of {supi} from gNB {source} accepted");
                    handovers += 1;
                    let _ = ack.send(HandoverAck { gnb: id, gtp_ip });
                }
                None => break,
            },
        }
    }

    debug!(gnb = %id, handovers, "gNB stopped");
    handovers
}
