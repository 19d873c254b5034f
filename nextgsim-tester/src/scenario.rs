//! Scenario Supervisor
//!
//! The fleet loop spawns one UE actor and one supervision sub-loop per slot,
//! wave after wave, paced by the inter-registration delay. The UE of the
//! previous wave in a slot is killed and awaited before its replacement
//! starts. Finished sub-loops are booked while the fleet keeps spawning.
//! A stop request only ends spawning; the run returns once every spawned
//! actor reached NULL.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nextgsim_gtp::TunnelConfigurator;
use nextgsim_ue::{spawn_ue, GnbId, SignalingEngine, UeIdentity, COMMAND_CHANNEL_CAPACITY};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::{generate_msin, ConfigValidationError, ScenarioConfig};
use crate::gnb::GnbRegistry;
use crate::report::{RunReport, WaveReport};
use crate::slots::{SlotHandle, SlotTable};
use crate::supervisor::{supervise, SupervisionParams, SupervisionReport};

/// How long a replaced UE gets to release its resources, on top of the
/// interface creation bound when tunnels are enabled.
const RETIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// A validated multi-UE scenario, ready to run.
pub struct Scenario {
    config: ScenarioConfig,
    msin_base: u64,
    first_gnb: GnbId,
    gtp_ip_base: Ipv4Addr,
    engine: Arc<dyn SignalingEngine>,
    tunnel: Option<TunnelConfigurator>,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("config", &self.config)
            .field("gtp_ip_base", &self.gtp_ip_base)
            .field("tunnel", &self.tunnel)
            .finish_non_exhaustive()
    }
}

impl Scenario {
    /// Validates `config` and prepares a scenario whose gNBs take GTP-U
    /// addresses from `gtp_ip_base` onwards.
    pub fn new(
        config: ScenarioConfig,
        gtp_ip_base: Ipv4Addr,
        engine: Arc<dyn SignalingEngine>,
    ) -> Result<Self, ConfigValidationError> {
        config.validate()?;
        let msin_base = config.msin_base()?;
        let first_gnb = config.first_gnb_id()?;
        if config.needs_extra_gnb() {
            warn!("Handover requested with a single gNB, adding one more gNB");
        }
        Ok(Self {
            config,
            msin_base,
            first_gnb,
            gtp_ip_base,
            engine,
            tunnel: None,
        })
    }

    /// Provisions UE tunnels through `configurator` when tunnels are
    /// enabled in the scenario.
    pub fn with_tunnel(mut self, configurator: TunnelConfigurator) -> Self {
        self.tunnel = Some(configurator);
        self
    }

    /// Scenario parameters.
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Runs the fleet loop until one wave is done (or, when looping, until
    /// `stop` carries `true`), then waits for every UE to finish.
    pub async fn run(self, stop: watch::Receiver<bool>) -> RunReport {
        let started = Instant::now();
        let num_ues = self.config.num_ues;
        let interval = self.config.time_between_registration();

        let gnbs = GnbRegistry::spawn(self.config.num_gnbs(), self.first_gnb, self.gtp_ip_base);

        let tunnel = if self.config.tunnel_enabled {
            if self.tunnel.is_none() {
                warn!("Tunnels enabled but no tunnel configurator set, data plane disabled");
            }
            self.tunnel.clone()
        } else {
            None
        };
        // A killed UE may be in the middle of creating its interface
        let retire_timeout = match &tunnel {
            Some(configurator) => RETIRE_TIMEOUT + configurator.link_timeout(),
            None => RETIRE_TIMEOUT,
        };

        let mut slots = SlotTable::new(num_ues);
        let mut running: JoinSet<SupervisionReport> = JoinSet::new();
        let mut waves: Vec<WaveReport> = Vec::new();
        let mut peak_live_ues = 0;
        let mut stopped = false;
        let mut wave = 0;

        'fleet: loop {
            wave += 1;
            info!("Wave {wave}: spawning {num_ues} UE(s)");
            waves.push(WaveReport::new(wave));

            for slot in 1..=num_ues {
                let Some(serving) = gnbs.serving(slot) else {
                    error!(slot, "No serving gNB");
                    break 'fleet;
                };
                let identity = UeIdentity {
                    msin: generate_msin(self.msin_base, slot),
                    slot,
                    wave,
                    gnb: serving.id,
                    gnb_ip: serving.gtp_ip,
                };

                // The replacement shares the MSIN, hence the interface and
                // routing table, of the UE it replaces
                if let Some(finished) = slots.retire(slot) {
                    info!(slot, wave, "Replacing UE of the previous wave");
                    if timeout(retire_timeout, finished).await.is_err() {
                        warn!(slot, "Previous UE still shutting down, replacing it anyway");
                    }
                }

                let (scenario_tx, scenario_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
                let (kill_tx, kill_rx) = watch::channel(false);
                let (finished_tx, finished_rx) = oneshot::channel();
                slots.assign(slot, SlotHandle::new(scenario_tx, kill_tx, finished_rx));

                let ue = spawn_ue(
                    identity.clone(),
                    self.engine.clone(),
                    tunnel.clone(),
                    kill_rx.clone(),
                );
                let params = SupervisionParams {
                    pdu_sessions: self.config.num_pdu_sessions,
                    deregister_after: self.config.time_before_deregistration(),
                    handover_after: self.config.time_before_handover(),
                    handover_target: gnbs.handover_target(slot).cloned(),
                };
                running.spawn(async move {
                    let report = supervise(identity, ue, scenario_rx, kill_rx, params).await;
                    let _ = finished_tx.send(());
                    report
                });
                if let Some(current) = waves.last_mut() {
                    current.spawned += 1;
                }
                peak_live_ues = peak_live_ues.max(running.len() as u32);

                tokio::time::sleep(interval).await;
                while let Some(joined) = running.try_join_next() {
                    record(&mut waves, joined);
                }
                if *stop.borrow() {
                    info!(wave, slot, "Stop requested, no more UEs are spawned");
                    stopped = true;
                    break 'fleet;
                }
            }

            if !self.config.loop_waves {
                break;
            }
        }

        // Running actors keep going; only the scenario channels close here
        drop(slots);

        info!("Waiting for {} UE(s) to finish", running.len());
        while let Some(joined) = running.join_next().await {
            record(&mut waves, joined);
        }

        let handovers = gnbs.shutdown().await;
        let report = RunReport {
            elapsed: started.elapsed(),
            waves,
            handovers,
            peak_live_ues,
            stopped,
        };
        info!(
            spawned = report.spawned(),
            failed = report.failed(),
            "Run finished in {:.1}s",
            report.elapsed.as_secs_f64()
        );
        report
    }
}

/// Books a finished supervision task into its wave.
fn record(waves: &mut [WaveReport], joined: Result<SupervisionReport, JoinError>) {
    match joined {
        Ok(finished) => {
            let wave = finished.outcome.wave;
            match waves.iter_mut().find(|w| w.wave == wave) {
                Some(report) => report.record(&finished),
                None => warn!(wave, "UE finished in an unknown wave"),
            }
        }
        Err(e) => error!("Supervision task failed: {e}"),
    }
}
