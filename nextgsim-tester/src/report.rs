//! Run report

use std::fmt;
use std::time::Duration;

use nextgsim_ue::UeStatus;

use crate::supervisor::SupervisionReport;

/// Counters of one wave.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaveReport {
    /// Wave number (1-based)
    pub wave: u32,
    /// UE actors spawned
    pub spawned: u32,
    /// UEs that detached normally
    pub completed: u32,
    /// UEs that ended after a failure
    pub failed: u32,
    /// UEs killed by slot replacement
    pub killed: u32,
    /// `NewPduSession` commands delivered
    pub pdu_sessions_requested: u32,
    /// PDU sessions the actors established
    pub pdu_sessions_established: u32,
    /// Handover commands delivered
    pub handovers_requested: u32,
    /// `(supi, reason)` of every failed UE
    pub failures: Vec<(String, String)>,
}

impl WaveReport {
    /// Creates an empty report for `wave`.
    pub fn new(wave: u32) -> Self {
        Self {
            wave,
            ..Default::default()
        }
    }

    /// Accounts for one finished UE.
    pub fn record(&mut self, report: &SupervisionReport) {
        match &report.outcome.status {
            UeStatus::Completed => self.completed += 1,
            UeStatus::Killed => self.killed += 1,
            UeStatus::Failed(reason) => {
                self.failed += 1;
                self.failures
                    .push((report.outcome.supi.clone(), reason.clone()));
            }
        }
        self.pdu_sessions_requested += report.pdu_requests;
        self.pdu_sessions_established += report.outcome.pdu_sessions;
        if report.handover_sent {
            self.handovers_requested += 1;
        }
    }

    /// UEs that ended, whatever the status.
    pub fn finished(&self) -> u32 {
        self.completed + self.failed + self.killed
    }

    /// True if no UE of the wave failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Wall-clock duration of the run
    pub elapsed: Duration,
    /// Per-wave counters, in wave order
    pub waves: Vec<WaveReport>,
    /// Handovers accepted by the gNBs
    pub handovers: u32,
    /// Most UEs under supervision at the same time
    pub peak_live_ues: u32,
    /// The run ended on a stop request
    pub stopped: bool,
}

impl RunReport {
    /// Total UE actors spawned.
    pub fn spawned(&self) -> u32 {
        self.waves.iter().map(|w| w.spawned).sum()
    }

    /// Total failed UEs.
    pub fn failed(&self) -> u32 {
        self.waves.iter().map(|w| w.failed).sum()
    }

    /// Total `NewPduSession` commands delivered.
    pub fn pdu_sessions_requested(&self) -> u32 {
        self.waves.iter().map(|w| w.pdu_sessions_requested).sum()
    }

    /// True if every wave succeeded. Killed UEs do not count as failures.
    pub fn is_success(&self) -> bool {
        self.waves.iter().all(WaveReport::is_success)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==========================================")?;
        writeln!(f, "  NextGSim Multi-UE Test Report")?;
        writeln!(f, "==========================================")?;
        writeln!(f, "Duration:          {:.1}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "Waves:             {}", self.waves.len())?;
        writeln!(f, "UEs spawned:       {}", self.spawned())?;
        writeln!(f, "Peak live UEs:     {}", self.peak_live_ues)?;
        writeln!(f, "Handovers:         {}", self.handovers)?;
        if self.stopped {
            writeln!(f, "Stopped on request")?;
        }
        for wave in &self.waves {
            writeln!(f)?;
            writeln!(f, "--- Wave {} ---", wave.wave)?;
            writeln!(f, "  Spawned:         {}", wave.spawned)?;
            writeln!(f, "  Completed:       {}", wave.completed)?;
            writeln!(f, "  Failed:          {}", wave.failed)?;
            writeln!(f, "  Killed:          {}", wave.killed)?;
            writeln!(
                f,
                "  PDU sessions:    {}/{}",
                wave.pdu_sessions_established, wave.pdu_sessions_requested
            )?;
            for (supi, reason) in &wave.failures {
                writeln!(f, "  {supi}: {reason}")?;
            }
        }
        writeln!(f)?;
        let verdict = if self.is_success() { "PASS" } else { "FAIL" };
        writeln!(f, "Result:            {verdict}")?;
        writeln!(f, "==========================================")
    }
}
