//! Fleet slot table
//!
//! Maps slot `1..=N` to the handle of the actor occupying it. Only the
//! fleet loop touches the table.

use nextgsim_ue::ScenarioMessage;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

/// Control handle of the actor occupying a slot.
#[derive(Debug)]
pub struct SlotHandle {
    scenario_tx: mpsc::Sender<ScenarioMessage>,
    kill: watch::Sender<bool>,
    finished: oneshot::Receiver<()>,
}

impl SlotHandle {
    /// Creates a handle from the supervision channel, the kill token and
    /// the signal sent once the occupant's supervision has ended.
    pub fn new(
        scenario_tx: mpsc::Sender<ScenarioMessage>,
        kill: watch::Sender<bool>,
        finished: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            scenario_tx,
            kill,
            finished,
        }
    }

    /// Kills the occupant, then closes its channel.
    ///
    /// Never blocks: the kill token is set even if nobody listens anymore.
    /// The returned receiver completes once the occupant has released its
    /// resources, or errors if its task went away without saying so.
    pub fn retire(self) -> oneshot::Receiver<()> {
        self.kill.send_replace(true);
        drop(self.scenario_tx);
        self.finished
    }
}

/// Slot table of a fleet of `N` UEs.
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Option<SlotHandle>>,
}

impl SlotTable {
    /// Creates an empty table with slots `1..=size`.
    pub fn new(size: u32) -> Self {
        Self {
            slots: (0..size).map(|_| None).collect(),
        }
    }

    /// Puts a new occupant in `slot`, retiring any previous one first
    /// without waiting for it.
    ///
    /// Returns false if `slot` is out of range.
    pub fn assign(&mut self, slot: u32, handle: SlotHandle) -> bool {
        let Some(entry) = self.entry_mut(slot) else {
            return false;
        };
        if let Some(previous) = entry.take() {
            debug!(slot, "Retiring previous occupant");
            drop(previous.retire());
        }
        *entry = Some(handle);
        true
    }

    /// Retires the occupant of `slot`, if any, and returns its completion
    /// signal.
    pub fn retire(&mut self, slot: u32) -> Option<oneshot::Receiver<()>> {
        let previous = self.entry_mut(slot)?.take()?;
        debug!(slot, "Retiring occupant");
        Some(previous.retire())
    }

    fn entry_mut(&mut self, slot: u32) -> Option<&mut Option<SlotHandle>> {
        self.slots.get_mut(slot.checked_sub(1)? as usize)
    }
}
