//! Shared run-status cell.
//!
//! One publisher exists per dispenser. The run worker is its only writer;
//! pollers read consistent snapshots at any time. Within one run the
//! published progress never decreases, and every run ends at 100 whether it
//! succeeded or not.
//!
//! Starting a run is a single check-and-set under the lock, so two callers
//! racing to start cannot both see the rig as idle.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Failed,
}

/// Snapshot of the run status as seen by pollers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub active_recipe: Option<String>,
    pub running: bool,
    /// 0..=100
    pub progress: u8,
}

/// Notes collected by the most recently finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunNotes {
    pub recipe_name: Option<String>,
    pub notes: Vec<String>,
}

/// Returned when a run is requested while another one is active.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Recipe '{active}' is already running")]
pub struct RunActive {
    pub active: String,
}

#[derive(Debug, Default)]
struct Cell {
    status: RunStatus,
    /// Notes of the active run, kept here so a crashed worker does not lose them
    run_notes: Vec<String>,
    last_notes: RunNotes,
    last_outcome: Option<RunOutcome>,
}

/// Thread-safe run-status cell.
#[derive(Debug, Default)]
pub struct ProgressPublisher {
    cell: Mutex<Cell>,
}

/// Progress after completing command `index` (0-based) of `total`.
pub fn progress_for(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (index.saturating_add(1)).saturating_mul(100) / total;
    percent.min(100) as u8
}

impl ProgressPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Cell> {
        self.cell.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `recipe` as running unless a run is already active.
    ///
    /// # Errors
    ///
    /// Returns `RunActive` naming the active recipe; the active run's state
    /// is left untouched.
    pub fn try_begin(&self, recipe: &str) -> Result<(), RunActive> {
        let mut cell = self.lock();
        if cell.status.running {
            let active = cell.status.active_recipe.clone().unwrap_or_default();
            warn!("Rejected '{}': '{}' is still running", recipe, active);
            return Err(RunActive { active });
        }
        cell.status = RunStatus {
            active_recipe: Some(recipe.to_string()),
            running: true,
            progress: 0,
        };
        cell.run_notes.clear();
        info!("Run started: {}", recipe);
        Ok(())
    }

    /// Publish progress for the active run. Values below the current
    /// progress are ignored.
    pub fn publish(&self, progress: u8) {
        let mut cell = self.lock();
        if !cell.status.running {
            return;
        }
        let progress = progress.min(100);
        if progress > cell.status.progress {
            cell.status.progress = progress;
            debug!("Progress {}%", progress);
        }
    }

    /// Record a note of the active run.
    pub fn record_note(&self, text: &str) {
        let mut cell = self.lock();
        if cell.status.running {
            cell.run_notes.push(text.to_string());
        }
    }

    /// End the active run: progress is forced to 100, the recorded notes
    /// become the last notes and the cell is cleared.
    pub fn finish(&self, outcome: RunOutcome) {
        let mut cell = self.lock();
        let notes = std::mem::take(&mut cell.run_notes);
        let recipe = cell.status.active_recipe.take();
        info!(
            "Run finished: {} ({})",
            recipe.as_deref().unwrap_or("<none>"),
            outcome
        );
        cell.status.running = false;
        cell.status.progress = 100;
        cell.last_notes = RunNotes {
            recipe_name: recipe,
            notes,
        };
        cell.last_outcome = Some(outcome);
    }

    pub fn snapshot(&self) -> RunStatus {
        self.lock().status.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().status.running
    }

    pub fn last_notes(&self) -> RunNotes {
        self.lock().last_notes.clone()
    }

    /// Outcome of the most recently finished run.
    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.lock().last_outcome
    }
}
