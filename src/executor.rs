//! Recipe executor and pump aggregator.
//!
//! Runs a validated command sequence against a [`DeviceTransport`], strictly
//! in order, on the calling thread.
//!
//! # Pump aggregation
//!
//! `servo cl` steps under a pump-served target are not sent one by one. Their
//! volume is accumulated and issued as a single `pump` request when the
//! platform is about to move again (or the recipe ends). A `wait` seen while
//! such a pour is pending is the drain time for that pour: it is not slept
//! immediately but after the pump has run.
//!
//! ```text
//! Idle
//!   ↓
//! Running ⇄ Draining(pump, duration, drain)
//!   ↓
//! Finished(Success | Failed)
//! ```
//!
//! The controller never reports when a pour is complete; the executor waits
//! out the computed duration itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config_store::{is_numeric_target, Config, PumpId, WaitPlaceholder};
use crate::progress::{progress_for, ProgressPublisher, RunOutcome};
use crate::recipe::command::{Command, ServoAmount, WaitValue};
use crate::transport::{DeviceRequest, DeviceTransport, TransportError, TransportResponse};

/// Wait used for placeholders the config does not know.
pub const UNKNOWN_PLACEHOLDER_MS: u64 = WaitPlaceholder::MoveWait.default_ms();

/// Default timeout for actuation requests.
pub const DEFAULT_ACTUATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking pause on the run worker.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// What to do when the controller rejects or misses a request mid-run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransportFailurePolicy {
    /// Fail the run on the first transport error
    #[default]
    Abort,
    /// Log the error and carry on with the next command
    Continue,
}

/// Executor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub actuation_timeout: Duration,
    pub failure_policy: TransportFailurePolicy,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            actuation_timeout: DEFAULT_ACTUATION_TIMEOUT,
            failure_policy: TransportFailurePolicy::default(),
        }
    }
}

/// Interpreter phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    /// A pump pour is pending and its drain time has been recorded
    Draining {
        pump: PumpId,
        duration_ms: u64,
        drain_ms: u64,
    },
    Finished(RunOutcome),
}

impl RunPhase {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished(_))
    }

    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        match (self, next) {
            (Self::Idle, Self::Running) => true,
            (Self::Running, Self::Draining { .. }) => true,
            (Self::Draining { .. }, Self::Draining { .. }) => true,
            (Self::Draining { .. }, Self::Running) => true,
            (Self::Running | Self::Draining { .. }, Self::Finished(_)) => true,
            // A run can fail before its first command.
            (Self::Idle, Self::Finished(RunOutcome::Failed)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Draining {
                pump,
                duration_ms,
                drain_ms,
            } => write!(f, "draining(pump {}, {} ms, drain {} ms)", pump, duration_ms, drain_ms),
            Self::Finished(outcome) => write!(f, "finished({})", outcome),
        }
    }
}

/// Volume accumulated for one pump, not yet sent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingPour {
    pub pump: PumpId,
    pub total_cl: f64,
    pub flow_ms_per_cl: f64,
}

impl PendingPour {
    /// Pump run time, rounded once over the whole volume.
    pub fn duration_ms(&self) -> u64 {
        let ms = (self.total_cl * self.flow_ms_per_cl).round();
        if ms.is_finite() && ms > 0.0 {
            ms as u64
        } else {
            0
        }
    }
}

/// Working state of one run. Owned by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionState {
    pub current_target: Option<String>,
    pub pending: Option<PendingPour>,
    pub pending_drain_ms: u64,
    pub notes: Vec<String>,
    phase: RunPhase,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            current_target: None,
            pending: None,
            pending_drain_ms: 0,
            notes: Vec::new(),
            phase: RunPhase::Idle,
        }
    }
}

impl ExecutionState {
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Pending pump run time in ms; 0 when nothing is pending.
    pub fn aggregated_pump_ms(&self) -> u64 {
        self.pending.map_or(0, |p| p.duration_ms())
    }

    fn transition(&mut self, next: RunPhase) -> Result<(), ExecutionError> {
        if !self.phase.can_transition_to(next) {
            return Err(ExecutionError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        debug!("Executor phase {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }
}

/// Errors that end a run.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// A request failed under the aborting policy
    #[error("Request {request} failed: {source}")]
    Transport {
        request: DeviceRequest,
        #[source]
        source: TransportError,
    },

    /// A move target could not be resolved against the config snapshot
    #[error("Cannot resolve move target '{target}'")]
    UnresolvedTarget { target: String },

    #[error("Invalid executor transition from {from} to {to}")]
    InvalidTransition { from: RunPhase, to: RunPhase },

    /// The run worker died without finishing the run
    #[error("Run worker panicked: {0}")]
    WorkerPanicked(String),
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub commands_executed: usize,
    pub requests_sent: usize,
    /// Requests that failed under the continuing policy
    pub failed_requests: usize,
    pub notes: Vec<String>,
}

/// Runs one command sequence.
pub struct Executor {
    transport: Arc<dyn DeviceTransport>,
    sleeper: Arc<dyn Sleeper>,
    progress: Option<Arc<ProgressPublisher>>,
    config: Config,
    options: ExecutorOptions,
    state: ExecutionState,
    report: RunReport,
}

impl Executor {
    /// Create an executor over a config snapshot.
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        sleeper: Arc<dyn Sleeper>,
        config: Config,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            transport,
            sleeper,
            progress: None,
            config,
            options,
            state: ExecutionState::default(),
            report: RunReport::default(),
        }
    }

    /// Publish per-command progress and notes to `publisher`.
    pub fn with_progress(mut self, publisher: Arc<ProgressPublisher>) -> Self {
        self.progress = Some(publisher);
        self
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Execute `commands` to `done` or the end of the sequence.
    ///
    /// # Errors
    ///
    /// Returns an `ExecutionError` if the run has to be aborted; the executor
    /// is then in `Finished(Failed)`.
    pub fn run(&mut self, commands: &[Command]) -> Result<RunReport, ExecutionError> {
        match self.run_inner(commands) {
            Ok(()) => {
                self.state.transition(RunPhase::Finished(RunOutcome::Success))?;
                let mut report = std::mem::take(&mut self.report);
                report.notes = self.state.notes.clone();
                info!(
                    "Executed {} commands, {} requests ({} failed)",
                    report.commands_executed, report.requests_sent, report.failed_requests
                );
                Ok(report)
            }
            Err(e) => {
                error!("Run aborted: {}", e);
                self.state.phase = RunPhase::Finished(RunOutcome::Failed);
                Err(e)
            }
        }
    }

    fn run_inner(&mut self, commands: &[Command]) -> Result<(), ExecutionError> {
        self.state.transition(RunPhase::Running)?;
        let total = commands.len();

        for (index, command) in commands.iter().enumerate() {
            debug!("[{}/{}] {}", index + 1, total, command);
            let done = self.step(command)?;
            self.report.commands_executed += 1;
            self.publish(progress_for(index, total));
            if done {
                return Ok(());
            }
        }

        // Falling off the end behaves like `done`.
        self.flush_pump()
    }

    /// Execute one command. Returns true on `done`.
    fn step(&mut self, command: &Command) -> Result<bool, ExecutionError> {
        match command {
            Command::Start => {}
            Command::Move { target } => self.move_to(target)?,
            Command::Servo(ServoAmount::Centiliters(cl)) => self.pour(*cl)?,
            Command::Servo(ServoAmount::Millis(ms)) => {
                self.submit(DeviceRequest::Servo { delay: *ms })?;
            }
            Command::Wait(value) => self.wait(value)?,
            Command::Note { text } => {
                info!("Note: {}", text);
                if let Some(publisher) = &self.progress {
                    publisher.record_note(text);
                }
                self.state.notes.push(text.clone());
            }
            Command::Done => {
                self.flush_pump()?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn move_to(&mut self, target: &str) -> Result<(), ExecutionError> {
        self.flush_pump()?;

        let position =
            self.config
                .resolve_position(target)
                .ok_or_else(|| ExecutionError::UnresolvedTarget {
                    target: target.to_string(),
                })?;
        self.submit(DeviceRequest::Move { position })?;

        self.state.current_target = if is_numeric_target(target) {
            None
        } else {
            Some(target.to_string())
        };
        Ok(())
    }

    fn pour(&mut self, cl: f64) -> Result<(), ExecutionError> {
        let pump = self
            .state
            .current_target
            .as_deref()
            .and_then(|target| self.config.resolve_pump_for(target));

        match pump {
            Some(pump) => {
                let pending = self.state.pending.get_or_insert(PendingPour {
                    pump,
                    total_cl: 0.0,
                    flow_ms_per_cl: self.config.pump_flow_rate(pump),
                });
                pending.total_cl += cl;
                debug!(
                    "Aggregating {} cl on pump {} (total {} cl)",
                    cl, pump, pending.total_cl
                );
                Ok(())
            }
            None => {
                let delay = (cl / 2.0 * self.config.pour_time()).round().max(0.0) as u64;
                self.submit(DeviceRequest::Servo { delay })?;
                Ok(())
            }
        }
    }

    fn wait(&mut self, value: &WaitValue) -> Result<(), ExecutionError> {
        let ms = self.resolve_wait(value);
        match self.state.pending {
            Some(pending) if pending.duration_ms() > 0 => {
                debug!("Deferring {} ms wait until pump {} has run", ms, pending.pump);
                self.state.pending_drain_ms = ms;
                self.state.transition(RunPhase::Draining {
                    pump: pending.pump,
                    duration_ms: pending.duration_ms(),
                    drain_ms: ms,
                })
            }
            _ => {
                self.pause(ms);
                Ok(())
            }
        }
    }

    fn resolve_wait(&self, value: &WaitValue) -> u64 {
        match value {
            WaitValue::Millis(ms) => *ms,
            WaitValue::Placeholder(name) => self.config.wait_ms(name).unwrap_or_else(|| {
                warn!(
                    "Unknown wait placeholder '{}', using {} ms",
                    name, UNKNOWN_PLACEHOLDER_MS
                );
                UNKNOWN_PLACEHOLDER_MS
            }),
        }
    }

    /// Issue the pending pump run, wait it out, then wait the deferred drain.
    fn flush_pump(&mut self) -> Result<(), ExecutionError> {
        let Some(pending) = self.state.pending.take() else {
            return Ok(());
        };
        let drain_ms = std::mem::take(&mut self.state.pending_drain_ms);
        let duration = pending.duration_ms();

        if duration > 0 {
            info!(
                "Pump {}: {} cl for {} ms (drain {} ms)",
                pending.pump, pending.total_cl, duration, drain_ms
            );
            self.submit(DeviceRequest::Pump {
                pump: pending.pump,
                duration,
            })?;
            self.pause(duration);
            self.pause(drain_ms);
        }

        if matches!(self.state.phase, RunPhase::Draining { .. }) {
            self.state.transition(RunPhase::Running)?;
        }
        Ok(())
    }

    fn pause(&self, ms: u64) {
        if ms > 0 {
            self.sleeper.sleep(Duration::from_millis(ms));
        }
    }

    fn submit(&mut self, request: DeviceRequest) -> Result<Option<TransportResponse>, ExecutionError> {
        self.report.requests_sent += 1;
        let result = self
            .transport
            .submit(&request, self.options.actuation_timeout)
            .and_then(TransportResponse::ensure_success);

        match result {
            Ok(response) => {
                debug!("{} acknowledged: {}", request, response.message);
                Ok(Some(response))
            }
            Err(source) => match self.options.failure_policy {
                TransportFailurePolicy::Abort => Err(ExecutionError::Transport { request, source }),
                TransportFailurePolicy::Continue => {
                    warn!("{} failed, continuing: {}", request, source);
                    self.report.failed_requests += 1;
                    Ok(None)
                }
            },
        }
    }

    fn publish(&self, progress: u8) {
        if let Some(publisher) = &self.progress {
            publisher.publish(progress);
        }
    }
}
