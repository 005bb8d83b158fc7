//! Run controller.
//!
//! `Dispenser` is the surface the outside world talks to: it validates a
//! recipe, claims the single run slot, and hands the commands to a worker
//! thread. The caller gets control back as soon as the worker is spawned and
//! polls `current_progress()` from then on.
//!
//! The transport is shared between the run worker and manual commands; its
//! internal lock keeps their requests from interleaving on the wire.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config_store::Config;
use crate::executor::{
    ExecutionError, Executor, ExecutorOptions, RunReport, Sleeper, ThreadSleeper,
};
use crate::progress::{ProgressPublisher, RunActive, RunNotes, RunOutcome, RunStatus};
use crate::recipe::authoring::{substitute_amounts, Ingredient};
use crate::recipe::command::Command;
use crate::recipe::parser::{parse, ParseError};
use crate::recipe::store::RecipeStore;
use crate::recipe::validator::{validate, ValidationError};
use crate::transport::{
    DeviceRequest, DeviceTransport, TransportError, TransportResponse, HEALTH_CHECK_TIMEOUT,
};

/// Reasons a run is not started.
#[derive(Error, Debug)]
pub enum DispenserError {
    #[error("Recipe '{active}' is already running")]
    RunInProgress { active: String },

    #[error("Controller is offline ({transport})")]
    DeviceOffline { transport: String },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to spawn run worker: {0}")]
    Spawn(#[source] io::Error),
}

impl From<RunActive> for DispenserError {
    fn from(e: RunActive) -> Self {
        Self::RunInProgress { active: e.active }
    }
}

/// Finishes the run as failed if the worker unwinds before completing it.
struct RunGuard {
    publisher: Arc<ProgressPublisher>,
    completed: bool,
}

impl RunGuard {
    fn new(publisher: Arc<ProgressPublisher>) -> Self {
        Self {
            publisher,
            completed: false,
        }
    }

    fn complete(mut self, outcome: RunOutcome) {
        self.publisher.finish(outcome);
        self.completed = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.completed {
            error!("Run worker exited without finishing the run");
            self.publisher.finish(RunOutcome::Failed);
        }
    }
}

/// Handle to a started run.
#[derive(Debug)]
pub struct RunHandle {
    recipe: String,
    worker: JoinHandle<Result<RunReport, ExecutionError>>,
}

impl RunHandle {
    pub fn recipe(&self) -> &str {
        &self.recipe
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the worker is done.
    pub fn wait(self) -> Result<RunReport, ExecutionError> {
        self.worker.join().unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ExecutionError::WorkerPanicked(message))
        })
    }
}

/// Drives the rig: one run at a time, plus manual commands.
pub struct Dispenser {
    transport: Arc<dyn DeviceTransport>,
    sleeper: Arc<dyn Sleeper>,
    progress: Arc<ProgressPublisher>,
    options: ExecutorOptions,
    health_timeout: Duration,
}

impl Dispenser {
    pub fn new(transport: Arc<dyn DeviceTransport>) -> Self {
        Self {
            transport,
            sleeper: Arc::new(ThreadSleeper),
            progress: Arc::new(ProgressPublisher::new()),
            options: ExecutorOptions::default(),
            health_timeout: HEALTH_CHECK_TIMEOUT,
        }
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ExecutorOptions {
        self.options
    }

    pub fn transport(&self) -> &Arc<dyn DeviceTransport> {
        &self.transport
    }

    pub fn progress_publisher(&self) -> Arc<ProgressPublisher> {
        Arc::clone(&self.progress)
    }

    /// Validate `commands` against `config` and start them on a worker.
    ///
    /// `config` is the snapshot the run uses from start to finish.
    ///
    /// # Errors
    ///
    /// Nothing is started if the recipe is invalid, the controller does not
    /// answer the health check, or another run is active.
    pub fn start_run(
        &self,
        recipe: &str,
        commands: Vec<Command>,
        config: Config,
    ) -> Result<RunHandle, DispenserError> {
        validate(&commands, &config)?;
        // Do not probe the controller while it is busy with another run.
        if let Some(active) = self.progress.snapshot().active_recipe {
            return Err(DispenserError::RunInProgress { active });
        }
        if !self.device_online() {
            let transport = self.transport.describe();
            warn!("Not starting '{}': controller offline ({})", recipe, transport);
            return Err(DispenserError::DeviceOffline { transport });
        }
        self.progress.try_begin(recipe)?;

        let transport = Arc::clone(&self.transport);
        let sleeper = Arc::clone(&self.sleeper);
        let publisher = Arc::clone(&self.progress);
        let options = self.options;

        let spawned = thread::Builder::new()
            .name("bartender-run".to_string())
            .spawn(move || {
                let guard = RunGuard::new(Arc::clone(&publisher));
                let mut executor =
                    Executor::new(transport, sleeper, config, options).with_progress(publisher);
                let result = executor.run(&commands);
                let outcome = if result.is_ok() {
                    RunOutcome::Success
                } else {
                    RunOutcome::Failed
                };
                guard.complete(outcome);
                result
            });

        match spawned {
            Ok(worker) => {
                info!("Started '{}' on {}", recipe, self.transport.describe());
                Ok(RunHandle {
                    recipe: recipe.to_string(),
                    worker,
                })
            }
            Err(e) => {
                self.progress.finish(RunOutcome::Failed);
                Err(DispenserError::Spawn(e))
            }
        }
    }

    /// Parse recipe text and start it.
    pub fn start_recipe_text(
        &self,
        recipe: &str,
        text: &str,
        config: Config,
    ) -> Result<RunHandle, DispenserError> {
        let commands = parse(text)?;
        self.start_run(recipe, commands, config)
    }

    /// Load a stored recipe, apply amount overrides and start it.
    pub fn start_stored(
        &self,
        store: &RecipeStore,
        recipe: &str,
        overrides: &[Ingredient],
        config: Config,
    ) -> crate::Result<RunHandle> {
        let file_name = RecipeStore::file_name(recipe)?;
        let mut commands = parse(&store.load(&file_name)?)?;
        if !overrides.is_empty() {
            info!("Running '{}' with custom amounts", file_name);
            commands = substitute_amounts(&commands, overrides)?;
        }
        Ok(self.start_run(&file_name, commands, config)?)
    }

    pub fn current_progress(&self) -> RunStatus {
        self.progress.snapshot()
    }

    pub fn last_notes(&self) -> RunNotes {
        self.progress.last_notes()
    }

    /// Probe the controller.
    pub fn device_online(&self) -> bool {
        self.transport.probe(self.health_timeout)
    }

    /// Send one request outside of a run.
    pub fn send_manual(&self, request: DeviceRequest) -> Result<TransportResponse, TransportError> {
        info!("Manual command {} via {}", request, self.transport.describe());
        self.transport
            .submit(&request, self.options.actuation_timeout)
            .and_then(TransportResponse::ensure_success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DryRunTransport;

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _duration: Duration) {}
    }

    struct PanickingSleeper;

    impl Sleeper for PanickingSleeper {
        fn sleep(&self, _duration: Duration) {
            panic!("sleeper exploded");
        }
    }

    /// Controller that never answers.
    struct Unplugged;

    impl DeviceTransport for Unplugged {
        fn submit(
            &self,
            _request: &DeviceRequest,
            _timeout: Duration,
        ) -> Result<TransportResponse, TransportError> {
            Err(TransportError::Unreachable("no route to host".to_string()))
        }

        fn describe(&self) -> String {
            "unplugged".to_string()
        }
    }

    fn dispenser() -> Dispenser {
        Dispenser::new(Arc::new(DryRunTransport::new())).with_sleeper(Arc::new(NoSleep))
    }

    #[test]
    fn test_invalid_recipe_never_starts() {
        let dispenser = dispenser();
        let err = dispenser
            .start_recipe_text("bad", "start\nmove syrupX\ndone\n", Config::new())
            .unwrap_err();
        assert!(matches!(err, DispenserError::Validation(_)));
        assert_eq!(dispenser.current_progress(), RunStatus::default());
    }

    #[test]
    fn test_parse_error_never_starts() {
        let dispenser = dispenser();
        let err = dispenser
            .start_recipe_text("bad", "start\nshake\n", Config::new())
            .unwrap_err();
        assert!(matches!(err, DispenserError::Parse(ref e) if e.line == 2));
        assert!(!dispenser.current_progress().running);
    }

    #[test]
    fn test_worker_panic_finishes_run_as_failed() {
        let dispenser = Dispenser::new(Arc::new(DryRunTransport::new()))
            .with_sleeper(Arc::new(PanickingSleeper));
        let handle = dispenser
            .start_recipe_text("boom", "start\nnote rim the glass\nwait 100\ndone\n", Config::new())
            .unwrap();
        let err = handle.wait().unwrap_err();
        assert!(matches!(err, ExecutionError::WorkerPanicked(ref m) if m.contains("exploded")));

        let status = dispenser.current_progress();
        assert!(!status.running);
        assert_eq!(status.progress, 100);
        assert_eq!(
            dispenser.progress_publisher().last_outcome(),
            Some(RunOutcome::Failed)
        );

        let notes = dispenser.last_notes();
        assert_eq!(notes.recipe_name.as_deref(), Some("boom"));
        assert_eq!(notes.notes, vec!["rim the glass"]);
    }

    #[test]
    fn test_offline_controller_never_starts() {
        let dispenser = Dispenser::new(Arc::new(Unplugged)).with_sleeper(Arc::new(NoSleep));
        let err = dispenser
            .start_recipe_text("neat", "start\nwait 100\ndone\n", Config::new())
            .unwrap_err();
        assert!(matches!(err, DispenserError::DeviceOffline { ref transport } if transport == "unplugged"));
        assert_eq!(dispenser.current_progress(), RunStatus::default());
        assert_eq!(dispenser.progress_publisher().last_outcome(), None);
    }

    #[test]
    fn test_send_manual_and_health() {
        let dispenser = dispenser();
        assert!(dispenser.device_online());
        let response = dispenser
            .send_manual(DeviceRequest::Move { position: 120 })
            .unwrap();
        assert!(response.is_success());
    }
}
