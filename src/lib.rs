//! Bartender Library
//!
//! Recipe execution engine for a pump and servo beverage-dispensing rig:
//! the recipe language, the pump-aggregating executor, the device
//! transports (HTTP, serial, dry-run), the calibration config store and the
//! single-run controller.

pub mod cli;
pub mod config_store;
pub mod dispenser;
pub mod error;
pub mod executor;
pub mod progress;
pub mod recipe;
pub mod settings;
pub mod transport;

// Re-export main types for convenience
pub use config_store::{Config, ConfigStore, ConfigValue, PumpId, WaitPlaceholder};
pub use dispenser::{Dispenser, DispenserError, RunHandle};
pub use error::{BartenderError, Result};
pub use executor::{
    ExecutionError, ExecutionState, Executor, ExecutorOptions, RunPhase, RunReport, Sleeper,
    ThreadSleeper, TransportFailurePolicy,
};
pub use progress::{ProgressPublisher, RunNotes, RunOutcome, RunStatus};
pub use recipe::{
    parse, validate, validation_report, Command, Ingredient, ParseError, RecipeStore,
    ServoAmount, ValidationError, WaitValue,
};
pub use settings::{AppSettings, TransportKind};
pub use transport::{
    DeviceRequest, DeviceTransport, DryRunTransport, HttpTransport, ResponseStatus,
    TransportError, TransportResponse,
};
#[cfg(feature = "serial")]
pub use transport::SerialTransport;
