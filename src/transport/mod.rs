//! Device transport: request/response exchange with the rig's microcontroller.
//!
//! Every actuator instruction is a small JSON envelope:
//!
//! ```json
//! {"command": "move",  "position": 300}
//! {"command": "servo", "delay": 750}
//! {"command": "pump",  "pump": 2, "duration": 2000}
//! {"command": "status"}
//! ```
//!
//! and the controller answers `{"status": "success"|"error", "message": ...}`
//! (or `{"status": "online"}` for a status probe).
//!
//! Responses only acknowledge receipt. Durations are waited out by the
//! caller; the controller never reports that a pour has finished.
//!
//! # Exclusive access
//!
//! Implementations hold an internal lock for the whole request/response
//! exchange, so one transport shared between the run worker and manual
//! commands never has two requests on the wire.

pub mod dry_run;
pub mod http;
#[cfg(feature = "serial")]
pub mod serial;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config_store::PumpId;

pub use dry_run::DryRunTransport;
pub use http::HttpTransport;
#[cfg(feature = "serial")]
pub use serial::SerialTransport;

/// Timeout for status probes.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// One request to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum DeviceRequest {
    /// Move the platform to an absolute position in mm
    Move { position: i64 },
    /// Actuate the pour servo for `delay` ms
    Servo { delay: u64 },
    /// Run a pump for `duration` ms
    Pump { pump: PumpId, duration: u64 },
    /// Liveness probe
    Status,
}

impl DeviceRequest {
    /// Command name as sent on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Servo { .. } => "servo",
            Self::Pump { .. } => "pump",
            Self::Status => "status",
        }
    }

    /// Newline-free JSON encoding of the envelope.
    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

impl fmt::Display for DeviceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Move { position } => write!(f, "move{{{}}}", position),
            Self::Servo { delay } => write!(f, "servo{{{}}}", delay),
            Self::Pump { pump, duration } => write!(f, "pump{{{},{}}}", pump, duration),
            Self::Status => write!(f, "status"),
        }
    }
}

/// `status` field of a controller response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Online,
    #[serde(other)]
    Unknown,
}

/// Controller answer to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub message: String,
}

impl TransportResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ResponseStatus::Success | ResponseStatus::Online)
    }

    /// Turn an `error` status into a `TransportError::Device`.
    pub fn ensure_success(self) -> Result<Self, TransportError> {
        if self.status == ResponseStatus::Error {
            Err(TransportError::Device {
                message: self.message,
            })
        } else {
            Ok(self)
        }
    }
}

/// Errors raised while talking to the controller.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No link to the controller has been established
    #[error("Device is not connected")]
    NotConnected,

    /// No answer within the response window
    #[error("No response from device within {0:?}")]
    Timeout(Duration),

    /// Connection refused, DNS failure and similar
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    /// HTTP answer other than 200
    #[error("Device answered HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Response could not be decoded
    #[error("Malformed device response: {0}")]
    Malformed(String),

    /// Controller reported an error
    #[error("Device reported an error: {message}")]
    Device { message: String },

    #[error("Device IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability to exchange one request/response with the controller.
pub trait DeviceTransport: Send + Sync {
    /// Submit `request` and wait up to `timeout` for the answer.
    fn submit(
        &self,
        request: &DeviceRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;

    /// Short human-readable description used in logs.
    fn describe(&self) -> String;

    /// Probe the controller with the default health-check timeout.
    fn health_check(&self) -> bool {
        self.probe(HEALTH_CHECK_TIMEOUT)
    }

    /// Connected iff the controller answers `status: online` within `timeout`.
    fn probe(&self, timeout: Duration) -> bool {
        match self.submit(&DeviceRequest::Status, timeout) {
            Ok(response) => response.status == ResponseStatus::Online,
            Err(e) => {
                tracing::debug!("Health check on {} failed: {}", self.describe(), e);
                false
            }
        }
    }
}
