//! Transport that logs requests instead of sending them.

use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

use super::{DeviceRequest, DeviceTransport, ResponseStatus, TransportError, TransportResponse};

/// Accepts every request and answers success; status probes answer online.
#[derive(Debug, Default)]
pub struct DryRunTransport {
    wire: Mutex<()>,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceTransport for DryRunTransport {
    fn submit(
        &self,
        request: &DeviceRequest,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let _wire = self.wire.lock().unwrap_or_else(|e| e.into_inner());
        let json = request.to_json()?;
        info!("[DRY RUN] {}", json);
        Ok(match request {
            DeviceRequest::Status => TransportResponse {
                status: ResponseStatus::Online,
                message: String::new(),
            },
            _ => TransportResponse::success(format!("dry run: {}", request)),
        })
    }

    fn describe(&self) -> String {
        "dry-run".to_string()
    }
}
