//! Application settings: which transport to use and where things live.
//!
//! Settings are an optional JSON file; every field has a default, so an empty
//! object (or no file at all) is a working configuration. Command-line flags
//! are applied on top by the binary.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};
use tracing::info;

use crate::dispenser::Dispenser;
use crate::executor::{ExecutorOptions, TransportFailurePolicy};
use crate::transport::{DeviceTransport, DryRunTransport, HttpTransport};

/// Transport variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TransportKind {
    #[default]
    Http,
    Serial,
    DryRun,
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub transport: TransportKind,
    /// Controller base URL for the HTTP transport
    pub device_url: String,
    pub health_check_timeout_ms: u64,
    pub actuation_timeout_ms: u64,

    // Serial
    pub serial_port_pattern: String,
    pub serial_baud_rate: u32,
    pub serial_response_timeout_ms: u64,
    pub serial_debug_marker: String,

    // Storage
    pub recipe_dir: PathBuf,
    pub config_file: PathBuf,

    pub on_transport_error: TransportFailurePolicy,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::Http,
            device_url: "http://192.168.2.236:80".to_string(),
            health_check_timeout_ms: 2000,
            actuation_timeout_ms: 30_000,
            serial_port_pattern: "ttyUSB".to_string(),
            serial_baud_rate: 115_200,
            serial_response_timeout_ms: 5000,
            serial_debug_marker: "[DEBUG]".to_string(),
            recipe_dir: PathBuf::from("Rezepte"),
            config_file: PathBuf::from("config.json"),
            on_transport_error: TransportFailurePolicy::Abort,
        }
    }
}

impl AppSettings {
    /// Load settings from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {:?}", path.as_ref()))?;
        let settings: Self =
            serde_json::from_str(&content).context("Failed to parse settings JSON")?;
        Ok(settings)
    }

    /// Save settings to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize settings to JSON")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write settings to {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.transport == TransportKind::Http {
            let url = self.device_url.trim();
            if url.is_empty() {
                bail!("Device URL must be specified");
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("Device URL must start with http:// or https://");
            }
        }
        if self.transport == TransportKind::Serial {
            if self.serial_port_pattern.trim().is_empty() {
                bail!("Serial port pattern must be specified");
            }
            if self.serial_baud_rate == 0 {
                bail!("Serial baud rate must be greater than 0");
            }
            if self.serial_response_timeout_ms == 0 {
                bail!("Serial response timeout must be greater than 0");
            }
        }
        if self.health_check_timeout_ms == 0 || self.actuation_timeout_ms == 0 {
            bail!("Timeouts must be greater than 0");
        }
        if self.recipe_dir.as_os_str().is_empty() {
            bail!("Recipe directory must be specified");
        }
        if self.config_file.as_os_str().is_empty() {
            bail!("Config file must be specified");
        }
        Ok(())
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            actuation_timeout: Duration::from_millis(self.actuation_timeout_ms),
            failure_policy: self.on_transport_error,
        }
    }

    #[cfg(feature = "serial")]
    pub fn serial_options(&self) -> crate::transport::serial::SerialOptions {
        crate::transport::serial::SerialOptions {
            port_pattern: self.serial_port_pattern.clone(),
            baud_rate: self.serial_baud_rate,
            response_timeout: Duration::from_millis(self.serial_response_timeout_ms),
            debug_marker: self.serial_debug_marker.clone(),
        }
    }

    /// Build the configured transport.
    pub fn build_transport(&self) -> Result<Arc<dyn DeviceTransport>> {
        let transport: Arc<dyn DeviceTransport> = match self.transport {
            TransportKind::Http => Arc::new(
                HttpTransport::new(self.device_url.trim())
                    .context("Failed to set up HTTP transport")?,
            ),
            TransportKind::DryRun => Arc::new(DryRunTransport::new()),
            #[cfg(feature = "serial")]
            TransportKind::Serial => Arc::new(crate::transport::SerialTransport::connect(
                self.serial_options(),
            )),
            #[cfg(not(feature = "serial"))]
            TransportKind::Serial => bail!("Serial transport support was not compiled in"),
        };
        info!("Using transport: {}", transport.describe());
        Ok(transport)
    }

    /// Dispenser over the configured transport.
    pub fn build_dispenser(&self) -> Result<Dispenser> {
        let transport = self.build_transport()?;
        Ok(Dispenser::new(transport)
            .with_options(self.executor_options())
            .with_health_timeout(self.health_check_timeout()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = AppSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.on_transport_error, TransportFailurePolicy::Abort);
        assert_eq!(settings.recipe_dir, PathBuf::from("Rezepte"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().expect("Should create temp dir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"transport": "dry-run", "on_transport_error": "continue"}"#).unwrap();

        let settings = AppSettings::load_from_file(&path).unwrap();
        assert_eq!(settings.transport, TransportKind::DryRun);
        assert_eq!(settings.on_transport_error, TransportFailurePolicy::Continue);
        assert_eq!(settings.serial_baud_rate, 115_200);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().expect("Should create temp dir");
        let path = dir.path().join("settings.json");
        let settings = AppSettings {
            transport: TransportKind::Serial,
            serial_port_pattern: "ttyACM".to_string(),
            ..AppSettings::default()
        };
        settings.save_to_file(&path).unwrap();
        assert_eq!(AppSettings::load_from_file(&path).unwrap(), settings);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_url = AppSettings {
            device_url: "192.168.2.236".to_string(),
            ..AppSettings::default()
        };
        assert!(bad_url.validate().is_err());

        let no_baud = AppSettings {
            transport: TransportKind::Serial,
            serial_baud_rate: 0,
            ..AppSettings::default()
        };
        assert!(no_baud.validate().is_err());

        let zero_timeout = AppSettings {
            actuation_timeout_ms: 0,
            ..AppSettings::default()
        };
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_transport_kind_names() {
        assert_eq!("dry-run".parse::<TransportKind>().unwrap(), TransportKind::DryRun);
        assert_eq!(TransportKind::Serial.to_string(), "serial");
    }

    #[test]
    fn test_build_dry_run_dispenser() {
        let settings = AppSettings {
            transport: TransportKind::DryRun,
            ..AppSettings::default()
        };
        let dispenser = settings.build_dispenser().unwrap();
        assert!(dispenser.device_online());
        assert_eq!(dispenser.transport().describe(), "dry-run");
    }
}
