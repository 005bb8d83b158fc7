//! Serial transport: newline-delimited JSON over a USB serial adapter.
//!
//! Each request is written as one JSON object followed by `\n`. The
//! controller interleaves its own log output with answers, so the reader
//! skips lines carrying the debug marker (and anything that is not JSON)
//! until a JSON line arrives or the response window closes.
//!
//! Answers carry no request id. Whatever is still on the line when a new
//! request goes out (a late answer to a timed-out request, trailing log
//! output) is discarded first, so an answer is only matched to the request
//! written just before it.
//!
//! The adapter is found by enumerating serial ports and taking the first one
//! whose name contains the configured pattern (e.g. `ttyUSB`).

use std::io::{self, Read, Write};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{DeviceRequest, DeviceTransport, TransportError, TransportResponse};

/// Default window for a response to arrive.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-read timeout on the port; the response window is checked between reads.
const READ_POLL: Duration = Duration::from_millis(100);

/// Pause after a zero-byte read.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Byte stream to the controller.
pub trait SerialLink: Read + Write + Send {
    /// Discard bytes received but not read yet.
    fn clear_input(&mut self) -> io::Result<()>;
}

impl SerialLink for Box<dyn serialport::SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// Serial port selection and framing options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialOptions {
    /// Substring identifying the adapter's port name
    pub port_pattern: String,
    pub baud_rate: u32,
    pub response_timeout: Duration,
    /// Lines containing this marker are controller diagnostics, not answers
    pub debug_marker: String,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            port_pattern: "ttyUSB".to_string(),
            baud_rate: 115_200,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            debug_marker: "[DEBUG]".to_string(),
        }
    }
}

struct Connection {
    port_name: String,
    link: Box<dyn SerialLink>,
    /// Bytes read past the last answer
    pending: Vec<u8>,
}

impl Connection {
    fn new(port_name: String, link: Box<dyn SerialLink>) -> Self {
        Self {
            port_name,
            link,
            pending: Vec::new(),
        }
    }

    /// Drop everything received before the next request.
    fn discard_stale(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            debug!(
                "Discarding {} unread bytes from {}",
                self.pending.len(),
                self.port_name
            );
            self.pending.clear();
        }
        self.link.clear_input()
    }
}

/// Controller attached over a serial line.
pub struct SerialTransport {
    options: SerialOptions,
    connection: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("options", &self.options)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl SerialTransport {
    /// Create a transport without opening a port.
    pub fn new(options: SerialOptions) -> Self {
        Self {
            options,
            connection: Mutex::new(None),
        }
    }

    /// Create a transport and try to open the adapter. A missing adapter is
    /// logged; the transport then reports "not connected" until
    /// `reinitialize` succeeds.
    pub fn connect(options: SerialOptions) -> Self {
        let transport = Self::new(options);
        if let Err(e) = transport.reinitialize() {
            warn!("Serial controller not available: {}", e);
        }
        transport
    }

    /// Create a transport over an already open link.
    pub fn with_link(
        port_name: impl Into<String>,
        link: Box<dyn SerialLink>,
        options: SerialOptions,
    ) -> Self {
        Self {
            options,
            connection: Mutex::new(Some(Connection::new(port_name.into(), link))),
        }
    }

    pub fn options(&self) -> &SerialOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// Name of the open port, if any.
    pub fn port_name(&self) -> Option<String> {
        self.lock().as_ref().map(|c| c.port_name.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enumerate ports and open the first matching adapter.
    pub fn reinitialize(&self) -> Result<String, TransportError> {
        let ports = serialport::available_ports()
            .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        let names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
        debug!("Available serial ports: {:?}", names);

        let mut connection = self.lock();
        let Some(port_name) = select_port(&names, &self.options.port_pattern) else {
            *connection = None;
            return Err(TransportError::NotConnected);
        };

        let port = serialport::new(port_name.as_str(), self.options.baud_rate)
            .timeout(READ_POLL)
            .open()
            .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

        info!(
            "Opened serial controller on {} at {} baud",
            port_name, self.options.baud_rate
        );
        *connection = Some(Connection::new(port_name.clone(), Box::new(port)));
        Ok(port_name.clone())
    }
}

/// First port whose name contains `pattern`.
pub fn select_port<'a>(names: &'a [String], pattern: &str) -> Option<&'a String> {
    names.iter().find(|name| name.contains(pattern))
}

/// Read lines from `link` until one is JSON or `window` elapses.
///
/// `pending` holds bytes already read but not yet consumed; bytes after the
/// answer line are left in it.
pub fn read_response(
    link: &mut dyn SerialLink,
    pending: &mut Vec<u8>,
    window: Duration,
    debug_marker: &str,
) -> Result<TransportResponse, TransportError> {
    let deadline = Instant::now() + window;
    let mut buf = [0u8; 256];

    loop {
        while let Some(end) = pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !debug_marker.is_empty() && line.contains(debug_marker) {
                debug!("controller: {}", line);
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(line) {
                Ok(value) => {
                    return serde_json::from_value(value)
                        .map_err(|e| TransportError::Malformed(format!("{}: {}", e, line)))
                }
                Err(_) => debug!("Skipping non-JSON line from controller: {}", line),
            }
        }

        if Instant::now() >= deadline {
            return Err(TransportError::Timeout(window));
        }

        match link.read(&mut buf) {
            Ok(0) => thread::sleep(IDLE_POLL),
            Ok(n) => pending.extend_from_slice(&buf[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(TransportError::Io(e)),
        }
    }
}

impl DeviceTransport for SerialTransport {
    fn submit(
        &self,
        request: &DeviceRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let json = request.to_json()?;
        let window = timeout.min(self.options.response_timeout);

        // Held across write and read: one outstanding request on the line.
        let mut guard = self.lock();
        let Some(connection) = guard.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        debug!("serial {} <- {}", connection.port_name, json);
        let result = connection
            .discard_stale()
            .and_then(|_| connection.link.write_all(json.as_bytes()))
            .and_then(|_| connection.link.write_all(b"\n"))
            .and_then(|_| connection.link.flush())
            .map_err(TransportError::Io)
            .and_then(|_| {
                read_response(
                    connection.link.as_mut(),
                    &mut connection.pending,
                    window,
                    &self.options.debug_marker,
                )
            });

        match &result {
            Err(TransportError::Io(e)) => {
                warn!(
                    "Serial link {} failed ({}), dropping connection",
                    connection.port_name, e
                );
                *guard = None;
            }
            Err(TransportError::Timeout(_)) => {
                warn!("No answer to {} from {} within {:?}", request, connection.port_name, window);
            }
            _ => {}
        }
        result
    }

    fn describe(&self) -> String {
        match self.port_name() {
            Some(name) => format!("serial {}", name),
            None => format!("serial (no adapter matching '{}')", self.options.port_pattern),
        }
    }
}
