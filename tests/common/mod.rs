//! Hardware doubles shared by the integration tests.
//!
//! Requests and sleeps go into one ordered event log, so tests can assert the
//! exact interleaving the rig would see.

#![allow(dead_code)]

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use bartender::{
    Config, DeviceRequest, DeviceTransport, ProgressPublisher, ResponseStatus, Sleeper,
    TransportError, TransportResponse,
};

/// Something the rig observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Request(DeviceRequest),
    Sleep(u64),
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<DeviceRequest> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Request(r) => Some(r),
                Event::Sleep(_) => None,
            })
            .collect()
    }

    pub fn sleeps(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Sleep(ms) => Some(ms),
                Event::Request(_) => None,
            })
            .collect()
    }
}

/// Transport that records every request and answers success, except for
/// requests matched by `fail_when`. Health checks are answered from `online`
/// and stay out of the log.
pub struct RecordingTransport {
    log: EventLog,
    fail_when: Option<fn(&DeviceRequest) -> bool>,
    online: bool,
}

impl RecordingTransport {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_when: None,
            online: true,
        }
    }

    pub fn failing(log: EventLog, fail_when: fn(&DeviceRequest) -> bool) -> Self {
        Self {
            fail_when: Some(fail_when),
            ..Self::new(log)
        }
    }

    /// A controller that never answers its health check.
    pub fn offline(log: EventLog) -> Self {
        Self {
            online: false,
            ..Self::new(log)
        }
    }
}

impl DeviceTransport for RecordingTransport {
    fn submit(
        &self,
        request: &DeviceRequest,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.log.push(Event::Request(*request));
        if self.fail_when.is_some_and(|fail| fail(request)) {
            return Err(TransportError::Unreachable("cable unplugged".to_string()));
        }
        Ok(match request {
            DeviceRequest::Status => TransportResponse {
                status: ResponseStatus::Online,
                message: String::new(),
            },
            _ => TransportResponse::success("ok"),
        })
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }

    fn probe(&self, _timeout: Duration) -> bool {
        self.online
    }
}

/// Sleeper that records the requested duration and returns immediately.
pub struct RecordingSleeper {
    log: EventLog,
}

impl RecordingSleeper {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.log.push(Event::Sleep(duration.as_millis() as u64));
    }
}

/// One-shot latch.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.changed.wait(open).unwrap();
        }
    }
}

/// Sleeper that blocks every sleep until the gate opens, signalling
/// `entered` the first time a sleep is reached.
pub struct GatedSleeper {
    pub entered: Arc<Gate>,
    pub release: Arc<Gate>,
}

impl GatedSleeper {
    pub fn new() -> Self {
        Self {
            entered: Gate::new(),
            release: Gate::new(),
        }
    }
}

impl Sleeper for GatedSleeper {
    fn sleep(&self, _duration: Duration) {
        self.entered.open();
        self.release.wait();
    }
}

/// Sleeper that samples the published progress at every sleep.
pub struct ProgressProbe {
    publisher: Arc<ProgressPublisher>,
    pub samples: Mutex<Vec<u8>>,
}

impl ProgressProbe {
    pub fn new(publisher: Arc<ProgressPublisher>) -> Self {
        Self {
            publisher,
            samples: Mutex::new(Vec::new()),
        }
    }
}

impl Sleeper for ProgressProbe {
    fn sleep(&self, _duration: Duration) {
        let progress = self.publisher.snapshot().progress;
        self.samples.lock().unwrap().push(progress);
    }
}

/// Rig used across tests: vodka on pump 2 at 300 mm, rum on pump 1 with a
/// faster pump, gin at a fixed position for servo pours.
pub fn rig_config() -> Config {
    let mut config = Config::new();
    config.set_entry("pump2", "vodka");
    config.set_entry("pump2_time", 1000);
    config.set_entry("pump2_position", 300);
    config.set_entry("pump1", "rum");
    config.set_entry("pump1_time", 800);
    config.set_entry("gin", 120);
    config.set_entry("pour_time", 2000);
    config.set_entry("move_wait", 500);
    config
}

pub fn pump(slot: u8) -> bartender::PumpId {
    bartender::PumpId::new(slot).unwrap()
}
