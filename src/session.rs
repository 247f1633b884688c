use std::collections::BTreeMap;
use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::device::connection::{ConnectionConfig, ConnectionManager};
use crate::device::types::{ConnectionState, Device, DeviceEvent, DeviceId, PlatformCommand, PlatformEvent};
use crate::error::DeviceError;
use crate::reading::classifier::{classify_zone, ClassifierMode};
use crate::reading::decoder::decode_notification;
use crate::reading::types::{ClassifiedZone, SensorReading, Zone};

/// Everything a consumer needs to render the session, published as one value.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub devices: Vec<Device>,
    pub active_device: Option<Device>,
    pub reading: Option<SensorReading>,
    /// zones that have been classified at least once, in `Zone::ALL` order
    pub zones: Vec<ClassifiedZone>,
    pub fall: bool,
    pub last_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        SessionSnapshot {
            state: ConnectionState::Idle,
            devices: Vec::new(),
            active_device: None,
            reading: None,
            zones: Vec::new(),
            fall: false,
            last_error: None,
        }
    }
}

/// Requests a caller can make of a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionControl {
    Refresh,
    StopScan,
    Connect(DeviceId),
    Disconnect,
    Send(String),
    SetFall(bool),
}

/// Chains the connection manager, decoder and classifier, and is the single
/// place where consumer visible state changes.
#[derive(Debug)]
pub struct Session {
    manager: ConnectionManager,
    mode: ClassifierMode,
    reading: Option<SensorReading>,
    zones: BTreeMap<Zone, ClassifiedZone>,
    fall: bool,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl Session {
    pub fn new(config: ConnectionConfig, mode: ClassifierMode) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());

        Session {
            manager: ConnectionManager::new(config),
            mode,
            reading: None,
            zones: BTreeMap::new(),
            fall: false,
            snapshot,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn reading(&self) -> Option<&SensorReading> {
        self.reading.as_ref()
    }

    pub fn zone(&self, zone: Zone) -> Option<&ClassifiedZone> {
        self.zones.get(&zone)
    }

    pub fn fall(&self) -> bool {
        self.fall
    }

    pub fn poll_command(&mut self) -> Option<PlatformCommand> {
        self.manager.poll_command()
    }

    pub fn handle_event(&mut self, event: PlatformEvent) {
        self.manager.handle_event(event);
        self.update();
    }

    /// Applies a caller request. Failures are also published as the snapshot's `last_error`.
    pub fn control(&mut self, control: SessionControl) -> Result<(), DeviceError> {
        let result = match control {
            SessionControl::Refresh => self.manager.refresh(),
            SessionControl::StopScan => {
                self.manager.stop_scan();
                Ok(())
            },
            SessionControl::Connect(id) => {
                let result = self.manager.connect(&id);
                if result.is_ok() {
                    self.reading = None;
                    self.zones.clear();
                }
                result
            },
            SessionControl::Disconnect => {
                self.manager.disconnect();
                Ok(())
            },
            SessionControl::Send(text) => {
                self.manager.send(&text);
                Ok(())
            },
            SessionControl::SetFall(fall) => {
                self.set_fall(fall);
                Ok(())
            },
        };

        if let Err(err) = &result {
            warn!("Session request failed: {}", err);
            self.manager.report(err);
        }
        self.update();
        result
    }

    fn set_fall(&mut self, fall: bool) {
        if fall && !self.fall {
            error!("Fall detected; urgent action required");
        } else if !fall && self.fall {
            info!("Fall flag cleared");
        }
        self.fall = fall;
    }

    fn on_notification(&mut self, value: &[u8]) {
        let decoded = match decode_notification(value) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!("Dropping notification: {}", err);
                return;
            },
        };

        for zone in Zone::ALL {
            match classify_zone(&decoded.reading, zone, self.mode) {
                Ok(classified) => {
                    self.zones.insert(zone, classified);
                },
                Err(err) => warn!("Keeping previous {} classification: {}", zone, err),
            }
        }

        if let Some(fall) = decoded.fall {
            self.set_fall(fall);
        }
        self.reading = Some(decoded.reading);
    }

    fn update(&mut self) {
        while let Some(event) = self.manager.poll_event() {
            match event {
                DeviceEvent::Notification(value) => self.on_notification(&value),
                DeviceEvent::StateChange(state) => debug!("Session state is now {}", state),
                DeviceEvent::Failure(message) => debug!("Session failure: {}", message),
                DeviceEvent::DevicesChanged => {},
            }
        }

        let next = SessionSnapshot {
            state: self.manager.state(),
            devices: self.manager.scanner().devices().cloned().collect(),
            active_device: self.manager.active_device().cloned(),
            reading: self.reading.clone(),
            zones: self.zones.values().cloned().collect(),
            fall: self.fall,
            last_error: self.manager.last_error().map(str::to_string),
        };

        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
