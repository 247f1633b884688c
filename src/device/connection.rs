use std::collections::VecDeque;
use btleplug::api::{CharPropFlags, Characteristic};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::device::constants::{make_insole_service_uuid, DEFAULT_DEVICE_NAME_MARKER};
use crate::device::scanner::DeviceScanner;
use crate::device::types::{AdapterState, ConnectionState, Device, DeviceEvent, DeviceId, PlatformCommand, PlatformEvent, SessionId};
use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub name_marker: String,
    pub service_uuid: Uuid,
    /// Restricts the data channel to this characteristic. Any notify capable
    /// characteristic is accepted when unset.
    pub characteristic_uuid: Option<Uuid>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            name_marker: DEFAULT_DEVICE_NAME_MARKER.to_string(),
            service_uuid: make_insole_service_uuid(),
            characteristic_uuid: None,
        }
    }
}

#[derive(Debug)]
struct Connection {
    session: SessionId,
    device: Device,
    // services that have not reported their characteristics yet
    pending_services: Vec<Uuid>,
    data_char: Option<Characteristic>,
}

/// Drives one sensor node from discovery to a subscribed data channel.
///
/// The manager performs no I/O. Platform callbacks are fed in through
/// [`ConnectionManager::handle_event`]; requests for the platform are queued and
/// must be drained with [`ConnectionManager::poll_command`]. Changes meant for
/// consumers are drained with [`ConnectionManager::poll_event`].
#[derive(Debug)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    scanner: DeviceScanner,
    state: ConnectionState,
    connection: Option<Connection>,
    next_session: u64,
    // session torn down locally whose link close has not been confirmed yet
    released_session: Option<SessionId>,
    last_error: Option<String>,
    commands: VecDeque<PlatformCommand>,
    events: VecDeque<DeviceEvent>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        let scanner = DeviceScanner::new(config.name_marker.clone());

        ConnectionManager {
            config,
            scanner,
            state: ConnectionState::Idle,
            connection: None,
            next_session: 1,
            released_session: None,
            last_error: None,
            commands: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn scanner(&self) -> &DeviceScanner {
        &self.scanner
    }

    pub fn active_device(&self) -> Option<&Device> {
        self.connection.as_ref().map(|connection| &connection.device)
    }

    pub fn data_channel(&self) -> Option<&Characteristic> {
        self.connection.as_ref().and_then(|connection| connection.data_char.as_ref())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn poll_command(&mut self) -> Option<PlatformCommand> {
        self.commands.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<DeviceEvent> {
        self.events.pop_front()
    }

    pub fn start_scan(&mut self) -> Result<(), DeviceError> {
        if self.connection.is_some() {
            return Err(DeviceError::InvalidState { operation: "scan", state: self.state });
        }

        let command = self.scanner.start_scan()?;
        self.commands.push_back(command);
        self.events.push_back(DeviceEvent::DevicesChanged);
        self.set_state(ConnectionState::Scanning);
        Ok(())
    }

    /// Clears the discovery list and restarts discovery.
    pub fn refresh(&mut self) -> Result<(), DeviceError> {
        self.start_scan()
    }

    pub fn stop_scan(&mut self) {
        if let Some(command) = self.scanner.stop_scan() {
            self.commands.push_back(command);
        }

        if self.state == ConnectionState::Scanning {
            self.set_state(ConnectionState::Idle);
        }
    }

    pub fn connect(&mut self, id: &DeviceId) -> Result<(), DeviceError> {
        let valid_state = matches!(self.state, ConnectionState::Idle | ConnectionState::Scanning);
        if self.connection.is_some() || !valid_state {
            return Err(DeviceError::InvalidState { operation: "connect", state: self.state });
        }

        let device = self.scanner.get(id)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownDevice { id: id.clone() })?;

        self.stop_scan();

        let session = SessionId(self.next_session);
        self.next_session += 1;

        info!("Connecting to {} {:?}...", device.id, device.name);
        self.commands.push_back(PlatformCommand::Connect { session, device: device.id.clone() });
        self.connection = Some(Connection {
            session,
            device,
            pending_services: Vec::new(),
            data_char: None,
        });
        self.released_session = None;
        self.last_error = None;
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    /// Releases the active device and data channel. Always ends in `Idle`;
    /// discovery restarts once the platform confirms that the link is closed.
    pub fn disconnect(&mut self) {
        if self.connection.is_some() {
            self.release();
        } else {
            self.stop_scan();
            self.set_state(ConnectionState::Idle);
        }
    }

    /// Queues `text` for the data channel. Returns false, without an error, if
    /// there is no subscribed data channel.
    pub fn send(&mut self, text: &str) -> bool {
        let connection = match &self.connection {
            Some(connection) if self.state == ConnectionState::Connected => connection,
            _ => {
                debug!("No data channel; dropping outbound {:?}", text);
                return false;
            },
        };

        let characteristic = match &connection.data_char {
            Some(characteristic) => characteristic.clone(),
            None => {
                debug!("No data channel; dropping outbound {:?}", text);
                return false;
            },
        };

        self.commands.push_back(PlatformCommand::Write {
            session: connection.session,
            characteristic,
            data: text.as_bytes().to_vec(),
        });
        true
    }

    /// Publishes a rejected request as the current error without touching the state.
    pub fn report(&mut self, err: &DeviceError) {
        self.last_error = Some(err.to_string());
        self.events.push_back(DeviceEvent::Failure(err.to_string()));
    }

    pub fn handle_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::AdapterStateChanged(state) => self.on_adapter_state(state),
            PlatformEvent::Discovered(device) => {
                if self.scanner.on_discovered(device) {
                    self.events.push_back(DeviceEvent::DevicesChanged);
                }
            },
            PlatformEvent::Connected { session } => {
                if self.expects(session, ConnectionState::Connecting, "connect") {
                    info!("Connected; Discovering services...");
                    self.set_state(ConnectionState::DiscoveringServices);
                    self.commands.push_back(PlatformCommand::DiscoverServices {
                        session,
                        services: vec![self.config.service_uuid],
                    });
                }
            },
            PlatformEvent::ConnectFailed { session, reason } => {
                if self.is_current(session) {
                    self.fail(DeviceError::ConnectionFailure { reason });
                }
            },
            PlatformEvent::ServicesDiscovered { session, services } => {
                if self.expects(session, ConnectionState::DiscoveringServices, "services") {
                    self.on_services(session, services);
                }
            },
            PlatformEvent::ServiceDiscoveryFailed { session, reason } => {
                if self.is_current(session) {
                    self.fail(DeviceError::DiscoveryFailure { reason });
                }
            },
            PlatformEvent::CharacteristicsDiscovered { session, service, characteristics } => {
                if self.expects(session, ConnectionState::DiscoveringCharacteristics, "characteristics") {
                    self.on_characteristics(session, service, characteristics);
                }
            },
            PlatformEvent::CharacteristicDiscoveryFailed { session, service, reason } => {
                if self.is_current(session) {
                    self.fail(DeviceError::DiscoveryFailure { reason: format!("service {}: {}", service, reason) });
                }
            },
            PlatformEvent::Subscribed { session } => {
                if self.expects(session, ConnectionState::Subscribing, "subscribe") {
                    info!("Peripheral ready");
                    self.set_state(ConnectionState::Connected);
                }
            },
            PlatformEvent::SubscribeFailed { session, reason } => {
                if self.is_current(session) {
                    self.fail(DeviceError::ConnectionFailure { reason: format!("subscribe failed: {}", reason) });
                }
            },
            PlatformEvent::Notification { session, value } => {
                if self.expects(session, ConnectionState::Connected, "notification") {
                    self.events.push_back(DeviceEvent::Notification(value));
                }
            },
            PlatformEvent::WriteCompleted { session, result } => {
                if !self.is_current(session) {
                    debug!("Ignoring write result of released session {:?}", session);
                } else if let Err(reason) = result {
                    let err = DeviceError::WriteFailure { reason };
                    warn!("{}", err);
                    self.last_error = Some(err.to_string());
                    self.events.push_back(DeviceEvent::Failure(err.to_string()));
                }
            },
            PlatformEvent::Disconnected { session } => self.on_disconnected(session),
        }
    }

    fn on_services(&mut self, session: SessionId, services: Vec<Uuid>) {
        if services.is_empty() {
            self.fail(DeviceError::DiscoveryFailure {
                reason: format!("service {} not found", self.config.service_uuid),
            });
            return;
        }

        self.set_state(ConnectionState::DiscoveringCharacteristics);

        for service in services {
            debug!("Discovering characteristics of service {}", service);
            if let Some(connection) = self.connection.as_mut() {
                connection.pending_services.push(service);
            }
            self.commands.push_back(PlatformCommand::DiscoverCharacteristics { session, service });
        }
    }

    fn on_characteristics(&mut self, session: SessionId, service: Uuid, characteristics: Vec<Characteristic>) {
        let filter = self.config.characteristic_uuid;
        let connection = match self.connection.as_mut() {
            Some(connection) => connection,
            None => return,
        };

        let Some(position) = connection.pending_services.iter().position(|s| *s == service) else {
            debug!("Ignoring characteristics of unrequested service {}", service);
            return;
        };
        connection.pending_services.remove(position);

        for characteristic in characteristics {
            if !characteristic.properties.contains(CharPropFlags::NOTIFY) {
                continue;
            }
            if filter.is_some_and(|uuid| uuid != characteristic.uuid) {
                continue;
            }

            match &connection.data_char {
                None => {
                    info!("Using data characteristic {:?} {:?}", service, characteristic.uuid);
                    connection.data_char = Some(characteristic);
                },
                Some(selected) => {
                    debug!("Ignoring notify characteristic {}; already using {}", characteristic.uuid, selected.uuid);
                },
            }
        }

        if !connection.pending_services.is_empty() {
            return;
        }

        match connection.data_char.clone() {
            Some(characteristic) => {
                info!("Subscribing to characteristic {:?} {:?}", characteristic.service_uuid, characteristic.uuid);
                self.set_state(ConnectionState::Subscribing);
                self.commands.push_back(PlatformCommand::Subscribe { session, characteristic });
            },
            None => self.fail(DeviceError::MissingCharacteristic),
        }
    }

    fn on_disconnected(&mut self, session: SessionId) {
        if self.is_current(session) {
            warn!("Connection lost");
            self.set_state(ConnectionState::Disconnecting);
            self.connection = None;
            self.set_state(ConnectionState::Idle);
            self.rescan();
        } else if self.released_session == Some(session) {
            self.released_session = None;
            if self.state == ConnectionState::Idle {
                self.rescan();
            }
        } else {
            debug!("Ignoring disconnect of released session {:?}", session);
        }
    }

    fn on_adapter_state(&mut self, state: AdapterState) {
        if self.connection.is_some() {
            // the link does not survive an adapter power cycle
            self.release();
            self.released_session = None;
        }

        if let Some(command) = self.scanner.on_adapter_state(state) {
            self.commands.push_back(command);
        }
        self.events.push_back(DeviceEvent::DevicesChanged);

        let state = if self.scanner.is_scanning() { ConnectionState::Scanning } else { ConnectionState::Idle };
        self.set_state(state);
    }

    fn rescan(&mut self) {
        match self.start_scan() {
            Ok(_) => {},
            Err(err) => debug!("Not rescanning: {}", err),
        }
    }

    // Drops the connection record and asks the platform to close the link.
    fn release(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.set_state(ConnectionState::Disconnecting);
            info!("Disconnecting from {}", connection.device.id);
            self.commands.push_back(PlatformCommand::CancelConnection { session: connection.session });
            self.released_session = Some(connection.session);
        }
        self.set_state(ConnectionState::Idle);
    }

    fn fail(&mut self, err: DeviceError) {
        warn!("Connecting to peripheral failed: {}", err);
        self.last_error = Some(err.to_string());
        self.events.push_back(DeviceEvent::Failure(err.to_string()));
        self.set_state(ConnectionState::Error);
        self.release();
    }

    fn is_current(&self, session: SessionId) -> bool {
        self.connection.as_ref().is_some_and(|connection| connection.session == session)
    }

    fn expects(&self, session: SessionId, state: ConnectionState, what: &str) -> bool {
        if self.is_current(session) && self.state == state {
            return true;
        }

        debug!("Ignoring {} callback for session {:?} while {}", what, session, self.state);
        false
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }

        debug!("Connection state {} -> {}", self.state, state);
        self.state = state;
        self.events.push_back(DeviceEvent::StateChange(state));
    }
}
