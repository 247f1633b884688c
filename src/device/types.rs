use std::fmt;
use btleplug::api::Characteristic;
use uuid::Uuid;

/// Platform identifier of a peripheral. The BLE driver keeps the underlying
/// peripheral object keyed by this value, so it also acts as the opaque
/// connection handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        DeviceId(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// dBm, as reported by the platform
    pub rssi: i16,
    pub services: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Subscribing,
    Connected,
    Disconnecting,
    Error,
}

impl ConnectionState {
    /// True for the states in which a device occupies the connection slot.
    pub fn is_linked(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::DiscoveringServices
                | ConnectionState::DiscoveringCharacteristics
                | ConnectionState::Subscribing
                | ConnectionState::Connected
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::DiscoveringServices => "discovering services",
            ConnectionState::DiscoveringCharacteristics => "discovering characteristics",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Error => "in error",
        };

        write!(f, "{}", result)
    }
}

/// Tags every platform request and callback that belongs to one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Callbacks delivered by the bluetooth platform.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    AdapterStateChanged(AdapterState),
    Discovered(Device),
    Connected { session: SessionId },
    ConnectFailed { session: SessionId, reason: String },
    ServicesDiscovered { session: SessionId, services: Vec<Uuid> },
    ServiceDiscoveryFailed { session: SessionId, reason: String },
    CharacteristicsDiscovered { session: SessionId, service: Uuid, characteristics: Vec<Characteristic> },
    CharacteristicDiscoveryFailed { session: SessionId, service: Uuid, reason: String },
    Subscribed { session: SessionId },
    SubscribeFailed { session: SessionId, reason: String },
    Notification { session: SessionId, value: Vec<u8> },
    WriteCompleted { session: SessionId, result: Result<(), String> },
    Disconnected { session: SessionId },
}

/// Requests for the bluetooth platform. Every request completes with one or
/// more [`PlatformEvent`]s carrying the same session.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCommand {
    StartScan,
    StopScan,
    Connect { session: SessionId, device: DeviceId },
    DiscoverServices { session: SessionId, services: Vec<Uuid> },
    DiscoverCharacteristics { session: SessionId, service: Uuid },
    Subscribe { session: SessionId, characteristic: Characteristic },
    Write { session: SessionId, characteristic: Characteristic, data: Vec<u8> },
    CancelConnection { session: SessionId },
}

/// Higher level changes published by the connection manager.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    StateChange(ConnectionState),
    DevicesChanged,
    Notification(Vec<u8>),
    Failure(String),
}
