use std::io;
use std::num::ParseIntError;
use std::str::Utf8Error;
use thiserror::Error;
use futures::channel::mpsc::SendError;

use crate::device::types::{ConnectionState, DeviceId};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start the async runtime: {source}")]
    Runtime { #[from] source: io::Error },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Device session failed: {source}")]
    DeviceError { #[from] source: DeviceError },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("The bluetooth adapter is powered off or access was denied")]
    AdapterUnavailable,

    #[error("Failed to connect to the sensor: {reason}")]
    ConnectionFailure { reason: String },

    #[error("Failed to discover services or characteristics: {reason}")]
    DiscoveryFailure { reason: String },

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Failed to write to the data characteristic: {reason}")]
    WriteFailure { reason: String },

    #[error("Device {id} is not in the discovery list")]
    UnknownDevice { id: DeviceId },

    #[error("Can not {operation} while {state}")]
    InvalidState { operation: &'static str, state: ConnectionState },

    #[error("The device session has stopped: {source}")]
    SessionClosed { #[from] source: SendError },
}

/// Failure to turn a notification payload into a [`crate::reading::types::SensorReading`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Notification is not valid utf-8: {source}")]
    NotUtf8 { #[from] source: Utf8Error },

    #[error("Notification is not valid JSON: {source}")]
    NotJson { source: serde_json::Error },

    #[error("Notification has a missing or invalid field: {source}")]
    InvalidField { source: serde_json::Error },
}

impl From<serde_json::Error> for DecodeError {
    fn from(source: serde_json::Error) -> Self {
        if source.is_data() {
            DecodeError::InvalidField { source }
        } else {
            DecodeError::NotJson { source }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Magnitude {value:?} is not an integer: {source}")]
pub struct ClassifyError {
    pub value: String,
    pub source: ParseIntError,
}
