use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::connection::ConnectionConfig;
use crate::device::constants::{make_insole_service_uuid, DEFAULT_DEVICE_NAME_MARKER};
use crate::reading::classifier::ClassifierMode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub device_name_marker: String,
    pub service_uuid: Uuid,
    /// unset: use the first notify capable characteristic of the service
    pub characteristic_uuid: Option<Uuid>,
    pub classifier: ClassifierMode,
}

impl Config {
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            name_marker: self.device_name_marker.clone(),
            service_uuid: self.service_uuid,
            characteristic_uuid: self.characteristic_uuid,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device_name_marker: DEFAULT_DEVICE_NAME_MARKER.to_string(),
            service_uuid: make_insole_service_uuid(),
            characteristic_uuid: None,
            classifier: ClassifierMode::Gradient,
        }
    }
}
