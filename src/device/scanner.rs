use indexmap::IndexMap;
use log::{debug, info};

use crate::device::types::{AdapterState, Device, DeviceId, PlatformCommand};
use crate::error::DeviceError;

/// Keeps the live list of sensor nodes seen during the current scan.
///
/// The list is keyed by device id and keeps discovery order. A device that is
/// discovered again keeps its first-seen entry, RSSI included.
#[derive(Debug)]
pub struct DeviceScanner {
    name_marker: String,
    adapter: Option<AdapterState>,
    scanning: bool,
    devices: IndexMap<DeviceId, Device>,
}

impl DeviceScanner {
    pub fn new(name_marker: impl Into<String>) -> Self {
        DeviceScanner {
            name_marker: name_marker.into(),
            adapter: None,
            scanning: false,
            devices: IndexMap::new(),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn is_adapter_ready(&self) -> bool {
        self.adapter == Some(AdapterState::PoweredOn)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Clears the previous discovery list and starts a new scan.
    pub fn start_scan(&mut self) -> Result<PlatformCommand, DeviceError> {
        if !self.is_adapter_ready() {
            return Err(DeviceError::AdapterUnavailable);
        }

        info!("Scanning for devices named *{}*...", self.name_marker);
        self.devices.clear();
        self.scanning = true;
        Ok(PlatformCommand::StartScan)
    }

    pub fn stop_scan(&mut self) -> Option<PlatformCommand> {
        if !self.scanning {
            return None;
        }

        info!("Stopped scanning, {} device(s) found", self.devices.len());
        self.scanning = false;
        Some(PlatformCommand::StopScan)
    }

    /// Returns true if the device was added to the list.
    pub fn on_discovered(&mut self, device: Device) -> bool {
        if !self.scanning {
            debug!("Ignoring discovery of {} while not scanning", device.id);
            return false;
        }

        if !device.name.contains(&self.name_marker) {
            return false;
        }

        if self.devices.contains_key(&device.id) {
            debug!("Ignoring repeated discovery of {} (rssi {})", device.id, device.rssi);
            return false;
        }

        info!("Found {} {:?} (rssi {} dBm)", device.id, device.name, device.rssi);
        self.devices.insert(device.id.clone(), device);
        true
    }

    /// Powered-on starts a scan. Anything else clears the list and leaves the scanner idle.
    pub fn on_adapter_state(&mut self, state: AdapterState) -> Option<PlatformCommand> {
        self.adapter = Some(state);

        match state {
            AdapterState::PoweredOn => self.start_scan().ok(),
            AdapterState::PoweredOff | AdapterState::Unauthorized => {
                info!("Adapter is {:?}; clearing {} device(s)", state, self.devices.len());
                self.devices.clear();
                self.scanning = false;
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, name: &str, rssi: i16) -> Device {
        Device { id: DeviceId::from(id), name: name.to_string(), rssi, services: vec![] }
    }

    fn scanning() -> DeviceScanner {
        let mut scanner = DeviceScanner::new("GaitInsole");
        assert_eq!(scanner.on_adapter_state(AdapterState::PoweredOn), Some(PlatformCommand::StartScan));
        scanner
    }

    #[test]
    fn scan_requires_powered_adapter() {
        let mut scanner = DeviceScanner::new("GaitInsole");
        assert!(matches!(scanner.start_scan(), Err(DeviceError::AdapterUnavailable)));

        scanner.on_adapter_state(AdapterState::Unauthorized);
        assert!(matches!(scanner.start_scan(), Err(DeviceError::AdapterUnavailable)));
        assert!(!scanner.is_scanning());
    }

    #[test]
    fn repeated_discovery_keeps_one_entry() {
        let mut scanner = scanning();

        assert!(scanner.on_discovered(device("a", "GaitInsole L", -60)));
        assert!(!scanner.on_discovered(device("a", "GaitInsole L", -42)));
        assert!(!scanner.on_discovered(device("a", "GaitInsole L", -80)));

        assert_eq!(scanner.len(), 1);
        // first seen entry is kept
        assert_eq!(scanner.get(&DeviceId::from("a")).map(|d| d.rssi), Some(-60));
    }

    #[test]
    fn list_keeps_discovery_order() {
        let mut scanner = scanning();
        scanner.on_discovered(device("b", "GaitInsole R", -50));
        scanner.on_discovered(device("a", "GaitInsole L", -60));
        scanner.on_discovered(device("b", "GaitInsole R", -30));

        let ids: Vec<&str> = scanner.devices().map(|d| d.id.0.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn name_must_contain_marker() {
        let mut scanner = scanning();
        assert!(!scanner.on_discovered(device("x", "Headphones", -40)));
        assert!(!scanner.on_discovered(device("y", "", -40)));
        assert!(scanner.on_discovered(device("z", "Left GaitInsole v2", -40)));
        assert_eq!(scanner.len(), 1);
    }

    #[test]
    fn rescan_clears_previous_list() {
        let mut scanner = scanning();
        scanner.on_discovered(device("a", "GaitInsole L", -60));
        scanner.on_discovered(device("b", "GaitInsole R", -60));

        assert_eq!(scanner.start_scan().ok(), Some(PlatformCommand::StartScan));
        assert!(scanner.is_empty());
        assert!(scanner.on_discovered(device("a", "GaitInsole L", -70)));
    }

    #[test]
    fn stop_scan_is_idempotent() {
        let mut scanner = scanning();
        assert_eq!(scanner.stop_scan(), Some(PlatformCommand::StopScan));
        assert_eq!(scanner.stop_scan(), None);
        assert_eq!(DeviceScanner::new("GaitInsole").stop_scan(), None);
    }

    #[test]
    fn discoveries_are_ignored_when_not_scanning() {
        let mut scanner = scanning();
        scanner.stop_scan();
        assert!(!scanner.on_discovered(device("a", "GaitInsole L", -60)));
        assert!(scanner.is_empty());
    }

    #[test]
    fn power_off_clears_list_until_powered_on() {
        let mut scanner = scanning();
        scanner.on_discovered(device("a", "GaitInsole L", -60));

        assert_eq!(scanner.on_adapter_state(AdapterState::PoweredOff), None);
        assert!(scanner.is_empty());
        assert!(!scanner.is_scanning());
        assert!(!scanner.on_discovered(device("a", "GaitInsole L", -60)));

        assert_eq!(scanner.on_adapter_state(AdapterState::PoweredOn), Some(PlatformCommand::StartScan));
        assert!(scanner.is_scanning());
    }
}
