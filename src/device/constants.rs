use uuid::Uuid;

/**
 * How often (milliseconds) to attempt to restart scanning after the adapter refused to scan.
 */
pub const SCAN_RETRY_DELAY: u64 = 1000;

/**
 * How long (milliseconds) connecting to a peripheral may take.
 */
pub const CONNECT_DEADLINE: u64 = 10000;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) closing a link may take. The link counts as closed afterwards either way.
 */
pub const DISCONNECT_DEADLINE: u64 = 5000;

/**
 * Capacity of the channel that carries platform callbacks back into the session loop.
 */
pub const EVENT_CHANNEL_SIZE: usize = 64;

/**
 * Substring the advertised name of the insole firmware contains.
 */
pub const DEFAULT_DEVICE_NAME_MARKER: &str = "GaitInsole";

/**
 * The UUID of the Bluetooth BLE service that streams insole readings.
 */
pub const INSOLE_SERVICE: &str = "42f66074-73ac-44ba-b655-483c6f673e33";

pub fn make_insole_service_uuid() -> Uuid {
    Uuid::parse_str(INSOLE_SERVICE).expect("INSOLE_SERVICE is a valid uuid")
}
