use log::debug;
use std::env;

use crate::error::ScanError;
use crate::models::ByteOrder;

const DEFAULT_HCI_DEVICE: &str = "hci0";
const DEFAULT_SCANNER_ID: &str = "scanner";
const DEFAULT_BUFFER_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    /// Host controller interface, e.g. `hci0`
    pub hci_device: String,
    /// Id stamped on every beacon this scanner reports
    pub scanner_id: String,
    /// Capacity of the shared event buffer in bytes
    pub buffer_size: usize,
    pub byte_order: ByteOrder,
    pub debug: bool,
    /// File of hex encoded event buffers, one per line, for the loopback scanner
    pub replay_file: Option<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            hci_device: DEFAULT_HCI_DEVICE.to_string(),
            scanner_id: DEFAULT_SCANNER_ID.to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            byte_order: ByteOrder::LittleEndian,
            debug: false,
            replay_file: None,
        }
    }
}

impl ScannerConfig {
    /// Load from the environment, after reading a `.env` file if present
    pub fn new() -> Result<Self, ScanError> {
        // Load environment variables
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ScanError> {
        let mut config = ScannerConfig::default();

        if let Some(device) = lookup("HCI_DEVICE") {
            config.hci_device = device.trim().to_string();
        }
        if let Some(id) = lookup("SCANNER_ID") {
            config.scanner_id = id.trim().to_string();
        }
        if let Some(size) = lookup("BUFFER_SIZE") {
            config.buffer_size = size
                .trim()
                .parse()
                .map_err(|e| ScanError::Config(format!("BUFFER_SIZE '{}': {}", size, e)))?;
        }
        if let Some(order) = lookup("BUFFER_ORDER") {
            config.byte_order = match order.trim().to_ascii_lowercase().as_str() {
                "little" | "le" | "little_endian" => ByteOrder::LittleEndian,
                "big" | "be" | "big_endian" => ByteOrder::BigEndian,
                other => {
                    return Err(ScanError::Config(format!(
                        "BUFFER_ORDER must be 'little' or 'big', got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(flag) = lookup("SCANNER_DEBUG") {
            config.debug = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(ScanError::Config(format!(
                        "SCANNER_DEBUG must be true or false, got '{}'",
                        other
                    )))
                }
            };
        }
        config.replay_file = lookup("REPLAY_FILE").filter(|path| !path.trim().is_empty());

        if config.scanner_id.is_empty() {
            return Err(ScanError::Config("SCANNER_ID must not be empty".into()));
        }
        if config.buffer_size == 0 {
            return Err(ScanError::Config("BUFFER_SIZE must be positive".into()));
        }

        debug!("Loaded scanner configuration: {:?}", config);
        Ok(config)
    }
}
