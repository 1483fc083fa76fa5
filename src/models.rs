use std::fmt;

use crate::bluetooth::sensor::{address_to_string, key_state_for_mask};
use crate::utils::{format_timestamp, hex_string};

/// Byte order of the multi-byte fields in a scanner buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

/// Buffer mode requested from the native scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Every advertising event, delivered in the advertising-event layout
    General,
    /// Beacon advertisements only, delivered in the legacy 80 byte layout
    BeaconOnly,
}

/// Lifecycle of the buffer bound to the native scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unallocated,
    Allocated,
    Freed,
}

/// Type of a device address; 0 = public, 1 = random, other = reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Public,
    Random,
    Reserved(u8),
}

impl From<u8> for AddressType {
    fn from(tag: u8) -> Self {
        match tag {
            0 => AddressType::Public,
            1 => AddressType::Random,
            other => AddressType::Reserved(other),
        }
    }
}

impl From<AddressType> for u8 {
    fn from(address_type: AddressType) -> Self {
        match address_type {
            AddressType::Public => 0,
            AddressType::Random => 1,
            AddressType::Reserved(tag) => tag,
        }
    }
}

/// A single type-tagged advertising data element.
///
/// Type values come from the GAP assigned numbers registry, see
/// [`crate::bluetooth::ad_structure::gap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdStructure {
    pub ad_type: u8,
    pub data: Vec<u8>,
}

impl AdStructure {
    pub fn new(ad_type: u8, data: Vec<u8>) -> Self {
        AdStructure { ad_type, data }
    }

    /// Payload length in bytes, excluding the length and type header
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data_as_hex_string(&self) -> String {
        hex_string(&self.data)
    }

    /// True if the payload begins with `prefix`. A payload shorter than the prefix never matches.
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.data.starts_with(prefix)
    }
}

impl fmt::Display for AdStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ADS(type=0x{:02X}:{}): {}",
            self.ad_type,
            self.len(),
            self.data_as_hex_string()
        )
    }
}

/// A general BLE advertising event with its AD structures in transmission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingEvent {
    /// Device address, kept in on-wire order
    pub address: [u8; 6],
    pub address_type: AddressType,
    /// Structure count declared in the buffer header
    pub count: u8,
    pub rssi: i32,
    /// Receive time in milliseconds since the epoch
    pub time: i64,
    pub data: Vec<AdStructure>,
}

impl AdvertisingEvent {
    /// Address in on-wire byte order, e.g. `85:DA:D6:48:B4:B0`
    pub fn address_string(&self) -> String {
        self.address
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl fmt::Display for AdvertisingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "AdEventInfo({}/{}): rssi={}, time={}",
            self.address_string(),
            u8::from(self.address_type),
            self.rssi,
            format_timestamp(self.time)
        )?;
        for ads in &self.data {
            writeln!(f, "\t{}", ads)?;
        }
        Ok(())
    }
}

/// The legacy fixed-size beacon record written by the native scanner in beacon-only mode
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BeaconInfoRecord {
    pub uuid: String,
    pub is_heartbeat: bool,
    pub count: i32,
    pub code: i32,
    pub manufacturer: i32,
    pub major: i32,
    pub minor: i32,
    pub power: i32,
    pub calibrated_power: i32,
    pub rssi: i32,
    pub time: i64,
}

impl fmt::Display for BeaconInfoRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{} rssi={}, time={}",
            self.uuid, self.major, self.minor, self.rssi, self.time
        )
    }
}

/// State of the tag's two buttons and reed relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    None,
    Left,
    Right,
    LeftAndRight,
    Reed,
}

/// Sensor telemetry carried in the tag's Eddystone TLM shaped ServiceData structure
#[derive(Debug, Clone, PartialEq)]
pub struct SensorTelemetryFrame {
    /// Battery voltage in mV
    pub v_batt: u16,
    /// Temperature in degrees C
    pub temp_c: f64,
    /// Advertising packets sent since power up
    pub adv_cnt: i32,
    /// Time since power up in tenths of a second
    pub sec_cnt: i32,
    /// Bit 0: left key, bit 1: right key, bit 2: reed relay
    pub keys: u8,
    /// Raw optical sensor reading
    pub lux: u16,
    /// Address of the sending tag, if known
    pub address: Option<[u8; 6]>,
}

impl SensorTelemetryFrame {
    pub fn key_state(&self) -> KeyState {
        key_state_for_mask(self.keys)
    }

    pub fn keys_string(&self) -> String {
        let mut keys = String::new();
        if self.keys & 0x1 != 0 {
            keys.push_str("Left|");
        }
        if self.keys & 0x2 != 0 {
            keys.push_str("Right|");
        }
        if self.keys & 0x4 != 0 {
            keys.push_str("Reed");
        }
        keys
    }

    /// Uptime as `D days, H hours, M mins, S secs`
    pub fn time_up_string(&self) -> String {
        const TENTHS_PER_DAY: i32 = 36_000 * 24;
        let days = self.sec_cnt / TENTHS_PER_DAY;
        let mut remainder = self.sec_cnt - days * TENTHS_PER_DAY;
        let hours = remainder / 36_000;
        remainder -= hours * 36_000;
        let minutes = remainder / 600;
        remainder -= minutes * 600;
        let secs = remainder / 10;
        format!(
            "{} days, {} hours, {} mins, {} secs",
            days, hours, minutes, secs
        )
    }

    pub fn address_string(&self) -> String {
        match &self.address {
            Some(address) => address_to_string(address),
            None => ":::::".to_string(),
        }
    }
}

impl fmt::Display for SensorTelemetryFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RHIoTTag({}): battery: {}mV, temp: {:.2}C, keys: {}, lux: {} raw, advertCnt: {}, timeUp: {}",
            self.address_string(),
            self.v_batt,
            self.temp_c,
            self.keys_string(),
            self.lux,
            self.adv_cnt,
            self.time_up_string()
        )
    }
}

/// Kind of beacon message a scanner emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    #[default]
    ScannerRead,
    ScannerHeartbeat,
    /// Ordinal written by a newer peer that this build does not know
    Other(i32),
}

impl From<i32> for MessageType {
    fn from(ordinal: i32) -> Self {
        match ordinal {
            0 => MessageType::ScannerRead,
            1 => MessageType::ScannerHeartbeat,
            other => MessageType::Other(other),
        }
    }
}

impl From<MessageType> for i32 {
    fn from(message_type: MessageType) -> Self {
        match message_type {
            MessageType::ScannerRead => 0,
            MessageType::ScannerHeartbeat => 1,
            MessageType::Other(ordinal) => ordinal,
        }
    }
}

/// A beacon reading qualified with the id of the scanner that saw it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Beacon {
    pub scanner_id: String,
    pub uuid: String,
    pub code: i32,
    pub manufacturer: i32,
    pub major: i32,
    pub minor: i32,
    pub power: i32,
    pub calibrated_power: i32,
    pub rssi: i32,
    /// Receive time in milliseconds since the epoch
    pub time: i64,
    pub message_type: MessageType,
    pub count: i32,
}

impl Beacon {
    pub fn from_record(scanner_id: &str, record: &BeaconInfoRecord) -> Self {
        let mut beacon = Beacon {
            scanner_id: scanner_id.to_string(),
            uuid: record.uuid.clone(),
            code: record.code,
            manufacturer: record.manufacturer,
            major: record.major,
            minor: record.minor,
            power: record.power,
            calibrated_power: record.calibrated_power,
            rssi: record.rssi,
            time: record.time,
            message_type: MessageType::ScannerRead,
            count: record.count,
        };
        beacon.set_heartbeat(record.is_heartbeat);
        beacon
    }

    pub fn is_heartbeat(&self) -> bool {
        self.message_type == MessageType::ScannerHeartbeat
    }

    pub fn set_heartbeat(&mut self, flag: bool) {
        self.message_type = if flag {
            MessageType::ScannerHeartbeat
        } else {
            MessageType::ScannerRead
        };
    }
}

impl fmt::Display for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{[{},{},{}]code={},manufacturer={},cpower={},rssi={},time={} @ {}}}",
            self.uuid,
            self.major,
            self.minor,
            self.code,
            self.manufacturer,
            self.calibrated_power,
            self.rssi,
            format_timestamp(self.time),
            self.scanner_id
        )
    }
}
