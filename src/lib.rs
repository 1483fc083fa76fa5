//! Decoding and dispatch of BLE scanner event buffers.
//!
//! The native scanner writes each event into a shared buffer, either as a
//! legacy 80 byte beacon record or as an advertising event with its AD
//! structures. [`bluetooth::ScannerSession`] binds that buffer to a
//! [`bluetooth::ScannerBackend`] and hands every notification to the
//! [`bluetooth::EventDispatcher`], which decodes it and calls the highest
//! priority registered callback.

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod models;
pub mod transport;
pub mod utils;

pub use config::ScannerConfig;
pub use error::ScanError;
pub use models::{
    AdStructure, AddressType, AdvertisingEvent, Beacon, BeaconInfoRecord, ByteOrder, KeyState,
    MessageType, ScanMode, SensorTelemetryFrame, SessionState,
};
