/// Fixed-offset decoding of the buffers written by the native scanner
///
/// Two layouts share the buffer, selected by the session's [`ScanMode`]:
///
/// Legacy beacon record (80 bytes):
/// - Bytes 0-35: NUL terminated ASCII uuid
/// - Bytes 36-71: isHeartbeat, count, code, manufacturer, major, minor,
///   power, calibratedPower, rssi (i32 each)
/// - Bytes 72-79: receive time (i64, ms since epoch)
///
/// Advertising event record (24 byte header + AD structures):
/// - Bytes 0-3: total length (u32)
/// - Byte 4: address type
/// - Bytes 5-10: device address
/// - Byte 11: AD structure count
/// - Bytes 12-15: rssi (i32)
/// - Bytes 16-23: receive time (i64, ms since epoch)
/// - Byte 24..: AD structures
///
/// [`ScanMode`]: crate::models::ScanMode
use std::sync::{Mutex, PoisonError};

use crate::bluetooth::ad_structure::{decode_one, encode_one};
use crate::error::ScanError;
use crate::models::{AdvertisingEvent, BeaconInfoRecord, ByteOrder};

pub const BEACON_INFO_SIZE: usize = 80;
const UUID_OFFSET: usize = 0;
const UUID_MAX_LEN: usize = 36;
const IS_HEARTBEAT_OFFSET: usize = 36;
const COUNT_OFFSET: usize = 40;
const CODE_OFFSET: usize = 44;
const MANUFACTURER_OFFSET: usize = 48;
const MAJOR_OFFSET: usize = 52;
const MINOR_OFFSET: usize = 56;
const POWER_OFFSET: usize = 60;
const CALIBRATED_POWER_OFFSET: usize = 64;
const RSSI_OFFSET: usize = 68;
const TIME_OFFSET: usize = 72;

pub const AD_EVENT_HEADER_SIZE: usize = 24;
const ADI_TOTAL_LENGTH_OFFSET: usize = 0;
const ADI_ADDRESS_TYPE_OFFSET: usize = 4;
const ADI_ADDRESS_OFFSET: usize = 5;
const ADI_COUNT_OFFSET: usize = 11;
const ADI_RSSI_OFFSET: usize = 12;
const ADI_TIME_OFFSET: usize = 16;
const ADI_DATA_OFFSET: usize = 24;

/// Shared buffer the native scanner writes each event into.
///
/// Contents are only reachable through [`EventBuffer::fill`] (writer side) and
/// [`EventBuffer::with_view`] (decoder side), so a view can never outlive the
/// notification that produced it.
#[derive(Debug)]
pub struct EventBuffer {
    order: ByteOrder,
    bytes: Mutex<Box<[u8]>>,
}

impl EventBuffer {
    pub fn new(capacity: usize, order: ByteOrder) -> Self {
        EventBuffer {
            order,
            bytes: Mutex::new(vec![0u8; capacity].into_boxed_slice()),
        }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn capacity(&self) -> usize {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Writer access for the scanner process
    pub fn fill<R>(&self, write: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        write(&mut bytes[..])
    }

    /// Read-only access for the duration of `read`
    pub fn with_view<R>(&self, read: impl FnOnce(EventView<'_>) -> R) -> R {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        read(EventView::new(&bytes[..], self.order))
    }
}

/// Borrowed, byte-order aware view of one event
#[derive(Debug, Clone, Copy)]
pub struct EventView<'a> {
    bytes: &'a [u8],
    order: ByteOrder,
}

impl<'a> EventView<'a> {
    pub fn new(bytes: &'a [u8], order: ByteOrder) -> Self {
        EventView { bytes, order }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `len` bytes at `offset`, or [`ScanError::Bounds`]
    pub fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], ScanError> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or_else(|| ScanError::bounds(offset, len, self.bytes.len()))
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N], ScanError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(offset, N)?);
        Ok(out)
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8, ScanError> {
        Ok(self.array::<1>(offset)?[0])
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, ScanError> {
        let raw = self.array(offset)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        })
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32, ScanError> {
        let raw = self.array(offset)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => i32::from_le_bytes(raw),
            ByteOrder::BigEndian => i32::from_be_bytes(raw),
        })
    }

    pub fn read_i64(&self, offset: usize) -> Result<i64, ScanError> {
        let raw = self.array(offset)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => i64::from_le_bytes(raw),
            ByteOrder::BigEndian => i64::from_be_bytes(raw),
        })
    }

    /// Total length field of an advertising event record, used for buffer sizing
    pub fn total_length(&self) -> Result<u32, ScanError> {
        self.read_u32(ADI_TOTAL_LENGTH_OFFSET)
    }
}

/// Decode the legacy 80 byte beacon record
pub fn decode_legacy(view: EventView<'_>) -> Result<BeaconInfoRecord, ScanError> {
    if view.len() < BEACON_INFO_SIZE {
        return Err(ScanError::bounds(0, BEACON_INFO_SIZE, view.len()));
    }

    let uuid_bytes = view.slice(UUID_OFFSET, UUID_MAX_LEN)?;
    let uuid_len = uuid_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(UUID_MAX_LEN);
    let uuid = String::from_utf8_lossy(&uuid_bytes[..uuid_len]).into_owned();

    Ok(BeaconInfoRecord {
        uuid,
        is_heartbeat: view.read_i32(IS_HEARTBEAT_OFFSET)? != 0,
        count: view.read_i32(COUNT_OFFSET)?,
        code: view.read_i32(CODE_OFFSET)?,
        manufacturer: view.read_i32(MANUFACTURER_OFFSET)?,
        major: view.read_i32(MAJOR_OFFSET)?,
        minor: view.read_i32(MINOR_OFFSET)?,
        power: view.read_i32(POWER_OFFSET)?,
        calibrated_power: view.read_i32(CALIBRATED_POWER_OFFSET)?,
        rssi: view.read_i32(RSSI_OFFSET)?,
        time: view.read_i64(TIME_OFFSET)?,
    })
}

/// Decode an advertising event record and its AD structures.
///
/// Exactly `count` structures are read starting at byte 24. The total length
/// field is read but not checked against the structures.
///
/// # Errors
/// [`ScanError::Bounds`] if the header or any structure runs past the view.
pub fn decode_advertising_event(view: EventView<'_>) -> Result<AdvertisingEvent, ScanError> {
    read_advertising_event(view).map(|(event, _)| event)
}

/// Decode an advertising event record, returning it with the number of bytes consumed
pub(crate) fn read_advertising_event(
    view: EventView<'_>,
) -> Result<(AdvertisingEvent, usize), ScanError> {
    let _total_length = view.total_length()?;
    let address_type = view.read_u8(ADI_ADDRESS_TYPE_OFFSET)?.into();
    let address = view.array::<6>(ADI_ADDRESS_OFFSET)?;
    let count = view.read_u8(ADI_COUNT_OFFSET)?;
    let rssi = view.read_i32(ADI_RSSI_OFFSET)?;
    let time = view.read_i64(ADI_TIME_OFFSET)?;

    let bytes = view.as_bytes();
    let mut offset = ADI_DATA_OFFSET;
    let mut data = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (ads, consumed) = decode_one(bytes, offset)?;
        offset += consumed;
        data.push(ads);
    }

    let event = AdvertisingEvent {
        address,
        address_type,
        count,
        rssi,
        time,
        data,
    };
    Ok((event, offset))
}

fn put_i32(out: &mut [u8], offset: usize, value: i32, order: ByteOrder) {
    let raw = match order {
        ByteOrder::LittleEndian => value.to_le_bytes(),
        ByteOrder::BigEndian => value.to_be_bytes(),
    };
    out[offset..offset + 4].copy_from_slice(&raw);
}

fn put_i64(out: &mut [u8], offset: usize, value: i64, order: ByteOrder) {
    let raw = match order {
        ByteOrder::LittleEndian => value.to_le_bytes(),
        ByteOrder::BigEndian => value.to_be_bytes(),
    };
    out[offset..offset + 8].copy_from_slice(&raw);
}

/// Build the 80 byte legacy layout for `record`; the uuid is truncated to 36 bytes
pub fn encode_legacy(record: &BeaconInfoRecord, order: ByteOrder) -> Vec<u8> {
    let mut out = vec![0u8; BEACON_INFO_SIZE];
    let uuid = record.uuid.as_bytes();
    let uuid_len = uuid.len().min(UUID_MAX_LEN);
    out[UUID_OFFSET..UUID_OFFSET + uuid_len].copy_from_slice(&uuid[..uuid_len]);

    put_i32(&mut out, IS_HEARTBEAT_OFFSET, i32::from(record.is_heartbeat), order);
    put_i32(&mut out, COUNT_OFFSET, record.count, order);
    put_i32(&mut out, CODE_OFFSET, record.code, order);
    put_i32(&mut out, MANUFACTURER_OFFSET, record.manufacturer, order);
    put_i32(&mut out, MAJOR_OFFSET, record.major, order);
    put_i32(&mut out, MINOR_OFFSET, record.minor, order);
    put_i32(&mut out, POWER_OFFSET, record.power, order);
    put_i32(&mut out, CALIBRATED_POWER_OFFSET, record.calibrated_power, order);
    put_i32(&mut out, RSSI_OFFSET, record.rssi, order);
    put_i64(&mut out, TIME_OFFSET, record.time, order);
    out
}

/// Build the advertising event layout for `event`.
///
/// The structure count written is the number of structures in `event.data`,
/// and the total length field is the size of the returned record.
///
/// # Errors
/// [`ScanError::Format`] if there are more than 255 structures or a payload
/// exceeds 255 bytes.
pub fn encode_advertising_event(
    event: &AdvertisingEvent,
    order: ByteOrder,
) -> Result<Vec<u8>, ScanError> {
    let count = u8::try_from(event.data.len()).map_err(|_| {
        ScanError::Format(format!("{} AD structures exceed 255", event.data.len()))
    })?;

    let mut out = vec![0u8; AD_EVENT_HEADER_SIZE];
    for ads in &event.data {
        out.extend_from_slice(&encode_one(ads)?);
    }

    let total_length = u32::try_from(out.len())
        .map_err(|_| ScanError::Format("advertising event too large".to_string()))?;
    let total_raw = match order {
        ByteOrder::LittleEndian => total_length.to_le_bytes(),
        ByteOrder::BigEndian => total_length.to_be_bytes(),
    };
    out[ADI_TOTAL_LENGTH_OFFSET..ADI_TOTAL_LENGTH_OFFSET + 4].copy_from_slice(&total_raw);
    out[ADI_ADDRESS_TYPE_OFFSET] = event.address_type.into();
    out[ADI_ADDRESS_OFFSET..ADI_ADDRESS_OFFSET + 6].copy_from_slice(&event.address);
    out[ADI_COUNT_OFFSET] = count;
    put_i32(&mut out, ADI_RSSI_OFFSET, event.rssi, order);
    put_i64(&mut out, ADI_TIME_OFFSET, event.time, order);
    Ok(out)
}
