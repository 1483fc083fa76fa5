/// RHIoT tag sensor telemetry decoding
use crate::bluetooth::ad_structure::gap;
use crate::error::ScanError;
use crate::models::{AdStructure, AdvertisingEvent, KeyState, SensorTelemetryFrame};

/// ServiceData prefix: the 0xFEAA service id followed by the tag's frame type
pub const SERVICE_DATA_PREFIX: [u8; 3] = [0xAA, 0xFE, 0x20];

/// Header bytes skipped before the telemetry fields: service id (2), frame type, version
const FRAME_HEADER_LEN: usize = 4;
/// Payload size up to and including the lux field
pub const MIN_FRAME_LEN: usize = 19;

const KEY_LEFT: u8 = 0b001;
const KEY_RIGHT: u8 = 0b010;
const KEY_REED: u8 = 0b100;

/// First AD structure of `ad_type`, in transmission order
pub fn locate(event: &AdvertisingEvent, ad_type: u8) -> Option<&AdStructure> {
    event.data.iter().find(|ads| ads.ad_type == ad_type)
}

/// True if the payload of `ads` begins with `prefix`
pub fn matches(ads: &AdStructure, prefix: &[u8]) -> bool {
    ads.starts_with(prefix)
}

/// Decode the tag's telemetry frame from a ServiceData payload
///
/// Payload structure (multi-byte fields big endian):
/// - Bytes 0-1: service id 0xAAFE
/// - Byte 2: frame type
/// - Byte 3: version
/// - Bytes 4-5: battery voltage, 1 mV/bit
/// - Bytes 6-7: temperature, signed 8.8 fixed point
/// - Bytes 8-11: advertisement count since power up
/// - Bytes 12-15: time since power up, 0.1 s/bit
/// - Byte 16: keys; bit 0 left, bit 1 right, bit 2 reed relay
/// - Bytes 17-18: raw optical sensor reading
///
/// # Errors
/// [`ScanError::Format`] if the payload is shorter than 19 bytes.
pub fn decode_sensor_frame(data: &[u8]) -> Result<SensorTelemetryFrame, ScanError> {
    if data.len() < MIN_FRAME_LEN {
        return Err(ScanError::Format(format!(
            "sensor frame needs {} bytes, got {}",
            MIN_FRAME_LEN,
            data.len()
        )));
    }

    let d = &data[FRAME_HEADER_LEN..];
    let v_batt = u16::from_be_bytes([d[0], d[1]]);
    // Integer part is signed, the fraction uses the unsigned low byte
    let temp_c = f64::from(d[2] as i8) + f64::from(d[3]) / 256.0;
    let adv_cnt = i32::from_be_bytes([d[4], d[5], d[6], d[7]]);
    let sec_cnt = i32::from_be_bytes([d[8], d[9], d[10], d[11]]);
    let keys = d[12];
    let lux = (u16::from(d[13]) << 8) | u16::from(d[14]);

    Ok(SensorTelemetryFrame {
        v_batt,
        temp_c,
        adv_cnt,
        sec_cnt,
        keys,
        lux,
        address: None,
    })
}

/// Button/relay state; a pressed button hides the reed relay bit
pub fn key_state_for_mask(mask: u8) -> KeyState {
    if mask & KEY_LEFT != 0 && mask & KEY_RIGHT != 0 {
        KeyState::LeftAndRight
    } else if mask & KEY_LEFT != 0 {
        KeyState::Left
    } else if mask & KEY_RIGHT != 0 {
        KeyState::Right
    } else if mask & KEY_REED != 0 {
        KeyState::Reed
    } else {
        KeyState::None
    }
}

/// Format an on-wire address as `B0:B4:48:D6:DA:85`, last byte first
pub fn address_to_string(address: &[u8; 6]) -> String {
    address
        .iter()
        .rev()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse the output of [`address_to_string`] back into on-wire order
pub fn address_from_string(s: &str) -> Result<[u8; 6], ScanError> {
    let tokens: Vec<&str> = s.trim().split(':').collect();
    if tokens.len() != 6 {
        return Err(ScanError::Format(format!(
            "address '{}' must have 6 octets, found {}",
            s,
            tokens.len()
        )));
    }

    let mut address = [0u8; 6];
    for (slot, token) in address.iter_mut().zip(tokens.iter().rev()) {
        *slot = u8::from_str_radix(token, 16)
            .map_err(|e| ScanError::Format(format!("bad octet '{}' in '{}': {}", token, s, e)))?;
    }
    Ok(address)
}

impl SensorTelemetryFrame {
    /// Build a frame from the event's tag ServiceData structure
    ///
    /// # Returns
    /// `Ok(None)` if the event has no ServiceData structure or its first one
    /// is not a tag frame.
    pub fn from_event(event: &AdvertisingEvent) -> Result<Option<Self>, ScanError> {
        let ads = match locate(event, gap::SERVICE_DATA) {
            Some(ads) if matches(ads, &SERVICE_DATA_PREFIX) => ads,
            _ => return Ok(None),
        };
        let mut frame = decode_sensor_frame(&ads.data)?;
        frame.address = Some(event.address);
        Ok(Some(frame))
    }
}
