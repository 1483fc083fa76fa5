/// Codec for a single length-prefixed, type-tagged advertising data element
///
/// Wire layout:
/// - Byte 0: payload length (the two header bytes are not counted)
/// - Byte 1: AD type, see [`gap`]
/// - Bytes 2..2+length: payload
use crate::error::ScanError;
use crate::models::AdStructure;

/// AD type codes from the GAP assigned numbers registry
pub mod gap {
    pub const FLAGS: u8 = 0x01;
    pub const SERVICE_CLASS_PARTIAL_16BIT_UUIDS: u8 = 0x02;
    pub const SERVICE_CLASS_COMPLETE_16BIT_UUIDS: u8 = 0x03;
    pub const SERVICE_CLASS_PARTIAL_32BIT_UUIDS: u8 = 0x04;
    pub const SERVICE_CLASS_COMPLETE_32BIT_UUIDS: u8 = 0x05;
    pub const SERVICE_CLASS_PARTIAL_128BIT_UUIDS: u8 = 0x06;
    pub const SERVICE_CLASS_COMPLETE_128BIT_UUIDS: u8 = 0x07;
    pub const SHORTENED_LOCAL_NAME: u8 = 0x08;
    pub const COMPLETE_LOCAL_NAME: u8 = 0x09;
    pub const TX_POWER_LEVEL: u8 = 0x0A;
    pub const CLASS_OF_DEVICE: u8 = 0x0D;
    pub const SLAVE_CONNECTION_INTERVAL_RANGE: u8 = 0x12;
    pub const SERVICE_DATA: u8 = 0x16;
    pub const ADVERTISING_INTERVAL: u8 = 0x1A;
    pub const SERVICE_DATA_32BIT_UUID: u8 = 0x20;
    pub const URI: u8 = 0x24;
    pub const MANUFACTURER_SPECIFIC_DATA: u8 = 0xFF;
}

/// Length and type bytes preceding every payload
pub const AD_HEADER_LEN: usize = 2;

/// Decode one AD structure starting at `offset`.
///
/// # Returns
/// The structure and the number of bytes consumed (`2 + length`).
///
/// # Errors
/// [`ScanError::Bounds`] if the header or the declared payload runs past `buf`.
pub fn decode_one(buf: &[u8], offset: usize) -> Result<(AdStructure, usize), ScanError> {
    let header = offset
        .checked_add(AD_HEADER_LEN)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| ScanError::bounds(offset, AD_HEADER_LEN, buf.len()))?;

    let length = buf[offset] as usize;
    let ad_type = buf[offset + 1];

    let end = header + length;
    if end > buf.len() {
        return Err(ScanError::bounds(offset, AD_HEADER_LEN + length, buf.len()));
    }

    let data = buf[header..end].to_vec();
    Ok((AdStructure::new(ad_type, data), AD_HEADER_LEN + length))
}

/// Encode one AD structure as `[length, type, payload..]`.
///
/// # Errors
/// [`ScanError::Format`] if the payload does not fit the one byte length field.
pub fn encode_one(ads: &AdStructure) -> Result<Vec<u8>, ScanError> {
    let length = u8::try_from(ads.data.len()).map_err(|_| {
        ScanError::Format(format!(
            "AD payload of {} bytes exceeds 255 byte limit",
            ads.data.len()
        ))
    })?;

    let mut out = Vec::with_capacity(AD_HEADER_LEN + ads.data.len());
    out.push(length);
    out.push(ads.ad_type);
    out.extend_from_slice(&ads.data);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_flags_structure() {
        let buf = [0x01, gap::FLAGS, 0x06];
        let (ads, consumed) = decode_one(&buf, 0).unwrap();
        assert_eq!(ads.ad_type, gap::FLAGS);
        assert_eq!(ads.data, vec![0x06]);
        assert_eq!(consumed, 3);
    }

    #[test]
    fn decodes_at_offset() {
        let buf = [0xEE, 0xEE, 0x02, gap::TX_POWER_LEVEL, 0xC5, 0x00, 0xEE];
        let (ads, consumed) = decode_one(&buf, 2).unwrap();
        assert_eq!(ads.ad_type, gap::TX_POWER_LEVEL);
        assert_eq!(ads.data, vec![0xC5, 0x00]);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn zero_length_structure_has_empty_payload() {
        let (ads, consumed) = decode_one(&[0x00, gap::URI], 0).unwrap();
        assert!(ads.is_empty());
        assert_eq!(consumed, 2);
    }

    #[test]
    fn reencoding_reproduces_input() {
        let buf = [0x05, gap::COMPLETE_LOCAL_NAME, b'R', b'H', b'I', b'o', b'T'];
        let (ads, _) = decode_one(&buf, 0).unwrap();
        assert_eq!(encode_one(&ads).unwrap(), buf.to_vec());
    }

    #[test]
    fn declared_length_past_end_is_bounds_error() {
        let buf = [0x1F, gap::SERVICE_DATA, 0xAA, 0xFE];
        assert!(matches!(
            decode_one(&buf, 0),
            Err(ScanError::Bounds {
                offset: 0,
                needed: 33,
                available: 4
            })
        ));
    }

    #[test]
    fn missing_header_is_bounds_error() {
        assert!(matches!(
            decode_one(&[0x01], 0),
            Err(ScanError::Bounds { .. })
        ));
        assert!(matches!(
            decode_one(&[0x01, 0x01], usize::MAX),
            Err(ScanError::Bounds { .. })
        ));
    }

    #[test]
    fn oversized_payload_cannot_be_encoded() {
        let ads = AdStructure::new(gap::MANUFACTURER_SPECIFIC_DATA, vec![0; 256]);
        assert!(matches!(encode_one(&ads), Err(ScanError::Format(_))));
    }
}
