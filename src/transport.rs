/// Versioned binary form of a [`Beacon`] for shipping readings off the scanner host
///
/// Message layout, all integers big endian:
/// - version (i32, currently 4)
/// - scanner id length (i32) + bytes
/// - uuid length (i32) + bytes
/// - code, manufacturer, major, minor, power, calibrated power, rssi (i32 each)
/// - time (i64)
/// - message type (i32)
use crate::error::ScanError;
use crate::models::Beacon;

pub const BEACON_MSG_VERSION: i32 = 4;

struct MsgReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> MsgReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], ScanError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| ScanError::bounds(self.offset, len, self.buf.len()))?;
        let bytes = &self.buf[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn read_i32(&mut self) -> Result<i32, ScanError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(i32::from_be_bytes(raw))
    }

    fn read_i64(&mut self) -> Result<i64, ScanError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(i64::from_be_bytes(raw))
    }

    fn read_string(&mut self) -> Result<String, ScanError> {
        let offset = self.offset;
        let len = self.read_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| ScanError::Format(format!("negative string length {} at {}", len, offset)))?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ScanError::Format(format!("string at {} is not UTF-8: {}", offset, e)))
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) -> Result<(), ScanError> {
    let len = i32::try_from(value.len()).map_err(|_| {
        ScanError::Format(format!("string of {} bytes exceeds i32 length field", value.len()))
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

impl Beacon {
    /// Serialize to the current message version
    ///
    /// # Errors
    /// [`ScanError::Format`] if a string is too long for its i32 length field.
    pub fn to_byte_msg(&self) -> Result<Vec<u8>, ScanError> {
        let mut out = Vec::with_capacity(64 + self.scanner_id.len() + self.uuid.len());
        out.extend_from_slice(&BEACON_MSG_VERSION.to_be_bytes());
        write_string(&mut out, &self.scanner_id)?;
        write_string(&mut out, &self.uuid)?;
        for value in [
            self.code,
            self.manufacturer,
            self.major,
            self.minor,
            self.power,
            self.calibrated_power,
            self.rssi,
        ] {
            out.extend_from_slice(&value.to_be_bytes());
        }
        out.extend_from_slice(&self.time.to_be_bytes());
        out.extend_from_slice(&i32::from(self.message_type).to_be_bytes());
        Ok(out)
    }

    /// Deserialize a message written by [`Beacon::to_byte_msg`].
    ///
    /// The count field is not part of the message and comes back as 0.
    ///
    /// # Errors
    /// - [`ScanError::VersionMismatch`] for any version other than 4.
    /// - [`ScanError::Bounds`] if the message is truncated.
    /// - [`ScanError::Format`] for negative lengths or non UTF-8 strings.
    pub fn from_byte_msg(msg: &[u8]) -> Result<Beacon, ScanError> {
        let mut reader = MsgReader {
            buf: msg,
            offset: 0,
        };
        let version = reader.read_i32()?;
        if version != BEACON_MSG_VERSION {
            return Err(ScanError::VersionMismatch {
                found: version,
                expected: BEACON_MSG_VERSION,
            });
        }

        Ok(Beacon {
            scanner_id: reader.read_string()?,
            uuid: reader.read_string()?,
            code: reader.read_i32()?,
            manufacturer: reader.read_i32()?,
            major: reader.read_i32()?,
            minor: reader.read_i32()?,
            power: reader.read_i32()?,
            calibrated_power: reader.read_i32()?,
            rssi: reader.read_i32()?,
            time: reader.read_i64()?,
            message_type: reader.read_i32()?.into(),
            count: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;

    fn beacon() -> Beacon {
        Beacon {
            scanner_id: "room-204".to_string(),
            uuid: "DAF246CEF20311E4B116123B93F75CBA".to_string(),
            code: 0x0215,
            manufacturer: 0x004C,
            major: 2,
            minor: 105,
            power: -59,
            calibrated_power: -61,
            rssi: -72,
            time: 1_465_000_000_123,
            message_type: MessageType::ScannerHeartbeat,
            count: 0,
        }
    }

    #[test]
    fn message_round_trips() {
        let sent = beacon();
        assert_eq!(Beacon::from_byte_msg(&sent.to_byte_msg().unwrap()).unwrap(), sent);
    }

    #[test]
    fn message_starts_with_version_and_scanner_id() {
        let msg = beacon().to_byte_msg().unwrap();
        assert_eq!(&msg[..4], &[0, 0, 0, 4]);
        assert_eq!(&msg[4..8], &[0, 0, 0, 8]);
        assert_eq!(&msg[8..16], b"room-204");
        assert_eq!(msg.len(), 4 + 4 + 8 + 4 + 32 + 7 * 4 + 8 + 4);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut msg = beacon().to_byte_msg().unwrap();
        msg[3] = 3;
        assert!(matches!(
            Beacon::from_byte_msg(&msg),
            Err(ScanError::VersionMismatch {
                found: 3,
                expected: 4
            })
        ));
    }

    #[test]
    fn truncated_message_is_bounds_error() {
        let msg = beacon().to_byte_msg().unwrap();
        assert!(matches!(
            Beacon::from_byte_msg(&msg[..msg.len() - 2]),
            Err(ScanError::Bounds { .. })
        ));
    }

    #[test]
    fn string_length_field_is_checked() {
        let mut out = Vec::new();
        write_string(&mut out, "abc").unwrap();
        assert_eq!(out, [0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn negative_length_is_format_error() {
        let mut msg = beacon().to_byte_msg().unwrap();
        msg[4..8].copy_from_slice(&(-1i32).to_be_bytes());
        assert!(matches!(Beacon::from_byte_msg(&msg), Err(ScanError::Format(_))));
    }
}
