/// Utility functions for formatting decoded scanner data
use time::{format_description, OffsetDateTime};

/// Format a millisecond epoch timestamp for human-readable logging
///
/// Converts to `YYYY-MM-DD HH:MM:SS.mmm` in UTC.
/// Falls back to the raw millisecond value if the timestamp is out of range.
pub fn format_timestamp(millis: i64) -> String {
    let nanos = i128::from(millis) * 1_000_000;
    let dt = match OffsetDateTime::from_unix_timestamp_nanos(nanos) {
        Ok(dt) => dt,
        Err(_) => return millis.to_string(),
    };
    format_datetime(&dt).unwrap_or_else(|| millis.to_string())
}

fn format_datetime(dt: &OffsetDateTime) -> Option<String> {
    let format = format_description::parse(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]",
    )
    .ok()?;
    dt.format(&format).ok()
}

/// Uppercase hex with no separators, e.g. `AAFE20`
pub fn hex_string(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Parse one captured event buffer written as hex; whitespace is ignored
pub fn parse_hex_line(line: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(compact)
}
