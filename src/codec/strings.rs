//! MTP string encoding: a 1-byte count of UTF-16LE code units (including the
//! terminating null), followed by that many 2-byte code units. An empty
//! string is encoded as a single zero byte with no code units at all.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringDecodeError {
    TooShort,
    UnpairedCodeUnit,
    Unterminated,
    InvalidUtf16,
}

impl fmt::Display for StringDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "buffer shorter than the declared code unit count"),
            Self::UnpairedCodeUnit => write!(f, "buffer ends mid code unit"),
            Self::Unterminated => write!(f, "string is missing its null terminator"),
            Self::InvalidUtf16 => write!(f, "code units are not valid UTF-16"),
        }
    }
}

impl std::error::Error for StringDecodeError {}

/// Writes `value` as an MTP string into `buf` and returns the number of
/// bytes consumed by the caller (for cursoring through a larger payload).
pub fn write_mtp_string(buf: &mut Vec<u8>, value: &str) {
    if value.is_empty() {
        buf.push(0);
        return;
    }

    let units: Vec<u16> = value.encode_utf16().chain(std::iter::once(0)).collect();
    debug_assert!(units.len() <= u8::MAX as usize, "MTP strings cap at 255 code units");
    buf.push(units.len() as u8);
    for unit in units {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
}

/// Reads an MTP string starting at `buf[0]`. Returns the decoded string
/// (without its null terminator) and the number of bytes consumed.
pub fn read_mtp_string(buf: &[u8]) -> Result<(String, usize), StringDecodeError> {
    if buf.is_empty() {
        return Err(StringDecodeError::TooShort);
    }

    let count = buf[0] as usize;
    if count == 0 {
        return Ok((String::new(), 1));
    }

    let byte_len = count * 2;
    if buf.len() < 1 + byte_len {
        return Err(StringDecodeError::TooShort);
    }

    let mut units = Vec::with_capacity(count);
    for chunk in buf[1..1 + byte_len].chunks_exact(2) {
        units.push(u16::from_le_bytes([chunk[0], chunk[1]]));
    }

    match units.last() {
        Some(0) => {}
        _ => return Err(StringDecodeError::Unterminated),
    }
    units.pop();

    let s = String::from_utf16(&units).map_err(|_| StringDecodeError::InvalidUtf16)?;
    Ok((s, 1 + byte_len))
}
