//! MTP arrays: a u32 element count followed by that many fixed-width
//! little-endian elements. Used for object handle lists, storage id lists,
//! and similar data-container payloads.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayDecodeError {
    TooShort,
}

impl fmt::Display for ArrayDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer shorter than the declared element count")
    }
}

impl std::error::Error for ArrayDecodeError {}

pub fn write_u32_array(buf: &mut Vec<u8>, values: &[u32]) {
    buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

pub fn read_u32_array(buf: &[u8]) -> Result<(Vec<u32>, usize), ArrayDecodeError> {
    if buf.len() < 4 {
        return Err(ArrayDecodeError::TooShort);
    }
    let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let needed = 4 + count * 4;
    if buf.len() < needed {
        return Err(ArrayDecodeError::TooShort);
    }
    let values = buf[4..needed]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    Ok((values, needed))
}

pub fn write_u16_array(buf: &mut Vec<u8>, values: &[u16]) {
    buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

pub fn read_u16_array(buf: &[u8]) -> Result<(Vec<u16>, usize), ArrayDecodeError> {
    if buf.len() < 4 {
        return Err(ArrayDecodeError::TooShort);
    }
    let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let needed = 4 + count * 2;
    if buf.len() < needed {
        return Err(ArrayDecodeError::TooShort);
    }
    let values = buf[4..needed]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes(c.try_into().unwrap()))
        .collect();
    Ok((values, needed))
}
