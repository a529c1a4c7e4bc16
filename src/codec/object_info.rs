//! ObjectInfo dataset codec: the payload carried by `send-object-info`'s
//! data-out phase and `get-object-info`'s data-in phase.
//!
//! Not the full PTP ObjectInfo dataset (thumbnail dimensions, capture date
//! strings, keywords): this client never reads those fields, so encoding
//! them would just be dead weight carried on every wire round trip. Carries
//! exactly what the façade and the virtual device agree on: storage,
//! format, parent, size, name, and modification time.

use super::strings::{read_mtp_string, write_mtp_string};

/// Reserved value meaning "the storage root" wherever a parent/association
/// handle parameter appears.
pub const ROOT_HANDLE: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfoDataset {
    pub storage_id: u32,
    pub format: u16,
    pub parent_handle: Option<u32>,
    pub size: u64,
    pub name: String,
    pub mtime: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfoDecodeError;

pub fn encode_object_info(info: &ObjectInfoDataset) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&info.storage_id.to_le_bytes());
    buf.extend_from_slice(&info.format.to_le_bytes());
    buf.extend_from_slice(&info.parent_handle.unwrap_or(ROOT_HANDLE).to_le_bytes());
    buf.extend_from_slice(&info.size.to_le_bytes());
    write_mtp_string(&mut buf, &info.name);
    buf.extend_from_slice(&info.mtime.unwrap_or(0).to_le_bytes());
    buf
}

pub fn decode_object_info(bytes: &[u8]) -> Result<ObjectInfoDataset, ObjectInfoDecodeError> {
    if bytes.len() < 4 + 2 + 4 + 8 {
        return Err(ObjectInfoDecodeError);
    }
    let storage_id = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let format = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    let parent_raw = u32::from_le_bytes(bytes[6..10].try_into().unwrap());
    let size = u64::from_le_bytes(bytes[10..18].try_into().unwrap());
    let (name, consumed) = read_mtp_string(&bytes[18..]).map_err(|_| ObjectInfoDecodeError)?;
    let mtime_offset = 18 + consumed;
    let mtime = if bytes.len() >= mtime_offset + 8 {
        let raw = i64::from_le_bytes(bytes[mtime_offset..mtime_offset + 8].try_into().unwrap());
        if raw == 0 {
            None
        } else {
            Some(raw)
        }
    } else {
        None
    };

    Ok(ObjectInfoDataset {
        storage_id,
        format,
        parent_handle: if parent_raw == ROOT_HANDLE { None } else { Some(parent_raw) },
        size,
        name,
        mtime,
    })
}

/// One `handle` + its [`ObjectInfoDataset`], as returned in bulk by
/// `get-object-prop-list`.
///
/// The full PTP PropList dataset is a flat, property-code-keyed table
/// (one row per `(handle, property code)` pair, typed by a data-type tag).
/// This client only ever asks for the property-list enumeration shortcut to
/// avoid one `get-object-info` round trip per handle, so rather than decode
/// that general table, it asks for (and `VirtualDevice` replies with) the
/// same per-handle dataset `get-object-info` would have returned, just
/// batched behind one data phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPropListEntry {
    pub handle: u32,
    pub info: ObjectInfoDataset,
}

pub fn encode_object_prop_list(entries: &[ObjectPropListEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        buf.extend_from_slice(&entry.handle.to_le_bytes());
        buf.extend_from_slice(&encode_object_info(&entry.info));
    }
    buf
}

pub fn decode_object_prop_list(bytes: &[u8]) -> Result<Vec<ObjectPropListEntry>, ObjectInfoDecodeError> {
    if bytes.len() < 4 {
        return Err(ObjectInfoDecodeError);
    }
    let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let mut offset = 4;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        if bytes.len() < offset + 4 {
            return Err(ObjectInfoDecodeError);
        }
        let handle = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let remaining = &bytes[offset..];
        let info = decode_object_info(remaining)?;
        offset += encode_object_info(&info).len();
        entries.push(ObjectPropListEntry { handle, info });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_prop_list_round_trips_multiple_entries() {
        let entries = vec![
            ObjectPropListEntry {
                handle: 1,
                info: ObjectInfoDataset {
                    storage_id: 1,
                    format: 0x3001,
                    parent_handle: None,
                    size: 0,
                    name: "DCIM".to_string(),
                    mtime: None,
                },
            },
            ObjectPropListEntry {
                handle: 2,
                info: ObjectInfoDataset {
                    storage_id: 1,
                    format: 0x3000,
                    parent_handle: Some(1),
                    size: 42,
                    name: "a.jpg".to_string(),
                    mtime: Some(1_700_000_000),
                },
            },
        ];
        let encoded = encode_object_prop_list(&entries);
        assert_eq!(decode_object_prop_list(&encoded).unwrap(), entries);
    }

    #[test]
    fn empty_prop_list_round_trips() {
        assert_eq!(decode_object_prop_list(&encode_object_prop_list(&[])).unwrap(), Vec::new());
    }

    #[test]
    fn truncated_prop_list_is_rejected() {
        assert_eq!(decode_object_prop_list(&[1, 0, 0, 0]), Err(ObjectInfoDecodeError));
    }

    #[test]
    fn round_trips_a_file_entry() {
        let dataset = ObjectInfoDataset {
            storage_id: 0x0001_0001,
            format: 0x3000,
            parent_handle: Some(7),
            size: 1234,
            name: "photo.jpg".to_string(),
            mtime: Some(1_700_000_000),
        };
        let encoded = encode_object_info(&dataset);
        assert_eq!(decode_object_info(&encoded).unwrap(), dataset);
    }

    #[test]
    fn root_parent_round_trips_to_none() {
        let dataset = ObjectInfoDataset {
            storage_id: 1,
            format: 0x3001,
            parent_handle: None,
            size: 0,
            name: "DCIM".to_string(),
            mtime: None,
        };
        let encoded = encode_object_info(&dataset);
        let decoded = decode_object_info(&encoded).unwrap();
        assert_eq!(decoded.parent_handle, None);
        assert_eq!(decoded.mtime, None);
    }

    #[test]
    fn truncated_dataset_is_rejected() {
        assert_eq!(decode_object_info(&[0u8; 4]), Err(ObjectInfoDecodeError));
    }
}
