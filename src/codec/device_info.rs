//! DeviceInfo and StorageInfo dataset codec: the payloads carried by
//! `get-device-info` and `get-storage-info`'s data-in phases.
//!
//! Same simplified-dataset philosophy as [`super::object_info`]: this client
//! only ever inspects manufacturer/model/serial and the supported-operations
//! set, so that is all this decodes. Storage type and filesystem type enums
//! from the full PTP `StorageInfo` dataset aren't modeled either, since the
//! façade only needs capacity, free space, and the read-only flag.

use std::collections::HashSet;

use super::arrays::read_u32_array;
use super::strings::read_mtp_string;
use crate::device::DeviceInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfoDecodeError;

/// Decodes a `get-device-info` data payload produced by a device (or, in
/// tests, by `VirtualDevice::encode_device_info`): manufacturer string,
/// model string, serial number string, then a u32 array of supported
/// operation codes. Fields the full PTP dataset carries but this client
/// never reads (device version string, events/properties/formats arrays)
/// are left empty rather than guessed at.
pub fn decode_device_info(bytes: &[u8]) -> Result<DeviceInfo, DeviceInfoDecodeError> {
    let (manufacturer, consumed) = read_mtp_string(bytes).map_err(|_| DeviceInfoDecodeError)?;
    let mut offset = consumed;

    let (model, consumed) = read_mtp_string(&bytes[offset..]).map_err(|_| DeviceInfoDecodeError)?;
    offset += consumed;

    let (serial, consumed) = read_mtp_string(&bytes[offset..]).map_err(|_| DeviceInfoDecodeError)?;
    offset += consumed;

    let (operations, _consumed) = read_u32_array(&bytes[offset..]).map_err(|_| DeviceInfoDecodeError)?;
    let operations_supported: HashSet<u16> = operations.into_iter().map(|op| op as u16).collect();

    Ok(DeviceInfo {
        manufacturer,
        model,
        device_version: String::new(),
        serial_number: if serial.is_empty() { None } else { Some(serial) },
        operations_supported,
        events_supported: HashSet::new(),
        object_properties_supported: HashSet::new(),
        supported_storage_types: HashSet::new(),
        supported_format_codes: HashSet::new(),
        supported_capture_formats: HashSet::new(),
    })
}

/// Storage-info data, as returned by `get-storage-info` and cached by the
/// façade alongside each storage id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub description: String,
    pub capacity: u64,
    pub free: u64,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageInfoDecodeError;

/// Decodes a `get-storage-info` data payload produced by a device (or, in
/// tests, by `VirtualStorage::encode`): description string, capacity (u64
/// LE), free bytes (u64 LE), read-only flag (u8).
pub fn decode_storage_info(bytes: &[u8]) -> Result<StorageInfo, StorageInfoDecodeError> {
    let (description, consumed) = read_mtp_string(bytes).map_err(|_| StorageInfoDecodeError)?;
    let rest = &bytes[consumed..];
    if rest.len() < 8 + 8 + 1 {
        return Err(StorageInfoDecodeError);
    }
    let capacity = u64::from_le_bytes(rest[0..8].try_into().unwrap());
    let free = u64::from_le_bytes(rest[8..16].try_into().unwrap());
    let read_only = rest[16] != 0;

    Ok(StorageInfo { description, capacity, free, read_only })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_device::VirtualDevice;

    #[test]
    fn round_trips_the_virtual_devices_phone_profile() {
        let device = VirtualDevice::phone_profile();
        let encoded = device.encode_device_info();
        let decoded = decode_device_info(&encoded).unwrap();

        assert_eq!(decoded.manufacturer, device.manufacturer);
        assert_eq!(decoded.model, device.model);
        assert_eq!(decoded.serial_number, device.serial_number);
        assert!(decoded.supports_operation(0x1001));
        assert!(decoded.supports_operation(0x100d));
        assert!(!decoded.supports_operation(0x9999));
    }

    #[test]
    fn round_trips_the_virtual_devices_storage() {
        let device = VirtualDevice::camera_profile();
        let storage = &device.storages[0];
        let encoded = storage.encode();
        let decoded = decode_storage_info(&encoded).unwrap();

        assert_eq!(decoded.description, storage.description);
        assert_eq!(decoded.capacity, storage.capacity);
        assert_eq!(decoded.free, storage.free);
        assert_eq!(decoded.read_only, storage.read_only);
    }

    #[test]
    fn truncated_device_info_is_rejected() {
        assert_eq!(decode_device_info(&[0u8; 2]), Err(DeviceInfoDecodeError));
    }

    #[test]
    fn truncated_storage_info_is_rejected() {
        assert_eq!(decode_storage_info(&[0u8]), Err(StorageInfoDecodeError));
    }
}
