use std::collections::BTreeMap;

use crate::codec::{encode_object_info, write_mtp_string, write_u32_array, ObjectInfoDataset};

use super::ROOT_HANDLE;

#[derive(Debug, Clone)]
pub struct VirtualStorage {
    pub id: u32,
    pub description: String,
    pub capacity: u64,
    pub free: u64,
    pub read_only: bool,
}

impl VirtualStorage {
    /// Encodes a simplified storage-info record: description, then capacity,
    /// free bytes, and the read-only flag. Not a byte-exact PTP
    /// `StorageInfo` dataset (that also carries storage/filesystem type
    /// enums this reference device doesn't model) but internally consistent
    /// for round-trip tests against this same virtual device.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_mtp_string(&mut buf, &self.description);
        buf.extend_from_slice(&self.capacity.to_le_bytes());
        buf.extend_from_slice(&self.free.to_le_bytes());
        buf.push(self.read_only as u8);
        buf
    }
}

/// Format code marking a folder/association.
pub const FORMAT_ASSOCIATION: u16 = 0x3001;

#[derive(Debug, Clone)]
pub struct VirtualObject {
    pub handle: u32,
    pub parent: Option<u32>,
    pub storage_id: u32,
    pub name: String,
    pub format: u16,
    pub data: Vec<u8>,
    pub mtime: Option<i64>,
}

impl VirtualObject {
    pub fn is_folder(&self) -> bool {
        self.format == FORMAT_ASSOCIATION
    }

    pub fn encode_info(&self) -> Vec<u8> {
        encode_object_info(&ObjectInfoDataset {
            storage_id: self.storage_id,
            format: self.format,
            parent_handle: self.parent,
            size: if self.is_folder() { 0 } else { self.data.len() as u64 },
            name: self.name.clone(),
            mtime: self.mtime,
        })
    }
}

/// Which preset corpus a [`VirtualDevice`] was built from, kept for
/// quirk-resolver regression tests that compare behavior across profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    Phone,
    Camera,
    MediaPlayer,
}

#[derive(Debug, Clone)]
pub struct VirtualDevice {
    pub profile: DeviceProfile,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub storages: Vec<VirtualStorage>,
    pub objects: BTreeMap<u32, VirtualObject>,
    next_handle: u32,
}

impl VirtualDevice {
    fn empty(profile: DeviceProfile, manufacturer: &str, model: &str, storage_id: u32, capacity: u64) -> Self {
        Self {
            profile,
            manufacturer: manufacturer.to_string(),
            model: model.to_string(),
            serial_number: Some("VIRTUAL-0001".to_string()),
            storages: vec![VirtualStorage {
                id: storage_id,
                description: "Internal storage".to_string(),
                capacity,
                free: capacity,
                read_only: false,
            }],
            objects: BTreeMap::new(),
            next_handle: 1,
        }
    }

    pub fn phone_profile() -> Self {
        Self::empty(DeviceProfile::Phone, "Example Mobile", "Pixel-like Phone", 0x0001_0001, 64 * 1024 * 1024 * 1024)
    }

    pub fn camera_profile() -> Self {
        Self::empty(DeviceProfile::Camera, "Example Optics", "Mirrorless Z1", 0x0002_0001, 32 * 1024 * 1024 * 1024)
    }

    pub fn media_player_profile() -> Self {
        Self::empty(DeviceProfile::MediaPlayer, "Example Audio", "Clip Player 8GB", 0x0003_0001, 8 * 1024 * 1024 * 1024)
    }

    pub fn encode_device_info(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_mtp_string(&mut buf, &self.manufacturer);
        write_mtp_string(&mut buf, &self.model);
        write_mtp_string(&mut buf, self.serial_number.as_deref().unwrap_or(""));
        write_u32_array(
            &mut buf,
            &[
                0x1001, 0x1002, 0x1003, 0x1004, 0x1005, 0x1007, 0x1008, 0x1009, 0x100b, 0x100c, 0x100d, 0x1019, 0x101b, 0x9804, 0x9805, 0x95c1,
                0x95c4,
            ],
        );
        buf
    }

    /// Inserts an object and returns its newly minted handle. `parent` must
    /// already exist (checked by the caller / the link's `SendObjectInfo`
    /// handling); handles are minted in increasing order and never reused
    /// within one `VirtualDevice` instance.
    pub fn create_object(&mut self, storage_id: u32, parent: Option<u32>, name: String, data: Vec<u8>, declared_size: u64) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        let format = if declared_size == 0 && data.is_empty() && name.ends_with('/') {
            FORMAT_ASSOCIATION
        } else {
            0x3000 // undefined binary file, good enough for a reference device
        };
        self.objects.insert(
            handle,
            VirtualObject {
                handle,
                parent,
                storage_id,
                name,
                format,
                data,
                mtime: None,
            },
        );
        handle
    }

    /// Mints a handle without inserting an object yet, for callers that must
    /// hand the handle back to the caller before the object's bytes have
    /// arrived (`send-object-info` precedes `send-object`).
    pub fn alloc_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    pub fn insert_object_with_handle(&mut self, handle: u32, storage_id: u32, parent: Option<u32>, name: String, format: u16, data: Vec<u8>) {
        self.objects.insert(
            handle,
            VirtualObject {
                handle,
                parent,
                storage_id,
                name,
                format,
                data,
                mtime: None,
            },
        );
    }

    pub fn create_folder(&mut self, storage_id: u32, parent: Option<u32>, name: String) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.objects.insert(
            handle,
            VirtualObject {
                handle,
                parent,
                storage_id,
                name,
                format: FORMAT_ASSOCIATION,
                data: Vec::new(),
                mtime: None,
            },
        );
        handle
    }

    /// Deletes `handle` and, if it is a folder, its entire subtree. Returns
    /// `false` if `handle` does not exist.
    pub fn delete_recursive(&mut self, handle: u32) -> bool {
        if !self.objects.contains_key(&handle) {
            return false;
        }
        let children: Vec<u32> = self
            .objects
            .values()
            .filter(|o| o.parent == Some(handle))
            .map(|o| o.handle)
            .collect();
        for child in children {
            self.delete_recursive(child);
        }
        self.objects.remove(&handle);
        true
    }

    pub fn children_of(&self, storage_id: u32, parent: Option<u32>) -> Vec<&VirtualObject> {
        self.objects
            .values()
            .filter(|o| o.storage_id == storage_id && o.parent == parent)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_folder_then_list_parent_shows_exactly_one_entry() {
        let mut device = VirtualDevice::phone_profile();
        let storage_id = device.storages[0].id;
        device.create_folder(storage_id, None, "DCIM".to_string());

        let children = device.children_of(storage_id, None);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "DCIM");
    }

    #[test]
    fn delete_object_removes_its_entire_subtree() {
        let mut device = VirtualDevice::phone_profile();
        let storage_id = device.storages[0].id;
        let folder = device.create_folder(storage_id, None, "DCIM".to_string());
        device.create_object(storage_id, Some(folder), "a.jpg".to_string(), vec![1, 2, 3], 3);
        device.create_object(storage_id, Some(folder), "b.jpg".to_string(), vec![4, 5, 6], 3);

        assert!(device.delete_recursive(folder));
        assert!(device.children_of(storage_id, None).is_empty());
        assert_eq!(device.objects.len(), 0);
    }

    #[test]
    fn deleting_an_unknown_handle_reports_failure() {
        let mut device = VirtualDevice::phone_profile();
        assert!(!device.delete_recursive(9999));
    }
}
