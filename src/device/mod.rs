//! Device identity, fingerprinting, and the stable/ephemeral id registry.

mod fingerprint;
mod info;
mod registry;

pub use fingerprint::{DeviceFingerprint, InterfaceTriple};
pub use info::DeviceInfo;
pub use registry::DeviceRegistry;

/// The id the link layer addresses a device by: encodes the current USB
/// bus/address and changes on every re-plug.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EphemeralId(pub String);

impl EphemeralId {
    pub fn from_bus_address(bus: u8, address: u8) -> Self {
        Self(format!("usb-{bus}-{address}"))
    }
}

/// The id the index, journal, and domain mappings key on: stable across
/// re-plugs of the same physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StableId(pub String);

impl StableId {
    /// Deterministic from VID:PID plus the USB serial, when the device
    /// reports one. Devices that omit a serial fall back to a host-assigned
    /// UUID minted once and persisted by the registry.
    pub fn from_vid_pid_serial(vid: u16, pid: u16, serial: &str) -> Self {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        vid.hash(&mut hasher);
        pid.hash(&mut hasher);
        serial.hash(&mut hasher);
        Self(format!("{vid:04x}:{pid:04x}:{:016x}", hasher.finish()))
    }

    pub fn host_assigned() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for StableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_id_from_serial_is_deterministic() {
        let a = StableId::from_vid_pid_serial(0x04e8, 0x6860, "ABC123");
        let b = StableId::from_vid_pid_serial(0x04e8, 0x6860, "ABC123");
        assert_eq!(a, b);
    }

    #[test]
    fn different_serials_produce_different_stable_ids() {
        let a = StableId::from_vid_pid_serial(0x04e8, 0x6860, "ABC123");
        let b = StableId::from_vid_pid_serial(0x04e8, 0x6860, "XYZ789");
        assert_ne!(a, b);
    }

    #[test]
    fn host_assigned_ids_are_unique() {
        assert_ne!(StableId::host_assigned(), StableId::host_assigned());
    }
}
