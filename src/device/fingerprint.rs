/// USB interface class/subclass/protocol triple, used both for PTP/MTP
/// interface ranking (`probe::rank_interface`) and as part of the quirk
/// match key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceTriple {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// Identifies a device for quirk matching. Captured once at first probe and
/// never mutated afterward.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceFingerprint {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: Option<u16>,
    pub interface: InterfaceTriple,
    pub endpoint_in: u8,
    pub endpoint_out: u8,
    pub endpoint_interrupt: Option<u8>,
    pub device_info_hash: Option<u64>,
}
