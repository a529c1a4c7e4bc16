use std::time::Duration;

use crate::device::DeviceFingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    PreOpenSession,
    PostOpenSession,
    PreTransfer,
    PostTransfer,
    PreCloseSession,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyHook {
    pub phase: HookPhase,
    pub delay: Duration,
}

/// Optional tuning overrides carried by one quirk entry. `None` fields leave
/// the compiled default (or an earlier resolution step's value) untouched.
#[derive(Debug, Clone, Default)]
pub struct TuningOverrides {
    pub max_chunk_bytes: Option<u32>,
    pub io_timeout: Option<Duration>,
    pub handshake_timeout: Option<Duration>,
    pub stabilize_ms: Option<Duration>,
    pub reset_on_open: Option<bool>,
}

/// Optional boolean flag overrides carried by one quirk entry.
#[derive(Debug, Clone, Default)]
pub struct FlagOverrides {
    pub requires_kernel_detach: Option<bool>,
    pub supports_partial_read_64: Option<bool>,
    pub supports_get_object_prop_list: Option<bool>,
    pub prefers_prop_list_enumeration: Option<bool>,
    pub require_stabilization: Option<bool>,
    pub reset_on_open: Option<bool>,
    pub skip_ptp_reset: Option<bool>,
    pub write_to_subfolder_only: Option<bool>,
    pub disable_event_pump: Option<bool>,
    pub preferred_write_folder: Option<String>,
}

/// An optional inclusive range for `bcdDevice` matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BcdRange {
    pub min: u16,
    pub max: u16,
}

impl BcdRange {
    fn contains(self, bcd: u16) -> bool {
        (self.min..=self.max).contains(&bcd)
    }
}

#[derive(Debug, Clone)]
pub struct QuirkEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_range: Option<BcdRange>,
    pub interface_prefix: Option<(u8, Option<u8>, Option<u8>)>,
    pub tuning: TuningOverrides,
    pub flags: FlagOverrides,
    pub hooks: Vec<PolicyHook>,
    pub category: String,
    pub description: String,
}

impl QuirkEntry {
    fn matches(&self, fp: &DeviceFingerprint) -> bool {
        if self.vendor_id != fp.vendor_id || self.product_id != fp.product_id {
            return false;
        }
        if let Some(range) = self.bcd_range {
            match fp.bcd_device {
                Some(bcd) if range.contains(bcd) => {}
                _ => return false,
            }
        }
        if let Some((class, subclass, protocol)) = self.interface_prefix {
            if fp.interface.class != class {
                return false;
            }
            if let Some(subclass) = subclass {
                if fp.interface.subclass != subclass {
                    return false;
                }
            }
            if let Some(protocol) = protocol {
                if fp.interface.protocol != protocol {
                    return false;
                }
            }
        }
        true
    }

    /// Yields `(field_name, value)` pairs for every flag this entry sets,
    /// letting policy resolution apply them generically.
    pub(super) fn flag_overrides(&self) -> Vec<(&'static str, bool)> {
        let mut out = Vec::new();
        macro_rules! push {
            ($field:ident) => {
                if let Some(v) = self.flags.$field {
                    out.push((stringify!($field), v));
                }
            };
        }
        push!(requires_kernel_detach);
        push!(supports_partial_read_64);
        push!(supports_get_object_prop_list);
        push!(prefers_prop_list_enumeration);
        push!(require_stabilization);
        push!(reset_on_open);
        push!(skip_ptp_reset);
        push!(write_to_subfolder_only);
        push!(disable_event_pump);
        out
    }
}

/// An ordered, immutable-at-runtime sequence of quirk entries. Order breaks
/// ties when more than one entry would otherwise match.
#[derive(Debug, Clone, Default)]
pub struct QuirkDatabase {
    entries: Vec<QuirkEntry>,
}

impl QuirkDatabase {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(entries: Vec<QuirkEntry>) -> Self {
        Self { entries }
    }

    /// At most one entry matches; database order breaks ties among entries
    /// that would otherwise match equally.
    pub fn match_fingerprint(&self, fp: &DeviceFingerprint) -> Option<&QuirkEntry> {
        self.entries.iter().find(|entry| entry.matches(fp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::InterfaceTriple;

    fn fingerprint() -> DeviceFingerprint {
        DeviceFingerprint {
            vendor_id: 0x04e8,
            product_id: 0x6860,
            bcd_device: Some(0x0110),
            interface: InterfaceTriple {
                class: 0x06,
                subclass: 0x01,
                protocol: 0x01,
            },
            endpoint_in: 0x81,
            endpoint_out: 0x02,
            endpoint_interrupt: Some(0x83),
            device_info_hash: None,
        }
    }

    fn entry() -> QuirkEntry {
        QuirkEntry {
            vendor_id: 0x04e8,
            product_id: 0x6860,
            bcd_range: Some(BcdRange { min: 0x0100, max: 0x0200 }),
            interface_prefix: Some((0x06, None, None)),
            tuning: TuningOverrides {
                max_chunk_bytes: Some(32 * 1024),
                ..Default::default()
            },
            flags: FlagOverrides::default(),
            hooks: Vec::new(),
            category: "camera".to_string(),
            description: "slow bulk endpoint on early firmware".to_string(),
        }
    }

    #[test]
    fn matches_exact_vid_pid_and_bcd_range() {
        let db = QuirkDatabase::new(vec![entry()]);
        assert!(db.match_fingerprint(&fingerprint()).is_some());
    }

    #[test]
    fn does_not_match_outside_bcd_range() {
        let mut fp = fingerprint();
        fp.bcd_device = Some(0x0300);
        let db = QuirkDatabase::new(vec![entry()]);
        assert!(db.match_fingerprint(&fp).is_none());
    }

    #[test]
    fn does_not_match_different_product_id() {
        let mut fp = fingerprint();
        fp.product_id = 0x0001;
        let db = QuirkDatabase::new(vec![entry()]);
        assert!(db.match_fingerprint(&fp).is_none());
    }

    #[test]
    fn first_matching_entry_wins_on_ties() {
        let mut first = entry();
        first.category = "first".to_string();
        let mut second = entry();
        second.category = "second".to_string();
        let db = QuirkDatabase::new(vec![first, second]);
        assert_eq!(db.match_fingerprint(&fingerprint()).unwrap().category, "first");
    }
}
