//! Device-policy resolution: fingerprint + quirk database -> effective tuning.

mod quirks;

pub use quirks::{HookPhase, PolicyHook, QuirkDatabase, QuirkEntry};

use std::collections::HashMap;
use std::time::Duration;

use crate::device::DeviceFingerprint;

/// Where one field of a resolved [`DevicePolicy`] came from, for probe-receipt
/// provenance auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSource {
    Default,
    ClassHeuristic,
    Quirk,
    Learned,
    Probe,
    Override,
}

impl FieldSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::ClassHeuristic => "class-heuristic",
            Self::Quirk => "quirk",
            Self::Learned => "learned",
            Self::Probe => "probe",
            Self::Override => "override",
        }
    }
}

/// Numeric parameters governing session behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveTuning {
    pub max_chunk_bytes: u32,
    pub io_timeout: Duration,
    pub handshake_timeout: Duration,
    pub inactivity_timeout: Duration,
    pub overall_deadline: Duration,
    pub post_claim_stabilize: Duration,
    pub post_open_stabilize: Duration,
    pub reset_on_open: bool,
    pub disable_event_pump: bool,
}

impl Default for EffectiveTuning {
    /// Conservative compiled defaults: short chunks, long timeouts, no
    /// advanced ops assumed.
    fn default() -> Self {
        Self {
            max_chunk_bytes: 64 * 1024,
            io_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(15),
            inactivity_timeout: Duration::from_secs(20),
            overall_deadline: Duration::from_secs(300),
            post_claim_stabilize: Duration::from_millis(250),
            post_open_stabilize: Duration::from_millis(250),
            reset_on_open: false,
            disable_event_pump: false,
        }
    }
}

/// Boolean capability assertions and policy switches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuirkFlags {
    pub requires_kernel_detach: bool,
    pub supports_partial_read_64: bool,
    pub supports_get_object_prop_list: bool,
    pub prefers_prop_list_enumeration: bool,
    pub require_stabilization: bool,
    pub reset_on_open: bool,
    pub skip_ptp_reset: bool,
    pub write_to_subfolder_only: bool,
    pub disable_event_pump: bool,
    pub preferred_write_folder: Option<String>,
}

/// Resolved, immutable configuration for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePolicy {
    pub tuning: EffectiveTuning,
    pub flags: QuirkFlags,
    pub hooks: Vec<PolicyHook>,
    pub sources: HashMap<&'static str, FieldSource>,
}

/// Numeric nudges derived from prior probe receipts for one fingerprint.
/// Populated by the probe engine across sessions; absent on first contact.
#[derive(Debug, Clone, Copy, Default)]
pub struct LearnedProfile {
    pub optimal_chunk_bytes: Option<u32>,
    pub optimal_io_timeout_ms: Option<u64>,
    pub success_rate: Option<f64>,
}

/// A success rate below this threshold forces conservative tuning
/// regardless of other learned nudges.
const LOW_SUCCESS_RATE_THRESHOLD: f64 = 0.5;

/// Explicit, caller-supplied overrides layered on last.
#[derive(Debug, Clone, Default)]
pub struct PolicyOverride {
    pub max_chunk_bytes: Option<u32>,
    pub io_timeout: Option<Duration>,
    pub disable_event_pump: Option<bool>,
}

/// Resolves a device policy for `fingerprint` from `db`, `learned`, and
/// `overrides`, layering compiled defaults, a USB-class heuristic, a quirk
/// match, the learned profile, and explicit overrides in that order. Pure
/// and deterministic: identical inputs always produce an identical policy.
pub fn resolve(
    fingerprint: &DeviceFingerprint,
    db: &QuirkDatabase,
    learned: Option<&LearnedProfile>,
    overrides: &PolicyOverride,
) -> DevicePolicy {
    let mut tuning = EffectiveTuning::default();
    let mut flags = QuirkFlags::default();
    let mut hooks = Vec::new();
    let mut sources: HashMap<&'static str, FieldSource> = HashMap::new();

    for field in [
        "max_chunk_bytes",
        "io_timeout",
        "handshake_timeout",
        "inactivity_timeout",
        "overall_deadline",
        "post_claim_stabilize",
        "post_open_stabilize",
        "reset_on_open",
        "disable_event_pump",
        "requires_kernel_detach",
        "supports_partial_read_64",
        "supports_get_object_prop_list",
        "prefers_prop_list_enumeration",
        "require_stabilization",
        "skip_ptp_reset",
        "write_to_subfolder_only",
        "preferred_write_folder",
    ] {
        sources.insert(field, FieldSource::Default);
    }

    // Step 2: class heuristic.
    if fingerprint.interface.class == 0x06 {
        flags.supports_get_object_prop_list = true;
        flags.requires_kernel_detach = false;
        sources.insert("supports_get_object_prop_list", FieldSource::ClassHeuristic);
        sources.insert("requires_kernel_detach", FieldSource::ClassHeuristic);
    }

    // Step 3: matched quirk entry.
    if let Some(entry) = db.match_fingerprint(fingerprint) {
        if let Some(chunk) = entry.tuning.max_chunk_bytes {
            tuning.max_chunk_bytes = chunk;
            sources.insert("max_chunk_bytes", FieldSource::Quirk);
        }
        if let Some(timeout) = entry.tuning.io_timeout {
            tuning.io_timeout = timeout;
            sources.insert("io_timeout", FieldSource::Quirk);
        }
        if let Some(timeout) = entry.tuning.handshake_timeout {
            tuning.handshake_timeout = timeout;
            sources.insert("handshake_timeout", FieldSource::Quirk);
        }
        if let Some(stabilize) = entry.tuning.stabilize_ms {
            tuning.post_claim_stabilize = stabilize;
            tuning.post_open_stabilize = stabilize;
            sources.insert("post_claim_stabilize", FieldSource::Quirk);
            sources.insert("post_open_stabilize", FieldSource::Quirk);
        }
        if let Some(reset) = entry.tuning.reset_on_open {
            tuning.reset_on_open = reset;
            sources.insert("reset_on_open", FieldSource::Quirk);
        }

        for (flag_field, value) in entry.flag_overrides() {
            apply_flag_override(&mut flags, flag_field, value);
            sources.insert(flag_field, FieldSource::Quirk);
        }
        if let Some(folder) = &entry.flags.preferred_write_folder {
            flags.preferred_write_folder = Some(folder.clone());
            sources.insert("preferred_write_folder", FieldSource::Quirk);
        }

        hooks.extend(entry.hooks.iter().cloned());
    }

    // Step 4: learned-profile numeric nudges.
    if let Some(profile) = learned {
        let conservative = profile.success_rate.is_some_and(|r| r < LOW_SUCCESS_RATE_THRESHOLD);
        if conservative {
            tuning.max_chunk_bytes = tuning.max_chunk_bytes.min(EffectiveTuning::default().max_chunk_bytes);
            tuning.io_timeout = tuning.io_timeout.max(EffectiveTuning::default().io_timeout);
            sources.insert("max_chunk_bytes", FieldSource::Learned);
            sources.insert("io_timeout", FieldSource::Learned);
        } else {
            if let Some(chunk) = profile.optimal_chunk_bytes {
                tuning.max_chunk_bytes = chunk;
                sources.insert("max_chunk_bytes", FieldSource::Learned);
            }
            if let Some(timeout_ms) = profile.optimal_io_timeout_ms {
                tuning.io_timeout = Duration::from_millis(timeout_ms);
                sources.insert("io_timeout", FieldSource::Learned);
            }
        }
    }

    // Step 5: explicit caller override, last writer wins.
    if let Some(chunk) = overrides.max_chunk_bytes {
        tuning.max_chunk_bytes = chunk;
        sources.insert("max_chunk_bytes", FieldSource::Override);
    }
    if let Some(timeout) = overrides.io_timeout {
        tuning.io_timeout = timeout;
        sources.insert("io_timeout", FieldSource::Override);
    }
    if let Some(disable) = overrides.disable_event_pump {
        flags.disable_event_pump = disable;
        tuning.disable_event_pump = disable;
        sources.insert("disable_event_pump", FieldSource::Override);
    }

    DevicePolicy {
        tuning,
        flags,
        hooks,
        sources,
    }
}

fn apply_flag_override(flags: &mut QuirkFlags, field: &str, value: bool) {
    match field {
        "requires_kernel_detach" => flags.requires_kernel_detach = value,
        "supports_partial_read_64" => flags.supports_partial_read_64 = value,
        "supports_get_object_prop_list" => flags.supports_get_object_prop_list = value,
        "prefers_prop_list_enumeration" => flags.prefers_prop_list_enumeration = value,
        "require_stabilization" => flags.require_stabilization = value,
        "reset_on_open" => flags.reset_on_open = value,
        "skip_ptp_reset" => flags.skip_ptp_reset = value,
        "write_to_subfolder_only" => flags.write_to_subfolder_only = value,
        "disable_event_pump" => flags.disable_event_pump = value,
        other => unreachable!("unknown quirk flag field {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::InterfaceTriple;

    fn fingerprint(class: u8) -> DeviceFingerprint {
        DeviceFingerprint {
            vendor_id: 0x04e8,
            product_id: 0x6860,
            bcd_device: None,
            interface: InterfaceTriple {
                class,
                subclass: 0x01,
                protocol: 0x01,
            },
            endpoint_in: 0x81,
            endpoint_out: 0x02,
            endpoint_interrupt: Some(0x83),
            device_info_hash: None,
        }
    }

    #[test]
    fn class_heuristic_applies_for_ptp_still_image_class() {
        let db = QuirkDatabase::empty();
        let policy = resolve(&fingerprint(0x06), &db, None, &PolicyOverride::default());

        assert!(policy.flags.supports_get_object_prop_list);
        assert!(!policy.flags.requires_kernel_detach);
        assert_eq!(policy.sources["supports_get_object_prop_list"], FieldSource::ClassHeuristic);
        assert_eq!(policy.sources["requires_kernel_detach"], FieldSource::ClassHeuristic);
    }

    #[test]
    fn vendor_specific_class_keeps_conservative_defaults() {
        let db = QuirkDatabase::empty();
        let policy = resolve(&fingerprint(0xff), &db, None, &PolicyOverride::default());

        assert!(!policy.flags.supports_get_object_prop_list);
        assert_eq!(policy.sources["supports_get_object_prop_list"], FieldSource::Default);
        assert_eq!(policy.sources["requires_kernel_detach"], FieldSource::Default);
    }

    #[test]
    fn resolve_is_deterministic() {
        let db = QuirkDatabase::empty();
        let a = resolve(&fingerprint(0x06), &db, None, &PolicyOverride::default());
        let b = resolve(&fingerprint(0x06), &db, None, &PolicyOverride::default());
        assert_eq!(a, b);
    }

    #[test]
    fn explicit_override_beats_everything_else() {
        let db = QuirkDatabase::empty();
        let overrides = PolicyOverride {
            max_chunk_bytes: Some(4096),
            ..Default::default()
        };
        let policy = resolve(&fingerprint(0x06), &db, None, &overrides);
        assert_eq!(policy.tuning.max_chunk_bytes, 4096);
        assert_eq!(policy.sources["max_chunk_bytes"], FieldSource::Override);
    }

    #[test]
    fn low_success_rate_forces_conservative_tuning_even_with_optimal_nudge() {
        let db = QuirkDatabase::empty();
        let learned = LearnedProfile {
            optimal_chunk_bytes: Some(1024 * 1024),
            optimal_io_timeout_ms: Some(500),
            success_rate: Some(0.1),
        };
        let policy = resolve(&fingerprint(0x06), &db, Some(&learned), &PolicyOverride::default());
        assert!(policy.tuning.max_chunk_bytes <= EffectiveTuning::default().max_chunk_bytes);
        assert!(policy.tuning.io_timeout >= EffectiveTuning::default().io_timeout);
    }
}
