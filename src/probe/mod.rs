//! Probe engine: interface ranking, session establishment with retry,
//! capability detection, and fallback-ladder resolution.

use std::time::{Duration, Instant};

use log::warn;

use crate::codec::{decode_device_info, OperationCode};
use crate::device::DeviceInfo;
use crate::error::MtpError;
use crate::executor::SessionExecutor;
use crate::policy::DevicePolicy;
use crate::transport::TransportLink;

/// One USB interface's descriptor, as enumerated by the caller before a
/// [`TransportLink`] is bound to it.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoint_in: Option<u8>,
    pub endpoint_out: Option<u8>,
    pub endpoint_interrupt: Option<u8>,
}

impl InterfaceDescriptor {
    fn has_three_endpoints(&self) -> bool {
        self.endpoint_in.is_some() && self.endpoint_out.is_some() && self.endpoint_interrupt.is_some()
    }
}

/// PTP still-image class per the USB still image class spec.
const PTP_CLASS: u8 = 0x06;
const PTP_SUBCLASS: u8 = 0x01;
const PTP_PROTOCOL: u8 = 0x01;
const VENDOR_SPECIFIC_CLASS: u8 = 0xff;
const MASS_STORAGE_CLASS: u8 = 0x08;

fn score_interface(iface: &InterfaceDescriptor) -> u32 {
    if iface.class == MASS_STORAGE_CLASS {
        return 0;
    }
    if iface.class == PTP_CLASS && iface.subclass == PTP_SUBCLASS && iface.protocol == PTP_PROTOCOL {
        return 10;
    }
    if iface.class == VENDOR_SPECIFIC_CLASS && iface.has_three_endpoints() {
        return 12;
    }
    0
}

#[derive(Debug, Clone, Copy)]
pub struct InterfaceAttempt {
    pub number: u8,
    pub score: u32,
    pub endpoints_validated: bool,
}

/// Scores every candidate interface and returns the one to claim, along with
/// the full ranking for the probe receipt. Ties break in favor of the
/// interface whose endpoint descriptors validate.
pub fn rank_interfaces(interfaces: &[InterfaceDescriptor]) -> (Option<InterfaceDescriptor>, Vec<InterfaceAttempt>) {
    let attempts: Vec<InterfaceAttempt> = interfaces
        .iter()
        .map(|iface| InterfaceAttempt {
            number: iface.number,
            score: score_interface(iface),
            endpoints_validated: iface.has_three_endpoints(),
        })
        .collect();

    let best = interfaces
        .iter()
        .zip(attempts.iter())
        .filter(|(_, attempt)| attempt.score > 0)
        .max_by_key(|(_, attempt)| (attempt.score, attempt.endpoints_validated))
        .map(|(iface, _)| *iface);

    (best, attempts)
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOpenAttempt {
    pub succeeded: bool,
    pub required_retry: bool,
    pub duration: Duration,
}

/// Opens the USB interface and establishes a session, retrying on a busy
/// response up to `max_retries` times with the policy's stabilization delay
/// between attempts. A session-open failure after all retries is fatal; an
/// interface-claim failure here is left to the caller, which should try the
/// next-ranked interface.
pub async fn establish_session<L: TransportLink>(
    executor: &SessionExecutor<L>,
    interface_number: u8,
    max_retries: u32,
) -> Result<SessionOpenAttempt, MtpError> {
    let started = Instant::now();
    executor.open_usb(interface_number).await?;

    let mut attempt = 0u32;
    let mut required_retry = false;
    loop {
        match executor.open_session(Some(1)).await {
            Ok(()) => {
                return Ok(SessionOpenAttempt {
                    succeeded: true,
                    required_retry,
                    duration: started.elapsed(),
                });
            }
            Err(MtpError::DeviceBusy) if attempt < max_retries => {
                warn!("probe: session open busy, retrying (attempt {attempt})");
                required_retry = true;
                attempt += 1;
                tokio::time::sleep(executor.policy().tuning.post_open_stabilize).await;
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DetectedCapabilities {
    pub partial_object_32: bool,
    pub partial_object_64: bool,
    pub send_partial_object: bool,
    pub object_prop_list: bool,
}

const OP_GET_PARTIAL_OBJECT: u16 = 0x101b;
const OP_GET_PARTIAL_OBJECT_64: u16 = 0x95c4;
const OP_SEND_PARTIAL_OBJECT: u16 = 0x95c1;
const OP_GET_OBJECT_PROP_LIST: u16 = 0x9805;

/// Inspects `device_info.operations_supported` for the optional opcodes the
/// fallback ladders choose between. A live, low-cost verification probe
/// (e.g. issuing a zero-length
/// get-partial-object-64) is left to the façade, which has an object handle
/// to probe against; this step is the static half that always applies.
pub fn detect_capabilities(device_info: &DeviceInfo) -> DetectedCapabilities {
    DetectedCapabilities {
        partial_object_32: device_info.supports_operation(OP_GET_PARTIAL_OBJECT),
        partial_object_64: device_info.supports_operation(OP_GET_PARTIAL_OBJECT_64),
        send_partial_object: device_info.supports_operation(OP_SEND_PARTIAL_OBJECT),
        object_prop_list: device_info.supports_operation(OP_GET_OBJECT_PROP_LIST),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationStrategy {
    PropList,
    HandlesThenInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    Partial64,
    Partial32,
    WholeObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    Partial,
    WholeObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackLadder {
    pub enumeration: EnumerationStrategy,
    pub read: ReadStrategy,
    pub write: WriteStrategy,
}

/// Chooses the first supported variant of each ladder.
pub fn resolve_fallback_ladder(capabilities: &DetectedCapabilities, policy: &DevicePolicy) -> FallbackLadder {
    let enumeration = if policy.flags.prefers_prop_list_enumeration && capabilities.object_prop_list {
        EnumerationStrategy::PropList
    } else {
        EnumerationStrategy::HandlesThenInfo
    };

    let read = if capabilities.partial_object_64 {
        ReadStrategy::Partial64
    } else if capabilities.partial_object_32 {
        ReadStrategy::Partial32
    } else {
        ReadStrategy::WholeObject
    };

    let write = if capabilities.send_partial_object {
        WriteStrategy::Partial
    } else {
        WriteStrategy::WholeObject
    };

    FallbackLadder { enumeration, read, write }
}

/// Aggregated probe outcome, persisted under the stable device id for
/// diagnostics and to refine the learned profile.
#[derive(Debug, Clone)]
pub struct ProbeReceipt {
    pub timestamp: i64,
    pub interface_attempts: Vec<InterfaceAttempt>,
    pub session_open: SessionOpenAttempt,
    pub capabilities: DetectedCapabilities,
    pub write_capability_confirmed: Option<bool>,
    pub ladder: FallbackLadder,
}

impl ProbeReceipt {
    /// Records the result of the façade's create-then-delete write probe
    /// (§3 "Write-capability probing"). Left unset by [`run_probe`] itself,
    /// since that step needs an open storage and a façade to issue the
    /// mkdir/delete pair through.
    pub fn with_write_capability(mut self, confirmed: bool) -> Self {
        self.write_capability_confirmed = Some(confirmed);
        self
    }
}

/// Runs interface ranking, session establishment, device-info fetch,
/// capability detection, and fallback-ladder resolution end to end,
/// assembling the result into a [`ProbeReceipt`]. `timestamp` is a
/// caller-supplied Unix-epoch seconds value, since this crate never calls
/// a wall-clock function itself (callers own that decision, e.g. for
/// reproducible probe replay in tests).
pub async fn run_probe<L: TransportLink>(
    executor: &SessionExecutor<L>,
    interfaces: &[InterfaceDescriptor],
    policy: &DevicePolicy,
    max_retries: u32,
    timestamp: i64,
) -> Result<ProbeReceipt, MtpError> {
    let (best, interface_attempts) = rank_interfaces(interfaces);
    let chosen = best.ok_or(MtpError::NotSupported {
        operation: "no PTP/MTP-capable interface found on this device".to_string(),
    })?;

    let session_open = establish_session(executor, chosen.number, max_retries).await?;

    let mut buf = Vec::new();
    let response = executor
        .execute(OperationCode::GetDeviceInfo.as_u16(), vec![], None, Some(&mut |chunk: &[u8]| buf.extend_from_slice(chunk)), 0)
        .await?;
    if !response.code.is_ok() {
        return Err(MtpError::Protocol {
            code: response.code.as_u16(),
            message: "device refused get-device-info during probe".to_string(),
        });
    }
    let device_info = decode_device_info(&buf).map_err(|_| MtpError::MalformedContainer)?;

    let capabilities = detect_capabilities(&device_info);
    let ladder = resolve_fallback_ladder(&capabilities, policy);

    Ok(ProbeReceipt {
        timestamp,
        interface_attempts,
        session_open,
        capabilities,
        write_capability_confirmed: None,
        ladder,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(number: u8, class: u8, subclass: u8, protocol: u8, three_endpoints: bool) -> InterfaceDescriptor {
        InterfaceDescriptor {
            number,
            class,
            subclass,
            protocol,
            endpoint_in: Some(0x81),
            endpoint_out: Some(0x02),
            endpoint_interrupt: if three_endpoints { Some(0x83) } else { None },
        }
    }

    #[test]
    fn ptp_still_image_class_outranks_vendor_specific_without_interrupt_endpoint() {
        let interfaces = vec![iface(0, VENDOR_SPECIFIC_CLASS, 0, 0, false), iface(1, PTP_CLASS, PTP_SUBCLASS, PTP_PROTOCOL, true)];
        let (best, _) = rank_interfaces(&interfaces);
        assert_eq!(best.unwrap().number, 1);
    }

    #[test]
    fn vendor_specific_with_three_endpoints_outranks_ptp_still_image() {
        let interfaces = vec![iface(0, PTP_CLASS, PTP_SUBCLASS, PTP_PROTOCOL, true), iface(1, VENDOR_SPECIFIC_CLASS, 0, 0, true)];
        let (best, _) = rank_interfaces(&interfaces);
        assert_eq!(best.unwrap().number, 1);
    }

    #[test]
    fn mass_storage_interfaces_are_always_skipped() {
        let interfaces = vec![iface(0, MASS_STORAGE_CLASS, 0, 0, true)];
        let (best, attempts) = rank_interfaces(&interfaces);
        assert!(best.is_none());
        assert_eq!(attempts[0].score, 0);
    }

    #[test]
    fn fallback_ladder_prefers_highest_capability_variant() {
        let capabilities = DetectedCapabilities {
            partial_object_32: true,
            partial_object_64: true,
            send_partial_object: true,
            object_prop_list: true,
        };
        let mut policy_fixture = crate::policy::resolve(
            &crate::device::DeviceFingerprint {
                vendor_id: 0x04e8,
                product_id: 0x6860,
                bcd_device: None,
                interface: crate::device::InterfaceTriple {
                    class: 0x06,
                    subclass: 0x01,
                    protocol: 0x01,
                },
                endpoint_in: 0x81,
                endpoint_out: 0x02,
                endpoint_interrupt: Some(0x83),
                device_info_hash: None,
            },
            &crate::policy::QuirkDatabase::empty(),
            None,
            &crate::policy::PolicyOverride::default(),
        );
        policy_fixture.flags.prefers_prop_list_enumeration = true;

        let ladder = resolve_fallback_ladder(&capabilities, &policy_fixture);
        assert_eq!(ladder.enumeration, EnumerationStrategy::PropList);
        assert_eq!(ladder.read, ReadStrategy::Partial64);
        assert_eq!(ladder.write, WriteStrategy::Partial);
    }

    #[tokio::test]
    async fn run_probe_assembles_a_receipt_from_a_virtual_device() {
        use crate::device::{DeviceFingerprint, InterfaceTriple};
        use crate::executor::Endpoints;
        use crate::policy::{resolve, PolicyOverride, QuirkDatabase};
        use crate::virtual_device::{VirtualDevice, VirtualLink};

        let device = VirtualDevice::phone_profile();
        let link = VirtualLink::new(device);
        let endpoints = Endpoints {
            bulk_in: 0x81,
            bulk_out: 0x02,
            interrupt_in: Some(0x83),
        };
        let fp = DeviceFingerprint {
            vendor_id: 0x04e8,
            product_id: 0x6860,
            bcd_device: None,
            interface: InterfaceTriple {
                class: PTP_CLASS,
                subclass: PTP_SUBCLASS,
                protocol: PTP_PROTOCOL,
            },
            endpoint_in: 0x81,
            endpoint_out: 0x02,
            endpoint_interrupt: Some(0x83),
            device_info_hash: None,
        };
        let policy = resolve(&fp, &QuirkDatabase::empty(), None, &PolicyOverride::default());
        let executor = SessionExecutor::new(link, endpoints, policy);

        let interfaces = vec![iface(0, PTP_CLASS, PTP_SUBCLASS, PTP_PROTOCOL, true)];
        let receipt = run_probe(&executor, &interfaces, executor.policy(), 3, 1_700_000_000).await.unwrap();

        assert!(receipt.session_open.succeeded);
        assert_eq!(receipt.interface_attempts.len(), 1);
        assert!(receipt.write_capability_confirmed.is_none());

        let receipt = receipt.with_write_capability(true);
        assert_eq!(receipt.write_capability_confirmed, Some(true));
    }

    #[test]
    fn fallback_ladder_degrades_when_capabilities_are_absent() {
        let capabilities = DetectedCapabilities::default();
        let policy = crate::policy::resolve(
            &crate::device::DeviceFingerprint {
                vendor_id: 0x04e8,
                product_id: 0x6860,
                bcd_device: None,
                interface: crate::device::InterfaceTriple {
                    class: 0xff,
                    subclass: 0,
                    protocol: 0,
                },
                endpoint_in: 0x81,
                endpoint_out: 0x02,
                endpoint_interrupt: Some(0x83),
                device_info_hash: None,
            },
            &crate::policy::QuirkDatabase::empty(),
            None,
            &crate::policy::PolicyOverride::default(),
        );
        let ladder = resolve_fallback_ladder(&capabilities, &policy);
        assert_eq!(ladder.enumeration, EnumerationStrategy::HandlesThenInfo);
        assert_eq!(ladder.read, ReadStrategy::WholeObject);
        assert_eq!(ladder.write, WriteStrategy::WholeObject);
    }
}
