//! Fault-injection decorator: wraps any [`TransportLink`] and fires
//! scheduled faults at precise operation/byte boundaries, making the
//! executor's retry and resume paths deterministically testable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::TransportError;
use crate::transport::TransportLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    OpenUsb,
    ClaimInterface,
    BulkOut,
    BulkIn,
    InterruptIn,
    ResetDevice,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultTrigger {
    OnOperation(OperationKind),
    AtCallIndex(u64),
    AtByteOffset(u64),
    /// Fires the first time an intercepted operation happens at least
    /// `Duration` after the decorator was constructed.
    AfterDelay(Duration),
}

/// A value-type fault schedule entry, constructible by tests without going
/// through the decorator itself.
#[derive(Debug, Clone)]
pub struct ScheduledFault {
    pub trigger: FaultTrigger,
    pub error: TransportError,
    pub repeat_count: u32,
    pub label: String,
}

impl ScheduledFault {
    pub fn once(trigger: FaultTrigger, error: TransportError) -> Self {
        Self {
            trigger,
            error,
            repeat_count: 1,
            label: String::new(),
        }
    }
}

#[derive(Default)]
struct Schedule {
    faults: Vec<ScheduledFault>,
}

/// Wraps a [`TransportLink`] and intercepts every call, consulting an
/// internally owned, mutable fault schedule.
pub struct FaultInjectingLink<L: TransportLink> {
    inner: L,
    schedule: Mutex<Schedule>,
    call_counter: AtomicU64,
    created_at: Instant,
}

impl<L: TransportLink> FaultInjectingLink<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            schedule: Mutex::new(Schedule::default()),
            call_counter: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn schedule(&self, fault: ScheduledFault) {
        self.schedule.lock().expect("fault schedule lock poisoned").faults.push(fault);
    }

    pub fn clear_schedule(&self) {
        self.schedule.lock().expect("fault schedule lock poisoned").faults.clear();
    }

    /// Atomically bumps the call counter, scans the schedule in order, and
    /// consumes the first matching fault, returning its error.
    fn intercept(&self, op: OperationKind) -> Option<TransportError> {
        let call_index = self.call_counter.fetch_add(1, Ordering::SeqCst);
        let elapsed = self.created_at.elapsed();
        let mut schedule = self.schedule.lock().expect("fault schedule lock poisoned");

        let matched_index = schedule.faults.iter().position(|fault| match fault.trigger {
            FaultTrigger::OnOperation(kind) => kind == op,
            FaultTrigger::AtCallIndex(index) => index == call_index,
            FaultTrigger::AtByteOffset(_) => false,
            FaultTrigger::AfterDelay(delay) => elapsed >= delay,
        })?;

        let fault = &mut schedule.faults[matched_index];
        let error = fault.error.clone();
        fault.repeat_count -= 1;
        if fault.repeat_count == 0 {
            schedule.faults.remove(matched_index);
        }
        Some(error)
    }

    /// Called from within a streaming handler before the next chunk is
    /// yielded, to let `at_byte_offset` triggers fire mid-transfer.
    pub fn check_byte_offset(&self, offset: u64) -> Option<TransportError> {
        let mut schedule = self.schedule.lock().expect("fault schedule lock poisoned");
        let matched_index = schedule.faults.iter().position(|fault| matches!(fault.trigger, FaultTrigger::AtByteOffset(o) if o == offset))?;

        let fault = &mut schedule.faults[matched_index];
        let error = fault.error.clone();
        fault.repeat_count -= 1;
        if fault.repeat_count == 0 {
            schedule.faults.remove(matched_index);
        }
        Some(error)
    }
}

#[async_trait]
impl<L: TransportLink> TransportLink for FaultInjectingLink<L> {
    async fn open_usb(&mut self) -> Result<(), TransportError> {
        if let Some(err) = self.intercept(OperationKind::OpenUsb) {
            return Err(err);
        }
        self.inner.open_usb().await
    }

    async fn claim_interface(&mut self, interface_number: u8) -> Result<(), TransportError> {
        if let Some(err) = self.intercept(OperationKind::ClaimInterface) {
            return Err(err);
        }
        self.inner.claim_interface(interface_number).await
    }

    async fn bulk_out(&mut self, endpoint: u8, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        if let Some(err) = self.intercept(OperationKind::BulkOut) {
            return Err(err);
        }
        self.inner.bulk_out(endpoint, bytes, timeout).await
    }

    async fn bulk_in(&mut self, endpoint: u8, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if let Some(err) = self.intercept(OperationKind::BulkIn) {
            return Err(err);
        }
        self.inner.bulk_in(endpoint, max_bytes, timeout).await
    }

    async fn interrupt_in(&mut self, endpoint: u8, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if let Some(err) = self.intercept(OperationKind::InterruptIn) {
            return Err(err);
        }
        self.inner.interrupt_in(endpoint, timeout).await
    }

    async fn reset_device(&mut self) -> Result<(), TransportError> {
        if let Some(err) = self.intercept(OperationKind::ResetDevice) {
            return Err(err);
        }
        self.inner.reset_device().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(err) = self.intercept(OperationKind::Close) {
            return Err(err);
        }
        self.inner.close().await
    }

    fn byte_offset_fault(&self, offset: u64) -> Option<TransportError> {
        self.check_byte_offset(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_device::{VirtualDevice, VirtualLink};

    #[tokio::test]
    async fn one_shot_fault_fires_once_then_succeeds() {
        let device = VirtualDevice::phone_profile();
        let link = VirtualLink::new(device);
        let mut faulty = FaultInjectingLink::new(link);

        faulty.schedule(ScheduledFault::once(
            FaultTrigger::OnOperation(OperationKind::BulkIn),
            TransportError::Timeout,
        ));

        faulty.bulk_out(0x02, &[0u8; 12], Duration::from_secs(1)).await.unwrap();
        let first = faulty.bulk_in(0x81, 64, Duration::from_secs(1)).await;
        assert_eq!(first, Err(TransportError::Timeout));

        let second = faulty.bulk_in(0x81, 64, Duration::from_secs(1)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn call_index_trigger_fires_only_at_that_index() {
        let device = VirtualDevice::phone_profile();
        let link = VirtualLink::new(device);
        let mut faulty = FaultInjectingLink::new(link);
        faulty.schedule(ScheduledFault::once(FaultTrigger::AtCallIndex(1), TransportError::Busy));

        assert!(faulty.open_usb().await.is_ok());
        assert_eq!(faulty.claim_interface(0).await, Err(TransportError::Busy));
        assert!(faulty.reset_device().await.is_ok());
    }

    #[tokio::test]
    async fn after_delay_trigger_does_not_fire_before_the_delay_has_elapsed() {
        let device = VirtualDevice::phone_profile();
        let link = VirtualLink::new(device);
        let mut faulty = FaultInjectingLink::new(link);
        faulty.schedule(ScheduledFault::once(FaultTrigger::AfterDelay(Duration::from_secs(3600)), TransportError::AccessDenied));

        assert!(faulty.open_usb().await.is_ok());
        assert!(faulty.claim_interface(0).await.is_ok());
    }

    #[tokio::test]
    async fn after_delay_trigger_fires_once_the_delay_has_elapsed() {
        let device = VirtualDevice::phone_profile();
        let link = VirtualLink::new(device);
        let mut faulty = FaultInjectingLink::new(link);
        faulty.schedule(ScheduledFault::once(FaultTrigger::AfterDelay(Duration::from_millis(10)), TransportError::AccessDenied));

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(faulty.open_usb().await, Err(TransportError::AccessDenied));
        // Consumed: the next call after the fault fired succeeds again.
        assert!(faulty.claim_interface(0).await.is_ok());
    }

    /// Exercises `at_byte_offset` end to end through the real streaming
    /// data-out path, not just `check_byte_offset` in isolation: issues a
    /// `send-object` command carrying a 12-byte payload chunked into 4-byte
    /// pieces, schedules a disconnect at the second chunk, and confirms the
    /// executor actually aborts mid-stream rather than the fault only being
    /// reachable in a unit test of this module. Goes straight at
    /// `SessionExecutor::execute` with a bare `send-object`, skipping
    /// `send-object-info`, so the byte offset counted is unambiguously that
    /// of the file content and not an object-info dataset sharing the same
    /// chunk size.
    #[tokio::test]
    async fn at_byte_offset_trigger_aborts_a_streaming_write_mid_transfer() {
        use crate::codec::OperationCode;
        use crate::device::{DeviceFingerprint, InterfaceTriple};
        use crate::executor::{DataSource, Endpoints, SessionExecutor};
        use crate::policy::{resolve, PolicyOverride, QuirkDatabase};

        struct Chunks<'a> {
            bytes: &'a [u8],
            offset: usize,
            done: bool,
        }

        impl DataSource for Chunks<'_> {
            fn next_chunk(&mut self, max_len: usize) -> Option<Vec<u8>> {
                if self.done {
                    return None;
                }
                if self.offset >= self.bytes.len() {
                    self.done = true;
                    return Some(Vec::new());
                }
                let end = (self.offset + max_len).min(self.bytes.len());
                let chunk = self.bytes[self.offset..end].to_vec();
                self.offset = end;
                if self.offset >= self.bytes.len() {
                    self.done = true;
                }
                Some(chunk)
            }
        }

        let device = VirtualDevice::phone_profile();
        let link = FaultInjectingLink::new(VirtualLink::new(device));
        link.schedule(ScheduledFault::once(FaultTrigger::AtByteOffset(4), TransportError::NoDevice));

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
                class: 0x06,
                subclass: 0x01,
                protocol: 0x01,
            },
            endpoint_in: 0x81,
            endpoint_out: 0x02,
            endpoint_interrupt: Some(0x83),
            device_info_hash: None,
        };
        let mut overrides = PolicyOverride::default();
        overrides.max_chunk_bytes = Some(4);
        let policy = resolve(&fp, &QuirkDatabase::empty(), None, &overrides);

        let executor = SessionExecutor::new(link, endpoints, policy);
        executor.open_usb(0).await.unwrap();
        executor.open_session(Some(1)).await.unwrap();

        let payload = b"hello world!".to_vec(); // 12 bytes, 3 chunks of 4
        let mut source = Chunks {
            bytes: &payload,
            offset: 0,
            done: false,
        };
        let result = executor.execute(OperationCode::SendObject.as_u16(), vec![], Some(&mut source), None, 0).await;
        assert!(matches!(result, Err(crate::error::MtpError::Disconnected)));
    }
}
