//! Session executor: the MTP command/data/response cycle over a transport
//! link, with the single in-flight transaction invariant.
//!
//! A data-in phase here is read as exactly one `bulk_in` container: this
//! layer does not itself split a large data phase across multiple bulk-in
//! reads. That's safe because every data-in call this crate issues already
//! bounds its own data phase to one chunk at a time via the opcode
//! parameters (`get-partial-object[-64]`'s length parameter, a whole-object
//! read capped by the device's response) — chunking a multi-chunk read into
//! several transactions is [`crate::facade::DeviceFacade`]'s job, not this
//! one's. A future transport that can legitimately split one data phase
//! across multiple bulk-in reads would need `drain_data_in_chunks` widened
//! to a loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::Mutex;

use crate::codec::{Container, ContainerType, ResponseCode};
use crate::error::{MtpError, ProtocolError, TransportError};
use crate::policy::DevicePolicy;
use crate::transport::TransportLink;

/// Per-session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Closed,
    UsbReady,
    Open { session_id: u32, next_txid: u32 },
}

/// A handler invoked once per received chunk during a data-in phase.
pub trait DataSink: Send {
    fn on_chunk(&mut self, chunk: &[u8]);
}

impl<F: FnMut(&[u8]) + Send> DataSink for F {
    fn on_chunk(&mut self, chunk: &[u8]) {
        self(chunk)
    }
}

/// Supplies chunks for a data-out phase. Returning `None` ends the phase.
pub trait DataSource: Send {
    fn next_chunk(&mut self, max_len: usize) -> Option<Vec<u8>>;
}

/// Result of one executed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub code: ResponseCode,
    pub params: Vec<u32>,
}

const OPEN_SESSION_OPCODE: u16 = 0x1002;
const CLOSE_SESSION_OPCODE: u16 = 0x1003;

/// Endpoint triple resolved for the claimed interface.
#[derive(Debug, Clone, Copy)]
pub struct Endpoints {
    pub bulk_in: u8,
    pub bulk_out: u8,
    pub interrupt_in: Option<u8>,
}

struct Inner<L: TransportLink> {
    link: L,
    state: SessionState,
    endpoints: Endpoints,
}

/// Serializes all access to one [`TransportLink`] for the lifetime of a
/// session, enforcing at most one transaction in flight. Concurrent callers
/// queue on the internal mutex in FIFO order.
pub struct SessionExecutor<L: TransportLink> {
    inner: Mutex<Inner<L>>,
    request_counter: AtomicU64,
    policy: DevicePolicy,
}

impl<L: TransportLink> SessionExecutor<L> {
    pub fn new(link: L, endpoints: Endpoints, policy: DevicePolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                link,
                state: SessionState::Closed,
                endpoints,
            }),
            request_counter: AtomicU64::new(0),
            policy,
        }
    }

    pub fn policy(&self) -> &DevicePolicy {
        &self.policy
    }

    /// `closed --openUSB/claimInterface--> usb-ready`.
    pub async fn open_usb(&self, interface_number: u8) -> Result<(), MtpError> {
        let mut inner = self.inner.lock().await;
        inner.link.open_usb().await?;
        inner.link.claim_interface(interface_number).await?;
        inner.state = SessionState::UsbReady;
        if !self.policy.tuning.post_claim_stabilize.is_zero() {
            tokio::time::sleep(self.policy.tuning.post_claim_stabilize).await;
        }
        Ok(())
    }

    /// `usb-ready --openSession(id)--> open(session-id, next-txid=1)`.
    pub async fn open_session(&self, session_id: Option<u32>) -> Result<(), MtpError> {
        let session_id = session_id.unwrap_or(1).max(1);
        let req_id = self.next_request_id();
        debug!("MTP open-session [req#{req_id}]: session_id={session_id}");

        {
            let inner = self.inner.lock().await;
            if !matches!(inner.state, SessionState::UsbReady) {
                return Err(MtpError::PreconditionFailed {
                    message: "open_session called outside usb-ready state".to_string(),
                });
            }
        }

        if self.policy.flags.reset_on_open {
            self.execute_with_retry(OPEN_SESSION_OPCODE, vec![], None, None, 0, true).await?;
        }

        let response = self
            .execute_with_retry(OPEN_SESSION_OPCODE, vec![session_id], None, None, 1, true)
            .await?;

        if !response.code.is_ok() {
            return Err(ProtocolError {
                code: response.code,
                message: "open-session rejected".to_string(),
            }
            .into());
        }

        let mut inner = self.inner.lock().await;
        inner.state = SessionState::Open {
            session_id,
            next_txid: 1,
        };
        if !self.policy.tuning.post_open_stabilize.is_zero() {
            drop(inner);
            tokio::time::sleep(self.policy.tuning.post_open_stabilize).await;
        }
        Ok(())
    }

    /// `open --closeSession--> usb-ready`. Idempotent: closing twice is a no-op.
    pub async fn close_session(&self) -> Result<(), MtpError> {
        {
            let inner = self.inner.lock().await;
            if !matches!(inner.state, SessionState::Open { .. }) {
                return Ok(());
            }
        }
        let _ = self.execute(CLOSE_SESSION_OPCODE, vec![], None, None::<&mut dyn DataSink>, 0).await;
        let mut inner = self.inner.lock().await;
        inner.state = SessionState::UsbReady;
        Ok(())
    }

    /// Any state `--close()--> closed`.
    pub async fn close(&self) -> Result<(), MtpError> {
        let mut inner = self.inner.lock().await;
        let _ = inner.link.close().await;
        inner.state = SessionState::Closed;
        Ok(())
    }

    /// Executes one opcode with no data phase, applying the policy's
    /// retry/back-off rules for retryable failures.
    pub async fn execute(
        &self,
        opcode: u16,
        params: Vec<u32>,
        data_out: Option<&mut dyn DataSource>,
        data_in: Option<&mut dyn DataSink>,
        data_phase_length: u64,
    ) -> Result<CommandResponse, MtpError> {
        self.execute_with_retry(opcode, params, data_out, data_in, data_phase_length, false)
            .await
    }

    async fn execute_with_retry(
        &self,
        opcode: u16,
        params: Vec<u32>,
        mut data_out: Option<&mut dyn DataSource>,
        mut data_in: Option<&mut dyn DataSink>,
        data_phase_length: u64,
        is_handshake: bool,
    ) -> Result<CommandResponse, MtpError> {
        let req_id = self.next_request_id();
        let max_retries = 3u32;
        let mut attempt = 0u32;
        let mut delay = Duration::from_millis(50);

        loop {
            trace!("MTP execute [req#{req_id}]: opcode=0x{opcode:04x} attempt={attempt}");
            let result = self
                .execute_once(opcode, &params, data_out.as_deref_mut(), data_in.as_deref_mut(), data_phase_length, is_handshake)
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(ExecError::Transport(e)) if e.is_fatal() => {
                    self.close().await.ok();
                    return Err(e.into());
                }
                Err(ExecError::Transport(e)) if e.is_retryable() && attempt < max_retries => {
                    warn!("MTP execute [req#{req_id}]: retryable error {e}, attempt {attempt}");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    continue;
                }
                Err(ExecError::Transport(e)) => return Err(e.into()),
                Err(ExecError::Protocol(e)) if matches!(e.code, ResponseCode::DeviceBusy) && attempt < max_retries => {
                    warn!("MTP execute [req#{req_id}]: device busy, attempt {attempt}");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    continue;
                }
                Err(ExecError::Protocol(e)) => return Err(e.into()),
                Err(ExecError::Mtp(e)) => return Err(e),
            }
        }
    }

    async fn execute_once(
        &self,
        opcode: u16,
        params: &[u32],
        data_out: Option<&mut dyn DataSource>,
        data_in: Option<&mut dyn DataSink>,
        data_phase_length: u64,
        is_handshake: bool,
    ) -> Result<CommandResponse, ExecError> {
        let mut inner = self.inner.lock().await;

        let txid = match &mut inner.state {
            SessionState::Closed => {
                return Err(ExecError::Mtp(MtpError::NotConnected));
            }
            SessionState::UsbReady => {
                if !is_handshake {
                    return Err(ExecError::Mtp(MtpError::NotConnected));
                }
                0
            }
            SessionState::Open { next_txid, .. } => {
                let txid = *next_txid;
                *next_txid = next_txid.wrapping_add(1);
                txid
            }
        };

        let io_timeout = if is_handshake {
            self.policy.tuning.handshake_timeout
        } else {
            self.policy.tuning.io_timeout
        };

        let command = Container::command(opcode, txid, params.to_vec());
        inner
            .link
            .bulk_out(inner.endpoints.bulk_out, &command.encode(), io_timeout)
            .await
            .map_err(ExecError::Transport)?;

        if let Some(source) = data_out {
            self.stream_data_out(&mut inner, opcode, txid, source, io_timeout).await?;
        }

        let header = self.read_container(&mut inner, io_timeout).await?;

        let (response_container, response) = match header.kind {
            ContainerType::Data => {
                if let Some(sink) = data_in {
                    self.drain_data_in_chunks(&inner, &header, sink)?;
                }
                // `data_phase_length` (the caller's expected total) isn't
                // checked against `header.payload.len()` here: this executor
                // always reads one data container per phase rather than
                // streaming several bulk-in reads into it (see the module
                // doc note above `stream_data_out`), so chunking a data-in
                // phase into policy-sized pieces is the façade's job when it
                // issues successive partial-object reads, not this layer's.
                let response_header = self.read_container(&mut inner, io_timeout).await?;
                (response_header.clone(), response_header)
            }
            ContainerType::Response => (header.clone(), header),
            other => {
                return Err(ExecError::Mtp(MtpError::MalformedContainer.tag_with(format!("unexpected container kind {other:?}"))));
            }
        };

        if response.transaction_id != txid {
            return Err(ExecError::Mtp(MtpError::Protocol {
                code: 0,
                message: format!("txid mismatch: sent {txid}, got {}", response.transaction_id),
            }));
        }

        let code = ResponseCode::from_u16(response_container.code);
        if !code.is_ok() {
            return Err(ExecError::Protocol(ProtocolError {
                code,
                message: format!("opcode 0x{opcode:04x} rejected"),
            }));
        }

        Ok(CommandResponse {
            code,
            params: response_container.params,
        })
    }

    async fn stream_data_out(
        &self,
        inner: &mut Inner<L>,
        opcode: u16,
        txid: u32,
        source: &mut dyn DataSource,
        timeout: Duration,
    ) -> Result<(), ExecError> {
        let chunk_size = self.policy.tuning.max_chunk_bytes as usize;
        let mut first = true;
        let mut offset: u64 = 0;
        while let Some(chunk) = source.next_chunk(chunk_size) {
            if let Some(err) = inner.link.byte_offset_fault(offset) {
                return Err(ExecError::Transport(err));
            }
            offset += chunk.len() as u64;
            let bytes = if first {
                first = false;
                Container::data(opcode, txid, chunk).encode()
            } else {
                chunk
            };
            inner
                .link
                .bulk_out(inner.endpoints.bulk_out, &bytes, timeout)
                .await
                .map_err(ExecError::Transport)?;
        }
        Ok(())
    }

    /// Checks the byte-offset fault schedule at the start of this data-in
    /// phase before handing its payload to `sink`. The payload arrives as a
    /// single container (see the module doc note on streaming data-in), so
    /// there is exactly one offset — 0 — at which a fault can fire for this
    /// phase; a multi-container data-in phase would check again per
    /// container at its cumulative offset.
    fn drain_data_in_chunks(&self, inner: &Inner<L>, data_container: &Container, sink: &mut dyn DataSink) -> Result<(), ExecError> {
        if let Some(err) = inner.link.byte_offset_fault(0) {
            return Err(ExecError::Transport(err));
        }
        sink.on_chunk(&data_container.payload);
        Ok(())
    }

    async fn read_container(&self, inner: &mut Inner<L>, timeout: Duration) -> Result<Container, ExecError> {
        let max_read = self.policy.tuning.max_chunk_bytes as usize + crate::codec::HEADER_LEN;
        let bytes = inner
            .link
            .bulk_in(inner.endpoints.bulk_in, max_read, timeout)
            .await
            .map_err(ExecError::Transport)?;
        Container::decode(&bytes).map_err(|_| ExecError::Mtp(MtpError::MalformedContainer))
    }

    fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Reads one event container off the interrupt-in endpoint for the
    /// façade's event pump. Contends with in-flight command transactions
    /// for the same link mutex, preserving single ownership of the link
    /// rather than opening a second channel to the device.
    pub async fn poll_event(&self, timeout: Duration) -> Result<Vec<u8>, MtpError> {
        let mut inner = self.inner.lock().await;
        let endpoint = inner.endpoints.interrupt_in.ok_or_else(|| MtpError::NotSupported {
            operation: "event pump (no interrupt-in endpoint)".to_string(),
        })?;
        inner.link.interrupt_in(endpoint, timeout).await.map_err(MtpError::from)
    }
}

impl MtpError {
    fn tag_with(self, detail: String) -> Self {
        match self {
            Self::MalformedContainer => Self::Other { message: detail },
            other => other,
        }
    }
}

enum ExecError {
    Transport(TransportError),
    Protocol(ProtocolError),
    Mtp(MtpError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{resolve, PolicyOverride, QuirkDatabase};
    use crate::virtual_device::{VirtualDevice, VirtualLink};

    fn default_policy() -> DevicePolicy {
        let db = QuirkDatabase::empty();
        let fp = crate::device::DeviceFingerprint {
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
        };
        resolve(&fp, &db, None, &PolicyOverride::default())
    }

    #[tokio::test]
    async fn open_session_transitions_to_open_and_txids_increment() {
        let device = VirtualDevice::phone_profile();
        let link = VirtualLink::new(device);
        let endpoints = Endpoints {
            bulk_in: 0x81,
            bulk_out: 0x02,
            interrupt_in: Some(0x83),
        };
        let executor = SessionExecutor::new(link, endpoints, default_policy());

        executor.open_usb(0).await.unwrap();
        executor.open_session(Some(1)).await.unwrap();

        let r1 = executor.execute(0x1004, vec![], None, None, 0).await.unwrap();
        let r2 = executor.execute(0x1004, vec![], None, None, 0).await.unwrap();
        assert!(r1.code.is_ok());
        assert!(r2.code.is_ok());
    }

    #[tokio::test]
    async fn close_session_is_idempotent() {
        let device = VirtualDevice::phone_profile();
        let link = VirtualLink::new(device);
        let endpoints = Endpoints {
            bulk_in: 0x81,
            bulk_out: 0x02,
            interrupt_in: Some(0x83),
        };
        let executor = SessionExecutor::new(link, endpoints, default_policy());
        executor.open_usb(0).await.unwrap();
        executor.open_session(Some(1)).await.unwrap();

        executor.close_session().await.unwrap();
        executor.close_session().await.unwrap();
    }

    #[tokio::test]
    async fn executing_before_session_open_fails() {
        let device = VirtualDevice::phone_profile();
        let link = VirtualLink::new(device);
        let endpoints = Endpoints {
            bulk_in: 0x81,
            bulk_out: 0x02,
            interrupt_in: Some(0x83),
        };
        let executor = SessionExecutor::new(link, endpoints, default_policy());
        let result = executor.execute(0x1004, vec![], None, None, 0).await;
        assert!(matches!(result, Err(MtpError::NotConnected)));
    }
}
