//! The transport link contract: an external collaborator the session
//! executor drives but does not implement by default. The real
//! implementation lives behind the `usb` feature; [`crate::virtual_device`]
//! supplies the one used in tests.

#[cfg(feature = "usb")]
mod usb_link;

#[cfg(feature = "usb")]
pub use usb_link::UsbLink;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// Asynchronous bulk-in/out/interrupt channel to one USB interface.
///
/// Not required to be `Sync`: the session executor is the sole owner and
/// never shares a link across concurrent callers.
#[async_trait]
pub trait TransportLink: Send {
    async fn open_usb(&mut self) -> Result<(), TransportError>;
    async fn claim_interface(&mut self, interface_number: u8) -> Result<(), TransportError>;
    async fn bulk_out(&mut self, endpoint: u8, bytes: &[u8], timeout: Duration) -> Result<(), TransportError>;
    async fn bulk_in(&mut self, endpoint: u8, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;
    async fn interrupt_in(&mut self, endpoint: u8, timeout: Duration) -> Result<Vec<u8>, TransportError>;
    async fn reset_device(&mut self) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Consulted by the session executor before each chunk of a streaming
    /// data-out/data-in phase, at the cumulative byte offset reached so far
    /// within that phase. The default implementation never injects a fault;
    /// [`crate::fault::FaultInjectingLink`] overrides it to check its
    /// `at_byte_offset` fault schedule.
    fn byte_offset_fault(&self, _offset: u64) -> Option<TransportError> {
        None
    }
}
