//! Real USB transport backed by `nusb`. Feature-gated behind `usb` so the
//! core builds and tests without touching hardware.

use std::time::Duration;

use async_trait::async_trait;
use nusb::transfer::{Direction, EndpointType};
use nusb::{Device, Interface};

use crate::error::TransportError;
use crate::transport::TransportLink;

pub struct UsbLink {
    device: Device,
    interface: Option<Interface>,
}

impl UsbLink {
    pub fn new(device: Device) -> Self {
        Self { device, interface: None }
    }

    fn interface(&mut self) -> Result<&mut Interface, TransportError> {
        self.interface.as_mut().ok_or(TransportError::NoDevice)
    }
}

#[async_trait]
impl TransportLink for UsbLink {
    async fn open_usb(&mut self) -> Result<(), TransportError> {
        // `nusb::Device` is already open on construction; nothing to do but
        // confirm it is still reachable.
        self.device
            .active_configuration()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }

    async fn claim_interface(&mut self, interface_number: u8) -> Result<(), TransportError> {
        let interface = self
            .device
            .claim_interface(interface_number)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.interface = Some(interface);
        Ok(())
    }

    async fn bulk_out(&mut self, endpoint: u8, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        let interface = self.interface()?;
        let fut = interface.bulk_out(endpoint, bytes.to_vec());
        let completion = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| TransportError::Timeout)?;
        completion.status.map_err(map_transfer_error)?;
        Ok(())
    }

    async fn bulk_in(&mut self, endpoint: u8, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let interface = self.interface()?;
        let buffer = nusb::transfer::RequestBuffer::new(max_bytes);
        let fut = interface.bulk_in(endpoint, buffer);
        let completion = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| TransportError::Timeout)?;
        completion.status.map_err(map_transfer_error)?;
        Ok(completion.data)
    }

    async fn interrupt_in(&mut self, endpoint: u8, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let interface = self.interface()?;
        let buffer = nusb::transfer::RequestBuffer::new(64);
        let fut = interface.interrupt_in(endpoint, buffer);
        let completion = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| TransportError::Timeout)?;
        completion.status.map_err(map_transfer_error)?;
        Ok(completion.data)
    }

    async fn reset_device(&mut self) -> Result<(), TransportError> {
        self.device.reset().map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.interface = None;
        Ok(())
    }
}

fn map_transfer_error(e: nusb::transfer::TransferError) -> TransportError {
    use nusb::transfer::TransferError as E;
    match e {
        E::Cancelled => TransportError::Timeout,
        E::Stall => TransportError::Stall,
        E::Disconnected => TransportError::NoDevice,
        other => TransportError::Io(other.to_string()),
    }
}

/// Selects the bulk-in/out/interrupt endpoints for a claimed interface by
/// walking its descriptor, matching the probe engine's expectation that a
/// PTP/MTP interface exposes exactly these three endpoint types.
pub fn endpoint_addresses(interface: &nusb::InterfaceInfo) -> Option<(u8, u8, Option<u8>)> {
    let mut bulk_in = None;
    let mut bulk_out = None;
    let mut interrupt_in = None;

    for descriptor in interface.endpoints() {
        match (descriptor.transfer_type(), descriptor.direction()) {
            (EndpointType::Bulk, Direction::In) => bulk_in = Some(descriptor.address()),
            (EndpointType::Bulk, Direction::Out) => bulk_out = Some(descriptor.address()),
            (EndpointType::Interrupt, Direction::In) => interrupt_in = Some(descriptor.address()),
            _ => {}
        }
    }

    Some((bulk_in?, bulk_out?, interrupt_in))
}
