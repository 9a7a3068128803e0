//! Component A — the USB transport.
//!
//! Wraps a `rusb` device handle behind four typed operations and maps
//! libusb errors onto this crate's [`Error`] taxonomy. No retries happen
//! here; retry policy is entirely [`crate::protocol`]'s job.

use std::time::Duration;

use rusb::{DeviceHandle, GlobalContext};

use crate::error::Error;

/// Bulk-IN endpoint used for flash reads and burner log drain.
pub const ENDPOINT_BULK_IN: u8 = 0x81;
/// Bulk-OUT endpoint used for stage uploads and flash writes.
pub const ENDPOINT_BULK_OUT: u8 = 0x01;
/// Interrupt-IN endpoint (unused by the documented flows, kept for completeness).
pub const ENDPOINT_INTERRUPT_IN: u8 = 0x80;
/// Interrupt-OUT endpoint (unused by the documented flows, kept for completeness).
pub const ENDPOINT_INTERRUPT_OUT: u8 = 0x00;

/// Direction of a control transfer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    In,
    Out,
}

/// `bmRequestType` values for the vendor requests this protocol uses.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RequestType {
    /// Vendor request, device recipient, device-to-host (0xC0).
    VendorIn,
    /// Vendor request, device recipient, host-to-device (0x40).
    VendorOut,
    /// Vendor request, interface recipient, device-to-host (0xC1) — fallback form.
    VendorInInterface,
    /// Vendor request, interface recipient, host-to-device (0x41) — fallback form.
    VendorOutInterface,
}

impl RequestType {
    fn bits(self) -> u8 {
        match self {
            RequestType::VendorIn => 0xC0,
            RequestType::VendorOut => 0x40,
            RequestType::VendorInInterface => 0xC1,
            RequestType::VendorOutInterface => 0x41,
        }
    }

    /// Swaps a device-recipient request type for its interface-recipient
    /// counterpart, used by the §4.C device→interface fallback rule. Returns
    /// `None` for request types that are already interface-scoped.
    pub fn as_interface_fallback(self) -> Option<RequestType> {
        match self {
            RequestType::VendorIn => Some(RequestType::VendorInInterface),
            RequestType::VendorOut => Some(RequestType::VendorOutInterface),
            _ => None,
        }
    }

    fn direction(self) -> Direction {
        match self {
            RequestType::VendorIn | RequestType::VendorInInterface => Direction::In,
            RequestType::VendorOut | RequestType::VendorOutInterface => Direction::Out,
        }
    }
}

/// The result of a transfer: how many bytes actually moved.
pub type TransferResult = Result<usize, Error>;

/// Abstraction over a USB device handle, exposing exactly the four transfer
/// shapes the vendor protocol needs. Implemented by [`UsbTransport`] for
/// real hardware and by test-only mock transports for the scenarios in
/// spec §8.
pub trait Transport {
    fn control(
        &self,
        request_type: RequestType,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> TransferResult;

    fn bulk_out(&self, endpoint: u8, buffer: &[u8], timeout: Duration) -> TransferResult;

    fn bulk_in(&self, endpoint: u8, buffer: &mut [u8], timeout: Duration) -> TransferResult;

    fn interrupt(&self, endpoint: u8, buffer: &mut [u8], timeout: Duration) -> TransferResult;
}

/// A `Transport` backed by a real, open libusb device handle.
pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
}

impl UsbTransport {
    pub fn new(handle: DeviceHandle<GlobalContext>) -> Self {
        UsbTransport { handle }
    }

    pub fn handle(&self) -> &DeviceHandle<GlobalContext> {
        &self.handle
    }

    pub fn into_handle(self) -> DeviceHandle<GlobalContext> {
        self.handle
    }

    /// Maps a raw libusb outcome into this crate's `Error`/byte-count
    /// convention. `rusb`'s safe wrappers don't surface a partial transfer
    /// count alongside a `Timeout` error, so the real transport always
    /// reports 0 bytes transferred on timeout; the "timeout but complete"
    /// quirk in §4.A/§7 is fully exercised against mock transports in
    /// tests, which can report an arbitrary count.
    fn finish(result: rusb::Result<usize>, _requested_len: usize) -> TransferResult {
        match result {
            Ok(n) => Ok(n),
            Err(rusb::Error::Timeout) => Err(Error::Timeout {
                bytes_transferred: 0,
            }),
            Err(e) => Err(Error::Usb(e)),
        }
    }
}

impl Transport for UsbTransport {
    fn control(
        &self,
        request_type: RequestType,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> TransferResult {
        let bits = request_type.bits();
        let len = buffer.len();

        let result = match request_type.direction() {
            Direction::In => self
                .handle
                .read_control(bits, request, value, index, buffer, timeout),
            Direction::Out => self
                .handle
                .write_control(bits, request, value, index, buffer, timeout),
        };

        Self::finish(result, len)
    }

    fn bulk_out(&self, endpoint: u8, buffer: &[u8], timeout: Duration) -> TransferResult {
        let result = self.handle.write_bulk(endpoint, buffer, timeout);
        Self::finish(result, buffer.len())
    }

    fn bulk_in(&self, endpoint: u8, buffer: &mut [u8], timeout: Duration) -> TransferResult {
        let len = buffer.len();
        let result = self.handle.read_bulk(endpoint, buffer, timeout);
        Self::finish(result, len)
    }

    fn interrupt(&self, endpoint: u8, buffer: &mut [u8], timeout: Duration) -> TransferResult {
        let len = buffer.len();
        let result = if endpoint & 0x80 != 0 {
            self.handle.read_interrupt(endpoint, buffer, timeout)
        } else {
            self.handle.write_interrupt(endpoint, buffer, timeout)
        };

        Self::finish(result, len)
    }
}
