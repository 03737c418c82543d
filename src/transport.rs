//! USB transport collaborator seam
//!
//! The bridge core is transport-agnostic: packet framing, endpoint
//! scheduling and the actual host/device role hardware live behind the
//! [`UsbTransport`] trait. Control transfers complete asynchronously; the
//! bridge issues exactly one at a time per role.

use async_trait::async_trait;

use crate::midi::RawPacket;

/// Which USB role an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The device-facing side presented to the DAW host
    Host,
    /// The host-facing side driving the attached controller
    Controller,
}

/// Failure of a USB transfer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    #[error("transfer failed")]
    Failed,
    #[error("endpoint stalled")]
    Stalled,
    #[error("device {0} no longer attached")]
    DeviceGone(u8),
}

/// Outcome of a control transfer: the raw bytes read, or why it failed.
pub type TransferResult = Result<Vec<u8>, TransferError>;

/// Operations the surrounding process provides to the bridge core.
///
/// Implementations use interior mutability; all methods take `&self` so the
/// transport can be shared between the two poll loops behind an `Arc`.
#[async_trait]
pub trait UsbTransport: Send + Sync {
    /// Non-blocking read of one incoming packet on the given role.
    fn try_read_packet(&self, role: Role) -> Option<RawPacket>;

    /// Queue one outgoing packet on the given role.
    fn write_packet(&self, role: Role, packet: RawPacket) -> Result<(), TransferError>;

    /// Push any queued outgoing packets onto the wire.
    fn flush(&self, role: Role);

    /// Fetch the 18-byte device descriptor from the attached controller.
    async fn fetch_device_descriptor(&self, addr: u8) -> TransferResult;

    /// Fetch `len` bytes of the controller's configuration descriptor.
    async fn fetch_configuration_descriptor(&self, addr: u8, len: u16) -> TransferResult;

    /// Fetch a string descriptor. Index 0 with langid 0 returns the
    /// supported language id list.
    async fn fetch_string_descriptor(&self, addr: u8, index: u8, langid: u16) -> TransferResult;

    /// String descriptor indices the transport's class driver needs exposed
    /// to the DAW (per-jack names and the like), in presentation order.
    fn class_string_indices(&self, addr: u8) -> Vec<u8>;
}
