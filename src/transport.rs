//! # Printer Transport Layer
//!
//! The protocol core never talks to a radio directly. It writes frames through
//! a [`FrameWriter`] and receives notification frames from a [`Link`], which
//! a [`Connector`] hands out for a named device.
//!
//! ## Available Transports
//!
//! - `ble`: Bluetooth LE through btleplug (cargo feature `ble`)

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;

/// Stream of raw notification frames from the status channel.
pub type NotificationStream = mpsc::UnboundedReceiver<Vec<u8>>;

/// Fire-and-forget write to the command channel.
///
/// A successful return means the frame left the host, not that the printer
/// received it. Failures are reported as [`Error::Transport`].
#[async_trait]
pub trait FrameWriter: Send + Sync {
    async fn write(&self, frame: &[u8]) -> Result<(), Error>;
}

#[async_trait]
impl<W: FrameWriter + ?Sized> FrameWriter for Arc<W> {
    async fn write(&self, frame: &[u8]) -> Result<(), Error> {
        (**self).write(frame).await
    }
}

/// A live connection to one printer.
#[async_trait]
pub trait Link: Send {
    /// Name of the connected device, for logging.
    fn name(&self) -> &str;

    /// Printable width of the device in pixels.
    fn printable_width(&self) -> u32;

    /// Resolve the command and status channels, returning the command writer.
    async fn resolve_channels(&mut self) -> Result<Arc<dyn FrameWriter>, Error>;

    /// Start notifications on the status channel.
    async fn subscribe(&mut self) -> Result<NotificationStream, Error>;

    async fn unsubscribe(&mut self) -> Result<(), Error>;

    async fn disconnect(&mut self) -> Result<(), Error>;
}

/// Opens [`Link`]s to printers by name.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, device: &str) -> Result<Box<dyn Link>, Error>;
}
