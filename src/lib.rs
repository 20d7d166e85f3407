//! Cat Printer Driver
//!
//! This crate drives the small 384 dot thermal "cat" printers (GB01, GB02,
//! MX06, ...) over Bluetooth LE.
//!
//! # Example
//!
//! ```rust,no_run
//! use kitty_print::{Config, Connector, JobPlan, PrintSession, TwoTonePixelBuffer, BLANK};
//!
//! # async fn run(connector: &dyn Connector) -> Result<(), kitty_print::Error> {
//! let config = Config::new("GB02".to_string()).speed(32).energy(24_000);
//! let strip = TwoTonePixelBuffer::new(384, 2, vec![BLANK; 384 * 2])?;
//! let plan: JobPlan = vec![strip].into_iter().collect();
//!
//! let session = PrintSession::new(config);
//! let report = session.print(connector, plan).await?;
//! println!("{} rows drawn", report.rows_drawn);
//! # Ok(())
//! # }
//! ```
//!
//! With the `ble` feature, `BleConnector` finds and connects to printers.
//! Everything else works against any [`Connector`] implementation.

mod bitmap;
#[cfg(feature = "ble")]
mod ble;
pub mod command;
mod error;
mod model;
mod protocol;
mod session;
mod status;
mod transport;

pub use crate::{
    bitmap::{pack, row_pitch, unpack, PackedRow, TwoTonePixelBuffer, BLANK, INK},
    error::{Error, ErrorCategory, PrinterFault},
    model::Model,
    protocol::{
        AckMode, Fault, Limits, Notifier, Phase, ProtocolClient, Timing, DEFAULT_FRAME_INTERVAL,
        DEFAULT_RESPONSE_TIMEOUT, DEFAULT_SETTLE_DELAY,
    },
    session::{
        Config, JobPlan, JobReport, PrintSession, DEFAULT_COOLDOWN, DEFAULT_ENERGY,
        DEFAULT_FINISH_FEED, DEFAULT_SPEED,
    },
    status::{Notification, PrinterStatus, StateFlags},
    transport::{Connector, FrameWriter, Link, NotificationStream},
};

#[cfg(feature = "ble")]
pub use crate::ble::{
    BleConnector, BleLink, ADVERTISED_SERVICE, COMMAND_CHARACTERISTIC, DEFAULT_CHUNK_SIZE,
    DEFAULT_SCAN_TIME, PRINT_SERVICE, STATUS_CHARACTERISTIC,
};

/// Width in pixels of the print head.
///
/// Every known model has 384 heating elements, which is 48 bytes per row
/// when packed into bitmap format (384 / 8 = 48).
pub const PRINTER_WIDTH: u32 = 384;
