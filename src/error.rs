//! Error types for cat printer operations.
//!
//! This module defines all possible errors that can occur while encoding
//! bitmaps, talking to the printer and managing the wireless session.

use crate::protocol::{Fault, Phase};
use thiserror::Error;

/// Main error type for cat printer operations.
///
/// Every variant aborts the current print job. Use [`Error::category`] to
/// tell a printer problem apart from a programming or configuration problem.
#[derive(Error, Debug)]
pub enum Error {
    /// The pixel buffer width does not match the printable width of the job.
    ///
    /// The codec never resamples; scale or pad the content before packing.
    #[error("Shape mismatch: expected {expected} pixels per row, found {actual}")]
    ShapeMismatch { expected: u32, actual: u32 },

    /// Speed or energy outside the range accepted by the printer.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid pixel buffer: {0}")]
    InvalidPixelBuffer(String),

    /// Invalid configuration value, usually from the persisted settings.
    #[error("Invalid configuration parameter: {0}")]
    InvalidConfig(String),

    /// The printer did not send the expected notification in time.
    #[error("Timed out waiting for {0}")]
    ProtocolTimeout(&'static str),

    /// Hardware condition reported by the printer itself.
    ///
    /// The user has to fix the printer (paper, cover, battery) before
    /// starting a new job.
    #[error("Printer reported a fault: {code}")]
    DeviceFault { code: PrinterFault },

    /// A write to the command channel failed.
    ///
    /// Delivery of the frame is unknown, so the job can't be resumed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Bluetooth stack error while scanning or connecting.
    #[cfg(feature = "ble")]
    #[error(transparent)]
    Bluetooth(#[from] btleplug::Error),

    #[error("Can't {operation} while the job is {phase:?}")]
    InvalidState {
        operation: &'static str,
        phase: Phase,
    },

    #[error("Another command is already in flight on this printer")]
    Busy,

    #[error("Print job already aborted: {0}")]
    Faulted(Fault),

    #[error("Print job cancelled")]
    Cancelled,

    #[error("Printer {0} not found")]
    DeviceNotFound(String),

    #[error("Printer does not expose the {0} channel")]
    MissingChannel(&'static str),
}

/// Broad classification of an [`Error`] for reporting to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Check the printer: fault, timeout or missing device.
    Device,
    /// The wireless link broke; start a fresh session.
    Transport,
    /// Caller or configuration bug; retrying won't help.
    Usage,
    Cancelled,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DeviceFault { .. }
            | Self::ProtocolTimeout(_)
            | Self::DeviceNotFound(_)
            | Self::MissingChannel(_) => ErrorCategory::Device,
            Self::Transport(_) => ErrorCategory::Transport,
            #[cfg(feature = "ble")]
            Self::Bluetooth(_) => ErrorCategory::Transport,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Faulted(fault) => match fault {
                Fault::Device(_) | Fault::Timeout => ErrorCategory::Device,
                Fault::Transport => ErrorCategory::Transport,
                Fault::Cancelled => ErrorCategory::Cancelled,
                Fault::Usage => ErrorCategory::Usage,
            },
            Self::ShapeMismatch { .. }
            | Self::InvalidParameter(_)
            | Self::InvalidPixelBuffer(_)
            | Self::InvalidConfig(_)
            | Self::InvalidState { .. }
            | Self::Busy => ErrorCategory::Usage,
        }
    }
}

/// Hardware conditions reported by the printer.
///
/// These are parsed from the state byte of a device state notification and
/// need user intervention.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterFault {
    #[error("Out of paper")]
    PaperOut,

    #[error("Cover is open")]
    CoverOpen,

    #[error("Print head overheated")]
    Overheat,

    #[error("Battery is low")]
    LowPower,

    #[error("Unknown fault {0:#04x}")]
    Unknown(u8),
}

impl PrinterFault {
    /// Parse a fault from the device state byte.
    ///
    /// Returns `None` when no fault bit is set. The pause and busy bits are
    /// flow-control hints, not faults.
    pub fn from_state(state: u8) -> Option<Self> {
        match state & 0x0F {
            0 => None,
            0b0000_0001 => Some(Self::PaperOut),
            0b0000_0010 => Some(Self::CoverOpen),
            0b0000_0100 => Some(Self::Overheat),
            0b0000_1000 => Some(Self::LowPower),
            bits => Some(Self::Unknown(bits)),
        }
    }

    /// Raw state bits identifying this fault.
    pub fn code(&self) -> u8 {
        match self {
            Self::PaperOut => 0b0000_0001,
            Self::CoverOpen => 0b0000_0010,
            Self::Overheat => 0b0000_0100,
            Self::LowPower => 0b0000_1000,
            Self::Unknown(bits) => *bits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_from_state() {
        assert_eq!(PrinterFault::from_state(0x00), None);
        assert_eq!(PrinterFault::from_state(0x10), None);
        assert_eq!(PrinterFault::from_state(0x80), None);
        assert_eq!(PrinterFault::from_state(0x01), Some(PrinterFault::PaperOut));
        assert_eq!(PrinterFault::from_state(0x92), Some(PrinterFault::CoverOpen));
        assert_eq!(PrinterFault::from_state(0x04), Some(PrinterFault::Overheat));
        assert_eq!(PrinterFault::from_state(0x08), Some(PrinterFault::LowPower));
        assert_eq!(PrinterFault::from_state(0x05), Some(PrinterFault::Unknown(0x05)));
    }

    #[test]
    fn test_fault_code_matches_state_bits() {
        for state in 1..=0x0F_u8 {
            let fault = PrinterFault::from_state(state).unwrap();
            assert_eq!(fault.code(), state);
        }
    }

    #[test]
    fn test_error_category() {
        let fault = Error::DeviceFault {
            code: PrinterFault::PaperOut,
        };
        assert_eq!(fault.category(), ErrorCategory::Device);
        assert_eq!(
            Error::ProtocolTimeout("device state").category(),
            ErrorCategory::Device
        );
        assert_eq!(
            Error::Transport("gone".to_string()).category(),
            ErrorCategory::Transport
        );
        let shape = Error::ShapeMismatch {
            expected: 384,
            actual: 200,
        };
        assert_eq!(shape.category(), ErrorCategory::Usage);
        assert_eq!(
            Error::InvalidParameter("speed".to_string()).category(),
            ErrorCategory::Usage
        );
        assert_eq!(
            Error::Faulted(Fault::Transport).category(),
            ErrorCategory::Transport
        );
    }
}
