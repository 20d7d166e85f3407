//! Decoding of printer notifications.
//!
//! The printer reports its condition through notification frames on the
//! status channel, framed like commands. Two kinds matter to a print job:
//! device state replies (0xA3) and flow control (0xAE).

use bitflags::bitflags;
use log::debug;

use crate::{
    command::{crc8, Command, HEADER_SIZE, MAGIC, TRAILER},
    error::PrinterFault,
};

bitflags! {
    /// State byte of a device state notification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateFlags: u8 {
        const OUT_OF_PAPER = 0b0000_0001;
        const COVER_OPEN = 0b0000_0010;
        const OVERHEAT = 0b0000_0100;
        const LOW_POWER = 0b0000_1000;
        const PAUSED = 0b0001_0000;
        const BUSY = 0b1000_0000;
    }
}

impl StateFlags {
    pub fn fault(&self) -> Option<PrinterFault> {
        PrinterFault::from_state(self.bits())
    }
}

///
/// Notification received from the printer encoded to Rust friendly type.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Reply to a device state request, also pushed on condition changes.
    DeviceState(StateFlags),
    /// The printer's receive buffer filled up (`paused`) or drained.
    FlowControl { paused: bool },
    /// Anything this driver doesn't understand.
    Unrecognized,
}

impl Notification {
    pub fn parse(frame: &[u8]) -> Self {
        let payload = match Self::payload(frame) {
            Some(payload) => payload,
            None => {
                debug!("Malformed notification: {:X?}", frame);
                return Self::Unrecognized;
            }
        };

        match (Command::from_code(frame[2]), payload.first()) {
            (Some(Command::GetDeviceState), Some(&state)) => {
                Self::DeviceState(StateFlags::from_bits_retain(state))
            }
            (Some(Command::FlowControl), Some(&flag)) => Self::FlowControl { paused: flag != 0 },
            _ => Self::Unrecognized,
        }
    }

    /// Check the framing and return the payload slice.
    fn payload(frame: &[u8]) -> Option<&[u8]> {
        if frame.len() < HEADER_SIZE + 2 || frame[..2] != MAGIC {
            return None;
        }
        let len = u16::from_le_bytes([frame[4], frame[5]]) as usize;
        if frame.len() < HEADER_SIZE + len + 2 {
            return None;
        }
        let payload = &frame[HEADER_SIZE..HEADER_SIZE + len];
        if frame[HEADER_SIZE + len] != crc8(payload) || frame[HEADER_SIZE + len + 1] != TRAILER {
            return None;
        }
        Some(payload)
    }

    /// Fault reported by this notification, if any.
    pub fn fault(&self) -> Option<PrinterFault> {
        match self {
            Self::DeviceState(flags) => flags.fault(),
            _ => None,
        }
    }
}

/// Condition of the printer as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterStatus {
    /// Nothing heard from the printer yet.
    Unknown,
    Ready,
    Busy,
    Paused,
    Fault(PrinterFault),
    /// The notification stream ended.
    Disconnected,
}

impl PrinterStatus {
    pub fn from_flags(flags: StateFlags) -> Self {
        if let Some(fault) = flags.fault() {
            Self::Fault(fault)
        } else if flags.contains(StateFlags::PAUSED) {
            Self::Paused
        } else if flags.contains(StateFlags::BUSY) {
            Self::Busy
        } else {
            Self::Ready
        }
    }
}
