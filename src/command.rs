//! Wire framing of printer commands.
//!
//! Every frame is `51 78 <cmd> <type> <len lo> <len hi> <payload> <crc8> FF`.
//! Commands are sent with type 0, notifications come back with type 1.

/// Frame header magic.
pub const MAGIC: [u8; 2] = [0x51, 0x78];

/// Frame trailer.
pub const TRAILER: u8 = 0xFF;

/// Header bytes before the payload.
pub const HEADER_SIZE: usize = 6;

/// Payload byte for [`Command::SetDpi`] selecting 200 dpi.
const DPI_200: u8 = 50;

/// Speed the mechanism is switched to for the trailing feed.
pub const FINISH_SPEED: u8 = 8;

const LATTICE_START: [u8; 11] = [
    0xAA, 0x55, 0x17, 0x38, 0x44, 0x5F, 0x5F, 0x5F, 0x44, 0x38, 0x2C,
];
const LATTICE_END: [u8; 11] = [
    0xAA, 0x55, 0x17, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x17,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Retract,
    Feed,
    Bitmap,
    GetDeviceState,
    SetDpi,
    Lattice,
    GetDeviceInfo,
    UpdateDevice,
    FlowControl,
    Energy,
    Speed,
    ApplyEnergy,
}

impl Command {
    pub fn code(&self) -> u8 {
        match self {
            Self::Retract => 0xA0,
            Self::Feed => 0xA1,
            Self::Bitmap => 0xA2,
            Self::GetDeviceState => 0xA3,
            Self::SetDpi => 0xA4,
            Self::Lattice => 0xA6,
            Self::GetDeviceInfo => 0xA8,
            Self::UpdateDevice => 0xA9,
            Self::FlowControl => 0xAE,
            Self::Energy => 0xAF,
            Self::Speed => 0xBD,
            Self::ApplyEnergy => 0xBE,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0xA0 => Some(Self::Retract),
            0xA1 => Some(Self::Feed),
            0xA2 => Some(Self::Bitmap),
            0xA3 => Some(Self::GetDeviceState),
            0xA4 => Some(Self::SetDpi),
            0xA6 => Some(Self::Lattice),
            0xA8 => Some(Self::GetDeviceInfo),
            0xA9 => Some(Self::UpdateDevice),
            0xAE => Some(Self::FlowControl),
            0xAF => Some(Self::Energy),
            0xBD => Some(Self::Speed),
            0xBE => Some(Self::ApplyEnergy),
            _ => None,
        }
    }
}

/// Direction marker in the fourth header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Transfer,
    Response,
}

impl FrameType {
    pub fn code(&self) -> u8 {
        match self {
            Self::Transfer => 0x00,
            Self::Response => 0x01,
        }
    }
}

/// CRC-8 with polynomial 0x07 over the payload.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &byte| {
        let mut crc = crc ^ byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// Build one frame around `payload`.
pub fn frame(command: Command, frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() as u16).to_le_bytes();
    let mut buf: Vec<u8> = Vec::with_capacity(HEADER_SIZE + payload.len() + 2);
    buf.extend_from_slice(&MAGIC);
    buf.push(command.code());
    buf.push(frame_type.code());
    buf.extend_from_slice(&len);
    buf.extend_from_slice(payload);
    buf.push(crc8(payload));
    buf.push(TRAILER);
    buf
}

fn transfer(command: Command, payload: &[u8]) -> Vec<u8> {
    frame(command, FrameType::Transfer, payload)
}

pub fn get_device_state() -> Vec<u8> {
    transfer(Command::GetDeviceState, &[0x00])
}

pub fn get_device_info() -> Vec<u8> {
    transfer(Command::GetDeviceInfo, &[0x00])
}

pub fn set_dpi() -> Vec<u8> {
    transfer(Command::SetDpi, &[DPI_200])
}

pub fn set_speed(speed: u8) -> Vec<u8> {
    transfer(Command::Speed, &[speed])
}

pub fn set_energy(energy: u16) -> Vec<u8> {
    transfer(Command::Energy, &energy.to_le_bytes())
}

pub fn apply_energy() -> Vec<u8> {
    transfer(Command::ApplyEnergy, &[0x01])
}

pub fn update_device() -> Vec<u8> {
    transfer(Command::UpdateDevice, &[0x00])
}

pub fn lattice_start() -> Vec<u8> {
    transfer(Command::Lattice, &LATTICE_START)
}

pub fn lattice_end() -> Vec<u8> {
    transfer(Command::Lattice, &LATTICE_END)
}

/// Advance the paper by `lines` dot rows without printing.
pub fn feed(lines: u16) -> Vec<u8> {
    transfer(Command::Feed, &lines.to_le_bytes())
}

/// Print one packed row.
pub fn bitmap(row: &[u8]) -> Vec<u8> {
    transfer(Command::Bitmap, row)
}
