//! Packing of two-tone pixel buffers into printer rows.
//!
//! The printer takes one row of dots per bitmap command, 8 pixels per byte
//! with the leftmost pixel in the least significant bit. A set bit heats the
//! print head at that position.

use crate::error::Error;

/// Sample value of a pixel the printer should darken.
pub const INK: u8 = 0x00;

/// Sample value of a pixel left blank.
pub const BLANK: u8 = 0xFF;

/// Width × height grid of samples reduced to [`INK`] and [`BLANK`].
///
/// Samples are stored row-major. The dithering that produces them happens
/// upstream; this type only checks that it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoTonePixelBuffer {
    width: u32,
    height: u32,
    samples: Vec<u8>,
}

impl TwoTonePixelBuffer {
    pub fn new(width: u32, height: u32, samples: Vec<u8>) -> Result<Self, Error> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidPixelBuffer(format!(
                "dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(Error::InvalidPixelBuffer(format!(
                "{} samples supplied for a {}x{} buffer",
                samples.len(),
                width,
                height
            )));
        }
        if let Some(index) = samples.iter().position(|&s| s != INK && s != BLANK) {
            return Err(Error::InvalidPixelBuffer(format!(
                "sample {} at index {} is neither ink nor blank",
                samples[index], index
            )));
        }
        Ok(TwoTonePixelBuffer {
            width,
            height,
            samples,
        })
    }

    /// A buffer with every pixel blank, handy for margins and spacers.
    pub fn blank(width: u32, height: u32) -> Result<Self, Error> {
        Self::new(width, height, vec![BLANK; width as usize * height as usize])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.width as usize;
        &self.samples[start..start + self.width as usize]
    }
}

/// One printer row, `ceil(width / 8)` bytes long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRow(Vec<u8>);

impl PackedRow {
    /// A row with nothing to print: every byte is zero after inversion.
    ///
    /// Blank rows are sent as a one line feed instead of a bitmap command.
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(|&byte| byte == 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<PackedRow> for Vec<u8> {
    fn from(row: PackedRow) -> Self {
        row.0
    }
}

/// Number of bytes per packed row for `width` pixels.
pub fn row_pitch(width: u32) -> usize {
    (width as usize + 7) / 8
}

/// Pack a buffer into printer rows.
///
/// `target_width` is the printable width of the device in pixels; the
/// buffer has to be exactly that wide.
pub fn pack(buffer: &TwoTonePixelBuffer, target_width: u32) -> Result<Vec<PackedRow>, Error> {
    if buffer.width != target_width {
        return Err(Error::ShapeMismatch {
            expected: target_width,
            actual: buffer.width,
        });
    }

    let pitch = row_pitch(buffer.width);
    let rows = (0..buffer.height)
        .map(|y| {
            let pixels = buffer.row(y);
            let mut row = Vec::with_capacity(pitch);
            for chunk in pixels.chunks(8) {
                // Sentinels are all-zero or all-one bytes, so bit d of the
                // sample is the pixel's value at position d.
                let mut byte: u8 = 0x00;
                for (d, &sample) in chunk.iter().enumerate() {
                    byte |= sample & (1 << d);
                }
                // Pixels past the right edge count as blank.
                let padding = !(0xFF_u16 >> (8 - chunk.len())) as u8;
                row.push(!(byte | padding));
            }
            PackedRow(row)
        })
        .collect();
    Ok(rows)
}

/// Read a packed row back into `width` sentinel samples.
pub fn unpack(row: &PackedRow, width: u32) -> Vec<u8> {
    (0..width as usize)
        .map(|x| {
            let byte = row.0.get(x / 8).copied().unwrap_or(0);
            if byte & (1 << (x % 8)) != 0 {
                INK
            } else {
                BLANK
            }
        })
        .collect()
}
