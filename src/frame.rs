//! Length-prefixed, checksum-terminated command frames.
//!
//! ```text
//! byte 0         n, the number of bytes following this one
//! byte 1         opcode
//! bytes 2..n-3   opcode specific payload
//! bytes n-3..=n  CRC over bytes 0..n-3, little endian
//! ```

use crc::{Crc, CRC_32_MPEG_2};

use crate::error::LinkError;
use crate::link::Link;

/// Largest frame a single length byte can describe
pub const MAX_FRAME_LEN: usize = 256;

pub const CHECKSUM_LEN: usize = 4;

/// Length byte, opcode and checksum
pub const FRAME_OVERHEAD: usize = 1 + 1 + CHECKSUM_LEN;

/// Largest payload that fits in one frame
pub const MAX_PAYLOAD: usize = MAX_FRAME_LEN - FRAME_OVERHEAD;

// STM32 CRC unit in its reset configuration
static STM32_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Compute the frame checksum the way the device's CRC unit does.
///
/// Each byte is fed to the unit as its own 32-bit word (zero extended),
/// so this is not the plain CRC-32/MPEG-2 of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    let mut digest = STM32_CRC.digest();
    for b in data {
        digest.update(&u32::from(*b).to_be_bytes());
    }
    digest.finalize()
}

#[derive(Clone)]
pub struct Frame {
    buf: [u8; MAX_FRAME_LEN],
}

impl Frame {
    /// Read one frame from the link.
    ///
    /// Blocks for the length byte, then for exactly that many bytes.
    /// The frame is not verified here, see [`Frame::verify`].
    pub fn receive<L: Link>(link: &mut L) -> Result<Self, LinkError> {
        let mut buf = [0u8; MAX_FRAME_LEN];

        link.read_exact(&mut buf[..1])?;
        let n = buf[0] as usize;

        link.read_exact(&mut buf[1..1 + n])?;

        Ok(Self { buf })
    }

    /// Build a request frame with a valid checksum
    pub fn encode(opcode: u8, payload: &[u8]) -> Option<Self> {
        if payload.len() > MAX_PAYLOAD {
            return None;
        }

        let mut buf = [0u8; MAX_FRAME_LEN];
        let total = payload.len() + FRAME_OVERHEAD;

        buf[0] = (total - 1) as u8;
        buf[1] = opcode;
        buf[2..2 + payload.len()].copy_from_slice(payload);

        let crc = checksum(&buf[..total - CHECKSUM_LEN]);
        buf[total - CHECKSUM_LEN..total].copy_from_slice(&crc.to_le_bytes());

        Some(Self { buf })
    }

    /// Wrap raw bytes, such as a captured request
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let len = *data.first()? as usize + 1;
        if data.len() < len {
            return None;
        }

        let mut buf = [0u8; MAX_FRAME_LEN];
        buf[..len].copy_from_slice(&data[..len]);
        Some(Self { buf })
    }

    /// Whole frame size, including the length byte
    pub fn len(&self) -> usize {
        self.buf[0] as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        self.buf[0] == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len()]
    }

    pub fn opcode(&self) -> u8 {
        self.buf[1]
    }

    /// Bytes between the opcode and the checksum
    pub fn payload(&self) -> &[u8] {
        match self.len().checked_sub(CHECKSUM_LEN) {
            Some(end) if end >= 2 => &self.buf[2..end],
            _ => &[],
        }
    }

    /// Trailing checksum, if the frame is long enough to carry one
    pub fn checksum(&self) -> Option<u32> {
        let len = self.len();
        if len < FRAME_OVERHEAD {
            return None;
        }

        let mut crc = [0u8; CHECKSUM_LEN];
        crc.copy_from_slice(&self.buf[len - CHECKSUM_LEN..len]);
        Some(u32::from_le_bytes(crc))
    }

    /// Recompute the checksum over everything before it and compare
    pub fn verify(&self) -> bool {
        match self.checksum() {
            Some(expected) => checksum(&self.buf[..self.len() - CHECKSUM_LEN]) == expected,
            None => false,
        }
    }
}

impl core::fmt::Debug for Frame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Frame({:02x?})", self.as_bytes())
    }
}
