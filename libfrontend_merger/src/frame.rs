use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::constants::SAMPLES_PER_FRAME;
use super::error::DecodeError;

/// An undecoded unit of front-end data, exactly as it was read from a stream.
///
/// RawFrames are immutable. All field access goes through the bounds-checked
/// accessors, which return a `DecodeError::Truncated` instead of reading past the
/// end of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Vec<u8>,
}

impl RawFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Borrow `len` bytes starting at `offset`
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], DecodeError> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(DecodeError::Truncated {
                offset,
                len,
                size: self.bytes.len(),
            })
    }

    pub fn u8(&self, offset: usize) -> Result<u8, DecodeError> {
        Ok(self.slice(offset, 1)?[0])
    }

    pub fn u16_be(&self, offset: usize) -> Result<u16, DecodeError> {
        Ok(BigEndian::read_u16(self.slice(offset, 2)?))
    }

    pub fn u16_le(&self, offset: usize) -> Result<u16, DecodeError> {
        Ok(LittleEndian::read_u16(self.slice(offset, 2)?))
    }

    pub fn u24_be(&self, offset: usize) -> Result<u32, DecodeError> {
        Ok(BigEndian::read_u24(self.slice(offset, 3)?))
    }

    pub fn u32_be(&self, offset: usize) -> Result<u32, DecodeError> {
        Ok(BigEndian::read_u32(self.slice(offset, 4)?))
    }

    pub fn i32_le(&self, offset: usize) -> Result<i32, DecodeError> {
        Ok(LittleEndian::read_i32(self.slice(offset, 4)?))
    }

    /// Read an unsigned big-endian integer of `nbytes` (at most 8) bytes
    pub fn uint_be(&self, offset: usize, nbytes: usize) -> Result<u64, DecodeError> {
        Ok(BigEndian::read_uint(self.slice(offset, nbytes)?, nbytes))
    }
}

/// A single decoded channel waveform for one event.
///
/// The physical channel is derived from the hardware address by the decoder that
/// produced the frame; frames are never built for excluded (non-physical) channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub board_id: u16,
    pub chip_id: u16,
    pub channel_id: u16,
    pub physical_channel_id: u32,
    pub event_id: u32,
    /// Nanoseconds since the start of the run
    pub event_time: i64,
    pub samples: [u16; SAMPLES_PER_FRAME],
}

impl Frame {
    pub fn new(
        board_id: u16,
        chip_id: u16,
        channel_id: u16,
        physical_channel_id: u32,
        event_id: u32,
        event_time: i64,
    ) -> Self {
        Self {
            board_id,
            chip_id,
            channel_id,
            physical_channel_id,
            event_id,
            event_time,
            samples: [0; SAMPLES_PER_FRAME],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_are_bounds_checked() {
        let raw = RawFrame::new(vec![0xEE, 0xEE, 0x01, 0x02]);
        assert_eq!(raw.u16_be(0).unwrap(), 0xEEEE);
        assert_eq!(raw.u16_le(2).unwrap(), 0x0201);
        assert_eq!(
            raw.u32_be(1),
            Err(DecodeError::Truncated {
                offset: 1,
                len: 4,
                size: 4
            })
        );
        assert!(raw.slice(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_uint_be() {
        let raw = RawFrame::new(vec![0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(raw.uint_be(0, 6).unwrap(), 0x0001_0203_0405);
        assert_eq!(raw.u24_be(3).unwrap(), 0x03_0405);
    }
}
