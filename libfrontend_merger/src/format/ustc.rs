use super::{EndMarkerPolicy, FrameFormat, FrameLength, SyncPattern, UstcVariant};
use crate::constants::*;
use crate::error::DecodeError;
use crate::frame::{Frame, RawFrame};
use crate::hardware_id::ChannelLayout;

const V3_LAYOUT: ChannelLayout = ChannelLayout::new(USTC_V3_CHANNELS_PER_CHIP, USTC_CHIPS_PER_BOARD);
const V4_LAYOUT: ChannelLayout = ChannelLayout::new(USTC_V4_CHANNELS_PER_CHIP, USTC_CHIPS_PER_BOARD);

// End marker of the previous frame followed by the sync of the next
const V3_SYNC: SyncPattern = SyncPattern {
    value: &[0xFF, 0xFF, 0xFF, 0xFF, 0xEE, 0xEE],
    mask: &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
    resume_offset: 4,
};

// Protocol word followed by an event header flag
const V4_SYNC: SyncPattern = SyncPattern {
    value: &[0xAC, 0x0F, 0x40],
    mask: &[0xFF, 0xFF, 0xE0],
    resume_offset: 0,
};

const V4_FLAG_ENDING: u8 = 0b001;
const V4_FLAG_HEADER: u8 = 0b010;

/// Event id and time announced by the most recent V4 event header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct V4Header {
    event_id: u32,
    event_time: i64,
}

/// Decoder for the fixed-size frames of the USTC electronics.
///
/// V3 frames carry a single channel with its own event id and time. V4 streams split
/// events into a header packet followed by data packets, so the decoder remembers the
/// last header it saw.
#[derive(Debug)]
pub struct UstcFormat {
    variant: UstcVariant,
    end_marker: EndMarkerPolicy,
    header: Option<V4Header>,
}

impl UstcFormat {
    pub fn new(variant: UstcVariant, end_marker: EndMarkerPolicy) -> Self {
        Self {
            variant,
            end_marker,
            header: None,
        }
    }

    fn v3_frame_size(&self) -> usize {
        match self.variant {
            UstcVariant::V3Short => USTC_V3_SHORT_FRAME_SIZE,
            _ => USTC_V3_LONG_FRAME_SIZE,
        }
    }

    fn decode_v3(&self, raw: &RawFrame) -> Result<Vec<Frame>, DecodeError> {
        let sync = raw.u16_be(0)?;
        if sync != USTC_SYNC_MARKER {
            return Err(DecodeError::BadSyncMarker {
                expected: USTC_SYNC_MARKER as u32,
                found: sync as u32,
            });
        }

        let size = self.v3_frame_size();
        if self.end_marker == EndMarkerPolicy::Strict {
            let end = raw.u32_be(size - 4)?;
            if end != USTC_END_MARKER {
                return Err(DecodeError::BadEndMarker {
                    expected: USTC_END_MARKER,
                    found: end,
                });
            }
        }

        let board_id = (raw.u8(2)? & 0x0F) as u16;
        let chip_code = raw.u8(3)? >> 4;
        if chip_code < USTC_V3_CHIP_OFFSET
            || (chip_code - USTC_V3_CHIP_OFFSET) as u32 >= USTC_CHIPS_PER_BOARD
        {
            return Err(DecodeError::UnsupportedField {
                field: "chip",
                value: chip_code as u64,
            });
        }
        let chip_id = (chip_code - USTC_V3_CHIP_OFFSET) as u16;

        let (event_time, channel_id, event_id, data_offset) = match self.variant {
            UstcVariant::V3Short => (
                raw.u32_be(4)? as i64,
                raw.u16_be(8)?,
                raw.u16_be(10)? as u32,
                USTC_V3_SHORT_DATA_OFFSET,
            ),
            _ => (
                raw.uint_be(5, 7)? as i64,
                raw.u16_be(12)?,
                ((raw.u8(16)? & 0x7F) as u32) << 24 | raw.u24_be(17)?,
                USTC_V3_LONG_DATA_OFFSET,
            ),
        };
        if channel_id as u32 >= USTC_V3_CHANNELS_PER_CHIP {
            return Err(DecodeError::UnsupportedField {
                field: "channel",
                value: channel_id as u64,
            });
        }

        let mut frame = Frame::new(
            board_id,
            chip_id,
            channel_id,
            V3_LAYOUT.physical_id(board_id, chip_id, channel_id as u32),
            event_id,
            event_time,
        );
        read_samples(raw, data_offset, &mut frame)?;
        Ok(vec![frame])
    }

    fn decode_v4(&mut self, raw: &RawFrame) -> Result<Vec<Frame>, DecodeError> {
        let protocol = raw.u16_be(0)?;
        if protocol != USTC_V4_PROTOCOL {
            return Err(DecodeError::BadSyncMarker {
                expected: USTC_V4_PROTOCOL as u32,
                found: protocol as u32,
            });
        }

        let flag = raw.u8(2)? >> 5;
        if flag & V4_FLAG_ENDING != 0 {
            return Ok(vec![]);
        }
        if flag & V4_FLAG_HEADER != 0 {
            let event_time = (raw.u16_be(10)? as i64) << 32
                | (raw.u16_be(8)? as i64) << 16
                | raw.u16_be(6)? as i64;
            let event_id = (raw.u16_be(14)? as u32) << 16 | raw.u16_be(12)? as u32;
            self.header = Some(V4Header {
                event_id,
                event_time,
            });
            return Ok(vec![]);
        }

        let header = self.header.ok_or(DecodeError::UnsupportedField {
            field: "data packet before event header",
            value: 0,
        })?;

        let word = raw.u16_be(4)?;
        if word >> 14 != 0b11 {
            return Err(DecodeError::UnsupportedField {
                field: "channel word prefix",
                value: (word >> 14) as u64,
            });
        }
        let board_id = (word >> 9) & 0x1F;
        let chip_id = (word >> 7) & 0x03;
        let channel_id = word & 0x7F;
        if channel_id as u32 >= USTC_V4_CHANNELS_PER_CHIP {
            return Err(DecodeError::UnsupportedField {
                field: "channel",
                value: channel_id as u64,
            });
        }

        let mut frame = Frame::new(
            board_id,
            chip_id,
            channel_id,
            V4_LAYOUT.physical_id(board_id, chip_id, channel_id as u32),
            header.event_id,
            header.event_time,
        );
        read_samples(raw, USTC_V4_DATA_OFFSET, &mut frame)?;
        Ok(vec![frame])
    }
}

fn read_samples(raw: &RawFrame, offset: usize, frame: &mut Frame) -> Result<(), DecodeError> {
    let data = raw.slice(offset, SAMPLES_PER_FRAME * 2)?;
    for (sample, word) in frame.samples.iter_mut().zip(data.chunks_exact(2)) {
        *sample = u16::from_be_bytes([word[0], word[1]]) & SAMPLE_MASK;
    }
    Ok(())
}

impl FrameFormat for UstcFormat {
    fn name(&self) -> &'static str {
        match self.variant {
            UstcVariant::V3Long => "USTC V3 (long)",
            UstcVariant::V3Short => "USTC V3 (short)",
            UstcVariant::V4 => "USTC V4",
        }
    }

    fn prefix_len(&self) -> usize {
        match self.variant {
            UstcVariant::V4 => USTC_V4_PROTOCOL_SIZE,
            _ => 0,
        }
    }

    fn frame_len(&self, prefix: &[u8]) -> Result<FrameLength, DecodeError> {
        if self.variant != UstcVariant::V4 {
            return Ok(FrameLength::Complete(self.v3_frame_size()));
        }
        let raw = RawFrame::new(prefix.to_vec());
        let protocol = raw.u16_be(0)?;
        if protocol != USTC_V4_PROTOCOL {
            return Err(DecodeError::BadSyncMarker {
                expected: USTC_V4_PROTOCOL as u32,
                found: protocol as u32,
            });
        }
        let flag = raw.u8(2)? >> 5;
        let size = if flag & V4_FLAG_ENDING != 0 {
            USTC_V4_ENDING_SIZE
        } else if flag & V4_FLAG_HEADER != 0 {
            USTC_V4_HEADER_SIZE
        } else {
            USTC_V4_DATA_SIZE
        };
        Ok(FrameLength::Complete(size))
    }

    fn max_frame_len(&self) -> usize {
        match self.variant {
            UstcVariant::V4 => USTC_V4_DATA_SIZE,
            _ => self.v3_frame_size(),
        }
    }

    fn decode(&mut self, raw: &RawFrame) -> Result<Vec<Frame>, DecodeError> {
        match self.variant {
            UstcVariant::V4 => self.decode_v4(raw),
            _ => self.decode_v3(raw),
        }
    }

    fn sync_pattern(&self) -> Option<SyncPattern> {
        match self.variant {
            UstcVariant::V4 => Some(V4_SYNC),
            _ => Some(V3_SYNC),
        }
    }

    // Boards are read out in parallel, so neighbouring events interleave
    fn default_reorder_depth(&self) -> u32 {
        1
    }
}

/// Write a frame in the USTC V3 layout. Used to build synthetic data.
pub fn encode_v3(variant: UstcVariant, frame: &Frame) -> Vec<u8> {
    let (size, offset) = match variant {
        UstcVariant::V3Short => (USTC_V3_SHORT_FRAME_SIZE, USTC_V3_SHORT_DATA_OFFSET),
        _ => (USTC_V3_LONG_FRAME_SIZE, USTC_V3_LONG_DATA_OFFSET),
    };
    let chip_code = frame.chip_id as u8 + USTC_V3_CHIP_OFFSET;
    let mut bytes = vec![0u8; size];
    bytes[0..2].copy_from_slice(&USTC_SYNC_MARKER.to_be_bytes());
    bytes[2] = (frame.board_id & 0x0F) as u8;
    bytes[3] = chip_code << 4;
    match variant {
        UstcVariant::V3Short => {
            bytes[4..8].copy_from_slice(&(frame.event_time as u32).to_be_bytes());
            bytes[8..10].copy_from_slice(&frame.channel_id.to_be_bytes());
            bytes[10..12].copy_from_slice(&(frame.event_id as u16).to_be_bytes());
        }
        _ => {
            bytes[4..12].copy_from_slice(&(frame.event_time as u64 & 0x00FF_FFFF_FFFF_FFFF).to_be_bytes());
            bytes[12..14].copy_from_slice(&frame.channel_id.to_be_bytes());
            bytes[16..20].copy_from_slice(&(frame.event_id & 0x7FFF_FFFF).to_be_bytes());
        }
    }
    write_samples(&mut bytes[offset..], frame, (chip_code as u16) << 12);
    bytes[size - 4..].copy_from_slice(&USTC_END_MARKER.to_be_bytes());
    bytes
}

/// Write a USTC V4 event header packet.
pub fn encode_v4_header(event_id: u32, event_time: i64) -> Vec<u8> {
    let mut bytes = vec![0u8; USTC_V4_HEADER_SIZE];
    bytes[0..2].copy_from_slice(&USTC_V4_PROTOCOL.to_be_bytes());
    bytes[2] = V4_FLAG_HEADER << 5;
    bytes[3] = USTC_V4_HEADER_SIZE as u8;
    bytes[6..8].copy_from_slice(&(event_time as u16).to_be_bytes());
    bytes[8..10].copy_from_slice(&((event_time >> 16) as u16).to_be_bytes());
    bytes[10..12].copy_from_slice(&((event_time >> 32) as u16).to_be_bytes());
    bytes[12..14].copy_from_slice(&(event_id as u16).to_be_bytes());
    bytes[14..16].copy_from_slice(&((event_id >> 16) as u16).to_be_bytes());
    bytes
}

/// Write a USTC V4 data packet for one channel; the event id and time come from the header.
pub fn encode_v4_data(frame: &Frame) -> Vec<u8> {
    let mut bytes = vec![0u8; USTC_V4_DATA_SIZE];
    bytes[0..2].copy_from_slice(&USTC_V4_PROTOCOL.to_be_bytes());
    let word: u16 = 0xC000
        | (frame.board_id & 0x1F) << 9
        | (frame.chip_id & 0x03) << 7
        | (frame.channel_id & 0x7F);
    bytes[4..6].copy_from_slice(&word.to_be_bytes());
    write_samples(&mut bytes[USTC_V4_DATA_OFFSET..], frame, 0);
    bytes
}

/// Write a USTC V4 ending packet.
pub fn encode_v4_ending() -> Vec<u8> {
    let mut bytes = vec![0u8; USTC_V4_ENDING_SIZE];
    bytes[0..2].copy_from_slice(&USTC_V4_PROTOCOL.to_be_bytes());
    bytes[2] = V4_FLAG_ENDING << 5;
    bytes[3] = USTC_V4_ENDING_SIZE as u8;
    bytes
}

fn write_samples(dest: &mut [u8], frame: &Frame, tag: u16) {
    for (word, sample) in dest.chunks_exact_mut(2).zip(frame.samples.iter()) {
        word.copy_from_slice(&(tag | (sample & SAMPLE_MASK)).to_be_bytes());
    }
}
