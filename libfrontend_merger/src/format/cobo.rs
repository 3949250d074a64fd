use bitvec::prelude::*;

use super::{FrameFormat, FrameLength, SyncPattern};
use crate::constants::*;
use crate::error::DecodeError;
use crate::frame::{Frame, RawFrame};
use crate::hardware_id::ChannelLayout;

const LAYOUT: ChannelLayout = ChannelLayout::new(COBO_CHANNELS_PER_AGET, 4);

// Meta type, then the fixed part of the frame type, revision, and header size fields
const COBO_SYNC: SyncPattern = SyncPattern {
    value: &[0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x01],
    mask: &[0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFC, 0xFF, 0xFF, 0xFF],
    resume_offset: 0,
};

/// The fields of a GRAW frame header we care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoboHeader {
    pub frame_size: usize,
    pub frame_type: u16,
    pub item_size: u16,
    pub n_items: u32,
    /// In Time Stamp Clock ticks
    pub event_time: u64,
    pub event_id: u32,
    pub cobo_id: u8,
    pub asad_id: u8,
}

impl CoboHeader {
    /// Read and validate a header
    pub fn read(raw: &RawFrame) -> Result<Self, DecodeError> {
        let meta = raw.u8(0)?;
        if meta != COBO_META_TYPE {
            return Err(DecodeError::BadSyncMarker {
                expected: COBO_META_TYPE as u32,
                found: meta as u32,
            });
        }
        let header = Self {
            frame_size: raw.u24_be(1)? as usize * COBO_SIZE_UNIT,
            frame_type: raw.u16_be(5)?,
            item_size: raw.u16_be(10)?,
            n_items: raw.u32_be(12)?,
            event_time: raw.uint_be(16, 6)?,
            event_id: raw.u32_be(22)?,
            cobo_id: raw.u8(26)?,
            asad_id: raw.u8(27)?,
        };

        check_field("revision", raw.u8(7)? as u64, COBO_REVISION as u64)?;
        check_field("header size", raw.u16_be(8)? as u64, COBO_HEADER_UNITS as u64)?;
        check_field("read offset", raw.u16_be(28)? as u64, 0)?;
        check_field("status", raw.u8(30)? as u64, 0)?;
        match header.frame_type {
            COBO_FRAME_TYPE_PARTIAL => {
                check_field("item size", header.item_size as u64, COBO_ITEM_SIZE_PARTIAL as u64)?
            }
            COBO_FRAME_TYPE_FULL => {
                check_field("item size", header.item_size as u64, COBO_ITEM_SIZE_FULL as u64)?;
                check_field("item count", header.n_items as u64, COBO_FULL_ITEM_COUNT as u64)?;
            }
            other => {
                return Err(DecodeError::UnsupportedField {
                    field: "frame type",
                    value: other as u64,
                })
            }
        }
        Ok(header)
    }
}

fn check_field(field: &'static str, value: u64, expected: u64) -> Result<(), DecodeError> {
    if value == expected {
        Ok(())
    } else {
        Err(DecodeError::UnsupportedField { field, value })
    }
}

/// Samples for every channel of one AsAd board, with a record of which were hit
struct AsadSignals {
    samples: Vec<[u16; SAMPLES_PER_FRAME]>,
    hits: BitVec,
}

impl AsadSignals {
    fn new() -> Self {
        Self {
            samples: vec![[0; SAMPLES_PER_FRAME]; COBO_CHANNELS_PER_ASAD as usize],
            hits: bitvec![0; COBO_CHANNELS_PER_ASAD as usize],
        }
    }

    fn set(&mut self, aget: u8, channel: u32, bucket: usize, sample: u16) -> Result<(), DecodeError> {
        let index = aget as u32 * COBO_CHANNELS_PER_AGET + channel;
        if channel >= COBO_CHANNELS_PER_AGET || index >= COBO_CHANNELS_PER_ASAD {
            return Err(DecodeError::UnsupportedField {
                field: "channel",
                value: channel as u64,
            });
        }
        if bucket >= SAMPLES_PER_FRAME {
            return Err(DecodeError::UnsupportedField {
                field: "bucket",
                value: bucket as u64,
            });
        }
        self.samples[index as usize][bucket] = sample;
        self.hits.set(index as usize, true);
        Ok(())
    }

    fn into_frames(self, header: &CoboHeader) -> Vec<Frame> {
        let event_time = header.event_time as i64 * COBO_NS_PER_TICK;
        self.hits
            .iter_ones()
            .map(|index| {
                let aget = (index as u32 / COBO_CHANNELS_PER_AGET) as u16;
                let channel = (index as u32 % COBO_CHANNELS_PER_AGET) as u16;
                let mut frame = Frame::new(
                    header.asad_id as u16,
                    aget,
                    channel,
                    LAYOUT.physical_id(header.asad_id as u16, aget, channel as u32),
                    header.event_id,
                    event_time,
                );
                frame.samples = self.samples[index];
                frame
            })
            .collect()
    }
}

/// Decoder for GET CoBo/AsAd .graw frames. Each frame holds one event from one AsAd.
#[derive(Debug, Default)]
pub struct CoboFormat;

impl CoboFormat {
    pub fn new() -> Self {
        Self
    }
}

impl FrameFormat for CoboFormat {
    fn name(&self) -> &'static str {
        "CoBo/AsAd"
    }

    fn prefix_len(&self) -> usize {
        4
    }

    fn frame_len(&self, prefix: &[u8]) -> Result<FrameLength, DecodeError> {
        let raw = RawFrame::new(prefix.to_vec());
        let meta = raw.u8(0)?;
        if meta != COBO_META_TYPE {
            return Err(DecodeError::BadSyncMarker {
                expected: COBO_META_TYPE as u32,
                found: meta as u32,
            });
        }
        let size = raw.u24_be(1)? as usize * COBO_SIZE_UNIT;
        if size < COBO_HEADER_SIZE || size > COBO_MAX_FRAME_SIZE {
            return Err(DecodeError::BadFrameLength(size));
        }
        Ok(FrameLength::Complete(size))
    }

    fn max_frame_len(&self) -> usize {
        COBO_MAX_FRAME_SIZE
    }

    fn decode(&mut self, raw: &RawFrame) -> Result<Vec<Frame>, DecodeError> {
        let header = CoboHeader::read(raw)?;
        let items = raw.slice(
            COBO_HEADER_SIZE,
            header.n_items as usize * header.item_size as usize,
        )?;
        let mut signals = AsadSignals::new();

        if header.frame_type == COBO_FRAME_TYPE_PARTIAL {
            for item in items.chunks_exact(4) {
                let aget = item[0] >> 6;
                let channel = (item[0] & 0x3F) as u32 * 2 + (item[1] >> 7) as u32;
                let bucket = (item[1] & 0x7F) as usize * 4 + (item[2] >> 6) as usize;
                let sample = ((item[2] & 0x0F) as u16) << 8 | item[3] as u16;
                signals.set(aget, channel, bucket, sample)?;
            }
        } else {
            // Bucket major; within a bucket each aget counts its own channels
            for (bucket, items) in items
                .chunks_exact(2 * COBO_CHANNELS_PER_ASAD as usize)
                .enumerate()
            {
                let mut next_channel = [0u32; 4];
                for item in items.chunks_exact(2) {
                    let aget = item[0] >> 6;
                    let sample = ((item[0] & 0x0F) as u16) << 8 | item[1] as u16;
                    let channel = next_channel[aget as usize];
                    next_channel[aget as usize] += 1;
                    signals.set(aget, channel, bucket, sample)?;
                }
            }
        }

        Ok(signals.into_frames(&header))
    }

    fn sync_pattern(&self) -> Option<SyncPattern> {
        Some(COBO_SYNC)
    }
}

/// A hit in a partial readout frame: (aget, channel, bucket, sample)
pub type PartialItem = (u8, u32, u32, u16);

/// Write a partial readout frame. Used to build synthetic data.
pub fn encode_partial(event_id: u32, ticks: u64, asad_id: u8, items: &[PartialItem]) -> Vec<u8> {
    let payload = items.len() * COBO_ITEM_SIZE_PARTIAL as usize;
    let units = (COBO_HEADER_SIZE + payload).div_ceil(COBO_SIZE_UNIT);
    let mut bytes = vec![0u8; units * COBO_SIZE_UNIT];
    bytes[0] = COBO_META_TYPE;
    bytes[1..4].copy_from_slice(&(units as u32).to_be_bytes()[1..]);
    bytes[5..7].copy_from_slice(&COBO_FRAME_TYPE_PARTIAL.to_be_bytes());
    bytes[7] = COBO_REVISION;
    bytes[8..10].copy_from_slice(&COBO_HEADER_UNITS.to_be_bytes());
    bytes[10..12].copy_from_slice(&COBO_ITEM_SIZE_PARTIAL.to_be_bytes());
    bytes[12..16].copy_from_slice(&(items.len() as u32).to_be_bytes());
    bytes[16..22].copy_from_slice(&ticks.to_be_bytes()[2..]);
    bytes[22..26].copy_from_slice(&event_id.to_be_bytes());
    bytes[27] = asad_id;
    for (item, dest) in items
        .iter()
        .zip(bytes[COBO_HEADER_SIZE..].chunks_exact_mut(4))
    {
        let (aget, channel, bucket, sample) = *item;
        dest[0] = aget << 6 | (channel / 2) as u8 & 0x3F;
        dest[1] = ((channel % 2) as u8) << 7 | (bucket / 4) as u8 & 0x7F;
        dest[2] = ((bucket % 4) as u8) << 6 | (sample >> 8) as u8 & 0x0F;
        dest[3] = sample as u8;
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_readout() {
        let items = [(1, 5, 0, 100), (1, 5, 1, 200), (3, 67, 511, 4095), (0, 0, 7, 1)];
        let bytes = encode_partial(42, 1000, 2, &items);
        let mut format = CoboFormat::new();
        assert_eq!(
            format.frame_len(&bytes[..4]).unwrap(),
            FrameLength::Complete(bytes.len())
        );

        let frames = format.decode(&RawFrame::new(bytes)).unwrap();
        assert_eq!(frames.len(), 3);
        // Frames come out in physical channel order
        assert_eq!(frames[0].physical_channel_id, 2 * 272);
        assert_eq!(frames[0].samples[7], 1);
        assert_eq!(frames[1].physical_channel_id, 2 * 272 + 68 + 5);
        assert_eq!(frames[1].samples[0], 100);
        assert_eq!(frames[1].samples[1], 200);
        assert_eq!(frames[2].physical_channel_id, 2 * 272 + 3 * 68 + 67);
        assert_eq!(frames[2].samples[511], 4095);
        for frame in frames.iter() {
            assert_eq!(frame.event_id, 42);
            assert_eq!(frame.event_time, 10_000);
            assert_eq!(frame.board_id, 2);
        }
    }

    #[test]
    fn test_full_readout() {
        let n_items = COBO_FULL_ITEM_COUNT as usize;
        let mut bytes = encode_partial(7, 1, 0, &[]);
        bytes.resize(COBO_HEADER_SIZE + n_items * 2, 0);
        let units = bytes.len() / COBO_SIZE_UNIT;
        bytes[1..4].copy_from_slice(&(units as u32).to_be_bytes()[1..]);
        bytes[5..7].copy_from_slice(&COBO_FRAME_TYPE_FULL.to_be_bytes());
        bytes[10..12].copy_from_slice(&COBO_ITEM_SIZE_FULL.to_be_bytes());
        bytes[12..16].copy_from_slice(&(n_items as u32).to_be_bytes());
        // Every bucket: 68 channels of each aget, agets interleaved
        for bucket in 0..SAMPLES_PER_FRAME {
            for item in 0..COBO_CHANNELS_PER_ASAD as usize {
                let aget = (item % 4) as u8;
                let offset = COBO_HEADER_SIZE + (bucket * 272 + item) * 2;
                bytes[offset] = aget << 6;
                bytes[offset + 1] = (item / 4) as u8;
            }
        }

        let mut format = CoboFormat::new();
        let frames = format.decode(&RawFrame::new(bytes)).unwrap();
        assert_eq!(frames.len(), 272);
        assert_eq!(frames[0].physical_channel_id, 0);
        assert_eq!(frames[69].chip_id, 1);
        assert_eq!(frames[69].channel_id, 1);
        assert_eq!(frames[69].samples[300], 1);
        assert_eq!(frames[271].samples[0], 67);
    }

    #[test]
    fn test_bad_header_fields() {
        let mut bytes = encode_partial(1, 1, 0, &[(0, 0, 0, 1)]);
        bytes[7] = 4;
        let mut format = CoboFormat::new();
        assert_eq!(
            format.decode(&RawFrame::new(bytes.clone())),
            Err(DecodeError::UnsupportedField {
                field: "revision",
                value: 4
            })
        );
        bytes[7] = COBO_REVISION;
        bytes[0] = 0x09;
        assert!(matches!(
            format.frame_len(&bytes[..4]),
            Err(DecodeError::BadSyncMarker { .. })
        ));
    }

    #[test]
    fn test_sync_pattern_matches_header() {
        let bytes = encode_partial(1, 1, 0, &[]);
        assert!(COBO_SYNC.matches(&bytes[..COBO_SYNC.len()]));
    }
}
