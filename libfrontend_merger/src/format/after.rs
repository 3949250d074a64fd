use fxhash::FxHashMap;

use super::{parse_run_uid, FrameFormat, FrameLength, SyncPattern};
use crate::channel_map::AsicMapping;
use crate::constants::*;
use crate::error::DecodeError;
use crate::frame::{Frame, RawFrame};
use crate::hardware_id::ChannelLayout;

const LAYOUT: ChannelLayout = ChannelLayout::new(FEMINOS_CHANNELS_PER_CHIP, FEMINOS_CHIPS_PER_CARD);

// Every acquisition file opens with a run UID like R2011.06.30-12:00:00
const RUN_UID: &str = "R[year].[month].[day]-[hour]:[minute]:[second]";

/// Header words of a single DCC data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PacketHeader {
    args: u16,
    ts_h: u16,
    ts_l: u16,
    scnt: u16,
}

impl PacketHeader {
    fn read(raw: &RawFrame, offset: usize) -> Result<Self, DecodeError> {
        Ok(Self {
            args: raw.u16_be(offset + 4)?,
            ts_h: raw.u16_be(offset + 6)?,
            ts_l: raw.u16_be(offset + 8)?,
            scnt: raw.u16_be(offset + 12)?,
        })
    }

    /// (fec, asic, channel) addressed by the packet
    fn address(&self) -> (u16, u16, u16) {
        let arg1 = (self.args & 0x3FF8) >> 3;
        let arg2 = self.args & 0x0007;
        let channel = arg1 / 6;
        let slot = 10 * (arg1 % 6) / 2 + arg2;
        (slot / 4, slot % 4, channel)
    }
}

/// Decoder for T2K DCC events from AFTER chips.
///
/// The DCC timestamp is a 32-bit counter, so the decoder accumulates the difference
/// between consecutive events into a monotonic tick count.
#[derive(Debug, Default)]
pub struct AfterFormat {
    previous_ticks: u32,
    elapsed_ticks: i64,
}

impl AfterFormat {
    pub fn new() -> Self {
        Self::default()
    }

    fn advance_clock(&mut self, ticks: u32) -> i64 {
        self.elapsed_ticks += ticks.wrapping_sub(self.previous_ticks) as i64;
        self.previous_ticks = ticks;
        self.elapsed_ticks * AFTER_NS_PER_TICK
    }
}

impl FrameFormat for AfterFormat {
    fn name(&self) -> &'static str {
        "AFTER"
    }

    fn prefix_len(&self) -> usize {
        AFTER_EVENT_HEADER_SIZE
    }

    fn frame_len(&self, prefix: &[u8]) -> Result<FrameLength, DecodeError> {
        let size = RawFrame::new(prefix.to_vec()).u32_be(0)? as usize;
        if size < AFTER_EVENT_HEADER_SIZE || size > AFTER_MAX_EVENT_SIZE {
            return Err(DecodeError::BadFrameLength(size));
        }
        Ok(FrameLength::Complete(size))
    }

    fn max_frame_len(&self) -> usize {
        AFTER_MAX_EVENT_SIZE
    }

    fn decode(&mut self, raw: &RawFrame) -> Result<Vec<Frame>, DecodeError> {
        let event_id = raw.u32_be(4)?;
        let mut event_time = self.elapsed_ticks * AFTER_NS_PER_TICK;
        let mut frames: Vec<Frame> = Vec::new();
        let mut index: FxHashMap<u32, usize> = FxHashMap::default();

        let mut offset = AFTER_EVENT_HEADER_SIZE;
        let mut first = true;
        while offset < raw.len() {
            let header = PacketHeader::read(raw, offset)?;
            offset += AFTER_PACKET_HEADER_SIZE;
            if first {
                event_time = self.advance_clock((header.ts_h as u32) << 16 | header.ts_l as u32);
                first = false;
            }

            let data = raw.slice(offset, header.scnt as usize * 2)?;
            offset += data.len() + (header.scnt as usize % 2) * 2 + AFTER_PACKET_TRAILER_SIZE;

            let (fec, asic, channel) = header.address();
            let Some(physical) = AsicMapping::After.physical_channel(channel) else {
                continue;
            };
            if header.scnt < AFTER_MIN_SAMPLES {
                continue;
            }

            let mut samples = [0u16; SAMPLES_PER_FRAME];
            let mut bin = 0usize;
            let mut points = 0usize;
            for word in data.chunks_exact(2) {
                let word = u16::from_be_bytes([word[0], word[1]]);
                if word & PFX_9_BIT_CONTENT_MASK == AFTER_CELL_INDEX_PREFIX << 9 {
                    bin = (word & 0x01FF) as usize;
                    // Nothing past the last cell belongs to this event
                    if bin == AFTER_LAST_CELL as usize {
                        break;
                    }
                } else if word & PFX_12_BIT_CONTENT_MASK == 0 {
                    if let Some(sample) = samples.get_mut(bin) {
                        *sample = word;
                        points += 1;
                    }
                    bin += 1;
                }
            }
            if points == 0 {
                continue;
            }

            let physical = LAYOUT.physical_id(fec, asic, physical);
            match index.get(&physical).copied() {
                Some(at) => {
                    for (sum, sample) in frames[at].samples.iter_mut().zip(samples.iter()) {
                        *sum = sum.saturating_add(*sample);
                    }
                }
                None => {
                    let mut frame = Frame::new(fec, asic, channel, physical, event_id, 0);
                    frame.samples = samples;
                    index.insert(physical, frames.len());
                    frames.push(frame);
                }
            }
        }

        for frame in frames.iter_mut() {
            frame.event_time = event_time;
        }
        Ok(frames)
    }

    // Events are length delimited
    fn sync_pattern(&self) -> Option<SyncPattern> {
        None
    }

    fn file_header_len(&self) -> usize {
        AFTER_FILE_HEADER_SIZE
    }

    fn read_file_header(&self, header: &RawFrame) -> Result<Option<i64>, DecodeError> {
        parse_run_uid(header.as_bytes(), RUN_UID).map(Some)
    }
}

/// One packet of a synthetic event: (fec, asic, raw channel, first cell, samples)
pub type AfterPacket<'a> = (u16, u16, u16, u16, &'a [u16]);

/// Write a DCC event. Used to build synthetic data.
pub fn encode_event(event_id: u32, ticks: u32, packets: &[AfterPacket]) -> Vec<u8> {
    let mut bytes: Vec<u8> = vec![0; AFTER_EVENT_HEADER_SIZE];
    for (fec, asic, channel, cell, samples) in packets {
        let slot = fec * 4 + asic;
        let arg1 = channel * 6 + slot / 5;
        let args = arg1 << 3 | slot % 5;
        let scnt = samples.len() as u16 + 1;
        let pad = (scnt % 2) * 2;
        let size =
            AFTER_PACKET_HEADER_SIZE as u16 + scnt * 2 + pad + AFTER_PACKET_TRAILER_SIZE as u16;
        let words = [
            size,
            0,
            args,
            (ticks >> 16) as u16,
            ticks as u16,
            0,
            scnt,
            AFTER_CELL_INDEX_PREFIX << 9 | cell,
        ];
        bytes.extend(words.iter().flat_map(|w| w.to_be_bytes()));
        bytes.extend(samples.iter().flat_map(|s| (s & SAMPLE_MASK).to_be_bytes()));
        bytes.extend(std::iter::repeat(0).take(pad as usize + AFTER_PACKET_TRAILER_SIZE));
    }
    let size = bytes.len() as u32;
    bytes[0..4].copy_from_slice(&size.to_be_bytes());
    bytes[4..8].copy_from_slice(&event_id.to_be_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_address() {
        for (fec, asic, channel) in [(0, 0, 3), (1, 2, 40), (5, 3, 78), (7, 1, 16)] {
            let bytes = encode_event(1, 0, &[(fec, asic, channel, 0, &[0u16; 10][..])]);
            let header = PacketHeader::read(&RawFrame::new(bytes), AFTER_EVENT_HEADER_SIZE).unwrap();
            assert_eq!(header.address(), (fec, asic, channel));
        }
    }

    #[test]
    fn test_decode_event() {
        let samples: Vec<u16> = (1..=20).collect();
        let bytes = encode_event(
            9,
            100,
            &[
                (1, 2, 3, 0, &samples[..]),
                (1, 2, 3, 100, &samples[..]),
                (0, 0, 2, 0, &samples[..]),
                (0, 1, 16, 0, &samples[..4]),
            ],
        );
        let mut format = AfterFormat::new();
        assert_eq!(
            format.frame_len(&bytes[..8]).unwrap(),
            FrameLength::Complete(bytes.len())
        );
        let frames = format.decode(&RawFrame::new(bytes)).unwrap();
        // Excluded channel 2 and the short packet are dropped, the two packets of
        // channel 3 are merged
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.event_id, 9);
        assert_eq!(frame.event_time, 100 * AFTER_NS_PER_TICK);
        assert_eq!(frame.physical_channel_id, 288 + 2 * 72);
        assert_eq!(frame.samples[0], 1);
        assert_eq!(frame.samples[119], 20);
    }

    #[test]
    fn test_last_cell_drops_packet() {
        let samples = [7u16; 10];
        let bytes = encode_event(1, 0, &[(0, 0, 3, 511, &samples[..])]);
        let mut format = AfterFormat::new();
        assert!(format.decode(&RawFrame::new(bytes)).unwrap().is_empty());
    }

    #[test]
    fn test_last_cell_truncates_packet() {
        let samples: Vec<u16> = (1..=12).collect();
        let mut bytes = encode_event(1, 0, &[(0, 0, 3, 100, &samples[..])]);
        // Replace the fifth sample with a jump to the last cell
        let at = AFTER_EVENT_HEADER_SIZE + AFTER_PACKET_HEADER_SIZE + 2 + 4 * 2;
        bytes[at..at + 2].copy_from_slice(&(AFTER_CELL_INDEX_PREFIX << 9 | AFTER_LAST_CELL).to_be_bytes());
        let mut format = AfterFormat::new();
        let frames = format.decode(&RawFrame::new(bytes)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].samples[100..104], &[1, 2, 3, 4]);
        assert!(frames[0].samples[104..].iter().all(|s| *s == 0));
        assert_eq!(frames[0].samples[511], 0);
    }

    #[test]
    fn test_file_header() {
        let format = AfterFormat::new();
        assert_eq!(format.file_header_len(), 20);
        let header = RawFrame::new(b"R2023.05.01-12:00:00".to_vec());
        assert_eq!(
            format.read_file_header(&header),
            Ok(Some(1_682_942_400_000_000_000))
        );
        assert!(format
            .read_file_header(&RawFrame::new(vec![0u8; 20]))
            .is_err());
    }

    #[test]
    fn test_clock_wraps() {
        let samples = [7u16; 10];
        let mut format = AfterFormat::new();
        let first = encode_event(1, u32::MAX - 9, &[(0, 0, 3, 0, &samples[..])]);
        let second = encode_event(2, 10, &[(0, 0, 3, 0, &samples[..])]);
        let t0 = format.decode(&RawFrame::new(first)).unwrap()[0].event_time;
        let t1 = format.decode(&RawFrame::new(second)).unwrap()[0].event_time;
        assert_eq!(t1 - t0, 20 * AFTER_NS_PER_TICK);
    }

    #[test]
    fn test_bad_event_size() {
        let format = AfterFormat::new();
        assert_eq!(
            format.frame_len(&[0, 0, 0, 4, 0, 0, 0, 1]),
            Err(DecodeError::BadFrameLength(4))
        );
    }
}
