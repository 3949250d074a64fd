use super::{parse_run_uid, DecoderOptions, EndMarkerPolicy, FrameFormat, FrameLength, SyncPattern};
use crate::channel_map::AsicMapping;
use crate::constants::*;
use crate::error::DecodeError;
use crate::frame::{Frame, RawFrame};
use crate::hardware_id::ChannelLayout;

const LAYOUT: ChannelLayout = ChannelLayout::new(FEMINOS_CHANNELS_PER_CHIP, FEMINOS_CHIPS_PER_CARD);

// Date part of the run UID, which follows two leading characters, e.g. R2019_05_02-12_00_00
const RUN_UID: &str = "R[year]_[month]_[day]-[hour]_[minute]_[second]";
const RUN_UID_DATE: std::ops::Range<usize> = 2..22;

// End of frame word followed by the start of a data frame
const FEMINOS_SYNC: SyncPattern = SyncPattern {
    value: &[0x0F, 0x00, 0x00, 0x08],
    mask: &[0xFF, 0xFF, 0x00, 0xFE],
    resume_offset: 2,
};

/// Event id and time from the most recent start of event word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EventContext {
    event_id: u32,
    event_time: i64,
}

/// The channel currently being filled while walking a data frame
struct OpenChannel {
    card: u16,
    chip: u16,
    channel: u16,
    physical: Option<u32>,
    samples: [u16; SAMPLES_PER_FRAME],
    points: usize,
    bin: usize,
}

/// Decoder for the FEMINOS 16-bit little-endian word stream, either straight from a
/// single card or from a multi-FEMINOS event builder.
///
/// A raw frame is one data/configuration/monitoring frame or one of the standalone
/// control words (built event markers, ASCII messages). Event ids and times are carried
/// by start of event words inside data frames and apply to every channel that follows
/// them on the stream.
#[derive(Debug)]
pub struct FeminosFormat {
    mapping: AsicMapping,
    /// Written by a multi-FEMINOS event builder rather than a single card
    built: bool,
    end_marker: EndMarkerPolicy,
    min_points: usize,
    event: Option<EventContext>,
}

fn word(raw: &RawFrame, index: usize) -> Result<u16, DecodeError> {
    raw.u16_le(index * 2)
}

/// Clock ticks from the three timestamp words, combined the way the DAQ software does
fn combine_ticks(low: i64, mid: i64, high: i64) -> i64 {
    (high << 31) + (mid << 15) + low
}

fn is_frame_start(word: u16) -> bool {
    matches!(
        word & PFX_9_BIT_CONTENT_MASK,
        PFX_START_OF_DFRAME | PFX_START_OF_MFRAME | PFX_START_OF_CFRAME
    )
}

impl FeminosFormat {
    /// A single card read out directly
    pub fn new(mapping: AsicMapping, options: &DecoderOptions) -> Self {
        Self {
            mapping,
            built: false,
            end_marker: options.end_marker,
            min_points: options.min_points,
            event: None,
        }
    }

    /// Events from a multi-FEMINOS event builder, with raw DAQ channel numbering
    pub fn built(options: &DecoderOptions) -> Self {
        Self {
            built: true,
            ..Self::new(AsicMapping::Raw, options)
        }
    }

    fn close_channel(
        &self,
        open: Option<OpenChannel>,
        frames: &mut Vec<Frame>,
    ) -> Result<(), DecodeError> {
        let Some(open) = open else {
            return Ok(());
        };
        let Some(physical) = open.physical else {
            return Ok(());
        };
        if open.points < self.min_points {
            return Ok(());
        }
        let event = self.event.ok_or(DecodeError::UnsupportedField {
            field: "channel data before start of event",
            value: open.channel as u64,
        })?;
        let mut frame = Frame::new(
            open.card,
            open.chip,
            open.channel,
            physical,
            event.event_id,
            event.event_time,
        );
        frame.samples = open.samples;
        frames.push(frame);
        Ok(())
    }

    fn decode_data_frame(&mut self, raw: &RawFrame) -> Result<Vec<Frame>, DecodeError> {
        let n_words = raw.len() / 2;
        let mut frames = Vec::new();
        let mut open: Option<OpenChannel> = None;
        let mut ended = false;

        // Skip the start word and the size word
        let mut index = 2;
        while index < n_words {
            let w = word(raw, index)?;
            index += 1;
            if w & PFX_14_BIT_CONTENT_MASK == PFX_CARD_CHIP_CHAN_HIT_IX {
                self.close_channel(open.take(), &mut frames)?;
                let card = (w >> 9) & 0x1F;
                let chip = (w >> 7) & 0x03;
                let channel = w & 0x7F;
                let physical = self
                    .mapping
                    .physical_channel(channel)
                    .map(|physical| LAYOUT.physical_id(card, chip, physical));
                open = Some(OpenChannel {
                    card,
                    chip,
                    channel,
                    physical,
                    samples: [0; SAMPLES_PER_FRAME],
                    points: 0,
                    bin: 0,
                });
            } else if w & PFX_12_BIT_CONTENT_MASK == PFX_ADC_SAMPLE {
                if let Some(open) = open.as_mut() {
                    if open.bin >= SAMPLES_PER_FRAME {
                        return Err(DecodeError::UnsupportedField {
                            field: "time bin",
                            value: open.bin as u64,
                        });
                    }
                    open.samples[open.bin] = w & SAMPLE_MASK;
                    open.points += 1;
                    open.bin += 1;
                }
            } else if w & PFX_9_BIT_CONTENT_MASK == PFX_TIME_BIN_IX {
                if let Some(open) = open.as_mut() {
                    open.bin = (w & 0x01FF) as usize;
                }
            } else if w & PFX_4_BIT_CONTENT_MASK == PFX_START_OF_EVENT {
                self.close_channel(open.take(), &mut frames)?;
                let low = word(raw, index)? as i64;
                let mid = word(raw, index + 1)? as i64;
                let high = word(raw, index + 2)? as i64;
                let count_low = word(raw, index + 3)? as u32;
                let count_high = word(raw, index + 4)? as u32;
                index += 5;
                self.event = Some(EventContext {
                    event_id: count_high << 16 | count_low,
                    event_time: combine_ticks(low, mid, high) * FEMINOS_NS_PER_TICK,
                });
            } else if w & PFX_4_BIT_CONTENT_MASK == PFX_END_OF_EVENT {
                self.close_channel(open.take(), &mut frames)?;
                // Followed by the event size
                index += 1;
            } else if w == PFX_END_OF_FRAME {
                self.close_channel(open.take(), &mut frames)?;
                ended = true;
                break;
            }
        }
        self.close_channel(open.take(), &mut frames)?;

        if !ended && self.end_marker == EndMarkerPolicy::Strict {
            let last = word(raw, n_words.saturating_sub(1))?;
            return Err(DecodeError::BadEndMarker {
                expected: PFX_END_OF_FRAME as u32,
                found: last as u32,
            });
        }
        Ok(frames)
    }
}

impl FrameFormat for FeminosFormat {
    fn name(&self) -> &'static str {
        if self.built {
            return "multi-FEMINOS";
        }
        match self.mapping {
            AsicMapping::Raw => "FEMINOS",
            AsicMapping::After => "FEMINOS (AFTER)",
            AsicMapping::Aget => "FEMINOS (AGET)",
        }
    }

    fn prefix_len(&self) -> usize {
        2
    }

    fn frame_len(&self, prefix: &[u8]) -> Result<FrameLength, DecodeError> {
        let raw = RawFrame::new(prefix.to_vec());
        let first = raw.u16_le(0)?;
        if is_frame_start(first) {
            if prefix.len() < 4 {
                return Ok(FrameLength::Prefix(4));
            }
            let size = raw.u16_le(2)? as usize;
            if size < 4 || size % 2 != 0 {
                return Err(DecodeError::BadFrameLength(size));
            }
            return Ok(FrameLength::Complete(size));
        }
        if first & PFX_8_BIT_CONTENT_MASK == PFX_ASCII_MSG_LEN {
            let len = (first & 0x00FF) as usize;
            return Ok(FrameLength::Complete(2 + len + len % 2));
        }
        match first {
            PFX_START_OF_BUILT_EVENT | PFX_END_OF_BUILT_EVENT => Ok(FrameLength::Complete(2)),
            PFX_SOBE_SIZE => Ok(FrameLength::Complete(6)),
            _ => Err(DecodeError::BadSyncMarker {
                expected: PFX_START_OF_DFRAME as u32,
                found: first as u32,
            }),
        }
    }

    fn max_frame_len(&self) -> usize {
        FEMINOS_MAX_FRAME_SIZE
    }

    fn decode(&mut self, raw: &RawFrame) -> Result<Vec<Frame>, DecodeError> {
        let first = raw.u16_le(0)?;
        if first & PFX_9_BIT_CONTENT_MASK == PFX_START_OF_DFRAME {
            self.decode_data_frame(raw)
        } else if is_frame_start(first)
            || first & PFX_8_BIT_CONTENT_MASK == PFX_ASCII_MSG_LEN
            || matches!(
                first,
                PFX_START_OF_BUILT_EVENT | PFX_END_OF_BUILT_EVENT | PFX_SOBE_SIZE
            )
        {
            // Configuration, monitoring, and control words carry no signals
            Ok(vec![])
        } else {
            Err(DecodeError::BadSyncMarker {
                expected: PFX_START_OF_DFRAME as u32,
                found: first as u32,
            })
        }
    }

    fn sync_pattern(&self) -> Option<SyncPattern> {
        Some(FEMINOS_SYNC)
    }

    fn file_header_len(&self) -> usize {
        if self.built {
            MULTI_FEMINOS_FILE_HEADER_SIZE
        } else {
            FEMINOS_FILE_HEADER_SIZE
        }
    }

    fn read_file_header(&self, header: &RawFrame) -> Result<Option<i64>, DecodeError> {
        if !self.built {
            let date = header.slice(RUN_UID_DATE.start, RUN_UID_DATE.len())?;
            return parse_run_uid(date, RUN_UID).map(Some);
        }
        let prefix = header.u16_le(0)?;
        if prefix & PFX_8_BIT_CONTENT_MASK != PFX_ASCII_MSG_LEN {
            return Err(DecodeError::BadFileHeader(format!("{prefix:#06x}")));
        }
        let seconds = header.i32_le(2)? as i64;
        Ok(Some(seconds * 1_000_000_000))
    }
}

/// Write the header a single card DAQ puts at the start of a file. Used to build synthetic data.
pub fn encode_run_uid_header(run_uid: &str) -> Vec<u8> {
    let mut bytes = vec![0u8; FEMINOS_FILE_HEADER_SIZE];
    let uid = run_uid.as_bytes();
    let len = uid.len().min(FEMINOS_FILE_HEADER_SIZE - 2);
    bytes[..len].copy_from_slice(&uid[..len]);
    bytes
}

/// Write the header a multi-FEMINOS DAQ puts at the start of a file. Used to build synthetic data.
pub fn encode_built_header(start_seconds: i32) -> Vec<u8> {
    let mut bytes = PFX_ASCII_MSG_LEN.to_le_bytes().to_vec();
    bytes.extend(start_seconds.to_le_bytes());
    bytes
}

/// One channel of a synthetic data frame: (chip, raw channel, samples from bin 0)
pub type ChannelData<'a> = (u16, u16, &'a [u16]);

/// Write a data frame holding a single event. Used to build synthetic data.
pub fn encode_data_frame(card: u16, event_id: u32, ticks: i64, channels: &[ChannelData]) -> Vec<u8> {
    let mut words: Vec<u16> = vec![PFX_START_OF_DFRAME | (card & 0x1F), 0];
    words.push(PFX_START_OF_EVENT);
    words.push((ticks & 0x7FFF) as u16);
    words.push((ticks >> 15) as u16);
    words.push((ticks >> 31) as u16);
    words.push(event_id as u16);
    words.push((event_id >> 16) as u16);
    for (chip, channel, samples) in channels {
        words.push(PFX_CARD_CHIP_CHAN_HIT_IX | (card & 0x1F) << 9 | (chip & 0x03) << 7 | (channel & 0x7F));
        words.push(PFX_TIME_BIN_IX);
        words.extend(samples.iter().map(|s| PFX_ADC_SAMPLE | (s & SAMPLE_MASK)));
    }
    words.push(PFX_END_OF_EVENT);
    words.push(0);
    words.push(PFX_END_OF_FRAME);
    words[1] = (words.len() * 2) as u16;
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}
