//! Wire formats for each family of front-end electronics.
//!
//! Every format is a [`FrameFormat`]: it knows how to cut the next raw frame out of a
//! byte stream, how to decode a raw frame into channel [`Frame`]s, and which byte
//! pattern marks a frame boundary when a stream has to be resynchronized. Formats are
//! selected at runtime from the [`Electronics`] configuration, so every family lives in
//! the same binary.
pub mod after;
pub mod cobo;
pub mod feminos;
pub mod ustc;

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;

use super::channel_map::AsicMapping;
use super::constants::DEFAULT_MIN_POINTS;
use super::error::DecodeError;
use super::frame::{Frame, RawFrame};

/// How much of a frame is known after inspecting its prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    /// The full length of the frame in bytes, prefix included
    Complete(usize),
    /// More prefix bytes (this many in total) are needed to determine the length
    Prefix(usize),
}

/// A masked byte pattern marking the start of a recoverable position in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPattern {
    pub value: &'static [u8],
    pub mask: &'static [u8],
    /// Where the next frame begins, relative to the start of the match
    pub resume_offset: usize,
}

impl SyncPattern {
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() == self.value.len()
            && window
                .iter()
                .zip(self.value.iter().zip(self.mask.iter()))
                .all(|(byte, (value, mask))| byte & mask == value & mask)
    }
}

/// Whether a missing or mismatched end-of-frame marker rejects the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndMarkerPolicy {
    #[default]
    Strict,
    Relaxed,
}

/// Decoder settings shared across formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    pub end_marker: EndMarkerPolicy,
    /// FEMINOS signals with fewer sampled points than this are dropped
    pub min_points: usize,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            end_marker: EndMarkerPolicy::Strict,
            min_points: DEFAULT_MIN_POINTS,
        }
    }
}

/// A front-end wire format.
///
/// Implementations own any per-stream decoding state (for example the most recent
/// event header), so each stream gets its own instance.
pub trait FrameFormat: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Number of bytes to read before calling `frame_len` the first time
    fn prefix_len(&self) -> usize;

    /// Inspect the prefix of the next frame to find out how long it is
    fn frame_len(&self, prefix: &[u8]) -> Result<FrameLength, DecodeError>;

    /// Upper bound on the length of a single frame
    fn max_frame_len(&self) -> usize;

    /// Decode a raw frame into zero or more channel frames
    fn decode(&mut self, raw: &RawFrame) -> Result<Vec<Frame>, DecodeError>;

    /// The pattern used to resynchronize a stream after a decode error.
    ///
    /// None means frames are length delimited and a bad frame has already been
    /// consumed in full.
    fn sync_pattern(&self) -> Option<SyncPattern>;

    /// How many event ids a stream of this format may interleave
    fn default_reorder_depth(&self) -> u32 {
        0
    }

    /// Length of the header the DAQ writes at the start of every file, before the first frame
    fn file_header_len(&self) -> usize {
        0
    }

    /// Read a file header. Returns the run start it records (ns since the Unix epoch), if any.
    fn read_file_header(&self, _header: &RawFrame) -> Result<Option<i64>, DecodeError> {
        Ok(None)
    }
}

/// Parse the run start out of the date part of a run UID, read as UTC.
///
/// `description` is a `time` format description such as
/// `R[year].[month].[day]-[hour]:[minute]:[second]`.
fn parse_run_uid(text: &[u8], description: &str) -> Result<i64, DecodeError> {
    let bad_header = || DecodeError::BadFileHeader(String::from_utf8_lossy(text).into_owned());
    let text = std::str::from_utf8(text).map_err(|_| bad_header())?;
    let format = time::format_description::parse(description).map_err(|_| bad_header())?;
    let start = PrimitiveDateTime::parse(text, &format)
        .map_err(|_| bad_header())?
        .assume_utc();
    i64::try_from(start.unix_timestamp_nanos()).map_err(|_| bad_header())
}

/// The USTC readout revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UstcVariant {
    #[default]
    V3Long,
    V3Short,
    V4,
}

/// The electronics which produced the data, with any format specific options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Electronics {
    /// T2K DCC readout of AFTER chips
    After,
    /// FEMINOS word stream from AGET chips
    Aget,
    /// Single FEMINOS card word stream
    Feminos { asic: AsicMapping },
    /// Multi-FEMINOS (TCM) built events, raw DAQ channel numbering
    MultiFeminos,
    /// GET CoBo/AsAd .graw frames
    CoboAsad,
    /// USTC electronics
    Ustc { variant: UstcVariant },
}

impl Default for Electronics {
    fn default() -> Self {
        Self::Ustc {
            variant: UstcVariant::default(),
        }
    }
}

impl Electronics {
    /// Create a fresh decoder for one stream
    pub fn build_format(&self, options: &DecoderOptions) -> Box<dyn FrameFormat> {
        match self {
            Self::After => Box::new(after::AfterFormat::new()),
            Self::Aget => Box::new(feminos::FeminosFormat::new(AsicMapping::Aget, options)),
            Self::Feminos { asic } => Box::new(feminos::FeminosFormat::new(*asic, options)),
            Self::MultiFeminos => Box::new(feminos::FeminosFormat::built(options)),
            Self::CoboAsad => Box::new(cobo::CoboFormat::new()),
            Self::Ustc { variant } => Box::new(ustc::UstcFormat::new(*variant, options.end_marker)),
        }
    }

    /// The file extension data from these electronics is usually written with
    pub fn default_extension(&self) -> &'static str {
        match self {
            Self::After => "acq",
            Self::Aget | Self::Feminos { .. } | Self::MultiFeminos => "aqs",
            Self::CoboAsad => "graw",
            Self::Ustc { .. } => "dat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_pattern_mask() {
        let pattern = SyncPattern {
            value: &[0xAC, 0x0F, 0x40],
            mask: &[0xFF, 0xFF, 0xE0],
            resume_offset: 0,
        };
        assert!(pattern.matches(&[0xAC, 0x0F, 0x5C]));
        assert!(!pattern.matches(&[0xAC, 0x0F, 0x20]));
        assert!(!pattern.matches(&[0xAC, 0x0F]));
    }

    #[test]
    fn test_electronics_yaml() {
        let electronics: Electronics =
            serde_yaml::from_str("type: ustc\nvariant: v3_short\n").unwrap();
        assert_eq!(
            electronics,
            Electronics::Ustc {
                variant: UstcVariant::V3Short
            }
        );
        let electronics: Electronics = serde_yaml::from_str("type: feminos\nasic: after\n").unwrap();
        assert_eq!(
            electronics,
            Electronics::Feminos {
                asic: AsicMapping::After
            }
        );
        assert_eq!(Electronics::CoboAsad.default_extension(), "graw");
    }

    #[test]
    fn test_parse_run_uid() {
        assert_eq!(
            parse_run_uid(b"R2023.05.01-12:00:00", "R[year].[month].[day]-[hour]:[minute]:[second]"),
            Ok(1_682_942_400_000_000_000)
        );
        assert!(matches!(
            parse_run_uid(b"R2023.13.01-12:00:00", "R[year].[month].[day]-[hour]:[minute]:[second]"),
            Err(DecodeError::BadFileHeader(_))
        ));
    }
}
