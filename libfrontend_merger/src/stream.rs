use std::collections::VecDeque;
use std::path::PathBuf;

use super::error::{DecodeError, FileStackError, ReadError, ResyncError};
use super::file_stack::FileStack;
use super::format::FrameFormat;
use super::frame::{Frame, RawFrame};
use super::resync::resync;

/// What pulling from a stream produced
#[derive(Debug)]
pub enum Pulled {
    Frame(Frame),
    /// A frame was rejected. The event is the last one seen on the stream, if any.
    Corrupt {
        event_id: Option<u32>,
        error: DecodeError,
    },
    Finished,
}

/// Running totals for a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames: u64,
    pub corrupt_frames: u64,
    pub resyncs: u64,
    pub skipped_bytes: u64,
}

/// A single front-end stream: a file stack paired with the decoder for its format.
///
/// The stream hands out decoded frames one at a time, and recovers from corrupt
/// frames by resynchronizing on the format's sync pattern.
#[derive(Debug)]
pub struct FrameStream {
    name: String,
    stack: FileStack,
    format: Box<dyn FrameFormat>,
    pending: VecDeque<Frame>,
    last_event_id: Option<u32>,
    max_resync_bytes: u64,
    run_start_ns: Option<i64>,
    is_finished: bool,
    stats: StreamStats,
}

impl FrameStream {
    pub fn new(
        name: &str,
        files: &[PathBuf],
        format: Box<dyn FrameFormat>,
        max_resync_bytes: u64,
    ) -> Result<Self, FileStackError> {
        let mut stack = FileStack::new(files)?;
        stack.set_file_header_len(format.file_header_len());
        Ok(Self {
            name: name.to_string(),
            stack,
            format,
            pending: VecDeque::new(),
            last_event_id: None,
            max_resync_bytes,
            run_start_ns: None,
            is_finished: false,
            stats: StreamStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format_name(&self) -> &'static str {
        self.format.name()
    }

    pub fn default_reorder_depth(&self) -> u32 {
        self.format.default_reorder_depth()
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished && self.pending.is_empty()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn stack(&self) -> &FileStack {
        &self.stack
    }

    /// Run start recorded in the header of the first file, once it has been read
    pub fn run_start_ns(&self) -> Option<i64> {
        self.run_start_ns
    }

    /// Pull the next frame from the stream
    pub fn pull(&mut self) -> Pulled {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                self.last_event_id = Some(frame.event_id);
                self.stats.frames += 1;
                return Pulled::Frame(frame);
            }
            if self.is_finished {
                return Pulled::Finished;
            }

            let next = self.stack.next_raw_frame(self.format.as_ref());
            self.read_file_headers();
            match next {
                Ok(raw) => match self.format.decode(&raw) {
                    Ok(frames) => self.pending.extend(frames),
                    Err(error) => return self.reject(raw, error, false),
                },
                Err(ReadError::BadPrefix { error, prefix }) => {
                    return self.reject(prefix, error, true)
                }
                Err(ReadError::EndOfStream) => {
                    spdlog::info!("Stream {} has been fully read.", self.name);
                    self.is_finished = true;
                }
            }
        }
    }

    fn read_file_headers(&mut self) {
        while let Some(header) = self.stack.take_file_header() {
            match self.format.read_file_header(&header) {
                Ok(Some(start)) => {
                    spdlog::info!("Stream {} file header gives a run start of {start} ns", self.name);
                    self.run_start_ns.get_or_insert(start);
                }
                Ok(None) => (),
                Err(e) => spdlog::warn!(
                    "Stream {} has a bad file header in {}: {e}",
                    self.name,
                    self.stack.active_path().display()
                ),
            }
        }
    }

    /// Give up on the rest of the stream
    fn abandon(&mut self) {
        self.is_finished = true;
        self.stack.close();
    }

    /// Record a corrupt frame and put the stream back on a frame boundary
    fn reject(&mut self, raw: RawFrame, error: DecodeError, bad_prefix: bool) -> Pulled {
        spdlog::warn!(
            "Stream {} rejected a {} frame near event {:?} in {}: {error}",
            self.name,
            self.format.name(),
            self.last_event_id,
            self.stack.active_path().display()
        );
        self.stats.corrupt_frames += 1;
        let corrupt = Pulled::Corrupt {
            event_id: self.last_event_id,
            error,
        };

        let Some(pattern) = self.format.sync_pattern() else {
            // Without a sync pattern only a whole, length delimited frame can be skipped
            if bad_prefix {
                spdlog::error!(
                    "Stream {} cannot recover from a bad frame length; abandoning the stream.",
                    self.name
                );
                self.abandon();
            }
            return corrupt;
        };

        // Rescan everything after the first byte of the rejected frame
        if raw.len() > 1 {
            self.stack.unread(&raw.as_bytes()[1..]);
        }
        let resynced = resync(&mut self.stack, &pattern, self.max_resync_bytes);
        self.read_file_headers();
        match resynced {
            Ok(skipped) => {
                self.stats.resyncs += 1;
                self.stats.skipped_bytes += skipped + 1;
                spdlog::warn!(
                    "Stream {} successfully switched to the next frame (+{} bytes)",
                    self.name,
                    skipped + 1
                );
            }
            Err(ResyncError::EndOfStream) => {
                spdlog::warn!("Stream {} ended while resynchronizing.", self.name);
                self.is_finished = true;
            }
            Err(e) => {
                spdlog::error!("Stream {} could not be resynchronized: {e}", self.name);
                self.abandon();
            }
        }
        corrupt
    }
}
