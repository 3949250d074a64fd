use super::config::Config;
use super::error::MergerError;
use super::error_ledger::ErrorLedger;
use super::event::{ReassembledEvent, RunMetadata, SignalAssembler};
use super::event_buffer::EventBuffer;
use super::file_stack::discover_streams;
use super::frame::Frame;
use super::stream::{FrameStream, Pulled};

/// A stream along with the frame at its head, if any
#[derive(Debug)]
struct StreamCursor {
    stream: FrameStream,
    head: Option<Frame>,
}

impl StreamCursor {
    /// Pull until the cursor has a head frame or the stream is finished. Corrupt frames
    /// are recorded along the way.
    fn refill(&mut self, buffer: &mut EventBuffer, ledger: &mut ErrorLedger) {
        while self.head.is_none() {
            match self.stream.pull() {
                Pulled::Frame(frame) => self.head = Some(frame),
                Pulled::Corrupt { event_id, .. } => {
                    ledger.record_decode_error(event_id);
                    if let Some(id) = event_id {
                        buffer.mark_error(id);
                    }
                }
                Pulled::Finished => return,
            }
        }
    }

    fn head_event(&self) -> Option<u32> {
        self.head.as_ref().map(|frame| frame.event_id)
    }
}

/// Merges the frames of every stream of a run into events.
///
/// Each iteration takes the frames with the lowest event id from the heads of the
/// streams and adds them to the reassembly buffer. Once no stream can still hold data
/// for an event (the lowest head is more than the reorder depth past it) the event is
/// flushed. When every stream is finished the remaining events are flushed.
#[derive(Debug)]
pub struct Merger {
    cursors: Vec<StreamCursor>,
    buffer: EventBuffer,
    ledger: ErrorLedger,
    assembler: SignalAssembler,
    reorder_depth: u32,
    total_data_size: u64,
}

impl Merger {
    /// Create a new merger for the given run, discovering its streams on disk
    pub fn new(config: &Config, run_number: i32) -> Result<Self, MergerError> {
        let run_path = config.get_run_directory(run_number)?;
        let extension = config.get_file_extension();
        let options = config.decoder_options();
        let mut streams: Vec<FrameStream> = Vec::new();
        for (name, files) in discover_streams(&run_path, &extension)? {
            let stream = FrameStream::new(
                &name,
                &files,
                config.electronics.build_format(&options),
                config.max_resync_bytes,
            )?;
            spdlog::info!(
                "Found stream {} ({} files, {}) read as {}",
                name,
                files.len(),
                human_bytes::human_bytes(stream.stack().total_stack_size_bytes as f64),
                stream.format_name()
            );
            streams.push(stream);
        }
        let reorder_depth = config.get_reorder_depth();
        let mut merger = Self::from_streams(
            streams,
            config.window_size,
            reorder_depth,
            config.run_metadata(run_number)?,
        )?;
        if config.run_start.is_none() {
            merger.adopt_header_run_start();
        }
        Ok(merger)
    }

    /// Use the earliest run start found in the file headers of the streams, if any
    fn adopt_header_run_start(&mut self) {
        let Some(start) = self
            .cursors
            .iter()
            .filter_map(|cursor| cursor.stream.run_start_ns())
            .min()
        else {
            return;
        };
        spdlog::info!("Using the run start of {start} ns from the file headers");
        self.assembler.set_start_epoch_ns(start);
    }

    /// Create a merger from already opened streams
    pub fn from_streams(
        streams: Vec<FrameStream>,
        window: u32,
        reorder_depth: u32,
        run: RunMetadata,
    ) -> Result<Self, MergerError> {
        if streams.is_empty() {
            return Err(MergerError::NoStreams);
        }
        let total_data_size = streams
            .iter()
            .map(|stream| stream.stack().total_stack_size_bytes)
            .sum();
        let mut merger = Self {
            cursors: streams
                .into_iter()
                .map(|stream| StreamCursor { stream, head: None })
                .collect(),
            buffer: EventBuffer::new(window),
            ledger: ErrorLedger::new(),
            assembler: SignalAssembler::new(run),
            reorder_depth,
            total_data_size,
        };
        merger.refill_heads();
        Ok(merger)
    }

    /// Produce the next event, in increasing event id order. None once every stream is
    /// exhausted and every event has been emitted.
    pub fn next_event(&mut self) -> Option<ReassembledEvent> {
        loop {
            if let Some(mut slot) = self.buffer.take_completed() {
                if slot.event_id().is_some_and(|id| self.ledger.has_error(id)) {
                    slot.mark_error();
                }
                return Some(self.assembler.assemble(slot));
            }

            let Some(min_event) = self.min_head_event() else {
                if self.buffer.is_empty() {
                    return None;
                }
                self.buffer.flush_all();
                continue;
            };

            for cursor in self.cursors.iter_mut() {
                if cursor.head_event() != Some(min_event) {
                    continue;
                }
                if let Some(frame) = cursor.head.take() {
                    if let Err(e) = self.buffer.add_frame(frame) {
                        spdlog::warn!("Stream {}: {e}", cursor.stream.name());
                        self.ledger.record_reassembly_error(&e);
                    }
                }
            }
            self.refill_heads();

            match self.min_head_event() {
                Some(next) => self
                    .buffer
                    .advance_and_flush(next.saturating_sub(self.reorder_depth)),
                None => self.buffer.flush_all(),
            }
        }
    }

    fn refill_heads(&mut self) {
        for cursor in self.cursors.iter_mut() {
            cursor.refill(&mut self.buffer, &mut self.ledger);
        }
    }

    fn min_head_event(&self) -> Option<u32> {
        self.cursors
            .iter()
            .filter_map(|cursor| cursor.head_event())
            .min()
    }

    pub fn get_total_data_size(&self) -> &u64 {
        &self.total_data_size
    }

    /// Bytes read so far across every stream
    pub fn get_bytes_read(&self) -> u64 {
        self.cursors
            .iter()
            .map(|cursor| cursor.stream.stack().bytes_read())
            .sum()
    }

    pub fn get_streams(&self) -> impl Iterator<Item = &FrameStream> {
        self.cursors.iter().map(|cursor| &cursor.stream)
    }

    pub fn get_ledger(&self) -> &ErrorLedger {
        &self.ledger
    }

    pub fn get_reorder_depth(&self) -> u32 {
        self.reorder_depth
    }

    /// Log the per stream statistics and the error ledger
    pub fn report(&self) {
        for stream in self.get_streams() {
            let stats = stream.stats();
            spdlog::info!(
                "Stream {}: {} frames, {} corrupt, {} resyncs skipping {}",
                stream.name(),
                stats.frames,
                stats.corrupt_frames,
                stats.resyncs,
                human_bytes::human_bytes(stats.skipped_bytes as f64)
            );
        }
        self.ledger.report();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ustc::{encode_v3, UstcFormat};
    use crate::format::{EndMarkerPolicy, UstcVariant};
    use std::io::Write;
    use std::path::{Path, PathBuf};

    const VARIANT: UstcVariant = UstcVariant::V3Long;

    fn frame(board: u16, channel: u16, event: u32, time: i64) -> Frame {
        let mut frame = Frame::new(board, 0, channel, board as u32 * 256 + channel as u32, event, time);
        frame.samples[200] = 100;
        frame
    }

    fn write_stream(dir: &Path, name: &str, frames: &[Frame]) -> Vec<PathBuf> {
        let path = dir.join(format!("{name}_0001.dat"));
        let mut file = std::fs::File::create(&path).unwrap();
        for frame in frames {
            file.write_all(&encode_v3(VARIANT, frame)).unwrap();
        }
        vec![path]
    }

    fn open(files: &[PathBuf]) -> FrameStream {
        let format = UstcFormat::new(VARIANT, EndMarkerPolicy::Strict);
        FrameStream::new("stream", files, Box::new(format), 1 << 20).unwrap()
    }

    fn merge(streams: Vec<FrameStream>, window: u32, depth: u32) -> (Vec<ReassembledEvent>, ErrorLedger) {
        let mut merger = Merger::from_streams(streams, window, depth, RunMetadata::default()).unwrap();
        let events = std::iter::from_fn(|| merger.next_event()).collect();
        (events, merger.get_ledger().clone())
    }

    fn channel_ids(event: &ReassembledEvent) -> Vec<u32> {
        event.signals.iter().map(|signal| signal.id).collect()
    }

    #[test]
    fn test_event_emitted_before_next() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_stream(
            dir.path(),
            "board",
            &[frame(0, 3, 5, 10), frame(0, 7, 5, 10), frame(0, 12, 5, 10), frame(0, 1, 6, 20)],
        );
        let mut merger = Merger::from_streams(vec![open(&files)], 4, 0, RunMetadata::default()).unwrap();

        let first = merger.next_event().unwrap();
        assert_eq!(first.event_id, 5);
        assert_eq!(channel_ids(&first), vec![3, 7, 12]);
        assert!(first.ok);
        for signal in first.signals.iter() {
            assert_eq!(signal.samples[200], 100);
        }
        let second = merger.next_event().unwrap();
        assert_eq!(second.event_id, 6);
        assert!(merger.next_event().is_none());
        assert!(merger.next_event().is_none());
    }

    #[test]
    fn test_two_boards_inconsistent_time() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_stream(dir.path(), "a", &[frame(0, 1, 10, 100), frame(0, 2, 10, 100)]);
        let b = write_stream(dir.path(), "b", &[frame(1, 1, 10, 999)]);
        let (events, ledger) = merge(vec![open(&a), open(&b)], 4, 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, 10);
        assert!(!events[0].ok);
        assert_eq!(events[0].timestamp, 100);
        // First seen order
        assert_eq!(channel_ids(&events[0]), vec![1, 257, 2]);
        assert!(ledger.has_error(10));
    }

    #[test]
    fn test_streams_merge_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_stream(
            dir.path(),
            "a",
            &[frame(0, 1, 1, 1), frame(0, 1, 2, 2), frame(0, 1, 4, 4)],
        );
        let b = write_stream(
            dir.path(),
            "b",
            &[frame(1, 1, 1, 1), frame(1, 1, 3, 3), frame(1, 1, 4, 4)],
        );
        let (events, ledger) = merge(vec![open(&a), open(&b)], 4, 0);
        let ids: Vec<u32> = events.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(events[0].signals.len(), 2);
        assert_eq!(events[1].signals.len(), 1);
        assert_eq!(events[3].signals.len(), 2);
        assert!(events.iter().all(|e| e.ok));
        assert!(ledger.is_clean());
    }

    #[test]
    fn test_interleaved_within_reorder_depth() {
        // Frames of neighbouring events interleave within one stream
        let dir = tempfile::tempdir().unwrap();
        let files = write_stream(
            dir.path(),
            "board",
            &[frame(0, 1, 1, 1), frame(0, 1, 2, 2), frame(0, 2, 1, 1), frame(0, 2, 2, 2)],
        );
        let (events, ledger) = merge(vec![open(&files)], 4, 1);
        assert_eq!(events.len(), 2);
        assert_eq!(channel_ids(&events[0]), vec![1, 2]);
        assert_eq!(channel_ids(&events[1]), vec![1, 2]);
        assert!(ledger.is_clean());

        // Without the reorder depth the late frame is stale
        let files = write_stream(
            dir.path(),
            "board",
            &[frame(0, 1, 1, 1), frame(0, 1, 2, 2), frame(0, 2, 1, 1), frame(0, 2, 2, 2)],
        );
        let (events, ledger) = merge(vec![open(&files)], 4, 0);
        assert_eq!(channel_ids(&events[0]), vec![1]);
        assert_eq!(ledger.stale_frames, 1);
    }

    #[test]
    fn test_permutation_independence() {
        let dir = tempfile::tempdir().unwrap();
        let channels = [4u16, 9, 2, 30];
        let mut expected: Vec<u32> = Vec::new();
        let mut orders: Vec<Vec<u16>> = vec![channels.to_vec()];
        let mut reversed = channels.to_vec();
        reversed.reverse();
        orders.push(reversed);
        for order in orders {
            let frames: Vec<Frame> = order.iter().map(|c| frame(0, *c, 8, 5)).collect();
            let files = write_stream(dir.path(), "board", &frames);
            let (events, _) = merge(vec![open(&files)], 2, 0);
            assert_eq!(events.len(), 1);
            let mut ids = channel_ids(&events[0]);
            ids.sort();
            if expected.is_empty() {
                expected = ids;
            } else {
                assert_eq!(ids, expected);
            }
            for signal in events[0].signals.iter() {
                assert_eq!(signal.samples[200], 100);
            }
        }
        assert_eq!(expected, vec![2, 4, 9, 30]);
    }

    #[test]
    fn test_window_overflow_marks_event() {
        let dir = tempfile::tempdir().unwrap();
        // With a deep reorder the window cannot advance past event 1 before event 5 arrives
        let a = write_stream(dir.path(), "a", &[frame(0, 1, 1, 1), frame(0, 1, 5, 5)]);
        let b = write_stream(dir.path(), "b", &[frame(1, 1, 1, 1)]);
        let (events, ledger) = merge(vec![open(&a), open(&b)], 2, 4);
        let ids: Vec<u32> = events.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![1]);
        assert!(events[0].ok);
        assert_eq!(ledger.window_overflows, 1);
        assert!(ledger.has_error(5));

        // A shallow reorder lets the window move up to event 5 instead
        let a = write_stream(dir.path(), "a", &[frame(0, 1, 1, 1), frame(0, 1, 5, 5)]);
        let b = write_stream(dir.path(), "b", &[frame(1, 1, 1, 1)]);
        let (events, ledger) = merge(vec![open(&a), open(&b)], 2, 0);
        let ids: Vec<u32> = events.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![1, 5]);
        assert!(ledger.is_clean());
    }

    #[test]
    fn test_corrupt_frame_marks_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board_0001.dat");
        let mut bytes = encode_v3(VARIANT, &frame(0, 1, 1, 1));
        bytes.extend(encode_v3(VARIANT, &frame(0, 2, 1, 1)));
        let mut bad = encode_v3(VARIANT, &frame(0, 3, 1, 1));
        bad[3] = 0x20;
        bytes.extend(bad);
        bytes.extend(encode_v3(VARIANT, &frame(0, 1, 2, 2)));
        std::fs::write(&path, bytes).unwrap();

        let (events, ledger) = merge(vec![open(&[path])], 4, 0);
        assert_eq!(events.len(), 2);
        assert!(!events[0].ok);
        assert_eq!(channel_ids(&events[0]), vec![1, 2]);
        assert!(events[1].ok);
        assert_eq!(ledger.n_error_events(), 1);
    }

    #[test]
    fn test_no_streams() {
        assert!(matches!(
            Merger::from_streams(vec![], 4, 0, RunMetadata::default()),
            Err(MergerError::NoStreams)
        ));
    }
}
