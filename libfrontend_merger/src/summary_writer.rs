use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::SinkError;
use super::merger::Merger;
use super::sink::{EventMetadata, EventSink};

/// What the summary keeps of each event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub event_id: u32,
    pub timestamp: i64,
    pub ok: bool,
    pub n_channels: usize,
    /// Largest sample over every channel
    pub peak: u16,
}

/// Per stream totals recorded at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub format: String,
    pub frames: u64,
    pub corrupt_frames: u64,
    pub resyncs: u64,
    pub skipped_bytes: String,
}

#[derive(Debug, Default, Serialize)]
struct RunSummary {
    file_info: BTreeMap<String, Vec<String>>,
    streams: BTreeMap<String, StreamSummary>,
    n_events: usize,
    n_bad_events: usize,
    error_events: Vec<u32>,
    events: Vec<EventSummary>,
}

/// An event sink which writes a YAML summary of a run.
///
/// Events are summarized as they arrive; the file itself is written by `close`.
#[derive(Debug)]
pub struct SummaryWriter {
    path: PathBuf,
    summary: RunSummary,
    open: Option<EventSummary>,
}

impl SummaryWriter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            summary: RunSummary::default(),
            open: None,
        }
    }

    pub fn n_events(&self) -> usize {
        self.summary.events.len()
    }

    pub fn n_bad_events(&self) -> usize {
        self.summary.events.iter().filter(|e| !e.ok).count()
    }

    /// Record the files (and their sizes) making up every stream of the merger
    pub fn write_fileinfo(&mut self, merger: &Merger) {
        for stream in merger.get_streams() {
            let stack = stream.stack();
            let paths = std::iter::once(stack.active_path())
                .chain(stack.file_stack.iter().map(|path| path.as_path()));
            let mut file_list = Vec::<String>::new();
            let mut size_list = Vec::<String>::new();
            for path in paths {
                let size = path.metadata().map(|meta| meta.len()).unwrap_or(0);
                file_list.push(path.to_string_lossy().to_string());
                size_list.push(human_bytes::human_bytes(size as f64));
            }
            self.summary
                .file_info
                .insert(format!("{}_file_names", stream.name()), file_list);
            self.summary
                .file_info
                .insert(format!("{}_file_sizes", stream.name()), size_list);
        }
    }

    /// Write the summary along with the merger's statistics, consuming the writer
    pub fn close(mut self, merger: &Merger) -> Result<(), SinkError> {
        for stream in merger.get_streams() {
            let stats = stream.stats();
            self.summary.streams.insert(
                stream.name().to_string(),
                StreamSummary {
                    format: stream.format_name().to_string(),
                    frames: stats.frames,
                    corrupt_frames: stats.corrupt_frames,
                    resyncs: stats.resyncs,
                    skipped_bytes: human_bytes::human_bytes(stats.skipped_bytes as f64),
                },
            );
        }
        self.summary.error_events = merger.get_ledger().error_events().copied().collect();
        self.summary.n_events = self.summary.events.len();
        self.summary.n_bad_events = self.n_bad_events();

        let mut file = std::fs::File::create(&self.path)?;
        file.write_all(serde_yaml::to_string(&self.summary)?.as_bytes())?;
        Ok(())
    }

    fn open_event(&mut self, call: &'static str) -> Result<&mut EventSummary, SinkError> {
        self.open.as_mut().ok_or(SinkError::NoOpenEvent(call))
    }
}

impl EventSink for SummaryWriter {
    fn begin_event(&mut self, event_id: u32) -> Result<(), SinkError> {
        self.open = Some(EventSummary {
            event_id,
            timestamp: 0,
            ok: true,
            n_channels: 0,
            peak: 0,
        });
        Ok(())
    }

    fn add_channel_signal(&mut self, _id: u32, samples: &[u16]) -> Result<(), SinkError> {
        let event = self.open_event("a channel signal")?;
        event.n_channels += 1;
        event.peak = event.peak.max(samples.iter().copied().max().unwrap_or(0));
        Ok(())
    }

    fn set_metadata(&mut self, metadata: &EventMetadata) -> Result<(), SinkError> {
        let event = self.open_event("metadata")?;
        event.timestamp = metadata.timestamp;
        event.ok = metadata.ok;
        Ok(())
    }

    fn end_event(&mut self) -> Result<(), SinkError> {
        let event = self.open.take().ok_or(SinkError::NoOpenEvent("end of event"))?;
        self.summary.events.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RunMetadata;
    use crate::format::ustc::{encode_v3, UstcFormat};
    use crate::format::{EndMarkerPolicy, UstcVariant};
    use crate::frame::Frame;
    use crate::stream::FrameStream;

    #[test]
    fn test_summary_file() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("board_0001.dat");
        let mut bytes = Vec::new();
        for (event, time) in [(1u32, 10i64), (2, 20)] {
            let mut frame = Frame::new(0, 0, 4, 4, event, time);
            frame.samples[30] = 77 * event as u16;
            bytes.extend(encode_v3(UstcVariant::V3Long, &frame));
        }
        std::fs::write(&data_path, bytes).unwrap();

        let format = UstcFormat::new(UstcVariant::V3Long, EndMarkerPolicy::Strict);
        let stream = FrameStream::new("board", &[data_path], Box::new(format), 1 << 20).unwrap();
        let mut merger = Merger::from_streams(vec![stream], 4, 0, RunMetadata::default()).unwrap();

        let summary_path = dir.path().join("run_0001.yml");
        let mut writer = SummaryWriter::new(&summary_path);
        writer.write_fileinfo(&merger);
        while let Some(event) = merger.next_event() {
            event.write_to(&mut writer).unwrap();
        }
        assert_eq!(writer.n_events(), 2);
        assert_eq!(writer.summary.events[1].peak, 154);
        writer.close(&merger).unwrap();

        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&summary_path).unwrap()).unwrap();
        assert_eq!(yaml["n_events"].as_u64(), Some(2));
        assert_eq!(yaml["n_bad_events"].as_u64(), Some(0));
        assert_eq!(yaml["streams"]["board"]["frames"].as_u64(), Some(2));
        assert_eq!(yaml["events"][0]["timestamp"].as_i64(), Some(10));
        assert!(yaml["file_info"]["board_file_sizes"][0].as_str().is_some());
        assert!(yaml["file_info"]["board_file_names"][0]
            .as_str()
            .unwrap()
            .ends_with("board_0001.dat"));
    }
}
