use std::path::PathBuf;
use thiserror::Error;

use super::frame::RawFrame;
use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Frame is missing its sync marker; found {found:#x} instead of {expected:#x}")]
    BadSyncMarker { expected: u32, found: u32 },
    #[error("Frame has a bad end marker; found {found:#x} instead of {expected:#x}")]
    BadEndMarker { expected: u32, found: u32 },
    #[error("Frame field {field} has unsupported value {value}")]
    UnsupportedField { field: &'static str, value: u64 },
    #[error("Frame access of {len} bytes at offset {offset} is past the end of a {size} byte frame")]
    Truncated {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("Frame declared an invalid length of {0} bytes")]
    BadFrameLength(usize),
    #[error("File header {0:?} is not a run header")]
    BadFileHeader(String),
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Every file in the stream has been read")]
    EndOfStream,
    #[error("Could not determine the length of the next frame: {error}")]
    BadPrefix { error: DecodeError, prefix: RawFrame },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResyncError {
    #[error("Stream ended before a sync marker was found")]
    EndOfStream,
    #[error("No sync marker found within {0} bytes")]
    ScanLimit(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("Skipped signal from old event {event}; the oldest buffered event is {current}")]
    StaleFrame { event: u32, current: u32 },
    #[error("Event {event} is too far ahead of event {current} for a window of {window}")]
    WindowOverflow { event: u32, current: u32, window: u32 },
    #[error("Slot holding event {slot_event} was given a frame from event {event}")]
    MismatchedEvent { slot_event: u32, event: u32 },
    #[error("Event {event} received a frame with time {found}, expected {expected}")]
    InconsistentTime {
        event: u32,
        expected: i64,
        found: i64,
    },
    #[error("Event {event} received channel {channel} more than once")]
    DuplicateChannel { event: u32, channel: u32 },
}

#[derive(Debug, Error)]
pub enum FileStackError {
    #[error("FileStack failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("FileStack was given no files")]
    NoFiles,
    #[error("Could not open FileStack because file {0:?} does not exist")]
    BadFilePath(PathBuf),
}

#[derive(Debug, Error)]
pub enum StreamDiscoveryError {
    #[error("Stream discovery failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Stream discovery did not find any files ending in .{1} in {0:?}")]
    NoMatchingFiles(PathBuf, String),
}

#[derive(Debug, Error)]
pub enum MergerError {
    #[error("Merger failed due to FileStack error: {0}")]
    StackError(#[from] FileStackError),
    #[error("Merger failed due to stream discovery error: {0}")]
    DiscoveryError(#[from] StreamDiscoveryError),
    #[error("Merger failed because it was given no streams")]
    NoStreams,
    #[error("Merger failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Sink failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Sink received {0} without an open event")]
    NoOpenEvent(&'static str),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has window size {0}; it must be at least 1")]
    BadWindowSize(u32),
    #[error("Config has reorder depth {0}, which does not fit in a window of {1}")]
    BadReorderDepth(u32, u32),
    #[error("Config has {0} threads; it must be at least 1")]
    BadThreadCount(i32),
    #[error("Config run start {0:?} is not an RFC 3339 timestamp")]
    BadRunStart(String),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Merger error: {0}")]
    MergerError(#[from] MergerError),
    #[error("Processor failed due to Sink error: {0}")]
    SinkError(#[from] SinkError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
