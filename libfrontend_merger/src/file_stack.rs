use super::error::{DecodeError, FileStackError, ReadError, StreamDiscoveryError};
use super::format::{FrameFormat, FrameLength};
use super::frame::RawFrame;

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

/// The ordered collection of files making up one stream of a run.
///
/// Front-end DAQs split a stream into numbered files, so the stack reads them one
/// after another as a single byte stream. A read that comes up short at the end of a
/// file is the end of that file; the partial frame is discarded and reading resumes
/// with a fresh frame at the start of the next file.
///
/// Bytes can be pushed back onto the stack, which is how the resynchronizer gets to
/// rescan a rejected frame.
///
/// Some DAQs start every file with a run header. When a header length is set, the
/// header is cut off each file as it is opened and queued for `take_file_header`, so
/// it is never mistaken for frame data.
#[derive(Debug)]
pub struct FileStack {
    pub file_stack: VecDeque<PathBuf>,
    active_file: Option<BufReader<File>>,
    active_path: PathBuf,
    pushback: VecDeque<u8>,
    file_header_len: usize,
    header_due: bool,
    file_headers: VecDeque<RawFrame>,
    pub total_stack_size_bytes: u64,
    bytes_read: u64,
    is_ended: bool,
}

impl FileStack {
    /// Create a new FileStack from a list of files, read in the given order
    pub fn new(files: &[PathBuf]) -> Result<Self, FileStackError> {
        let mut total_stack_size_bytes = 0;
        for path in files.iter() {
            if !path.exists() {
                return Err(FileStackError::BadFilePath(path.clone()));
            }
            total_stack_size_bytes += path.metadata()?.len();
        }

        let mut stack: VecDeque<PathBuf> = files.iter().cloned().collect();
        let active_path = stack.pop_front().ok_or(FileStackError::NoFiles)?;
        let active_file = BufReader::new(File::open(&active_path)?);
        Ok(Self {
            file_stack: stack,
            active_file: Some(active_file),
            active_path,
            pushback: VecDeque::new(),
            file_header_len: 0,
            header_due: true,
            file_headers: VecDeque::new(),
            total_stack_size_bytes,
            bytes_read: 0,
            is_ended: false,
        })
    }

    /// Get the next raw frame, as delimited by the format
    ///
    /// Returns `ReadError::EndOfStream` once every file has been read, or
    /// `ReadError::BadPrefix` with the bytes that were consumed if the format rejected
    /// the frame prefix.
    pub fn next_raw_frame(&mut self, format: &dyn FrameFormat) -> Result<RawFrame, ReadError> {
        loop {
            if self.is_ended {
                return Err(ReadError::EndOfStream);
            }

            match self.read_frame(format)? {
                Some(raw) => return Ok(raw),
                None => self.move_to_next_file(),
            }
        }
    }

    /// Read the next byte of the stream, crossing file boundaries. None at the end of the stream.
    pub fn next_byte(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        loop {
            if self.is_ended {
                return None;
            }
            if self.fill(&mut byte) {
                return Some(byte[0]);
            }
            self.move_to_next_file();
        }
    }

    /// Push bytes back onto the front of the stream. They are read again, in order.
    pub fn unread(&mut self, bytes: &[u8]) {
        for byte in bytes.iter().rev() {
            self.pushback.push_front(*byte);
        }
        if !bytes.is_empty() {
            self.is_ended = false;
        }
    }

    /// Set the length of the header at the start of each file. Applies to every file not yet read from.
    pub fn set_file_header_len(&mut self, len: usize) {
        self.file_header_len = len;
    }

    /// The oldest file header read and not yet taken
    pub fn take_file_header(&mut self) -> Option<RawFrame> {
        self.file_headers.pop_front()
    }

    /// Stop reading: close the active file and forget every remaining file and byte
    pub fn close(&mut self) {
        if self.active_file.take().is_some() {
            spdlog::info!("Closing file {}", self.active_path.display());
        }
        self.file_stack.clear();
        self.pushback.clear();
        self.is_ended = true;
    }

    /// Bytes consumed from the files so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    pub fn is_ended(&self) -> bool {
        self.is_ended
    }

    /// Ok(None) means the active file ran out before the frame was complete
    fn read_frame(&mut self, format: &dyn FrameFormat) -> Result<Option<RawFrame>, ReadError> {
        let mut buffer = vec![0u8; format.prefix_len()];
        if !self.fill(&mut buffer) {
            return Ok(None);
        }
        loop {
            let (size, complete) = match format.frame_len(&buffer) {
                Ok(FrameLength::Complete(size)) => (size, true),
                Ok(FrameLength::Prefix(size)) => (size, false),
                Err(error) => {
                    return Err(ReadError::BadPrefix {
                        error,
                        prefix: RawFrame::new(buffer),
                    })
                }
            };
            // A prefix request must grow the buffer, a complete frame must contain it
            let bad_size = if complete {
                size == 0 || size < buffer.len() || size > format.max_frame_len()
            } else {
                size <= buffer.len() || size > format.max_frame_len()
            };
            if bad_size {
                return Err(ReadError::BadPrefix {
                    error: DecodeError::BadFrameLength(size),
                    prefix: RawFrame::new(buffer),
                });
            }

            let start = buffer.len();
            buffer.resize(size, 0);
            if !self.fill(&mut buffer[start..]) {
                return Ok(None);
            }
            if complete {
                return Ok(Some(RawFrame::new(buffer)));
            }
        }
    }

    /// Fill the buffer from the pushback bytes and then the active file. Returns false on a short read.
    fn fill(&mut self, buffer: &mut [u8]) -> bool {
        let mut filled = 0;
        while filled < buffer.len() {
            match self.pushback.pop_front() {
                Some(byte) => {
                    buffer[filled] = byte;
                    filled += 1;
                }
                None => break,
            }
        }

        if filled == buffer.len() {
            return true;
        }
        if self.active_file.is_none() {
            return false;
        }
        if self.header_due && !self.read_file_header() {
            return false;
        }
        filled += self.read_active(&mut buffer[filled..]);
        filled == buffer.len()
    }

    /// Cut the header off the active file. Returns false if the file is too short to hold it.
    fn read_file_header(&mut self) -> bool {
        self.header_due = false;
        if self.file_header_len == 0 {
            return true;
        }
        let mut header = vec![0u8; self.file_header_len];
        if self.read_active(&mut header) < header.len() {
            spdlog::warn!(
                "File {} is too short to hold its {} byte header",
                self.active_path.display(),
                self.file_header_len
            );
            return false;
        }
        self.file_headers.push_back(RawFrame::new(header));
        true
    }

    /// Read as much of the buffer as the active file holds. Returns the number of bytes read.
    fn read_active(&mut self, buffer: &mut [u8]) -> usize {
        let Some(file) = self.active_file.as_mut() else {
            return 0;
        };
        let mut filled = 0;
        while filled < buffer.len() {
            match file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    self.bytes_read += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    spdlog::warn!(
                        "Failed to read from {}: {e}. Treating it as the end of the file.",
                        self.active_path.display()
                    );
                    break;
                }
            }
        }
        filled
    }

    /// Move to the next file in the stack
    fn move_to_next_file(&mut self) {
        // Anything left over belongs to the file we are leaving
        self.pushback.clear();
        self.active_file = None;
        while let Some(next_path) = self.file_stack.pop_front() {
            match File::open(&next_path) {
                Ok(file) => {
                    spdlog::info!("Moving to file {}", next_path.display());
                    self.active_file = Some(BufReader::new(file));
                    self.active_path = next_path;
                    self.header_due = true;
                    return;
                }
                Err(e) => spdlog::warn!("Skipping file {}: {e}", next_path.display()),
            }
        }
        self.is_ended = true;
    }
}

/// Group the files of a run directory into streams.
///
/// Files ending in `.{extension}` are grouped by their stem with any trailing `_NNNN`
/// file index removed. Streams are returned in name order, with their files sorted.
pub fn discover_streams(
    run_path: &Path,
    extension: &str,
) -> Result<Vec<(String, Vec<PathBuf>)>, StreamDiscoveryError> {
    let mut streams: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for item in run_path.read_dir()? {
        let item_path = item?.path();
        if !item_path.is_file()
            || item_path.extension().and_then(|e| e.to_str()) != Some(extension)
        {
            continue;
        }
        let Some(stem) = item_path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        streams
            .entry(stream_name(stem).to_string())
            .or_default()
            .push(item_path);
    }

    if streams.is_empty() {
        return Err(StreamDiscoveryError::NoMatchingFiles(
            run_path.to_path_buf(),
            extension.to_string(),
        ));
    }

    Ok(streams
        .into_iter()
        .map(|(name, mut files)| {
            files.sort(); // Only the file index should differ
            (name, files)
        })
        .collect())
}

fn stream_name(stem: &str) -> &str {
    match stem.rsplit_once('_') {
        Some((name, index))
            if !name.is_empty() && !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) =>
        {
            name
        }
        _ => stem,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ustc::UstcFormat;
    use crate::format::{EndMarkerPolicy, UstcVariant};
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_stream_name() {
        assert_eq!(stream_name("board1_0001"), "board1");
        assert_eq!(stream_name("board_1_0002"), "board_1");
        assert_eq!(stream_name("board1"), "board1");
        assert_eq!(stream_name("board1_ab"), "board1_ab");
    }

    #[test]
    fn test_discover_streams() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "b_0001.dat", &[0]);
        write_file(dir.path(), "a_0002.dat", &[0]);
        write_file(dir.path(), "a_0001.dat", &[0]);
        write_file(dir.path(), "a_0001.log", &[0]);
        let streams = discover_streams(dir.path(), "dat").unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].0, "a");
        assert_eq!(
            streams[0].1,
            vec![dir.path().join("a_0001.dat"), dir.path().join("a_0002.dat")]
        );
        assert_eq!(streams[1].0, "b");
        assert!(discover_streams(dir.path(), "graw").is_err());
    }

    #[test]
    fn test_short_read_moves_to_next_file() {
        let dir = tempfile::tempdir().unwrap();
        let format = UstcFormat::new(UstcVariant::V3Short, EndMarkerPolicy::Strict);
        let first = write_file(dir.path(), "s_0001.dat", &[0xAA; 1500]);
        let second = write_file(dir.path(), "s_0002.dat", &[0xBB; 1040]);
        let mut stack = FileStack::new(&[first, second]).unwrap();
        assert_eq!(stack.total_stack_size_bytes, 2540);

        let raw = stack.next_raw_frame(&format).unwrap();
        assert!(raw.as_bytes().iter().all(|b| *b == 0xAA));
        // The trailing 460 bytes of the first file are dropped
        let raw = stack.next_raw_frame(&format).unwrap();
        assert!(raw.as_bytes().iter().all(|b| *b == 0xBB));
        assert!(matches!(
            stack.next_raw_frame(&format),
            Err(ReadError::EndOfStream)
        ));
        assert!(stack.is_ended());
    }

    #[test]
    fn test_unread() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "s_0001.dat", &[1, 2, 3]);
        let mut stack = FileStack::new(&[path]).unwrap();
        assert_eq!(stack.next_byte(), Some(1));
        stack.unread(&[9, 1]);
        assert_eq!(stack.next_byte(), Some(9));
        assert_eq!(stack.next_byte(), Some(1));
        assert_eq!(stack.next_byte(), Some(2));
        assert_eq!(stack.next_byte(), Some(3));
        assert_eq!(stack.next_byte(), None);
        assert_eq!(stack.bytes_read(), 3);
    }

    #[test]
    fn test_file_headers_cut_from_each_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut first_bytes = b"HDR1".to_vec();
        first_bytes.extend([1, 2]);
        let first = write_file(dir.path(), "s_0001.dat", &first_bytes);
        let second = write_file(dir.path(), "s_0002.dat", b"HDR2\x03");
        let third = write_file(dir.path(), "s_0003.dat", b"HD");
        let mut stack = FileStack::new(&[first, second, third]).unwrap();
        stack.set_file_header_len(4);

        assert_eq!(stack.next_byte(), Some(1));
        assert_eq!(stack.take_file_header().unwrap().as_bytes(), b"HDR1");
        assert_eq!(stack.next_byte(), Some(2));
        assert_eq!(stack.next_byte(), Some(3));
        assert_eq!(stack.take_file_header().unwrap().as_bytes(), b"HDR2");
        // A file too short for its header holds nothing
        assert_eq!(stack.next_byte(), None);
        assert!(stack.take_file_header().is_none());
        assert_eq!(stack.bytes_read(), 13);
    }

    #[test]
    fn test_close() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_file(dir.path(), "s_0001.dat", &[1, 2, 3]);
        let second = write_file(dir.path(), "s_0002.dat", &[4]);
        let mut stack = FileStack::new(&[first, second]).unwrap();
        assert_eq!(stack.next_byte(), Some(1));
        stack.unread(&[1]);
        stack.close();
        assert!(stack.is_ended());
        assert!(stack.file_stack.is_empty());
        assert_eq!(stack.next_byte(), None);
    }

    #[test]
    fn test_no_files() {
        assert!(matches!(FileStack::new(&[]), Err(FileStackError::NoFiles)));
    }
}
