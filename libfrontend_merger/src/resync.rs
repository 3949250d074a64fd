use std::collections::VecDeque;

use super::error::ResyncError;
use super::file_stack::FileStack;
use super::format::SyncPattern;

/// Scan a stream forward until the sync pattern is found.
///
/// The scan steps one byte at a time. On a match the bytes from the resume offset of
/// the pattern onward are pushed back onto the stack, so the next read starts at the
/// recovered frame. Returns the number of bytes skipped.
///
/// Fails with `ResyncError::ScanLimit` if no match is found within `max_scan` bytes,
/// or `ResyncError::EndOfStream` if the stream runs out first.
pub fn resync(stack: &mut FileStack, pattern: &SyncPattern, max_scan: u64) -> Result<u64, ResyncError> {
    let mut window: VecDeque<u8> = VecDeque::with_capacity(pattern.len());
    let mut scanned: u64 = 0;
    while scanned < max_scan.saturating_add(pattern.len() as u64) {
        let byte = stack.next_byte().ok_or(ResyncError::EndOfStream)?;
        scanned += 1;
        if window.len() == pattern.len() {
            window.pop_front();
        }
        window.push_back(byte);

        if window.len() == pattern.len() && pattern.matches(window.make_contiguous()) {
            let resume = window.make_contiguous()[pattern.resume_offset..].to_vec();
            stack.unread(&resume);
            return Ok(scanned - resume.len() as u64);
        }
    }
    Err(ResyncError::ScanLimit(max_scan))
}
