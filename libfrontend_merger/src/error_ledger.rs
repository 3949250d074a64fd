use std::collections::BTreeSet;

use super::error::ReassemblyError;

/// Record of everything that went wrong while merging a run.
///
/// Keeps the ids of events that contained errors so they can be flagged when they are
/// assembled, along with counters that are reported at the end of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLedger {
    error_events: BTreeSet<u32>,
    pub unknown_event_errors: u64,
    pub stale_frames: u64,
    pub window_overflows: u64,
    pub inconsistent_frames: u64,
    pub duplicate_frames: u64,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decode error, attributed to an event if one is known
    pub fn record_decode_error(&mut self, event_id: Option<u32>) {
        match event_id {
            Some(id) => {
                self.error_events.insert(id);
            }
            None => self.unknown_event_errors += 1,
        }
    }

    /// Record a frame the reassembly buffer refused or flagged
    pub fn record_reassembly_error(&mut self, error: &ReassemblyError) {
        match error {
            ReassemblyError::StaleFrame { .. } => self.stale_frames += 1,
            ReassemblyError::WindowOverflow { event, .. } => {
                self.window_overflows += 1;
                self.error_events.insert(*event);
            }
            ReassemblyError::MismatchedEvent { event, .. } => {
                self.error_events.insert(*event);
            }
            ReassemblyError::InconsistentTime { event, .. } => {
                self.inconsistent_frames += 1;
                self.error_events.insert(*event);
            }
            ReassemblyError::DuplicateChannel { event, .. } => {
                self.duplicate_frames += 1;
                self.error_events.insert(*event);
            }
        }
    }

    pub fn has_error(&self, event_id: u32) -> bool {
        self.error_events.contains(&event_id)
    }

    /// Event ids with errors, in increasing order
    pub fn error_events(&self) -> impl Iterator<Item = &u32> {
        self.error_events.iter()
    }

    pub fn n_error_events(&self) -> usize {
        self.error_events.len()
    }

    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }

    /// Log a summary of the errors
    pub fn report(&self) {
        if self.is_clean() {
            spdlog::info!("No errors were found while merging.");
            return;
        }
        if !self.error_events.is_empty() {
            let ids: Vec<String> = self.error_events.iter().map(|id| id.to_string()).collect();
            spdlog::warn!(
                "Found {} events with errors: {}",
                self.error_events.len(),
                ids.join(", ")
            );
        }
        if self.unknown_event_errors > 0 {
            spdlog::warn!(
                "Found {} errors from unknown events",
                self.unknown_event_errors
            );
        }
        if self.stale_frames > 0 {
            spdlog::warn!(
                "Skipped {} frames from events which were already flushed",
                self.stale_frames
            );
        }
        if self.window_overflows > 0 {
            spdlog::warn!(
                "{} frames arrived too far ahead of the reassembly window; consider a larger window",
                self.window_overflows
            );
        }
        if self.inconsistent_frames > 0 || self.duplicate_frames > 0 {
            spdlog::warn!(
                "Found {} frames with inconsistent times and {} duplicated channels",
                self.inconsistent_frames,
                self.duplicate_frames
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger() {
        let mut ledger = ErrorLedger::new();
        assert!(ledger.is_clean());
        ledger.record_decode_error(Some(7));
        ledger.record_decode_error(None);
        ledger.record_reassembly_error(&ReassemblyError::WindowOverflow {
            event: 3,
            current: 0,
            window: 2,
        });
        ledger.record_reassembly_error(&ReassemblyError::StaleFrame {
            event: 1,
            current: 2,
        });
        assert!(ledger.has_error(7));
        assert!(ledger.has_error(3));
        assert!(!ledger.has_error(1));
        assert_eq!(ledger.error_events().copied().collect::<Vec<_>>(), vec![3, 7]);
        assert_eq!(ledger.unknown_event_errors, 1);
        assert_eq!(ledger.stale_frames, 1);
        assert_eq!(ledger.window_overflows, 1);
    }
}
