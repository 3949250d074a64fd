use fxhash::FxHashMap;
use std::collections::VecDeque;

use super::error::ReassemblyError;
use super::event::ChannelSignal;
use super::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Empty,
    Accumulating,
    Complete,
}

/// Accumulates the channel signals of one event.
///
/// Channels are kept in the order they were first seen.
#[derive(Debug, Clone, Default)]
pub struct EventSlot {
    state: SlotState,
    event_id: Option<u32>,
    event_time: Option<i64>,
    signals: Vec<ChannelSignal>,
    channel_index: FxHashMap<u32, usize>,
    has_error: bool,
}

impl EventSlot {
    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn event_id(&self) -> Option<u32> {
        self.event_id
    }

    pub fn event_time(&self) -> Option<i64> {
        self.event_time
    }

    pub fn signals(&self) -> &[ChannelSignal] {
        &self.signals
    }

    pub fn is_ok(&self) -> bool {
        !self.has_error
    }

    pub fn mark_error(&mut self) {
        self.has_error = true;
    }

    pub fn into_signals(self) -> Vec<ChannelSignal> {
        self.signals
    }

    /// Add a frame's samples to the slot.
    ///
    /// A frame with a different time than the slot, or for a channel the slot already
    /// has, still leaves the slot usable but marks it as errored. The first-seen time
    /// and samples are kept. A frame from a different event is not added at all.
    pub fn add_frame(&mut self, frame: Frame) -> Result<(), ReassemblyError> {
        match (self.event_id, self.event_time) {
            (Some(slot_event), Some(slot_time)) => {
                if slot_event != frame.event_id {
                    return Err(ReassemblyError::MismatchedEvent {
                        slot_event,
                        event: frame.event_id,
                    });
                }
                if self.channel_index.contains_key(&frame.physical_channel_id) {
                    self.has_error = true;
                    return Err(ReassemblyError::DuplicateChannel {
                        event: frame.event_id,
                        channel: frame.physical_channel_id,
                    });
                }
                self.insert(&frame);
                if slot_time != frame.event_time {
                    self.has_error = true;
                    return Err(ReassemblyError::InconsistentTime {
                        event: frame.event_id,
                        expected: slot_time,
                        found: frame.event_time,
                    });
                }
            }
            _ => {
                self.state = SlotState::Accumulating;
                self.event_id = Some(frame.event_id);
                self.event_time = Some(frame.event_time);
                self.insert(&frame);
            }
        }
        Ok(())
    }

    fn insert(&mut self, frame: &Frame) {
        self.channel_index
            .insert(frame.physical_channel_id, self.signals.len());
        self.signals
            .push(ChannelSignal::new(frame.physical_channel_id, &frame.samples));
    }
}

/// The reassembly window.
///
/// Holds up to `window` consecutive event ids, starting at the current (lowest) event
/// id. Frames for an event are collected in the slot `event_id % window`; slots are
/// flushed to the completed queue in increasing event id order as the window advances.
#[derive(Debug)]
pub struct EventBuffer {
    window: u32,
    slots: Vec<EventSlot>,
    current_event: Option<u32>,
    completed: VecDeque<EventSlot>,
}

impl EventBuffer {
    pub fn new(window: u32) -> Self {
        let window = window.max(1);
        Self {
            window,
            slots: vec![EventSlot::default(); window as usize],
            current_event: None,
            completed: VecDeque::new(),
        }
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// The lowest event id the buffer will still accept
    pub fn current_event(&self) -> Option<u32> {
        self.current_event
    }

    /// True if no slot is accumulating and nothing is waiting to be taken
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
            && self
                .slots
                .iter()
                .all(|slot| slot.state() == SlotState::Empty)
    }

    pub fn slot(&self, event_id: u32) -> Option<&EventSlot> {
        self.slots
            .iter()
            .find(|slot| slot.event_id() == Some(event_id))
    }

    /// Add a frame to the slot for its event
    pub fn add_frame(&mut self, frame: Frame) -> Result<(), ReassemblyError> {
        let current = *self.current_event.get_or_insert(frame.event_id);
        if frame.event_id < current {
            return Err(ReassemblyError::StaleFrame {
                event: frame.event_id,
                current,
            });
        }
        if frame.event_id - current >= self.window {
            return Err(ReassemblyError::WindowOverflow {
                event: frame.event_id,
                current,
                window: self.window,
            });
        }
        let index = (frame.event_id % self.window) as usize;
        self.slots[index].add_frame(frame)
    }

    /// Mark an event still in the window as errored. Returns false if the event is not held.
    pub fn mark_error(&mut self, event_id: u32) -> bool {
        match self
            .slots
            .iter_mut()
            .find(|slot| slot.event_id() == Some(event_id))
        {
            Some(slot) => {
                slot.mark_error();
                true
            }
            None => false,
        }
    }

    /// Complete every event before `next_expected` and move the window up to it.
    ///
    /// Completed slots are queued in increasing event id order. Empty slots produce
    /// nothing, and a `next_expected` at or behind the window does nothing.
    pub fn advance_and_flush(&mut self, next_expected: u32) {
        let Some(current) = self.current_event else {
            return;
        };
        if next_expected <= current {
            return;
        }

        let mut ready: Vec<(u32, usize)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot.event_id() {
                Some(id) if id < next_expected => Some((id, index)),
                _ => None,
            })
            .collect();
        ready.sort_unstable();
        for (_, index) in ready {
            let mut slot = std::mem::take(&mut self.slots[index]);
            slot.state = SlotState::Complete;
            self.completed.push_back(slot);
        }
        self.current_event = Some(next_expected);
    }

    /// Complete every event still in the window
    pub fn flush_all(&mut self) {
        let last = self.slots.iter().filter_map(|slot| slot.event_id()).max();
        if let Some(last) = last {
            self.advance_and_flush(last.saturating_add(1));
        }
    }

    /// Take the oldest completed event, if any
    pub fn take_completed(&mut self) -> Option<EventSlot> {
        self.completed.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: u32, channel: u32, time: i64) -> Frame {
        let mut frame = Frame::new(0, 0, channel as u16, channel, event, time);
        frame.samples[0] = channel as u16;
        frame
    }

    #[test]
    fn test_window_boundary() {
        let mut buffer = EventBuffer::new(4);
        buffer.add_frame(frame(10, 0, 0)).unwrap();
        buffer.add_frame(frame(13, 0, 0)).unwrap();
        assert_eq!(
            buffer.add_frame(frame(14, 0, 0)),
            Err(ReassemblyError::WindowOverflow {
                event: 14,
                current: 10,
                window: 4
            })
        );
        assert!(buffer.slot(14).is_none());
    }

    #[test]
    fn test_stale_frame() {
        let mut buffer = EventBuffer::new(2);
        buffer.add_frame(frame(5, 0, 0)).unwrap();
        buffer.advance_and_flush(6);
        assert_eq!(
            buffer.add_frame(frame(5, 1, 0)),
            Err(ReassemblyError::StaleFrame {
                event: 5,
                current: 6
            })
        );
        assert_eq!(buffer.take_completed().unwrap().signals().len(), 1);
    }

    #[test]
    fn test_flush_order_and_idempotence() {
        let mut buffer = EventBuffer::new(4);
        buffer.add_frame(frame(3, 0, 0)).unwrap();
        buffer.add_frame(frame(1, 0, 0)).unwrap_err();
        buffer.add_frame(frame(5, 0, 0)).unwrap();
        buffer.add_frame(frame(4, 0, 0)).unwrap();
        buffer.advance_and_flush(6);
        let ids: Vec<Option<u32>> = std::iter::from_fn(|| buffer.take_completed())
            .map(|slot| {
                assert_eq!(slot.state(), SlotState::Complete);
                slot.event_id()
            })
            .collect();
        assert_eq!(ids, vec![Some(3), Some(4), Some(5)]);

        // Nothing left to flush
        buffer.advance_and_flush(7);
        buffer.flush_all();
        assert!(buffer.take_completed().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_inconsistent_time() {
        let mut buffer = EventBuffer::new(4);
        buffer.add_frame(frame(10, 1, 100)).unwrap();
        assert!(matches!(
            buffer.add_frame(frame(10, 2, 200)),
            Err(ReassemblyError::InconsistentTime { .. })
        ));
        buffer.flush_all();
        let slot = buffer.take_completed().unwrap();
        assert!(!slot.is_ok());
        assert_eq!(slot.event_time(), Some(100));
        assert_eq!(slot.signals().len(), 2);
    }

    #[test]
    fn test_duplicate_channel_keeps_first() {
        let mut slot = EventSlot::default();
        slot.add_frame(frame(2, 7, 0)).unwrap();
        let mut duplicate = frame(2, 7, 0);
        duplicate.samples[0] = 999;
        assert_eq!(
            slot.add_frame(duplicate),
            Err(ReassemblyError::DuplicateChannel {
                event: 2,
                channel: 7
            })
        );
        assert!(!slot.is_ok());
        assert_eq!(slot.signals().len(), 1);
        assert_eq!(slot.signals()[0].samples[0], 7);
    }

    #[test]
    fn test_mark_error() {
        let mut buffer = EventBuffer::new(2);
        buffer.add_frame(frame(0, 0, 0)).unwrap();
        assert!(buffer.mark_error(0));
        assert!(!buffer.mark_error(1));
        buffer.flush_all();
        assert!(!buffer.take_completed().unwrap().is_ok());
    }
}
