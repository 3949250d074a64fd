use ndarray::Array2;
use time::OffsetDateTime;

use super::constants::SAMPLES_PER_FRAME;
use super::error::SinkError;
use super::event_buffer::EventSlot;
use super::sink::{EventMetadata, EventSink};

/// One channel's waveform within an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSignal {
    pub id: u32,
    pub samples: Vec<u16>,
}

impl ChannelSignal {
    pub fn new(id: u32, samples: &[u16]) -> Self {
        Self {
            id,
            samples: samples.to_vec(),
        }
    }
}

/// Provenance of the run being merged, supplied by whoever sets up the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunMetadata {
    pub run_origin: i32,
    pub sub_run_origin: i32,
    /// Nanoseconds since the Unix epoch at the start of the run
    pub start_epoch_ns: i64,
}

/// A fully built event: every channel signal recorded for one event id, across all streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledEvent {
    pub event_id: u32,
    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
    pub run_origin: i32,
    pub sub_run_origin: i32,
    pub signals: Vec<ChannelSignal>,
    /// False if any frame for this event was malformed, duplicated, inconsistent, or
    /// outside of the reassembly window
    pub ok: bool,
}

impl ReassembledEvent {
    pub fn signal(&self, id: u32) -> Option<&ChannelSignal> {
        self.signals.iter().find(|signal| signal.id == id)
    }

    pub fn datetime(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(self.timestamp as i128).ok()
    }

    pub fn metadata(&self) -> EventMetadata {
        EventMetadata {
            timestamp: self.timestamp,
            run_origin: self.run_origin,
            sub_run_origin: self.sub_run_origin,
            ok: self.ok,
        }
    }

    /// Convert the event into a data matrix
    ///
    /// Each row is a channel, in the order the channels were first seen, and each
    /// column is a time bucket.
    pub fn to_matrix(&self) -> Array2<u16> {
        let mut matrix = Array2::<u16>::zeros([self.signals.len(), SAMPLES_PER_FRAME]);
        for (mut row, signal) in matrix.rows_mut().into_iter().zip(self.signals.iter()) {
            for (element, sample) in row.iter_mut().zip(signal.samples.iter()) {
                *element = *sample;
            }
        }
        matrix
    }

    /// Hand the event off to a sink
    pub fn write_to(&self, sink: &mut dyn EventSink) -> Result<(), SinkError> {
        sink.begin_event(self.event_id)?;
        sink.set_metadata(&self.metadata())?;
        for signal in self.signals.iter() {
            sink.add_channel_signal(signal.id, &signal.samples)?;
        }
        sink.end_event()
    }
}

/// Turns completed reassembly slots into events, stamping them with the run metadata
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalAssembler {
    run: RunMetadata,
}

impl SignalAssembler {
    pub fn new(run: RunMetadata) -> Self {
        Self { run }
    }

    pub fn run(&self) -> &RunMetadata {
        &self.run
    }

    pub fn set_start_epoch_ns(&mut self, start_epoch_ns: i64) {
        self.run.start_epoch_ns = start_epoch_ns;
    }

    pub fn assemble(&self, slot: EventSlot) -> ReassembledEvent {
        let event_id = slot.event_id().unwrap_or_default();
        let event_time = slot.event_time().unwrap_or_default();
        let ok = slot.is_ok();
        ReassembledEvent {
            event_id,
            timestamp: self.run.start_epoch_ns + event_time,
            run_origin: self.run.run_origin,
            sub_run_origin: self.run.sub_run_origin,
            signals: slot.into_signals(),
            ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::sink::MemorySink;

    fn frame(channel: u32, time: i64) -> Frame {
        let mut frame = Frame::new(0, 0, channel as u16, channel, 5, time);
        frame.samples[100] = 100 + channel as u16;
        frame
    }

    #[test]
    fn test_assemble() {
        let mut slot = EventSlot::default();
        for channel in [12, 3, 7] {
            slot.add_frame(frame(channel, 250)).unwrap();
        }
        let assembler = SignalAssembler::new(RunMetadata {
            run_origin: 3,
            sub_run_origin: 1,
            start_epoch_ns: 1_000_000_000,
        });
        let event = assembler.assemble(slot);
        assert_eq!(event.event_id, 5);
        assert_eq!(event.timestamp, 1_000_000_250);
        assert_eq!(event.run_origin, 3);
        assert_eq!(event.sub_run_origin, 1);
        assert!(event.ok);
        // First seen order
        let ids: Vec<u32> = event.signals.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![12, 3, 7]);
        assert_eq!(event.signal(7).unwrap().samples[100], 107);
        assert_eq!(
            event.datetime().unwrap().unix_timestamp_nanos(),
            1_000_000_250
        );

        let matrix = event.to_matrix();
        assert_eq!(matrix.shape(), &[3, SAMPLES_PER_FRAME]);
        assert_eq!(matrix[[0, 100]], 112);
        assert_eq!(matrix[[1, 100]], 103);
    }

    #[test]
    fn test_write_to_sink() {
        let mut slot = EventSlot::default();
        slot.add_frame(frame(1, 0)).unwrap();
        let event = SignalAssembler::default().assemble(slot);
        let mut sink = MemorySink::default();
        event.write_to(&mut sink).unwrap();
        assert_eq!(sink.events, vec![event]);
    }
}
