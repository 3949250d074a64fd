use super::error::SinkError;
use super::event::{ChannelSignal, ReassembledEvent};

/// Event level metadata handed to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMetadata {
    pub timestamp: i64,
    pub run_origin: i32,
    pub sub_run_origin: i32,
    pub ok: bool,
}

/// Destination for reassembled events.
///
/// Events arrive one at a time as `begin_event`, `set_metadata`, one
/// `add_channel_signal` per channel, and `end_event`.
pub trait EventSink {
    fn begin_event(&mut self, event_id: u32) -> Result<(), SinkError>;
    fn add_channel_signal(&mut self, id: u32, samples: &[u16]) -> Result<(), SinkError>;
    fn set_metadata(&mut self, metadata: &EventMetadata) -> Result<(), SinkError>;
    fn end_event(&mut self) -> Result<(), SinkError>;
}

/// A sink which keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<ReassembledEvent>,
    open: Option<ReassembledEvent>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_event(&mut self, call: &'static str) -> Result<&mut ReassembledEvent, SinkError> {
        self.open.as_mut().ok_or(SinkError::NoOpenEvent(call))
    }
}

impl EventSink for MemorySink {
    fn begin_event(&mut self, event_id: u32) -> Result<(), SinkError> {
        if let Some(unfinished) = self.open.take() {
            spdlog::warn!(
                "Event {} was never ended; keeping it anyway.",
                unfinished.event_id
            );
            self.events.push(unfinished);
        }
        self.open = Some(ReassembledEvent {
            event_id,
            timestamp: 0,
            run_origin: 0,
            sub_run_origin: 0,
            signals: Vec::new(),
            ok: true,
        });
        Ok(())
    }

    fn add_channel_signal(&mut self, id: u32, samples: &[u16]) -> Result<(), SinkError> {
        self.open_event("a channel signal")?
            .signals
            .push(ChannelSignal::new(id, samples));
        Ok(())
    }

    fn set_metadata(&mut self, metadata: &EventMetadata) -> Result<(), SinkError> {
        let event = self.open_event("metadata")?;
        event.timestamp = metadata.timestamp;
        event.run_origin = metadata.run_origin;
        event.sub_run_origin = metadata.sub_run_origin;
        event.ok = metadata.ok;
        Ok(())
    }

    fn end_event(&mut self) -> Result<(), SinkError> {
        let event = self.open.take().ok_or(SinkError::NoOpenEvent("end of event"))?;
        self.events.push(event);
        Ok(())
    }
}
