/// Where a worker is with its current run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Merging,
    /// Every event of the run was written
    Merged,
    /// The run could not be merged; the worker stops
    Failed,
}

/// Progress message sent from a worker thread
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub run_number: i32,
    pub worker_id: usize,
    pub state: RunState,
    /// Events written so far which were flagged as not ok
    pub bad_events: usize,
}

impl WorkerStatus {
    pub fn new(progress: f32, run_number: i32, worker_id: usize, state: RunState) -> Self {
        Self {
            progress,
            run_number,
            worker_id,
            state,
            bad_events: 0,
        }
    }

    pub fn with_bad_events(mut self, bad_events: usize) -> Self {
        self.bad_events = bad_events;
        self
    }

    /// Short description of the run for a progress display
    pub fn message(&self) -> String {
        match self.state {
            RunState::Merging if self.bad_events == 0 => format!("Run {}", self.run_number),
            RunState::Merging => format!("Run {} ({} bad events)", self.run_number, self.bad_events),
            RunState::Merged => format!(
                "Run {} merged, {} bad events",
                self.run_number, self.bad_events
            ),
            RunState::Failed => format!("Run {} failed", self.run_number),
        }
    }
}
