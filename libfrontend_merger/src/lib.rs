//! # frontend_merger
//!
//! frontend_merger is an event builder for gaseous detector front-end electronics,
//! written in Rust. It reads the binary streams written by the readout of a run (one
//! stream per board, card, or AsAd, each possibly split over many files), decodes the
//! frames of whichever electronics wrote them, and rebuilds complete events: every
//! channel waveform recorded for a given event id, across all streams.
//!
//! ## Supported electronics
//!
//! - USTC boards (V3 long and short frames, V4 header/data/ending packets)
//! - GET CoBo/AsAd `.graw` frames (partial and full readout)
//! - FEMINOS cards, read out directly or through a multi-FEMINOS event builder, with
//!   AFTER or AGET channel numbering
//! - T2K DCC readout of AFTER chips
//!
//! ## Corruption handling
//!
//! Streams from the front-ends are not always clean. A frame which fails to decode is
//! logged, the event it belongs to is flagged, and the stream is resynchronized by
//! scanning for the next frame boundary. A single corrupt stream never stalls the
//! others. Events are reassembled in a window of a few event ids so boards which run
//! slightly ahead or behind one another still merge correctly.
//!
//! ## Configuration
//!
//! A configuration file is YAML, for example:
//!
//! ```yml
//! electronics:
//!   type: ustc
//!   variant: v3_long
//! input_path: /data/experiment
//! output_path: /data/experiment/merged
//! file_extension: null
//! first_run_number: 1
//! last_run_number: 10
//! n_threads: 2
//! window_size: 4
//! reorder_depth: null
//! max_resync_bytes: 1048576
//! end_marker: strict
//! min_points: 512
//! sub_run_origin: 0
//! run_start: 2023-05-01T12:00:00Z
//! ```
//!
//! Every run lives in a `run_XXXX` subdirectory of `input_path`. Files are grouped
//! into streams by name, with any trailing `_NNNN` file index removed, and read in
//! order.
//!
//! `run_start` may be left out. The run start is then taken from the earliest
//! file header which carries one (FEMINOS and AFTER run UIDs, multi-FEMINOS start
//! time), or the Unix epoch if none does.
//!
//! ## Output
//!
//! Events are handed to an [`sink::EventSink`]. The bundled
//! [`summary_writer::SummaryWriter`] writes a `run_XXXX.yml` summary of every event
//! (id, timestamp, ok flag, channel count, peak sample) along with the file and error
//! statistics of each stream. A log file is also written by the applications; it is
//! the place to look when a run reports errors.
pub mod channel_map;
pub mod config;
pub mod constants;
pub mod error;
pub mod error_ledger;
pub mod event;
pub mod event_buffer;
pub mod file_stack;
pub mod format;
pub mod frame;
pub mod hardware_id;
pub mod merger;
pub mod process;
pub mod resync;
pub mod sink;
pub mod stream;
pub mod summary_writer;
pub mod worker_status;
