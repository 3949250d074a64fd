use std::sync::mpsc::Sender;

use super::config::Config;
use super::error::ProcessorError;
use super::merger::Merger;
use super::summary_writer::SummaryWriter;
use super::worker_status::{RunState, WorkerStatus};

/// The main loop of frontend_merger.
///
/// This takes in a config (and progress monitor) and merges the streams of one run into
/// events, writing each event to the run summary.
pub fn process_run(
    config: &Config,
    run_number: i32,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<(), ProcessorError> {
    let output_path = config.get_output_file_name(run_number)?;
    let mut writer = SummaryWriter::new(&output_path);

    let mut merger = Merger::new(config, run_number)?;
    spdlog::info!(
        "Total run size: {}",
        human_bytes::human_bytes(*merger.get_total_data_size() as f64)
    );
    let total_data_size = *merger.get_total_data_size();
    let flush_frac: f32 = 0.01;
    let mut progress: f32 = 0.0;
    let flush_val = ((total_data_size as f64 * flush_frac as f64) as u64).max(1);
    let mut last_flush: u64 = 0;

    spdlog::info!(
        "Merging events with a window of {} and a reorder depth of {}...",
        config.window_size,
        merger.get_reorder_depth()
    );
    writer.write_fileinfo(&merger);
    tx.send(WorkerStatus::new(
        0.0,
        run_number,
        *worker_id,
        RunState::Merging,
    ))?;
    while let Some(event) = merger.next_event() {
        event.write_to(&mut writer)?;

        let bytes_read = merger.get_bytes_read();
        if bytes_read - last_flush > flush_val {
            last_flush = bytes_read;
            progress = (bytes_read as f32 / total_data_size as f32).max(progress + flush_frac);
            tx.send(
                WorkerStatus::new(progress.min(1.0), run_number, *worker_id, RunState::Merging)
                    .with_bad_events(writer.n_bad_events()),
            )?;
        }
    }

    spdlog::info!("Merged {} events.", writer.n_events());
    let bad_events = writer.n_bad_events();
    merger.report();
    writer.close(&merger)?;

    tx.send(
        WorkerStatus::new(1.0, run_number, *worker_id, RunState::Merged)
            .with_bad_events(bad_events),
    )?;
    spdlog::info!("Done with run data.");
    Ok(())
}

/// The function to be called by a separate thread.
/// Allows multiple runs to be processed
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<(), ProcessorError> {
    let runs: Vec<i32> = (config.first_run_number..(config.last_run_number + 1)).collect();
    process_subset(config, tx, worker_id, runs)
}

/// Process a subset of runs
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<i32>,
) -> Result<(), ProcessorError> {
    for run in subset {
        if config.does_run_exist(run) {
            spdlog::info!("Processing run {}...", run);
            if let Err(e) = process_run(&config, run, &tx, &worker_id) {
                tx.send(WorkerStatus::new(1.0, run, worker_id, RunState::Failed))?;
                return Err(e);
            }
            spdlog::info!("Finished processing run {}.", run);
        } else {
            spdlog::info!("Run {} does not exist, skipping...", run);
        }
    }
    Ok(())
}

/// Divide a run range in to a set of subranges (per thread/worker)
pub fn create_subsets(config: &Config) -> Vec<Vec<i32>> {
    let mut subsets: Vec<Vec<i32>> = vec![Vec::new(); config.n_threads.max(1) as usize];
    let n_subsets = subsets.len();

    for (idx, run) in (config.first_run_number..(config.last_run_number + 1)).enumerate() {
        subsets[idx % n_subsets].push(run)
    }

    subsets
}
