use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

use libfrontend_merger::config::Config;
use libfrontend_merger::process::{create_subsets, process_subset};
use libfrontend_merger::worker_status::{RunState, WorkerStatus};

const LOG_FILE: &str = "./frontend_merger.log";

fn make_template_config(path: &Path) {
    match Config::default().write_config_file(path) {
        Ok(()) => log::info!("Done."),
        Err(e) => log::error!("Failed to write template config: {e}"),
    }
}

/// The library logs through spdlog; send it to a file so it doesn't fight the progress bars
fn init_file_logging() -> Result<(), spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from(LOG_FILE))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

fn bar_style(state: RunState) -> ProgressStyle {
    let template = match state {
        RunState::Merging => "{prefix} [{bar:40.cyan/blue}] {pos}% {msg}",
        RunState::Merged => "{prefix} [{bar:40.green/blue}] {pos}% {msg}",
        RunState::Failed => "{prefix} [{bar:40.red/red}] {pos}% {msg}",
    };
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn main() {
    // Create a cli
    let matches = Command::new("frontend_merger_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return;
    }
    if let Err(e) = init_file_logging() {
        log::error!("Could not create log file {LOG_FILE}: {e}");
        return;
    }

    // Parse the cli
    let Some(config_path) = matches.get_one::<String>("path").map(PathBuf::from) else {
        log::error!("A configuration path is required");
        return;
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Electronics: {:?}", config.electronics);
    log::info!("Input Path: {}", config.input_path.to_string_lossy());
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!(
        "First Run: {} Last Run: {}",
        config.first_run_number,
        config.last_run_number
    );
    log::info!(
        "Window Size: {} Reorder Depth: {}",
        config.window_size,
        config.get_reorder_depth()
    );
    log::info!("Detailed logs are written to {LOG_FILE}");

    // Spawn a worker per subset of runs, each with its own bar
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut workers = Vec::new();
    let mut bars = Vec::new();
    for (idx, subset) in create_subsets(&config).into_iter().enumerate() {
        // Dont make empty workers
        if subset.is_empty() {
            continue;
        }
        let pb = pb_manager.add(ProgressBar::new(100));
        pb.set_style(bar_style(RunState::Merging));
        pb.set_prefix(format!("Worker {idx}"));
        bars.push((idx, pb));
        let conf = config.clone();
        let worker_tx = tx.clone();
        workers.push(std::thread::spawn(move || {
            process_subset(conf, worker_tx, idx, subset)
        }));
    }
    // Only the workers hold senders now
    drop(tx);

    for status in rx.iter() {
        let Some((_, pb)) = bars.iter().find(|(idx, _)| *idx == status.worker_id) else {
            continue;
        };
        pb.set_style(bar_style(status.state));
        pb.set_message(status.message());
        pb.set_position((status.progress * 100.0) as u64);
    }

    let mut all_ok = true;
    for handle in workers {
        match handle.join() {
            Ok(Ok(())) => (),
            Ok(Err(e)) => {
                all_ok = false;
                log::error!("Merging failed with error: {e}");
            }
            Err(_) => {
                all_ok = false;
                log::error!("Failed to join merging task!");
            }
        }
    }
    for (_, pb) in bars.iter() {
        pb.finish();
    }

    if all_ok {
        log::info!("Successfully merged data!");
    } else {
        log::warn!("Some runs failed; check {LOG_FILE} for details.");
    }
    log::info!("Done.");
}
