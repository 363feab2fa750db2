//! StepRunner CLI Entry Point
//!
//! Runs a declarative pipeline with live progress and per-step metrics.
//!
//! # Usage
//!
//! ```bash
//! # Run a pipeline
//! steprunner pipeline.yaml
//!
//! # Seed the context
//! steprunner pipeline.yaml --text "one two three" --set n=5
//!
//! # Show the flattened plan without running
//! steprunner pipeline.yaml --plan
//!
//! # Choose the run identifier and metrics directory
//! steprunner pipeline.yaml --run-id nightly --metrics-dir /var/lib/steprunner
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn};
use serde_json::Value;
use tokio::runtime::{Handle, Runtime};

use steprunner::execution::Runner;
use steprunner::monitoring::{MetricsRecorder, MetricsReport, ProgressEvent};
use steprunner::pipeline::{load_pipeline, ActionLibrary, Context, Pipeline};
use steprunner::store::{JsonFileMetricsStore, MetricsStore};
use steprunner::{APP_NAME, VERSION};

/// Default pipeline file used when none is specified.
const DEFAULT_PIPELINE: &str = "pipeline.yaml";

/// Default directory for run metrics.
const DEFAULT_METRICS_DIR: &str = ".steprunner/metrics";

/// Context key seeded by `--text`.
const TEXT_KEY: &str = "text";

/// Command-line configuration parsed from arguments.
#[derive(Debug, PartialEq)]
struct Config {
    pipeline_path: String,
    run_id: Option<String>,
    values: Vec<(String, Value)>,
    metrics_dir: PathBuf,
    plan_only: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline_path: DEFAULT_PIPELINE.to_string(),
            run_id: None,
            values: Vec::new(),
            metrics_dir: PathBuf::from(DEFAULT_METRICS_DIR),
            plan_only: false,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Hierarchical Step Pipeline Runner");
    println!();
}

fn print_usage() {
    println!("Usage: steprunner [OPTIONS] <PIPELINE_FILE>");
    println!();
    println!("Arguments:");
    println!("  <PIPELINE_FILE>     Path to pipeline YAML file (default: {})", DEFAULT_PIPELINE);
    println!();
    println!("Options:");
    println!("  --run-id ID         Run identifier (default: random UUID)");
    println!("  --set KEY=VALUE     Seed a context value; VALUE is JSON or plain text");
    println!("  --text TEXT         Shorthand for --set {}=TEXT", TEXT_KEY);
    println!("  --metrics-dir PATH  Directory for run metrics (default: {})", DEFAULT_METRICS_DIR);
    println!("  --plan              Print the flattened step plan and exit");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Actions available to leaf steps: {}", ActionLibrary::builtin().names().join(", "));
}

/// Parses a `KEY=VALUE` pair; VALUE is read as JSON, falling back to a string.
fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Expected KEY=VALUE, got '{}'", raw))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Empty key in '{}'", raw));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_seen = false;
    let mut i = 1; // Skip program name

    let next_value = |i: &mut usize, flag: &str| -> Result<String, String> {
        *i += 1;
        args.get(*i)
            .cloned()
            .ok_or_else(|| format!("{} requires an argument", flag))
    };

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--plan" => config.plan_only = true,
            "--verbose" | "-v" => config.verbose = true,
            "--run-id" => config.run_id = Some(next_value(&mut i, "--run-id")?),
            "--metrics-dir" => {
                config.metrics_dir = PathBuf::from(next_value(&mut i, "--metrics-dir")?)
            }
            "--text" => {
                let text = next_value(&mut i, "--text")?;
                config.values.push((TEXT_KEY.to_string(), Value::String(text)));
            }
            "--set" => {
                let raw = next_value(&mut i, "--set")?;
                config.values.push(parse_assignment(&raw)?);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if positional_seen {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.pipeline_path = arg.clone();
                positional_seen = true;
            }
        }
        i += 1;
    }

    Ok(config)
}

fn print_plan(pipeline: &Pipeline) {
    println!("{} ({})", pipeline.name().bold(), pipeline.description());
    for (index, step) in pipeline.plan().iter().enumerate() {
        println!("  {:>3}. {:<20} {}", index + 1, step.name, step.description.dimmed());
    }
    println!();
}

/// Prints one progress message; returns true for terminal events.
fn print_event(message: &str) -> bool {
    let event: ProgressEvent = match serde_json::from_str(message) {
        Ok(event) => event,
        Err(e) => {
            warn!("Unreadable progress message: {}", e);
            return false;
        }
    };

    match &event {
        ProgressEvent::Progress(snapshot) => {
            let done = snapshot.executed.len();
            let total = done + snapshot.running.len();
            match snapshot.running.first() {
                Some(next) => println!(
                    "{} {} {}",
                    format!("[{}/{}]", done, total).cyan(),
                    next.name.bold(),
                    next.description.dimmed()
                ),
                None => println!("{}", format!("[{}/{}]", done, total).cyan()),
            }
        }
        ProgressEvent::Completed { run_id } => {
            println!("{} Run '{}' completed", "✔".green(), run_id);
        }
        ProgressEvent::Failed { run_id, step, error } => {
            let at = step.as_deref().unwrap_or("<setup>");
            println!("{} Run '{}' failed at '{}': {}", "✘".red(), run_id, at, error);
        }
    }

    event.is_terminal()
}

/// Runs the pipeline on a worker thread while printing its progress.
async fn execute(pipeline: Pipeline, config: Config, run_id: String) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(JsonFileMetricsStore::new(&config.metrics_dir));
    let (recorder, drain) = MetricsRecorder::spawn(store.clone(), &Handle::current());
    let stats = recorder.stats();

    let mut context = Context::new().with_run_id(&run_id).with_scheduler(recorder);
    for (key, value) in config.values {
        context.set(key, value);
    }

    let runner = Runner::new();
    let mut subscription = runner.broadcaster().subscribe_channel(&run_id);
    let handle = runner.spawn(Arc::new(pipeline), context)?;

    let mut join = tokio::task::spawn_blocking(move || handle.join());
    let outcome = loop {
        tokio::select! {
            biased;
            Some(message) = subscription.recv() => {
                print_event(&message);
            }
            joined = &mut join => break joined,
        }
    };
    while let Some(message) = subscription.try_recv() {
        print_event(&message);
    }
    drop(subscription);

    // The final context holds the last recorder clone; the drain stops once it is gone.
    let result = outcome.map_err(|e| format!("Worker task failed: {}", e))?.map(|_| ());
    if let Err(e) = drain.await {
        error!("Metrics drain stopped abnormally: {}", e);
    }

    let samples = store.fetch(&run_id).await?;
    print!("{}", MetricsReport::new(&run_id, samples));

    if stats.failed() > 0 || stats.dropped() > 0 {
        warn!(
            "{} samples could not be persisted, {} were dropped",
            stats.failed(),
            stats.dropped()
        );
    }
    info!(
        "Metrics written to {}",
        store.document_path(&run_id).display()
    );

    result.map_err(Into::into)
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let pipeline = load_pipeline(&config.pipeline_path, &ActionLibrary::builtin()).map_err(|e| {
        error!("Failed to load pipeline: {}", e);
        format!("Could not load pipeline from '{}': {}", config.pipeline_path, e)
    })?;

    info!(
        "Pipeline '{}' loaded: {} leaf steps",
        pipeline.name(),
        pipeline.leaf_count()
    );

    if config.plan_only {
        print_plan(&pipeline);
        return Ok(());
    }

    let run_id = config
        .run_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!("Run id: {}", run_id);

    let runtime = Runtime::new()?;
    runtime.block_on(execute(pipeline, config, run_id))
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
