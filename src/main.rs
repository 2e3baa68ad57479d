use clap::{Parser, ValueEnum};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use mq_daemon::config::{DaemonConfig, ListenerConfig, ToolConfig, DEFAULT_JOB_PATTERN};
use mq_daemon::shutdown::install_shutdown_handler;
use mq_daemon::source::{read_request, submit_request, RequestReport};
use mq_daemon::Daemon;

#[derive(Parser, Debug)]
#[command(name = "mq-daemon")]
#[command(version)]
#[command(about = "Queue and run analysis requests dropped into a directory")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the daemon
    Run(RunArgs),

    /// Create a request directory from input files
    Submit {
        /// Directory watched by the daemon
        #[arg(long, env = "MQD_LISTEN_DIR", default_value = ".")]
        listen_dir: PathBuf,

        /// Request name (must match the daemon's job pattern)
        #[arg(long)]
        name: Option<String>,

        /// Input files: .raw, .fasta and exactly one .yaml or .json
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show the state of a request directory
    Status {
        /// The request directory
        request: PathBuf,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Daemon Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Directory scanned for request directories
    #[arg(long, env = "MQD_LISTEN_DIR", default_value = ".")]
    listen_dir: PathBuf,

    /// Pattern request directory names must match
    #[arg(long, env = "MQD_JOB_PATTERN", default_value = DEFAULT_JOB_PATTERN)]
    job_pattern: String,

    /// Path to the analysis tool binary
    #[arg(long, env = "MQD_TOOL")]
    tool: PathBuf,

    /// Extra arguments passed to the tool before the manifest path
    #[arg(long = "tool-arg", allow_hyphen_values = true)]
    tool_args: Vec<String>,

    /// Maximum number of jobs waiting for a worker
    #[arg(long, env = "MQD_MAX_QUEUE", default_value = "5")]
    max_queue: usize,

    /// Number of workers
    #[arg(long, env = "MQD_WORKERS", default_value = "5")]
    workers: usize,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "2000")]
    heartbeat_ms: u64,

    /// Delay between directory scans in milliseconds
    #[arg(long, default_value = "1000")]
    poll_ms: u64,

    /// Log file, appended to
    #[arg(long, env = "MQD_LOG_FILE", default_value = "mq-daemon.log")]
    log_file: PathBuf,

    /// Log to stderr instead of the log file
    #[arg(long)]
    log_stderr: bool,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn init_logging(args: &RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let writer = if args.log_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&args.log_file)?;
        BoxMakeWriter::new(Mutex::new(file))
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(args.log_stderr)
        .with_thread_names(true)
        .with_writer(writer)
        .init();
    Ok(())
}

async fn run_daemon(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&args)?;

    let config = DaemonConfig {
        queue_capacity: args.max_queue,
        num_workers: args.workers,
        heartbeat_interval_ms: args.heartbeat_ms,
        listener: ListenerConfig {
            listen_dir: args.listen_dir,
            job_pattern: args.job_pattern,
            poll_interval_ms: args.poll_ms,
        },
        tool: ToolConfig {
            binary_path: args.tool,
            args: args.tool_args,
        },
    };

    let daemon = Daemon::from_config(config)?;
    let shutdown = install_shutdown_handler()?;
    daemon.run(shutdown).await?;
    Ok(())
}

fn print_report(report: &RequestReport, output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            let status = report
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "PENDING".to_string());
            println!("{:<12} {}", "Request:", report.name);
            println!("{:<12} {}", "Status:", status);
            if let Some(beat) = report.last_beat {
                println!("{:<12} {}", "Last beat:", beat.to_rfc3339());
            }
            if let Some(ref error) = report.error {
                println!("{:<12} {}", "Error:", error);
            }
            for output in &report.outputs {
                println!("{:<12} {}", "Output:", output.display());
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => {
            run_daemon(run_args).await?;
        }
        Commands::Submit {
            listen_dir,
            name,
            files,
        } => {
            let dir = submit_request(&listen_dir, name, &files).await?;
            println!("{}", dir.display());
        }
        Commands::Status { request, output } => {
            let report = read_request(&request).await?;
            print_report(&report, &output)?;
        }
    }

    Ok(())
}
