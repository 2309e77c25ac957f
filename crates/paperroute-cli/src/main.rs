//! PaperRoute CLI - scanned paperwork in, filed and indexed documents out.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// PaperRoute - document inbox orchestrator
#[derive(Parser)]
#[command(name = "paperroute")]
#[command(version)]
#[command(about = "Watch a scan inbox, then file and index every document", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default location
    #[arg(short, long, global = true, env = "PAPERROUTE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a config file and the data directory
    Init,

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Watch the inbox and process documents until Ctrl+C
    Watch,

    /// Run a single file through the pipeline
    Process {
        /// File to process
        file: PathBuf,
    },

    /// Inspect and drive the index retry queue
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Show job history
    Jobs {
        /// Only show failed jobs
        #[arg(short, long)]
        failed: bool,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Check the configuration without starting anything
    Validate,

    /// Print the config file location
    Path,
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Show task counts per status
    Status,

    /// List queued tasks
    List {
        /// Filter by status (pending, failed-transient, awaiting-reindex, abandoned, indexed)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Run one retry pass over due tasks
    Retry,

    /// Remove an artifact from the index and drop its task
    Forget {
        /// Artifact ID (path of the placed markdown file)
        id: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paperroute=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paperroute=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Init => commands::init::run(config),
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => commands::config::show(config),
            ConfigCommands::Validate => commands::config::validate(config),
            ConfigCommands::Path => commands::config::path(config),
        },
        Commands::Watch => commands::watch::run(config),
        Commands::Process { file } => commands::process::run(config, &file),
        Commands::Queue(cmd) => match cmd {
            QueueCommands::Status => commands::queue::status(config),
            QueueCommands::List { status } => commands::queue::list(config, status),
            QueueCommands::Retry => commands::queue::retry(config),
            QueueCommands::Forget { id } => commands::queue::forget(config, &id),
        },
        Commands::Jobs { failed, limit } => commands::jobs::run(config, failed, limit),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
