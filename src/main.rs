#![forbid(unsafe_code)]

//! `pdal-session-probe` — drive one PDAL session worker from the command line.
//!
//! Spawns the worker, performs a single operation, prints the outcome and
//! shuts the worker down. Useful for checking a worker build by hand.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use pdal_session::{AppError, Result, Session, SessionConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "pdal-session-probe", about = "Drive a PDAL session worker", version, long_about = None)]
struct Cli {
    /// Path to a TOML session configuration file.
    #[arg(long, conflicts_with = "process_path")]
    config: Option<PathBuf>,

    /// Worker executable, when no configuration file is given.
    #[arg(long, required_unless_present = "config")]
    process_path: Option<PathBuf>,

    /// Working directory override for the worker.
    #[arg(long)]
    working_directory: Option<PathBuf>,

    /// Disable the diagnostic echo of stream traffic.
    #[arg(long)]
    quiet: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch the worker and report its identity.
    Spawn,
    /// Print the number of points in the pipeline.
    Count {
        /// Pipeline description to create first.
        #[arg(long)]
        pipeline: Option<PathBuf>,
    },
    /// Print whether the session is valid.
    Valid,
    /// Create a pipeline from a JSON description file.
    Create {
        /// Pipeline description file.
        #[arg(long)]
        pipeline: PathBuf,
    },
    /// Destroy the worker's pipeline.
    Destroy,
    /// Stream points to a listener.
    Read {
        /// Listener host.
        #[arg(long)]
        host: String,
        /// Listener port.
        #[arg(long)]
        port: u16,
        /// Pipeline description to create first.
        #[arg(long)]
        pipeline: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match (&args.config, &args.process_path) {
        (Some(path), _) => SessionConfig::load_from_path(path)?,
        (None, Some(process_path)) => SessionConfig::new(process_path.clone())?,
        (None, None) => {
            return Err(AppError::Config(
                "either --config or --process-path is required".into(),
            ))
        }
    };
    if let Some(dir) = args.working_directory {
        config = config.with_working_directory(dir);
    }
    if args.quiet {
        config = config.with_log(false);
    }

    let session = Session::new(config)?;
    info!(session_id = session.id(), "session created");

    let outcome = execute(&session, args.command).await;
    session.shutdown().await;

    let line = outcome?;
    println!("{line}");
    Ok(())
}

async fn execute(session: &Session, command: Command) -> Result<String> {
    match command {
        Command::Spawn => {
            let handle = session.spawn().await?;
            Ok(format!(
                "ready: generation {} pid {}",
                handle.generation,
                handle.pid.map_or_else(|| "unknown".to_owned(), |pid| pid.to_string())
            ))
        }
        Command::Count { pipeline } => {
            create_from(session, pipeline.as_deref()).await?;
            Ok(session.get_num_points().await?.to_string())
        }
        Command::Valid => Ok(session.is_valid().await?.to_string()),
        Command::Create { pipeline } => {
            create_from(session, Some(pipeline.as_path())).await?;
            Ok("created".to_owned())
        }
        Command::Destroy => {
            session.destroy().await?;
            Ok("destroyed".to_owned())
        }
        Command::Read {
            host,
            port,
            pipeline,
        } => {
            create_from(session, pipeline.as_deref()).await?;
            Ok(session.read(&host, port).await?.to_string())
        }
    }
}

async fn create_from(session: &Session, pipeline: Option<&Path>) -> Result<()> {
    let Some(path) = pipeline else {
        return Ok(());
    };
    let desc = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| AppError::Io(format!("cannot read pipeline {}: {err}", path.display())))?;
    session.create(&desc).await
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
