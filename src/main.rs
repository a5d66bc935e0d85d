//! Update agent for a supervised service binary.
//!
//! Runs once: waits a random startup delay, installs a newer verified release
//! if one is published, then asks the service to restart.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use updater::{Agent, AgentConfig, RunReport, Stage, StageError};

/// Command-line arguments for the update agent
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "update.toml")]
    config: PathBuf,

    /// Skip the randomized startup delay
    #[arg(long, default_value_t = false)]
    no_delay: bool,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match AgentConfig::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            if let Err(log_err) = init_logging(args.debug, None) {
                eprintln!("failed to initialise logging: {log_err:#}");
            }
            return report_failure(&StageError::new(Stage::LoadConfig, err));
        }
    };

    if let Err(err) = init_logging(args.debug, config.log_file.as_deref()) {
        eprintln!("failed to initialise logging: {err:#}");
        return ExitCode::from(updater::FailureClass::Config.exit_code());
    }

    tracing::info!(config = ?args.config, binary = ?config.binary_path(), "starting update agent");

    let agent = match Agent::from_config(&config) {
        Ok(agent) if args.no_delay => agent.without_jitter(),
        Ok(agent) => agent,
        Err(err) => return report_failure(&err),
    };

    match agent.run().await {
        Ok(RunReport::UpToDate { digest }) => {
            tracing::info!(%digest, "nothing to do");
            ExitCode::SUCCESS
        }
        Ok(RunReport::Updated {
            previous,
            installed,
            binary_path,
        }) => {
            tracing::info!(%previous, %installed, path = ?binary_path, "service updated and restart requested");
            ExitCode::SUCCESS
        }
        Err(err) => report_failure(&err),
    }
}

fn report_failure(err: &StageError) -> ExitCode {
    tracing::error!(stage = %err.stage, error = %err.source, "update run aborted");
    eprintln!("update-agent: {err}");
    ExitCode::from(err.class().exit_code())
}

/// Rotated log files kept next to the configured `log-file`.
const MAX_LOG_FILES: usize = 30;

/// Log to stdout, and additionally to a daily-rotated `log_file` when configured.
fn init_logging(debug: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let default = if debug { "info,updater=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let file_layer = match log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .with_writer(rolling_appender(path)?)
                .boxed(),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_file(true).with_line_number(true))
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

/// `/var/log/update.log` rotates daily into `/var/log/update.<date>.log`.
fn rolling_appender(path: &Path) -> anyhow::Result<RollingFileAppender> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("log file has no usable name: {}", path.display()))?;

    let mut builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(MAX_LOG_FILES);
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        builder = builder.filename_suffix(ext);
    }
    builder
        .build(dir)
        .with_context(|| format!("failed to open log file {}", path.display()))
}
