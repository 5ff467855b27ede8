mod logging;
mod settings;
mod statsd;

use clap::Parser;
use settings::{Settings, SettingsError, Startup};
use splitter::errors::SplitterError;
use std::path::PathBuf;
use std::process::ExitCode;

/// HTTP proxy splitting traffic between two backend variants.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Optional YAML settings file. Environment variables take precedence.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("invalid sentry dsn: {0}")]
    SentryDsn(#[from] sentry::types::ParseDsnError),
    #[error(transparent)]
    Metrics(#[from] statsd::MetricsError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Splitter(#[from] SplitterError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ab-router: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    let startup = settings.resolve(|name| std::env::var(name).ok())?;

    // Sentry has to be up before the runtime starts its worker threads
    let sentry_guard = match startup.sentry_dsn.as_deref() {
        Some(dsn) => Some(sentry::init(sentry::ClientOptions {
            dsn: Some(dsn.parse()?),
            release: sentry::release_name!(),
            ..Default::default()
        })),
        None => None,
    };

    let level = startup
        .config
        .monitoring
        .level_filter()
        .map_err(SettingsError::from)?;
    let level_hook = logging::init(level, sentry_guard.is_some());

    if let Some(metrics_config) = &startup.metrics {
        statsd::install_statsd(metrics_config)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(startup, level_hook))
}

async fn serve(
    startup: Startup,
    level_hook: splitter::config_store::LogLevelHook,
) -> Result<(), CliError> {
    let Startup {
        listener, config, ..
    } = startup;

    tokio::select! {
        result = splitter::run(config, &listener, Some(level_hook)) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }
    Ok(())
}
