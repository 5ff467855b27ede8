use splitter::config_store::LogLevelHook;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt, reload};

/// `RUST_LOG` wins over the configured level at startup. Later level changes
/// replace the whole filter.
fn filter_for(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Installs the global subscriber and returns the hook that changes its
/// verbosity at runtime.
///
/// When `with_sentry` is set, events are also handed to the Sentry client,
/// which must already be initialized.
pub fn init(level: LevelFilter, with_sentry: bool) -> LogLevelHook {
    let (filter, handle) = reload::Layer::new(filter_for(level));
    let sentry_layer = with_sentry.then(sentry::integrations::tracing::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(sentry_layer)
        .init();

    Box::new(move |level: LevelFilter| {
        let filter = EnvFilter::default().add_directive(level.into());
        match handle.reload(filter) {
            Ok(()) => tracing::info!(%level, "Log level changed"),
            Err(e) => tracing::warn!(error = %e, "Failed to change log level"),
        }
    })
}
