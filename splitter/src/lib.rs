pub mod config;
pub mod config_store;
pub mod errors;
pub mod forwarder;
pub mod health;
pub mod metrics_defs;
pub mod selector;
pub mod service;
pub mod stats;

#[cfg(test)]
mod testutils;

use crate::config::{Config, Listener};
use crate::config_store::{ConfigStore, LogLevelHook};
use crate::errors::SplitterError;
use crate::service::{AppState, SplitterService};
use shared::http::run_http_service;
use std::sync::Arc;

/// Serves the proxy and its control endpoints on `listener` until the process
/// exits. Only returns if the socket cannot be bound.
pub async fn run(
    config: Config,
    listener: &Listener,
    level_hook: Option<LogLevelHook>,
) -> Result<(), SplitterError> {
    listener.validate()?;
    config.validate()?;

    tracing::info!(
        variant_a = %config.variant_a.service_url,
        variant_a_weight = config.variant_a.weight,
        variant_b = %config.variant_b.service_url,
        variant_b_weight = config.variant_b.weight,
        "Starting A/B router"
    );

    let mut store = ConfigStore::new(config);
    if let Some(hook) = level_hook {
        store = store.with_level_hook(hook);
    }
    let state = Arc::new(AppState::new(store)?);

    run_http_service(&listener.host, listener.port, SplitterService::new(state)).await
}
