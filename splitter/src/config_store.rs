use crate::config::Config;
use crate::errors::ConfigValidationError;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;

/// Called with the new verbosity whenever an update changes the log level.
pub type LogLevelHook = Box<dyn Fn(LevelFilter) + Send + Sync>;

struct Snapshot {
    config: Arc<Config>,
    version: u64,
}

/// Holds the active configuration as an immutable snapshot.
///
/// Readers clone the `Arc` and keep using it for the rest of their request;
/// writers swap in a complete new snapshot, so a reader never sees a
/// half-applied update.
pub struct ConfigStore {
    current: RwLock<Snapshot>,
    level_hook: Option<LogLevelHook>,
}

impl ConfigStore {
    pub fn new(initial: Config) -> Self {
        ConfigStore {
            current: RwLock::new(Snapshot {
                config: Arc::new(initial),
                version: 0,
            }),
            level_hook: None,
        }
    }

    pub fn with_level_hook(mut self, hook: LogLevelHook) -> Self {
        self.level_hook = Some(hook);
        self
    }

    pub fn get(&self) -> Arc<Config> {
        self.current.read().config.clone()
    }

    /// Number of successful replacements since startup.
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Validates `config` and replaces the active snapshot with it.
    ///
    /// On error the active snapshot is left untouched.
    pub fn set(&self, config: Config) -> Result<Arc<Config>, ConfigValidationError> {
        let level = config.monitoring.level_filter()?;
        let config = Arc::new(config);

        let mut guard = self.current.write();
        let level_changed = guard.config.monitoring.log_level != config.monitoring.log_level;
        guard.config = config.clone();
        guard.version += 1;

        // Applied under the write lock so concurrent updates cannot leave the
        // process verbosity out of step with the stored snapshot.
        if level_changed && let Some(hook) = &self.level_hook {
            hook(level);
        }
        let version = guard.version;
        drop(guard);

        tracing::info!(
            version,
            weight_a = config.variant_a.weight,
            weight_b = config.variant_b.weight,
            "Configuration updated"
        );
        Ok(config)
    }

    /// Replaces the configuration from a raw update payload.
    pub fn set_from_json(
        &self,
        value: serde_json::Value,
    ) -> Result<Arc<Config>, ConfigValidationError> {
        self.set(Config::from_json(value)?)
    }
}
