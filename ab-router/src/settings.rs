use serde::Deserialize;
use splitter::config::{Config, Listener, MonitoringConfig, Variant, VariantConfig};
use splitter::errors::ConfigValidationError;
use std::fs::File;
use std::path::Path;
use url::Url;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, Default)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ListenerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Deserialize, Debug, Default)]
struct VariantSettings {
    weight: Option<f64>,
    #[serde(alias = "backend_url")]
    service_url: Option<String>,
}

/// Contents of the optional YAML settings file. Every section may be left out.
#[derive(Deserialize, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    listener: ListenerSettings,
    #[serde(default)]
    variant_a: VariantSettings,
    #[serde(default)]
    variant_b: VariantSettings,
    monitoring: Option<MonitoringConfig>,
    metrics: Option<MetricsConfig>,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Everything the binary needs to start, after defaults, the settings file
/// and the environment have been merged and validated.
#[derive(Debug)]
pub struct Startup {
    pub listener: Listener,
    pub config: Config,
    pub metrics: Option<MetricsConfig>,
    pub sentry_dsn: Option<String>,
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Applies the environment on top of the file and validates the result.
    ///
    /// `env` looks up a variable by name; the binary passes `std::env::var`.
    pub fn resolve<F>(self, env: F) -> Result<Startup, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let defaults_listener = Listener::default();

        let mut listener = Listener {
            host: self.listener.host.unwrap_or(defaults_listener.host),
            port: self.listener.port.unwrap_or(defaults_listener.port),
        };
        if let Some(host) = env("HOST") {
            listener.host = host;
        }
        if let Some(port) = env("PORT") {
            listener.port = port.parse().map_err(|_| SettingsError::InvalidEnv {
                name: "PORT",
                value: port.clone(),
            })?;
        }

        let variant_a = merge_variant(
            self.variant_a,
            defaults.variant_a,
            env("SERVICE_A_URL"),
        );
        let variant_b = merge_variant(
            self.variant_b,
            defaults.variant_b,
            env("SERVICE_B_URL"),
        );
        let config = Config {
            variant_a,
            variant_b,
            monitoring: self.monitoring.unwrap_or_default(),
        };

        listener.validate()?;
        config.validate()?;
        for variant in Variant::ALL {
            validate_service_url(variant, &config.variant(variant).service_url)?;
        }

        Ok(Startup {
            listener,
            config,
            metrics: self.metrics,
            sentry_dsn: env("SENTRY_DSN").or(self.logging.sentry_dsn),
        })
    }
}

fn merge_variant(
    settings: VariantSettings,
    default: VariantConfig,
    env_url: Option<String>,
) -> VariantConfig {
    VariantConfig {
        weight: settings.weight.unwrap_or(default.weight),
        service_url: env_url
            .or(settings.service_url)
            .unwrap_or(default.service_url),
    }
}

fn validate_service_url(variant: Variant, service_url: &str) -> Result<(), SettingsError> {
    let invalid = |reason: String| SettingsError::InvalidServiceUrl {
        variant,
        url: service_url.to_string(),
        reason,
    };

    let url = Url::parse(service_url).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "http" {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid service url for {variant} ({url}): {reason}")]
    InvalidServiceUrl {
        variant: Variant,
        url: String,
        reason: String,
    },
    #[error("invalid config: {0}")]
    Invalid(#[from] ConfigValidationError),
}
