use crate::errors::ConfigValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::level_filters::LevelFilter;

pub const DEFAULT_SERVICE_A_URL: &str = "http://128.2.205.118:8083";
pub const DEFAULT_SERVICE_B_URL: &str = "http://128.2.205.118:8084";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8082;
pub const DEFAULT_WEIGHT: f64 = 50.0;
pub const DEFAULT_LOG_LEVEL: &str = "INFO";

/// One of the two backends traffic is split between.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    VariantA,
    VariantB,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::VariantA, Variant::VariantB];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Variant::VariantA => "variant_a",
            Variant::VariantB => "variant_b",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic share and location of a single variant.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct VariantConfig {
    /// Relative share of traffic. Normalized against the other variant at
    /// selection time, so the two weights need not sum to 100.
    pub weight: f64,
    /// Base URL requests are forwarded to, without a trailing slash
    /// (e.g. "http://10.0.0.1:8083").
    #[serde(alias = "backend_url")]
    pub service_url: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MonitoringConfig {
    /// Whether `/metrics` is served
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Process-wide log verbosity (`DEBUG`, `INFO`, `WARNING`, ...)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            enabled: default_enabled(),
            log_level: default_log_level(),
        }
    }
}

impl MonitoringConfig {
    /// The tracing filter matching `log_level`.
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigValidationError> {
        parse_log_level(&self.log_level)
            .ok_or_else(|| ConfigValidationError::InvalidLogLevel(self.log_level.clone()))
    }
}

/// Traffic split and monitoring configuration.
///
/// Replaced wholesale on update, never merged.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    pub variant_a: VariantConfig,
    pub variant_b: VariantConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Config {
    /// An even split between the two given backends.
    pub fn new(service_a_url: impl Into<String>, service_b_url: impl Into<String>) -> Self {
        Config {
            variant_a: VariantConfig {
                weight: DEFAULT_WEIGHT,
                service_url: service_a_url.into(),
            },
            variant_b: VariantConfig {
                weight: DEFAULT_WEIGHT,
                service_url: service_b_url.into(),
            },
            monitoring: MonitoringConfig::default(),
        }
    }

    pub fn variant(&self, variant: Variant) -> &VariantConfig {
        match variant {
            Variant::VariantA => &self.variant_a,
            Variant::VariantB => &self.variant_b,
        }
    }

    /// Builds a configuration from an update payload.
    ///
    /// Both variant keys must be present before the payload is even
    /// considered for deserialization.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigValidationError> {
        let object = value.as_object().ok_or(ConfigValidationError::NotAnObject)?;
        if Variant::ALL
            .iter()
            .any(|variant| !object.contains_key(variant.as_str()))
        {
            return Err(ConfigValidationError::MissingVariant);
        }

        let config: Config = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks what can be checked on an already typed configuration.
    ///
    /// Weights are deliberately not range checked here; a split with no
    /// positive total weight is rejected when a request is routed.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.monitoring.level_filter()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(DEFAULT_SERVICE_A_URL, DEFAULT_SERVICE_B_URL)
    }
}

/// Parses a log level name, accepting the usual aliases case-insensitively.
pub fn parse_log_level(level: &str) -> Option<LevelFilter> {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some(LevelFilter::TRACE),
        "DEBUG" => Some(LevelFilter::DEBUG),
        "INFO" => Some(LevelFilter::INFO),
        "WARN" | "WARNING" => Some(LevelFilter::WARN),
        "ERROR" | "CRITICAL" => Some(LevelFilter::ERROR),
        "OFF" => Some(LevelFilter::OFF),
        _ => None,
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.port == 0 {
            return Err(ConfigValidationError::InvalidPort);
        }
        Ok(())
    }
}
