use hyper::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for splitter operations
pub type Result<T, E = SplitterError> = std::result::Result<T, E>;

/// A configuration update or startup setting that cannot be applied.
#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("Invalid configuration: missing variant data")]
    MissingVariant,

    #[error("configuration must be a JSON object")]
    NotAnObject,

    #[error("{0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown log level: {0}")]
    InvalidLogLevel(String),

    #[error("Port cannot be 0")]
    InvalidPort,
}

/// A forward attempt that failed at the network layer.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("Failed to read response body from {0}: {1}")]
    ResponseBodyError(String, String),

    #[error("Invalid upstream URL {0}: {1}")]
    InvalidTarget(String, String),
}

#[derive(Error, Debug, PartialEq)]
pub enum SelectionError {
    #[error("total variant weight must be positive (variant_a={weight_a}, variant_b={weight_b})")]
    NoRoutableWeight { weight_a: f64, weight_b: f64 },
}

/// Errors surfaced by the HTTP service. Each maps to one status code.
#[derive(Error, Debug)]
pub enum SplitterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    #[error("Monitoring is disabled")]
    MonitoringDisabled,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigValidationError),

    #[error(transparent)]
    UpstreamUnavailable(#[from] ForwardError),

    #[error(transparent)]
    NoRoutableVariant(#[from] SelectionError),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// JSON body of every error response.
#[derive(Serialize, Debug, PartialEq)]
pub struct ErrorBody {
    pub code: &'static str,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SplitterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SplitterError::MonitoringDisabled => StatusCode::FORBIDDEN,
            SplitterError::InvalidConfig(_) | SplitterError::RequestBodyError(_) => {
                StatusCode::BAD_REQUEST
            }
            SplitterError::UpstreamUnavailable(_) | SplitterError::NoRoutableVariant(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SplitterError::Io(_)
            | SplitterError::HttpClientError(_)
            | SplitterError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine readable category
    pub fn code(&self) -> &'static str {
        match self {
            SplitterError::MonitoringDisabled => "monitoring_disabled",
            SplitterError::InvalidConfig(_) => "invalid_config",
            SplitterError::RequestBodyError(_) => "bad_request",
            SplitterError::UpstreamUnavailable(_) => "upstream_unavailable",
            SplitterError::NoRoutableVariant(_) => "no_routable_variant",
            SplitterError::Io(_)
            | SplitterError::HttpClientError(_)
            | SplitterError::InternalError(_) => "internal_error",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let (error, details) = match self {
            SplitterError::UpstreamUnavailable(e) => {
                ("Failed to reach service".to_string(), Some(e.to_string()))
            }
            SplitterError::NoRoutableVariant(e) => {
                ("No routable variant".to_string(), Some(e.to_string()))
            }
            SplitterError::InvalidConfig(ConfigValidationError::MissingVariant) => {
                (self.to_string(), None)
            }
            SplitterError::InvalidConfig(e) => {
                (format!("Failed to update configuration: {e}"), None)
            }
            _ => (self.to_string(), None),
        };

        ErrorBody {
            code: self.code(),
            error,
            details,
        }
    }
}
