use crate::config::{Config, Variant};
use crate::errors::SplitterError;
use hyper::StatusCode;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Upper bound on each backend status probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of probing one backend's `/status` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProbeStatus {
    /// Answered with 200
    Up,
    /// Answered, but with another status code
    Degraded { status_code: u16 },
    /// No answer within the timeout, or a transport error
    Down { error: String },
}

impl ProbeStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, ProbeStatus::Up)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallStatus {
    Ok,
    Degraded,
    Critical,
}

impl OverallStatus {
    pub fn from_probes(variant_a: &ProbeStatus, variant_b: &ProbeStatus) -> Self {
        match (variant_a.is_up(), variant_b.is_up()) {
            (true, true) => OverallStatus::Ok,
            (true, false) | (false, true) => OverallStatus::Degraded,
            (false, false) => OverallStatus::Critical,
        }
    }

    /// Plain-text body served by the status endpoint.
    pub fn message(&self) -> &'static str {
        match self {
            OverallStatus::Ok => "OK",
            OverallStatus::Degraded => "DEGRADED - Some services unavailable",
            OverallStatus::Critical => "CRITICAL - All services down",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            OverallStatus::Ok | OverallStatus::Degraded => StatusCode::OK,
            OverallStatus::Critical => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub variant_a: ProbeStatus,
    pub variant_b: ProbeStatus,
    pub overall: OverallStatus,
}

/// Point-in-time health of both backends. Nothing is cached between probes.
#[derive(Clone)]
pub struct HealthProber {
    client: reqwest::Client,
}

impl HealthProber {
    pub fn new() -> Result<Self, SplitterError> {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, SplitterError> {
        // Probes go straight to the backends, like forwarded requests do.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(HealthProber { client })
    }

    /// Probes both variants concurrently.
    pub async fn probe(&self, config: &Config) -> HealthReport {
        let (variant_a, variant_b) = tokio::join!(
            self.probe_variant(Variant::VariantA, &config.variant_a.service_url),
            self.probe_variant(Variant::VariantB, &config.variant_b.service_url),
        );
        let overall = OverallStatus::from_probes(&variant_a, &variant_b);

        HealthReport {
            variant_a,
            variant_b,
            overall,
        }
    }

    async fn probe_variant(&self, variant: Variant, service_url: &str) -> ProbeStatus {
        let url = format!("{service_url}/status");

        let status = match self.client.get(&url).send().await {
            Ok(response) if response.status() == StatusCode::OK => ProbeStatus::Up,
            Ok(response) => ProbeStatus::Degraded {
                status_code: response.status().as_u16(),
            },
            Err(e) => ProbeStatus::Down {
                error: e.to_string(),
            },
        };

        match &status {
            ProbeStatus::Up => tracing::debug!(%variant, %url, "Backend is up"),
            ProbeStatus::Degraded { status_code } => {
                tracing::warn!(%variant, %url, status_code, "Backend is degraded")
            }
            ProbeStatus::Down { error } => {
                tracing::warn!(%variant, %url, %error, "Backend is down")
            }
        }

        status
    }
}
