use crate::config::Variant;
use crate::errors::ForwardError;
use crate::metrics_defs::{REQUEST_DURATION, REQUEST_ERRORS, REQUESTS};
use crate::stats::MetricsCollector;
use http::request::Parts;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{HeaderMap, Method, Request, Response, Uri, Version};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use shared::http::normalize_headers;
use shared::{counter, histogram};
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Upper bound on a single forward, from connect to the last body byte.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything about a client request that is relayed to the backend.
///
/// Cookies travel in `headers`.
#[derive(Clone, Debug)]
pub struct ForwardRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ForwardRequest {
    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        ForwardRequest {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            version: parts.version,
            headers: parts.headers,
            body,
        }
    }

    /// `service_url` followed by the request path and query, unmodified.
    pub fn target_url(&self, service_url: &str) -> String {
        match &self.query {
            Some(query) => format!("{service_url}{}?{query}", self.path),
            None => format!("{service_url}{}", self.path),
        }
    }
}

/// Relays requests to the variant backends and records the outcome of every
/// attempt in the [`MetricsCollector`].
#[derive(Clone)]
pub struct ProxyForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    stats: Arc<MetricsCollector>,
    timeout: Duration,
}

impl ProxyForwarder {
    pub fn new(stats: Arc<MetricsCollector>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            stats,
            timeout: FORWARD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends `request` to `service_url` on behalf of `variant`.
    ///
    /// No retries. Whatever the outcome, the attempt is counted exactly once.
    pub async fn forward(
        &self,
        variant: Variant,
        service_url: &str,
        request: ForwardRequest,
    ) -> Result<Response<Bytes>, ForwardError> {
        let start = Instant::now();
        let target = request.target_url(service_url);
        tracing::info!(%variant, %target, method = %request.method, "Forwarding request");

        match send_to_upstream(&self.client, &target, request, self.timeout).await {
            Ok(response) => {
                let latency = start.elapsed();
                self.stats.record_success(variant, latency);
                counter!(
                    REQUESTS,
                    "variant" => variant.as_str(),
                    "status" => response.status().as_str().to_string()
                )
                .increment(1);
                histogram!(REQUEST_DURATION, "variant" => variant.as_str())
                    .record(latency.as_secs_f64());

                tracing::info!(
                    %variant,
                    status = response.status().as_u16(),
                    latency_secs = latency.as_secs_f64(),
                    "Response from backend"
                );
                Ok(response)
            }
            Err(e) => {
                self.stats.record_error(variant);
                counter!(REQUEST_ERRORS, "variant" => variant.as_str()).increment(1);

                tracing::error!(
                    %variant,
                    %target,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    error = %e,
                    "Error forwarding request"
                );
                Err(e)
            }
        }
    }
}

/// One request/response exchange with the backend at `target`.
///
/// The timeout applies to the entire cycle, including collecting the
/// complete response body, so this is not suitable for streaming responses.
async fn send_to_upstream(
    client: &Client<HttpConnector, Full<Bytes>>,
    target: &str,
    request: ForwardRequest,
    timeout_duration: Duration,
) -> Result<Response<Bytes>, ForwardError> {
    let uri: Uri = target
        .parse()
        .map_err(|e: http::uri::InvalidUri| {
            ForwardError::InvalidTarget(target.to_string(), e.to_string())
        })?;

    // Use the authority as identifier for error messages
    let upstream_identifier = uri
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_else(|| target.to_string());

    let mut headers = request.headers;
    normalize_headers(&mut headers, request.version);

    let mut upstream_request = Request::new(Full::new(request.body));
    *upstream_request.method_mut() = request.method;
    *upstream_request.uri_mut() = uri;
    *upstream_request.headers_mut() = headers;

    let exchange = async {
        let response = client.request(upstream_request).await.map_err(|e| {
            ForwardError::UpstreamRequestFailed(upstream_identifier.clone(), error_chain(&e))
        })?;

        let (mut parts, body) = response.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| {
                ForwardError::ResponseBodyError(upstream_identifier.clone(), e.to_string())
            })?;

        let response_version = parts.version;
        normalize_headers(&mut parts.headers, response_version);
        Ok::<_, ForwardError>(Response::from_parts(parts, body_bytes))
    };

    timeout(timeout_duration, exchange)
        .await
        .map_err(|_| ForwardError::UpstreamTimeout(upstream_identifier.clone()))?
}

/// Renders an error with all of its sources, e.g.
/// "client error (Connect): tcp connect error: Connection refused".
fn error_chain(error: &dyn Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
