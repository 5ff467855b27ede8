use crate::config::Config;
use crate::config_store::ConfigStore;
use crate::errors::{ConfigValidationError, Result, SplitterError};
use crate::forwarder::{ForwardRequest, ProxyForwarder};
use crate::health::HealthProber;
use crate::metrics_defs::REQUESTS_INFLIGHT;
use crate::selector::VariantSelector;
use crate::stats::{MetricsCollector, MetricsView};
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use metrics::Gauge;
use serde::Serialize;
use serde_json::json;
use shared::gauge;
use shared::http::{full_body, make_boxed_error_response};
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type ServiceBody = BoxBody<Bytes, SplitterError>;

/// Methods relayed to the backends. Anything else is answered with a 405.
const PROXY_METHODS: &[Method] = &[
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::OPTIONS,
];

/// Components shared by every request handler.
pub struct AppState {
    pub config: ConfigStore,
    pub stats: Arc<MetricsCollector>,
    pub selector: VariantSelector,
    pub forwarder: ProxyForwarder,
    pub prober: HealthProber,
}

impl AppState {
    pub fn new(config: ConfigStore) -> Result<Self> {
        let stats = Arc::new(MetricsCollector::new());
        Ok(AppState {
            config,
            forwarder: ProxyForwarder::new(stats.clone()),
            stats,
            selector: VariantSelector::from_entropy(),
            prober: HealthProber::new()?,
        })
    }

    pub fn with_selector(mut self, selector: VariantSelector) -> Self {
        self.selector = selector;
        self
    }
}

#[derive(Clone)]
pub struct SplitterService {
    state: Arc<AppState>,
}

impl SplitterService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl Service<Request<Incoming>> for SplitterService {
    type Response = Response<ServiceBody>;
    type Error = SplitterError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let state = self.state.clone();
        Box::pin(async move { Ok(handle(&state, req).await) })
    }
}

#[derive(Debug, PartialEq)]
enum Endpoint {
    Status,
    Metrics,
    GetConfig,
    UpdateConfig,
    Health,
    ResetMetrics,
    Proxy,
}

/// Control endpoints win over the proxy. A control path called with another
/// method is proxied like any other path. `None` means the method is never
/// relayed.
fn resolve(method: &Method, path: &str) -> Option<Endpoint> {
    let endpoint = match (path, method) {
        ("/status", &Method::GET) => Endpoint::Status,
        ("/metrics", &Method::GET) => Endpoint::Metrics,
        ("/config", &Method::GET) => Endpoint::GetConfig,
        ("/config", &Method::POST) => Endpoint::UpdateConfig,
        ("/health", &Method::GET) => Endpoint::Health,
        ("/reset_metrics", &Method::POST) => Endpoint::ResetMetrics,
        (_, method) if PROXY_METHODS.contains(method) => Endpoint::Proxy,
        _ => return None,
    };
    Some(endpoint)
}

/// Answers one request. Every failure is turned into a response here.
pub async fn handle<B>(state: &AppState, req: Request<B>) -> Response<ServiceBody>
where
    B: Body + Send + 'static,
    B::Error: Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let result = match resolve(&method, &path) {
        Some(Endpoint::Status) => status(state).await,
        Some(Endpoint::Metrics) => metrics(state),
        Some(Endpoint::GetConfig) => json_response(StatusCode::OK, &*state.config.get()),
        Some(Endpoint::UpdateConfig) => update_config(state, req).await,
        Some(Endpoint::Health) => json_response(StatusCode::OK, &json!({"status": "healthy"})),
        Some(Endpoint::ResetMetrics) => {
            state.stats.reset();
            json_response(
                StatusCode::OK,
                &json!({"message": "Metrics reset successfully"}),
            )
        }
        Some(Endpoint::Proxy) => proxy(state, req).await,
        None => {
            tracing::debug!(%method, %path, "Method not allowed");
            Ok(make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED))
        }
    };

    result.unwrap_or_else(|e| {
        if e.status_code().is_server_error() {
            tracing::warn!(%method, %path, error = %e, "Request failed");
        } else {
            tracing::debug!(%method, %path, error = %e, "Request rejected");
        }
        error_response(&e)
    })
}

async fn proxy<B>(state: &AppState, req: Request<B>) -> Result<Response<ServiceBody>>
where
    B: Body + Send + 'static,
    B::Error: Display,
{
    // One snapshot for the whole request, even if the config changes meanwhile
    let config = state.config.get();
    let variant = state.selector.select(&config)?;

    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| SplitterError::RequestBodyError(e.to_string()))?
        .to_bytes();
    let request = ForwardRequest::from_parts(parts, body);
    let service_url = config.variant(variant).service_url.clone();

    // The forward runs on its own task: a client hanging up does not cancel
    // it, and its outcome is still recorded.
    let forwarder = state.forwarder.clone();
    let forwarded = tokio::spawn(async move {
        let _inflight = InflightGuard::new();
        forwarder.forward(variant, &service_url, request).await
    })
    .await;

    let response = forwarded.map_err(|e| SplitterError::InternalError(e.to_string()))??;
    Ok(response.map(|body| full_body(body)))
}

/// Counts one forward in `requests.inflight` for as long as it is alive.
struct InflightGuard(Gauge);

impl InflightGuard {
    fn new() -> Self {
        let gauge = gauge!(REQUESTS_INFLIGHT);
        gauge.increment(1.0);
        InflightGuard(gauge)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.decrement(1.0);
    }
}

async fn status(state: &AppState) -> Result<Response<ServiceBody>> {
    let report = state.prober.probe(&state.config.get()).await;
    tracing::info!(
        overall = %report.overall,
        variant_a = ?report.variant_a,
        variant_b = ?report.variant_b,
        "Status check"
    );

    let mut response = Response::new(full_body(report.overall.message()));
    *response.status_mut() = report.overall.status_code();
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Ok(response)
}

#[derive(Serialize)]
struct MetricsResponse<'a> {
    #[serde(flatten)]
    metrics: MetricsView,
    config: &'a Config,
}

fn metrics(state: &AppState) -> Result<Response<ServiceBody>> {
    let config = state.config.get();
    if !config.monitoring.enabled {
        return Err(SplitterError::MonitoringDisabled);
    }

    json_response(
        StatusCode::OK,
        &MetricsResponse {
            metrics: state.stats.snapshot(),
            config: &config,
        },
    )
}

async fn update_config<B>(state: &AppState, req: Request<B>) -> Result<Response<ServiceBody>>
where
    B: Body + Send + 'static,
    B::Error: Display,
{
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| SplitterError::RequestBodyError(e.to_string()))?
        .to_bytes();
    let value: serde_json::Value =
        serde_json::from_slice(&body).map_err(ConfigValidationError::Malformed)?;

    let config = state.config.set_from_json(value)?;
    json_response(
        StatusCode::OK,
        &json!({
            "message": "Configuration updated successfully",
            "config": &*config,
        }),
    )
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<ServiceBody>> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| SplitterError::InternalError(format!("Failed to serialize response: {e}")))?;

    let mut response = Response::new(full_body(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

fn error_response(error: &SplitterError) -> Response<ServiceBody> {
    let bytes = serde_json::to_vec(&error.to_body()).unwrap_or_else(|_| error.to_string().into());

    let mut response = Response::new(full_body(bytes));
    *response.status_mut() = error.status_code();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{MockBackend, unreachable_url};
    use http_body_util::Full;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use serde_json::Value;
    use std::time::Duration;

    fn test_state(config: Config) -> AppState {
        AppState::new(ConfigStore::new(config))
            .unwrap()
            .with_selector(VariantSelector::seeded(11))
    }

    fn request(method: Method, path: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn read_body(response: Response<ServiceBody>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    async fn read_json(response: Response<ServiceBody>) -> Value {
        serde_json::from_slice(&read_body(response).await).unwrap()
    }

    #[test]
    fn test_resolve() {
        assert_eq!(resolve(&Method::GET, "/status"), Some(Endpoint::Status));
        assert_eq!(resolve(&Method::POST, "/config"), Some(Endpoint::UpdateConfig));
        assert_eq!(resolve(&Method::GET, "/config"), Some(Endpoint::GetConfig));
        assert_eq!(resolve(&Method::DELETE, "/config"), Some(Endpoint::Proxy));
        assert_eq!(resolve(&Method::GET, "/reset_metrics"), Some(Endpoint::Proxy));
        assert_eq!(resolve(&Method::POST, "/status"), Some(Endpoint::Proxy));
        assert_eq!(resolve(&Method::TRACE, "/config"), None);
        assert_eq!(resolve(&Method::GET, "/"), Some(Endpoint::Proxy));
        assert_eq!(resolve(&Method::PATCH, "/api/items/1"), Some(Endpoint::Proxy));
        assert_eq!(resolve(&Method::GET, "/status/extra"), Some(Endpoint::Proxy));
        assert_eq!(resolve(&Method::TRACE, "/api"), None);
    }

    #[tokio::test]
    async fn test_health() {
        let state = test_state(Config::default());
        let response = handle(&state, request(Method::GET, "/health", "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await, json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn test_update_config_missing_variant_is_rejected() {
        let state = test_state(Config::new("http://a", "http://b"));

        let body = r#"{"variant_a": {"weight": 90, "service_url": "http://elsewhere"}}"#;
        let response = handle(&state, request(Method::POST, "/config", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error = read_json(response).await;
        assert!(
            error["error"]
                .as_str()
                .unwrap()
                .contains("missing variant data")
        );

        // The previous configuration is still active
        let response = handle(&state, request(Method::GET, "/config", "")).await;
        let config = read_json(response).await;
        assert_eq!(config["variant_a"]["service_url"], "http://a");
        assert_eq!(config["variant_a"]["weight"], 50.0);
    }

    #[tokio::test]
    async fn test_update_config_rejects_invalid_json() {
        let state = test_state(Config::default());
        let response = handle(&state, request(Method::POST, "/config", "{not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error = read_json(response).await;
        assert_eq!(error["code"], "invalid_config");
        assert!(
            error["error"]
                .as_str()
                .unwrap()
                .starts_with("Failed to update configuration")
        );
    }

    #[tokio::test]
    async fn test_update_config_echoes_new_config() {
        let state = test_state(Config::default());
        let body = json!({
            "variant_a": {"weight": 70, "service_url": "http://a2"},
            "variant_b": {"weight": 30, "backend_url": "http://b2"},
            "monitoring": {"enabled": true, "log_level": "DEBUG"},
        });

        let response = handle(
            &state,
            request(Method::POST, "/config", &body.to_string()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let echoed = read_json(response).await;
        assert_eq!(echoed["message"], "Configuration updated successfully");
        assert_eq!(echoed["config"]["variant_b"]["service_url"], "http://b2");

        let current = state.config.get();
        assert_eq!(current.variant_a.weight, 70.0);
        assert_eq!(current.monitoring.log_level, "DEBUG");
    }

    #[tokio::test]
    async fn test_metrics_forbidden_when_monitoring_disabled() {
        let mut config = Config::default();
        config.monitoring.enabled = false;
        let state = test_state(config);

        let response = handle(&state, request(Method::GET, "/metrics", "")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(read_json(response).await["error"], "Monitoring is disabled");
    }

    #[tokio::test]
    async fn test_proxy_to_unreachable_variant() {
        let backend_a = MockBackend::start(StatusCode::OK).await;
        let mut config = Config::new(&backend_a.url, unreachable_url().await);
        config.variant_a.weight = 0.0;
        config.variant_b.weight = 100.0;
        let state = test_state(config);

        let response = handle(&state, request(Method::GET, "/recommend/42", "")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let error = read_json(response).await;
        assert_eq!(error["error"], "Failed to reach service");
        assert_eq!(error["code"], "upstream_unavailable");
        assert!(error["details"].as_str().is_some());
        assert!(backend_a.requests().is_empty());

        let metrics = read_json(handle(&state, request(Method::GET, "/metrics", "")).await).await;
        assert_eq!(metrics["errors"], 1);
        assert_eq!(metrics["variant_b_errors"], 1);
        assert_eq!(metrics["total_requests"], 0);
    }

    #[tokio::test]
    async fn test_proxy_then_metrics_then_reset() {
        let backend_a = MockBackend::start(StatusCode::OK).await;
        let backend_b = MockBackend::start(StatusCode::OK).await;
        let mut config = Config::new(&backend_a.url, &backend_b.url);
        config.variant_a.weight = 3.0;
        config.variant_b.weight = 1.0;
        let state = test_state(config);

        for i in 0..20 {
            let response = handle(
                &state,
                request(Method::POST, &format!("/rate?item={i}"), "5 stars"),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(read_body(response).await.as_ref(), b"5 stars");
        }
        assert_eq!(
            backend_a.requests().len() + backend_b.requests().len(),
            20
        );

        let metrics = read_json(handle(&state, request(Method::GET, "/metrics", "")).await).await;
        assert_eq!(metrics["total_requests"], 20);
        assert_eq!(
            metrics["variant_a_requests"].as_u64().unwrap() as usize,
            backend_a.requests().len()
        );
        let percentages = metrics["variant_a_percentage"].as_f64().unwrap()
            + metrics["variant_b_percentage"].as_f64().unwrap();
        assert!((percentages - 100.0).abs() < 1e-9);
        assert!(metrics["variant_a_avg_latency"].as_f64().unwrap() > 0.0);
        assert_eq!(metrics["config"]["variant_a"]["weight"], 3.0);

        let response = handle(&state, request(Method::POST, "/reset_metrics", "")).await;
        assert_eq!(
            read_json(response).await,
            json!({"message": "Metrics reset successfully"})
        );

        let metrics = read_json(handle(&state, request(Method::GET, "/metrics", "")).await).await;
        assert_eq!(metrics["total_requests"], 0);
        assert_eq!(metrics["variant_a_requests"], 0);
        assert_eq!(metrics["variant_b_requests"], 0);
        assert_eq!(metrics["errors"], 0);
        assert_eq!(metrics["variant_a_avg_latency"], 0.0);
        assert_eq!(metrics["variant_b_avg_latency"], 0.0);
    }

    #[tokio::test]
    async fn test_proxy_with_no_routable_weight() {
        let mut config = Config::new("http://a", "http://b");
        config.variant_a.weight = 0.0;
        config.variant_b.weight = 0.0;
        let state = test_state(config);

        let response = handle(&state, request(Method::GET, "/anything", "")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(read_json(response).await["code"], "no_routable_variant");
        assert_eq!(state.stats.snapshot().errors, 0);
    }

    #[tokio::test]
    async fn test_status_verdicts() {
        let up_a = MockBackend::start(StatusCode::OK).await;
        let up_b = MockBackend::start(StatusCode::OK).await;
        let down = unreachable_url().await;

        let cases = [
            (Config::new(&up_a.url, &up_b.url), StatusCode::OK, "OK"),
            (
                Config::new(&up_a.url, &down),
                StatusCode::OK,
                "DEGRADED - Some services unavailable",
            ),
            (
                Config::new(&down, &down),
                StatusCode::INTERNAL_SERVER_ERROR,
                "CRITICAL - All services down",
            ),
        ];

        for (config, expected_status, expected_body) in cases {
            let state = test_state(config);
            let response = handle(&state, request(Method::GET, "/status", "")).await;
            assert_eq!(response.status(), expected_status);
            assert_eq!(read_body(response).await.as_ref(), expected_body.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_control_path_with_other_method_is_proxied() {
        let backend_a = MockBackend::start(StatusCode::OK).await;
        let backend_b = MockBackend::start(StatusCode::OK).await;
        let state = test_state(Config::new(&backend_a.url, &backend_b.url));

        let response = handle(&state, request(Method::PUT, "/config", "remote")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_body(response).await.as_ref(), b"remote");

        let seen: Vec<_> = backend_a
            .requests()
            .into_iter()
            .chain(backend_b.requests())
            .collect();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, Method::PUT);
        assert_eq!(seen[0].uri.path(), "/config");

        // The local configuration is untouched
        assert_eq!(state.config.version(), 0);
        assert_eq!(state.stats.snapshot().total_requests, 1);

        let response = handle(&state, request(Method::TRACE, "/config", "")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_inflight_gauge_settles_when_client_hangs_up() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let _local = metrics::set_default_local_recorder(&recorder);

        let backend = MockBackend::start(StatusCode::OK).await;
        let mut config = Config::new(&backend.url, &backend.url);
        config.variant_b.weight = 0.0;
        let state = Arc::new(test_state(config));

        let handler_state = state.clone();
        let client = tokio::spawn(async move {
            handle(&handler_state, request(Method::GET, "/slow", "")).await
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        client.abort();

        // The abandoned forward still runs to completion
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(state.stats.snapshot().variant_a_requests, 1);

        let inflight = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| key.key().name() == REQUESTS_INFLIGHT.name)
            .map(|(_, _, _, value)| value);
        assert_eq!(inflight, Some(DebugValue::Gauge(0.0.into())));
    }
}
