use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS: MetricDef = MetricDef {
    name: "requests",
    metric_type: MetricType::Counter,
    description: "Requests answered by a backend. Tagged with variant, status.",
};

pub const REQUEST_ERRORS: MetricDef = MetricDef {
    name: "requests.errors",
    metric_type: MetricType::Counter,
    description: "Forward attempts that failed before a backend answered. Tagged with variant.",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Forward round-trip duration in seconds. Tagged with variant.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of proxied requests currently being processed",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS,
    REQUEST_ERRORS,
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
];
