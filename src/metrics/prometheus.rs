//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Teardown passes by outcome
    pub static ref UNINSTALL_PASSES: CounterVec = register_counter_vec!(
        "longhorn_uninstaller_passes_total",
        "Total number of teardown passes by outcome",
        &["outcome"]
    ).unwrap();

    /// Failed passes by error category
    pub static ref UNINSTALL_ERRORS: CounterVec = register_counter_vec!(
        "longhorn_uninstaller_errors_total",
        "Total number of failed teardown passes by error category",
        &["category"]
    ).unwrap();

    /// Pass duration histogram
    pub static ref PASS_DURATION: HistogramVec = register_histogram_vec!(
        "longhorn_uninstaller_pass_duration_seconds",
        "Duration of teardown passes in seconds",
        &["outcome"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Store mutations issued by the uninstaller
    pub static ref STORE_MUTATIONS: CounterVec = register_counter_vec!(
        "longhorn_uninstaller_store_mutations_total",
        "Total number of store mutations by kind and action",
        &["kind", "action"]
    ).unwrap();

    /// Instances of each managed kind seen in the last scan
    pub static ref REMAINING_RESOURCES: GaugeVec = register_gauge_vec!(
        "longhorn_uninstaller_remaining_resources",
        "Number of remaining resources by kind",
        &["kind"]
    ).unwrap();

    /// Grace period in force
    pub static ref GRACE_PERIOD_SECONDS: prometheus::Gauge = prometheus::register_gauge!(
        "longhorn_uninstaller_grace_period_seconds",
        "Grace period before finalizers are removed, in seconds"
    ).unwrap();

    /// Uninstaller health (1 = healthy, 0 = unhealthy)
    pub static ref UNINSTALLER_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "longhorn_uninstaller_health",
        "Uninstaller health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Count one store mutation
pub fn record_mutation(kind: &str, action: &str) {
    STORE_MUTATIONS.with_label_values(&[kind, action]).inc();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    // Set initial health
    UNINSTALLER_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" | "/readyz" | "/ready" => health_response(),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", encoder.format_type())
        .body(Full::new(Bytes::from(buffer)))
        .unwrap()
}

/// Health and readiness follow the health gauge, which drops once the
/// teardown has failed startup
fn health_response() -> Response<Full<Bytes>> {
    if UNINSTALLER_HEALTH.get() > 0.0 {
        text_response(StatusCode::OK, "ok")
    } else {
        text_response(StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
