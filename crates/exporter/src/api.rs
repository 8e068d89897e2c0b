//! HTTP API: federation endpoint, health check and internal metrics

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use exporter_lib::{
    discover::{resolve_registry_endpoints, ClusterMode, ServiceLister},
    expfmt,
    health::HealthResponse,
    observability::ExporterMetrics,
    pipeline::ScrapePipeline,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Shared application state
pub struct AppState {
    pub lister: Arc<dyn ServiceLister>,
    pub pipeline: ScrapePipeline,
    pub mode: ClusterMode,
    pub selector: String,
    pub namespace: Option<String>,
    pub metrics: ExporterMetrics,
}

impl AppState {
    pub fn new(
        lister: Arc<dyn ServiceLister>,
        pipeline: ScrapePipeline,
        mode: ClusterMode,
        selector: String,
        namespace: Option<String>,
        metrics: ExporterMetrics,
    ) -> Self {
        Self {
            lister,
            pipeline,
            mode,
            selector,
            namespace,
            metrics,
        }
    }
}

/// Run one full collection: discover registries, fan out over them and
/// their applications, and encode the union as one text exposition.
///
/// A cluster query failure or an encode failure is fatal for the whole
/// collection. Per-endpoint fetch and parse failures are logged inside
/// the pipeline and drop only that endpoint's contribution.
pub async fn collect(state: &AppState) -> anyhow::Result<Vec<u8>> {
    let started = Instant::now();

    let registries = resolve_registry_endpoints(
        state.lister.as_ref(),
        &state.selector,
        state.namespace.as_deref(),
        &state.mode,
        state.pipeline.policy(),
    )
    .await?;
    state.metrics.set_registry_endpoints(registries.len());

    let families = state.pipeline.run(registries).await;
    state.metrics.set_application_results(families.len());

    let mut body = Vec::new();
    let bytes = expfmt::write_metrics(&mut body, &families)?;

    state.metrics.record_collection(started.elapsed().as_secs_f64());
    info!(
        families = families.len(),
        bytes,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Collection complete"
    );
    Ok(body)
}

/// Federation endpoint: every request triggers one full collection
async fn federate(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match collect(&state).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, expfmt::TEXT_FORMAT)],
            body,
        ),
        Err(err) => {
            state.metrics.record_collection_error();
            error!(error = %err, "Collection failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, expfmt::TEXT_FORMAT)],
                Vec::new(),
            )
        }
    }
}

/// Health check response
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse::ok(
        env!("CARGO_PKG_VERSION"),
        state.mode.is_in_cluster(),
    ))
}

/// Exporter's own metrics, distinct from the federated ones
async fn internal_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %err, "Failed to encode internal metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new());
    }

    (StatusCode::OK, buffer)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(federate))
        .route("/federate", get(federate))
        .route("/healthz", get(healthz))
        .route("/internal/metrics", get(internal_metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
