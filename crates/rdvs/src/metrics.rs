use crate::registry::Registry;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    registered: usize,
}

/// Readiness check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// Shared readiness state.
#[derive(Clone, Debug)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
    registry: Arc<Registry>,
}

impl HealthState {
    /// Create a ready health state reporting on `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
            registry,
        }
    }

    /// Mark the service as ready or draining.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Build the router serving `/health` and `/ready`.
pub fn health_routes(health_state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(health_state)
}

/// # Errors
///
/// Returns an error if installing the recorder or binding the HTTP server fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    health_state: HealthState,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = health_routes(health_state).route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move { h.render() }
        }),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check handler - returns 200 while the process is up.
async fn health_handler(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            registered: state.registry.len(),
        }),
    )
}

/// Readiness check handler - returns 200 if ready, 503 while draining.
async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<ReadyResponse>) {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "draining",
                ready: false,
            }),
        )
    }
}

/// Connection count gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("rdv_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("rdv_connections_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Increment the relayed-messages counter.
    pub fn messages_relayed_total() {
        metrics::counter!("rdv_messages_relayed_total").increment(1);
    }

    /// Increment the counter of messages answered with `not_found`.
    pub fn messages_not_found_total() {
        metrics::counter!("rdv_messages_not_found_total").increment(1);
    }

    /// Increment the dropped-messages counter with the given reason label.
    pub fn messages_dropped_total(reason: &'static str) {
        metrics::counter!("rdv_messages_dropped_total", "reason" => reason).increment(1);
    }

    /// Record a connection that ended with an error.
    pub fn connections_failed_total(reason: &'static str) {
        metrics::counter!("rdv_connections_failed_total", "reason" => reason).increment(1);
    }

    /// Increment the counter of identifiers taken over by a newer connection.
    pub fn registrations_displaced_total() {
        metrics::counter!("rdv_registrations_displaced_total").increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record the time spent handling one inbound message, in seconds.
    pub fn relay_latency_seconds(value: f64) {
        metrics::histogram!("rdv_relay_latency_seconds").record(value);
    }
}
