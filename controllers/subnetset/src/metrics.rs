//! Prometheus counters and the metrics/probe endpoint.

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Counters exported by the controller
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    delete_total: IntCounterVec,
    allocation_total: IntCounterVec,
    gc_total: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

fn counter(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec, ControllerError> {
    let counter = IntCounterVec::new(Opts::new(name, help), labels).map_err(|e| ControllerError::Metrics(e.to_string()))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| ControllerError::Metrics(e.to_string()))?;
    Ok(counter)
}

impl Metrics {
    /// Creates the counters in a private registry
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();
        Ok(Self {
            reconcile_total: counter(
                &registry,
                "subnetset_reconcile_total",
                "SubnetSet reconciliations by result",
                &["result"],
            )?,
            delete_total: counter(
                &registry,
                "subnetset_delete_total",
                "SubnetSet deletions by result",
                &["result"],
            )?,
            allocation_total: counter(
                &registry,
                "subnet_allocation_total",
                "Subnet allocations by provisioning mode and result",
                &["mode", "result"],
            )?,
            gc_total: counter(
                &registry,
                "subnet_gc_total",
                "Subnets removed by the garbage collector, by result",
                &["result"],
            )?,
            registry,
        })
    }

    /// Counts one reconciliation
    pub fn record_reconcile(&self, success: bool) {
        self.reconcile_total.with_label_values(&[outcome(success)]).inc();
    }

    /// Counts one SubnetSet deletion attempt
    pub fn record_delete(&self, success: bool) {
        self.delete_total.with_label_values(&[outcome(success)]).inc();
    }

    /// Counts one allocation; `mode` is `precreated` or `auto`
    pub fn record_allocation(&self, mode: &str, success: bool) {
        self.allocation_total.with_label_values(&[mode, outcome(success)]).inc();
    }

    /// Counts `count` Subnets handled by one collection pass
    pub fn record_gc(&self, success: bool, count: usize) {
        self.gc_total
            .with_label_values(&[outcome(success)])
            .inc_by(count as u64);
    }

    /// Current value of the reconcile counter for `success`
    pub fn reconcile_count(&self, success: bool) -> u64 {
        self.reconcile_total.with_label_values(&[outcome(success)]).get()
    }

    /// Current value of the delete counter for `success`
    pub fn delete_count(&self, success: bool) -> u64 {
        self.delete_total.with_label_values(&[outcome(success)]).get()
    }

    /// Renders every counter in the Prometheus text format
    pub fn gather_text(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ControllerError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| ControllerError::Metrics(e.to_string()))
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.gather_text() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Routes `/metrics` and `/healthz`
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

/// Serves [`router`] on `addr` until the task is dropped
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Metrics(format!("bind {}: {}", addr, e)))?;
    info!("Metrics endpoint listening on {}", addr);
    axum::serve(listener, router(metrics))
        .await
        .map_err(|e| ControllerError::Metrics(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconcile(true);
        metrics.record_reconcile(false);
        metrics.record_allocation("auto", true);
        metrics.record_gc(true, 3);

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("subnetset_reconcile_total{result=\"success\"} 1"));
        assert!(text.contains("subnetset_reconcile_total{result=\"failure\"} 1"));
        assert!(text.contains("subnet_allocation_total{mode=\"auto\",result=\"success\"} 1"));
        assert!(text.contains("subnet_gc_total{result=\"success\"} 3"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_delete(true);
        assert_eq!(a.delete_count(true), 1);
        assert_eq!(b.delete_count(true), 0);
    }

    #[tokio::test]
    async fn test_metrics_handler_responds() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.record_reconcile(true);
        let response = metrics_handler(State(metrics)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(healthz().await, "ok");
    }
}
