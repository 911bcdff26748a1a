use crate::config::MetricsConfig;
use crate::{MetricsError, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::broadcast;
use tracing::info;

/// Serves `/metrics` and `/health`.
pub struct MetricsServer {
    config: MetricsConfig,
    handle: PrometheusHandle,
}

impl MetricsServer {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn install(config: MetricsConfig) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| MetricsError::Recorder(e.to_string()))?;
        crate::describe_all();
        Ok(Self { config, handle })
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Serve until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr = self.config.address();
        let handle = self.handle;

        let app = Router::new()
            .route("/metrics", get(move || metrics_handler(handle.clone())))
            .route("/health", get(health_handler));

        info!(address = %addr, "Starting metrics server");

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| MetricsError::Server(e.to_string()))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await
            .map_err(|e| MetricsError::Server(e.to_string()))?;

        info!("Metrics server stopped");
        Ok(())
    }
}

async fn metrics_handler(handle: PrometheusHandle) -> String {
    handle.render()
}

async fn health_handler() -> &'static str {
    "OK"
}
