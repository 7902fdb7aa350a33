//! Application state shared across all requests

use metrics_exporter_prometheus::PrometheusHandle;
use plantdoc_core::{Error, Result};
use plantdoc_vision::DiagnosisService;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

use crate::chat::ChatRelay;
use crate::config::AppConfig;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<AppConfig>,

    /// Read-only model pipeline, built once at startup
    pub service: Arc<DiagnosisService>,

    /// Chat collaborator relay
    pub chat: Arc<ChatRelay>,

    /// Bounds concurrent forward/backward passes
    pub inference_permits: Arc<Semaphore>,

    /// Prometheus metrics handle for rendering
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    /// Assemble state from already built parts
    pub fn new(
        config: AppConfig,
        service: DiagnosisService,
        chat: ChatRelay,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        let workers = config.server.inference_workers.max(1);
        Self {
            config: Arc::new(config),
            service: Arc::new(service),
            chat: Arc::new(chat),
            inference_permits: Arc::new(Semaphore::new(workers)),
            metrics_handle,
        }
    }

    /// Load the model and chat relay described by `config`
    pub async fn from_config(config: AppConfig, metrics_handle: Option<PrometheusHandle>) -> anyhow::Result<Self> {
        let vision = config.vision.clone();
        let service = tokio::task::spawn_blocking(move || DiagnosisService::from_config(&vision)).await??;
        let chat = ChatRelay::from_config(&config.chat)?;

        info!(
            "Inference pool: {} workers, upload limit {} bytes",
            config.server.inference_workers.max(1),
            config.server.max_upload_bytes
        );

        Ok(Self::new(config, service, chat, metrics_handle))
    }

    /// Run `f` on a blocking thread once an inference permit is available
    pub async fn run_inference<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&DiagnosisService) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .inference_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::internal(format!("Inference pool closed: {}", e)))?;

        let service = self.service.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f(service.as_ref())
        })
        .await
        .map_err(|e| Error::internal(format!("Inference task failed: {}", e)))?
    }
}
