//! HTTP routes and handlers

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use plantdoc_vision::Outcome;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server);
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/predict", post(predict))
        .route("/explain", post(explain))
        .route("/chat", post(chat))
        .route("/health", get(health_check))
        .route("/labels", get(labels))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.cors_allow_any {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "model": state.service.status(),
        "chat": state.chat.mode(),
        "inference_workers": state.config.server.inference_workers.max(1),
    }))
}

async fn labels(State(state): State<AppState>) -> Json<Value> {
    let labels = state.service.labels();
    Json(json!({
        "count": labels.len(),
        "labels": labels.as_slice(),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}

/// Uploaded multipart `file` field
struct Upload {
    content_type: Option<String>,
    bytes: Bytes,
}

impl Upload {
    fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidRequest(format!("Failed to read upload: {}", e)))?;

        return Ok(Upload { content_type, bytes });
    }

    Err(AppError::InvalidRequest("Missing multipart field 'file'".to_string()))
}

/// Main diagnosis handler
async fn predict(State(state): State<AppState>, multipart: Multipart) -> Result<Json<Value>, AppError> {
    metrics::counter!("plantdoc_requests_total", "endpoint" => "predict").increment(1);
    let request_id = Uuid::new_v4();

    let upload = read_upload(multipart).await?;
    if !upload.is_image() {
        debug!(%request_id, content_type = ?upload.content_type, "Rejected non-image upload");
        return Err(AppError::InvalidRequest(
            "Please upload a valid image file.".to_string(),
        ));
    }

    let report = state
        .run_inference(move |service| service.diagnose(&upload.bytes))
        .await?;

    if let Some(latency) = report.inference_us {
        metrics::histogram!("plantdoc_inference_latency_us", "stage" => "classify").record(latency as f64);
    }
    metrics::counter!("plantdoc_outcomes_total", "outcome" => report.outcome.kind()).increment(1);
    debug!(
        %request_id,
        outcome = report.outcome.kind(),
        variance = report.quality.variance,
        "Diagnosis complete"
    );

    Ok(Json(outcome_body(&report.outcome)))
}

/// Response payload for a diagnosis outcome
pub fn outcome_body(outcome: &Outcome) -> Value {
    match outcome {
        Outcome::Unusable { .. } => json!({
            "status": "error",
            "message": outcome.message(),
        }),
        Outcome::Uncertain { best } => json!({
            "status": "uncertain",
            "message": outcome.message(),
            "top_predictions": [best],
        }),
        Outcome::Success {
            diagnosis,
            top_predictions,
            advice,
        } => json!({
            "status": "success",
            "primary_diagnosis": diagnosis.label,
            "confidence": diagnosis.confidence_percent,
            "top_3_predictions": top_predictions,
            "advice": advice,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ExplainQuery {
    target_class: Option<String>,
}

/// Grad-CAM heatmap handler; failures are reported in the body, never as a status code
async fn explain(
    State(state): State<AppState>,
    Query(query): Query<ExplainQuery>,
    multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    metrics::counter!("plantdoc_requests_total", "endpoint" => "explain").increment(1);
    let request_id = Uuid::new_v4();

    let upload = read_upload(multipart).await?;
    let target = query.target_class;

    let result = state
        .run_inference(move |service| service.explain(&upload.bytes, target.as_deref()))
        .await;

    match result {
        Ok(explanation) => {
            metrics::histogram!("plantdoc_inference_latency_us", "stage" => "explain")
                .record(explanation.latency_us as f64);
            debug!(%request_id, target_class = %explanation.target, "Heatmap generated");
            Ok(Json(json!({
                "status": "success",
                "heatmap_base64": explanation.data_url,
            })))
        }
        Err(e) => {
            error!(%request_id, "Heatmap generation failed: {}", e);
            metrics::counter!("plantdoc_errors_total", "kind" => "explain").increment(1);
            Ok(Json(json!({
                "status": "error",
                "message": format!("Heatmap generation failed: {}", e),
            })))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Result<Json<Value>, AppError> {
    metrics::counter!("plantdoc_requests_total", "endpoint" => "chat").increment(1);

    let reply = state.chat.reply(&req.message).await?;
    Ok(Json(json!({
        "status": reply.status(),
        "response": reply.text(),
    })))
}

/// Error type for handlers
#[derive(Debug)]
pub enum AppError {
    InvalidRequest(String),
    InternalError(String),
}

impl From<plantdoc_core::Error> for AppError {
    fn from(err: plantdoc_core::Error) -> Self {
        if err.is_client_error() {
            AppError::InvalidRequest(err.to_string())
        } else {
            AppError::InternalError(err.to_string())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request_error", msg),
            AppError::InternalError(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        metrics::counter!("plantdoc_errors_total", "kind" => kind).increment(1);

        let body = json!({
            "error": {
                "message": message,
                "type": kind,
            }
        });

        (status, Json(body)).into_response()
    }
}
