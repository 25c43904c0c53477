//! Inference host for Podium.
//!
//! Serves one loaded detector over HTTP: `POST /predict` takes raw image
//! bytes and answers with the detected boxes, `GET /healthz` reports
//! liveness.

mod detector;
mod worker;

pub use detector::{BoxPrediction, Detector, Prediction};
pub use worker::WorkerDetector;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::ServeSettings;

/// Largest accepted request body.
pub const MAX_IMAGE_BYTES: usize = 32 * 1024 * 1024;

/// Inference host errors.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The model could not be loaded; fatal at startup.
    #[error("model startup failed: {0}")]
    Startup(String),

    /// The request body is not a decodable image.
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// The detector failed while handling a request.
    #[error("detector failed: {0}")]
    Worker(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Worker protocol encoding errors
    #[error("worker protocol error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Decode(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "prediction failed");
        } else {
            debug!(error = %self, "rejected prediction request");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
struct AppState {
    detector: Arc<dyn Detector>,
}

/// Build the inference router around a loaded detector.
///
/// Requests slower than `timeout` get HTTP 408. Detection itself runs in a
/// spawned task, so a timed-out request never interrupts an exchange with the
/// model; its result is dropped.
pub fn router(detector: Arc<dyn Detector>, timeout: Duration) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/healthz", get(healthz))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(timeout))
                .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)),
        )
        .with_state(AppState { detector })
}

async fn predict(State(state): State<AppState>, body: Bytes) -> Result<Json<Prediction>, ServeError> {
    let image = image::load_from_memory(&body)?;
    let detector = Arc::clone(&state.detector);
    let prediction = tokio::spawn(async move { detector.detect(image).await })
        .await
        .map_err(|e| ServeError::Worker(format!("detection task failed: {e}")))??;
    debug!(boxes = prediction.boxes.len(), inference_time = prediction.inference_time, "prediction served");
    Ok(Json(prediction))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Load the model worker for `model_path` and serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the model fails to load or the address cannot be bound.
pub async fn run(settings: &ServeSettings, model_path: &Path) -> Result<(), ServeError> {
    let detector = WorkerDetector::spawn(
        &settings.worker_command,
        model_path,
        Duration::from_secs(settings.startup_timeout_secs),
    )
    .await?;
    let app = router(Arc::new(detector), settings.timeout());

    let listener = TcpListener::bind(settings.address).await?;
    info!(
        address = %settings.address,
        model = %model_path.display(),
        timeout_secs = settings.timeout_secs,
        "Inference host listening"
    );
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("Inference host stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
}
