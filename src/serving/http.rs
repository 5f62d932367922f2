//! HTTP surface of the inference service

use crate::error::{RepositoryError, ServiceError};
use crate::metrics::MetricsSnapshot;
use crate::serving::service::{InferenceService, ServiceStatus};
use crate::types::Transaction;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InferenceService>,
    pub reload_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: String,
    pub fraud_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub status: String,
    pub model_f1_score: f64,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

pub const RELOAD_OK: &str = "model reloaded successfully";

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Reload(RepositoryError::NotFound(_))
            | ServiceError::Reload(RepositoryError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Reload(_) | ServiceError::IncompatibleBundle { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        }

        let body = Json(json!({
            "detail": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Build the router with all routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/predict", post(predict))
        .route("/reload", post(reload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Fraud Detection API" }))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<ServiceStatus>) {
    let status = state.service.status();
    let code = if status.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.service.metrics().snapshot())
}

async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<Transaction>, JsonRejection>,
) -> Result<Json<PredictResponse>, ServiceError> {
    let Json(transaction) = payload.map_err(|rejection| {
        state.service.metrics().record_rejected();
        ServiceError::InvalidRequest(rejection.body_text())
    })?;
    let result = state.service.predict(&transaction.features)?;
    Ok(Json(PredictResponse {
        prediction: result.label.as_str().to_string(),
        fraud_probability: result.probability,
    }))
}

async fn reload(State(state): State<AppState>) -> Result<Json<ReloadResponse>, ServiceError> {
    let summary = state.service.reload_with_timeout(state.reload_timeout).await?;
    Ok(Json(ReloadResponse {
        status: RELOAD_OK.to_string(),
        model_f1_score: summary.quality_score,
        model_version: Some(summary.version),
        threshold: Some(summary.threshold),
    }))
}
