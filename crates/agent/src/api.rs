//! HTTP API for predictions, history, model metrics, health and Prometheus

use advisor_lib::{
    health::{ComponentStatus, HealthRegistry},
    history::{self, HistoryFilter, HistoryStore},
    observability::{AdvisorMetrics, StructuredLogger},
    predictor::InferenceStats,
    training::ModelMetrics,
    FieldViolation, FilterError, HistoryError, PredictError, Prediction, PredictionRecord,
    PredictionService, RawReading, SensorReading,
};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Shared application state
pub struct AppState {
    pub service: PredictionService,
    pub history: HistoryStore,
    pub model_metrics: Option<ModelMetrics>,
    pub health_registry: HealthRegistry,
    pub metrics: AdvisorMetrics,
    pub logger: StructuredLogger,
}

impl AppState {
    pub fn new(
        service: PredictionService,
        history: HistoryStore,
        model_metrics: Option<ModelMetrics>,
        health_registry: HealthRegistry,
        metrics: AdvisorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            service,
            history,
            model_metrics,
            health_registry,
            metrics,
            logger,
        }
    }
}

/// JSON error body; `kind` names the condition
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<FieldViolation>>,
}

/// Failures surfaced by API handlers
#[derive(Debug)]
pub enum ApiError {
    Predict(PredictError),
    History(HistoryError),
    Filter(FilterError),
    Rejected(JsonRejection),
    NotFound(&'static str, String),
    Internal(String),
}

impl From<PredictError> for ApiError {
    fn from(e: PredictError) -> Self {
        ApiError::Predict(e)
    }
}

impl From<HistoryError> for ApiError {
    fn from(e: HistoryError) -> Self {
        ApiError::History(e)
    }
}

impl From<FilterError> for ApiError {
    fn from(e: FilterError) -> Self {
        ApiError::Filter(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::Rejected(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Predict(PredictError::Validation(e)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    kind: "ValidationError",
                    message: e.to_string(),
                    violations: Some(e.violations),
                },
            ),
            ApiError::Predict(PredictError::Unavailable(e)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    kind: e.kind(),
                    message: e.to_string(),
                    violations: None,
                },
            ),
            ApiError::History(e) => {
                let status = match e {
                    HistoryError::Schema { .. } => StatusCode::CONFLICT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    ErrorBody {
                        kind: e.kind(),
                        message: e.to_string(),
                        violations: None,
                    },
                )
            }
            ApiError::Filter(e) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    kind: "InvalidFilter",
                    message: e.to_string(),
                    violations: None,
                },
            ),
            ApiError::Rejected(e) => (
                e.status(),
                ErrorBody {
                    kind: "InvalidRequest",
                    message: e.body_text(),
                    violations: None,
                },
            ),
            ApiError::NotFound(kind, message) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    kind,
                    message,
                    violations: None,
                },
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    kind: "Internal",
                    message,
                    violations: None,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let buffer = AdvisorMetrics::render().map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    ))
}

/// Successful prediction, with the record written to history
#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub display_action: String,
    pub low_confidence: bool,
    pub record: PredictionRecord,
}

/// Run a history operation on the blocking pool; file locks and reads
/// must not stall the async workers
async fn with_history<T, F>(
    state: &Arc<AppState>,
    op: F,
) -> Result<Result<T, HistoryError>, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&HistoryStore) -> Result<T, HistoryError> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || op(&state.history))
        .await
        .map_err(|e| ApiError::Internal(format!("history task failed: {}", e)))
}

/// Predict, then append; a rejected reading is never recorded
async fn create_prediction(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RawReading>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Json(raw) = payload?;
    let start = Instant::now();
    let outcome = SensorReading::try_from(raw)
        .map_err(PredictError::Validation)
        .and_then(|reading| {
            let prediction = state.service.predict(&reading)?;
            Ok((reading, prediction))
        });
    let (reading, prediction) = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            match &e {
                PredictError::Validation(v) => {
                    state.metrics.inc_validation_failures();
                    state.logger.log_rejection(&v.fields());
                }
                PredictError::Unavailable(_) => state.metrics.inc_prediction_errors(),
            }
            return Err(e.into());
        }
    };
    state
        .metrics
        .observe_prediction_latency(start.elapsed().as_secs_f64());
    state.metrics.inc_predictions();

    let low_confidence = state.service.is_low_confidence(&prediction);
    let confidence = prediction.probability_of(&prediction.action).unwrap_or(0.0);
    state.logger.log_prediction(&reading, &prediction, confidence);

    let record = PredictionRecord::now(reading, prediction.action.clone());
    let entry = record.clone();
    let appended = with_history(&state, move |history| history.append(&entry)).await?;
    state.health_registry.record_history(&appended).await;
    appended?;

    state.metrics.inc_history_appends();
    state
        .logger
        .log_history_append(&record.predicted_action, None);

    Ok(Json(PredictionResponse {
        display_action: prediction.display_action(),
        low_confidence,
        prediction,
        record,
    }))
}

/// History filter as given on the query string
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub crop_type: Option<String>,
    pub date: Option<String>,
}

impl HistoryParams {
    fn filter(&self) -> Result<HistoryFilter, FilterError> {
        HistoryFilter::parse(self.crop_type.as_deref(), self.date.as_deref())
    }
}

async fn query_history(
    state: &Arc<AppState>,
    params: &HistoryParams,
) -> Result<Vec<PredictionRecord>, ApiError> {
    let filter = params.filter()?;
    let all = with_history(state, HistoryStore::read_all).await?;
    state.health_registry.record_history(&all).await;
    let all = all?;
    state.metrics.set_history_records(all.len());
    Ok(all.into_iter().filter(|r| filter.matches(r)).collect())
}

async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let records = query_history(&state, &params).await?;
    Ok(Json(records))
}

async fn history_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let records = query_history(&state, &params).await?;
    Ok(Json(history::aggregate(&records)))
}

async fn export_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let records = query_history(&state, &params).await?;
    let body = history::export(&records)?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"prediction_history.csv\"",
            ),
        ],
        body,
    ))
}

/// Loaded model summary
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: InferenceStats,
}

async fn model_info(State(state): State<Arc<AppState>>) -> Json<ModelInfo> {
    let service = &state.service;
    Json(ModelInfo {
        available: service.is_available(),
        version: service.model_version().map(str::to_string),
        classes: service.classes().map(<[String]>::to_vec),
        error: service.availability().err().map(|e| e.to_string()),
        stats: service.stats(),
    })
}

async fn model_metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    match &state.model_metrics {
        Some(metrics) => Ok(Json(metrics.clone())),
        None => Err(ApiError::NotFound(
            "MetricsNotFound",
            "no training metrics have been recorded".to_string(),
        )),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/predictions", post(create_prediction))
        .route("/api/v1/history", get(list_history))
        .route("/api/v1/history/summary", get(history_summary))
        .route("/api/v1/history/export", get(export_history))
        .route("/api/v1/model", get(model_info))
        .route("/api/v1/model/metrics", get(model_metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "API server stopped");
        return Err(e.into());
    }

    Ok(())
}
