//! REST API over the analysis engine

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::enrichment::AnalysisEngine;
use crate::models::{AnalysisError, AnalyzeDomainRequest, AnalyzeRequest, RiskRecord};

/// Application state shared across handlers
pub struct AppState {
    pub engine: AnalysisEngine,
    /// When set, analyze endpoints require a matching X-API-Key header
    pub api_key: Option<String>,
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/analyze", post(analyze))
        .route("/api/v1/analyze/domain", post(analyze_domain))
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);

// ==================== Handlers ====================

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "ctiforge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<RiskRecord>, ApiError> {
    authorize(&state, &headers)?;
    req.validate().map_err(bad_request)?;

    state
        .engine
        .analyze(&req.item)
        .await
        .map(Json)
        .map_err(map_analysis_error)
}

async fn analyze_domain(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeDomainRequest>,
) -> Result<Json<Vec<RiskRecord>>, ApiError> {
    authorize(&state, &headers)?;
    req.validate().map_err(bad_request)?;

    state
        .engine
        .analyze_domain(&req.domain)
        .await
        .map(Json)
        .map_err(map_analysis_error)
}

// ==================== Helpers ====================

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.api_key else {
        return Ok(());
    };

    let presented = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Could not validate API key" })),
        ))
    }
}

fn bad_request(err: impl ToString) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": err.to_string() })),
    )
}

fn map_analysis_error(err: AnalysisError) -> ApiError {
    match err {
        AnalysisError::UnsupportedIndicator(_) => bad_request(err),
        AnalysisError::Store(e) => {
            tracing::error!(error = %e, "Storage failure during analysis");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal storage failure" })),
            )
        }
    }
}
