//! Core data models for risk assessment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

pub mod classify;

pub use classify::{classify, Indicator, IndicatorKind};

/// Canonical, persisted analysis outcome for one (subject, provider) pair.
/// Immutable once created; re-analysis of a known subject returns the stored
/// row unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RiskRecord {
    pub id: Uuid,
    pub subject: String,
    pub source_tag: String,
    pub risk_score: i32,
    pub detection_count: i32,
    pub detection_label: String,
    pub country: Option<String>,
    pub resolved_network: Option<String>,
    pub raw_summary: serde_json::Value,
    pub analyzed_at: DateTime<Utc>,
}

/// Insert shape for a risk record; the store assigns identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRiskRecord {
    pub subject: String,
    pub source_tag: String,
    pub risk_score: i32,
    pub detection_count: i32,
    pub detection_label: String,
    pub country: Option<String>,
    pub resolved_network: Option<String>,
    pub raw_summary: serde_json::Value,
    pub analyzed_at: DateTime<Utc>,
}

/// A provider's extraction of risk signals, prior to normalization.
/// `payload` carries the untrimmed provider response; the normalizer reduces
/// it to a bounded summary before anything is stored.
#[derive(Debug, Clone, Default)]
pub struct PartialRisk {
    pub risk_score: i64,
    pub detection_count: i64,
    pub detection_label: Option<String>,
    pub country: Option<String>,
    pub resolved_network: Option<String>,
    pub payload: serde_json::Value,
}

/// A provider-level failure. Recorded as data, not raised: the pipeline
/// turns it into a zeroed risk record carrying the status and message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (status {status})")]
pub struct ProviderFailure {
    pub status: u16,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Configuration failure, distinct from "not found".
    pub fn missing_key(provider: &str) -> Self {
        Self::new(500, format!("{provider} API key is not configured"))
    }

    pub fn not_found(provider: &str, subject: &str) -> Self {
        Self::new(404, format!("{provider} has no report for {subject}"))
    }
}

/// Errors surfaced to callers of the analysis engine. Provider-level
/// failures never appear here; classification is the only check that can
/// refuse an enrichment attempt outright.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("unsupported indicator format: {0} (only ip / hash / domain are supported)")]
    UnsupportedIndicator(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Point-lookup request body
#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[validate(length(min = 1, max = 2048))]
    pub item: String,
}

/// Aggregate-lookup request body
#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeDomainRequest {
    #[validate(length(min = 1, max = 2048))]
    pub domain: String,
}
