//! Hybrid Analysis adapter (term search with submit-for-scanning fallback)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::enrichment::{transport_failure, upstream_failure, ProviderAdapter};
use crate::models::{Indicator, IndicatorKind, PartialRisk, ProviderFailure};

const HYBRID_API_URL: &str = "https://www.hybrid-analysis.com/api/v2";

/// Hybrid Analysis adapter. Searches existing sandbox verdicts by term; a
/// subject without any prior analysis is submitted for scanning and reported
/// as pending instead of a verdict.
pub struct HybridAnalysisAdapter {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl HybridAnalysisAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            base_url: HYBRID_API_URL.to_string(),
        }
    }

    /// Point lookups at a different endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Value, ProviderFailure> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderFailure::missing_key("Hybrid Analysis"))?;

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("api-key", api_key)
            .header("User-Agent", "Falcon Sandbox")
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| transport_failure("Hybrid Analysis", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_failure("Hybrid Analysis", status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| transport_failure("Hybrid Analysis", &e))
    }

    async fn search_terms(&self, field: &str, value: &str) -> Result<Value, ProviderFailure> {
        self.post_form("/search/terms", &[(field, value)]).await
    }

    async fn submit_for_scan(&self, value: &str) -> Result<Value, ProviderFailure> {
        self.post_form("/quick-scan/url", &[("scan_type", "all"), ("url", value)])
            .await
    }
}

/// The search response is a list of prior analyses, either bare or under a
/// `result` key depending on the endpoint generation.
fn result_entries(payload: &Value) -> &[Value] {
    match payload {
        Value::Array(items) => items,
        _ => payload
            .get("result")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
    }
}

fn parse_match(first: &Value, payload: Value) -> PartialRisk {
    PartialRisk {
        risk_score: first.get("threat_score").and_then(Value::as_i64).unwrap_or(0),
        detection_count: first.get("av_detect").and_then(Value::as_i64).unwrap_or(0),
        detection_label: Some(
            first
                .get("verdict")
                .and_then(Value::as_str)
                .unwrap_or("Hybrid-Analysis")
                .to_string(),
        ),
        country: None,
        resolved_network: None,
        payload,
    }
}

#[async_trait]
impl ProviderAdapter for HybridAnalysisAdapter {
    fn source_tag(&self) -> &'static str {
        "hybrid"
    }

    fn supports(&self, kind: IndicatorKind) -> bool {
        matches!(kind, IndicatorKind::Hash | IndicatorKind::Domain)
    }

    async fn analyze(&self, indicator: &Indicator) -> Result<PartialRisk, ProviderFailure> {
        let field = match indicator.kind {
            IndicatorKind::Hash => "hash",
            IndicatorKind::Domain => "domain",
            IndicatorKind::Ip => {
                return Err(ProviderFailure::new(
                    400,
                    "ip lookups are not routed to Hybrid Analysis",
                ))
            }
        };

        let payload = self.search_terms(field, &indicator.value).await?;
        if let Some(first) = result_entries(&payload).first().cloned() {
            return Ok(parse_match(&first, payload));
        }

        tracing::debug!(subject = %indicator.value, "No prior analysis, submitting for scanning");
        let submission = self.submit_for_scan(&indicator.value).await?;
        Ok(PartialRisk {
            risk_score: 0,
            detection_count: 0,
            detection_label: Some("submitted".to_string()),
            country: None,
            resolved_network: None,
            payload: json!({
                "status": "submitted",
                "note": "submitted for scanning; results not yet available",
                "submission": submission,
            }),
        })
    }
}
