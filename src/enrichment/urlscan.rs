//! urlscan.io adapter (historical scan aggregation for domains)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::enrichment::{body_excerpt, transport_failure, upstream_failure, ProviderAdapter};
use crate::models::{Indicator, IndicatorKind, PartialRisk, ProviderFailure};

const URLSCAN_API_URL: &str = "https://urlscan.io/api/v1";

/// urlscan adapter. Aggregates the domain's historical scan results into a
/// 0-100 malicious ratio; the most recent scan supplies country and network
/// metadata. The search endpoint works unauthenticated, so a missing API key
/// is not a failure here.
pub struct UrlscanAdapter {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl UrlscanAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            base_url: URLSCAN_API_URL.to_string(),
        }
    }

    /// Point lookups at a different endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn search(&self, domain: &str) -> Result<Value, ProviderFailure> {
        let mut request = self
            .client
            .get(format!("{}/search/", self.base_url))
            .header("Accept", "application/json")
            .query(&[("q", format!("domain:{domain}"))]);
        if let Some(key) = &self.api_key {
            request = request.header("API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_failure("urlscan", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_failure("urlscan", status, &body));
        }

        let text = response
            .text()
            .await
            .map_err(|e| transport_failure("urlscan", &e))?;

        Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "body": body_excerpt(&text) })))
    }
}

fn network_of(entry: &Value) -> Option<String> {
    match (
        entry.pointer("/page/asn").and_then(Value::as_str),
        entry.pointer("/page/asnname").and_then(Value::as_str),
    ) {
        (Some(asn), Some(name)) => Some(format!("{asn} {name}")),
        (Some(asn), None) => Some(asn.to_string()),
        (None, Some(name)) => Some(name.to_string()),
        (None, None) => entry
            .pointer("/page/server")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn is_malicious(result: &Value) -> bool {
    result
        .pointer("/verdicts/malicious")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Reduce the scan history to one partial risk: malicious ratio scaled to
/// 0-100, latest scan's page metadata as representative.
fn aggregate_history(results: &[Value], payload: &Value) -> PartialRisk {
    let total = results.len();
    let malicious = results.iter().filter(|r| is_malicious(r)).count();
    let score = ((malicious as f64 / total as f64) * 100.0).round() as i64;

    // task.time is ISO 8601, so lexicographic max is the most recent scan
    let latest = results
        .iter()
        .max_by_key(|r| r.pointer("/task/time").and_then(Value::as_str).unwrap_or(""));

    let country = latest
        .and_then(|entry| entry.pointer("/page/country"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let network = latest.and_then(network_of);

    PartialRisk {
        risk_score: score,
        detection_count: malicious as i64,
        detection_label: Some(format!("{malicious}/{total} scans flagged malicious")),
        country,
        resolved_network: network,
        payload: payload.clone(),
    }
}

#[async_trait]
impl ProviderAdapter for UrlscanAdapter {
    fn source_tag(&self) -> &'static str {
        "urlscan"
    }

    fn supports(&self, kind: IndicatorKind) -> bool {
        matches!(kind, IndicatorKind::Domain)
    }

    async fn analyze(&self, indicator: &Indicator) -> Result<PartialRisk, ProviderFailure> {
        if indicator.kind != IndicatorKind::Domain {
            return Err(ProviderFailure::new(
                400,
                "only domains are routed to urlscan",
            ));
        }

        let payload = self.search(&indicator.value).await?;
        match payload.get("results").and_then(Value::as_array) {
            Some(results) if !results.is_empty() => Ok(aggregate_history(results, &payload)),
            Some(_) => Err(ProviderFailure::not_found("urlscan", &indicator.value)),
            // Unexpected shape: keep the opaque body, default the numbers
            None => Ok(PartialRisk {
                payload,
                ..PartialRisk::default()
            }),
        }
    }
}
