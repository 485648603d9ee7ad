//! VirusTotal reputation adapter (IP and domain lookups)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::enrichment::dns::HostResolver;
use crate::enrichment::{body_excerpt, transport_failure, upstream_failure, ProviderAdapter};
use crate::models::{Indicator, IndicatorKind, PartialRisk, ProviderFailure};

const VT_API_URL: &str = "https://www.virustotal.com/api/v3";
const VENDOR_LIMIT: usize = 5;

#[derive(Debug, Deserialize, Default)]
struct VtAttributes {
    #[serde(default)]
    last_analysis_stats: VtStats,
    #[serde(default)]
    last_analysis_results: HashMap<String, VtVendorResult>,
    country: Option<String>,
    as_owner: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct VtStats {
    #[serde(default)]
    malicious: i64,
}

#[derive(Debug, Deserialize)]
struct VtVendorResult {
    category: Option<String>,
}

/// VirusTotal adapter. Handles direct IP lookups and domain lookups with the
/// resolve-and-retry fallback for domains VirusTotal does not know by name.
pub struct VirusTotalAdapter {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    resolver: Arc<dyn HostResolver>,
}

impl VirusTotalAdapter {
    pub fn new(api_key: Option<String>, resolver: Arc<dyn HostResolver>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            base_url: VT_API_URL.to_string(),
            resolver,
        }
    }

    /// Point lookups at a different endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn lookup(&self, collection: &str, value: &str) -> Result<Value, ProviderFailure> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderFailure::missing_key("VirusTotal"))?;

        let response = self
            .client
            .get(format!("{}/{}/{}", self.base_url, collection, value))
            .header("x-apikey", api_key)
            .send()
            .await
            .map_err(|e| transport_failure("VirusTotal", &e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderFailure::not_found("VirusTotal", value));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_failure("VirusTotal", status, &body));
        }

        let text = response
            .text()
            .await
            .map_err(|e| transport_failure("VirusTotal", &e))?;

        // A body that is not JSON is kept as an opaque excerpt rather than
        // failing the lookup.
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "body": body_excerpt(&text) })))
    }

    async fn analyze_domain(&self, domain: &str) -> Result<PartialRisk, ProviderFailure> {
        let not_found = match self.lookup("domains", domain).await {
            Ok(payload) => return Ok(parse_report(payload)),
            Err(failure) if failure.status == 404 => failure,
            Err(failure) => return Err(failure),
        };

        let addresses = self.resolver.resolve_v4(domain).await;
        let Some(address) = addresses.first() else {
            return Err(not_found);
        };

        tracing::debug!(domain, address = %address, "No domain report, retrying via resolved address");
        match self.lookup("ip_addresses", address).await {
            Ok(mut payload) => {
                if let Some(obj) = payload.as_object_mut() {
                    obj.insert("resolved_ip".to_string(), json!(address));
                }
                Ok(parse_report(payload))
            }
            // Second attempt only takes precedence on success
            Err(_) => Err(not_found),
        }
    }
}

/// Reduce a VirusTotal report to the common partial-risk shape. Absent or
/// unexpected attributes coerce to zero/empty.
fn parse_report(payload: Value) -> PartialRisk {
    let attrs: VtAttributes = payload
        .pointer("/data/attributes")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let mut vendors: Vec<&str> = attrs
        .last_analysis_results
        .iter()
        .filter(|(_, r)| r.category.as_deref() == Some("malicious"))
        .map(|(name, _)| name.as_str())
        .collect();
    vendors.sort_unstable();
    vendors.truncate(VENDOR_LIMIT);

    let label = if vendors.is_empty() {
        "VirusTotal".to_string()
    } else {
        vendors.join(",")
    };

    PartialRisk {
        risk_score: attrs.last_analysis_stats.malicious,
        detection_count: attrs.last_analysis_stats.malicious,
        detection_label: Some(label),
        country: attrs.country,
        resolved_network: attrs.as_owner,
        payload,
    }
}

#[async_trait]
impl ProviderAdapter for VirusTotalAdapter {
    fn source_tag(&self) -> &'static str {
        "virustotal"
    }

    fn supports(&self, kind: IndicatorKind) -> bool {
        matches!(kind, IndicatorKind::Ip | IndicatorKind::Domain)
    }

    async fn analyze(&self, indicator: &Indicator) -> Result<PartialRisk, ProviderFailure> {
        match indicator.kind {
            IndicatorKind::Ip => {
                let payload = self.lookup("ip_addresses", &indicator.value).await?;
                Ok(parse_report(payload))
            }
            IndicatorKind::Domain => self.analyze_domain(&indicator.value).await,
            IndicatorKind::Hash => Err(ProviderFailure::new(
                400,
                "hash lookups are not routed to VirusTotal",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::dns::MockHostResolver;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn indicator(value: &str, kind: IndicatorKind) -> Indicator {
        Indicator {
            value: value.to_string(),
            kind,
        }
    }

    fn no_dns() -> Arc<MockHostResolver> {
        let mut resolver = MockHostResolver::new();
        resolver.expect_resolve_v4().return_const(Vec::<String>::new());
        Arc::new(resolver)
    }

    fn ip_report(malicious: i64) -> serde_json::Value {
        json!({
            "data": {
                "attributes": {
                    "last_analysis_stats": { "malicious": malicious, "harmless": 60 },
                    "last_analysis_results": {
                        "VendorA": { "category": "malicious" },
                        "VendorB": { "category": "harmless" }
                    },
                    "country": "US",
                    "as_owner": "GOOGLE"
                }
            }
        })
    }

    #[tokio::test]
    async fn parses_ip_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip_addresses/8.8.8.8"))
            .and(header("x-apikey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ip_report(7)))
            .mount(&server)
            .await;

        let adapter = VirusTotalAdapter::new(Some("test-key".into()), no_dns())
            .with_base_url(server.uri());
        let partial = adapter
            .analyze(&indicator("8.8.8.8", IndicatorKind::Ip))
            .await
            .unwrap();

        assert_eq!(partial.risk_score, 7);
        assert_eq!(partial.detection_count, 7);
        assert_eq!(partial.detection_label.as_deref(), Some("VendorA"));
        assert_eq!(partial.country.as_deref(), Some("US"));
        assert_eq!(partial.resolved_network.as_deref(), Some("GOOGLE"));
    }

    #[tokio::test]
    async fn missing_key_is_a_distinct_config_failure() {
        let adapter = VirusTotalAdapter::new(None, no_dns());
        let failure = adapter
            .analyze(&indicator("8.8.8.8", IndicatorKind::Ip))
            .await
            .unwrap_err();

        assert_eq!(failure.status, 500);
        assert!(failure.message.contains("not configured"));
    }

    #[tokio::test]
    async fn domain_not_found_retries_via_resolved_address() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/domains/evil.example"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ip_addresses/203.0.113.9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ip_report(3)))
            .expect(1)
            .mount(&server)
            .await;

        let mut resolver = MockHostResolver::new();
        resolver
            .expect_resolve_v4()
            .return_const(vec!["203.0.113.9".to_string()]);

        let adapter = VirusTotalAdapter::new(Some("test-key".into()), Arc::new(resolver))
            .with_base_url(server.uri());
        let partial = adapter
            .analyze(&indicator("evil.example", IndicatorKind::Domain))
            .await
            .unwrap();

        assert_eq!(partial.risk_score, 3);
        assert_eq!(partial.payload["resolved_ip"], json!("203.0.113.9"));
    }

    #[tokio::test]
    async fn domain_not_found_without_addresses_keeps_original_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/domains/ghost.example"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = VirusTotalAdapter::new(Some("test-key".into()), no_dns())
            .with_base_url(server.uri());
        let failure = adapter
            .analyze(&indicator("ghost.example", IndicatorKind::Domain))
            .await
            .unwrap_err();

        assert_eq!(failure.status, 404);
    }

    #[tokio::test]
    async fn failed_retry_reports_the_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/domains/flaky.example"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ip_addresses/203.0.113.10"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut resolver = MockHostResolver::new();
        resolver
            .expect_resolve_v4()
            .return_const(vec!["203.0.113.10".to_string()]);

        let adapter = VirusTotalAdapter::new(Some("test-key".into()), Arc::new(resolver))
            .with_base_url(server.uri());
        let failure = adapter
            .analyze(&indicator("flaky.example", IndicatorKind::Domain))
            .await
            .unwrap_err();

        assert_eq!(failure.status, 404);
    }

    #[tokio::test]
    async fn upstream_errors_map_to_bad_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip_addresses/8.8.8.8"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let adapter = VirusTotalAdapter::new(Some("test-key".into()), no_dns())
            .with_base_url(server.uri());
        let failure = adapter
            .analyze(&indicator("8.8.8.8", IndicatorKind::Ip))
            .await
            .unwrap_err();

        assert_eq!(failure.status, 502);
        assert!(failure.message.contains("429"));
    }

    #[tokio::test]
    async fn non_json_body_becomes_opaque_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip_addresses/8.8.8.8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let adapter = VirusTotalAdapter::new(Some("test-key".into()), no_dns())
            .with_base_url(server.uri());
        let partial = adapter
            .analyze(&indicator("8.8.8.8", IndicatorKind::Ip))
            .await
            .unwrap();

        assert_eq!(partial.risk_score, 0);
        assert_eq!(partial.detection_count, 0);
        assert!(partial.payload["body"].as_str().unwrap().contains("maintenance"));
    }

    #[test]
    fn vendor_list_is_capped() {
        let results: serde_json::Map<String, Value> = (0..9)
            .map(|i| (format!("Vendor{i}"), json!({ "category": "malicious" })))
            .collect();
        let payload = json!({ "data": { "attributes": { "last_analysis_results": results } } });

        let partial = parse_report(payload);
        let label = partial.detection_label.unwrap();
        assert_eq!(label.split(',').count(), VENDOR_LIMIT);
    }
}
