//! Reduce provider outcomes into canonical risk records

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::models::{NewRiskRecord, PartialRisk, ProviderFailure};

/// Hard ceiling on the serialized stored summary
pub const RAW_SUMMARY_MAX_BYTES: usize = 4096;

const MAX_LIST_ITEMS: usize = 5;
const MAX_STRING_CHARS: usize = 512;
const MAX_DEPTH: usize = 6;

/// Fields worth keeping for later display; everything else is dropped from
/// the stored summary.
const KEEP_KEYS: &[&str] = &[
    // generic
    "status", "note", "error", "message", "body", "total", "country", "tags",
    // VirusTotal
    "data", "attributes", "last_analysis_stats", "malicious", "suspicious",
    "harmless", "undetected", "reputation", "as_owner", "resolved_ip",
    // Hybrid Analysis
    "submission", "id", "verdict", "threat_score", "av_detect", "type",
    "environment_description", "result",
    // urlscan
    "results", "task", "time", "verdicts", "page", "asn", "asnname",
    "server", "ip", "url",
];

/// Map a provider outcome onto the canonical record fields. A failure is
/// still a record: zeroed numerics with the status and message preserved in
/// the summary.
pub fn normalize(
    subject: &str,
    source_tag: &str,
    outcome: Result<PartialRisk, ProviderFailure>,
    analyzed_at: DateTime<Utc>,
) -> NewRiskRecord {
    match outcome {
        Ok(partial) => NewRiskRecord {
            subject: subject.to_string(),
            source_tag: source_tag.to_string(),
            risk_score: clamp_count(partial.risk_score),
            detection_count: clamp_count(partial.detection_count),
            detection_label: partial
                .detection_label
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| source_tag.to_string()),
            country: partial.country.filter(|c| !c.is_empty()),
            resolved_network: partial.resolved_network.filter(|n| !n.is_empty()),
            raw_summary: bounded_summary(&partial.payload),
            analyzed_at,
        },
        Err(failure) => NewRiskRecord {
            subject: subject.to_string(),
            source_tag: source_tag.to_string(),
            risk_score: 0,
            detection_count: 0,
            detection_label: "error".to_string(),
            country: None,
            resolved_network: None,
            raw_summary: json!({
                "error": { "status": failure.status, "message": failure.message }
            }),
            analyzed_at,
        },
    }
}

fn clamp_count(n: i64) -> i32 {
    n.clamp(0, i32::MAX as i64) as i32
}

/// Field-select and cap the provider payload, then enforce the byte ceiling.
pub fn bounded_summary(payload: &Value) -> Value {
    let trimmed = trim_payload(payload, 0);
    let size = serde_json::to_string(&trimmed)
        .map(|s| s.len())
        .unwrap_or(usize::MAX);
    if size > RAW_SUMMARY_MAX_BYTES {
        json!({ "truncated": true })
    } else {
        trimmed
    }
}

fn trim_payload(value: &Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH {
        return Value::Null;
    }
    match value {
        Value::Object(map) => {
            let kept: Map<String, Value> = map
                .iter()
                .filter(|(key, _)| KEEP_KEYS.contains(&key.as_str()))
                .map(|(key, val)| (key.clone(), trim_payload(val, depth + 1)))
                .collect();
            Value::Object(kept)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(MAX_LIST_ITEMS)
                .map(|item| trim_payload(item, depth + 1))
                .collect(),
        ),
        Value::String(s) if s.chars().count() > MAX_STRING_CHARS => {
            Value::String(s.chars().take(MAX_STRING_CHARS).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(score: i64, count: i64) -> PartialRisk {
        PartialRisk {
            risk_score: score,
            detection_count: count,
            detection_label: Some("label".to_string()),
            country: Some("US".to_string()),
            resolved_network: None,
            payload: json!({ "status": "ok" }),
        }
    }

    #[test]
    fn failure_becomes_a_zeroed_record_with_status() {
        let failure = ProviderFailure::not_found("urlscan", "example.com");
        let record = normalize("example.com", "urlscan", Err(failure), Utc::now());

        assert_eq!(record.risk_score, 0);
        assert_eq!(record.detection_count, 0);
        assert_eq!(record.detection_label, "error");
        assert_eq!(record.raw_summary["error"]["status"], json!(404));
        assert!(record.raw_summary["error"]["message"]
            .as_str()
            .unwrap()
            .contains("no report"));
    }

    #[test]
    fn negative_fields_are_clamped_to_zero() {
        let record = normalize("x", "virustotal", Ok(partial(-5, -1)), Utc::now());

        assert_eq!(record.risk_score, 0);
        assert_eq!(record.detection_count, 0);
    }

    #[test]
    fn oversized_scores_saturate() {
        let record = normalize("x", "virustotal", Ok(partial(i64::MAX, 3)), Utc::now());

        assert_eq!(record.risk_score, i32::MAX);
        assert_eq!(record.detection_count, 3);
    }

    #[test]
    fn label_defaults_to_the_source_tag() {
        let mut p = partial(1, 1);
        p.detection_label = None;
        let record = normalize("x", "hybrid", Ok(p), Utc::now());

        assert_eq!(record.detection_label, "hybrid");
    }

    #[test]
    fn empty_country_collapses_to_none() {
        let mut p = partial(1, 1);
        p.country = Some(String::new());
        let record = normalize("x", "virustotal", Ok(p), Utc::now());

        assert!(record.country.is_none());
    }

    #[test]
    fn megabyte_payload_stays_under_the_cap() {
        let mut p = partial(1, 1);
        p.payload = json!({
            "body": "x".repeat(1_000_000),
            "results": (0..500)
                .map(|i| json!({ "task": { "time": format!("2024-01-01T00:00:{i:02}Z") },
                                 "noise": "y".repeat(2_000) }))
                .collect::<Vec<_>>(),
            "irrelevant": "z".repeat(500_000),
        });
        let record = normalize("x", "urlscan", Ok(p), Utc::now());

        let stored = serde_json::to_string(&record.raw_summary).unwrap();
        assert!(stored.len() <= RAW_SUMMARY_MAX_BYTES);
    }

    #[test]
    fn lists_are_capped_and_unknown_keys_dropped() {
        let payload = json!({
            "tags": (0..50).map(|i| json!(format!("t{i}"))).collect::<Vec<_>>(),
            "secret_internal_field": "dropped",
            "status": "ok"
        });
        let summary = bounded_summary(&payload);

        assert_eq!(summary["tags"].as_array().unwrap().len(), MAX_LIST_ITEMS);
        assert!(summary.get("secret_internal_field").is_none());
        assert_eq!(summary["status"], json!("ok"));
    }

    #[test]
    fn long_strings_are_truncated() {
        let payload = json!({ "note": "n".repeat(10_000) });
        let summary = bounded_summary(&payload);

        assert_eq!(summary["note"].as_str().unwrap().chars().count(), MAX_STRING_CHARS);
    }
}
