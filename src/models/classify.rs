//! Indicator classification: decide whether a raw search term is an IP
//! address, a file hash, or a domain.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::AnalysisError;

static IPV4_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((25[0-5]|2[0-4]\d|[01]?\d?\d)(\.|$)){4}$").expect("valid IPv4 regex")
});

// Label grammar without lookarounds; the 253-char ceiling is checked in code.
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}$")
        .expect("valid domain regex")
});

const MAX_DOMAIN_LEN: usize = 253;

/// Supported indicator kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Ip,
    Hash,
    Domain,
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicatorKind::Ip => write!(f, "ip"),
            IndicatorKind::Hash => write!(f, "hash"),
            IndicatorKind::Domain => write!(f, "domain"),
        }
    }
}

/// A classified search subject. The value stays exactly as submitted; it is
/// the identity records are cached under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indicator {
    pub value: String,
    pub kind: IndicatorKind,
}

/// Classify a raw indicator string, first match wins:
/// IPv4 dotted quad, then fixed-length hex hash (SHA-256/SHA-1/MD5), then
/// domain after stripping a leading scheme and path. Anything else, IPv6
/// included, is rejected.
pub fn classify(raw: &str) -> Result<Indicator, AnalysisError> {
    if IPV4_RE.is_match(raw) {
        return Ok(Indicator {
            value: raw.to_string(),
            kind: IndicatorKind::Ip,
        });
    }

    if is_hash(raw) {
        return Ok(Indicator {
            value: raw.to_string(),
            kind: IndicatorKind::Hash,
        });
    }

    let host = strip_to_host(raw);
    if host.len() <= MAX_DOMAIN_LEN && DOMAIN_RE.is_match(&host) {
        return Ok(Indicator {
            value: raw.to_string(),
            kind: IndicatorKind::Domain,
        });
    }

    Err(AnalysisError::UnsupportedIndicator(raw.to_string()))
}

/// MD5 = 32, SHA-1 = 40, SHA-256 = 64 hex chars
fn is_hash(value: &str) -> bool {
    (value.len() == 32 || value.len() == 40 || value.len() == 64)
        && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Reduce `scheme://host/path` or `host/path` to `host`, lowercased.
fn strip_to_host(raw: &str) -> String {
    let cleaned = raw.to_lowercase();
    let rest = match cleaned.split_once("://") {
        Some((_, rest)) => rest,
        None => cleaned.as_str(),
    };
    rest.split('/').next().unwrap_or_default().to_string()
}
