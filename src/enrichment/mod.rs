//! Provider adapters and the analysis orchestrator

pub mod dns;
pub mod hybrid;
pub mod normalize;
pub mod urlscan;
pub mod virustotal;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future;

use crate::models::{
    classify, AnalysisError, Indicator, IndicatorKind, PartialRisk, ProviderFailure, RiskRecord,
};
use crate::storage::RiskStore;
use self::normalize::normalize;

/// Uniform capability over one external threat-intelligence provider. A
/// failure is a recorded outcome, not a pipeline abort: the orchestrator
/// normalizes it into a risk record like any success.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Tag stored on records this provider produces
    fn source_tag(&self) -> &'static str;

    /// Check if this provider can analyze the given indicator kind
    fn supports(&self, kind: IndicatorKind) -> bool;

    /// Query the provider, applying its provider-specific fallback chain
    async fn analyze(&self, indicator: &Indicator) -> Result<PartialRisk, ProviderFailure>;
}

pub(crate) fn body_excerpt(text: &str) -> String {
    text.chars().take(256).collect()
}

pub(crate) fn transport_failure(provider: &str, err: &reqwest::Error) -> ProviderFailure {
    let status = if err.is_timeout() { 504 } else { 502 };
    ProviderFailure::new(status, format!("{provider} request failed: {err}"))
}

pub(crate) fn upstream_failure(
    provider: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> ProviderFailure {
    ProviderFailure::new(
        502,
        format!("{provider} API error: {} - {}", status, body_excerpt(body)),
    )
}

/// Orchestrates classification, provider dispatch, normalization, and the
/// repository cache check.
pub struct AnalysisEngine {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    store: Arc<dyn RiskStore>,
}

impl AnalysisEngine {
    pub fn new(store: Arc<dyn RiskStore>) -> Self {
        Self {
            providers: vec![],
            store,
        }
    }

    pub fn add_provider(&mut self, provider: Arc<dyn ProviderAdapter>) {
        self.providers.push(provider);
    }

    /// Point lookup: one indicator, the one provider matched to its kind.
    /// A stored record for the subject short-circuits the provider call.
    pub async fn analyze(&self, raw: &str) -> Result<RiskRecord, AnalysisError> {
        let indicator = classify(raw)?;

        if let Some(existing) = self.store.find(&indicator.value, None).await? {
            tracing::debug!(subject = %indicator.value, "Returning stored assessment");
            return Ok(existing);
        }

        let provider = self
            .providers
            .iter()
            .find(|p| p.supports(indicator.kind))
            .ok_or_else(|| AnalysisError::UnsupportedIndicator(raw.to_string()))?;

        tracing::info!(
            provider = provider.source_tag(),
            subject = %indicator.value,
            kind = %indicator.kind,
            "Analyzing indicator"
        );

        let outcome = provider.analyze(&indicator).await;
        if let Err(failure) = &outcome {
            tracing::warn!(
                provider = provider.source_tag(),
                subject = %indicator.value,
                status = failure.status,
                error = %failure.message,
                "Provider lookup failed"
            );
        }

        let record = normalize(&indicator.value, provider.source_tag(), outcome, Utc::now());
        Ok(self.store.create(record).await?)
    }

    /// Aggregate lookup: all domain-capable providers, one record each, in
    /// registration order. Providers with a stored (subject, tag) record are
    /// skipped; the rest are dispatched concurrently. One provider failing
    /// never blocks or masks another.
    pub async fn analyze_domain(&self, raw: &str) -> Result<Vec<RiskRecord>, AnalysisError> {
        let indicator = classify(raw)?;
        if indicator.kind != IndicatorKind::Domain {
            return Err(AnalysisError::UnsupportedIndicator(raw.to_string()));
        }

        let applicable: Vec<Arc<dyn ProviderAdapter>> = self
            .providers
            .iter()
            .filter(|p| p.supports(IndicatorKind::Domain))
            .cloned()
            .collect();

        let mut slots: Vec<Option<RiskRecord>> = vec![None; applicable.len()];
        let mut pending: Vec<(usize, Arc<dyn ProviderAdapter>)> = vec![];
        for (idx, provider) in applicable.iter().enumerate() {
            match self
                .store
                .find(&indicator.value, Some(provider.source_tag()))
                .await?
            {
                Some(record) => slots[idx] = Some(record),
                None => pending.push((idx, Arc::clone(provider))),
            }
        }

        let outcomes =
            future::join_all(pending.iter().map(|(_, p)| p.analyze(&indicator))).await;

        for ((idx, provider), outcome) in pending.iter().zip(outcomes) {
            if let Err(failure) = &outcome {
                tracing::warn!(
                    provider = provider.source_tag(),
                    subject = %indicator.value,
                    status = failure.status,
                    error = %failure.message,
                    "Provider lookup failed"
                );
            }
            let record = normalize(&indicator.value, provider.source_tag(), outcome, Utc::now());
            slots[*idx] = Some(self.store.create(record).await?);
        }

        Ok(slots.into_iter().flatten().collect())
    }
}
