//! Persistence for risk assessment records

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewRiskRecord, RiskRecord};

/// Memoizing store keyed by indicator identity. `find` is the cache check
/// the orchestrator performs before any provider call; `create` assigns
/// identity and must be idempotent on (subject, source_tag) conflicts.
#[async_trait]
pub trait RiskStore: Send + Sync {
    async fn find(&self, subject: &str, source_tag: Option<&str>) -> Result<Option<RiskRecord>>;

    async fn create(&self, record: NewRiskRecord) -> Result<RiskRecord>;
}

/// Postgres-backed repository
#[derive(Clone)]
pub struct RiskRepo {
    pool: PgPool,
}

impl RiskRepo {
    /// Create new repository with database connection
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }
}

#[async_trait]
impl RiskStore for RiskRepo {
    async fn find(&self, subject: &str, source_tag: Option<&str>) -> Result<Option<RiskRecord>> {
        let record = match source_tag {
            Some(tag) => {
                sqlx::query_as::<_, RiskRecord>(
                    "SELECT * FROM risk_reports WHERE subject = $1 AND source_tag = $2",
                )
                .bind(subject)
                .bind(tag)
                .fetch_optional(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, RiskRecord>(
                    "SELECT * FROM risk_reports WHERE subject = $1 ORDER BY analyzed_at DESC LIMIT 1",
                )
                .bind(subject)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .context("Failed to fetch risk report")?;

        Ok(record)
    }

    async fn create(&self, record: NewRiskRecord) -> Result<RiskRecord> {
        // Losing the insert race is fine: the surviving row is the answer.
        let inserted = sqlx::query_as::<_, RiskRecord>(
            r#"
            INSERT INTO risk_reports (
                id, subject, source_tag, risk_score, detection_count, detection_label,
                country, resolved_network, raw_summary, analyzed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (subject, source_tag) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.subject)
        .bind(&record.source_tag)
        .bind(record.risk_score)
        .bind(record.detection_count)
        .bind(&record.detection_label)
        .bind(&record.country)
        .bind(&record.resolved_network)
        .bind(&record.raw_summary)
        .bind(record.analyzed_at)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to insert risk report")?;

        match inserted {
            Some(stored) => Ok(stored),
            None => self
                .find(&record.subject, Some(&record.source_tag))
                .await?
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Conflicting risk report vanished for {} / {}",
                        record.subject,
                        record.source_tag
                    )
                }),
        }
    }
}

/// In-memory store for tests, same first-write-wins semantics as the
/// Postgres repository.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryRiskStore {
    records: tokio::sync::Mutex<Vec<RiskRecord>>,
}

#[cfg(test)]
#[async_trait]
impl RiskStore for MemoryRiskStore {
    async fn find(&self, subject: &str, source_tag: Option<&str>) -> Result<Option<RiskRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|r| r.subject == subject && source_tag.is_none_or(|t| r.source_tag == t))
            .cloned())
    }

    async fn create(&self, record: NewRiskRecord) -> Result<RiskRecord> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records
            .iter()
            .find(|r| r.subject == record.subject && r.source_tag == record.source_tag)
        {
            return Ok(existing.clone());
        }

        let stored = RiskRecord {
            id: Uuid::new_v4(),
            subject: record.subject,
            source_tag: record.source_tag,
            risk_score: record.risk_score,
            detection_count: record.detection_count,
            detection_label: record.detection_label,
            country: record.country,
            resolved_network: record.resolved_network,
            raw_summary: record.raw_summary,
            analyzed_at: record.analyzed_at,
        };
        records.push(stored.clone());
        Ok(stored)
    }
}
