use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use scanhub_model::{AnalyzerVersionPair, AnalyzerVersionSnapshot};

use crate::error::Result;
use crate::persistence::VersionStore;

#[derive(Clone, Debug)]
pub struct PostgresVersionStore {
    pool: PgPool,
}

impl PostgresVersionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VersionStore for PostgresVersionStore {
    async fn snapshot(
        &self,
        environment: &str,
    ) -> Result<Vec<AnalyzerVersionSnapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM analyzer_versions WHERE environment = $1 \
             ORDER BY analyzer",
        )
        .bind(environment)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(AnalyzerVersionSnapshot {
                    environment: row.try_get("environment")?,
                    analyzer: row.try_get("analyzer")?,
                    version: row.try_get("version")?,
                    captured_at: row.try_get("captured_at")?,
                })
            })
            .collect()
    }

    async fn replace_snapshot(
        &self,
        environment: &str,
        versions: &[AnalyzerVersionPair],
        at: DateTime<Utc>,
    ) -> Result<()> {
        // clear-then-repopulate must be one transaction so a concurrent
        // reader never observes a torn set
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM analyzer_versions WHERE environment = $1")
            .bind(environment)
            .execute(&mut *tx)
            .await?;
        for pair in versions {
            sqlx::query(
                r#"
                INSERT INTO analyzer_versions
                    (environment, analyzer, version, captured_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (environment, analyzer)
                DO UPDATE SET version = EXCLUDED.version,
                              captured_at = EXCLUDED.captured_at
                "#,
            )
            .bind(environment)
            .bind(&pair.name)
            .bind(&pair.version)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            r#"
            INSERT INTO version_checks (environment, refreshed_at)
            VALUES ($1, $2)
            ON CONFLICT (environment)
            DO UPDATE SET refreshed_at = EXCLUDED.refreshed_at
            "#,
        )
        .bind(environment)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn last_refreshed(
        &self,
        environment: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT refreshed_at FROM version_checks WHERE environment = $1",
        )
        .bind(environment)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("refreshed_at")?),
            None => None,
        })
    }
}
