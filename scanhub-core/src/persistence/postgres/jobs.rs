use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use scanhub_model::JobId;

use crate::error::{HubError, Result};
use crate::external::{JobInfo, JobQuery, JobSpec, JobState, TaskBroker};

use super::parse_enum;

/// Database-backed job directory. The hub records jobs in its own store;
/// workers pick them up through the broker surface and report back through
/// the worker callbacks.
#[derive(Clone, Debug)]
pub struct PostgresTaskBroker {
    pool: PgPool,
}

impl PostgresTaskBroker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(
        &self,
        spec: JobSpec,
        parent: Option<JobId>,
    ) -> Result<JobId> {
        let id = JobId(Uuid::now_v7());
        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, method, label, owner, priority, comment, state, args,
                 parent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id.0)
        .bind(&spec.method)
        .bind(&spec.label)
        .bind(&spec.owner)
        .bind(spec.priority)
        .bind(&spec.comment)
        .bind(JobState::Free.to_string())
        .bind(&spec.args)
        .bind(parent.map(|p| p.0))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }
}

fn job_from_row(row: &PgRow) -> Result<JobInfo> {
    Ok(JobInfo {
        id: JobId(row.try_get::<Uuid, _>("id")?),
        method: row.try_get("method")?,
        label: row.try_get("label")?,
        owner: row.try_get("owner")?,
        priority: row.try_get("priority")?,
        comment: row.try_get("comment")?,
        state: parse_enum(row, "state")?,
        args: row.try_get("args")?,
        parent: row.try_get::<Option<Uuid>, _>("parent")?.map(JobId),
        created_at: row.try_get("created_at")?,
        finished_at: row.try_get("finished_at")?,
        note: row.try_get("note")?,
    })
}

#[async_trait]
impl TaskBroker for PostgresTaskBroker {
    async fn create_job(&self, spec: JobSpec) -> Result<JobId> {
        self.insert(spec, None).await
    }

    async fn create_sub_job(
        &self,
        parent: JobId,
        spec: JobSpec,
    ) -> Result<JobId> {
        self.insert(spec, Some(parent)).await
    }

    async fn cancel_job(&self, id: JobId) -> Result<bool> {
        let cancelled = sqlx::query(
            r#"
            UPDATE jobs
            SET state = $2, finished_at = $3
            WHERE id = $1 AND state = ANY($4)
            "#,
        )
        .bind(id.0)
        .bind(JobState::Canceled.to_string())
        .bind(Utc::now())
        .bind(&["CREATED", "FREE", "ASSIGNED"][..])
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(cancelled > 0)
    }

    async fn job_info(&self, id: JobId) -> Result<Option<JobInfo>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_jobs(&self, query: &JobQuery) -> Result<Vec<JobId>> {
        let mut builder =
            QueryBuilder::<Postgres>::new("SELECT id FROM jobs WHERE ");
        if let Some(label) = &query.label {
            builder.push("label = ");
            builder.push_bind(label);
        } else if let Some(name) = &query.package_name {
            builder.push("label ~ ");
            builder.push_bind(format!("{}-\\d", regex::escape(name)));
        } else if let Some(pattern) = &query.regex {
            builder.push("label ~ ");
            builder.push_bind(pattern);
        } else if let Some(comment) = &query.comment {
            builder.push("comment ~ ");
            builder.push_bind(comment);
        } else {
            return Ok(Vec::new());
        }
        if !query.states.is_empty() {
            let states: Vec<String> =
                query.states.iter().map(|s| s.to_string()).collect();
            builder.push(" AND state = ANY(");
            builder.push_bind(states);
            builder.push(")");
        }
        builder
            .push(" ORDER BY finished_at DESC NULLS LAST, created_at DESC");
        if query.latest {
            builder.push(" LIMIT 1");
        }
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(JobId(row.try_get::<Uuid, _>("id").map_err(
                    HubError::from,
                )?))
            })
            .collect()
    }

    async fn set_job_state(&self, id: JobId, state: JobState) -> Result<()> {
        let finished_at = state.is_finished().then(Utc::now);
        let updated = sqlx::query(
            "UPDATE jobs SET state = $2, \
             finished_at = COALESCE($3, finished_at) WHERE id = $1",
        )
        .bind(id.0)
        .bind(state.to_string())
        .bind(finished_at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(HubError::Broker(format!("job {id} is unknown")));
        }
        Ok(())
    }

    async fn set_job_note(&self, id: JobId, note: &str) -> Result<()> {
        let updated =
            sqlx::query("UPDATE jobs SET note = $2 WHERE id = $1")
                .bind(id.0)
                .bind(note)
                .execute(&self.pool)
                .await?
                .rows_affected();
        if updated == 0 {
            return Err(HubError::Broker(format!("job {id} is unknown")));
        }
        Ok(())
    }
}
