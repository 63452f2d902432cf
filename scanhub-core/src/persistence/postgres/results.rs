use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use scanhub_model::{
    Defect, DefectId, DefectKind, GroupId, PackageId, ReleaseId, ResultGroup,
    ResultId, Scan, ScanResult,
};

use crate::error::{HubError, Result};
use crate::persistence::{AttachOutcome, ResultStore};

use super::{parse_enum, parse_json};

#[derive(Clone, Debug)]
pub struct PostgresResultStore {
    pool: PgPool,
}

impl PostgresResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn result_from_row(row: &PgRow) -> Result<ScanResult> {
    Ok(ScanResult {
        id: ResultId(row.try_get::<Uuid, _>("id")?),
        lines: row.try_get("lines")?,
        scanning_time: row.try_get("scanning_time")?,
        submitted_at: row.try_get("submitted_at")?,
        analyzers: parse_json(row, "analyzers")?,
    })
}

fn group_from_row(row: &PgRow) -> Result<ResultGroup> {
    Ok(ResultGroup {
        id: GroupId(row.try_get::<Uuid, _>("id")?),
        result: ResultId(row.try_get::<Uuid, _>("result")?),
        checker_group: row.try_get("checker_group")?,
        defect_kind: parse_enum(row, "defect_kind")?,
        state: parse_enum(row, "state")?,
        defects_count: row.try_get::<i32, _>("defects_count")? as u32,
    })
}

fn defect_from_row(row: &PgRow) -> Result<Defect> {
    Ok(Defect {
        id: DefectId(row.try_get::<Uuid, _>("id")?),
        group: GroupId(row.try_get::<Uuid, _>("group_id")?),
        checker: row.try_get("checker")?,
        order: row
            .try_get::<Option<i32>, _>("ord")?
            .map(|ord| ord as u32),
        annotation: row.try_get("annotation")?,
        cwe: row.try_get("cwe")?,
        key_event: row.try_get::<i32, _>("key_event")? as usize,
        function: row.try_get("function")?,
        defect_identifier: row.try_get("defect_identifier")?,
        state: parse_enum(row, "state")?,
        events: parse_json(row, "events")?,
    })
}

#[async_trait]
impl ResultStore for PostgresResultStore {
    async fn attach_result(
        &self,
        scan: scanhub_model::ScanId,
        result: ScanResult,
    ) -> Result<AttachOutcome> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT result FROM scan_bindings WHERE scan = $1 FOR UPDATE",
        )
        .bind(scan.0)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("binding for {scan}")))?;

        if let Some(existing) = row.try_get::<Option<Uuid>, _>("result")? {
            tx.commit().await?;
            return Ok(AttachOutcome::AlreadyLoaded(ResultId(existing)));
        }

        sqlx::query(
            r#"
            INSERT INTO results (id, lines, scanning_time, submitted_at,
                                 analyzers)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(result.id.0)
        .bind(result.lines)
        .bind(result.scanning_time)
        .bind(result.submitted_at)
        .bind(serde_json::to_value(&result.analyzers)?)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE scan_bindings SET result = $2 WHERE scan = $1")
            .bind(scan.0)
            .bind(result.id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(AttachOutcome::Created(result.id))
    }

    async fn get_result(&self, id: ResultId) -> Result<ScanResult> {
        let row = sqlx::query("SELECT * FROM results WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("result {id}")))?;
        result_from_row(&row)
    }

    async fn result_for_scan(
        &self,
        scan: scanhub_model::ScanId,
    ) -> Result<Option<ScanResult>> {
        let row = sqlx::query(
            r#"
            SELECT r.* FROM results r
            JOIN scan_bindings b ON b.result = r.id
            WHERE b.scan = $1
            "#,
        )
        .bind(scan.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(result_from_row).transpose()
    }

    async fn insert_group(&self, group: ResultGroup) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO result_groups
                (id, result, checker_group, defect_kind, state,
                 defects_count)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(group.id.0)
        .bind(group.result.0)
        .bind(&group.checker_group)
        .bind(group.defect_kind.to_string())
        .bind(group.state.to_string())
        .bind(group.defects_count as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_group(&self, group: &ResultGroup) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE result_groups
            SET defect_kind = $2, state = $3, defects_count = $4
            WHERE id = $1
            "#,
        )
        .bind(group.id.0)
        .bind(group.defect_kind.to_string())
        .bind(group.state.to_string())
        .bind(group.defects_count as i32)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(HubError::NotFound(format!("group {}", group.id)));
        }
        Ok(())
    }

    async fn get_group(&self, id: GroupId) -> Result<ResultGroup> {
        let row = sqlx::query("SELECT * FROM result_groups WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("group {id}")))?;
        group_from_row(&row)
    }

    async fn groups_for_result(
        &self,
        result: ResultId,
    ) -> Result<Vec<ResultGroup>> {
        let rows = sqlx::query(
            "SELECT * FROM result_groups WHERE result = $1 \
             ORDER BY checker_group",
        )
        .bind(result.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(group_from_row).collect()
    }

    async fn insert_defects(&self, defects: Vec<Defect>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for defect in &defects {
            sqlx::query(
                r#"
                INSERT INTO defects
                    (id, group_id, checker, ord, annotation, cwe,
                     key_event, function, defect_identifier, state, events)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(defect.id.0)
            .bind(defect.group.0)
            .bind(&defect.checker)
            .bind(defect.order.map(|ord| ord as i32))
            .bind(&defect.annotation)
            .bind(defect.cwe)
            .bind(defect.key_event as i32)
            .bind(&defect.function)
            .bind(&defect.defect_identifier)
            .bind(defect.state.to_string())
            .bind(serde_json::to_value(&defect.events)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn defects_for_group(&self, group: GroupId) -> Result<Vec<Defect>> {
        let rows = sqlx::query(
            "SELECT * FROM defects WHERE group_id = $1 ORDER BY ord, id",
        )
        .bind(group.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(defect_from_row).collect()
    }

    async fn set_defect_states(
        &self,
        group: GroupId,
        state: DefectKind,
    ) -> Result<()> {
        sqlx::query("UPDATE defects SET state = $2 WHERE group_id = $1")
            .bind(group.0)
            .bind(state.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn assign_defect_orders(&self, group: GroupId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE defects d
            SET ord = numbered.ord
            FROM (
                SELECT id, ROW_NUMBER() OVER (ORDER BY id) AS ord
                FROM defects WHERE group_id = $1
            ) numbered
            WHERE d.id = numbered.id
            "#,
        )
        .bind(group.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn groups_in_scope_since(
        &self,
        checker_group: &str,
        package: PackageId,
        release: ReleaseId,
        after: DateTime<Utc>,
        exclude: GroupId,
    ) -> Result<Vec<ResultGroup>> {
        let rows = sqlx::query(
            r#"
            SELECT g.* FROM result_groups g
            JOIN results r ON r.id = g.result
            JOIN scan_bindings b ON b.result = r.id
            JOIN scans s ON s.id = b.scan
            WHERE g.checker_group = $1
              AND s.package = $2 AND s.release = $3
              AND r.submitted_at > $4
              AND g.id <> $5
            "#,
        )
        .bind(checker_group)
        .bind(package.0)
        .bind(release.0)
        .bind(after)
        .bind(exclude.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(group_from_row).collect()
    }

    async fn scan_for_group(&self, group: GroupId) -> Result<Scan> {
        let row = sqlx::query(
            r#"
            SELECT s.* FROM scans s
            JOIN scan_bindings b ON b.scan = s.id
            JOIN result_groups g ON g.result = b.result
            WHERE g.id = $1
            "#,
        )
        .bind(group.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            HubError::NotFound(format!("scan owning group {group}"))
        })?;
        super::scans::scan_from_row(&row)
    }
}
