use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use scanhub_model::{
    GroupId, PackageId, ReleaseId, Waiver, WaiverId, WaiverLogAction,
    WaivingLog,
};

use crate::error::{HubError, Result};
use crate::persistence::WaiverStore;

use super::parse_enum;

#[derive(Clone, Debug)]
pub struct PostgresWaiverStore {
    pool: PgPool,
}

impl PostgresWaiverStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn waiver_from_row(row: &PgRow) -> Result<Waiver> {
    let tracker = match row
        .try_get::<Option<serde_json::Value>, _>("tracker")?
    {
        Some(value) => Some(serde_json::from_value(value)?),
        None => None,
    };
    Ok(Waiver {
        id: WaiverId(row.try_get::<Uuid, _>("id")?),
        group: GroupId(row.try_get::<Uuid, _>("group_id")?),
        kind: parse_enum(row, "kind")?,
        message: row.try_get("message")?,
        user: row.try_get("username")?,
        date: row.try_get("date")?,
        is_active: row.try_get("is_active")?,
        is_deleted: row.try_get("is_deleted")?,
        tracker,
    })
}

fn log_action(raw: &str) -> Result<WaiverLogAction> {
    match raw {
        "NEW" => Ok(WaiverLogAction::New),
        "DELETE" => Ok(WaiverLogAction::Delete),
        "REWAIVE" => Ok(WaiverLogAction::Rewaive),
        other => Err(HubError::Internal(format!(
            "corrupt waiving log action: {other}"
        ))),
    }
}

#[async_trait]
impl WaiverStore for PostgresWaiverStore {
    async fn insert_waiver(&self, waiver: Waiver) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO waivers
                (id, group_id, kind, message, username, date, is_active,
                 is_deleted, tracker)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(waiver.id.0)
        .bind(waiver.group.0)
        .bind(waiver.kind.to_string())
        .bind(&waiver.message)
        .bind(&waiver.user)
        .bind(waiver.date)
        .bind(waiver.is_active)
        .bind(waiver.is_deleted)
        .bind(
            waiver
                .tracker
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_waiver(&self, waiver: &Waiver) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE waivers
            SET kind = $2, message = $3, is_active = $4, is_deleted = $5
            WHERE id = $1
            "#,
        )
        .bind(waiver.id.0)
        .bind(waiver.kind.to_string())
        .bind(&waiver.message)
        .bind(waiver.is_active)
        .bind(waiver.is_deleted)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(HubError::NotFound(format!("waiver {}", waiver.id)));
        }
        Ok(())
    }

    async fn get_waiver(&self, id: WaiverId) -> Result<Waiver> {
        let row = sqlx::query("SELECT * FROM waivers WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("waiver {id}")))?;
        waiver_from_row(&row)
    }

    async fn live_waivers_for_group(
        &self,
        group: GroupId,
    ) -> Result<Vec<Waiver>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM waivers
            WHERE group_id = $1 AND is_active AND NOT is_deleted
            ORDER BY date DESC
            "#,
        )
        .bind(group.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(waiver_from_row).collect()
    }

    async fn last_waiver_in_scope(
        &self,
        checker_group: &str,
        package: PackageId,
        release: ReleaseId,
        exclude_group: Option<GroupId>,
    ) -> Result<Option<Waiver>> {
        let row = sqlx::query(
            r#"
            SELECT w.* FROM waivers w
            JOIN result_groups g ON g.id = w.group_id
            JOIN scan_bindings b ON b.result = g.result
            JOIN scans s ON s.id = b.scan
            WHERE w.is_active AND NOT w.is_deleted
              AND g.checker_group = $1
              AND s.package = $2 AND s.release = $3
              AND ($4::uuid IS NULL OR w.group_id <> $4)
            ORDER BY w.date DESC
            LIMIT 1
            "#,
        )
        .bind(checker_group)
        .bind(package.0)
        .bind(release.0)
        .bind(exclude_group.map(|id| id.0))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(waiver_from_row).transpose()
    }

    async fn append_log(&self, log: WaivingLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO waiving_logs (waiver, action, username, date)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(log.waiver.0)
        .bind(match log.action {
            WaiverLogAction::New => "NEW",
            WaiverLogAction::Delete => "DELETE",
            WaiverLogAction::Rewaive => "REWAIVE",
        })
        .bind(&log.user)
        .bind(log.date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn logs_for_waiver(
        &self,
        waiver: WaiverId,
    ) -> Result<Vec<WaivingLog>> {
        let rows = sqlx::query(
            "SELECT * FROM waiving_logs WHERE waiver = $1 ORDER BY date",
        )
        .bind(waiver.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(WaivingLog {
                    waiver: WaiverId(row.try_get::<Uuid, _>("waiver")?),
                    action: log_action(row.try_get::<String, _>("action")?.as_str())?,
                    user: row.try_get("username")?,
                    date: row.try_get("date")?,
                })
            })
            .collect()
    }
}
