use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use scanhub_model::{
    EtMapping, JobId, MappingId, PackageId, ReleaseId, RequestState, Scan,
    ScanBinding, ScanId, ScanState,
};

use crate::error::{HubError, Result};
use crate::persistence::{ScanQuery, ScanStore, UploadRecord};

use super::parse_enum;

const TARGET_TYPES: [&str; 3] = ["REGULAR", "REBASE", "NEW_PACKAGE"];
const FINISHED_WELL: [&str; 5] = [
    "NEEDS_INSPECTION",
    "WAIVED",
    "PASSED",
    "DISPUTED",
    "BUG_CONFIRMED",
];

#[derive(Clone, Debug)]
pub struct PostgresScanStore {
    pool: PgPool,
}

impl PostgresScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(super) fn scan_from_row(row: &PgRow) -> Result<Scan> {
    Ok(Scan {
        id: ScanId(row.try_get::<Uuid, _>("id")?),
        nvr: row.try_get("nvr")?,
        scan_type: parse_enum(row, "scan_type")?,
        state: parse_enum(row, "state")?,
        base: row.try_get::<Option<Uuid>, _>("base")?.map(ScanId),
        parent: row.try_get::<Option<Uuid>, _>("parent")?.map(ScanId),
        child: row.try_get::<Option<Uuid>, _>("child")?.map(ScanId),
        package: PackageId(row.try_get::<Uuid, _>("package")?),
        release: row.try_get::<Option<Uuid>, _>("release")?.map(ReleaseId),
        environment: row.try_get("environment")?,
        owner: row.try_get("owner")?,
        enabled: row.try_get("enabled")?,
        submitted_at: row.try_get("submitted_at")?,
        last_access: row.try_get("last_access")?,
    })
}

fn binding_from_row(row: &PgRow) -> Result<ScanBinding> {
    Ok(ScanBinding {
        scan: ScanId(row.try_get::<Uuid, _>("scan")?),
        job: row.try_get::<Option<Uuid>, _>("job")?.map(JobId),
        result: row
            .try_get::<Option<Uuid>, _>("result")?
            .map(scanhub_model::ResultId),
    })
}

fn mapping_from_row(row: &PgRow) -> Result<EtMapping> {
    let state: String = row.try_get("state")?;
    let state = match state.as_str() {
        "OK" => RequestState::Ok,
        "ERROR" => RequestState::Error,
        "INELIGIBLE" => RequestState::Ineligible,
        other => {
            return Err(HubError::Internal(format!(
                "corrupt mapping state: {other}"
            )));
        }
    };
    Ok(EtMapping {
        id: MappingId(row.try_get::<Uuid, _>("id")?),
        advisory_id: row.try_get("advisory_id")?,
        external_scan_id: row.try_get("external_scan_id")?,
        latest_scan: row
            .try_get::<Option<Uuid>, _>("latest_scan")?
            .map(ScanId),
        comment: row.try_get("comment")?,
        state,
    })
}

async fn insert_scan_tx<'a, E>(executor: E, scan: &Scan) -> Result<()>
where
    E: sqlx::Executor<'a, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO scans (
            id, nvr, scan_type, state, base, parent, child, package,
            release, environment, owner, enabled, submitted_at, last_access
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(scan.id.0)
    .bind(&scan.nvr)
    .bind(scan.scan_type.to_string())
    .bind(scan.state.to_string())
    .bind(scan.base.map(|id| id.0))
    .bind(scan.parent.map(|id| id.0))
    .bind(scan.child.map(|id| id.0))
    .bind(scan.package.0)
    .bind(scan.release.map(|id| id.0))
    .bind(&scan.environment)
    .bind(&scan.owner)
    .bind(scan.enabled)
    .bind(scan.submitted_at)
    .bind(scan.last_access)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl ScanStore for PostgresScanStore {
    async fn insert_scan(&self, scan: Scan) -> Result<()> {
        insert_scan_tx(&self.pool, &scan).await
    }

    async fn get_scan(&self, id: ScanId) -> Result<Scan> {
        let row = sqlx::query("SELECT * FROM scans WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("scan {id}")))?;
        scan_from_row(&row)
    }

    async fn update_scan(&self, scan: &Scan) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE scans
            SET nvr = $2, scan_type = $3, state = $4, base = $5,
                parent = $6, child = $7, package = $8, release = $9,
                environment = $10, owner = $11, enabled = $12,
                submitted_at = $13, last_access = $14
            WHERE id = $1
            "#,
        )
        .bind(scan.id.0)
        .bind(&scan.nvr)
        .bind(scan.scan_type.to_string())
        .bind(scan.state.to_string())
        .bind(scan.base.map(|id| id.0))
        .bind(scan.parent.map(|id| id.0))
        .bind(scan.child.map(|id| id.0))
        .bind(scan.package.0)
        .bind(scan.release.map(|id| id.0))
        .bind(&scan.environment)
        .bind(&scan.owner)
        .bind(scan.enabled)
        .bind(scan.submitted_at)
        .bind(scan.last_access)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(HubError::NotFound(format!("scan {}", scan.id)));
        }
        Ok(())
    }

    async fn create_scan_superseding(
        &self,
        mut scan: Scan,
        binding: ScanBinding,
    ) -> Result<Vec<Scan>> {
        let mut tx = self.pool.begin().await?;
        let mut canceled = Vec::new();

        if scan.scan_type.is_target() {
            if let Some(release) = scan.release {
                // lock the whole (package, release) scope so two concurrent
                // submissions cannot both observe "no in-progress scan"
                let rows = sqlx::query(
                    r#"
                    SELECT * FROM scans
                    WHERE package = $1 AND release = $2
                      AND scan_type = ANY($3)
                    FOR UPDATE
                    "#,
                )
                .bind(scan.package.0)
                .bind(release.0)
                .bind(&TARGET_TYPES[..])
                .fetch_all(&mut *tx)
                .await?;

                let mut scope = Vec::with_capacity(rows.len());
                for row in &rows {
                    scope.push(scan_from_row(row)?);
                }

                for other in
                    scope.iter().filter(|s| s.state.is_in_progress())
                {
                    canceled.push(other.clone());
                    sqlx::query(
                        "UPDATE scans SET state = $2, enabled = FALSE \
                         WHERE id = $1",
                    )
                    .bind(other.id.0)
                    .bind(ScanState::Canceled.to_string())
                    .execute(&mut *tx)
                    .await?;
                }

                // re-enable the canceled head's most recent successful
                // ancestor before re-linking the chain
                for before in &canceled {
                    let mut cursor = before.child;
                    while let Some(id) = cursor {
                        let Some(ancestor) =
                            scope.iter().find(|s| s.id == id)
                        else {
                            break;
                        };
                        if ancestor.state.finished_well() {
                            sqlx::query(
                                "UPDATE scans SET enabled = TRUE \
                                 WHERE id = $1",
                            )
                            .bind(ancestor.id.0)
                            .execute(&mut *tx)
                            .await?;
                            break;
                        }
                        cursor = ancestor.child;
                    }
                }

                let head = scope
                    .iter()
                    .filter(|s| s.state.finished_well())
                    .max_by_key(|s| s.submitted_at);
                if let Some(head) = head {
                    sqlx::query(
                        "UPDATE scans SET parent = $2, enabled = FALSE \
                         WHERE id = $1",
                    )
                    .bind(head.id.0)
                    .bind(scan.id.0)
                    .execute(&mut *tx)
                    .await?;
                    scan.child = Some(head.id);
                }
            }
        }

        insert_scan_tx(&mut *tx, &scan).await?;
        sqlx::query(
            "INSERT INTO scan_bindings (scan, job, result) \
             VALUES ($1, $2, $3)",
        )
        .bind(binding.scan.0)
        .bind(binding.job.map(|id| id.0))
        .bind(binding.result.map(|id| id.0))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(canceled)
    }

    async fn insert_binding(&self, binding: ScanBinding) -> Result<()> {
        sqlx::query(
            "INSERT INTO scan_bindings (scan, job, result) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (scan) DO UPDATE SET job = EXCLUDED.job",
        )
        .bind(binding.scan.0)
        .bind(binding.job.map(|id| id.0))
        .bind(binding.result.map(|id| id.0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_binding(&self, scan: ScanId) -> Result<ScanBinding> {
        let row =
            sqlx::query("SELECT * FROM scan_bindings WHERE scan = $1")
                .bind(scan.0)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| {
                    HubError::NotFound(format!("binding for {scan}"))
                })?;
        binding_from_row(&row)
    }

    async fn binding_for_job(
        &self,
        job: JobId,
    ) -> Result<Option<ScanBinding>> {
        let row = sqlx::query("SELECT * FROM scan_bindings WHERE job = $1")
            .bind(job.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(binding_from_row).transpose()
    }

    async fn set_binding_job(&self, scan: ScanId, job: JobId) -> Result<()> {
        let updated =
            sqlx::query("UPDATE scan_bindings SET job = $2 WHERE scan = $1")
                .bind(scan.0)
                .bind(job.0)
                .execute(&self.pool)
                .await?
                .rows_affected();
        if updated == 0 {
            return Err(HubError::NotFound(format!("binding for {scan}")));
        }
        Ok(())
    }

    async fn latest_binding_for_nvr(
        &self,
        nvr: &str,
        include_failed: bool,
    ) -> Result<Option<(Scan, ScanBinding)>> {
        let mut builder = QueryBuilder::<Postgres>::new(
            r#"
            SELECT s.*, b.scan AS b_scan, b.job AS b_job,
                   b.result AS b_result
            FROM scans s
            LEFT JOIN scan_bindings b ON b.scan = s.id
            WHERE s.nvr =
            "#,
        );
        builder.push_bind(nvr);
        if !include_failed {
            builder.push(" AND s.state <> ");
            builder.push_bind(ScanState::Failed.to_string());
        }
        builder.push(" ORDER BY s.submitted_at DESC LIMIT 1");
        let Some(row) = builder.build().fetch_optional(&self.pool).await?
        else {
            return Ok(None);
        };
        let scan = scan_from_row(&row)?;
        let binding = match row.try_get::<Option<Uuid>, _>("b_scan")? {
            Some(scan_id) => ScanBinding {
                scan: ScanId(scan_id),
                job: row.try_get::<Option<Uuid>, _>("b_job")?.map(JobId),
                result: row
                    .try_get::<Option<Uuid>, _>("b_result")?
                    .map(scanhub_model::ResultId),
            },
            None => ScanBinding::new(scan.id),
        };
        Ok(Some((scan, binding)))
    }

    async fn latest_target_scan(
        &self,
        package: PackageId,
        release: ReleaseId,
    ) -> Result<Option<Scan>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM scans
            WHERE package = $1 AND release = $2
              AND scan_type = ANY($3) AND state = ANY($4)
            ORDER BY submitted_at DESC
            LIMIT 1
            "#,
        )
        .bind(package.0)
        .bind(release.0)
        .bind(&TARGET_TYPES[..])
        .bind(&FINISHED_WELL[..])
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(scan_from_row).transpose()
    }

    async fn scan_with_base(&self, base: ScanId) -> Result<Option<Scan>> {
        let row = sqlx::query("SELECT * FROM scans WHERE base = $1 LIMIT 1")
            .bind(base.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(scan_from_row).transpose()
    }

    async fn find_scans(&self, query: &ScanQuery) -> Result<Vec<Scan>> {
        let mut builder = QueryBuilder::<Postgres>::new(
            r#"
            SELECT s.* FROM scans s
            LEFT JOIN scans base_scan ON base_scan.id = s.base
            LEFT JOIN releases r ON r.id = s.release
            WHERE 1=1
            "#,
        );
        if let Some(id) = query.id {
            builder.push(" AND s.id = ");
            builder.push_bind(id.0);
        }
        if let Some(target) = &query.target {
            builder.push(" AND s.nvr = ");
            builder.push_bind(target);
        }
        if let Some(base) = &query.base {
            builder.push(" AND base_scan.nvr = ");
            builder.push_bind(base);
        }
        if let Some(state) = query.state {
            builder.push(" AND s.state = ");
            builder.push_bind(state.to_string());
        }
        if let Some(owner) = &query.owner {
            builder.push(" AND s.owner = ");
            builder.push_bind(owner);
        }
        if let Some(release) = &query.release {
            builder.push(" AND r.tag = ");
            builder.push_bind(release);
        }
        builder.push(" ORDER BY s.submitted_at DESC");
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(scan_from_row).collect()
    }

    async fn insert_mapping(&self, mapping: EtMapping) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO et_mappings
                (id, advisory_id, external_scan_id, latest_scan, comment,
                 state)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(mapping.id.0)
        .bind(&mapping.advisory_id)
        .bind(&mapping.external_scan_id)
        .bind(mapping.latest_scan.map(|id| id.0))
        .bind(&mapping.comment)
        .bind(mapping.state.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_mapping(&self, mapping: &EtMapping) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE et_mappings
            SET latest_scan = $2, comment = $3, state = $4
            WHERE id = $1
            "#,
        )
        .bind(mapping.id.0)
        .bind(mapping.latest_scan.map(|id| id.0))
        .bind(&mapping.comment)
        .bind(mapping.state.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_mapping(&self, id: MappingId) -> Result<EtMapping> {
        let row = sqlx::query("SELECT * FROM et_mappings WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("mapping {id}")))?;
        mapping_from_row(&row)
    }

    async fn remap_latest_run(&self, from: ScanId, to: ScanId) -> Result<()> {
        sqlx::query(
            "UPDATE et_mappings SET latest_scan = $2 WHERE latest_scan = $1",
        )
        .bind(from.0)
        .bind(to.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upload_by_id(&self, id: Uuid) -> Result<Option<UploadRecord>> {
        let row = sqlx::query("SELECT * FROM uploads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(UploadRecord {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                owner: row.try_get("owner")?,
            }),
            None => None,
        })
    }
}
