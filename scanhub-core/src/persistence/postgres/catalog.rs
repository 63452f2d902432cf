use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use scanhub_model::{
    ClientAnalyzer, EnvironmentId, MockEnvironment, Package, PackageId,
    Profile, Release, ReleaseId, ReleaseMapping, Tag,
};

use crate::error::{HubError, Result};
use crate::persistence::CatalogStore;

#[derive(Clone, Debug)]
pub struct PostgresCatalogStore {
    pool: PgPool,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn package_from_row(row: &PgRow) -> Result<Package> {
    Ok(Package {
        id: PackageId(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        blocked: row.try_get("blocked")?,
        priority_offset: row.try_get("priority_offset")?,
    })
}

fn release_from_row(row: &PgRow) -> Result<Release> {
    Ok(Release {
        id: ReleaseId(row.try_get::<Uuid, _>("id")?),
        tag: row.try_get("tag")?,
        product: row.try_get("product")?,
        version: row.try_get("version")?,
        active: row.try_get("active")?,
        parent: row.try_get::<Option<Uuid>, _>("parent")?.map(ReleaseId),
    })
}

fn analyzer_from_row(row: &PgRow) -> Result<ClientAnalyzer> {
    Ok(ClientAnalyzer {
        analyzer: row.try_get("analyzer")?,
        version: row.try_get("version")?,
        enabled: row.try_get("enabled")?,
        cli_name: row.try_get("cli_name")?,
        build_append: row.try_get("build_append")?,
        build_append_args: row.try_get("build_append_args")?,
    })
}

fn profile_from_row(row: &PgRow) -> Result<Profile> {
    Ok(Profile {
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        enabled: row.try_get("enabled")?,
        analyzers: row.try_get("analyzers")?,
        scanner_args: row.try_get("scanner_args")?,
    })
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    async fn environment_by_name(
        &self,
        name: &str,
    ) -> Result<Option<MockEnvironment>> {
        let row = sqlx::query("SELECT * FROM environments WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(MockEnvironment {
                id: EnvironmentId(row.try_get::<Uuid, _>("id")?),
                name: row.try_get("name")?,
                enabled: row.try_get("enabled")?,
            }),
            None => None,
        })
    }

    async fn release_mappings(&self) -> Result<Vec<ReleaseMapping>> {
        let rows = sqlx::query(
            "SELECT * FROM release_mappings ORDER BY priority",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(ReleaseMapping {
                    release_pattern: row.try_get("release_pattern")?,
                    template: row.try_get("template")?,
                    priority: row.try_get("priority")?,
                })
            })
            .collect()
    }

    async fn tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let row = sqlx::query("SELECT * FROM tags WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(Tag {
                name: row.try_get("name")?,
                environment: row.try_get("environment")?,
                release: ReleaseId(row.try_get::<Uuid, _>("release")?),
            }),
            None => None,
        })
    }

    async fn release_by_id(&self, id: ReleaseId) -> Result<Release> {
        let row = sqlx::query("SELECT * FROM releases WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("release {id}")))?;
        release_from_row(&row)
    }

    async fn release_by_tag(&self, tag: &str) -> Result<Option<Release>> {
        let row = sqlx::query("SELECT * FROM releases WHERE tag = $1")
            .bind(tag)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(release_from_row).transpose()
    }

    async fn package_by_name(&self, name: &str) -> Result<Option<Package>> {
        let row = sqlx::query("SELECT * FROM packages WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(package_from_row).transpose()
    }

    async fn get_or_create_package(&self, name: &str) -> Result<Package> {
        let row = sqlx::query(
            r#"
            INSERT INTO packages (id, name)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        package_from_row(&row)
    }

    async fn package_blocked_override(
        &self,
        package: PackageId,
        release: ReleaseId,
    ) -> Result<Option<bool>> {
        let row = sqlx::query(
            "SELECT blocked FROM package_release_attributes \
             WHERE package = $1 AND release = $2",
        )
        .bind(package.0)
        .bind(release.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("blocked")?),
            None => None,
        })
    }

    async fn analyzers(&self) -> Result<Vec<ClientAnalyzer>> {
        let rows =
            sqlx::query("SELECT * FROM client_analyzers ORDER BY analyzer")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(analyzer_from_row).collect()
    }

    async fn analyzer_by_cli_name(
        &self,
        name: &str,
    ) -> Result<Option<ClientAnalyzer>> {
        let row =
            sqlx::query("SELECT * FROM client_analyzers WHERE cli_name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(analyzer_from_row).transpose()
    }

    async fn profile_by_name(&self, name: &str) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn profiles(&self) -> Result<Vec<Profile>> {
        let rows = sqlx::query("SELECT * FROM profiles ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(profile_from_row).collect()
    }

    async fn checker_group_for(
        &self,
        checker: &str,
    ) -> Result<Option<String>> {
        let row =
            sqlx::query("SELECT checker_group FROM checkers WHERE name = $1")
                .bind(checker)
                .fetch_optional(&self.pool)
                .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("checker_group")?),
            None => None,
        })
    }

    async fn ensure_checker(&self, checker: &str, group: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkers (name, checker_group)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(checker)
        .bind(group)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
