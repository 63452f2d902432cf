//! Task priority resolution.

use std::sync::Arc;

use scanhub_config::ScanningConfig;

use crate::catalog::Catalog;
use crate::error::{HubError, Result};
use crate::persistence::package_name_candidates;
use crate::scheduler::request::Principal;

/// Compute the priority of a scheduled task.
///
/// An explicit priority is honored as-is, except that values at or above
/// the elevation threshold require an elevated principal. Absent an
/// explicit value, the package's priority offset is resolved by trying the
/// parsed build name, the artifact-name heuristics, and the whole artifact
/// name in order; the first package record found wins. The result is
/// clamped to be non-negative.
pub async fn determine_priority(
    catalog: &Arc<Catalog>,
    config: &ScanningConfig,
    principal: &Principal,
    explicit: Option<i32>,
    supposed_nvr: Option<&str>,
    artifact_name: Option<&str>,
    is_tarball: bool,
) -> Result<i32> {
    if let Some(priority) = explicit {
        if priority >= config.elevated_priority_threshold
            && !principal.elevated
        {
            return Err(HubError::Validation(format!(
                "only an elevated principal may set priority above {}",
                config.elevated_priority_threshold
            )));
        }
        return Ok(priority);
    }

    let mut offset: i32 = 0;
    for name in
        package_name_candidates(supposed_nvr, artifact_name, is_tarball)
    {
        if let Some(package) = catalog.package_by_name(&name).await? {
            offset = i32::from(package.priority_offset);
            break;
        }
    }

    Ok((config.default_priority + offset).max(0))
}

#[cfg(test)]
mod tests {
    use scanhub_model::{Package, PackageId};

    use super::*;
    use crate::persistence::memory::MemoryStore;

    fn principal(elevated: bool) -> Principal {
        Principal {
            username: "alice".into(),
            elevated,
        }
    }

    async fn catalog_with_package(offset: i16) -> Arc<Catalog> {
        let store = Arc::new(MemoryStore::default());
        store.put_package(Package {
            id: PackageId::new(),
            name: "expat".into(),
            blocked: false,
            priority_offset: offset,
        });
        Arc::new(Catalog::new(store))
    }

    #[tokio::test]
    async fn default_priority_without_package_record() {
        let catalog = Arc::new(Catalog::new(Arc::new(MemoryStore::default())));
        let priority = determine_priority(
            &catalog,
            &ScanningConfig::default(),
            &principal(false),
            None,
            Some("unknown-1.0-1.el9"),
            None,
            false,
        )
        .await
        .unwrap();
        assert_eq!(priority, 10);
    }

    #[tokio::test]
    async fn package_offset_is_applied_and_clamped() {
        let catalog = catalog_with_package(-30).await;
        let priority = determine_priority(
            &catalog,
            &ScanningConfig::default(),
            &principal(false),
            None,
            Some("expat-2.5.0-1.el9"),
            None,
            false,
        )
        .await
        .unwrap();
        assert_eq!(priority, 0, "priority must stay non-negative");
    }

    #[tokio::test]
    async fn high_explicit_priority_requires_elevation() {
        let catalog = Arc::new(Catalog::new(Arc::new(MemoryStore::default())));
        let config = ScanningConfig::default();
        let denied = determine_priority(
            &catalog,
            &config,
            &principal(false),
            Some(20),
            None,
            None,
            false,
        )
        .await;
        assert!(matches!(denied, Err(HubError::Validation(_))));

        let allowed = determine_priority(
            &catalog,
            &config,
            &principal(true),
            Some(20),
            None,
            None,
            false,
        )
        .await
        .unwrap();
        assert_eq!(allowed, 20);
    }
}
