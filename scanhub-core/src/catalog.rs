//! Read-only reference lookups: environments, release tags, analyzers,
//! profiles, packages.

use std::collections::BTreeSet;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use scanhub_model::{
    ClientAnalyzer, MockEnvironment, Package, Profile, Release, ReleaseId,
    Tag,
};

use crate::error::{HubError, Result};
use crate::persistence::CatalogStore;

/// Checker-group bucket for checkers the catalog has never seen.
pub const DEFAULT_CHECKER_GROUP: &str = "Unsorted";

/// Sub-tool prefixes that route unknown checkers to a dedicated group.
const SUBTOOL_GROUPS: &[(&str, &str)] = &[("FB.", "FindBugs")];

/// Merged analyzer selection: profile defaults layered under the explicit
/// client selection, explicit arguments winning.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnalyzerSelection {
    /// Union of profile and explicit analyzer names, deduplicated.
    pub analyzers: BTreeSet<String>,
    /// Extra scanner arguments, profile args first so later (explicit)
    /// arguments take precedence.
    pub args: Vec<String>,
}

impl AnalyzerSelection {
    /// Scanner tool chain, `a,b,c`.
    pub fn chain(&self) -> String {
        self.analyzers.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

/// Stateless lookup service over the reference data store.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn CatalogStore>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}

impl Catalog {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Resolve an environment by name, rejecting unknown or disabled ones.
    pub async fn verify_environment(
        &self,
        name: &str,
    ) -> Result<MockEnvironment> {
        let env = self
            .store
            .environment_by_name(name)
            .await?
            .ok_or_else(|| {
                warn!("environment {name} does not exist");
                HubError::NotFound(format!("environment {name} does not exist"))
            })?;
        if !env.enabled {
            return Err(HubError::Validation(format!(
                "environment {name} is disabled"
            )));
        }
        Ok(env)
    }

    /// Resolve a raw release string ("RHEL-9.2.0.Z") to a tag through the
    /// ordered mapping rules.
    pub async fn tag_for_release(&self, release_str: &str) -> Result<Tag> {
        for mapping in self.store.release_mappings().await? {
            let Ok(re) = Regex::new(&mapping.release_pattern) else {
                warn!(
                    pattern = %mapping.release_pattern,
                    "skipping unparsable release mapping"
                );
                continue;
            };
            let Some(captures) = re.captures(release_str) else {
                continue;
            };
            let mut tag_name = mapping.template.clone();
            for group in captures
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str().to_string())
            {
                tag_name = tag_name.replacen("%s", &group, 1);
            }
            debug!(release = release_str, tag = %tag_name, "release mapped");
            if let Some(tag) = self.store.tag_by_name(&tag_name).await? {
                return Ok(tag);
            }
        }
        Err(HubError::Validation(format!(
            "packages in release {release_str} are not being scanned"
        )))
    }

    pub async fn release(&self, id: ReleaseId) -> Result<Release> {
        self.store.release_by_id(id).await
    }

    pub async fn release_by_tag(&self, tag: &str) -> Result<Option<Release>> {
        self.store.release_by_tag(tag).await
    }

    /// Verify every analyzer in the client's selection exists and is
    /// enabled.
    pub async fn verify_analyzers(
        &self,
        cli_names: &[String],
    ) -> Result<Vec<ClientAnalyzer>> {
        let mut verified = Vec::with_capacity(cli_names.len());
        for name in cli_names {
            let analyzer = self
                .store
                .analyzer_by_cli_name(name)
                .await?
                .ok_or_else(|| {
                    HubError::Validation(format!(
                        "analyzer {name} doesn't exist"
                    ))
                })?;
            if !analyzer.enabled {
                return Err(HubError::Validation(format!(
                    "analyzer {name} is disabled"
                )));
            }
            verified.push(analyzer);
        }
        Ok(verified)
    }

    /// `None` when all analyzers in the chain are available, otherwise the
    /// message clients expect verbatim.
    pub async fn check_analyzers(&self, chain: &str) -> Result<Option<String>> {
        for name in chain_to_list(chain) {
            let known = self
                .store
                .analyzer_by_cli_name(&name)
                .await?
                .is_some_and(|a| a.enabled);
            if !known {
                return Ok(Some(format!("Analyzer {name} is not available.")));
            }
        }
        Ok(None)
    }

    pub async fn profile(&self, name: &str) -> Result<Profile> {
        self.store.profile_by_name(name).await?.ok_or_else(|| {
            HubError::NotFound(format!("profile {name} does not exist"))
        })
    }

    pub async fn list_analyzers(&self) -> Result<Vec<ClientAnalyzer>> {
        Ok(self
            .store
            .analyzers()
            .await?
            .into_iter()
            .filter(|a| a.enabled)
            .collect())
    }

    pub async fn list_profiles(&self) -> Result<Vec<Profile>> {
        Ok(self
            .store
            .profiles()
            .await?
            .into_iter()
            .filter(|p| p.enabled)
            .collect())
    }

    pub async fn package_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Package>> {
        self.store.package_by_name(name).await
    }

    pub async fn get_or_create_package(&self, name: &str) -> Result<Package> {
        self.store.get_or_create_package(name).await
    }

    /// The release-scoped override wins over the package-level flag.
    pub async fn is_blocked(
        &self,
        package: &Package,
        release: ReleaseId,
    ) -> Result<bool> {
        match self
            .store
            .package_blocked_override(package.id, release)
            .await?
        {
            Some(blocked) => Ok(blocked),
            None => Ok(package.blocked),
        }
    }

    /// Resolve the checker group for a checker, falling back to the
    /// sub-tool prefix rule and the default group for unknown checkers.
    /// First sight of a checker registers it.
    pub async fn checker_group(&self, checker: &str) -> Result<String> {
        if let Some(group) = self.store.checker_group_for(checker).await? {
            return Ok(group);
        }
        let group = SUBTOOL_GROUPS
            .iter()
            .find(|(prefix, _)| checker.starts_with(prefix))
            .map(|(_, group)| *group)
            .unwrap_or(DEFAULT_CHECKER_GROUP);
        self.store.ensure_checker(checker, group).await?;
        Ok(group.to_string())
    }

    pub async fn blocked_check(
        &self,
        package: &Package,
        release: ReleaseId,
    ) -> Result<()> {
        if self.is_blocked(package, release).await? {
            return Err(HubError::Ineligible(format!(
                "Package {} is blocked.",
                package.name
            )));
        }
        Ok(())
    }
}

/// Split a client analyzer chain on the accepted separators.
pub fn chain_to_list(chain: &str) -> Vec<String> {
    chain
        .trim()
        .split([';', ',', ':'])
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Merge a profile's defaults with the explicit selection. Profile supplies
/// defaults; explicit analyzers and their extra arguments are layered on
/// top, and explicit arguments come last so they take precedence.
pub fn merge_selection(
    profile: &Profile,
    explicit: &[ClientAnalyzer],
) -> AnalyzerSelection {
    let mut analyzers: BTreeSet<String> =
        profile.analyzers.iter().cloned().collect();
    let mut args = Vec::new();
    if let Some(profile_args) = profile
        .scanner_args
        .as_ref()
        .filter(|args| !args.is_empty())
    {
        args.push(profile_args.clone());
    }
    for analyzer in explicit {
        if let Some(token) = analyzer
            .build_append
            .as_ref()
            .filter(|token| !token.is_empty())
        {
            analyzers.insert(token.clone());
        }
        if let Some(extra) = analyzer
            .build_append_args
            .as_ref()
            .filter(|extra| !extra.is_empty())
        {
            args.push(extra.clone());
        }
    }
    AnalyzerSelection { analyzers, args }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer(cli: &str, append: &str, extra: Option<&str>) -> ClientAnalyzer {
        ClientAnalyzer {
            analyzer: cli.to_string(),
            version: None,
            enabled: true,
            cli_name: cli.to_string(),
            build_append: Some(append.to_string()),
            build_append_args: extra.map(str::to_string),
        }
    }

    #[test]
    fn chain_splits_on_all_separators() {
        assert_eq!(
            chain_to_list(" cppcheck,clang;gcc:shellcheck "),
            vec!["cppcheck", "clang", "gcc", "shellcheck"]
        );
    }

    #[test]
    fn merge_is_a_union_with_explicit_args_last() {
        let profile = Profile {
            name: "c".into(),
            description: None,
            enabled: true,
            analyzers: vec!["gcc".into(), "cppcheck".into()],
            scanner_args: Some("--keep-going".into()),
        };
        let explicit = vec![
            analyzer("cppcheck", "cppcheck", Some("--use-host-cppcheck")),
            analyzer("clang", "clang", None),
        ];
        let selection = merge_selection(&profile, &explicit);
        assert_eq!(
            selection.chain(),
            "clang,cppcheck,gcc",
            "union, deduplicated"
        );
        assert_eq!(
            selection.args,
            vec!["--keep-going".to_string(), "--use-host-cppcheck".to_string()],
            "profile args first, explicit args override"
        );
    }
}
