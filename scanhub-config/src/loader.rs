use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use thiserror::Error;

use crate::models::HubConfig;

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("failed to read configuration: {0}")]
    Read(#[from] config::ConfigError),
}

/// Load the hub configuration.
///
/// Sources are layered lowest-to-highest: built-in defaults, an optional
/// TOML file, then `SCANHUB_`-prefixed environment variables
/// (`SCANHUB_SERVER__PORT=8080` overrides `server.port`).
pub fn load_config(path: Option<&Path>) -> Result<HubConfig, ConfigLoadError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(
            File::from(path).format(FileFormat::Toml).required(true),
        );
    }
    let settings = builder
        .add_source(Environment::with_prefix("SCANHUB").separator("__"))
        .build()?;
    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_apply_without_a_file() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.scanning.default_priority, 10);
        assert_eq!(cfg.scanning.elevated_priority_threshold, 20);
        assert!(cfg.scanning.version_exempt_analyzers.contains(&"gcc".into()));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[scanning]\nversion_cache_ttl_hours = 6\n\n[server]\nport = 9999"
        )
        .unwrap();
        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.scanning.version_cache_ttl_hours, 6);
        assert_eq!(cfg.server.port, 9999);
        // untouched sections keep their defaults
        assert_eq!(cfg.scanning.container_priority, 8);
    }
}
