//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable holding the SQLite database path.
pub const ENV_SQLITE_PATH: &str = "SQLITE_DB_PATH";
/// Environment variable holding the PostgreSQL connection string.
pub const ENV_DATABASE_URL: &str = "MIGRATE_DATABASE_URL";
/// Environment variable holding the source batch size.
pub const ENV_BATCH_SIZE: &str = "BATCH_SIZE";
/// Environment variable enabling the source snapshot copy.
pub const ENV_SNAPSHOT: &str = "SQLITE_SNAPSHOT";
/// Environment variable overriding the destination schema.
pub const ENV_TARGET_SCHEMA: &str = "MIGRATE_TARGET_SCHEMA";
/// Environment variable overriding the TLS mode.
pub const ENV_SSL_MODE: &str = "MIGRATE_SSL_MODE";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// `from_env` delegates here; tests pass a map instead of mutating the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path: String = required(&lookup, ENV_SQLITE_PATH)?;
        let url: String = required(&lookup, ENV_DATABASE_URL)?;
        let batch_size = optional(&lookup, ENV_BATCH_SIZE)?.unwrap_or(DEFAULT_BATCH_SIZE);
        let snapshot = optional::<_, bool>(&lookup, ENV_SNAPSHOT)?.unwrap_or(false);
        let schema = lookup(ENV_TARGET_SCHEMA).unwrap_or_else(types::default_public_schema);
        let ssl_mode = lookup(ENV_SSL_MODE);

        let config = Config {
            source: SourceConfig {
                path: PathBuf::from(path),
                snapshot,
            },
            target: TargetConfig {
                url,
                schema,
                ssl_mode,
            },
            migration: MigrationConfig { batch_size },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

fn required<F, T>(lookup: &F, key: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    optional(lookup, key)?
        .ok_or_else(|| MigrateError::Config(format!("Missing environment variable: {}", key)))
}

fn optional<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| MigrateError::Config(format!("Invalid value for {}: {}", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_required_missing() {
        let err = Config::from_lookup(lookup_from(&[(ENV_DATABASE_URL, "postgres://db/x")]))
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("Missing environment variable: SQLITE_DB_PATH"));
    }

    #[test]
    fn test_env_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            (ENV_SQLITE_PATH, "/data/webui.db"),
            (ENV_DATABASE_URL, "postgres://db/openwebui"),
        ]))
        .unwrap();
        assert_eq!(config.source.path, PathBuf::from("/data/webui.db"));
        assert_eq!(config.migration.batch_size, 5_000);
        assert_eq!(config.target.schema, "public");
        assert!(!config.source.snapshot);
        assert!(config.target.ssl_mode.is_none());
    }

    #[test]
    fn test_env_cast() {
        let config = Config::from_lookup(lookup_from(&[
            (ENV_SQLITE_PATH, "/data/webui.db"),
            (ENV_DATABASE_URL, "postgres://db/openwebui"),
            (ENV_BATCH_SIZE, "123"),
            (ENV_SNAPSHOT, "true"),
        ]))
        .unwrap();
        assert_eq!(config.migration.batch_size, 123);
        assert!(config.source.snapshot);
    }

    #[test]
    fn test_env_invalid_cast() {
        let err = Config::from_lookup(lookup_from(&[
            (ENV_SQLITE_PATH, "/data/webui.db"),
            (ENV_DATABASE_URL, "postgres://db/openwebui"),
            (ENV_BATCH_SIZE, "not_an_int"),
        ]))
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("Invalid value for BATCH_SIZE: not_an_int"));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
source:
  path: /data/webui.db
  snapshot: true
target:
  url: postgres://webui:secret@db/openwebui
migration:
  batch_size: 2000
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.source.snapshot);
        assert_eq!(config.target.schema, "public");
        assert_eq!(config.migration.batch_size, 2000);
    }

    #[test]
    fn test_from_yaml_defaults_migration_section() {
        let yaml = r#"
source:
  path: webui.db
target:
  url: host=db dbname=openwebui
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.migration.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_from_yaml_rejects_zero_batch() {
        let yaml = r#"
source:
  path: webui.db
target:
  url: host=db dbname=openwebui
migration:
  batch_size: 0
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }
}
