//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.source.path.as_os_str().is_empty() {
        return Err(MigrateError::Config("source.path is required".into()));
    }

    if config.target.url.trim().is_empty() {
        return Err(MigrateError::Config("target.url is required".into()));
    }
    if config.target.schema.is_empty() {
        return Err(MigrateError::Config("target.schema cannot be empty".into()));
    }
    if let Some(mode) = &config.target.ssl_mode {
        crate::target::SslMode::parse(mode)?;
    }

    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }

    Ok(())
}
