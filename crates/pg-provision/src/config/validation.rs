//! Configuration validation.

use super::Config;
use crate::error::{ProvisionError, Result};
use crate::tls::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Connection validation
    if config.connection.host.is_empty() {
        return Err(ProvisionError::Config("connection.host is required".into()));
    }
    if config.connection.database.is_empty() {
        return Err(ProvisionError::Config(
            "connection.database is required".into(),
        ));
    }
    if config.connection.user.is_empty() {
        return Err(ProvisionError::Config("connection.user is required".into()));
    }
    if config.connection.port == 0 {
        return Err(ProvisionError::Config(
            "connection.port must be between 1 and 65535".into(),
        ));
    }
    SslMode::parse(&config.connection.ssl_mode)?;

    // Provision validation
    if config.provision.schema.is_empty() {
        return Err(ProvisionError::Config("provision.schema is required".into()));
    }
    if let Some(admin) = &config.provision.admin_user {
        if admin.is_empty() {
            return Err(ProvisionError::Config(
                "provision.admin_user cannot be empty when set".into(),
            ));
        }
    }

    // Load validation
    if config.load.commit_every == 0 {
        return Err(ProvisionError::Config(
            "load.commit_every must be at least 1".into(),
        ));
    }
    if let Some(0) = config.load.max_field_size {
        return Err(ProvisionError::Config(
            "load.max_field_size must be at least 1".into(),
        ));
    }

    Ok(())
}
