//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{ProvisionError, Result};
use std::collections::BTreeMap;
use std::path::Path;

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

    /// Build configuration from one section of a credential profile file.
    ///
    /// The file is a YAML mapping of section name to `USER`, `PASSWORD`,
    /// `ENDPOINT` and `PSQL_PORT`. `database` selects the database to connect
    /// to; `None` uses the default maintenance database.
    pub fn from_credentials<P: AsRef<Path>>(
        path: P,
        profile: &str,
        database: Option<&str>,
    ) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_credentials_yaml(&content, profile, database)
    }

    /// Parse a credential profile file from a YAML string.
    pub fn from_credentials_yaml(
        yaml: &str,
        profile: &str,
        database: Option<&str>,
    ) -> Result<Self> {
        let mut profiles: BTreeMap<String, CredentialProfile> = serde_yaml::from_str(yaml)?;
        let creds = profiles.remove(profile).ok_or_else(|| {
            ProvisionError::Config(format!(
                "credential profile '{}' not found (available: {})",
                profile,
                profiles.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })?;

        let config = Config {
            connection: ConnectionConfig {
                host: creds.endpoint,
                port: creds.port,
                database: database
                    .map(str::to_string)
                    .unwrap_or_else(types::default_database),
                user: creds.user,
                password: creds.password,
                ssl_mode: types::default_ssl_mode(),
            },
            provision: ProvisionConfig::default(),
            load: LoadConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// The administrative identity guarded against privilege changes.
    pub fn admin_user(&self) -> &str {
        self.provision
            .admin_user
            .as_deref()
            .unwrap_or(&self.connection.user)
    }
}

impl ConnectionConfig {
    /// Build a tokio-postgres configuration.
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&self.host);
        pg_config.port(self.port);
        pg_config.dbname(&self.database);
        pg_config.user(&self.user);
        pg_config.password(&self.password);
        pg_config.application_name("pg-provision");
        pg_config
    }

    /// Copy of this configuration pointing at another database.
    pub fn with_database(&self, database: &str) -> Self {
        let mut config = self.clone();
        config.database = database.to_string();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let yaml = r#"
connection:
  host: db.example.com
  user: dbmasteruser
  password: secret
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.connection.port, 5432);
        assert_eq!(config.connection.database, "dbmaster");
        assert_eq!(config.connection.ssl_mode, "disable");
        assert_eq!(config.provision.schema, "public");
        assert!(config.load.has_header);
        assert_eq!(config.load.null_sentinel, "99999");
        assert_eq!(config.load.on_row_error, RowErrorPolicy::Abort);
        assert_eq!(config.load.commit_every, 1);
        assert_eq!(config.admin_user(), "dbmasteruser");
    }

    #[test]
    fn test_from_yaml_load_section() {
        let yaml = r#"
connection:
  host: localhost
  user: admin
  password: pw
provision:
  admin_user: root
load:
  has_header: false
  null_sentinel: "-1"
  on_row_error: skip
  commit_every: 500
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert!(!config.load.has_header);
        assert_eq!(config.load.null_sentinel, "-1");
        assert_eq!(config.load.on_row_error, RowErrorPolicy::Skip);
        assert_eq!(config.load.commit_every, 500);
        assert_eq!(config.admin_user(), "root");
    }

    #[test]
    fn test_port_must_be_numeric() {
        let yaml = r#"
connection:
  host: localhost
  port: fivefourthreetwo
  user: admin
  password: pw
"#;
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ProvisionError::Yaml(_))
        ));
    }

    #[test]
    fn test_from_credentials_profile() {
        let yaml = r#"
default-lightsail:
  USER: dbmasteruser
  PASSWORD: hunter2
  ENDPOINT: ls-abc.eu-west-1.rds.amazonaws.com
  PSQL_PORT: 5432
"#;
        let config = Config::from_credentials_yaml(yaml, DEFAULT_PROFILE, Some("sales")).unwrap();
        assert_eq!(config.connection.host, "ls-abc.eu-west-1.rds.amazonaws.com");
        assert_eq!(config.connection.user, "dbmasteruser");
        assert_eq!(config.connection.database, "sales");
        assert_eq!(config.connection.port, 5432);
    }

    #[test]
    fn test_missing_credentials_profile() {
        let yaml = r#"
other:
  USER: u
  PASSWORD: p
  ENDPOINT: h
  PSQL_PORT: 5432
"#;
        let err = Config::from_credentials_yaml(yaml, DEFAULT_PROFILE, None).unwrap_err();
        assert!(err.to_string().contains("default-lightsail"));
        assert!(err.to_string().contains("other"));
    }

    #[test]
    fn test_password_not_serialized() {
        let yaml = r#"
connection:
  host: localhost
  user: admin
  password: super_secret
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let out = serde_yaml::to_string(&config).unwrap();
        assert!(!out.contains("super_secret"), "Password was serialized: {}", out);
    }

    #[test]
    fn test_with_database_keeps_credentials() {
        let config = ConnectionConfig {
            host: "h".into(),
            port: 5433,
            database: "dbmaster".into(),
            user: "u".into(),
            password: "p".into(),
            ssl_mode: "require".into(),
        };
        let other = config.with_database("sales");
        assert_eq!(other.database, "sales");
        assert_eq!(other.port, 5433);
        assert_eq!(other.ssl_mode, "require");
    }
}
