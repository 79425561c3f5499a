//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server connection parameters.
    pub connection: ConnectionConfig,

    /// Provisioning behavior.
    #[serde(default)]
    pub provision: ProvisionConfig,

    /// Bulk load behavior.
    #[serde(default)]
    pub load: LoadConfig,
}

/// PostgreSQL connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server host.
    pub host: String,

    /// Server port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database to connect to (default: "dbmaster").
    #[serde(default = "default_database")]
    pub database: String,

    /// Username. Also the administrative identity unless overridden.
    pub user: String,

    /// Password. Never written back out when the config is serialized.
    #[serde(skip_serializing)]
    pub password: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Provisioning behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Schema tables are created in and granted on (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// Administrative identity that must never be a grant target.
    /// Defaults to `connection.user` when not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_user: Option<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            schema: default_public_schema(),
            admin_user: None,
        }
    }
}

/// Bulk load behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Discard the first record of each data file (default: true).
    #[serde(default = "default_true")]
    pub has_header: bool,

    /// Literal substituted for empty fields (default: "99999").
    #[serde(default = "default_null_sentinel")]
    pub null_sentinel: String,

    /// What to do with rows whose field count is wrong (default: abort).
    #[serde(default)]
    pub on_row_error: RowErrorPolicy,

    /// Rows per commit (default: 1).
    #[serde(default = "default_commit_every")]
    pub commit_every: usize,

    /// Upper bound on a single field's size in bytes. Unset means the
    /// largest size the runtime can allocate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_field_size: Option<usize>,

    /// Load into a table that already exists instead of failing.
    #[serde(default)]
    pub skip_existing_table: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            has_header: true,
            null_sentinel: default_null_sentinel(),
            on_row_error: RowErrorPolicy::default(),
            commit_every: default_commit_every(),
            max_field_size: None,
            skip_existing_table: false,
        }
    }
}

/// Policy for rows whose field count differs from the column count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorPolicy {
    /// Stop the load at the first bad row.
    #[default]
    Abort,

    /// Log the bad row, count it as skipped and continue.
    Skip,
}

/// One section of a credential profile file.
///
/// Keys mirror the legacy `.lightsaildb-creds` layout.
#[derive(Clone, Deserialize)]
pub struct CredentialProfile {
    #[serde(rename = "USER")]
    pub user: String,

    #[serde(rename = "PASSWORD")]
    pub password: String,

    #[serde(rename = "ENDPOINT")]
    pub endpoint: String,

    #[serde(rename = "PSQL_PORT")]
    pub port: u16,
}

impl fmt::Debug for CredentialProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProfile")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .finish()
    }
}

/// Default credential profile section name.
pub const DEFAULT_PROFILE: &str = "default-lightsail";

// Default value functions for serde
pub(crate) fn default_pg_port() -> u16 {
    5432
}

pub(crate) fn default_database() -> String {
    "dbmaster".to_string()
}

pub(crate) fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_null_sentinel() -> String {
    "99999".to_string()
}

fn default_commit_every() -> usize {
    1
}

fn default_true() -> bool {
    true
}
