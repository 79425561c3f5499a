//! Error types for provisioning and bulk loading.

use thiserror::Error;

/// Main error type for provisioning operations.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Configuration error (invalid YAML, missing fields, missing role password, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server unreachable or authentication failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Bad attribute specification, missing database, or unsafe identifier
    #[error("Schema validation error: {0}")]
    SchemaValidation(String),

    /// CREATE DATABASE could not run outside a transaction block
    #[error("Database creation error: {0}")]
    DatabaseCreation(String),

    /// Attempted to modify the administrative role
    #[error("Privilege safety violation: refusing to modify administrative role '{user}'")]
    PrivilegeSafetyViolation { user: String },

    /// Row field count does not match the insertable column count
    #[error("Row shape mismatch at data row {row}: expected {expected} fields, got {actual}")]
    RowShapeMismatch {
        row: u64,
        expected: usize,
        actual: usize,
    },

    /// A field exceeded the reader's field-size ceiling
    #[error("Field size exceeded at data row {row}: limit is {limit} bytes")]
    FieldSizeExceeded { row: u64, limit: usize },

    /// INSERT failed for a specific row
    #[error("Load failed for table {table} at data row {row}: {message}")]
    Load {
        table: String,
        row: u64,
        message: String,
    },

    /// Any other driver error
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Delimited file parse error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ProvisionError {
    /// Create a SchemaValidation error.
    pub fn schema(message: impl Into<String>) -> Self {
        ProvisionError::SchemaValidation(message.into())
    }

    /// Create a Load error for a row of a table.
    pub fn load(table: impl Into<String>, row: u64, message: impl Into<String>) -> Self {
        ProvisionError::Load {
            table: table.into(),
            row,
            message: message.into(),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            ProvisionError::Config(_) | ProvisionError::Yaml(_) => 1,
            ProvisionError::Connection(_) => 2,
            ProvisionError::SchemaValidation(_) | ProvisionError::DatabaseCreation(_) => 3,
            ProvisionError::PrivilegeSafetyViolation { .. } => 4,
            ProvisionError::RowShapeMismatch { .. }
            | ProvisionError::FieldSizeExceeded { .. }
            | ProvisionError::Load { .. } => 5,
            ProvisionError::Database(_) => 6,
            ProvisionError::Csv(_) | ProvisionError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;
