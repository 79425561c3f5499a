//! # pg-provision
//!
//! PostgreSQL provisioning and bulk-load library.
//!
//! This library creates databases and tables from a column specification,
//! streams delimited data files into them and grants read-only access to
//! named roles:
//!
//! - **Tables from a column spec** with `PRIMARY KEY`/`FOREIGN KEY`/`id` pseudo-keys
//! - **Streaming loads** of CSV and TSV files in bounded memory
//! - **Per-row commits** so an interrupted load keeps what it inserted
//! - **Read-only grants** that refuse to touch the administrative role
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use pg_provision::{ColumnSpec, Config, Provisioner};
//!
//! #[tokio::main]
//! async fn main() -> pg_provision::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let spec = ColumnSpec::load("people.yaml")?;
//!     let mut provisioner = Provisioner::from_config(&config).await?;
//!     provisioner.create_database("sales").await?;
//!     let mut provisioner = provisioner.switch_database("sales").await?;
//!     let stats = provisioner
//!         .create_table(Path::new("people.csv"), "sales", "people", &spec, &config.load)
//!         .await?;
//!     println!("Loaded {} rows", stats.rows_inserted);
//!     provisioner.close().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod identifier;
pub mod loader;
pub mod privilege;
pub mod provision;
pub mod reader;
pub mod schema;
pub mod session;
pub mod tls;


// Re-exports for convenient access
pub use config::{
    Config, ConnectionConfig, CredentialProfile, LoadConfig, ProvisionConfig, RowErrorPolicy,
};
pub use error::{ProvisionError, Result};
pub use loader::{BulkLoader, LoadOptions, LoadStats};
pub use privilege::{GrantReport, GrantState, PrivilegeManager, RoleSpec};
pub use provision::{HealthReport, Provisioner};
pub use reader::{ReadOptions, Row, RowReader};
pub use schema::ColumnSpec;
pub use session::{PgSession, Session, SessionMode};
pub use tls::SslMode;
