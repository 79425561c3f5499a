//! Database and table provisioning over a single session.
//!
//! [`Provisioner`] owns the one connection used for the whole run. Catalog
//! lookups happen immediately before each create and are never cached; check
//! and create are not atomic, which is acceptable for a single-operator tool.

use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::{Config, ConnectionConfig, LoadConfig, ProvisionConfig};
use crate::error::{ProvisionError, Result};
use crate::identifier::quote_pg;
use crate::loader::{BulkLoader, LoadOptions, LoadStats};
use crate::privilege::PrivilegeManager;
use crate::reader::{ReadOptions, Row, RowReader};
use crate::schema::ColumnSpec;
use crate::session::{PgSession, Session, SessionMode};

/// Result of [`Provisioner::health_check`].
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub database: String,
    pub server_version: String,
    pub latency: Duration,
}

/// Creates databases and tables and loads data through one session.
pub struct Provisioner<S: Session = PgSession> {
    session: S,
    /// Set when the session was opened here, so it can be reopened elsewhere.
    connection: Option<ConnectionConfig>,
    config: ProvisionConfig,
    admin_user: String,
    progress_counter: Option<Arc<AtomicU64>>,
}

impl Provisioner<PgSession> {
    /// Connect with resolved parameters.
    pub async fn connect(connection: &ConnectionConfig, config: &ProvisionConfig) -> Result<Self> {
        let session = PgSession::connect(connection).await?;
        let admin_user = config
            .admin_user
            .clone()
            .unwrap_or_else(|| connection.user.clone());
        Ok(Self {
            session,
            connection: Some(connection.clone()),
            config: config.clone(),
            admin_user,
            progress_counter: None,
        })
    }

    /// Connect using a loaded [`Config`].
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::connect(&config.connection, &config.provision).await
    }

    /// Close this session and reconnect to another database with the same
    /// credentials. Tables are always created in the connected database.
    pub async fn switch_database(self, database: &str) -> Result<Self> {
        let connection = self
            .connection
            .as_ref()
            .map(|c| c.with_database(database))
            .ok_or_else(|| {
                ProvisionError::Config("session has no connection parameters".to_string())
            })?;
        let config = self.config.clone();
        let admin_user = self.admin_user.clone();
        let progress_counter = self.progress_counter.clone();
        self.session.close().await?;

        info!("Switching to database {}", database);
        let session = PgSession::connect(&connection).await?;
        Ok(Self {
            session,
            connection: Some(connection),
            config,
            admin_user,
            progress_counter,
        })
    }
}

impl<S: Session> Provisioner<S> {
    /// Wrap an already open session.
    pub fn with_session(session: S, config: ProvisionConfig, admin_user: impl Into<String>) -> Self {
        Self {
            session,
            connection: None,
            config,
            admin_user: admin_user.into(),
            progress_counter: None,
        }
    }

    /// Set a shared counter of committed rows.
    pub fn with_progress_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.progress_counter = Some(counter);
        self
    }

    /// The underlying session.
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Database the session is connected to.
    pub fn database(&self) -> &str {
        self.session.database()
    }

    /// Names of all databases on the server.
    pub async fn list_databases(&mut self) -> Result<Vec<String>> {
        self.session
            .query_column("SELECT datname FROM pg_database ORDER BY datname", &[])
            .await
    }

    /// Whether a database with exactly this name exists.
    pub async fn database_exists(&mut self, name: &str) -> Result<bool> {
        Ok(self.list_databases().await?.iter().any(|d| d == name))
    }

    /// Names of the tables in the configured schema.
    pub async fn list_tables(&mut self) -> Result<Vec<String>> {
        self.session
            .query_column(
                "SELECT tablename FROM pg_tables WHERE schemaname = $1 ORDER BY tablename",
                &[self.config.schema.as_str()],
            )
            .await
    }

    /// Create a database. Returns `false` when it already existed.
    ///
    /// `CREATE DATABASE` cannot run inside a transaction block, so the
    /// statement runs in autocommit mode and the previous mode is restored
    /// afterwards.
    pub async fn create_database(&mut self, name: &str) -> Result<bool> {
        let ident = quote_pg(name)?;

        if self.session.in_transaction() {
            return Err(ProvisionError::DatabaseCreation(format!(
                "CREATE DATABASE {} cannot run inside a transaction block; commit or roll back first",
                ident
            )));
        }

        if self.database_exists(name).await? {
            info!("Database {} already exists, skipping", name);
            return Ok(false);
        }

        let previous = self.session.mode();
        self.session.set_mode(SessionMode::Autocommit).await?;
        let sql = format!("CREATE DATABASE {}", ident);
        let result = self.session.execute(&sql, &[]).await;
        self.session.set_mode(previous).await?;

        result.map_err(|e| ProvisionError::DatabaseCreation(format!("{}: {}", name, e)))?;
        info!("{}\tOK", sql);
        Ok(true)
    }

    /// Validate and create a table. Returns `false` when the table already
    /// existed and `skip_existing` is set.
    ///
    /// The DDL commits in its own transaction, before any data is loaded.
    pub async fn create_table_schema(
        &mut self,
        dbname: &str,
        tablename: &str,
        spec: &ColumnSpec,
        skip_existing: bool,
    ) -> Result<bool> {
        if !self.database_exists(dbname).await? {
            return Err(ProvisionError::schema(format!(
                "database does not exist: {}",
                dbname
            )));
        }
        if self.session.database() != dbname {
            return Err(ProvisionError::schema(format!(
                "session is connected to database '{}', not '{}'; reconnect to '{}' to create tables in it",
                self.session.database(),
                dbname,
                dbname
            )));
        }
        spec.validate()?;
        let sql = spec.create_table_statement(&self.config.schema, tablename)?;

        if self.list_tables().await?.iter().any(|t| t == tablename) {
            if skip_existing {
                info!("Table {}.{} already exists, skipping DDL", self.config.schema, tablename);
                return Ok(false);
            }
            return Err(ProvisionError::schema(format!(
                "table already exists: {}.{}",
                self.config.schema, tablename
            )));
        }

        if self.session.mode() != SessionMode::Transactional {
            self.session.set_mode(SessionMode::Transactional).await?;
        }
        if let Err(e) = self.session.execute(&sql, &[]).await {
            self.session.rollback().await?;
            return Err(e);
        }
        self.session.commit().await?;
        info!("{}\tOK", sql);
        Ok(true)
    }

    /// Stream rows into an existing table.
    pub async fn load_rows<I>(
        &mut self,
        tablename: &str,
        columns: &[String],
        rows: I,
        options: &LoadOptions,
    ) -> Result<LoadStats>
    where
        I: IntoIterator<Item = Result<Row>>,
    {
        let mut loader = BulkLoader::new(&mut self.session, options.clone());
        if let Some(counter) = &self.progress_counter {
            loader = loader.with_progress_counter(Arc::clone(counter));
        }
        loader
            .load(&self.config.schema, tablename, columns, rows)
            .await
    }

    /// Stream a delimited file into an existing table.
    pub async fn load_table(
        &mut self,
        data: &Path,
        tablename: &str,
        columns: &[String],
        load: &LoadConfig,
    ) -> Result<LoadStats> {
        let reader = RowReader::open(data, &ReadOptions::from(load))?;
        self.load_rows(tablename, columns, reader, &LoadOptions::from(load))
            .await
    }

    /// Create a table from `spec` in `dbname` and load `data` into it.
    pub async fn create_table(
        &mut self,
        data: &Path,
        dbname: &str,
        tablename: &str,
        spec: &ColumnSpec,
        load: &LoadConfig,
    ) -> Result<LoadStats> {
        // Opening first means a missing file fails before any DDL runs.
        let reader = RowReader::open(data, &ReadOptions::from(load))?;
        self.create_table_schema(dbname, tablename, spec, load.skip_existing_table)
            .await?;

        let columns = spec.insertable_columns();
        debug!("Insertable columns for {}: {:?}", tablename, columns);
        self.load_rows(tablename, &columns, reader, &LoadOptions::from(load))
            .await
    }

    /// Borrow the session for privilege management.
    pub fn privileges(&mut self) -> PrivilegeManager<'_, S> {
        PrivilegeManager::new(&mut self.session, self.admin_user.clone(), self.config.schema.clone())
    }

    /// Round-trip a trivial query and report the server version.
    pub async fn health_check(&mut self) -> Result<HealthReport> {
        let start = Instant::now();
        let version = self.session.query_column("SELECT version()", &[]).await?;
        Ok(HealthReport {
            database: self.session.database().to_string(),
            server_version: version.into_iter().next().unwrap_or_default(),
            latency: start.elapsed(),
        })
    }

    /// Close the connection.
    pub async fn close(self) -> Result<()> {
        self.session.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::recording::{CallKind, RecordingSession};
    use std::io::Write;

    fn provisioner(session: RecordingSession) -> Provisioner<RecordingSession> {
        Provisioner::with_session(session, ProvisionConfig::default(), "dbmasteruser")
    }

    fn people_spec() -> ColumnSpec {
        ColumnSpec::from_pairs([("id", "SERIAL"), ("name", "text"), ("age", "integer")]).unwrap()
    }

    fn data_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_list_databases_queries_catalog() {
        let session =
            RecordingSession::new("dbmaster").with_response("pg_database", &["dbmaster", "postgres"]);
        let mut p = provisioner(session);
        assert_eq!(p.list_databases().await.unwrap(), vec!["dbmaster", "postgres"]);
        assert!(p.session().calls[0].sql.contains("FROM pg_database"));
    }

    #[tokio::test]
    async fn test_create_database_runs_in_autocommit() {
        let session = RecordingSession::new("dbmaster").with_response("pg_database", &["dbmaster"]);
        let mut p = provisioner(session);

        assert!(p.create_database("sales").await.unwrap());

        let create = p
            .session()
            .calls
            .iter()
            .find(|c| c.sql.starts_with("CREATE DATABASE"))
            .unwrap();
        assert_eq!(create.sql, "CREATE DATABASE \"sales\"");
        assert_eq!(create.mode, SessionMode::Autocommit);
        assert!(!create.in_transaction);
        // Mode is restored afterwards.
        assert_eq!(p.session().mode(), SessionMode::Transactional);
    }

    #[tokio::test]
    async fn test_create_database_skips_existing() {
        let session =
            RecordingSession::new("dbmaster").with_response("pg_database", &["dbmaster", "sales"]);
        let mut p = provisioner(session);

        assert!(!p.create_database("sales").await.unwrap());
        assert!(p.session().executed().is_empty());
    }

    #[tokio::test]
    async fn test_create_database_refused_inside_transaction() {
        let mut session = RecordingSession::new("dbmaster");
        session.execute("SELECT 1", &[]).await.unwrap();
        let mut p = provisioner(session);

        let err = p.create_database("sales").await.unwrap_err();
        assert!(matches!(err, ProvisionError::DatabaseCreation(_)));
        assert!(p
            .session()
            .calls
            .iter()
            .all(|c| !c.sql.starts_with("CREATE DATABASE")));
    }

    #[tokio::test]
    async fn test_create_table_missing_database() {
        let session = RecordingSession::new("dbmaster").with_response("pg_database", &["dbmaster"]);
        let mut p = provisioner(session);
        let file = data_file("name,age\nAda,36\n");

        let err = p
            .create_table(file.path(), "nope", "people", &people_spec(), &LoadConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::SchemaValidation(_)));
        assert!(err.to_string().contains("database does not exist"));
        assert!(p.session().executed().is_empty());
    }

    #[tokio::test]
    async fn test_create_table_in_other_database_rejected() {
        let session =
            RecordingSession::new("dbmaster").with_response("pg_database", &["dbmaster", "sales"]);
        let mut p = provisioner(session);

        let err = p
            .create_table_schema("sales", "people", &people_spec(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reconnect"));
        assert!(p.session().executed().is_empty());
    }

    #[tokio::test]
    async fn test_create_table_invalid_spec_runs_no_ddl() {
        let session = RecordingSession::new("sales").with_response("pg_database", &["sales"]);
        let mut p = provisioner(session);
        let spec = ColumnSpec::from_pairs([("id", "SERIAL")]).unwrap();

        let err = p
            .create_table_schema("sales", "people", &spec, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid attribute specification"));
        assert!(p.session().executed().is_empty());
    }

    #[tokio::test]
    async fn test_create_table_commits_ddl_before_load() {
        let session = RecordingSession::new("sales").with_response("pg_database", &["sales"]);
        let mut p = provisioner(session);
        let file = data_file("name,age\nAda,36\nAlan,\n");

        let stats = p
            .create_table(file.path(), "sales", "people", &people_spec(), &LoadConfig::default())
            .await
            .unwrap();
        assert_eq!(stats.rows_inserted, 2);

        let calls = &p.session().calls;
        let ddl_pos = calls
            .iter()
            .position(|c| c.sql.starts_with("CREATE TABLE"))
            .unwrap();
        assert_eq!(
            calls[ddl_pos].sql,
            "CREATE TABLE \"public\".\"people\" (\"id\" SERIAL, \"name\" text, \"age\" integer)"
        );
        assert_eq!(calls[ddl_pos + 1].kind, CallKind::Commit);
        assert!(calls[ddl_pos + 2].sql.starts_with("INSERT INTO"));

        let inserts = p.session().committed_matching("INSERT INTO");
        assert_eq!(inserts[0].params, vec!["Ada", "36"]);
        assert_eq!(inserts[1].params, vec!["Alan", "99999"]);
    }

    #[tokio::test]
    async fn test_load_failure_keeps_table_definition() {
        let session = RecordingSession::new("sales")
            .with_response("pg_database", &["sales"])
            .failing_on("INSERT", 1);
        let mut p = provisioner(session);
        let file = data_file("name,age\nAda,not-a-number\n");

        let err = p
            .create_table(file.path(), "sales", "people", &people_spec(), &LoadConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Load { row: 1, .. }));
        assert_eq!(p.session().committed_matching("CREATE TABLE").len(), 1);
    }

    #[tokio::test]
    async fn test_existing_table_rejected_unless_skipped() {
        let session = RecordingSession::new("sales")
            .with_response("pg_database", &["sales"])
            .with_response("pg_tables", &["people"]);
        let mut p = provisioner(session);

        let err = p
            .create_table_schema("sales", "people", &people_spec(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        assert!(!p
            .create_table_schema("sales", "people", &people_spec(), true)
            .await
            .unwrap());
        assert!(p.session().executed().is_empty());
    }

    #[tokio::test]
    async fn test_missing_data_file_fails_before_ddl() {
        let session = RecordingSession::new("sales").with_response("pg_database", &["sales"]);
        let mut p = provisioner(session);

        let err = p
            .create_table(
                Path::new("/nonexistent/people.csv"),
                "sales",
                "people",
                &people_spec(),
                &LoadConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Io(_)));
        assert!(p.session().calls.is_empty());
    }

    #[tokio::test]
    async fn test_privileges_use_admin_guard() {
        let session = RecordingSession::new("sales");
        let mut p = provisioner(session);

        let err = p
            .privileges()
            .grant_read_only("sales", "dbmasteruser", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::PrivilegeSafetyViolation { .. }));
        assert!(p.session().calls.is_empty());
    }

    #[tokio::test]
    async fn test_progress_counter_shared_with_loader() {
        let session = RecordingSession::new("sales");
        let counter = Arc::new(AtomicU64::new(0));
        let mut p = provisioner(session).with_progress_counter(Arc::clone(&counter));
        let rows = vec![
            Ok(Row {
                index: 1,
                fields: vec!["a".to_string()],
            }),
            Ok(Row {
                index: 2,
                fields: vec!["b".to_string()],
            }),
        ];

        p.load_rows("t", &["v".to_string()], rows, &LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_health_check_reports_version() {
        let session = RecordingSession::new("sales").with_response("version()", &["PostgreSQL 16.2"]);
        let mut p = provisioner(session);
        let report = p.health_check().await.unwrap();
        assert_eq!(report.server_version, "PostgreSQL 16.2");
        assert_eq!(report.database, "sales");
    }
}
