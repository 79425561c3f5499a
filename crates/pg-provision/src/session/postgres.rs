//! tokio-postgres backed session.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Statement};
use tracing::{debug, info, warn};

use super::{Session, SessionMode, TextParam};
use crate::config::ConnectionConfig;
use crate::error::{ProvisionError, Result};
use crate::tls::SslMode;

/// One physical PostgreSQL connection.
pub struct PgSession {
    client: Client,
    database: String,
    mode: SessionMode,
    in_transaction: bool,
    /// Prepared statements keyed by SQL text, reused for every row of a load.
    statements: HashMap<String, Statement>,
    connection_task: JoinHandle<()>,
}

impl PgSession {
    /// Connect using resolved connection parameters.
    ///
    /// Unreachable servers and rejected credentials surface as
    /// [`ProvisionError::Connection`]; there is no retry.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let pg_config = config.pg_config();
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let target = format!("{}:{}/{}", config.host, config.port, config.database);

        let (client, connection_task) = match ssl_mode.connector()? {
            Some(tls) => {
                let (client, connection) = pg_config
                    .connect(tls)
                    .await
                    .map_err(|e| connection_error(&target, e))?;
                let task = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection closed with error: {}", e);
                    }
                });
                (client, task)
            }
            None => {
                let (client, connection) = pg_config
                    .connect(NoTls)
                    .await
                    .map_err(|e| connection_error(&target, e))?;
                let task = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection closed with error: {}", e);
                    }
                });
                (client, task)
            }
        };

        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| connection_error(&target, e))?;

        info!("Connected to PostgreSQL: {}", target);

        Ok(Self {
            client,
            database: config.database.clone(),
            mode: SessionMode::default(),
            in_transaction: false,
            statements: HashMap::new(),
            connection_task,
        })
    }

    async fn begin_if_needed(&mut self) -> Result<()> {
        if self.mode == SessionMode::Transactional && !self.in_transaction {
            self.client.batch_execute("BEGIN").await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// Prepare `sql` once per session and hand out the cached statement.
    async fn prepared(&mut self, sql: &str) -> Result<Statement> {
        if let Some(statement) = self.statements.get(sql) {
            return Ok(statement.clone());
        }
        let statement = self.client.prepare(sql).await?;
        debug!("Prepared: {}", sql);
        self.statements.insert(sql.to_string(), statement.clone());
        Ok(statement)
    }

    #[cfg(test)]
    pub(crate) fn cached_statements(&self) -> usize {
        self.statements.len()
    }
}

fn connection_error(target: &str, e: tokio_postgres::Error) -> ProvisionError {
    ProvisionError::Connection(format!("{}: {}", target, e))
}

#[async_trait]
impl Session for PgSession {
    fn database(&self) -> &str {
        &self.database
    }

    fn mode(&self) -> SessionMode {
        self.mode
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn set_mode(&mut self, mode: SessionMode) -> Result<()> {
        if self.in_transaction && mode != self.mode {
            return Err(ProvisionError::Config(
                "cannot change session mode inside a transaction block".to_string(),
            ));
        }
        debug!("Session mode: {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64> {
        self.begin_if_needed().await?;

        if params.is_empty() {
            // Simple protocol: utility statements like CREATE DATABASE
            // must not be wrapped in an implicit extended-protocol transaction.
            self.client.batch_execute(sql).await?;
            return Ok(0);
        }

        let text_params: Vec<TextParam<'_>> = params.iter().map(|p| TextParam(p)).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = text_params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();
        let statement = self.prepared(sql).await?;
        Ok(self.client.execute(&statement, &refs).await?)
    }

    async fn query_column(&mut self, sql: &str, params: &[&str]) -> Result<Vec<String>> {
        let text_params: Vec<TextParam<'_>> = params.iter().map(|p| TextParam(p)).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = text_params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();

        let rows = self.client.query(sql, &refs).await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(ProvisionError::from))
            .collect()
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.client.batch_execute("COMMIT").await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.client.batch_execute("ROLLBACK").await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn close(mut self) -> Result<()> {
        if self.in_transaction {
            warn!("Closing session with an open transaction; rolling back");
            self.rollback().await?;
        }
        let PgSession {
            client,
            connection_task,
            database,
            ..
        } = self;
        drop(client);
        if let Err(e) = connection_task.await {
            warn!("Connection task for {} did not shut down cleanly: {}", database, e);
        }
        debug!("Closed session for {}", database);
        Ok(())
    }
}
