//! Row-by-row bulk loading into an existing table.
//!
//! Every row is checked against the insertable column count, bound
//! positionally as text and inserted with a parameterized statement. Commits
//! happen every `commit_every` rows; the default of 1 makes each row durable
//! on its own, so an interrupted load keeps everything up to the last row
//! inserted. With a larger `commit_every`, an interruption or a failing
//! INSERT loses the uncommitted rows of the current batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{LoadConfig, RowErrorPolicy};
use crate::error::{ProvisionError, Result};
use crate::reader::Row;
use crate::schema::insert_statement;
use crate::session::{Session, SessionMode};

/// Bulk load behavior.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// What to do with rows of the wrong width.
    pub on_row_error: RowErrorPolicy,
    /// Rows per commit.
    pub commit_every: usize,
    /// Replacement for empty fields.
    pub null_sentinel: String,
    /// Log a progress line every this many inserted rows.
    pub progress_interval: u64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            on_row_error: RowErrorPolicy::Abort,
            commit_every: 1,
            null_sentinel: "99999".to_string(),
            progress_interval: 10_000,
        }
    }
}

impl From<&LoadConfig> for LoadOptions {
    fn from(config: &LoadConfig) -> Self {
        Self {
            on_row_error: config.on_row_error,
            commit_every: config.commit_every.max(1),
            null_sentinel: config.null_sentinel.clone(),
            ..Self::default()
        }
    }
}

/// Statistics for a finished load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadStats {
    /// Data rows pulled from the reader.
    pub rows_read: u64,
    /// Rows inserted and committed.
    pub rows_inserted: u64,
    /// Rows rejected under [`RowErrorPolicy::Skip`].
    pub rows_skipped: u64,
    /// COMMIT statements issued.
    pub commits: u64,
    /// Wall time of the load.
    pub duration: Duration,
}

impl LoadStats {
    /// Inserted rows per second, 0 for an instant load.
    pub fn rows_per_second(&self) -> u64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            (self.rows_inserted as f64 / secs) as u64
        } else {
            0
        }
    }
}

/// Streams rows into one table over a borrowed session.
pub struct BulkLoader<'a, S: Session> {
    session: &'a mut S,
    options: LoadOptions,
    progress_counter: Option<Arc<AtomicU64>>,
}

impl<'a, S: Session> BulkLoader<'a, S> {
    /// Create a loader over the given session.
    pub fn new(session: &'a mut S, options: LoadOptions) -> Self {
        Self {
            session,
            options,
            progress_counter: None,
        }
    }

    /// Set a shared counter advanced by the number of rows each commit makes
    /// durable. Rows still pending in an open batch are not counted.
    pub fn with_progress_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.progress_counter = Some(counter);
        self
    }

    /// Insert every row into `schema.table`, binding fields to `columns`.
    pub async fn load<I>(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: I,
    ) -> Result<LoadStats>
    where
        I: IntoIterator<Item = Result<Row>>,
    {
        let sql = insert_statement(schema, table, columns)?;
        let commit_every = self.options.commit_every.max(1) as u64;
        let start = Instant::now();
        let mut stats = LoadStats::default();
        let mut uncommitted: u64 = 0;

        if self.session.mode() != SessionMode::Transactional {
            self.session.set_mode(SessionMode::Transactional).await?;
        }

        info!(
            "Loading {}.{} ({} columns, commit every {} rows)",
            schema,
            table,
            columns.len(),
            commit_every
        );
        debug!("Insert statement: {}", sql);

        for item in rows {
            let row = match item {
                Ok(row) => row,
                Err(e) => {
                    self.flush(&mut uncommitted, &mut stats).await?;
                    return Err(e);
                }
            };
            stats.rows_read += 1;

            if row.fields.len() != columns.len() {
                let err = ProvisionError::RowShapeMismatch {
                    row: row.index,
                    expected: columns.len(),
                    actual: row.fields.len(),
                };
                match self.options.on_row_error {
                    RowErrorPolicy::Abort => {
                        self.flush(&mut uncommitted, &mut stats).await?;
                        return Err(err);
                    }
                    RowErrorPolicy::Skip => {
                        warn!("{}: skipping row: {}", table, err);
                        stats.rows_skipped += 1;
                        continue;
                    }
                }
            }

            let params: Vec<&str> = row
                .fields
                .iter()
                .map(|f| {
                    if f.is_empty() {
                        self.options.null_sentinel.as_str()
                    } else {
                        f.as_str()
                    }
                })
                .collect();

            if let Err(e) = self.session.execute(&sql, &params).await {
                if let Err(rollback_err) = self.session.rollback().await {
                    warn!("{}: rollback after failed insert failed: {}", table, rollback_err);
                }
                if uncommitted > 0 {
                    warn!(
                        "{}: {} uncommitted rows rolled back with the failed insert",
                        table, uncommitted
                    );
                }
                return Err(ProvisionError::load(table, row.index, e.to_string()));
            }
            uncommitted += 1;

            if uncommitted >= commit_every {
                self.flush(&mut uncommitted, &mut stats).await?;
            }

            if self.options.progress_interval > 0
                && (stats.rows_inserted + uncommitted) % self.options.progress_interval == 0
            {
                info!("{}: {} rows loaded", table, stats.rows_inserted + uncommitted);
            }
        }

        self.flush(&mut uncommitted, &mut stats).await?;
        stats.duration = start.elapsed();

        info!(
            "Loaded {}.{}: {} rows inserted, {} skipped in {:.2}s ({} rows/sec)",
            schema,
            table,
            stats.rows_inserted,
            stats.rows_skipped,
            stats.duration.as_secs_f64(),
            stats.rows_per_second()
        );

        Ok(stats)
    }

    async fn flush(&mut self, uncommitted: &mut u64, stats: &mut LoadStats) -> Result<()> {
        if *uncommitted == 0 {
            return Ok(());
        }
        self.session.commit().await?;
        if let Some(counter) = &self.progress_counter {
            counter.fetch_add(*uncommitted, Ordering::Relaxed);
        }
        stats.commits += 1;
        stats.rows_inserted += *uncommitted;
        *uncommitted = 0;
        Ok(())
    }
}
