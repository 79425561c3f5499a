//! In-memory session that records every call, for engine tests.

use async_trait::async_trait;

use super::{Session, SessionMode};
use crate::error::{ProvisionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Execute,
    Query,
    Commit,
    Rollback,
}

/// One recorded call with the session state at the time it was made.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub kind: CallKind,
    pub sql: String,
    pub params: Vec<String>,
    pub mode: SessionMode,
    pub in_transaction: bool,
}

pub(crate) struct RecordingSession {
    database: String,
    mode: SessionMode,
    in_transaction: bool,
    pub calls: Vec<Call>,
    /// Executed statements that reached a commit (or ran in autocommit).
    pub committed: Vec<Call>,
    pending: Vec<Call>,
    /// Canned query results: first entry whose needle occurs in the SQL wins.
    responses: Vec<(String, Vec<String>)>,
    /// Fail the execute call whose SQL contains the needle, on its nth match (1-based).
    fail_on: Option<(String, usize)>,
    matches_seen: usize,
}

impl RecordingSession {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            mode: SessionMode::Transactional,
            in_transaction: false,
            calls: Vec::new(),
            committed: Vec::new(),
            pending: Vec::new(),
            responses: Vec::new(),
            fail_on: None,
            matches_seen: 0,
        }
    }

    pub fn with_response(mut self, needle: &str, rows: &[&str]) -> Self {
        self.responses
            .push((needle.to_string(), rows.iter().map(|s| s.to_string()).collect()));
        self
    }

    pub fn failing_on(mut self, needle: &str, nth: usize) -> Self {
        self.fail_on = Some((needle.to_string(), nth));
        self
    }

    pub fn executed(&self) -> Vec<&Call> {
        self.calls
            .iter()
            .filter(|c| c.kind == CallKind::Execute)
            .collect()
    }

    pub fn committed_matching(&self, needle: &str) -> Vec<&Call> {
        self.committed
            .iter()
            .filter(|c| c.sql.contains(needle))
            .collect()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls.iter().filter(|c| c.kind == kind).count()
    }

    fn record(&mut self, kind: CallKind, sql: &str, params: &[&str]) -> Call {
        let call = Call {
            kind,
            sql: sql.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            mode: self.mode,
            in_transaction: self.in_transaction,
        };
        self.calls.push(call.clone());
        call
    }
}

#[async_trait]
impl Session for RecordingSession {
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
        self.mode = mode;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64> {
        let call = self.record(CallKind::Execute, sql, params);

        if let Some((needle, nth)) = &self.fail_on {
            if sql.contains(needle.as_str()) {
                self.matches_seen += 1;
                if self.matches_seen == *nth {
                    if self.mode == SessionMode::Transactional {
                        self.in_transaction = true;
                    }
                    return Err(ProvisionError::Config("injected failure".to_string()));
                }
            }
        }

        match self.mode {
            SessionMode::Autocommit => self.committed.push(call),
            SessionMode::Transactional => {
                self.in_transaction = true;
                self.pending.push(call);
            }
        }
        Ok(1)
    }

    async fn query_column(&mut self, sql: &str, params: &[&str]) -> Result<Vec<String>> {
        self.record(CallKind::Query, sql, params);
        Ok(self
            .responses
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn commit(&mut self) -> Result<()> {
        self.record(CallKind::Commit, "COMMIT", &[]);
        self.committed.append(&mut self.pending);
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.record(CallKind::Rollback, "ROLLBACK", &[]);
        self.pending.clear();
        self.in_transaction = false;
        Ok(())
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}
