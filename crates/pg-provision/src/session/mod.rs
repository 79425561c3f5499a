//! The single-connection session every engine component runs its SQL through.
//!
//! [`Session`] is the seam between the provisioning engine and the driver:
//!
//! - [`PgSession`]: one tokio-postgres connection, no pooling
//! - `RecordingSession` (tests only): records every call for assertions
//!
//! A session is in one of two modes. In [`SessionMode::Transactional`] the
//! first statement opens a transaction block that stays open until
//! [`Session::commit`] or [`Session::rollback`]. In
//! [`SessionMode::Autocommit`] every statement commits on its own, which
//! `CREATE DATABASE` requires.

mod postgres;
#[cfg(test)]
pub(crate) mod recording;

pub use self::postgres::PgSession;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio_postgres::types::{to_sql_checked, Format, IsNull, ToSql, Type};

use crate::error::Result;

/// Transaction behavior of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Statements accumulate in an open transaction until commit.
    #[default]
    Transactional,
    /// Each statement commits immediately.
    Autocommit,
}

/// Sequential SQL execution over one exclusively owned connection.
#[async_trait]
pub trait Session: Send {
    /// Name of the database this session is connected to.
    fn database(&self) -> &str;

    /// Current transaction mode.
    fn mode(&self) -> SessionMode;

    /// Whether a transaction block is currently open.
    fn in_transaction(&self) -> bool;

    /// Switch transaction mode. Fails while a transaction block is open.
    async fn set_mode(&mut self, mode: SessionMode) -> Result<()>;

    /// Execute a statement, binding `params` positionally as text.
    ///
    /// Returns the number of affected rows (0 for utility statements).
    async fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64>;

    /// Run a query and return its first column as strings.
    ///
    /// Queries never open a transaction block on their own.
    async fn query_column(&mut self, sql: &str, params: &[&str]) -> Result<Vec<String>>;

    /// Commit the open transaction, if any.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction, if any.
    async fn rollback(&mut self) -> Result<()>;

    /// Close the connection, rolling back any open transaction.
    async fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// A parameter sent in text format, leaving type coercion to the server.
///
/// Delimited files carry untyped text; sending it in text format lets
/// PostgreSQL parse `42` into an `integer` column or `2024-01-31` into a
/// `date` column exactly as it would a literal.
#[derive(Debug)]
pub struct TextParam<'a>(pub &'a str);

impl ToSql for TextParam<'_> {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        out.put_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_param_writes_raw_bytes() {
        let mut buf = BytesMut::new();
        let param = TextParam("2024-01-31");
        let is_null = param.to_sql(&Type::DATE, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::No));
        assert_eq!(&buf[..], b"2024-01-31");
        assert!(matches!(param.encode_format(&Type::INT4), Format::Text));
    }

    #[test]
    fn test_text_param_accepts_any_type() {
        assert!(<TextParam as ToSql>::accepts(&Type::INT4));
        assert!(<TextParam as ToSql>::accepts(&Type::NUMERIC));
        assert!(<TextParam as ToSql>::accepts(&Type::TEXT));
    }

    #[test]
    fn test_default_mode_is_transactional() {
        assert_eq!(SessionMode::default(), SessionMode::Transactional);
    }
}
