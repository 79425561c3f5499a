//! Identifier validation and quoting for dynamically built SQL.
//!
//! Identifiers (database, schema, table, column and role names) cannot be
//! bound as statement parameters; only values can. Every identifier that
//! reaches a DDL, DCL or DML statement therefore goes through this module:
//!
//! 1. Validate for suspicious patterns (empty, null bytes, excessive length)
//! 2. Wrap in double quotes
//! 3. Escape embedded double quotes by doubling them
//!
//! Quoting preserves case: `Sales` and `sales` are different tables.

use crate::error::{ProvisionError, Result};

/// Maximum identifier length accepted by PostgreSQL (NAMEDATALEN - 1).
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes
/// - Identifiers exceeding 63 bytes (PostgreSQL would silently truncate them)
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ProvisionError::schema("Identifier cannot be empty"));
    }

    if name.contains('\0') {
        return Err(ProvisionError::schema(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ProvisionError::schema(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a table name with its schema: `"schema"."table"`.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Fold a column name the way PostgreSQL folds an unquoted identifier.
///
/// Constraint clauses such as `PRIMARY KEY (OrderId)` are emitted verbatim
/// and refer to `orderid`; quoting the folded name keeps the column and the
/// clause in agreement while still escaping spaces and quotes.
pub fn fold_column(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Fold, validate and quote a column name.
pub fn quote_column(name: &str) -> Result<String> {
    quote_pg(&fold_column(name))
}

/// Render a string literal for statements that cannot take parameters
/// (`CREATE ROLE ... PASSWORD`).
///
/// Single quotes are doubled. Backslashes are rejected outright so the
/// result does not depend on `standard_conforming_strings`.
pub fn quote_literal(value: &str) -> Result<String> {
    if value.contains('\0') {
        return Err(ProvisionError::Config(
            "literal cannot contain a null byte".to_string(),
        ));
    }
    if value.contains('\\') {
        return Err(ProvisionError::Config(
            "literal cannot contain a backslash".to_string(),
        ));
    }
    Ok(format!("'{}'", value.replace('\'', "''")))
}

/// Validate a column type or constraint clause taken from a column spec.
///
/// Clauses are emitted verbatim into `CREATE TABLE`, so anything that could
/// terminate the statement or comment out the remainder is rejected:
///
/// - Semicolons (multiple statements)
/// - SQL comments (`--`, `/*`, `*/`)
/// - Empty clauses
///
/// ```ignore
/// validate_type_clause("varchar(255) NOT NULL")?;
/// validate_type_clause("(customer_id) REFERENCES customers (id)")?;
/// validate_type_clause("int); DROP TABLE users").is_err();
/// ```
pub fn validate_type_clause(clause: &str) -> Result<()> {
    if clause.trim().is_empty() {
        return Err(ProvisionError::schema(
            "invalid attribute specification: column type cannot be empty",
        ));
    }

    if clause.contains('\0') {
        return Err(ProvisionError::schema(format!(
            "SECURITY: Column type contains null byte (possible injection): {:?}",
            clause
        )));
    }

    if clause.contains(';') {
        return Err(ProvisionError::schema(format!(
            "SECURITY: Column type contains semicolon (possible injection): {:?}",
            clause
        )));
    }

    if clause.contains("--") || clause.contains("/*") || clause.contains("*/") {
        return Err(ProvisionError::schema(format!(
            "SECURITY: Column type contains SQL comment markers (possible injection): {:?}",
            clause
        )));
    }

    Ok(())
}
