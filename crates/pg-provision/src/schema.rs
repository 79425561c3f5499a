//! Column specifications and the statements generated from them.
//!
//! A [`ColumnSpec`] is an ordered list of `name -> type` entries. Order is
//! significant: it is the column order of the `CREATE TABLE` statement and
//! the positional bind order of every `INSERT`.
//!
//! Three names are pseudo-keys:
//!
//! - `PRIMARY KEY` and `FOREIGN KEY` carry a table constraint clause, e.g.
//!   `PRIMARY KEY: (order_id)`
//! - `id` is a generated column, e.g. `id: SERIAL`
//!
//! Pseudo-keys appear in the DDL but never in the insertable column list.
//!
//! Column names are folded to lowercase before quoting, as PostgreSQL folds
//! the unquoted names inside constraint clauses: `OrderId: integer` with
//! `PRIMARY KEY: (OrderId)` yields column `orderid` and a key on `orderid`.

use std::path::Path;

use crate::error::{ProvisionError, Result};
use crate::identifier::{fold_column, qualify_pg, quote_column, validate_type_clause};

/// Entry names that are not loaded from data files.
pub const PSEUDO_KEYS: [&str; 3] = ["PRIMARY KEY", "FOREIGN KEY", "id"];

/// Constraint keywords emitted bare instead of as quoted column names.
const CONSTRAINT_KEYS: [&str; 2] = ["PRIMARY KEY", "FOREIGN KEY"];

/// One `name -> type` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnEntry {
    pub name: String,
    pub sql_type: String,
}

impl ColumnEntry {
    /// Whether this entry is a pseudo-key.
    pub fn is_pseudo_key(&self) -> bool {
        PSEUDO_KEYS.contains(&self.name.as_str())
    }

    fn is_constraint(&self) -> bool {
        CONSTRAINT_KEYS.contains(&self.name.as_str())
    }

    fn ddl(&self) -> Result<String> {
        validate_type_clause(&self.sql_type)?;
        if self.is_constraint() {
            Ok(format!("{} {}", self.name, self.sql_type))
        } else {
            Ok(format!("{} {}", quote_column(&self.name)?, self.sql_type))
        }
    }
}

/// Ordered column-name to SQL-type mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSpec {
    entries: Vec<ColumnEntry>,
}

impl ColumnSpec {
    /// Build a spec from ordered pairs.
    pub fn from_pairs<I, N, T>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<String>,
    {
        let mut entries: Vec<ColumnEntry> = Vec::new();
        for (name, sql_type) in pairs {
            let name = name.into();
            if entries
                .iter()
                .any(|e| fold_column(&e.name) == fold_column(&name))
            {
                return Err(ProvisionError::schema(format!(
                    "invalid attribute specification: duplicate column '{}'",
                    name
                )));
            }
            entries.push(ColumnEntry {
                name,
                sql_type: sql_type.into(),
            });
        }
        Ok(Self { entries })
    }

    /// Load a spec from a YAML file containing a single mapping.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a spec from a YAML mapping of column name to type string.
    ///
    /// YAML mappings keep their key order, which becomes the column order.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let mapping = match value {
            serde_yaml::Value::Mapping(mapping) => mapping,
            _ => {
                return Err(ProvisionError::schema(
                    "invalid attribute specification: expected a column: type mapping",
                ))
            }
        };

        let mut pairs = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let name = match key {
                serde_yaml::Value::String(name) => name,
                other => {
                    return Err(ProvisionError::schema(format!(
                        "invalid attribute specification: column name must be a string, got {:?}",
                        other
                    )))
                }
            };
            let sql_type = match value {
                serde_yaml::Value::String(sql_type) => sql_type,
                other => {
                    return Err(ProvisionError::schema(format!(
                        "invalid attribute specification: type of '{}' must be a string, got {:?}",
                        name, other
                    )))
                }
            };
            pairs.push((name, sql_type));
        }
        Self::from_pairs(pairs)
    }

    /// All entries in order, pseudo-keys included.
    pub fn entries(&self) -> &[ColumnEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the spec can produce both a table and an INSERT.
    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(ProvisionError::schema(
                "invalid attribute specification: no columns",
            ));
        }
        if self.insertable_columns().is_empty() {
            return Err(ProvisionError::schema(
                "invalid attribute specification: no insertable columns",
            ));
        }
        for entry in &self.entries {
            entry.ddl()?;
        }
        Ok(())
    }

    /// The `"name" type, ...` list that goes inside `CREATE TABLE (...)`.
    ///
    /// Pseudo-keys are included verbatim.
    pub fn ddl_fragment(&self) -> Result<String> {
        let parts = self
            .entries
            .iter()
            .map(ColumnEntry::ddl)
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(", "))
    }

    /// Column names an INSERT binds, folded, in spec order, pseudo-keys removed.
    pub fn insertable_columns(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.is_pseudo_key())
            .map(|e| fold_column(&e.name))
            .collect()
    }

    /// Full `CREATE TABLE` statement.
    pub fn create_table_statement(&self, schema: &str, table: &str) -> Result<String> {
        Ok(format!(
            "CREATE TABLE {} ({})",
            qualify_pg(schema, table)?,
            self.ddl_fragment()?
        ))
    }

    /// Parameterized INSERT over the insertable columns.
    pub fn insert_statement(&self, schema: &str, table: &str) -> Result<String> {
        insert_statement(schema, table, &self.insertable_columns())
    }
}

/// `INSERT INTO "schema"."table" ("a", "b") VALUES ($1, $2)`.
pub fn insert_statement(schema: &str, table: &str, columns: &[String]) -> Result<String> {
    if columns.is_empty() {
        return Err(ProvisionError::schema(
            "invalid attribute specification: no insertable columns",
        ));
    }
    let column_list = columns
        .iter()
        .map(|c| quote_column(c))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualify_pg(schema, table)?,
        column_list,
        placeholders(columns.len())
    ))
}

/// `$1, $2, ..., $n`.
pub fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
