//! Schema model shared by every provider, plus the provider implementations
//! and the per-run resolver.

mod databricks;
mod mssql;
mod provider;
mod resolver;
mod snapshot;

pub use databricks::DatabricksSchemaProvider;
pub use mssql::MssqlSchemaProvider;
pub use provider::{SchemaProvider, SharedProvider};
pub use resolver::{FetchResult, ResolverSettings, ResolverStats, SchemaResolver};
pub use snapshot::{SchemaSnapshot, SnapshotSchemaProvider};

use crate::error::GeneratorError;
use crate::identifiers::{split_qualified_name, validate_identifier};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

/// SQL dialect of a schema provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Microsoft SQL Server.
    #[serde(alias = "mssql")]
    SqlServer,
    /// Databricks SQL (Unity Catalog).
    Databricks,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::SqlServer => write!(f, "sqlserver"),
            Dialect::Databricks => write!(f, "databricks"),
        }
    }
}

/// A schema-scoped table identifier (`catalog.schema.table` or `schema.table`).
///
/// The original spelling is kept for display and generated SQL; equality,
/// hashing and ordering use the lower-cased display form computed once at
/// construction. Parts containing a dot are shown quoted, so
/// `[dbo].[Order.Lines]` and `dbo.Order.Lines` stay distinct.
#[derive(Debug, Clone)]
pub struct QualifiedName {
    catalog: Option<String>,
    schema: String,
    table: String,
    key: String,
}

impl QualifiedName {
    /// Build a name from its parts.
    pub fn new(catalog: Option<&str>, schema: &str, table: &str) -> Self {
        let catalog = catalog.map(str::to_string);
        let key = render_parts(catalog.as_deref(), schema, table).to_lowercase();
        Self {
            catalog,
            schema: schema.to_string(),
            table: table.to_string(),
            key,
        }
    }

    /// Parse and validate a two- or three-part dotted name.
    pub fn parse(name: &str) -> Result<Self, GeneratorError> {
        let parts = split_qualified_name(name)?;
        for part in &parts {
            validate_identifier(part)?;
        }
        match parts.as_slice() {
            [schema, table] => Ok(Self::new(None, schema, table)),
            [catalog, schema, table] => Ok(Self::new(Some(catalog), schema, table)),
            _ => Err(GeneratorError::mapping(format!(
                "'{}' must be qualified as schema.table or catalog.schema.table",
                name
            ))),
        }
    }

    /// Catalog (database) part, if given.
    pub fn catalog(&self) -> Option<&str> {
        self.catalog.as_deref()
    }

    /// Schema part.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Table part.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Case-normalized comparison key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Return this name with `catalog` filled in when it has none.
    pub fn with_default_catalog(&self, catalog: &str) -> Self {
        match self.catalog {
            Some(_) => self.clone(),
            None => Self::new(Some(catalog), &self.schema, &self.table),
        }
    }
}

impl PartialEq for QualifiedName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QualifiedName {}

impl Hash for QualifiedName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for QualifiedName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QualifiedName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_parts(self.catalog.as_deref(), &self.schema, &self.table))
    }
}

/// Join name parts with dots, quoting any part that would not split back
/// into itself.
fn render_parts(catalog: Option<&str>, schema: &str, table: &str) -> String {
    catalog
        .into_iter()
        .chain([schema, table])
        .map(quote_part)
        .collect::<Vec<_>>()
        .join(".")
}

fn quote_part(part: &str) -> String {
    let needs_quotes = part.contains('.') || part.starts_with('[') || part.starts_with('`');
    if !needs_quotes {
        part.to_string()
    } else if part.contains(']') {
        format!("`{}`", part)
    } else {
        format!("[{}]", part)
    }
}

impl Serialize for QualifiedName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QualifiedName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        QualifiedName::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Column metadata as reported by a provider. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name in its original spelling.
    pub name: String,

    /// Dialect type string, e.g. `nvarchar(50)` or `decimal(18,2)`.
    #[serde(rename = "type")]
    pub source_type: String,

    /// Whether the column accepts NULL.
    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// 1-based position within the table.
    #[serde(default)]
    pub ordinal: u32,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSpec {
    /// Create a column spec.
    pub fn new(name: impl Into<String>, source_type: impl Into<String>, nullable: bool, ordinal: u32) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            nullable,
            ordinal,
        }
    }
}

/// Resolved table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Fully qualified table name.
    pub name: QualifiedName,

    /// Columns in ordinal order.
    pub columns: Vec<ColumnSpec>,

    /// Primary key column names, in key order.
    #[serde(default)]
    pub primary_key: Vec<String>,
}

impl TableSchema {
    /// Create a table schema, ordering columns and filling missing ordinals.
    pub fn new(name: QualifiedName, columns: Vec<ColumnSpec>, primary_key: Vec<String>) -> Self {
        let mut columns: Vec<ColumnSpec> = columns
            .into_iter()
            .enumerate()
            .map(|(i, mut c)| {
                if c.ordinal == 0 {
                    c.ordinal = i as u32 + 1;
                }
                c
            })
            .collect();
        columns.sort_by_key(|c| c.ordinal);
        Self {
            name,
            columns,
            primary_key,
        }
    }

    /// Find a column by name, case-insensitively.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Check whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Check whether a column is part of the primary key.
    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k.eq_ignore_ascii_case(name))
    }
}
