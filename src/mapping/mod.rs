//! Declarative source to destination mappings.
//!
//! A mapping document lists destination tables, the source table each one is
//! built from, and how every destination column is derived. Column sources are
//! a closed set of variants so every consumer handles each kind explicitly.

mod document;
mod parser;

pub use document::MappingDocument;
pub use parser::{parse_mapping_file, parse_mapping_str, MappingFormat};

use crate::config::ProjectConfig;
use crate::schema::QualifiedName;
use crate::typemap::TypeConversionRule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a model is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Materialization {
    /// Rebuild the table on every run.
    #[serde(alias = "table", alias = "full-refresh")]
    FullRefresh,
    /// Merge rows changed since the last run.
    Incremental,
}

impl Materialization {
    /// dbt `materialized` value.
    pub fn dbt_name(&self) -> &'static str {
        match self {
            Materialization::FullRefresh => "table",
            Materialization::Incremental => "incremental",
        }
    }
}

impl fmt::Display for Materialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Materialization::FullRefresh => write!(f, "full_refresh"),
            Materialization::Incremental => write!(f, "incremental"),
        }
    }
}

/// A per-column transformation directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Trim,
    Upper,
    Lower,
    /// Turn empty strings into NULL.
    NullIfEmpty,
}

impl Transform {
    /// Wrap a SQL expression with this transformation.
    pub fn apply(&self, expr: &str) -> String {
        match self {
            Transform::Trim => format!("trim({expr})"),
            Transform::Upper => format!("upper({expr})"),
            Transform::Lower => format!("lower({expr})"),
            Transform::NullIfEmpty => format!("nullif({expr}, '')"),
        }
    }
}

impl FromStr for Transform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trim" => Ok(Transform::Trim),
            "upper" => Ok(Transform::Upper),
            "lower" => Ok(Transform::Lower),
            "nullif_empty" => Ok(Transform::NullIfEmpty),
            other => Err(format!(
                "unknown transform '{}' (expected trim, upper, lower or nullif_empty)",
                other
            )),
        }
    }
}

/// A literal value in a mapping document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Null,
}

impl LiteralValue {
    /// Render as a Databricks SQL literal.
    pub fn to_sql(&self) -> String {
        match self {
            LiteralValue::Null => "NULL".to_string(),
            LiteralValue::Bool(b) => b.to_string(),
            LiteralValue::Integer(i) => i.to_string(),
            LiteralValue::Float(f) if f.is_finite() && f.fract() == 0.0 => format!("{f:.1}"),
            LiteralValue::Float(f) => f.to_string(),
            LiteralValue::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        }
    }
}

/// Where a destination column's value comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ColumnSource {
    /// Source column with the same name as the destination column.
    Direct,
    /// Source column under a different name.
    Column(String),
    /// SQL expression inserted verbatim.
    Expression(String),
    /// Constant value.
    Literal(LiteralValue),
}

/// Derivation of one destination column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMapping {
    /// Destination column name.
    pub destination: String,

    /// Value source.
    pub source: ColumnSource,

    /// Transformations applied to a column-backed value, in order.
    pub transforms: Vec<Transform>,

    /// Explicit destination type.
    pub type_override: Option<String>,

    /// Value substituted when the source yields NULL.
    pub default: Option<LiteralValue>,

    pub description: Option<String>,
}

impl ColumnMapping {
    /// A same-name mapping with no extras.
    pub fn direct(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            source: ColumnSource::Direct,
            transforms: Vec::new(),
            type_override: None,
            default: None,
            description: None,
        }
    }

    /// Source column this mapping reads, for `Direct` and `Column` kinds.
    pub fn source_column(&self) -> Option<&str> {
        match &self.source {
            ColumnSource::Direct => Some(&self.destination),
            ColumnSource::Column(name) => Some(name),
            ColumnSource::Expression(_) | ColumnSource::Literal(_) => None,
        }
    }
}

/// Incremental load settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncrementalConfig {
    /// Destination column holding the watermark.
    pub timestamp: String,

    /// Destination columns forming the merge key. Empty means "use the
    /// source primary key".
    pub unique_key: Vec<String>,
}

/// One destination table and how to build it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableMapping {
    pub source: QualifiedName,
    pub destination: QualifiedName,
    pub columns: Vec<ColumnMapping>,
    pub incremental: Option<IncrementalConfig>,
    pub materialization: Materialization,
    pub description: Option<String>,
}

impl TableMapping {
    /// dbt model name: the lower-cased destination table name.
    pub fn model_name(&self) -> String {
        self.destination.table().to_lowercase()
    }

    /// Find a column mapping by destination name, case-insensitively.
    pub fn column(&self, destination: &str) -> Option<&ColumnMapping> {
        self.columns
            .iter()
            .find(|c| c.destination.eq_ignore_ascii_case(destination))
    }

    pub fn is_incremental(&self) -> bool {
        self.materialization == Materialization::Incremental
    }
}

/// Overrides for the dbt project settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectOverrides {
    pub name: Option<String>,
    pub profile: Option<String>,
    pub version: Option<String>,
}

impl ProjectOverrides {
    /// Apply these overrides on top of environment-derived settings.
    pub fn apply(&self, base: ProjectConfig) -> ProjectConfig {
        let name = self.name.clone().unwrap_or(base.name);
        ProjectConfig {
            profile: self.profile.clone().unwrap_or(base.profile),
            version: self.version.clone().unwrap_or(base.version),
            name,
        }
    }
}

/// Where landed source data lives, for `sources.yml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub database: Option<String>,
    pub schema: Option<String>,
}

/// A parsed mapping document.
#[derive(Debug, Clone)]
pub struct MappingSet {
    pub version: u32,
    pub project: ProjectOverrides,
    pub source_location: SourceLocation,
    pub type_rules: Vec<TypeConversionRule>,
    pub tables: Vec<TableMapping>,
}

impl MappingSet {
    /// Every source table referenced, without duplicates, sorted.
    pub fn source_tables(&self) -> Vec<QualifiedName> {
        let mut names: Vec<QualifiedName> = self.tables.iter().map(|t| t.source.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// Every destination table, sorted.
    pub fn destination_tables(&self) -> Vec<QualifiedName> {
        let mut names: Vec<QualifiedName> =
            self.tables.iter().map(|t| t.destination.clone()).collect();
        names.sort();
        names
    }
}
