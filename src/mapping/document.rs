//! On-disk mapping document format.
//!
//! These types mirror the YAML/JSON layout one to one. They carry no
//! invariants; [`super::parser`] turns them into validated
//! [`TableMapping`](super::TableMapping)s.

use super::{LiteralValue, Materialization};
use serde::{Deserialize, Deserializer};

/// Root of a mapping document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingDocument {
    /// Format version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// dbt project overrides.
    #[serde(default)]
    pub project: Option<ProjectSection>,

    /// Defaults applied to every table.
    #[serde(default)]
    pub defaults: DefaultsSection,

    /// User type conversion rules.
    #[serde(default)]
    pub type_conversions: Vec<TypeRuleEntry>,

    /// Table mappings.
    #[serde(default)]
    pub tables: Vec<TableEntry>,
}

fn default_version() -> u32 {
    1
}

/// `project:` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    pub name: Option<String>,
    pub profile: Option<String>,
    pub version: Option<String>,
}

/// `defaults:` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsSection {
    pub materialization: Option<Materialization>,
    pub source_database: Option<String>,
    pub source_schema: Option<String>,
}

/// One `type_conversions:` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeRuleEntry {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub cast: Option<String>,
}

/// One `tables:` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableEntry {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub materialization: Option<Materialization>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnEntry>,
    #[serde(default)]
    pub incremental: Option<IncrementalEntry>,
}

/// One `columns:` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnEntry {
    #[serde(alias = "destination")]
    pub dest: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    /// `Some(None)` is an explicit `literal: null`.
    #[serde(default, deserialize_with = "present")]
    pub literal: Option<Option<LiteralValue>>,
    #[serde(default)]
    pub transform: Option<OneOrMany>,
    #[serde(default)]
    pub default: Option<LiteralValue>,
    #[serde(default, rename = "type")]
    pub type_override: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// `incremental:` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncrementalEntry {
    pub timestamp: String,
    #[serde(default, alias = "unique_key")]
    pub key: Option<OneOrMany>,
}

/// A field written either as a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Distinguish an absent field from an explicit null.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
