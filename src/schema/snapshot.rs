//! File-backed and in-memory schema provider.
//!
//! A snapshot is a JSON document describing tables as a provider would report
//! them. It lets the generator run without live connections and backs the
//! test suites.

use super::{Dialect, QualifiedName, SchemaProvider, TableSchema};
use crate::error::{GeneratorError, SchemaError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// On-disk snapshot format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Dialect of the described tables.
    pub dialect: Dialect,

    /// Table descriptions.
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    /// Load a snapshot from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GeneratorError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GeneratorError::config(format!(
                "Failed to read schema snapshot {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse a snapshot from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, GeneratorError> {
        let snapshot: SchemaSnapshot = serde_json::from_str(json)?;
        Ok(snapshot)
    }

    /// Serialize the snapshot as pretty JSON.
    pub fn to_json(&self) -> Result<String, GeneratorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Provider answering from a snapshot held in memory.
pub struct SnapshotSchemaProvider {
    name: String,
    dialect: Dialect,
    tables: BTreeMap<QualifiedName, TableSchema>,
    lookups: AtomicU64,
}

impl SnapshotSchemaProvider {
    /// Create a provider from a snapshot.
    pub fn new(name: impl Into<String>, snapshot: SchemaSnapshot) -> Self {
        let tables = snapshot
            .tables
            .into_iter()
            .map(|t| {
                let t = TableSchema::new(t.name, t.columns, t.primary_key);
                (t.name.clone(), t)
            })
            .collect();
        Self {
            name: name.into(),
            dialect: snapshot.dialect,
            tables,
            lookups: AtomicU64::new(0),
        }
    }

    /// Create a provider from a snapshot file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GeneratorError> {
        let snapshot = SchemaSnapshot::load(path.as_ref())?;
        let name = format!("snapshot:{}", path.as_ref().display());
        Ok(Self::new(name, snapshot))
    }

    /// Create a provider from tables built in code.
    pub fn from_tables(name: impl Into<String>, dialect: Dialect, tables: Vec<TableSchema>) -> Self {
        Self::new(name, SchemaSnapshot { dialect, tables })
    }

    /// Number of `get_table_schema` calls served so far.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SchemaProvider for SnapshotSchemaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn list_tables(
        &self,
        schema_filter: Option<&str>,
    ) -> Result<Vec<QualifiedName>, SchemaError> {
        Ok(self
            .tables
            .keys()
            .filter(|n| schema_filter.is_none_or(|s| n.schema().eq_ignore_ascii_case(s)))
            .cloned()
            .collect())
    }

    async fn get_table_schema(&self, name: &QualifiedName) -> Result<TableSchema, SchemaError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        debug!("Snapshot lookup for {} in {}", name, self.name);

        if let Some(table) = self.tables.get(name) {
            return Ok(table.clone());
        }

        // Two-part names match a snapshot entry recorded with a catalog.
        if name.catalog().is_none() {
            let mut matches = self.tables.values().filter(|t| {
                t.name.schema().eq_ignore_ascii_case(name.schema())
                    && t.name.table().eq_ignore_ascii_case(name.table())
            });
            if let (Some(table), None) = (matches.next(), matches.next()) {
                return Ok(table.clone());
            }
        }

        Err(SchemaError::not_found(&self.name, name.to_string()))
    }
}
