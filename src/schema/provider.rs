//! The schema provider capability interface.

use super::{Dialect, QualifiedName, TableSchema};
use crate::error::SchemaError;
use async_trait::async_trait;
use std::sync::Arc;

/// A source of table metadata.
///
/// Caching, timeouts, retries and fan-out live in
/// [`SchemaResolver`](super::SchemaResolver), not in implementations.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Short provider name used in logs and error messages.
    fn name(&self) -> &str;

    /// SQL dialect of the tables this provider describes.
    fn dialect(&self) -> Dialect;

    /// List tables, optionally restricted to one schema (case-insensitive).
    async fn list_tables(&self, schema_filter: Option<&str>)
        -> Result<Vec<QualifiedName>, SchemaError>;

    /// Fetch the schema of one table.
    ///
    /// Returns [`SchemaError::TableNotFound`] when the table does not exist.
    async fn get_table_schema(&self, name: &QualifiedName) -> Result<TableSchema, SchemaError>;
}

/// Shared provider handle.
pub type SharedProvider = Arc<dyn SchemaProvider>;
