//! Error types for the dbt model generator.
//!
//! Fatal errors (`MappingParse`, `Config`, emission I/O) abort a run. Schema
//! errors are recoverable per table and are turned into validation issues by
//! the pipeline. `Generation` marks an internal invariant violation and fails
//! only its own table.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience result alias for generator operations.
pub type Result<T> = std::result::Result<T, GeneratorError>;

/// Errors raised while looking up a table in a schema provider.
///
/// Cloneable so that one coalesced fetch result can be handed to every
/// caller waiting on the same table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The table does not exist in the provider.
    #[error("Schema fetch failed for {table} ({provider}): table not found")]
    TableNotFound { provider: String, table: String },

    /// The lookup was rejected by the provider (permissions, bad statement).
    #[error("Schema fetch failed for {table} ({provider}): {message}")]
    Fetch {
        provider: String,
        table: String,
        message: String,
    },

    /// The provider could not be reached (connect failure, timeout, throttling).
    #[error("Schema provider {provider} unavailable while fetching {table}: {message}")]
    ProviderUnavailable {
        provider: String,
        table: String,
        message: String,
    },
}

impl SchemaError {
    /// Create a fetch error.
    pub fn fetch(
        provider: impl Into<String>,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Fetch {
            provider: provider.into(),
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a "table does not exist" fetch error.
    pub fn not_found(provider: impl Into<String>, table: impl Into<String>) -> Self {
        Self::TableNotFound {
            provider: provider.into(),
            table: table.into(),
        }
    }

    /// Create a provider unavailable error.
    pub fn unavailable(
        provider: impl Into<String>,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            table: table.into(),
            message: message.into(),
        }
    }

    /// Check if this error is transient and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderUnavailable { .. })
    }

    /// Check if this error means the table simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TableNotFound { .. })
    }

    /// The table the failed lookup was for.
    pub fn table(&self) -> &str {
        match self {
            Self::TableNotFound { table, .. }
            | Self::Fetch { table, .. }
            | Self::ProviderUnavailable { table, .. } => table,
        }
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::TableNotFound { .. } => {
                Some("Check the table name and schema in the mapping document")
            }
            Self::Fetch { .. } => Some("Check that the configured user can read catalog views"),
            Self::ProviderUnavailable { .. } => {
                Some("Check provider hostname, credentials, and network connectivity")
            }
        }
    }
}

/// Main error type for generator runs.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Configuration error (missing or malformed environment variables).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed mapping document. Fatal for the whole run.
    #[error("Mapping parse error{}: {message}", .location.as_ref().map(|l| format!(" at {l}")).unwrap_or_default())]
    MappingParse {
        message: String,
        location: Option<String>,
    },

    /// Schema lookup failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Internal invariant violation while generating a model.
    #[error("Generation failed for {table}: {message}")]
    Generation { table: String, message: String },

    /// Writing a generated file failed.
    #[error("Failed to write {}: {source}", .path.display())]
    Emit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error (reading mapping or snapshot files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl GeneratorError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a mapping parse error without location.
    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::MappingParse {
            message: msg.into(),
            location: None,
        }
    }

    /// Create a mapping parse error pointing at a document location.
    pub fn mapping_at(location: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MappingParse {
            message: msg.into(),
            location: Some(location.into()),
        }
    }

    /// Create a generation error.
    pub fn generation(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Generation {
            table: table.into(),
            message: msg.into(),
        }
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("Check your environment variables and command-line flags"),
            Self::MappingParse { .. } => Some("Fix the mapping document and run again"),
            Self::Schema(e) => e.suggestion(),
            Self::Generation { .. } => {
                Some("This is a generator defect; please report it with the mapping document")
            }
            Self::Emit { .. } => Some("Check that the output directory is writable"),
            _ => None,
        }
    }
}

/// Map SQL Server error codes onto the schema error taxonomy.
pub fn from_sql_error(code: u32, message: &str, provider: &str, table: &str) -> SchemaError {
    match code {
        // Login failed, cannot open database, database unavailable
        18456 | 4060 | 40613 => SchemaError::unavailable(provider, table, message),

        // Invalid object name
        208 => SchemaError::not_found(provider, table),

        // Permission denied on catalog views
        229 | 230 => SchemaError::fetch(provider, table, format!("permission denied: {message}")),

        _ if is_transient_sql_error(code) => SchemaError::unavailable(provider, table, message),

        _ => SchemaError::fetch(provider, table, message),
    }
}

/// Check if a SQL Server error code indicates a transient error.
fn is_transient_sql_error(code: u32) -> bool {
    matches!(
        code,
        1205    // Deadlock
        | 10053 // Connection forcibly closed
        | 10054 // Connection reset
        | 10060 // Connection timed out
        | 40197 // Azure: service error
        | 40501 // Azure: service busy
        | 49918 // Azure: not enough resources
        | 49919 // Azure: too many requests
        | 49920 // Azure: too busy
    )
}

impl SchemaError {
    /// Classify a tiberius error raised while fetching `table`.
    pub fn from_tiberius(e: tiberius::error::Error, provider: &str, table: &str) -> Self {
        use tiberius::error::Error;

        match &e {
            Error::Server(token) => from_sql_error(token.code(), token.message(), provider, table),
            Error::Io { .. } | Error::Tls(_) | Error::Routing { .. } => {
                SchemaError::unavailable(provider, table, e.to_string())
            }
            Error::Protocol(_) => {
                SchemaError::unavailable(provider, table, format!("protocol error: {e}"))
            }
            _ => SchemaError::fetch(provider, table, e.to_string()),
        }
    }

    /// Classify a reqwest error raised while fetching `table`.
    pub fn from_reqwest(e: reqwest::Error, provider: &str, table: &str) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            return SchemaError::unavailable(provider, table, e.to_string());
        }
        match e.status() {
            Some(status) if status.is_server_error() || status.as_u16() == 429 => {
                SchemaError::unavailable(provider, table, e.to_string())
            }
            _ => SchemaError::fetch(provider, table, e.to_string()),
        }
    }
}
