//! Centralized constants for the dbt model generator.
//!
//! Defaults, limits and exit codes used across the crate.

use std::time::Duration;

// =============================================================================
// Provider Constants
// =============================================================================

/// Default SQL Server port.
pub const DEFAULT_MSSQL_PORT: u16 = 1433;

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Default timeout for a single schema lookup in seconds.
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Default timeout for a single schema lookup as Duration.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS);

/// Default Unity Catalog used for two-part destination names.
pub const DEFAULT_DATABRICKS_CATALOG: &str = "main";

/// Server-side wait for a Databricks statement before it is cancelled.
pub const DATABRICKS_STATEMENT_WAIT: &str = "30s";

/// Application name sent to SQL Server.
pub const APPLICATION_NAME: &str = "dbt-model-generator";

// =============================================================================
// Resolver Constants
// =============================================================================

/// Default number of schema lookups issued in parallel.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Upper bound accepted for the lookup concurrency.
pub const MAX_CONCURRENCY: usize = 64;

/// Default attempts per lookup: one try plus a single retry.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 2;

/// Default delay before the retry in milliseconds.
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 250;

// =============================================================================
// Generation Constants
// =============================================================================

/// Destination type used when no conversion rule matches.
pub const DEFAULT_FALLBACK_TYPE: &str = "STRING";

/// Cast template applied when a rule does not carry its own.
pub const DEFAULT_CAST_TEMPLATE: &str = "CAST({column} AS {type})";

/// Default dbt project name.
pub const DEFAULT_PROJECT_NAME: &str = "generated_models";

/// Default dbt project version.
pub const DEFAULT_PROJECT_VERSION: &str = "1.0.0";

/// Directory (relative to the project root) holding model files.
pub const MODELS_DIR: &str = "models";

/// Directory (relative to the project root) holding macros.
pub const MACROS_DIR: &str = "macros";

/// Mapping document versions this build understands.
pub const SUPPORTED_MAPPING_VERSION: u32 = 1;

// =============================================================================
// Exit Codes
// =============================================================================

/// Every table generated without error issues.
pub const EXIT_SUCCESS: u8 = 0;

/// At least one table failed validation or generation.
pub const EXIT_VALIDATION_FAILED: u8 = 1;

/// The run could not start or finish (bad mapping, config, I/O).
pub const EXIT_FATAL: u8 = 2;
