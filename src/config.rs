//! Configuration management for the dbt model generator.
//!
//! Configuration is loaded from environment variables following the 12-factor
//! app pattern. Each provider section is loaded on its own so a run that reads
//! one side from a snapshot file does not need the other side's connection
//! settings.

use crate::constants::{
    APPLICATION_NAME, DEFAULT_CONCURRENCY, DEFAULT_CONNECTION_TIMEOUT_SECS,
    DEFAULT_DATABRICKS_CATALOG, DEFAULT_FALLBACK_TYPE, DEFAULT_MSSQL_PORT, DEFAULT_PROJECT_NAME,
    DEFAULT_PROJECT_VERSION, DEFAULT_PROVIDER_TIMEOUT_SECS, MAX_CONCURRENCY,
};
use crate::error::GeneratorError;
use crate::resilience::RetryConfig;
use crate::schema::ResolverSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// SQL Server (source) connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SqlServerConfig {
    /// SQL Server hostname or IP address
    pub host: String,

    /// SQL Server port (default: 1433)
    pub port: u16,

    /// Database name (optional, uses the login's default database when absent)
    pub database: Option<String>,

    /// SQL Server authentication username
    pub username: String,

    /// SQL Server authentication password
    pub password: String,

    /// Enable TLS encryption
    pub encrypt: bool,

    /// Trust server certificate (for self-signed certs)
    pub trust_server_certificate: bool,

    /// Connection timeout
    pub connection_timeout: Duration,

    /// Application name sent to SQL Server
    pub application_name: String,
}

impl fmt::Debug for SqlServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .finish()
    }
}

impl SqlServerConfig {
    /// Load SQL Server configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// ## Required
    /// - `MSSQL_HOST`: SQL Server hostname
    /// - `MSSQL_USER`: SQL Server username
    /// - `MSSQL_PASSWORD`: SQL Server password
    ///
    /// ## Optional
    /// - `MSSQL_PORT`: Port number (default: 1433)
    /// - `MSSQL_DATABASE`: Database name
    /// - `MSSQL_ENCRYPT`: Enable TLS (default: true)
    /// - `MSSQL_TRUST_CERT`: Trust server certificate (default: false)
    /// - `MSSQL_CONNECT_TIMEOUT`: Connection timeout in seconds (default: 30)
    pub fn from_env() -> Result<Self, GeneratorError> {
        let host = std::env::var("MSSQL_HOST")
            .map_err(|_| GeneratorError::config("MSSQL_HOST environment variable is required"))?;

        let username = std::env::var("MSSQL_USER").ok();
        let password = std::env::var("MSSQL_PASSWORD").ok();

        let (username, password) = match (username, password) {
            (Some(u), Some(p)) => (u, p),
            (Some(_), None) => {
                return Err(GeneratorError::config(
                    "MSSQL_PASSWORD is required when MSSQL_USER is set",
                ))
            }
            (None, Some(_)) => {
                return Err(GeneratorError::config(
                    "MSSQL_USER is required when MSSQL_PASSWORD is set",
                ))
            }
            (None, None) => {
                return Err(GeneratorError::config(
                    "Authentication required: set MSSQL_USER and MSSQL_PASSWORD",
                ))
            }
        };

        let port = env_parse("MSSQL_PORT").unwrap_or(DEFAULT_MSSQL_PORT);
        let database = std::env::var("MSSQL_DATABASE").ok();
        let encrypt = env_flag("MSSQL_ENCRYPT").unwrap_or(true);
        let trust_server_certificate = env_flag("MSSQL_TRUST_CERT").unwrap_or(false);
        let connection_timeout_secs =
            env_parse("MSSQL_CONNECT_TIMEOUT").unwrap_or(DEFAULT_CONNECTION_TIMEOUT_SECS);

        Ok(Self {
            host,
            port,
            database,
            username,
            password,
            encrypt,
            trust_server_certificate,
            connection_timeout: Duration::from_secs(connection_timeout_secs),
            application_name: APPLICATION_NAME.to_string(),
        })
    }
}

/// Databricks (destination) connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabricksConfig {
    /// Workspace hostname, e.g. `adb-123.4.azuredatabricks.net`
    pub host: String,

    /// Personal access token or OAuth token
    pub token: String,

    /// SQL warehouse that runs the catalog queries
    pub warehouse_id: String,

    /// Catalog used for two-part destination names
    pub catalog: String,

    /// HTTP request timeout
    pub request_timeout: Duration,
}

impl fmt::Debug for DatabricksConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabricksConfig")
            .field("host", &self.host)
            .field("token", &"***")
            .field("warehouse_id", &self.warehouse_id)
            .field("catalog", &self.catalog)
            .finish()
    }
}

impl DatabricksConfig {
    /// Load Databricks configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// ## Required
    /// - `DATABRICKS_HOST`: Workspace hostname (an `https://` prefix is accepted)
    /// - `DATABRICKS_TOKEN`: Access token
    /// - `DATABRICKS_WAREHOUSE_ID` or `DATABRICKS_HTTP_PATH` (`/sql/1.0/warehouses/<id>`)
    ///
    /// ## Optional
    /// - `DATABRICKS_CATALOG`: Default catalog (default: main)
    pub fn from_env() -> Result<Self, GeneratorError> {
        let host = std::env::var("DATABRICKS_HOST").map_err(|_| {
            GeneratorError::config("DATABRICKS_HOST environment variable is required")
        })?;
        let token = std::env::var("DATABRICKS_TOKEN").map_err(|_| {
            GeneratorError::config("DATABRICKS_TOKEN environment variable is required")
        })?;

        let warehouse_id = match std::env::var("DATABRICKS_WAREHOUSE_ID") {
            Ok(id) => id,
            Err(_) => {
                let http_path = std::env::var("DATABRICKS_HTTP_PATH").map_err(|_| {
                    GeneratorError::config(
                        "DATABRICKS_WAREHOUSE_ID or DATABRICKS_HTTP_PATH is required",
                    )
                })?;
                warehouse_id_from_http_path(&http_path)?
            }
        };

        let catalog = std::env::var("DATABRICKS_CATALOG")
            .unwrap_or_else(|_| DEFAULT_DATABRICKS_CATALOG.to_string());

        Ok(Self {
            host: normalize_host(&host),
            token,
            warehouse_id,
            catalog,
            request_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        })
    }

    /// Base URL of the workspace.
    pub fn base_url(&self) -> String {
        format!("https://{}", self.host)
    }
}

/// Generator behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Maximum schema lookups in flight per provider
    pub concurrency: usize,

    /// Timeout for a single schema lookup
    pub provider_timeout: Duration,

    /// Destination type used when no conversion rule matches
    pub default_type: String,

    /// Attempts per schema lookup (1 disables the retry)
    pub retry_max_attempts: u32,

    /// Delay before the retry
    pub retry_initial_delay: Duration,

    /// Run the syntax check over generated models
    pub check_syntax: bool,
}

impl GeneratorConfig {
    /// Load generator configuration from environment variables.
    ///
    /// Never fails: malformed values fall back to defaults.
    ///
    /// - `GENERATOR_CONCURRENCY` (default: 4)
    /// - `GENERATOR_PROVIDER_TIMEOUT_SECS` (default: 30)
    /// - `GENERATOR_DEFAULT_TYPE` (default: STRING)
    /// - `GENERATOR_RETRY_MAX_ATTEMPTS` (default: 2)
    /// - `GENERATOR_RETRY_INITIAL_DELAY_MS` (default: 250)
    /// - `GENERATOR_CHECK_SYNTAX` (default: false)
    pub fn from_env() -> Self {
        let retry = RetryConfig::from_env();
        let defaults = Self::default();

        Self {
            concurrency: env_parse::<usize>("GENERATOR_CONCURRENCY")
                .map(|n| n.clamp(1, MAX_CONCURRENCY))
                .unwrap_or(defaults.concurrency),
            provider_timeout: env_parse("GENERATOR_PROVIDER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.provider_timeout),
            default_type: std::env::var("GENERATOR_DEFAULT_TYPE")
                .ok()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(defaults.default_type),
            retry_max_attempts: retry.max_attempts,
            retry_initial_delay: retry.initial_delay,
            check_syntax: env_flag("GENERATOR_CHECK_SYNTAX").unwrap_or(defaults.check_syntax),
        }
    }

    /// Resolver settings derived from this configuration.
    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            concurrency: self.concurrency,
            timeout: self.provider_timeout,
            retry: RetryConfig {
                max_attempts: self.retry_max_attempts.max(1),
                initial_delay: self.retry_initial_delay,
                ..RetryConfig::default()
            },
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            default_type: DEFAULT_FALLBACK_TYPE.to_string(),
            retry_max_attempts: retry.max_attempts,
            retry_initial_delay: retry.initial_delay,
            check_syntax: false,
        }
    }
}

/// dbt project settings written to `dbt_project.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Profile name used by dbt to find connection settings
    pub profile: String,

    /// Project version
    pub version: String,
}

impl ProjectConfig {
    /// Load project settings from environment variables.
    ///
    /// - `DBT_PROJECT_NAME` (default: generated_models)
    /// - `DBT_PROFILE` (default: the project name)
    pub fn from_env() -> Self {
        let name =
            std::env::var("DBT_PROJECT_NAME").unwrap_or_else(|_| DEFAULT_PROJECT_NAME.to_string());
        let profile = std::env::var("DBT_PROFILE").unwrap_or_else(|_| name.clone());
        Self {
            name,
            profile,
            version: DEFAULT_PROJECT_VERSION.to_string(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROJECT_NAME.to_string(),
            profile: DEFAULT_PROJECT_NAME.to_string(),
            version: DEFAULT_PROJECT_VERSION.to_string(),
        }
    }
}

/// Extract the warehouse id from a SQL warehouse HTTP path.
pub fn warehouse_id_from_http_path(http_path: &str) -> Result<String, GeneratorError> {
    http_path
        .trim_end_matches('/')
        .rsplit_once("/warehouses/")
        .map(|(_, id)| id.to_string())
        .filter(|id| !id.is_empty() && !id.contains('/'))
        .ok_or_else(|| {
            GeneratorError::config(format!(
                "DATABRICKS_HTTP_PATH '{}' does not name a SQL warehouse",
                http_path
            ))
        })
}

fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
}
