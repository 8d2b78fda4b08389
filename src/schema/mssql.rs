//! SQL Server schema provider.
//!
//! Reads column and primary key metadata from `INFORMATION_SCHEMA` over a
//! single lazily opened tiberius connection.

use super::{Dialect, QualifiedName, SchemaProvider, TableSchema};
use crate::config::SqlServerConfig;
use crate::error::SchemaError;
use crate::identifiers::escape_identifier;
use crate::schema::ColumnSpec;
use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, FromSql, Query, Row};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

/// Type alias for a raw tiberius connection.
pub type RawConnection = Client<Compat<TcpStream>>;

const PROVIDER_NAME: &str = "sqlserver";

/// Schema provider backed by a SQL Server instance.
///
/// Statements on one tiberius client run one at a time, so lookups share the
/// connection through a mutex. The connection is dropped after any error and
/// reopened by the next lookup.
pub struct MssqlSchemaProvider {
    config: SqlServerConfig,
    connection: Mutex<Option<RawConnection>>,
}

impl MssqlSchemaProvider {
    /// Create a provider. No connection is opened until the first lookup.
    pub fn new(config: SqlServerConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    async fn query_rows(
        &self,
        sql: &str,
        params: &[&str],
        table: &str,
    ) -> Result<Vec<Row>, SchemaError> {
        let mut slot = self.connection.lock().await;

        if slot.is_none() {
            *slot = Some(create_connection(&self.config, table).await?);
        }
        let Some(client) = slot.as_mut() else {
            return Err(SchemaError::unavailable(PROVIDER_NAME, table, "no connection"));
        };

        let mut query = Query::new(sql);
        for param in params {
            query.bind(param.to_string());
        }

        let result = match query.query(client).await {
            Ok(stream) => stream.into_first_result().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(rows) => Ok(rows),
            Err(e) => {
                // The client may be mid-stream; start over next time.
                *slot = None;
                Err(SchemaError::from_tiberius(e, PROVIDER_NAME, table))
            }
        }
    }
}

#[async_trait]
impl SchemaProvider for MssqlSchemaProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    async fn list_tables(
        &self,
        schema_filter: Option<&str>,
    ) -> Result<Vec<QualifiedName>, SchemaError> {
        let base = r#"
            SELECT TABLE_CATALOG AS table_catalog,
                   TABLE_SCHEMA AS table_schema,
                   TABLE_NAME AS table_name
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_TYPE = 'BASE TABLE'
        "#;

        let rows = match schema_filter {
            Some(schema) => {
                let sql = format!(
                    "{base} AND TABLE_SCHEMA = @P1 ORDER BY TABLE_SCHEMA, TABLE_NAME"
                );
                self.query_rows(&sql, &[schema], "*").await?
            }
            None => {
                let sql = format!("{base} ORDER BY TABLE_SCHEMA, TABLE_NAME");
                self.query_rows(&sql, &[], "*").await?
            }
        };

        Ok(rows
            .iter()
            .filter_map(|row| {
                let schema = read::<&str>(row, "table_schema")?;
                let table = read::<&str>(row, "table_name")?;
                Some(QualifiedName::new(None, schema, table))
            })
            .collect())
    }

    async fn get_table_schema(&self, name: &QualifiedName) -> Result<TableSchema, SchemaError> {
        let table = name.to_string();
        let prefix = catalog_prefix(name, &table)?;
        let schema_param = name.schema();
        let table_param = name.table();

        let columns_sql = format!(
            r#"
            SELECT
                c.COLUMN_NAME AS column_name,
                CAST(c.ORDINAL_POSITION AS INT) AS ordinal_position,
                c.DATA_TYPE AS data_type,
                CAST(c.CHARACTER_MAXIMUM_LENGTH AS INT) AS max_length,
                CAST(c.NUMERIC_PRECISION AS INT) AS numeric_precision,
                CAST(c.NUMERIC_SCALE AS INT) AS numeric_scale,
                CAST(CASE WHEN c.IS_NULLABLE = 'YES' THEN 1 ELSE 0 END AS INT) AS is_nullable
            FROM {prefix}INFORMATION_SCHEMA.COLUMNS c
            WHERE c.TABLE_SCHEMA = @P1
            AND c.TABLE_NAME = @P2
            ORDER BY c.ORDINAL_POSITION
        "#
        );

        let rows = self
            .query_rows(&columns_sql, &[schema_param, table_param], &table)
            .await?;

        if rows.is_empty() {
            return Err(SchemaError::not_found(PROVIDER_NAME, table));
        }

        let columns = rows.iter().map(column_from_row).collect::<Vec<_>>();

        let pk_sql = format!(
            r#"
            SELECT k.COLUMN_NAME AS column_name
            FROM {prefix}INFORMATION_SCHEMA.TABLE_CONSTRAINTS t
            INNER JOIN {prefix}INFORMATION_SCHEMA.KEY_COLUMN_USAGE k
                ON t.CONSTRAINT_NAME = k.CONSTRAINT_NAME
                AND t.TABLE_SCHEMA = k.TABLE_SCHEMA
                AND t.TABLE_NAME = k.TABLE_NAME
            WHERE t.CONSTRAINT_TYPE = 'PRIMARY KEY'
            AND t.TABLE_SCHEMA = @P1
            AND t.TABLE_NAME = @P2
            ORDER BY k.ORDINAL_POSITION
        "#
        );

        let pk_rows = self
            .query_rows(&pk_sql, &[schema_param, table_param], &table)
            .await?;
        let primary_key = pk_rows
            .iter()
            .filter_map(|row| read::<&str>(row, "column_name").map(str::to_string))
            .collect();

        debug!("Read {} columns for {} from SQL Server", columns.len(), table);
        Ok(TableSchema::new(name.clone(), columns, primary_key))
    }
}

fn catalog_prefix(name: &QualifiedName, table: &str) -> Result<String, SchemaError> {
    match name.catalog() {
        Some(catalog) => escape_identifier(catalog)
            .map(|c| format!("{c}."))
            .map_err(|e| SchemaError::fetch(PROVIDER_NAME, table, e.to_string())),
        None => Ok(String::new()),
    }
}

/// Read a nullable column, treating a type mismatch as missing.
fn read<'a, T: FromSql<'a>>(row: &'a Row, column: &str) -> Option<T> {
    row.try_get::<T, _>(column).ok().flatten()
}

fn column_from_row(row: &Row) -> ColumnSpec {
    let name = read::<&str>(row, "column_name").unwrap_or_default();
    let data_type = read::<&str>(row, "data_type").unwrap_or_default();
    let ordinal = read::<i32>(row, "ordinal_position").unwrap_or(0).max(0) as u32;
    let nullable = read::<i32>(row, "is_nullable").unwrap_or(1) == 1;

    let source_type = format_sql_type(
        data_type,
        read::<i32>(row, "max_length"),
        read::<i32>(row, "numeric_precision"),
        read::<i32>(row, "numeric_scale"),
    );

    ColumnSpec::new(name, source_type, nullable, ordinal)
}

/// Render an `INFORMATION_SCHEMA` column description as a type string such as
/// `nvarchar(50)`, `varchar(max)` or `decimal(18,2)`.
pub fn format_sql_type(
    data_type: &str,
    max_length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> String {
    let base = data_type.to_lowercase();
    match base.as_str() {
        "char" | "varchar" | "nchar" | "nvarchar" | "binary" | "varbinary" => match max_length {
            Some(-1) => format!("{base}(max)"),
            Some(n) => format!("{base}({n})"),
            None => base,
        },
        "decimal" | "numeric" => match (precision, scale) {
            (Some(p), Some(s)) => format!("{base}({p},{s})"),
            (Some(p), None) => format!("{base}({p})"),
            _ => base,
        },
        _ => base,
    }
}

/// Create a tiberius Config from the SQL Server settings.
pub fn create_base_config(config: &SqlServerConfig) -> Config {
    let mut tds = Config::new();

    tds.host(&config.host);
    tds.port(config.port);

    if let Some(ref database) = config.database {
        tds.database(database);
    }

    if config.encrypt {
        tds.encryption(EncryptionLevel::Required);
    } else {
        tds.encryption(EncryptionLevel::Off);
    }

    if config.trust_server_certificate {
        tds.trust_cert();
    }

    tds.application_name(&config.application_name);
    tds.authentication(AuthMethod::sql_server(&config.username, &config.password));

    tds
}

/// Open a raw connection to SQL Server.
///
/// `table` is the lookup that triggered the connect, used for error context.
pub async fn create_connection(
    config: &SqlServerConfig,
    table: &str,
) -> Result<RawConnection, SchemaError> {
    let tds = create_base_config(config);
    let address = format!("{}:{}", config.host, config.port);
    debug!("Creating connection to {}", address);

    let connect = async {
        let tcp = TcpStream::connect(&address).await.map_err(|e| {
            SchemaError::unavailable(
                PROVIDER_NAME,
                table,
                format!("Failed to connect to {}: {}", address, e),
            )
        })?;

        tcp.set_nodelay(true).map_err(|e| {
            SchemaError::unavailable(PROVIDER_NAME, table, format!("Failed to set TCP_NODELAY: {e}"))
        })?;

        Client::connect(tds, tcp.compat_write())
            .await
            .map_err(|e| SchemaError::from_tiberius(e, PROVIDER_NAME, table))
    };

    let client = tokio::time::timeout(config.connection_timeout, connect)
        .await
        .map_err(|_| {
            SchemaError::unavailable(
                PROVIDER_NAME,
                table,
                format!(
                    "Connection to {} timed out after {:?}",
                    address, config.connection_timeout
                ),
            )
        })??;

    info!("Connected to SQL Server at {}", address);
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sql_type() {
        assert_eq!(format_sql_type("nvarchar", Some(50), None, None), "nvarchar(50)");
        assert_eq!(format_sql_type("VARCHAR", Some(-1), None, None), "varchar(max)");
        assert_eq!(format_sql_type("decimal", None, Some(18), Some(2)), "decimal(18,2)");
        assert_eq!(format_sql_type("int", None, Some(10), Some(0)), "int");
        assert_eq!(format_sql_type("datetime2", None, None, None), "datetime2");
    }

    #[test]
    fn test_catalog_prefix_is_escaped() {
        let name = QualifiedName::parse("Sales.dbo.Orders").unwrap();
        assert_eq!(catalog_prefix(&name, "t").unwrap(), "[Sales].");

        let name = QualifiedName::parse("dbo.Orders").unwrap();
        assert_eq!(catalog_prefix(&name, "t").unwrap(), "");
    }

    #[test]
    fn test_provider_starts_disconnected() {
        let config = SqlServerConfig {
            host: "localhost".into(),
            port: 1433,
            database: None,
            username: "sa".into(),
            password: "x".into(),
            encrypt: false,
            trust_server_certificate: true,
            connection_timeout: std::time::Duration::from_secs(1),
            application_name: "test".into(),
        };
        let provider = MssqlSchemaProvider::new(config);
        assert_eq!(provider.name(), "sqlserver");
        assert_eq!(provider.dialect(), Dialect::SqlServer);
        assert!(provider.connection.try_lock().unwrap().is_none());
    }
}
