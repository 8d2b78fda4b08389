//! Databricks schema provider.
//!
//! Runs catalog queries through the SQL Statement Execution API
//! (`POST /api/2.0/sql/statements`) on a configured SQL warehouse and reads
//! `information_schema` for the requested catalog.

use super::{ColumnSpec, Dialect, QualifiedName, SchemaProvider, TableSchema};
use crate::config::DatabricksConfig;
use crate::constants::DATABRICKS_STATEMENT_WAIT;
use crate::error::{GeneratorError, SchemaError};
use crate::identifiers::quote_databricks;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::debug;

const PROVIDER_NAME: &str = "databricks";
const STATEMENTS_PATH: &str = "/api/2.0/sql/statements";

/// Request body for the statement execution endpoint.
#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: String,
    warehouse_id: &'a str,
    wait_timeout: &'a str,
    on_wait_timeout: &'a str,
    format: &'a str,
    disposition: &'a str,
    parameters: Vec<StatementParameter<'a>>,
}

#[derive(Debug, Serialize)]
struct StatementParameter<'a> {
    name: &'a str,
    value: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

impl<'a> StatementParameter<'a> {
    fn string(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            value,
            kind: "STRING",
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    status: StatementStatus,
    #[serde(default)]
    result: Option<StatementResult>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    #[serde(default)]
    error: Option<StatementError>,
}

#[derive(Debug, Deserialize)]
struct StatementError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StatementResult {
    #[serde(default)]
    data_array: Vec<Vec<Option<String>>>,
}

/// Schema provider backed by a Databricks SQL warehouse.
pub struct DatabricksSchemaProvider {
    config: DatabricksConfig,
    client: reqwest::Client,
}

impl DatabricksSchemaProvider {
    /// Create a provider with its own HTTP client.
    pub fn new(config: DatabricksConfig) -> Result<Self, GeneratorError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(crate::constants::APPLICATION_NAME)
            .build()
            .map_err(|e| GeneratorError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Catalog used for names given without one.
    pub fn default_catalog(&self) -> &str {
        &self.config.catalog
    }

    async fn execute(
        &self,
        statement: String,
        parameters: Vec<StatementParameter<'_>>,
        table: &str,
    ) -> Result<Vec<Vec<Option<String>>>, SchemaError> {
        let body = StatementRequest {
            statement,
            warehouse_id: &self.config.warehouse_id,
            wait_timeout: DATABRICKS_STATEMENT_WAIT,
            on_wait_timeout: "CANCEL",
            format: "JSON_ARRAY",
            disposition: "INLINE",
            parameters,
        };

        let url = format!("{}{}", self.config.base_url(), STATEMENTS_PATH);
        let response = self
            .client
            .request(Method::POST, &url)
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SchemaError::from_reqwest(e, PROVIDER_NAME, table))?;

        let response: StatementResponse = response
            .json()
            .await
            .map_err(|e| SchemaError::from_reqwest(e, PROVIDER_NAME, table))?;

        rows_from_response(response, table)
    }
}

#[async_trait]
impl SchemaProvider for DatabricksSchemaProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn dialect(&self) -> Dialect {
        Dialect::Databricks
    }

    async fn list_tables(
        &self,
        schema_filter: Option<&str>,
    ) -> Result<Vec<QualifiedName>, SchemaError> {
        let catalog = quote_databricks(&self.config.catalog);
        let mut statement = format!(
            "SELECT table_catalog, table_schema, table_name FROM {catalog}.information_schema.tables \
             WHERE table_schema <> 'information_schema'"
        );
        let mut parameters = Vec::new();
        if let Some(schema) = schema_filter {
            statement.push_str(" AND lower(table_schema) = lower(:schema)");
            parameters.push(StatementParameter::string("schema", schema));
        }
        statement.push_str(" ORDER BY table_schema, table_name");

        let rows = self.execute(statement, parameters, "*").await?;
        Ok(rows
            .iter()
            .filter_map(|row| match row.as_slice() {
                [Some(catalog), Some(schema), Some(table), ..] => {
                    Some(QualifiedName::new(Some(catalog), schema, table))
                }
                _ => None,
            })
            .collect())
    }

    async fn get_table_schema(&self, name: &QualifiedName) -> Result<TableSchema, SchemaError> {
        let name = name.with_default_catalog(&self.config.catalog);
        let table = name.to_string();
        let catalog = quote_databricks(name.catalog().unwrap_or(&self.config.catalog));

        let columns_sql = format!(
            "SELECT column_name, full_data_type, is_nullable, ordinal_position \
             FROM {catalog}.information_schema.columns \
             WHERE lower(table_schema) = lower(:schema) AND lower(table_name) = lower(:table) \
             ORDER BY ordinal_position"
        );
        let rows = self
            .execute(
                columns_sql,
                vec![
                    StatementParameter::string("schema", name.schema()),
                    StatementParameter::string("table", name.table()),
                ],
                &table,
            )
            .await?;

        let columns = columns_from_rows(&rows);
        if columns.is_empty() {
            return Err(SchemaError::not_found(PROVIDER_NAME, table));
        }

        let pk_sql = format!(
            "SELECT k.column_name \
             FROM {catalog}.information_schema.table_constraints t \
             JOIN {catalog}.information_schema.key_column_usage k \
               ON t.constraint_name = k.constraint_name \
              AND t.table_schema = k.table_schema \
              AND t.table_name = k.table_name \
             WHERE t.constraint_type = 'PRIMARY KEY' \
               AND lower(t.table_schema) = lower(:schema) AND lower(t.table_name) = lower(:table) \
             ORDER BY k.ordinal_position"
        );
        let pk_rows = self
            .execute(
                pk_sql,
                vec![
                    StatementParameter::string("schema", name.schema()),
                    StatementParameter::string("table", name.table()),
                ],
                &table,
            )
            .await?;
        let primary_key = pk_rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect();

        debug!("Read {} columns for {} from Databricks", columns.len(), table);
        Ok(TableSchema::new(name, columns, primary_key))
    }
}

fn rows_from_response(
    response: StatementResponse,
    table: &str,
) -> Result<Vec<Vec<Option<String>>>, SchemaError> {
    match response.status.state.as_str() {
        "SUCCEEDED" => Ok(response.result.unwrap_or_default().data_array),
        "PENDING" | "RUNNING" | "CANCELED" | "CLOSED" => Err(SchemaError::unavailable(
            PROVIDER_NAME,
            table,
            format!("statement ended in state {}", response.status.state),
        )),
        _ => {
            let error = response.status.error;
            let code = error.as_ref().and_then(|e| e.error_code.clone());
            let message = error
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("statement ended in state {}", response.status.state));

            match code.as_deref() {
                Some("TABLE_OR_VIEW_NOT_FOUND") | Some("SCHEMA_NOT_FOUND")
                | Some("NOT_FOUND") => Err(SchemaError::not_found(PROVIDER_NAME, table)),
                Some("TEMPORARILY_UNAVAILABLE") | Some("RESOURCE_EXHAUSTED") => {
                    Err(SchemaError::unavailable(PROVIDER_NAME, table, message))
                }
                _ => Err(SchemaError::fetch(PROVIDER_NAME, table, message)),
            }
        }
    }
}

/// Build column specs from `column_name, full_data_type, is_nullable,
/// ordinal_position` rows.
fn columns_from_rows(rows: &[Vec<Option<String>>]) -> Vec<ColumnSpec> {
    rows.iter()
        .filter_map(|row| {
            let name = row.first()?.as_deref()?;
            let data_type = row.get(1).and_then(|v| v.as_deref()).unwrap_or("STRING");
            let nullable = row
                .get(2)
                .and_then(|v| v.as_deref())
                .is_none_or(|v| v.eq_ignore_ascii_case("YES"));
            let ordinal = row
                .get(3)
                .and_then(|v| v.as_deref())
                .and_then(|v| v.parse::<u32>().ok())
                .map(|o| o + 1)
                .unwrap_or(0);
            Some(ColumnSpec::new(name, data_type.to_uppercase(), nullable, ordinal))
        })
        .collect()
}
