//! dbt model SQL generation.
//!
//! Output depends only on the mapping, the source schema and the bindings, so
//! regenerating from the same inputs yields byte-identical text.

use crate::error::GeneratorError;
use crate::identifiers::quote_databricks;
use crate::mapping::{Materialization, TableMapping};
use crate::schema::{QualifiedName, TableSchema};
use crate::validate::{BoundValue, ColumnBinding, TableValidation};
use serde::Serialize;
use std::path::PathBuf;

/// One column as described in `schema.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelColumn {
    pub name: String,
    pub data_type: Option<String>,
    pub description: Option<String>,
    /// Part of the merge key.
    pub unique_key: bool,
}

/// A generated dbt model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedModel {
    /// Model name (lower-cased destination table name).
    pub name: String,
    pub destination: QualifiedName,
    /// Source tables the model selects from.
    pub source_tables: Vec<QualifiedName>,
    pub materialization: Materialization,
    pub unique_key: Vec<String>,
    pub columns: Vec<ModelColumn>,
    pub description: Option<String>,
    /// Path relative to the project root.
    pub relative_path: PathBuf,
    pub sql: String,
}

/// Generate the model for a validated table.
///
/// Fails with [`GeneratorError::Generation`] when the validation result does
/// not cover the mapping, which means validation and generation disagree.
pub fn generate_model(
    mapping: &TableMapping,
    source: &TableSchema,
    validation: &TableValidation,
) -> Result<GeneratedModel, GeneratorError> {
    let table = mapping.destination.to_string();

    if validation.has_errors() {
        return Err(GeneratorError::generation(
            &table,
            "generation requested for a table with validation errors",
        ));
    }
    if validation.bindings.len() != mapping.columns.len() {
        return Err(GeneratorError::generation(
            &table,
            format!(
                "{} column mapping(s) but {} type binding(s)",
                mapping.columns.len(),
                validation.bindings.len()
            ),
        ));
    }
    for (column, binding) in mapping.columns.iter().zip(&validation.bindings) {
        if column.destination != binding.destination {
            return Err(GeneratorError::generation(
                &table,
                format!("missing type binding for column '{}'", column.destination),
            ));
        }
    }

    let watermark = match &mapping.incremental {
        Some(incremental) if mapping.is_incremental() => {
            let binding = find_binding(&validation.bindings, &incremental.timestamp)
                .ok_or_else(|| {
                    GeneratorError::generation(
                        &table,
                        format!("no binding for timestamp column '{}'", incremental.timestamp),
                    )
                })?;
            let BoundValue::SourceColumn { name, .. } = &binding.value else {
                return Err(GeneratorError::generation(
                    &table,
                    "incremental timestamp is not bound to a source column",
                ));
            };
            if validation.unique_key.is_empty() {
                return Err(GeneratorError::generation(&table, "incremental model has no unique key"));
            }
            Some((name.clone(), binding.destination.clone()))
        }
        _ => None,
    };

    let sql = render_sql(mapping, source, validation, watermark.as_ref());

    let columns = mapping
        .columns
        .iter()
        .zip(&validation.bindings)
        .map(|(column, binding)| ModelColumn {
            name: binding.destination.clone(),
            data_type: binding.destination_type.clone(),
            description: column.description.clone(),
            unique_key: mapping.is_incremental()
                && validation
                    .unique_key
                    .iter()
                    .any(|k| k.eq_ignore_ascii_case(&binding.destination)),
        })
        .collect();

    Ok(GeneratedModel {
        name: mapping.model_name(),
        destination: mapping.destination.clone(),
        source_tables: vec![source.name.clone()],
        materialization: mapping.materialization,
        unique_key: if mapping.is_incremental() {
            validation.unique_key.clone()
        } else {
            Vec::new()
        },
        columns,
        description: mapping.description.clone(),
        relative_path: model_path(&mapping.destination),
        sql,
    })
}

/// `models/<catalog>/<schema>/<model>.sql`, lower-cased.
pub fn model_path(destination: &QualifiedName) -> PathBuf {
    let mut path = PathBuf::from(crate::constants::MODELS_DIR);
    if let Some(catalog) = destination.catalog() {
        path.push(catalog.to_lowercase());
    }
    path.push(destination.schema().to_lowercase());
    path.push(format!("{}.sql", destination.table().to_lowercase()));
    path
}

fn find_binding<'a>(bindings: &'a [ColumnBinding], destination: &str) -> Option<&'a ColumnBinding> {
    bindings
        .iter()
        .find(|b| b.destination.eq_ignore_ascii_case(destination))
}

fn render_sql(
    mapping: &TableMapping,
    source: &TableSchema,
    validation: &TableValidation,
    watermark: Option<&(String, String)>,
) -> String {
    let mut sql = String::new();
    let dest = &mapping.destination;

    sql.push_str("{{\n");
    sql.push_str("    config(\n");
    let mut options = vec![format!(
        "materialized='{}'",
        mapping.materialization.dbt_name()
    )];
    if watermark.is_some() {
        options.push("incremental_strategy='merge'".to_string());
        let keys = validation
            .unique_key
            .iter()
            .map(|k| format!("'{}'", jinja_escape(k)))
            .collect::<Vec<_>>()
            .join(", ");
        options.push(format!("unique_key=[{}]", keys));
    }
    if let Some(catalog) = dest.catalog() {
        options.push(format!("database='{}'", jinja_escape(catalog)));
    }
    options.push(format!("schema='{}'", jinja_escape(dest.schema())));
    options.push(format!("alias='{}'", jinja_escape(dest.table())));
    sql.push_str(&format!("        {}\n", options.join(",\n        ")));
    sql.push_str("    )\n");
    sql.push_str("}}\n\n");

    sql.push_str("with source as (\n\n");
    sql.push_str(&format!(
        "    select * from {{{{ source('{}', '{}') }}}}\n",
        jinja_escape(source.name.schema()),
        jinja_escape(source.name.table())
    ));
    if let Some((source_ts, dest_ts)) = watermark {
        sql.push_str("\n    {% if is_incremental() %}\n");
        sql.push_str(&format!(
            "    where {} > (select max({}) from {{{{ this }}}})\n",
            quote_databricks(source_ts),
            quote_databricks(dest_ts)
        ));
        sql.push_str("    {% endif %}\n");
    }
    sql.push_str("\n),\n\n");

    sql.push_str("renamed as (\n\n");
    sql.push_str("    select\n");
    let projection = validation
        .bindings
        .iter()
        .map(|b| format!("        {} as {}", b.render(), quote_databricks(&b.destination)))
        .collect::<Vec<_>>()
        .join(",\n");
    sql.push_str(&projection);
    sql.push_str("\n    from source\n\n)\n\n");
    sql.push_str("select * from renamed\n");

    sql
}

fn jinja_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
