//! Mapping document parsing and structural checks.

use super::document::{ColumnEntry, MappingDocument, TableEntry};
use super::{
    ColumnMapping, ColumnSource, IncrementalConfig, LiteralValue, MappingSet, Materialization,
    ProjectOverrides, SourceLocation, TableMapping, Transform,
};
use crate::constants::SUPPORTED_MAPPING_VERSION;
use crate::error::GeneratorError;
use crate::identifiers::validate_identifier;
use crate::schema::QualifiedName;
use crate::typemap::TypeConversionRule;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Serialization format of a mapping document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingFormat {
    Yaml,
    Json,
}

impl MappingFormat {
    /// Pick a format from the file extension, then from the content.
    pub fn detect(path: Option<&Path>, content: &str) -> Self {
        let by_extension = path
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"));
        match by_extension {
            Some(true) => MappingFormat::Json,
            _ if content.trim_start().starts_with('{') => MappingFormat::Json,
            _ => MappingFormat::Yaml,
        }
    }
}

/// Load and parse a mapping document from disk.
pub fn parse_mapping_file<P: AsRef<Path>>(path: P) -> Result<MappingSet, GeneratorError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        GeneratorError::mapping(format!("cannot read {}: {}", path.display(), e))
    })?;
    let format = MappingFormat::detect(Some(path), &content);
    debug!("Parsing mapping document {} as {:?}", path.display(), format);
    parse_mapping_str(&content, format)
}

/// Parse a mapping document held in memory.
pub fn parse_mapping_str(content: &str, format: MappingFormat) -> Result<MappingSet, GeneratorError> {
    if content.trim().is_empty() {
        return Err(GeneratorError::mapping("mapping document is empty"));
    }

    let document: MappingDocument = match format {
        MappingFormat::Yaml => serde_yaml::from_str(content).map_err(|e| {
            let location = e
                .location()
                .map(|l| format!("line {} column {}", l.line(), l.column()));
            GeneratorError::MappingParse {
                message: e.to_string(),
                location,
            }
        })?,
        MappingFormat::Json => serde_json::from_str(content).map_err(|e| {
            GeneratorError::mapping_at(
                format!("line {} column {}", e.line(), e.column()),
                e.to_string(),
            )
        })?,
    };

    build_mapping_set(document)
}

fn build_mapping_set(document: MappingDocument) -> Result<MappingSet, GeneratorError> {
    if document.version != SUPPORTED_MAPPING_VERSION {
        return Err(GeneratorError::mapping_at(
            "version",
            format!(
                "unsupported mapping version {} (expected {})",
                document.version, SUPPORTED_MAPPING_VERSION
            ),
        ));
    }
    if document.tables.is_empty() {
        return Err(GeneratorError::mapping_at("tables", "no tables are mapped"));
    }

    let type_rules = document
        .type_conversions
        .iter()
        .enumerate()
        .map(|(i, rule)| {
            TypeConversionRule::new(&rule.source, &rule.destination, rule.cast.as_deref())
                .map_err(|e| GeneratorError::mapping_at(format!("type_conversions[{i}]"), e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let default_materialization = document.defaults.materialization;
    let mut seen_destinations = HashSet::new();
    let mut tables = Vec::with_capacity(document.tables.len());

    for (i, entry) in document.tables.into_iter().enumerate() {
        let location = format!("tables[{i}]");
        let table = build_table(entry, default_materialization, &location)?;

        if !seen_destinations.insert(table.destination.clone()) {
            return Err(GeneratorError::mapping_at(
                location,
                format!("destination table {} is mapped more than once", table.destination),
            ));
        }
        tables.push(table);
    }

    let project = document
        .project
        .map(|p| ProjectOverrides {
            name: p.name,
            profile: p.profile,
            version: p.version,
        })
        .unwrap_or_default();

    for (field, value) in [
        ("defaults.source_database", &document.defaults.source_database),
        ("defaults.source_schema", &document.defaults.source_schema),
    ] {
        if let Some(value) = value {
            validate_identifier(value).map_err(|e| GeneratorError::mapping_at(field, message_of(&e)))?;
        }
    }

    info!(
        "Parsed mapping document: {} table(s), {} custom type rule(s)",
        tables.len(),
        type_rules.len()
    );

    Ok(MappingSet {
        version: document.version,
        project,
        source_location: SourceLocation {
            database: document.defaults.source_database,
            schema: document.defaults.source_schema,
        },
        type_rules,
        tables,
    })
}

fn build_table(
    entry: TableEntry,
    default_materialization: Option<Materialization>,
    location: &str,
) -> Result<TableMapping, GeneratorError> {
    let source = QualifiedName::parse(&entry.source)
        .map_err(|e| GeneratorError::mapping_at(format!("{location}.source"), message_of(&e)))?;
    let destination = QualifiedName::parse(&entry.destination).map_err(|e| {
        GeneratorError::mapping_at(format!("{location}.destination"), message_of(&e))
    })?;

    if entry.columns.is_empty() {
        return Err(GeneratorError::mapping_at(
            format!("{location}.columns"),
            format!("{} has no column mappings", destination),
        ));
    }

    let mut columns = Vec::with_capacity(entry.columns.len());
    let mut seen = HashSet::new();
    for (j, column) in entry.columns.into_iter().enumerate() {
        let column_location = format!("{location}.columns[{j}]");
        let column = build_column(column, &column_location)?;
        if !seen.insert(column.destination.to_lowercase()) {
            return Err(GeneratorError::mapping_at(
                column_location,
                format!("destination column '{}' is mapped more than once", column.destination),
            ));
        }
        columns.push(column);
    }

    let materialization = match (entry.materialization, &entry.incremental) {
        (Some(Materialization::Incremental), None) => {
            return Err(GeneratorError::mapping_at(
                location,
                "materialization is incremental but no incremental block is given",
            ))
        }
        (Some(Materialization::FullRefresh), Some(_)) => {
            return Err(GeneratorError::mapping_at(
                location,
                "an incremental block requires incremental materialization",
            ))
        }
        (Some(m), _) => m,
        (None, Some(_)) => Materialization::Incremental,
        (None, None) => match default_materialization {
            Some(Materialization::Incremental) => {
                return Err(GeneratorError::mapping_at(
                    location,
                    "default materialization is incremental but no incremental block is given",
                ))
            }
            _ => Materialization::FullRefresh,
        },
    };

    let incremental = match entry.incremental {
        Some(inc) => {
            let inc_location = format!("{location}.incremental");
            validate_identifier(&inc.timestamp).map_err(|e| {
                GeneratorError::mapping_at(format!("{inc_location}.timestamp"), message_of(&e))
            })?;

            let unique_key = inc.key.map(|k| k.into_vec()).unwrap_or_default();
            for key in &unique_key {
                validate_identifier(key).map_err(|e| {
                    GeneratorError::mapping_at(format!("{inc_location}.key"), message_of(&e))
                })?;
            }

            // The watermark column is always projected.
            if !seen.contains(&inc.timestamp.to_lowercase()) {
                debug!(
                    "Adding implicit mapping for incremental timestamp {} on {}",
                    inc.timestamp, destination
                );
                columns.push(ColumnMapping::direct(inc.timestamp.clone()));
            }

            Some(IncrementalConfig {
                timestamp: inc.timestamp,
                unique_key,
            })
        }
        None => None,
    };

    Ok(TableMapping {
        source,
        destination,
        columns,
        incremental,
        materialization,
        description: entry.description,
    })
}

fn build_column(entry: ColumnEntry, location: &str) -> Result<ColumnMapping, GeneratorError> {
    validate_identifier(&entry.dest)
        .map_err(|e| GeneratorError::mapping_at(format!("{location}.dest"), message_of(&e)))?;

    let given = [
        entry.source.is_some(),
        entry.expression.is_some(),
        entry.literal.is_some(),
    ]
    .iter()
    .filter(|b| **b)
    .count();
    if given > 1 {
        return Err(GeneratorError::mapping_at(
            location,
            format!(
                "column '{}' must use only one of source, expression or literal",
                entry.dest
            ),
        ));
    }

    let source = match (entry.source, entry.expression, entry.literal) {
        (Some(column), _, _) => {
            validate_identifier(&column).map_err(|e| {
                GeneratorError::mapping_at(format!("{location}.source"), message_of(&e))
            })?;
            if column.eq_ignore_ascii_case(&entry.dest) {
                ColumnSource::Direct
            } else {
                ColumnSource::Column(column)
            }
        }
        (None, Some(expression), _) => {
            if expression.trim().is_empty() {
                return Err(GeneratorError::mapping_at(
                    format!("{location}.expression"),
                    "expression is empty",
                ));
            }
            ColumnSource::Expression(expression)
        }
        (None, None, Some(literal)) => ColumnSource::Literal(literal.unwrap_or(LiteralValue::Null)),
        (None, None, None) => ColumnSource::Direct,
    };

    let transforms = entry
        .transform
        .map(|t| t.into_vec())
        .unwrap_or_default()
        .iter()
        .map(|t| t.parse::<Transform>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GeneratorError::mapping_at(format!("{location}.transform"), e))?;

    if !transforms.is_empty() && !matches!(source, ColumnSource::Direct | ColumnSource::Column(_)) {
        return Err(GeneratorError::mapping_at(
            format!("{location}.transform"),
            format!(
                "column '{}': transforms apply only to source columns",
                entry.dest
            ),
        ));
    }

    let type_override = match entry.type_override {
        Some(t) if t.trim().is_empty() => {
            return Err(GeneratorError::mapping_at(format!("{location}.type"), "type is empty"))
        }
        other => other.map(|t| t.trim().to_string()),
    };

    Ok(ColumnMapping {
        destination: entry.dest,
        source,
        transforms,
        type_override,
        default: entry.default,
        description: entry.description,
    })
}

/// Drop the "Mapping parse error: " prefix from a nested error.
fn message_of(err: &GeneratorError) -> String {
    match err {
        GeneratorError::MappingParse { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
