//! Mapping validation against resolved schemas.
//!
//! Validation never fails: every problem becomes a [`ValidationIssue`] and the
//! full set is returned. Error-severity issues block generation for their own
//! table only.
//!
//! Rules run in this order:
//! (a) an existing destination table must agree with the mapping (hard error
//!     for incremental models, warning for full-refresh ones)
//! (b) every source column reference must exist
//! (c) every column type must resolve through a conversion rule or override
//! (d) incremental models need their timestamp on both sides and a unique key
//!
//! The incremental timestamp column is checked by rule (d) alone, so a missing
//! watermark is reported once with its own issue code.

use crate::mapping::{ColumnMapping, ColumnSource, LiteralValue, TableMapping, Transform};
use crate::constants::DEFAULT_CAST_TEMPLATE;
use crate::identifiers::quote_databricks;
use crate::schema::{FetchResult, QualifiedName, TableSchema};
use crate::typemap::{infer_literal_type, render_cast, types_compatible, TypeConversionEngine};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Machine-readable issue kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IssueCode {
    SourceTableMissing,
    SourceUnavailable,
    DestinationUnavailable,
    DestinationSchemaConflict,
    SourceColumnMissing,
    TypeFallback,
    UntypedExpression,
    IncrementalTimestampMissing,
    IncrementalKeyMissing,
    DuplicateModelName,
    SyntaxError,
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: IssueCode,
    /// Destination table the issue belongs to.
    pub table: String,
    /// Destination or source column, when the issue is about one.
    pub column: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(
        code: IssueCode,
        table: impl Into<String>,
        column: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            code,
            table: table.into(),
            column: column.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn warning(
        code: IssueCode,
        table: impl Into<String>,
        column: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, table, column, message)
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.severity, self.code, self.table)?;
        if let Some(column) = &self.column {
            write!(f, ".{}", column)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// The value a bound column reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundValue {
    /// A source column, spelled as the source reports it.
    SourceColumn { name: String, source_type: String },
    Expression { sql: String },
    Literal { value: LiteralValue },
}

/// A destination column with its value and resolved type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnBinding {
    pub destination: String,
    pub value: BoundValue,
    pub transforms: Vec<Transform>,
    pub default: Option<LiteralValue>,
    /// `None` only for an expression without a type override.
    pub destination_type: Option<String>,
    /// Cast wrapped around the value, `None` to emit it as is.
    pub cast_template: Option<String>,
}

impl ColumnBinding {
    /// Projection expression, without the alias.
    pub fn render(&self) -> String {
        let mut expr = match &self.value {
            BoundValue::SourceColumn { name, .. } => quote_databricks(name),
            BoundValue::Expression { sql } => sql.trim().to_string(),
            BoundValue::Literal { value } => value.to_sql(),
        };
        for transform in &self.transforms {
            expr = transform.apply(&expr);
        }
        if let Some(default) = &self.default {
            let inner = match self.value {
                BoundValue::Expression { .. } => format!("({expr})"),
                _ => expr,
            };
            expr = format!("coalesce({}, {})", inner, default.to_sql());
        }
        match (&self.cast_template, &self.destination_type) {
            (Some(template), Some(ty)) => render_cast(template, &expr, ty),
            _ => expr,
        }
    }
}

/// Validation outcome for one table.
#[derive(Debug, Clone)]
pub struct TableValidation {
    pub destination: QualifiedName,
    pub issues: Vec<ValidationIssue>,
    /// Bindings in mapping order; complete only when there are no errors.
    pub bindings: Vec<ColumnBinding>,
    /// Resolved merge key, in destination spelling.
    pub unique_key: Vec<String>,
    /// Resolved source schema, when it could be fetched.
    pub source_schema: Option<Arc<TableSchema>>,
}

impl TableValidation {
    fn new(destination: QualifiedName) -> Self {
        Self {
            destination,
            issues: Vec::new(),
            bindings: Vec::new(),
            unique_key: Vec::new(),
            source_schema: None,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(ValidationIssue::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues.len() - self.error_count()
    }
}

struct Resolved<'m> {
    mapping: &'m ColumnMapping,
    binding: Option<ColumnBinding>,
    fallback_from: Option<String>,
}

/// Cross-checks mappings against resolved schemas.
pub struct MappingValidator<'a> {
    engine: &'a TypeConversionEngine,
}

impl<'a> MappingValidator<'a> {
    pub fn new(engine: &'a TypeConversionEngine) -> Self {
        Self { engine }
    }

    /// Validate every mapping, looking up fetch results by qualified name.
    pub fn validate_all(
        &self,
        mappings: &[TableMapping],
        sources: &HashMap<QualifiedName, FetchResult>,
        destinations: &HashMap<QualifiedName, FetchResult>,
    ) -> Vec<TableValidation> {
        let mut duplicates = duplicate_model_issues(mappings);

        mappings
            .iter()
            .map(|mapping| {
                let source = lookup(sources, &mapping.source, "source");
                let destination = lookup(destinations, &mapping.destination, "destination");
                let mut result = self.validate_table(mapping, &source, &destination);
                if let Some(issue) = duplicates.remove(&mapping.destination) {
                    result.issues.push(issue);
                }
                result
            })
            .collect()
    }

    /// Validate one mapping.
    pub fn validate_table(
        &self,
        mapping: &TableMapping,
        source: &FetchResult,
        destination: &FetchResult,
    ) -> TableValidation {
        let table = mapping.destination.to_string();
        let mut result = TableValidation::new(mapping.destination.clone());

        let source = match source {
            Ok(schema) => schema.clone(),
            Err(e) if e.is_not_found() => {
                result.issues.push(ValidationIssue::error(
                    IssueCode::SourceTableMissing,
                    &table,
                    None,
                    format!("source table {} does not exist", mapping.source),
                ));
                return result;
            }
            Err(e) => {
                result.issues.push(ValidationIssue::error(
                    IssueCode::SourceUnavailable,
                    &table,
                    None,
                    e.to_string(),
                ));
                return result;
            }
        };

        let destination = match destination {
            Ok(schema) => Some(schema.clone()),
            // A missing destination table is created by the model.
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                result.issues.push(ValidationIssue::error(
                    IssueCode::DestinationUnavailable,
                    &table,
                    None,
                    e.to_string(),
                ));
                None
            }
        };

        let timestamp = mapping.incremental.as_ref().map(|i| i.timestamp.as_str());
        let is_timestamp = |name: &str| timestamp.is_some_and(|t| t.eq_ignore_ascii_case(name));

        let resolved: Vec<Resolved<'_>> = mapping
            .columns
            .iter()
            .map(|c| self.bind_column(c, &source))
            .collect();

        // (a) destination schema agreement
        if let Some(dest) = &destination {
            let severity_error = mapping.is_incremental();
            for r in &resolved {
                let name = r.mapping.destination.as_str();
                let message = match dest.column(name) {
                    // A missing watermark is reported by rule (d).
                    None if is_timestamp(name) => None,
                    None => Some(format!(
                        "column does not exist in existing destination table {}",
                        dest.name
                    )),
                    Some(existing) => r
                        .binding
                        .as_ref()
                        .and_then(|b| b.destination_type.as_deref())
                        .filter(|ty| !types_compatible(ty, &existing.source_type))
                        .map(|ty| {
                            format!(
                                "mapping resolves to {} but the destination column is {}",
                                ty, existing.source_type
                            )
                        }),
                };
                if let Some(message) = message {
                    let issue = if severity_error {
                        ValidationIssue::error(
                            IssueCode::DestinationSchemaConflict,
                            &table,
                            Some(name),
                            message,
                        )
                    } else {
                        ValidationIssue::warning(
                            IssueCode::DestinationSchemaConflict,
                            &table,
                            Some(name),
                            format!("{message}; the full refresh will replace it"),
                        )
                    };
                    result.issues.push(issue);
                }
            }
        }

        // (b) source column references
        for r in resolved.iter().filter(|r| !is_timestamp(&r.mapping.destination)) {
            if let (Some(column), None) = (r.mapping.source_column(), &r.binding) {
                result.issues.push(ValidationIssue::error(
                    IssueCode::SourceColumnMissing,
                    &table,
                    Some(column),
                    format!(
                        "source column '{}' (for '{}') not found in {}",
                        column, r.mapping.destination, mapping.source
                    ),
                ));
            }
        }

        // (c) type resolution
        for r in &resolved {
            if let Some(source_type) = &r.fallback_from {
                result.issues.push(ValidationIssue::warning(
                    IssueCode::TypeFallback,
                    &table,
                    Some(&r.mapping.destination),
                    format!(
                        "no conversion rule for source type '{}'; using {}",
                        source_type,
                        self.engine.default_type()
                    ),
                ));
            }
            if matches!(r.mapping.source, ColumnSource::Expression(_))
                && r.mapping.type_override.is_none()
            {
                result.issues.push(ValidationIssue::warning(
                    IssueCode::UntypedExpression,
                    &table,
                    Some(&r.mapping.destination),
                    "expression has no type; its result type is left to Databricks",
                ));
            }
        }

        // (d) incremental requirements
        if let Some(incremental) = &mapping.incremental {
            self.check_timestamp(mapping, &incremental.timestamp, &source, destination.as_deref(), &mut result);
            result.unique_key = self.resolve_unique_key(mapping, &incremental.unique_key, &source, &mut result);
        }

        debug!(
            "Validated {}: {} error(s), {} warning(s)",
            table,
            result.error_count(),
            result.warning_count()
        );

        result.bindings = resolved.into_iter().filter_map(|r| r.binding).collect();
        result.source_schema = Some(source);
        result
    }

    fn bind_column<'m>(&self, column: &'m ColumnMapping, source: &TableSchema) -> Resolved<'m> {
        let mut fallback_from = None;

        let binding = match &column.source {
            ColumnSource::Direct | ColumnSource::Column(_) => {
                let name = column.source_column().unwrap_or(&column.destination);
                source.column(name).map(|spec| {
                    let (destination_type, cast_template) = match &column.type_override {
                        Some(ty) => (ty.clone(), DEFAULT_CAST_TEMPLATE.to_string()),
                        None => {
                            let conversion = self.engine.convert(&spec.source_type);
                            if conversion.is_fallback() {
                                fallback_from = Some(spec.source_type.clone());
                            }
                            (conversion.destination_type, conversion.cast_template)
                        }
                    };
                    ColumnBinding {
                        destination: column.destination.clone(),
                        value: BoundValue::SourceColumn {
                            name: spec.name.clone(),
                            source_type: spec.source_type.clone(),
                        },
                        transforms: column.transforms.clone(),
                        default: column.default.clone(),
                        destination_type: Some(destination_type),
                        cast_template: Some(cast_template),
                    }
                })
            }
            ColumnSource::Expression(sql) => Some(ColumnBinding {
                destination: column.destination.clone(),
                value: BoundValue::Expression { sql: sql.clone() },
                transforms: Vec::new(),
                default: column.default.clone(),
                destination_type: column.type_override.clone(),
                cast_template: column
                    .type_override
                    .as_ref()
                    .map(|_| DEFAULT_CAST_TEMPLATE.to_string()),
            }),
            ColumnSource::Literal(value) => {
                let needs_cast = column.type_override.is_some() || *value == LiteralValue::Null;
                Some(ColumnBinding {
                    destination: column.destination.clone(),
                    value: BoundValue::Literal {
                        value: value.clone(),
                    },
                    transforms: Vec::new(),
                    default: column.default.clone(),
                    destination_type: Some(
                        column
                            .type_override
                            .clone()
                            .unwrap_or_else(|| infer_literal_type(value).to_string()),
                    ),
                    cast_template: needs_cast.then(|| DEFAULT_CAST_TEMPLATE.to_string()),
                })
            }
        };

        Resolved {
            mapping: column,
            binding,
            fallback_from,
        }
    }

    fn check_timestamp(
        &self,
        mapping: &TableMapping,
        timestamp: &str,
        source: &TableSchema,
        destination: Option<&TableSchema>,
        result: &mut TableValidation,
    ) {
        let table = mapping.destination.to_string();
        let Some(column) = mapping.column(timestamp) else {
            result.issues.push(ValidationIssue::error(
                IssueCode::IncrementalTimestampMissing,
                &table,
                Some(timestamp),
                "incremental timestamp column is not mapped",
            ));
            return;
        };

        match column.source_column() {
            None => result.issues.push(ValidationIssue::error(
                IssueCode::IncrementalTimestampMissing,
                &table,
                Some(timestamp),
                "incremental timestamp must be backed by a source column",
            )),
            Some(source_column) if !source.has_column(source_column) => {
                result.issues.push(ValidationIssue::error(
                    IssueCode::IncrementalTimestampMissing,
                    &table,
                    Some(timestamp),
                    format!(
                        "incremental timestamp column '{}' not found in source table {}",
                        source_column, mapping.source
                    ),
                ))
            }
            Some(_) => {}
        }

        if let Some(dest) = destination {
            if !dest.has_column(timestamp) {
                result.issues.push(ValidationIssue::error(
                    IssueCode::IncrementalTimestampMissing,
                    &table,
                    Some(timestamp),
                    format!(
                        "incremental timestamp column '{}' not found in destination table {}",
                        timestamp, dest.name
                    ),
                ));
            }
        }
    }

    fn resolve_unique_key(
        &self,
        mapping: &TableMapping,
        configured: &[String],
        source: &TableSchema,
        result: &mut TableValidation,
    ) -> Vec<String> {
        let table = mapping.destination.to_string();
        let mut key = Vec::new();

        if !configured.is_empty() {
            for name in configured {
                match mapping.column(name) {
                    Some(column) => key.push(column.destination.clone()),
                    None => result.issues.push(ValidationIssue::error(
                        IssueCode::IncrementalKeyMissing,
                        &table,
                        Some(name),
                        format!("unique key column '{}' is not a mapped destination column", name),
                    )),
                }
            }
            return key;
        }

        if source.primary_key.is_empty() {
            result.issues.push(ValidationIssue::error(
                IssueCode::IncrementalKeyMissing,
                &table,
                None,
                format!(
                    "no unique key given and source table {} has no primary key",
                    mapping.source
                ),
            ));
            return key;
        }

        for pk in &source.primary_key {
            let mapped = mapping.columns.iter().find(|c| {
                c.source_column()
                    .is_some_and(|s| s.eq_ignore_ascii_case(pk))
            });
            match mapped {
                Some(column) => key.push(column.destination.clone()),
                None => result.issues.push(ValidationIssue::error(
                    IssueCode::IncrementalKeyMissing,
                    &table,
                    Some(pk),
                    format!("primary key column '{}' is not mapped, so it cannot be the unique key", pk),
                )),
            }
        }
        key
    }
}

fn lookup(
    results: &HashMap<QualifiedName, FetchResult>,
    name: &QualifiedName,
    side: &str,
) -> FetchResult {
    results.get(name).cloned().unwrap_or_else(|| {
        Err(crate::error::SchemaError::unavailable(
            side,
            name.to_string(),
            "table was not resolved",
        ))
    })
}

/// Flag destination tables that would produce the same dbt model name.
pub fn duplicate_model_issues(mappings: &[TableMapping]) -> BTreeMap<QualifiedName, ValidationIssue> {
    let mut by_model: BTreeMap<String, Vec<&QualifiedName>> = BTreeMap::new();
    for mapping in mappings {
        by_model
            .entry(mapping.model_name())
            .or_default()
            .push(&mapping.destination);
    }

    let mut issues = BTreeMap::new();
    for (model, tables) in by_model.into_iter().filter(|(_, t)| t.len() > 1) {
        let all = tables
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        for destination in tables {
            issues.insert(
                destination.clone(),
                ValidationIssue::error(
                    IssueCode::DuplicateModelName,
                    destination.to_string(),
                    None,
                    format!("model name '{}' is shared by {}", model, all),
                ),
            );
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use crate::mapping::{parse_mapping_str, MappingFormat, MappingSet};
    use crate::schema::ColumnSpec;

    fn mapping(yaml: &str) -> MappingSet {
        parse_mapping_str(yaml, MappingFormat::Yaml).unwrap()
    }

    fn schema(name: &str, columns: &[(&str, &str)], pk: &[&str]) -> FetchResult {
        Ok(Arc::new(TableSchema::new(
            QualifiedName::parse(name).unwrap(),
            columns
                .iter()
                .map(|(n, t)| ColumnSpec::new(*n, *t, true, 0))
                .collect(),
            pk.iter().map(|s| s.to_string()).collect(),
        )))
    }

    fn missing(name: &str) -> FetchResult {
        Err(SchemaError::not_found("test", name))
    }

    const CUSTOMERS: &str = r#"
tables:
  - source: dbo.Customers
    destination: catalog.schema.customers
    columns:
      - { dest: id, source: CustomerID }
      - { dest: name, source: CustomerName }
    incremental: { timestamp: ModifiedDate, key: id }
"#;

    fn source_customers() -> FetchResult {
        schema(
            "dbo.Customers",
            &[
                ("CustomerID", "int"),
                ("CustomerName", "nvarchar(100)"),
                ("ModifiedDate", "datetime2"),
            ],
            &["CustomerID"],
        )
    }

    fn codes(v: &TableValidation) -> Vec<IssueCode> {
        v.issues.iter().map(|i| i.code).collect()
    }

    #[test]
    fn test_clean_incremental_mapping() {
        let set = mapping(CUSTOMERS);
        let engine = TypeConversionEngine::default();
        let dest = schema(
            "catalog.schema.customers",
            &[("id", "INT"), ("name", "STRING"), ("ModifiedDate", "TIMESTAMP")],
            &[],
        );

        let v = MappingValidator::new(&engine).validate_table(&set.tables[0], &source_customers(), &dest);
        assert!(v.issues.is_empty(), "{:?}", v.issues);
        assert_eq!(v.bindings.len(), 3);
        assert_eq!(v.unique_key, vec!["id"]);
        assert_eq!(v.bindings[0].render(), "CAST(CustomerID AS INT)");
    }

    #[test]
    fn test_destination_missing_timestamp_is_distinct_issue() {
        let set = mapping(CUSTOMERS);
        let engine = TypeConversionEngine::default();
        let dest = schema(
            "catalog.schema.customers",
            &[("id", "INT"), ("name", "STRING")],
            &[],
        );

        let v = MappingValidator::new(&engine).validate_table(&set.tables[0], &source_customers(), &dest);
        assert_eq!(codes(&v), vec![IssueCode::IncrementalTimestampMissing]);
        assert!(v.has_errors());
        assert_eq!(v.issues[0].column.as_deref(), Some("ModifiedDate"));
    }

    #[test]
    fn test_incompatible_destination_timestamp_blocks_incremental() {
        let set = mapping(CUSTOMERS);
        let engine = TypeConversionEngine::default();
        let dest = schema(
            "catalog.schema.customers",
            &[("id", "INT"), ("name", "STRING"), ("ModifiedDate", "INT")],
            &[],
        );

        let v = MappingValidator::new(&engine).validate_table(&set.tables[0], &source_customers(), &dest);
        assert_eq!(codes(&v), vec![IssueCode::DestinationSchemaConflict]);
        assert!(v.has_errors());
        assert_eq!(v.issues[0].column.as_deref(), Some("ModifiedDate"));
        assert!(v.issues[0].message.contains("TIMESTAMP"));
    }

    #[test]
    fn test_missing_source_column() {
        let set = mapping(
            r#"
tables:
  - source: dbo.Customers
    destination: s.customers
    columns: [{ dest: id, source: CustomerID }, { dest: phone, source: Phone }]
"#,
        );
        let engine = TypeConversionEngine::default();
        let v = MappingValidator::new(&engine).validate_table(
            &set.tables[0],
            &source_customers(),
            &missing("s.customers"),
        );
        assert_eq!(codes(&v), vec![IssueCode::SourceColumnMissing]);
        assert_eq!(v.issues[0].column.as_deref(), Some("Phone"));
        assert!(v.issues[0].message.contains("Phone"));
    }

    #[test]
    fn test_same_name_default_mapping_resolves() {
        let set = mapping(
            r#"
tables:
  - source: dbo.Customers
    destination: s.customers
    columns: [{ dest: customername }]
"#,
        );
        let engine = TypeConversionEngine::default();
        let v = MappingValidator::new(&engine).validate_table(
            &set.tables[0],
            &source_customers(),
            &missing("s.customers"),
        );
        assert!(v.issues.is_empty());
        assert_eq!(v.bindings[0].render(), "CAST(CustomerName AS STRING)");
    }

    #[test]
    fn test_unknown_type_warns_without_blocking() {
        let set = mapping(
            r#"
tables:
  - source: dbo.Places
    destination: s.places
    columns: [{ dest: Location }]
"#,
        );
        let engine = TypeConversionEngine::default();
        let v = MappingValidator::new(&engine).validate_table(
            &set.tables[0],
            &schema("dbo.Places", &[("Location", "geography")], &[]),
            &missing("s.places"),
        );
        assert_eq!(codes(&v), vec![IssueCode::TypeFallback]);
        assert!(!v.has_errors());
        assert_eq!(v.bindings[0].destination_type.as_deref(), Some("STRING"));
    }

    #[test]
    fn test_destination_conflict_severity_depends_on_mode() {
        let engine = TypeConversionEngine::default();
        let dest = schema(
            "catalog.schema.customers",
            &[("id", "BIGINT"), ("name", "STRING"), ("ModifiedDate", "TIMESTAMP")],
            &[],
        );

        let incremental = mapping(CUSTOMERS);
        let v = MappingValidator::new(&engine).validate_table(&incremental.tables[0], &source_customers(), &dest);
        assert_eq!(codes(&v), vec![IssueCode::DestinationSchemaConflict]);
        assert!(v.has_errors());

        let full = mapping(
            r#"
tables:
  - source: dbo.Customers
    destination: catalog.schema.customers
    columns: [{ dest: id, source: CustomerID }, { dest: name, source: CustomerName }]
"#,
        );
        let v = MappingValidator::new(&engine).validate_table(&full.tables[0], &source_customers(), &dest);
        assert_eq!(codes(&v), vec![IssueCode::DestinationSchemaConflict]);
        assert!(!v.has_errors());
    }

    #[test]
    fn test_source_table_errors() {
        let set = mapping(CUSTOMERS);
        let engine = TypeConversionEngine::default();
        let validator = MappingValidator::new(&engine);

        let v = validator.validate_table(&set.tables[0], &missing("dbo.Customers"), &missing("x.y"));
        assert_eq!(codes(&v), vec![IssueCode::SourceTableMissing]);

        let down = Err(SchemaError::unavailable("sqlserver", "dbo.Customers", "timed out"));
        let v = validator.validate_table(&set.tables[0], &down, &missing("x.y"));
        assert_eq!(codes(&v), vec![IssueCode::SourceUnavailable]);
        assert!(v.bindings.is_empty());
    }

    #[test]
    fn test_unique_key_from_primary_key() {
        let set = mapping(
            r#"
tables:
  - source: dbo.Customers
    destination: s.customers
    columns: [{ dest: id, source: customerid }, { dest: name, source: CustomerName }]
    incremental: { timestamp: ModifiedDate }
"#,
        );
        let engine = TypeConversionEngine::default();
        let v = MappingValidator::new(&engine).validate_table(
            &set.tables[0],
            &source_customers(),
            &missing("s.customers"),
        );
        assert!(v.issues.is_empty(), "{:?}", v.issues);
        assert_eq!(v.unique_key, vec!["id"]);
    }

    #[test]
    fn test_unique_key_missing() {
        let set = mapping(
            r#"
tables:
  - source: dbo.Customers
    destination: s.customers
    columns: [{ dest: name, source: CustomerName }]
    incremental: { timestamp: ModifiedDate }
  - source: dbo.Customers
    destination: s.customers2
    columns: [{ dest: name, source: CustomerName }]
    incremental: { timestamp: ModifiedDate, key: [name, nope] }
"#,
        );
        let engine = TypeConversionEngine::default();
        let validator = MappingValidator::new(&engine);

        let v = validator.validate_table(&set.tables[0], &source_customers(), &missing("s.customers"));
        assert_eq!(codes(&v), vec![IssueCode::IncrementalKeyMissing]);
        assert_eq!(v.issues[0].column.as_deref(), Some("CustomerID"));

        let v = validator.validate_table(&set.tables[1], &source_customers(), &missing("s.customers2"));
        assert_eq!(codes(&v), vec![IssueCode::IncrementalKeyMissing]);
        assert_eq!(v.unique_key, vec!["name"]);
    }

    #[test]
    fn test_expression_and_literal_bindings() {
        let set = mapping(
            r#"
tables:
  - source: dbo.Customers
    destination: s.customers
    columns:
      - { dest: loaded_at, expression: "current_timestamp()" }
      - { dest: region, literal: "EU" }
      - { dest: note, literal: null }
      - { dest: score, literal: 1, type: INT }
      - { dest: name, source: CustomerName, transform: [trim, nullif_empty], default: "n/a" }
"#,
        );
        let engine = TypeConversionEngine::default();
        let v = MappingValidator::new(&engine).validate_table(
            &set.tables[0],
            &source_customers(),
            &missing("s.customers"),
        );
        assert_eq!(codes(&v), vec![IssueCode::UntypedExpression]);

        let rendered: Vec<String> = v.bindings.iter().map(ColumnBinding::render).collect();
        assert_eq!(
            rendered,
            vec![
                "current_timestamp()".to_string(),
                "'EU'".to_string(),
                "CAST(NULL AS STRING)".to_string(),
                "CAST(1 AS INT)".to_string(),
                "CAST(coalesce(nullif(trim(CustomerName), ''), 'n/a') AS STRING)".to_string(),
            ]
        );
    }

    #[test]
    fn test_duplicate_model_names() {
        let set = mapping(
            r#"
tables:
  - { source: dbo.A, destination: sales.customers, columns: [{ dest: id }] }
  - { source: dbo.B, destination: crm.Customers, columns: [{ dest: id }] }
  - { source: dbo.C, destination: crm.orders, columns: [{ dest: id }] }
"#,
        );
        let issues = duplicate_model_issues(&set.tables);
        assert_eq!(issues.len(), 2);
        assert!(issues.values().all(|i| i.code == IssueCode::DuplicateModelName));
    }

    #[test]
    fn test_issue_display() {
        let issue = ValidationIssue::error(
            IssueCode::SourceColumnMissing,
            "s.customers",
            Some("Phone"),
            "not found",
        );
        assert_eq!(
            issue.to_string(),
            "error [SourceColumnMissing] s.customers.Phone: not found"
        );
    }
}
