//! End-to-end pipeline tests against in-memory schema snapshots.
//!
//! Every test runs the full parse, resolve, validate, generate sequence; the
//! emission tests also write a project into a temporary directory.

use dbt_model_generator::schema::{
    ColumnSpec, Dialect, QualifiedName, SharedProvider, SnapshotSchemaProvider, TableSchema,
};
use dbt_model_generator::{
    parse_mapping_str, GeneratorConfig, IssueCode, MappingFormat, Pipeline, ProjectConfig,
    ProjectEmitter, RunReport, Severity, TableOutcome,
};
use std::sync::Arc;

// =============================================================================
// Fixtures
// =============================================================================

fn table(name: &str, columns: &[(&str, &str)], primary_key: &[&str]) -> TableSchema {
    TableSchema::new(
        QualifiedName::parse(name).unwrap(),
        columns
            .iter()
            .enumerate()
            .map(|(i, (n, t))| ColumnSpec::new(*n, *t, true, i as u32 + 1))
            .collect(),
        primary_key.iter().map(|k| k.to_string()).collect(),
    )
}

fn customers_source() -> TableSchema {
    table(
        "dbo.Customers",
        &[
            ("CustomerID", "int"),
            ("CustomerName", "nvarchar(100)"),
            ("Email", "varchar(255)"),
            ("GeoPoint", "geography"),
            ("ModifiedDate", "datetime2"),
        ],
        &["CustomerID"],
    )
}

fn orders_source() -> TableSchema {
    table(
        "dbo.Orders",
        &[
            ("OrderID", "bigint"),
            ("CustomerID", "int"),
            ("Total", "decimal(18,2)"),
        ],
        &["OrderID"],
    )
}

fn customers_destination(with_timestamp: bool) -> TableSchema {
    let mut columns = vec![("id", "INT"), ("name", "STRING")];
    if with_timestamp {
        columns.push(("ModifiedDate", "TIMESTAMP"));
    }
    table("catalog.schema.customers", &columns, &[])
}

fn source_provider() -> Arc<SnapshotSchemaProvider> {
    Arc::new(SnapshotSchemaProvider::from_tables(
        "test-source",
        Dialect::SqlServer,
        vec![customers_source(), orders_source()],
    ))
}

fn destination_provider(tables: Vec<TableSchema>) -> SharedProvider {
    Arc::new(SnapshotSchemaProvider::from_tables(
        "test-destination",
        Dialect::Databricks,
        tables,
    ))
}

async fn run(yaml: &str, destination: Vec<TableSchema>) -> RunReport {
    run_with(yaml, destination, GeneratorConfig::default()).await
}

async fn run_with(yaml: &str, destination: Vec<TableSchema>, config: GeneratorConfig) -> RunReport {
    let mappings = parse_mapping_str(yaml, MappingFormat::Yaml).unwrap();
    let pipeline = Pipeline::from_config(source_provider(), destination_provider(destination), &config);
    pipeline.run(&mappings).await
}

const INCREMENTAL_CUSTOMERS: &str = r#"
tables:
  - source: dbo.Customers
    destination: catalog.schema.customers
    columns:
      - { dest: id, source: CustomerID }
      - { dest: name, source: CustomerName }
    incremental: { timestamp: ModifiedDate, key: id }
"#;

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_incremental_customers_scenario() {
    let report = run(INCREMENTAL_CUSTOMERS, vec![customers_destination(true)]).await;

    assert_eq!(report.issues().count(), 0, "{:?}", report.tables[0].issues);
    assert_eq!(report.generated_count(), 1);
    assert_eq!(report.exit_code(), 0);

    let model = &report.models[0];
    assert_eq!(model.name, "customers");
    assert_eq!(model.unique_key, vec!["id"]);
    assert!(model.sql.contains("materialized='incremental'"));
    assert!(model.sql.contains("unique_key=['id']"));
    assert!(model.sql.contains("{% if is_incremental() %}"));
    assert!(model.sql.contains("where ModifiedDate > (select max(ModifiedDate) from {{ this }})"));
    assert!(model.sql.contains("{{ source('dbo', 'Customers') }}"));
}

#[tokio::test]
async fn test_missing_destination_timestamp_blocks_table() {
    let report = run(INCREMENTAL_CUSTOMERS, vec![customers_destination(false)]).await;

    let issues = &report.tables[0].issues;
    assert_eq!(issues.len(), 1, "{:?}", issues);
    assert_eq!(issues[0].severity, Severity::Error);
    assert_eq!(issues[0].code, IssueCode::IncrementalTimestampMissing);
    assert_eq!(issues[0].column.as_deref(), Some("ModifiedDate"));

    assert_eq!(report.tables[0].outcome, TableOutcome::Blocked);
    assert!(report.models.is_empty());
    assert_ne!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_missing_source_column_blocks_generation() {
    let yaml = r#"
tables:
  - source: dbo.Customers
    destination: sales.customers
    columns:
      - { dest: id, source: CustomerID }
      - { dest: phone, source: PhoneNumber }
"#;
    let report = run(yaml, vec![]).await;

    let issues = &report.tables[0].issues;
    assert!(issues.iter().any(|i| i.code == IssueCode::SourceColumnMissing
        && i.severity == Severity::Error
        && i.column.as_deref() == Some("PhoneNumber")));
    // Distinct from the incremental timestamp case.
    assert!(!issues.iter().any(|i| i.code == IssueCode::IncrementalTimestampMissing));
    assert_eq!(report.tables[0].outcome, TableOutcome::Blocked);
    assert!(report.models.is_empty());
}

#[tokio::test]
async fn test_same_name_column_resolves_without_issues() {
    let yaml = r#"
tables:
  - source: dbo.Customers
    destination: sales.customers
    columns:
      - { dest: CustomerID }
      - { dest: Email, default: "unknown" }
"#;
    let report = run(yaml, vec![]).await;

    assert_eq!(report.issues().count(), 0);
    let sql = &report.models[0].sql;
    assert!(sql.contains("CAST(CustomerID AS INT) as CustomerID"));
    assert!(sql.contains("CAST(coalesce(Email, 'unknown') AS STRING) as Email"));
}

#[tokio::test]
async fn test_unknown_source_type_falls_back_with_warning() {
    let yaml = r#"
tables:
  - source: dbo.Customers
    destination: sales.customer_geo
    columns:
      - { dest: id, source: CustomerID }
      - { dest: geo, source: GeoPoint }
"#;
    let report = run(yaml, vec![]).await;

    assert_eq!(report.generated_count(), 1);
    assert_eq!(report.exit_code(), 0);
    let issues = &report.tables[0].issues;
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].code, IssueCode::TypeFallback);
    assert_eq!(issues[0].severity, Severity::Warning);
    assert!(report.models[0].sql.contains("CAST(GeoPoint AS STRING) as geo"));
}

#[tokio::test]
async fn test_configured_default_type_is_used_for_fallback() {
    let yaml = r#"
tables:
  - source: dbo.Customers
    destination: sales.customer_geo
    columns:
      - { dest: geo, source: GeoPoint }
"#;
    let config = GeneratorConfig {
        default_type: "BINARY".to_string(),
        ..GeneratorConfig::default()
    };
    let report = run_with(yaml, vec![], config).await;
    assert!(report.models[0].sql.contains("CAST(GeoPoint AS BINARY) as geo"));
}

#[tokio::test]
async fn test_user_type_rule_overrides_builtin() {
    let yaml = r#"
type_conversions:
  - source: "decimal(p,s)"
    destination: "DECIMAL(38,{s})"
tables:
  - source: dbo.Orders
    destination: sales.orders
    columns:
      - { dest: order_id, source: OrderID }
      - { dest: total, source: Total }
"#;
    let report = run(yaml, vec![]).await;
    assert_eq!(report.issues().count(), 0);
    assert!(report.models[0].sql.contains("CAST(Total AS DECIMAL(38,2)) as total"));
}

// =============================================================================
// Partial failure and determinism
// =============================================================================

#[tokio::test]
async fn test_partial_failure_still_generates_valid_tables() {
    let yaml = r#"
tables:
  - source: dbo.Orders
    destination: sales.orders
    columns:
      - { dest: order_id, source: OrderID }
  - source: dbo.Invoices
    destination: sales.invoices
    columns:
      - { dest: id, source: InvoiceID }
"#;
    let report = run(yaml, vec![]).await;

    assert_eq!(report.generated_count(), 1);
    assert_eq!(report.blocked_count(), 1);
    assert_eq!(report.models[0].name, "orders");
    assert_eq!(report.tables[1].issues[0].code, IssueCode::SourceTableMissing);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_one_model_per_mapping_and_deterministic_output() {
    let yaml = r#"
tables:
  - source: dbo.Orders
    destination: sales.orders
    columns:
      - { dest: order_id, source: OrderID }
      - { dest: customer_id, source: CustomerID }
  - source: dbo.Customers
    destination: sales.customers
    columns:
      - { dest: id, source: CustomerID }
      - { dest: region, literal: "EU" }
"#;
    let first = run(yaml, vec![]).await;
    let second = run(yaml, vec![]).await;

    assert_eq!(first.models.len(), 2);
    let sql = |r: &RunReport| r.models.iter().map(|m| m.sql.clone()).collect::<Vec<_>>();
    assert_eq!(sql(&first), sql(&second));
}

#[tokio::test]
async fn test_shared_source_table_is_fetched_once() {
    let yaml = r#"
tables:
  - source: dbo.Customers
    destination: sales.customers
    columns:
      - { dest: id, source: CustomerID }
  - source: DBO.CUSTOMERS
    destination: marketing.customer_emails
    columns:
      - { dest: email, source: Email }
"#;
    let mappings = parse_mapping_str(yaml, MappingFormat::Yaml).unwrap();
    let source = source_provider();
    let pipeline = Pipeline::from_config(
        source.clone() as SharedProvider,
        destination_provider(vec![]),
        &GeneratorConfig::default(),
    );
    let report = pipeline.run(&mappings).await;

    assert_eq!(report.generated_count(), 2);
    assert_eq!(source.lookup_count(), 1);
    assert_eq!(report.source_stats.provider_calls, 1);
}

#[tokio::test]
async fn test_syntax_check_withholds_broken_expression() {
    let yaml = r#"
tables:
  - source: dbo.Customers
    destination: sales.customers
    columns:
      - { dest: id, source: CustomerID }
      - { dest: shout, expression: "upper(CustomerName", type: STRING }
"#;
    let config = GeneratorConfig {
        check_syntax: true,
        ..GeneratorConfig::default()
    };
    let report = run_with(yaml, vec![], config).await;

    assert_eq!(report.tables[0].outcome, TableOutcome::Blocked);
    assert!(report.tables[0]
        .issues
        .iter()
        .any(|i| i.code == IssueCode::SyntaxError));
    assert!(report.models.is_empty());
}

// =============================================================================
// Emission
// =============================================================================

#[tokio::test]
async fn test_emitted_project_is_stable_across_runs() {
    let mappings = parse_mapping_str(INCREMENTAL_CUSTOMERS, MappingFormat::Yaml).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let emitter = ProjectEmitter::new(
        dir.path(),
        mappings.project.apply(ProjectConfig::default()),
        mappings.source_location.clone(),
    );

    let report = run(INCREMENTAL_CUSTOMERS, vec![customers_destination(true)]).await;
    let first = emitter.emit(&report.models).unwrap();
    assert_eq!(first.written.len(), 5);

    let model_path = dir.path().join("models/catalog/schema/customers.sql");
    let before = std::fs::read_to_string(&model_path).unwrap();
    assert_eq!(before, report.models[0].sql);

    let report = run(INCREMENTAL_CUSTOMERS, vec![customers_destination(true)]).await;
    let second = emitter.emit(&report.models).unwrap();
    assert!(second.written.is_empty());
    assert_eq!(std::fs::read_to_string(&model_path).unwrap(), before);

    let schema = std::fs::read_to_string(dir.path().join("models/schema.yml")).unwrap();
    assert!(schema.contains("name: customers"));
    assert!(schema.contains("- unique"));
}
