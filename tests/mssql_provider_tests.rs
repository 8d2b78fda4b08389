//! Live tests for the SQL Server schema provider.
//!
//! These tests support two modes:
//! 1. **Testcontainers** (default): Automatically spins up a SQL Server container
//! 2. **External server**: Connect to an existing server via the MSSQL_HOST env var
//!
//! ## Running with testcontainers (requires Docker):
//! ```bash
//! cargo test --test mssql_provider_tests -- --ignored --test-threads=1
//! ```
//!
//! ## Running against an external server:
//! ```bash
//! MSSQL_HOST=localhost MSSQL_PORT=1433 MSSQL_PASSWORD='yourPass' \
//!   cargo test --test mssql_provider_tests -- --ignored --test-threads=1
//! ```
//!
//! Note: SQL Server container requires ~2GB RAM and takes 30-60 seconds to start.

use dbt_model_generator::constants::APPLICATION_NAME;
use dbt_model_generator::schema::{
    Dialect, MssqlSchemaProvider, QualifiedName, SchemaProvider, SharedProvider,
    SnapshotSchemaProvider,
};
use dbt_model_generator::{
    parse_mapping_str, GeneratorConfig, MappingFormat, Pipeline, SqlServerConfig,
};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::mssql_server::MssqlServer;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;

/// Default SA password for testcontainers.
const DEFAULT_SA_PASSWORD: &str = "yourStrong(!)Password";

/// Default SQL Server image tag for tests.
const DEFAULT_VERSION: &str = "2022-latest";

const SETUP_SQL: &str = "
IF OBJECT_ID('dbo.GenCustomers', 'U') IS NOT NULL DROP TABLE dbo.GenCustomers;
CREATE TABLE dbo.GenCustomers (
    CustomerID INT NOT NULL,
    CustomerName NVARCHAR(100) NULL,
    Notes NVARCHAR(MAX) NULL,
    Balance DECIMAL(18, 2) NULL,
    RowGuid UNIQUEIDENTIFIER NOT NULL,
    ModifiedDate DATETIME2 NOT NULL,
    CONSTRAINT PK_GenCustomers PRIMARY KEY (CustomerID)
);
";

/// Test database connection source.
#[allow(dead_code)] // Variants held for lifetime management (Drop trait)
enum TestDatabaseSource {
    External,
    Container(Box<ContainerAsync<MssqlServer>>),
}

struct TestDatabase {
    #[allow(dead_code)] // Held for lifetime management (Drop trait on Container)
    source: TestDatabaseSource,
    host: String,
    port: u16,
    password: String,
}

impl TestDatabase {
    /// Uses an external server if MSSQL_HOST is set, otherwise testcontainers.
    async fn new() -> Self {
        match std::env::var("MSSQL_HOST") {
            Ok(host) => Self {
                source: TestDatabaseSource::External,
                host,
                port: std::env::var("MSSQL_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(1433),
                password: std::env::var("MSSQL_PASSWORD")
                    .unwrap_or_else(|_| DEFAULT_SA_PASSWORD.to_string()),
            },
            Err(_) => Self::from_testcontainer().await,
        }
    }

    async fn from_testcontainer() -> Self {
        let version =
            std::env::var("MSSQL_TEST_VERSION").unwrap_or_else(|_| DEFAULT_VERSION.to_string());
        eprintln!("Starting SQL Server {} container via testcontainers...", version);

        let container = MssqlServer::default()
            .with_accept_eula()
            .with_tag(version.as_str())
            .start()
            .await
            .unwrap_or_else(|e| panic!("Failed to start SQL Server {} container: {}", version, e));

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(1433)
            .await
            .expect("Failed to get port");

        // Wait a bit for SQL Server to fully initialize
        tokio::time::sleep(Duration::from_secs(5)).await;

        Self {
            source: TestDatabaseSource::Container(Box::new(container)),
            host: host.to_string(),
            port,
            password: DEFAULT_SA_PASSWORD.to_string(),
        }
    }

    fn config(&self) -> SqlServerConfig {
        SqlServerConfig {
            host: self.host.clone(),
            port: self.port,
            database: None,
            username: "sa".to_string(),
            password: self.password.clone(),
            encrypt: true,
            trust_server_certificate: true,
            connection_timeout: Duration::from_secs(30),
            application_name: APPLICATION_NAME.to_string(),
        }
    }

    /// Create the fixture table through a plain tiberius client.
    async fn setup(&self) {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.authentication(AuthMethod::sql_server("sa", &self.password));
        config.trust_cert();

        let tcp = TcpStream::connect(format!("{}:{}", self.host, self.port))
            .await
            .expect("Failed to connect to TCP");
        tcp.set_nodelay(true).expect("Failed to set TCP_NODELAY");

        let mut client = Client::connect(config, tcp.compat_write())
            .await
            .expect("Failed to connect to SQL Server");
        client
            .simple_query(SETUP_SQL)
            .await
            .expect("Setup failed")
            .into_results()
            .await
            .expect("Setup failed");
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_get_table_schema() {
    let db = TestDatabase::new().await;
    db.setup().await;
    let provider = MssqlSchemaProvider::new(db.config());

    let schema = provider
        .get_table_schema(&QualifiedName::parse("dbo.GenCustomers").unwrap())
        .await
        .expect("Schema lookup failed");

    let types: Vec<(&str, &str)> = schema
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.source_type.as_str()))
        .collect();
    assert_eq!(
        types,
        vec![
            ("CustomerID", "int"),
            ("CustomerName", "nvarchar(100)"),
            ("Notes", "nvarchar(max)"),
            ("Balance", "decimal(18,2)"),
            ("RowGuid", "uniqueidentifier"),
            ("ModifiedDate", "datetime2"),
        ]
    );
    assert!(!schema.columns[0].nullable);
    assert!(schema.columns[1].nullable);
    assert_eq!(schema.primary_key, vec!["CustomerID"]);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_missing_table_is_not_found() {
    let db = TestDatabase::new().await;
    let provider = MssqlSchemaProvider::new(db.config());

    let err = provider
        .get_table_schema(&QualifiedName::parse("dbo.DoesNotExist").unwrap())
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_list_tables_with_filter() {
    let db = TestDatabase::new().await;
    db.setup().await;
    let provider = MssqlSchemaProvider::new(db.config());

    let tables = provider.list_tables(Some("dbo")).await.expect("List failed");
    assert!(tables.contains(&QualifiedName::parse("dbo.GenCustomers").unwrap()));

    let tables = provider.list_tables(Some("no_such_schema")).await.expect("List failed");
    assert!(tables.is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_unreachable_server_is_unavailable() {
    let mut config = TestDatabase {
        source: TestDatabaseSource::External,
        host: "127.0.0.1".into(),
        port: 1,
        password: String::new(),
    }
    .config();
    config.connection_timeout = Duration::from_secs(2);

    let err = MssqlSchemaProvider::new(config)
        .get_table_schema(&QualifiedName::parse("dbo.GenCustomers").unwrap())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_pipeline_against_live_source() {
    let db = TestDatabase::new().await;
    db.setup().await;

    let source: SharedProvider = Arc::new(MssqlSchemaProvider::new(db.config()));
    let destination: SharedProvider = Arc::new(SnapshotSchemaProvider::from_tables(
        "empty-destination",
        Dialect::Databricks,
        vec![],
    ));
    let mappings = parse_mapping_str(
        r#"
tables:
  - source: dbo.GenCustomers
    destination: main.sales.customers
    columns:
      - { dest: id, source: CustomerID }
      - { dest: row_guid, source: RowGuid }
      - { dest: balance, source: Balance }
    incremental: { timestamp: ModifiedDate }
"#,
        MappingFormat::Yaml,
    )
    .unwrap();

    let report = Pipeline::from_config(source, destination, &GeneratorConfig::default())
        .run(&mappings)
        .await;

    assert_eq!(report.generated_count(), 1, "{:?}", report.tables[0].issues);
    let sql = &report.models[0].sql;
    assert!(sql.contains("unique_key=['id']"));
    assert!(sql.contains("lower(CAST(RowGuid AS STRING)) as row_guid"));
    assert!(sql.contains("CAST(Balance AS DECIMAL(18,2)) as balance"));
}
