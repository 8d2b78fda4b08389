//! # dbt Model Generator
//!
//! Generates dbt models that move data from SQL Server tables into Databricks
//! tables, driven by a declarative mapping document.
//!
//! A run goes through these stages:
//! - **Mapping**: parse and structurally check the YAML/JSON mapping document
//! - **Schema**: resolve source and destination table metadata through providers
//! - **Validation**: check every mapping against both schemas, collecting issues
//! - **Generation**: render one deterministic model per valid table
//! - **Emission**: write models and dbt manifests into a project directory
//!
//! ## Example
//!
//! ```no_run
//! use dbt_model_generator::schema::{SharedProvider, SnapshotSchemaProvider};
//! use dbt_model_generator::{parse_mapping_file, GeneratorConfig, Pipeline};
//! use std::sync::Arc;
//!
//! # async fn run() -> dbt_model_generator::Result<()> {
//! let mappings = parse_mapping_file("mapping.yml")?;
//! let source: SharedProvider = Arc::new(SnapshotSchemaProvider::from_file("source.json")?);
//! let destination: SharedProvider = Arc::new(SnapshotSchemaProvider::from_file("dest.json")?);
//!
//! let pipeline = Pipeline::from_config(source, destination, &GeneratorConfig::default());
//! let report = pipeline.run(&mappings).await;
//! println!("{} model(s) generated", report.generated_count());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod emitter;
pub mod error;
pub mod generator;
pub mod identifiers;
pub mod mapping;
pub mod pipeline;
pub mod report;
pub mod resilience;
pub mod schema;
pub mod syntax;
pub mod typemap;
pub mod validate;

pub use config::{DatabricksConfig, GeneratorConfig, ProjectConfig, SqlServerConfig};
pub use emitter::{EmitSummary, ProjectEmitter};
pub use error::{GeneratorError, Result, SchemaError};
pub use generator::{generate_model, GeneratedModel};
pub use mapping::{parse_mapping_file, parse_mapping_str, MappingFormat, MappingSet};
pub use pipeline::{Pipeline, PipelineOptions, RunReport, TableOutcome};
pub use typemap::TypeConversionEngine;
pub use validate::{IssueCode, Severity, ValidationIssue};
