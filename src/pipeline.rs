//! End-to-end generation run.
//!
//! Stages run in order: resolve schemas, validate, generate, optionally check
//! syntax. Problems are collected per table; one bad mapping never stops the
//! others from being generated.

use crate::config::GeneratorConfig;
use crate::generator::{generate_model, GeneratedModel};
use crate::mapping::MappingSet;
use crate::schema::{QualifiedName, ResolverSettings, ResolverStats, SchemaResolver, SharedProvider};
use crate::syntax;
use crate::typemap::TypeConversionEngine;
use crate::validate::{MappingValidator, ValidationIssue};
use serde::Serialize;
use tracing::{error, info, warn};

/// What happened to one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    /// A model was generated.
    Generated,
    /// Error-severity issues withheld the model.
    Blocked,
    /// Generation hit an internal invariant violation.
    Failed { message: String },
}

/// Per-table result.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub source: QualifiedName,
    pub destination: QualifiedName,
    pub model_name: String,
    pub outcome: TableOutcome,
    pub issues: Vec<ValidationIssue>,
}

/// Consolidated result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tables: Vec<TableReport>,
    #[serde(skip)]
    pub models: Vec<GeneratedModel>,
    pub source_stats: ResolverStats,
    pub destination_stats: ResolverStats,
}

impl RunReport {
    pub fn generated_count(&self) -> usize {
        self.count(|o| *o == TableOutcome::Generated)
    }

    pub fn blocked_count(&self) -> usize {
        self.count(|o| *o == TableOutcome::Blocked)
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, TableOutcome::Failed { .. }))
    }

    pub fn error_count(&self) -> usize {
        self.issues().filter(|i| i.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues().filter(|i| !i.is_error()).count()
    }

    /// Every issue, table by table.
    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.tables.iter().flat_map(|t| t.issues.iter())
    }

    /// True when every table was generated without error issues.
    pub fn is_success(&self) -> bool {
        self.error_count() == 0 && self.failed_count() == 0 && self.blocked_count() == 0
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            crate::constants::EXIT_SUCCESS
        } else {
            crate::constants::EXIT_VALIDATION_FAILED
        }
    }

    fn count(&self, pred: impl Fn(&TableOutcome) -> bool) -> usize {
        self.tables.iter().filter(|t| pred(&t.outcome)).count()
    }
}

/// Pipeline options not covered by resolver settings.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Destination type for unmatched source types.
    pub default_type: String,
    /// Parse generated models and withhold those that fail.
    pub check_syntax: bool,
}

impl From<&GeneratorConfig> for PipelineOptions {
    fn from(config: &GeneratorConfig) -> Self {
        Self {
            default_type: config.default_type.clone(),
            check_syntax: config.check_syntax,
        }
    }
}

/// A generation run over one source and one destination provider.
pub struct Pipeline {
    source: SchemaResolver,
    destination: SchemaResolver,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        source: SharedProvider,
        destination: SharedProvider,
        settings: ResolverSettings,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source: SchemaResolver::new(source, settings.clone()),
            destination: SchemaResolver::new(destination, settings),
            options,
        }
    }

    /// Build a pipeline from generator configuration.
    pub fn from_config(source: SharedProvider, destination: SharedProvider, config: &GeneratorConfig) -> Self {
        Self::new(source, destination, config.resolver_settings(), config.into())
    }

    /// Run every stage over a parsed mapping document.
    pub async fn run(&self, mappings: &MappingSet) -> RunReport {
        info!(
            "Starting generation for {} table(s) ({} -> {})",
            mappings.tables.len(),
            self.source.provider_name(),
            self.destination.provider_name()
        );

        let (sources, destinations) = tokio::join!(
            self.source.resolve_all(mappings.source_tables()),
            self.destination.resolve_all(mappings.destination_tables()),
        );

        let engine = TypeConversionEngine::new(mappings.type_rules.clone(), &self.options.default_type);
        let validations = MappingValidator::new(&engine).validate_all(&mappings.tables, &sources, &destinations);

        let mut tables = Vec::with_capacity(mappings.tables.len());
        let mut models = Vec::new();

        for (mapping, validation) in mappings.tables.iter().zip(validations) {
            let mut issues = validation.issues.clone();

            let outcome = match (&validation.source_schema, validation.has_errors()) {
                (Some(source), false) => match generate_model(mapping, source, &validation) {
                    Ok(model) => {
                        let syntax_issue = if self.options.check_syntax {
                            syntax::check_model(&model)
                        } else {
                            None
                        };
                        match syntax_issue {
                            Some(issue) => {
                                warn!("Withholding {}: {}", model.name, issue.message);
                                issues.push(issue);
                                TableOutcome::Blocked
                            }
                            None => {
                                models.push(model);
                                TableOutcome::Generated
                            }
                        }
                    }
                    Err(e) => {
                        error!("Generation failed for {}: {}", mapping.destination, e);
                        TableOutcome::Failed {
                            message: e.to_string(),
                        }
                    }
                },
                _ => TableOutcome::Blocked,
            };

            tables.push(TableReport {
                source: mapping.source.clone(),
                destination: mapping.destination.clone(),
                model_name: mapping.model_name(),
                outcome,
                issues,
            });
        }

        let report = RunReport {
            tables,
            models,
            source_stats: self.source.stats(),
            destination_stats: self.destination.stats(),
        };

        info!(
            "Generation finished: {} generated, {} blocked, {} failed",
            report.generated_count(),
            report.blocked_count(),
            report.failed_count()
        );
        report
    }
}
