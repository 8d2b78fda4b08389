//! dbt project emission.
//!
//! Writes model files plus `dbt_project.yml`, `models/sources.yml`,
//! `models/schema.yml` and a `generate_schema_name` macro that keeps each
//! model in the schema its mapping names. Manifests are built from sorted collections so a rerun
//! with unchanged inputs produces identical bytes. Files already holding the
//! same bytes are left untouched, and nothing is ever deleted.

use crate::config::ProjectConfig;
use crate::constants::{MACROS_DIR, MODELS_DIR};
use crate::error::GeneratorError;
use crate::generator::GeneratedModel;
use crate::mapping::SourceLocation;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Files touched by an emission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmitSummary {
    /// Files created or rewritten.
    pub written: Vec<PathBuf>,
    /// Files that already had the generated content.
    pub unchanged: Vec<PathBuf>,
}

impl EmitSummary {
    pub fn total(&self) -> usize {
        self.written.len() + self.unchanged.len()
    }
}

#[derive(Serialize)]
struct DbtProject<'a> {
    name: &'a str,
    version: &'a str,
    #[serde(rename = "config-version")]
    config_version: u8,
    profile: &'a str,
    #[serde(rename = "model-paths")]
    model_paths: Vec<&'a str>,
    #[serde(rename = "macro-paths")]
    macro_paths: Vec<&'a str>,
    #[serde(rename = "clean-targets")]
    clean_targets: Vec<&'a str>,
}

#[derive(Serialize)]
struct SourcesFile {
    version: u8,
    sources: Vec<SourceEntry>,
}

#[derive(Serialize)]
struct SourceEntry {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    schema: String,
    tables: Vec<NamedEntry>,
}

#[derive(Serialize)]
struct NamedEntry {
    name: String,
}

#[derive(Serialize)]
struct SchemaFile {
    version: u8,
    models: Vec<ModelEntry>,
}

#[derive(Serialize)]
struct ModelEntry {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    columns: Vec<ColumnEntry>,
}

#[derive(Serialize)]
struct ColumnEntry {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tests: Vec<&'static str>,
}

/// dbt's built-in macro prefixes custom schemas with the target schema; this
/// override uses the configured schema as is.
const GENERATE_SCHEMA_NAME_MACRO: &str = "\
{% macro generate_schema_name(custom_schema_name, node) -%}
    {%- if custom_schema_name is none -%}
        {{ target.schema }}
    {%- else -%}
        {{ custom_schema_name | trim }}
    {%- endif -%}
{%- endmacro %}
";

/// Writes a generated dbt project to disk.
pub struct ProjectEmitter {
    root: PathBuf,
    project: ProjectConfig,
    source_location: SourceLocation,
}

impl ProjectEmitter {
    pub fn new(root: impl Into<PathBuf>, project: ProjectConfig, source_location: SourceLocation) -> Self {
        Self {
            root: root.into(),
            project,
            source_location,
        }
    }

    /// Render every file without touching the disk, as (relative path, bytes).
    pub fn render(&self, models: &[GeneratedModel]) -> Result<Vec<(PathBuf, String)>, GeneratorError> {
        let mut models: Vec<&GeneratedModel> = models.iter().collect();
        models.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        let mut files = vec![
            (PathBuf::from("dbt_project.yml"), self.render_project()?),
            (
                Path::new(MODELS_DIR).join("sources.yml"),
                self.render_sources(&models)?,
            ),
            (
                Path::new(MODELS_DIR).join("schema.yml"),
                self.render_schema(&models)?,
            ),
            (
                Path::new(MACROS_DIR).join("generate_schema_name.sql"),
                GENERATE_SCHEMA_NAME_MACRO.to_string(),
            ),
        ];
        files.extend(
            models
                .iter()
                .map(|m| (m.relative_path.clone(), m.sql.clone())),
        );
        Ok(files)
    }

    /// Write the project. Models are written even when the list is empty so
    /// the manifests always reflect the current run.
    pub fn emit(&self, models: &[GeneratedModel]) -> Result<EmitSummary, GeneratorError> {
        let mut summary = EmitSummary::default();

        for (relative, content) in self.render(models)? {
            let path = self.root.join(&relative);
            if write_if_changed(&path, &content)? {
                debug!("Wrote {}", path.display());
                summary.written.push(path);
            } else {
                debug!("Unchanged {}", path.display());
                summary.unchanged.push(path);
            }
        }

        info!(
            "Emitted project to {} ({} written, {} unchanged)",
            self.root.display(),
            summary.written.len(),
            summary.unchanged.len()
        );
        Ok(summary)
    }

    fn render_project(&self) -> Result<String, GeneratorError> {
        let project = DbtProject {
            name: &self.project.name,
            version: &self.project.version,
            config_version: 2,
            profile: &self.project.profile,
            model_paths: vec![MODELS_DIR],
            macro_paths: vec![MACROS_DIR],
            clean_targets: vec!["target", "dbt_packages"],
        };
        Ok(serde_yaml::to_string(&project)?)
    }

    fn render_sources(&self, models: &[&GeneratedModel]) -> Result<String, GeneratorError> {
        // source name -> table names, both keyed case-insensitively
        let mut grouped: BTreeMap<String, (String, BTreeMap<String, String>)> = BTreeMap::new();
        for model in models {
            for table in &model.source_tables {
                let entry = grouped
                    .entry(table.schema().to_lowercase())
                    .or_insert_with(|| (table.schema().to_string(), BTreeMap::new()));
                entry
                    .1
                    .entry(table.table().to_lowercase())
                    .or_insert_with(|| table.table().to_string());
            }
        }

        let sources = grouped
            .into_values()
            .map(|(schema, tables)| SourceEntry {
                database: self.source_location.database.clone(),
                schema: self
                    .source_location
                    .schema
                    .clone()
                    .unwrap_or_else(|| schema.clone()),
                name: schema,
                tables: tables
                    .into_values()
                    .map(|name| NamedEntry { name })
                    .collect(),
            })
            .collect();

        Ok(serde_yaml::to_string(&SourcesFile { version: 2, sources })?)
    }

    fn render_schema(&self, models: &[&GeneratedModel]) -> Result<String, GeneratorError> {
        let mut names = BTreeSet::new();
        let mut entries: Vec<ModelEntry> = models
            .iter()
            .filter(|m| names.insert(m.name.clone()))
            .map(|m| ModelEntry {
                name: m.name.clone(),
                description: m.description.clone(),
                columns: m
                    .columns
                    .iter()
                    .map(|c| ColumnEntry {
                        name: c.name.clone(),
                        description: c.description.clone(),
                        data_type: c.data_type.clone(),
                        tests: if c.unique_key && m.unique_key.len() == 1 {
                            vec!["unique", "not_null"]
                        } else if c.unique_key {
                            vec!["not_null"]
                        } else {
                            Vec::new()
                        },
                    })
                    .collect(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(serde_yaml::to_string(&SchemaFile {
            version: 2,
            models: entries,
        })?)
    }
}

/// Write `content` unless the file already holds exactly it.
fn write_if_changed(path: &Path, content: &str) -> Result<bool, GeneratorError> {
    if let Ok(existing) = std::fs::read(path) {
        if existing == content.as_bytes() {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| GeneratorError::Emit {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, content).map_err(|source| GeneratorError::Emit {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}
