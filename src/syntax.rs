//! Optional syntax check over generated model text.
//!
//! The check is a separate pass: Jinja is rendered away with stand-ins and the
//! remaining SQL is parsed with the Databricks dialect. Verbatim expressions
//! from the mapping are the usual source of failures.

use crate::generator::GeneratedModel;
use crate::validate::{IssueCode, ValidationIssue};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::dialect::DatabricksDialect;
use sqlparser::parser::Parser;
use tracing::debug;

static SOURCE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*source\(\s*'([^']*)'\s*,\s*'([^']*)'\s*\)\s*\}\}")
        .unwrap_or_else(|e| panic!("Internal error: invalid source call pattern: {}", e))
});

static THIS_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*this\s*\}\}")
        .unwrap_or_else(|e| panic!("Internal error: invalid this pattern: {}", e))
});

static JINJA_EXPR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{\{.*?\}\}")
        .unwrap_or_else(|e| panic!("Internal error: invalid expression pattern: {}", e))
});

static JINJA_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{%.*?%\}")
        .unwrap_or_else(|e| panic!("Internal error: invalid tag pattern: {}", e))
});

/// Replace Jinja constructs with plain SQL stand-ins.
///
/// `source()` calls become backtick-quoted two-part names and `{{ this }}`
/// becomes a placeholder table; everything else is dropped, which keeps the
/// body of `{% if %}` blocks.
pub fn render_jinja(sql: &str) -> String {
    let sql = SOURCE_CALL.replace_all(sql, "`$1`.`$2`");
    let sql = THIS_REF.replace_all(&sql, "`__this__`");
    let sql = JINJA_EXPR.replace_all(&sql, "");
    JINJA_TAG.replace_all(&sql, "").into_owned()
}

/// Parse model text, returning the parser message on failure.
pub fn check_sql(sql: &str) -> Result<(), String> {
    let rendered = render_jinja(sql);
    let dialect = DatabricksDialect {};
    Parser::parse_sql(&dialect, &rendered)
        .map(|statements| debug!("Parsed {} statement(s)", statements.len()))
        .map_err(|e| e.to_string())
}

/// Check one generated model; a failure becomes an error issue.
pub fn check_model(model: &GeneratedModel) -> Option<ValidationIssue> {
    check_sql(&model.sql).err().map(|message| {
        ValidationIssue::error(
            IssueCode::SyntaxError,
            model.destination.to_string(),
            None,
            format!("generated SQL does not parse: {}", message),
        )
    })
}
