//! Run summary rendering.

use crate::error::GeneratorError;
use crate::pipeline::{RunReport, TableOutcome};
use crate::validate::Severity;

/// Human-readable summary, one block per table, ending with the model count.
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();

    for table in &report.tables {
        let status = match &table.outcome {
            TableOutcome::Generated => format!("generated model '{}'", table.model_name),
            TableOutcome::Blocked => "blocked".to_string(),
            TableOutcome::Failed { message } => format!("FAILED: {}", message),
        };
        out.push_str(&format!(
            "{} <- {}: {}\n",
            table.destination, table.source, status
        ));

        let mut issues: Vec<_> = table.issues.iter().collect();
        // Errors first; stable within a severity.
        issues.sort_by_key(|i| std::cmp::Reverse(i.severity));
        for issue in issues {
            let marker = match issue.severity {
                Severity::Error => "x",
                Severity::Warning => "!",
            };
            out.push_str(&format!("  {} {}\n", marker, issue));
        }
    }

    out.push_str(&format!(
        "Tables: {} | blocked: {} | failed: {} | errors: {} | warnings: {}\n",
        report.tables.len(),
        report.blocked_count(),
        report.failed_count(),
        report.error_count(),
        report.warning_count()
    ));
    out.push_str(&format!(
        "Schema lookups: source {} ({} provider call(s)), destination {} ({} provider call(s))\n",
        report.source_stats.lookups,
        report.source_stats.provider_calls,
        report.destination_stats.lookups,
        report.destination_stats.provider_calls
    ));
    out.push_str(&format!("Generated {} model(s)\n", report.generated_count()));
    out
}

/// Machine-readable summary.
pub fn render_json(report: &RunReport) -> Result<String, GeneratorError> {
    Ok(serde_json::to_string_pretty(report)?)
}
