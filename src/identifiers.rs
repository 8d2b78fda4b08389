//! Identifier parsing, validation and quoting.
//!
//! Mapping documents feed table and column names straight into generated SQL,
//! so every identifier is validated once at load time. Quoting follows the
//! dialect that will read the text: SQL Server bracket notation for catalog
//! queries against the source, Databricks backticks for generated models.

use crate::error::GeneratorError;

/// Maximum length for identifiers (SQL Server limit; Databricks allows 255).
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Keywords that must be quoted when used as Databricks column names.
const DATABRICKS_RESERVED: &[&str] = &[
    "all", "and", "any", "as", "between", "both", "by", "case", "cast", "create", "cross",
    "current", "current_date", "current_timestamp", "default", "distinct", "else", "end",
    "except", "false", "fetch", "for", "from", "full", "group", "having", "in", "inner",
    "intersect", "interval", "into", "is", "join", "lateral", "left", "like", "limit", "not",
    "null", "of", "on", "or", "order", "outer", "right", "select", "table", "then", "to",
    "true", "union", "user", "using", "when", "where", "with",
];

/// Escape a SQL Server identifier using bracket notation.
///
/// # Examples
///
/// ```
/// use dbt_model_generator::identifiers::escape_identifier;
///
/// assert_eq!(escape_identifier("Users").unwrap(), "[Users]");
/// assert_eq!(escape_identifier("My Table").unwrap(), "[My Table]");
/// assert_eq!(escape_identifier("Table[1]").unwrap(), "[Table[1]]]");
/// ```
pub fn escape_identifier(identifier: &str) -> Result<String, GeneratorError> {
    let trimmed = identifier.trim();

    if trimmed.is_empty() {
        return Err(GeneratorError::mapping("Identifier cannot be empty"));
    }

    if trimmed.len() > MAX_IDENTIFIER_LENGTH {
        return Err(GeneratorError::mapping(format!(
            "Identifier exceeds maximum length of {} characters",
            MAX_IDENTIFIER_LENGTH
        )));
    }

    // Escape any embedded right brackets by doubling them
    Ok(format!("[{}]", trimmed.replace(']', "]]")))
}

/// Quote an identifier for Databricks SQL when it needs it.
///
/// Plain identifiers (`[A-Za-z_][A-Za-z0-9_]*`) that are not reserved words
/// are returned unchanged so generated models stay readable.
pub fn quote_databricks(identifier: &str) -> String {
    if is_plain_identifier(identifier) && !is_reserved_keyword(identifier) {
        identifier.to_string()
    } else {
        format!("`{}`", identifier.replace('`', "``"))
    }
}

/// Check whether an identifier can be written without quoting.
pub fn is_plain_identifier(identifier: &str) -> bool {
    let mut chars = identifier.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check whether a word is reserved in Databricks SQL.
pub fn is_reserved_keyword(identifier: &str) -> bool {
    let lower = identifier.to_ascii_lowercase();
    DATABRICKS_RESERVED.binary_search(&lower.as_str()).is_ok()
}

/// Validate that an identifier contains only allowed characters.
///
/// Rejects empty names, over-long names and character sequences that could
/// break out of a quoted identifier in generated SQL.
pub fn validate_identifier(identifier: &str) -> Result<(), GeneratorError> {
    if identifier.trim().is_empty() {
        return Err(GeneratorError::mapping("Identifier cannot be empty"));
    }

    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        return Err(GeneratorError::mapping(format!(
            "Identifier '{}' exceeds maximum length of {} characters",
            identifier, MAX_IDENTIFIER_LENGTH
        )));
    }

    let dangerous_patterns = [
        "--",   // SQL comment
        "/*",   // Multi-line comment start
        "*/",   // Multi-line comment end
        ";",    // Statement separator
        "'",    // String delimiter
        "\"",   // Quoted identifier delimiter
        "\\",   // Escape character
        "{{",   // Jinja expression
        "{%",   // Jinja statement
        "\x00", // Null byte
    ];

    for pattern in &dangerous_patterns {
        if identifier.contains(pattern) {
            return Err(GeneratorError::mapping(format!(
                "Identifier '{}' contains forbidden character sequence: {}",
                identifier.escape_debug(),
                pattern.escape_debug()
            )));
        }
    }

    Ok(())
}

/// Split a dotted name into its parts.
///
/// Parts may be wrapped in `[...]` or `` `...` `` to contain dots; the
/// wrapping is removed. Empty parts are an error.
pub fn split_qualified_name(name: &str) -> Result<Vec<String>, GeneratorError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut closing: Option<char> = None;

    for c in name.trim().chars() {
        match closing {
            Some(close) if c == close => closing = None,
            Some(_) => current.push(c),
            None => match c {
                '[' if current.is_empty() => closing = Some(']'),
                '`' if current.is_empty() => closing = Some('`'),
                '.' => parts.push(std::mem::take(&mut current)),
                _ => current.push(c),
            },
        }
    }

    if closing.is_some() {
        return Err(GeneratorError::mapping(format!(
            "Unterminated quoted identifier in '{}'",
            name
        )));
    }
    parts.push(current);

    if parts.iter().any(|p| p.trim().is_empty()) {
        return Err(GeneratorError::mapping(format!(
            "Qualified name '{}' has an empty part",
            name
        )));
    }

    Ok(parts.into_iter().map(|p| p.trim().to_string()).collect())
}
