//! Type conversion from SQL Server types to Databricks types.
//!
//! Conversions are driven by a declarative rule table. Each rule pairs a
//! source type pattern with a destination type template and an optional cast
//! expression template. User rules from the mapping document are consulted
//! together with the built-in table; the most specific match wins.
//!
//! Pattern forms:
//! - `int`: base name, matches any arguments (`int`, `nvarchar` matches `nvarchar(50)`)
//! - `decimal(p,s)`: placeholder arguments, matches when the argument count agrees
//! - `varchar(max)`: literal arguments, matches those arguments only
//! - `date*`: prefix of the base name
//!
//! Destination templates refer to placeholders as `{p}`; cast templates use
//! `{column}` and `{type}`.

use crate::constants::{DEFAULT_CAST_TEMPLATE, DEFAULT_FALLBACK_TYPE};
use crate::mapping::LiteralValue;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

static TYPE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_ ]*?)\s*(\*)?\s*(?:\(\s*([^)]*?)\s*\))?\s*$")
        .unwrap_or_else(|e| panic!("invalid type pattern regex: {e}"))
});

static TEMPLATE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .unwrap_or_else(|e| panic!("invalid template regex: {e}"))
});

/// A type string split into its base name and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedType {
    /// Lower-cased base name, e.g. `nvarchar`.
    pub base: String,
    /// Arguments as written, trimmed, e.g. `["18", "2"]` or `["max"]`.
    pub args: Vec<String>,
}

impl ParsedType {
    /// Parse a type string such as `DECIMAL(18, 2)` or `nvarchar(max)`.
    pub fn parse(type_str: &str) -> Option<Self> {
        let caps = TYPE_PATTERN.captures(type_str)?;
        if caps.get(2).is_some() {
            return None;
        }
        Some(Self {
            base: normalize_base(&caps[1]),
            args: split_args(caps.get(3).map(|m| m.as_str())),
        })
    }
}

fn normalize_base(base: &str) -> String {
    base.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn split_args(args: Option<&str>) -> Vec<String> {
    match args {
        Some(a) if !a.trim().is_empty() => a.split(',').map(|s| s.trim().to_lowercase()).collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternArgs {
    Any,
    Placeholders(Vec<String>),
    Literal(Vec<String>),
}

/// A compiled source-type pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypePattern {
    raw: String,
    base: String,
    prefix: bool,
    args: PatternArgs,
}

impl TypePattern {
    /// Compile a pattern string.
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let caps = TYPE_PATTERN
            .captures(pattern)
            .ok_or_else(|| format!("invalid type pattern '{}'", pattern))?;

        let base = normalize_base(&caps[1]);
        let prefix = caps.get(2).is_some();
        let raw_args = split_args(caps.get(3).map(|m| m.as_str()));

        let args = if raw_args.is_empty() {
            PatternArgs::Any
        } else if raw_args.iter().all(|a| is_placeholder(a)) {
            PatternArgs::Placeholders(raw_args)
        } else if raw_args.iter().any(|a| is_placeholder(a)) {
            return Err(format!(
                "type pattern '{}' mixes placeholders and literal arguments",
                pattern
            ));
        } else {
            PatternArgs::Literal(raw_args)
        };

        if prefix && args != PatternArgs::Any {
            return Err(format!(
                "prefix pattern '{}' cannot take arguments",
                pattern
            ));
        }

        Ok(Self {
            raw: pattern.trim().to_string(),
            base,
            prefix,
            args,
        })
    }

    fn placeholders(&self) -> &[String] {
        match &self.args {
            PatternArgs::Placeholders(names) => names,
            _ => &[],
        }
    }

    fn matches(&self, ty: &ParsedType) -> bool {
        let base_ok = if self.prefix {
            ty.base.starts_with(&self.base)
        } else {
            ty.base == self.base
        };
        if !base_ok {
            return false;
        }
        match &self.args {
            PatternArgs::Any => true,
            PatternArgs::Placeholders(names) => names.len() == ty.args.len(),
            PatternArgs::Literal(values) => values == &ty.args,
        }
    }

    /// Specificity ranking: exact base, then argument kind, then prefix length.
    fn specificity(&self) -> (u8, u8, usize) {
        let exact = u8::from(!self.prefix);
        let args = match self.args {
            PatternArgs::Literal(_) => 2,
            PatternArgs::Placeholders(_) => 1,
            PatternArgs::Any => 0,
        };
        (exact, args, self.base.len())
    }
}

impl fmt::Display for TypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn is_placeholder(arg: &str) -> bool {
    arg.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && arg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && arg != "max"
}

/// Where a rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOrigin {
    /// Shipped with the generator.
    Builtin,
    /// Declared in the mapping document.
    User,
}

/// One entry in the conversion table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeConversionRule {
    pattern: TypePattern,
    destination: String,
    cast: Option<String>,
    origin: RuleOrigin,
}

impl TypeConversionRule {
    /// Build a user rule, checking that the templates only use known fields.
    pub fn new(pattern: &str, destination: &str, cast: Option<&str>) -> Result<Self, String> {
        Self::with_origin(pattern, destination, cast, RuleOrigin::User)
    }

    fn with_origin(
        pattern: &str,
        destination: &str,
        cast: Option<&str>,
        origin: RuleOrigin,
    ) -> Result<Self, String> {
        let pattern = TypePattern::parse(pattern)?;

        if destination.trim().is_empty() {
            return Err(format!("rule '{}' has an empty destination type", pattern));
        }
        for field in template_fields(destination) {
            if !pattern.placeholders().iter().any(|p| p == &field) {
                return Err(format!(
                    "destination '{}' uses {{{}}} which pattern '{}' does not define",
                    destination, field, pattern
                ));
            }
        }
        if let Some(cast) = cast {
            for field in template_fields(cast) {
                if field != "column" && field != "type" {
                    return Err(format!(
                        "cast template '{}' uses unknown field {{{}}}",
                        cast, field
                    ));
                }
            }
            if !cast.contains("{column}") {
                return Err(format!("cast template '{}' must reference {{column}}", cast));
            }
        }

        Ok(Self {
            pattern,
            destination: destination.trim().to_string(),
            cast: cast.map(str::to_string),
            origin,
        })
    }

    /// Source pattern.
    pub fn pattern(&self) -> &TypePattern {
        &self.pattern
    }

    /// Where the rule came from.
    pub fn origin(&self) -> RuleOrigin {
        self.origin
    }

    fn destination_for(&self, ty: &ParsedType) -> String {
        let names = self.pattern.placeholders();
        TEMPLATE_FIELD
            .replace_all(&self.destination, |caps: &regex::Captures<'_>| {
                names
                    .iter()
                    .position(|n| n == &caps[1])
                    .and_then(|i| ty.args.get(i))
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

fn template_fields(template: &str) -> Vec<String> {
    TEMPLATE_FIELD
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// The outcome of converting one source type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversion {
    /// Destination type, e.g. `DECIMAL(18,2)`.
    pub destination_type: String,

    /// Cast template, `{column}` and `{type}` still unsubstituted.
    pub cast_template: String,

    /// Pattern of the rule that matched, `None` for the fallback.
    pub matched_rule: Option<String>,
}

impl Conversion {
    /// Whether the conversion came from the default fallback.
    pub fn is_fallback(&self) -> bool {
        self.matched_rule.is_none()
    }

    /// Render the cast around a column expression.
    pub fn render(&self, column_expr: &str) -> String {
        render_cast(&self.cast_template, column_expr, &self.destination_type)
    }
}

/// Substitute `{column}` and `{type}` in a cast template.
pub fn render_cast(template: &str, column_expr: &str, destination_type: &str) -> String {
    template
        .replace("{type}", destination_type)
        .replace("{column}", column_expr)
}

/// Resolves source types against user and built-in rules.
#[derive(Debug, Clone)]
pub struct TypeConversionEngine {
    rules: Vec<TypeConversionRule>,
    default_type: String,
}

impl Default for TypeConversionEngine {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_FALLBACK_TYPE)
    }
}

impl TypeConversionEngine {
    /// Create an engine from user rules layered over the built-in table.
    pub fn new(user_rules: Vec<TypeConversionRule>, default_type: impl Into<String>) -> Self {
        let mut rules = user_rules;
        rules.extend(builtin_rules());
        Self {
            rules,
            default_type: default_type.into(),
        }
    }

    /// Type used when nothing matches.
    pub fn default_type(&self) -> &str {
        &self.default_type
    }

    /// Find the best rule for a source type.
    pub fn find_rule(&self, source_type: &str) -> Option<&TypeConversionRule> {
        let parsed = ParsedType::parse(source_type)?;
        let mut best: Option<&TypeConversionRule> = None;
        for rule in self.rules.iter().filter(|r| r.pattern.matches(&parsed)) {
            let better = match best {
                None => true,
                Some(current) => {
                    (rule.pattern.specificity(), rule.origin)
                        > (current.pattern.specificity(), current.origin)
                }
            };
            if better {
                best = Some(rule);
            }
        }
        best
    }

    /// Convert a source type, falling back to the default type.
    pub fn convert(&self, source_type: &str) -> Conversion {
        let parsed = ParsedType::parse(source_type);
        match (self.find_rule(source_type), parsed) {
            (Some(rule), Some(parsed)) => Conversion {
                destination_type: rule.destination_for(&parsed),
                cast_template: rule
                    .cast
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CAST_TEMPLATE.to_string()),
                matched_rule: Some(rule.pattern.to_string()),
            },
            _ => Conversion {
                destination_type: self.default_type.clone(),
                cast_template: DEFAULT_CAST_TEMPLATE.to_string(),
                matched_rule: None,
            },
        }
    }
}

fn builtin_rules() -> Vec<TypeConversionRule> {
    const RULES: &[(&str, &str, Option<&str>)] = &[
        ("bit", "BOOLEAN", None),
        ("tinyint", "SMALLINT", None),
        ("smallint", "SMALLINT", None),
        ("int", "INT", None),
        ("bigint", "BIGINT", None),
        ("decimal", "DECIMAL(18,0)", None),
        ("decimal(p)", "DECIMAL({p},0)", None),
        ("decimal(p,s)", "DECIMAL({p},{s})", None),
        ("numeric", "DECIMAL(18,0)", None),
        ("numeric(p)", "DECIMAL({p},0)", None),
        ("numeric(p,s)", "DECIMAL({p},{s})", None),
        ("money", "DECIMAL(19,4)", None),
        ("smallmoney", "DECIMAL(10,4)", None),
        ("float", "DOUBLE", None),
        ("real", "FLOAT", None),
        ("char", "STRING", None),
        ("varchar", "STRING", None),
        ("nchar", "STRING", None),
        ("nvarchar", "STRING", None),
        ("text", "STRING", None),
        ("ntext", "STRING", None),
        ("sysname", "STRING", None),
        ("xml", "STRING", None),
        ("uniqueidentifier", "STRING", Some("lower(CAST({column} AS {type}))")),
        ("date", "DATE", None),
        ("datetime", "TIMESTAMP", None),
        ("datetime2", "TIMESTAMP", None),
        ("smalldatetime", "TIMESTAMP", None),
        ("datetimeoffset", "TIMESTAMP", None),
        ("time", "STRING", None),
        ("binary", "BINARY", None),
        ("varbinary", "BINARY", None),
        ("image", "BINARY", None),
    ];

    RULES
        .iter()
        .filter_map(|(pattern, dest, cast)| {
            TypeConversionRule::with_origin(pattern, dest, *cast, RuleOrigin::Builtin).ok()
        })
        .collect()
}

/// Destination type for a literal value.
pub fn infer_literal_type(value: &LiteralValue) -> &'static str {
    match value {
        LiteralValue::Null | LiteralValue::String(_) => "STRING",
        LiteralValue::Bool(_) => "BOOLEAN",
        LiteralValue::Integer(_) => "BIGINT",
        LiteralValue::Float(_) => "DOUBLE",
    }
}

/// Normalize a Databricks type to a canonical spelling for comparison.
pub fn normalize_databricks_type(type_str: &str) -> String {
    let Some(parsed) = ParsedType::parse(type_str) else {
        return type_str.trim().to_uppercase();
    };

    let base = match parsed.base.as_str() {
        "integer" => "int",
        "long" => "bigint",
        "short" => "smallint",
        "byte" => "tinyint",
        "real" => "float",
        "double precision" => "double",
        "dec" | "numeric" => "decimal",
        "varchar" | "char" | "string" => "string",
        "timestamp_ltz" => "timestamp",
        "bool" => "boolean",
        other => other,
    };

    match base {
        "decimal" => {
            let precision = parsed.args.first().map(String::as_str).unwrap_or("10");
            let scale = parsed.args.get(1).map(String::as_str).unwrap_or("0");
            format!("DECIMAL({},{})", precision, scale)
        }
        "string" => "STRING".to_string(),
        _ if parsed.args.is_empty() => base.to_uppercase(),
        _ => format!("{}({})", base.to_uppercase(), parsed.args.join(",").to_uppercase()),
    }
}

/// Whether two Databricks types name the same storage type.
pub fn types_compatible(a: &str, b: &str) -> bool {
    normalize_databricks_type(a) == normalize_databricks_type(b)
}
