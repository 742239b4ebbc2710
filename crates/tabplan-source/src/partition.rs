use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use tabplan_expr::{ColumnType, Value};

use crate::error::PatternError;

/// How partition values captured from paths are typed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PartitionTyping {
    /// `Int` when every captured value across all resolved files parses as an integer,
    /// otherwise `String`.
    #[default]
    InferInteger,
    /// Always `String`.
    AllString,
}

impl FromStr for PartitionTyping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "infer-integer" | "infer" => Ok(PartitionTyping::InferInteger),
            "all-string" | "string" => Ok(PartitionTyping::AllString),
            other => Err(format!(
                "unknown partition typing {other:?} (expected infer-integer or all-string)"
            )),
        }
    }
}

/// A path template with `{name}` capture tokens, e.g. `/puYear={year}/puMonth={month}`.
#[derive(Clone, Debug)]
pub struct PartitionTemplate {
    source: String,
    names: Vec<String>,
    regex: Arc<Regex>,
}

impl PartialEq for PartitionTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for PartitionTemplate {}

impl fmt::Display for PartitionTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartitionTemplate {
    pub fn parse(format: &str) -> Result<Self, PatternError> {
        let invalid = |reason: String| PatternError::InvalidPartitionFormat {
            format: format.to_string(),
            reason,
        };

        let mut names: Vec<String> = Vec::new();
        let mut body = String::new();
        for segment in format.split('/').filter(|s| !s.is_empty()) {
            if !body.is_empty() {
                body.push('/');
            }
            let mut rest = segment;
            let mut previous_was_token = false;
            while !rest.is_empty() {
                if let Some(after_open) = rest.strip_prefix('{') {
                    let Some(close) = after_open.find('}') else {
                        return Err(invalid("unclosed `{`".into()));
                    };
                    let name = &after_open[..close];
                    if !is_token_name(name) {
                        return Err(invalid(format!("invalid column name {name:?}")));
                    }
                    if names.iter().any(|n| n == name) {
                        return Err(invalid(format!("duplicate column name {name:?}")));
                    }
                    if previous_was_token {
                        return Err(invalid("adjacent tokens are ambiguous".into()));
                    }
                    names.push(name.to_string());
                    body.push_str("([^/]+)");
                    previous_was_token = true;
                    rest = &after_open[close + 1..];
                } else {
                    let end = rest.find(['{', '}']).unwrap_or(rest.len());
                    if end == 0 {
                        return Err(invalid("unmatched `}`".into()));
                    }
                    body.push_str(&regex::escape(&rest[..end]));
                    previous_was_token = false;
                    rest = &rest[end..];
                }
            }
        }

        if names.is_empty() {
            return Err(invalid("expected at least one `{column}` token".into()));
        }
        let regex = Regex::new(&format!("^{body}(?:/|$)")).map_err(|err| invalid(err.to_string()))?;
        Ok(Self {
            source: format.to_string(),
            names,
            regex: Arc::new(regex),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names of the columns the template captures, in template order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Captured `(name, raw value)` pairs for the right-most place the template matches
    /// `path` on component boundaries, or `None` if it does not match.
    pub fn extract(&self, path: &str) -> Option<Vec<(String, String)>> {
        let starts = std::iter::once(0).chain(path.match_indices('/').map(|(idx, _)| idx + 1));
        let starts: Vec<usize> = starts.collect();
        starts.into_iter().rev().find_map(|start| {
            let captures = self.regex.captures(&path[start..])?;
            let values = self
                .names
                .iter()
                .enumerate()
                .map(|(idx, name)| {
                    let value = captures.get(idx + 1).map(|m| m.as_str()).unwrap_or_default();
                    (name.clone(), value.to_string())
                })
                .collect();
            Some(values)
        })
    }
}

fn is_token_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Type of a partition column given every raw value captured for it.
pub fn infer_partition_type<'a>(
    values: impl IntoIterator<Item = &'a str>,
    typing: PartitionTyping,
) -> ColumnType {
    match typing {
        PartitionTyping::AllString => ColumnType::String,
        PartitionTyping::InferInteger => {
            let mut any = false;
            for value in values {
                any = true;
                if value.parse::<i64>().is_err() {
                    return ColumnType::String;
                }
            }
            if any {
                ColumnType::Int
            } else {
                ColumnType::String
            }
        }
    }
}

/// Typed value of a raw partition capture for a column of type `column_type`.
pub fn partition_value(raw: &str, column_type: ColumnType) -> Value {
    match column_type {
        ColumnType::Int => raw
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| Value::from(raw)),
        _ => Value::from(raw),
    }
}
