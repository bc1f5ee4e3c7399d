use std::fmt;

/// Words the tracker's query language treats as keywords. A single value
/// equal to one of these must be quoted or the query is rejected.
const RESERVED_WORDS: &[&str] = &[
    "A", "AND", "ARE", "AS", "AT", "BE", "BEFORE", "AFTER", "BY", "CF",
    "CHANGED", "DESC", "ASC", "DURING", "EMPTY", "FROM", "IN", "IS", "NOT",
    "NULL", "ON", "OR", "ORDER", "THE", "TO", "UNTIL", "WAS", "WITH",
];

fn is_reserved(value: &str) -> bool {
    RESERVED_WORDS.iter().any(|w| value.eq_ignore_ascii_case(w))
}

fn needs_quoting(value: &str) -> bool {
    if value.is_empty() || is_reserved(value) {
        return true;
    }
    !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn render_value(value: &str) -> String {
    if needs_quoting(value) {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// One clause of a tracker search query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryClause {
    Eq { field: String, value: String },
    Ge { field: String, value: String },
    In { field: String, values: Vec<String> },
}

impl QueryClause {
    pub fn eq(field: &str, value: &str) -> Self {
        QueryClause::Eq {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn ge(field: &str, value: &str) -> Self {
        QueryClause::Ge {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn one_of(field: &str, values: &[&str]) -> Self {
        QueryClause::In {
            field: field.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl fmt::Display for QueryClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryClause::Eq { field, value } => {
                write!(f, "{field}={}", render_value(value))
            }
            QueryClause::Ge { field, value } => {
                write!(f, "{field} >= {}", render_value(value))
            }
            // Multi-value lists are never quoted, reserved words included.
            QueryClause::In { field, values } => {
                write!(f, "{field} in ({})", values.join(", "))
            }
        }
    }
}

/// Join clauses into a full query string.
pub fn render(clauses: &[QueryClause]) -> String {
    clauses
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" AND ")
}
