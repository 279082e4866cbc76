//! Poll conditions
//!
//! A condition is a tagged union with one evaluator per variant. The
//! `expression` and `custom` variants are explicit extension points: they
//! evaluate to [`Evaluation::Unsupported`] rather than silently reporting
//! the condition unmet, so the gap stays visible to callers and logs.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Condition to satisfy before a polling session completes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Equality against the observed status
    Status {
        /// Status value that completes the session
        expected: String,
    },
    /// Field extraction plus an operator comparison
    Value {
        /// Dot-separated path into the observation
        path: String,
        /// Comparison operator
        operator: ValueOperator,
        /// Right-hand operand
        expected: Value,
    },
    /// Expression evaluation; not implemented. Callers that need it supply
    /// their own executor
    Expression {
        /// The unparsed expression
        expression: String,
    },
    /// Named custom evaluator; not implemented. Callers that need it supply
    /// their own executor
    Custom {
        /// Evaluator name
        name: String,
        /// Evaluator arguments
        #[serde(default)]
        args: Value,
    },
}

impl Condition {
    /// Status-equality condition
    #[must_use]
    pub fn status(expected: impl Into<String>) -> Self {
        Self::Status {
            expected: expected.into(),
        }
    }

    /// Field-comparison condition
    #[must_use]
    pub fn value(path: impl Into<String>, operator: ValueOperator, expected: Value) -> Self {
        Self::Value {
            path: path.into(),
            operator,
            expected,
        }
    }

    /// Evaluate against one observation
    #[must_use]
    pub fn evaluate(&self, observation: &Value) -> Evaluation {
        match self {
            Self::Status { expected } => {
                let status = match observation {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(map) => map.get("status").and_then(Value::as_str),
                    _ => None,
                };
                Evaluation::from_bool(status == Some(expected.as_str()))
            }
            Self::Value {
                path,
                operator,
                expected,
            } => match lookup_path(observation, path) {
                Some(actual) => Evaluation::from_bool(operator.compare(actual, expected)),
                None => Evaluation::NotMet,
            },
            Self::Expression { .. } | Self::Custom { .. } => Evaluation::Unsupported,
        }
    }

    /// Variant name for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Value { .. } => "value",
            Self::Expression { .. } => "expression",
            Self::Custom { .. } => "custom",
        }
    }
}

/// Outcome of a condition evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Condition satisfied
    Met,
    /// Condition not satisfied
    NotMet,
    /// Variant has no built-in evaluator
    Unsupported,
}

impl Evaluation {
    fn from_bool(met: bool) -> Self {
        if met {
            Self::Met
        } else {
            Self::NotMet
        }
    }
}

/// Comparison operators for the `value` condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueOperator {
    /// Equal
    Eq,
    /// Not equal
    Neq,
    /// Greater than (numeric)
    Gt,
    /// Greater than or equal (numeric)
    Gte,
    /// Less than (numeric)
    Lt,
    /// Less than or equal (numeric)
    Lte,
    /// String or array containment
    Contains,
    /// Regex match on a string
    Matches,
}

impl ValueOperator {
    fn compare(self, actual: &Value, expected: &Value) -> bool {
        match self {
            Self::Eq => actual == expected,
            Self::Neq => actual != expected,
            Self::Gt => numeric(actual, expected, |a, b| a > b),
            Self::Gte => numeric(actual, expected, |a, b| a >= b),
            Self::Lt => numeric(actual, expected, |a, b| a < b),
            Self::Lte => numeric(actual, expected, |a, b| a <= b),
            Self::Contains => match (actual, expected) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
                (Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
            Self::Matches => match (actual, expected) {
                (Value::String(s), Value::String(pattern)) => Regex::new(pattern)
                    .map(|re| re.is_match(s))
                    .unwrap_or(false),
                _ => false,
            },
        }
    }
}

/// Numeric comparison; non-numeric operands never match
fn numeric(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// Walk a dot-separated path into a JSON value
fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
