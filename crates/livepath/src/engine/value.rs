use super::runtime::{Error, Result};
use crate::model::{Node, PathNode};

/// Result of evaluating a predicate expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nodes(Vec<PathNode>),
    Number(f64),
    String(String),
    Boolean(bool),
}

impl Value {
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Number(number) => *number != 0.0 && !number.is_nan(),
            Value::String(text) => !text.is_empty(),
            Value::Boolean(value) => *value,
        }
    }

    pub fn to_number(&self) -> Result<f64> {
        Ok(match self {
            Value::Number(number) => *number,
            Value::Boolean(value) => f64::from(u8::from(*value)),
            Value::String(text) => parse_number(text),
            Value::Nodes(_) => parse_number(&self.to_string_value()?),
        })
    }

    /// String value; for a node-set, that of its first node.
    pub fn to_string_value(&self) -> Result<String> {
        Ok(match self {
            Value::Nodes(nodes) => match nodes.first() {
                Some(node) => node.try_string_value()?,
                None => String::new(),
            },
            Value::Number(number) => format_number(*number),
            Value::String(text) => text.clone(),
            Value::Boolean(value) => value.to_string(),
        })
    }

    pub fn into_nodes(self, function: &str) -> Result<Vec<PathNode>> {
        match self {
            Value::Nodes(nodes) => Ok(nodes),
            other => Err(Error::type_error(format!("{function} expects a node-set, got {}", other.kind()))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Nodes(_) => "node-set",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
        }
    }
}

/// Numeric value of a string: optional sign, digits with an optional
/// fraction, surrounding whitespace allowed. Anything else is NaN.
pub(crate) fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let valid = !digits.is_empty()
        && digits != "."
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|&c| c == '.').count() <= 1;
    if valid { trimmed.parse().unwrap_or(f64::NAN) } else { f64::NAN }
}

pub(crate) fn format_number(number: f64) -> String {
    if number.is_nan() {
        "NaN".to_owned()
    } else if number.is_infinite() {
        if number > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() }
    } else if number == number.trunc() && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        format!("{number}")
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<PathNode>> for Value {
    fn from(value: Vec<PathNode>) -> Self {
        Value::Nodes(value)
    }
}

impl From<Node> for Value {
    fn from(value: Node) -> Self {
        Value::Nodes(vec![PathNode::Element(value)])
    }
}
