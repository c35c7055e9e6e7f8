//! Closed condition language for decision nodes and guarded edges.
//!
//! A condition is a field path, an operator and a literal. Text such as
//! `aiResult.riskLevel === 'high'` is parsed into that form once, at
//! mutation or load time, and then interpreted by [`Condition::evaluate`].
//! Nothing is ever executed as code.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use nodes::traits::lookup_path;

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Exists,
    NotExists,
    Empty,
    NotEmpty,
    Truthy,
    Falsy,
}

impl Operator {
    /// Symbols accepted in text conditions, longest first so `===` wins over `==`.
    const SYMBOLS: [(&'static str, Operator); 8] = [
        ("===", Operator::Eq),
        ("!==", Operator::Ne),
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        (">=", Operator::Gte),
        ("<=", Operator::Lte),
        (">", Operator::Gt),
        ("<", Operator::Lt),
    ];
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// `path operator value`, evaluated against the execution context.
///
/// On the wire either the structured object or the text form is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCondition", into = "RawCondition")]
pub struct Condition {
    /// Dotted path into the context, e.g. `aiResult.riskLevel` or `items.0`.
    pub path: String,
    pub operator: Operator,
    pub value: Value,
}

#[derive(Serialize, Deserialize)]
struct ConditionFields {
    path: String,
    operator: Operator,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    value: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawCondition {
    Text(String),
    Fields(ConditionFields),
}

impl TryFrom<RawCondition> for Condition {
    type Error = ConditionParseError;

    fn try_from(raw: RawCondition) -> Result<Self, Self::Error> {
        match raw {
            RawCondition::Text(text) => text.parse(),
            RawCondition::Fields(f) => Ok(Self::new(f.path, f.operator, f.value)),
        }
    }
}

impl From<Condition> for RawCondition {
    fn from(condition: Condition) -> Self {
        Self::Fields(ConditionFields {
            path: condition.path,
            operator: condition.operator,
            value: condition.value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid condition '{input}': {reason}")]
pub struct ConditionParseError {
    pub input: String,
    pub reason: String,
}

impl ConditionParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_owned(),
            reason: reason.into(),
        }
    }
}

impl Condition {
    pub fn new(path: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            path: path.into(),
            operator,
            value,
        }
    }

    /// Evaluate against the context. Missing paths resolve to "absent", which
    /// only satisfies `notExists`, `empty`, `falsy`, `ne` and `notIn`.
    pub fn evaluate(&self, context: &Map<String, Value>) -> bool {
        let actual = lookup_path(context, &self.path);
        let expected = &self.value;

        match self.operator {
            Operator::Exists => actual.is_some_and(|v| !v.is_null()),
            Operator::NotExists => actual.map_or(true, Value::is_null),
            Operator::Empty => actual.map_or(true, is_empty),
            Operator::NotEmpty => actual.is_some_and(|v| !is_empty(v)),
            Operator::Truthy => actual.is_some_and(is_truthy),
            Operator::Falsy => !actual.is_some_and(is_truthy),
            Operator::Eq => actual.is_some_and(|v| loose_eq(v, expected)),
            Operator::Ne => !actual.is_some_and(|v| loose_eq(v, expected)),
            Operator::Gt => compare(actual, expected, |a, b| a > b),
            Operator::Gte => compare(actual, expected, |a, b| a >= b),
            Operator::Lt => compare(actual, expected, |a, b| a < b),
            Operator::Lte => compare(actual, expected, |a, b| a <= b),
            Operator::Contains => actual.is_some_and(|v| contains(v, expected)),
            Operator::StartsWith => match (actual, expected) {
                (Some(Value::String(s)), Value::String(t)) => s.starts_with(t.as_str()),
                _ => false,
            },
            Operator::EndsWith => match (actual, expected) {
                (Some(Value::String(s)), Value::String(t)) => s.ends_with(t.as_str()),
                _ => false,
            },
            Operator::In => actual.is_some_and(|v| member_of(v, expected)),
            Operator::NotIn => !actual.is_some_and(|v| member_of(v, expected)),
        }
    }
}

impl FromStr for Condition {
    type Err = ConditionParseError;

    /// Accepts `path OP literal`, a bare `path` (truthy) or `!path` (falsy).
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let text = input.trim();
        if text.is_empty() {
            return Err(ConditionParseError::new(input, "empty condition"));
        }

        let Some((at, symbol, operator)) = find_operator(text) else {
            let (path, operator) = match text.strip_prefix('!') {
                Some(rest) => (rest.trim(), Operator::Falsy),
                None => (text, Operator::Truthy),
            };
            check_path(input, path)?;
            return Ok(Self::new(path, operator, Value::Null));
        };

        let path = text[..at].trim();
        let literal = text[at + symbol.len()..].trim();
        check_path(input, path)?;
        let value = parse_literal(input, literal)?;
        Ok(Self::new(path, operator, value))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = Operator::SYMBOLS
            .iter()
            .skip(2)
            .find(|(_, op)| *op == self.operator)
            .map(|(s, _)| *s);
        match (symbol, self.operator) {
            (Some(s), _) => write!(f, "{} {} {}", self.path, s, self.value),
            (None, Operator::Truthy) => f.write_str(&self.path),
            (None, Operator::Falsy) => write!(f, "!{}", self.path),
            (None, op) => write!(f, "{} {:?} {}", self.path, op, self.value),
        }
    }
}

/// Locate the first comparison symbol outside a quoted literal.
fn find_operator(text: &str) -> Option<(usize, &'static str, Operator)> {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None => {
                let rest = &text[i..];
                if let Some(&(symbol, op)) =
                    Operator::SYMBOLS.iter().find(|(s, _)| rest.starts_with(*s))
                {
                    return Some((i, symbol, op));
                }
            }
        }
    }
    None
}

fn check_path(input: &str, path: &str) -> Result<(), ConditionParseError> {
    let valid = !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(ConditionParseError::new(input, format!("'{path}' is not a field path")))
    }
}

fn parse_literal(input: &str, literal: &str) -> Result<Value, ConditionParseError> {
    if literal.len() >= 2 {
        let first = literal.as_bytes()[0];
        let last = literal.as_bytes()[literal.len() - 1];
        if first == last && (first == b'\'' || first == b'"') {
            return Ok(Value::String(literal[1..literal.len() - 1].to_owned()));
        }
    }
    match serde_json::from_str::<Value>(literal) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => Ok(value),
        _ => Err(ConditionParseError::new(
            input,
            format!("'{literal}' is not a string, number, boolean or null literal"),
        )),
    }
}

// ---------------------------------------------------------------------------
// EdgeCondition
// ---------------------------------------------------------------------------

/// Guard on an edge. Absence of a guard (`Option::None` on the edge) means
/// unconditional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEdgeCondition", into = "RawEdgeCondition")]
pub enum EdgeCondition {
    /// Reserved `"error"`: followed only when the source's handler fails.
    OnError,
    /// `"true"`: the source's decision evaluated true.
    OnTrue,
    /// `"false"`: the source's decision evaluated false.
    OnFalse,
    Predicate(Condition),
}

impl EdgeCondition {
    pub const ERROR: &'static str = "error";
}

impl FromStr for EdgeCondition {
    type Err = ConditionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            Self::ERROR => Ok(Self::OnError),
            "true" => Ok(Self::OnTrue),
            "false" => Ok(Self::OnFalse),
            other => other.parse().map(Self::Predicate),
        }
    }
}

impl fmt::Display for EdgeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnError => f.write_str(Self::ERROR),
            Self::OnTrue => f.write_str("true"),
            Self::OnFalse => f.write_str("false"),
            Self::Predicate(c) => c.fmt(f),
        }
    }
}

/// Wire form: either text (keyword or expression) or a structured predicate.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawEdgeCondition {
    Text(String),
    Predicate(Condition),
}

impl TryFrom<RawEdgeCondition> for EdgeCondition {
    type Error = ConditionParseError;

    fn try_from(raw: RawEdgeCondition) -> Result<Self, Self::Error> {
        match raw {
            RawEdgeCondition::Text(text) => text.parse(),
            RawEdgeCondition::Predicate(c) => Ok(Self::Predicate(c)),
        }
    }
}

impl From<EdgeCondition> for RawEdgeCondition {
    fn from(condition: EdgeCondition) -> Self {
        match condition {
            EdgeCondition::Predicate(c) => Self::Predicate(c),
            keyword => Self::Text(keyword.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Equality with number/string/bool coercion.
fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            match s.to_ascii_lowercase().as_str() {
                "true" => *b,
                "false" => !*b,
                _ => false,
            }
        }
        _ => false,
    }
}

fn compare(actual: Option<&Value>, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(as_number), as_number(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(s), Value::String(t)) => s.contains(t.as_str()),
        (Value::String(s), Value::Number(n)) => s.contains(&n.to_string()),
        (Value::Array(items), target) => items.iter().any(|item| loose_eq(item, target)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

fn member_of(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(items) => items.iter().any(|item| loose_eq(actual, item)),
        other => loose_eq(actual, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("context must be an object"),
        }
    }

    #[test]
    fn parses_javascript_style_comparisons() {
        let c: Condition = "aiResult.riskLevel === 'high'".parse().unwrap();
        assert_eq!(c, Condition::new("aiResult.riskLevel", Operator::Eq, json!("high")));

        let c: Condition = "input.score >= 10".parse().unwrap();
        assert_eq!(c, Condition::new("input.score", Operator::Gte, json!(10)));

        let c: Condition = "!flags.blocked".parse().unwrap();
        assert_eq!(c.operator, Operator::Falsy);
        assert_eq!(c.path, "flags.blocked");
    }

    #[test]
    fn operator_inside_quotes_is_not_split_on() {
        let c: Condition = "note == 'a >= b'".parse().unwrap();
        assert_eq!(c, Condition::new("note", Operator::Eq, json!("a >= b")));
    }

    #[test]
    fn rejects_code_like_input() {
        assert!("alert(1)".parse::<Condition>().is_err());
        assert!("a.b == someIdentifier".parse::<Condition>().is_err());
        assert!("== 3".parse::<Condition>().is_err());
        assert!("".parse::<Condition>().is_err());
    }

    #[test]
    fn evaluates_against_nested_context() {
        let context = ctx(json!({
            "aiResult": { "riskLevel": "high", "score": "0.9" },
            "items": [1, 2, 3],
        }));

        assert!(Condition::new("aiResult.riskLevel", Operator::Eq, json!("high")).evaluate(&context));
        assert!(Condition::new("aiResult.score", Operator::Gt, json!(0.5)).evaluate(&context));
        assert!(Condition::new("items", Operator::Contains, json!(2)).evaluate(&context));
        assert!(Condition::new("items.2", Operator::In, json!([3, 4])).evaluate(&context));
        assert!(!Condition::new("aiResult.missing", Operator::Exists, Value::Null).evaluate(&context));
        assert!(Condition::new("aiResult.missing", Operator::Ne, json!("x")).evaluate(&context));
        assert!(!Condition::new("aiResult.missing", Operator::Gt, json!(1)).evaluate(&context));
    }

    #[test]
    fn edge_condition_keywords_and_wire_form() {
        assert_eq!("error".parse::<EdgeCondition>().unwrap(), EdgeCondition::OnError);
        assert_eq!(" true ".parse::<EdgeCondition>().unwrap(), EdgeCondition::OnTrue);

        let from_text: EdgeCondition = serde_json::from_value(json!("score < 3")).unwrap();
        let from_struct: EdgeCondition =
            serde_json::from_value(json!({ "path": "score", "operator": "lt", "value": 3 })).unwrap();
        assert_eq!(from_text, from_struct);

        assert_eq!(serde_json::to_value(EdgeCondition::OnError).unwrap(), json!("error"));
        assert!(serde_json::from_value::<EdgeCondition>(json!("rm -rf /")).is_err());
    }
}
