//! CQL2 JSON predicate evaluation against flat property maps.
//!
//! Queries are parsed once into a [`Predicate`] tree and then evaluated per
//! feature. Both the `{"and": [...]}` and `{"op": "and", "args": [...]}`
//! spellings of logical nodes are accepted.

use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};

use crate::error::{OverlayError, Result};
use crate::models::Properties;

/// Comparison operator of a leaf node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    ILike,
    In,
}

impl ComparisonOp {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "=" => ComparisonOp::Eq,
            "!=" | "<>" => ComparisonOp::Ne,
            "<" => ComparisonOp::Lt,
            "<=" => ComparisonOp::Le,
            ">" => ComparisonOp::Gt,
            ">=" => ComparisonOp::Ge,
            "like" => ComparisonOp::Like,
            "ilike" => ComparisonOp::ILike,
            "in" => ComparisonOp::In,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Like => "like",
            ComparisonOp::ILike => "ilike",
            ComparisonOp::In => "in",
        }
    }
}

/// `property <op> literal`
#[derive(Debug, Clone)]
pub struct Comparison {
    pub op: ComparisonOp,
    pub property: String,
    pub literal: Value,
    /// Compiled pattern for `like`/`ilike` with a string literal
    matcher: Option<Regex>,
}

impl Comparison {
    fn evaluate(&self, properties: &Properties) -> bool {
        let value = properties.get(&self.property);
        match self.op {
            ComparisonOp::Eq => strict_equals(value, &self.literal),
            ComparisonOp::Ne => !strict_equals(value, &self.literal),
            ComparisonOp::Lt => compare(value, &self.literal).is_some_and(|o| o.is_lt()),
            ComparisonOp::Le => compare(value, &self.literal).is_some_and(|o| o.is_le()),
            ComparisonOp::Gt => compare(value, &self.literal).is_some_and(|o| o.is_gt()),
            ComparisonOp::Ge => compare(value, &self.literal).is_some_and(|o| o.is_ge()),
            ComparisonOp::Like | ComparisonOp::ILike => match (value, &self.matcher) {
                (Some(Value::String(s)), Some(re)) => re.is_match(s),
                _ => false,
            },
            ComparisonOp::In => match &self.literal {
                Value::Array(candidates) => candidates.iter().any(|c| strict_equals(value, c)),
                _ => false,
            },
        }
    }
}

/// Parsed CQL2 predicate tree
#[derive(Debug, Clone)]
pub enum Predicate {
    Comparison(Comparison),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Parse and validate a CQL2 JSON query
    pub fn parse(query: &Value) -> Result<Self> {
        let object = match query {
            Value::Null => return Err(OverlayError::predicate("Query cannot be null or undefined")),
            Value::Object(object) => object,
            other => {
                return Err(OverlayError::predicate(format!(
                    "Invalid query format: {}",
                    display_value(other)
                )))
            }
        };

        if let Some(args) = object.get("and") {
            return Ok(Predicate::And(parse_children(args, "and")?));
        }
        if let Some(args) = object.get("or") {
            return Ok(Predicate::Or(parse_children(args, "or")?));
        }
        if let Some(inner) = object.get("not") {
            return Ok(Predicate::Not(Box::new(Predicate::parse(inner)?)));
        }

        let op = match object.get("op") {
            Some(Value::String(op)) => op.as_str(),
            Some(other) => {
                return Err(OverlayError::UnsupportedOperator { op: display_value(other) })
            }
            None => {
                return Err(OverlayError::predicate(format!(
                    "Invalid query format: {}",
                    query
                )))
            }
        };
        let args = object.get("args").unwrap_or(&Value::Null);

        match op {
            "and" => Ok(Predicate::And(parse_children(args, op)?)),
            "or" => Ok(Predicate::Or(parse_children(args, op)?)),
            "not" => match args {
                Value::Array(items) if items.len() == 1 => {
                    Ok(Predicate::Not(Box::new(Predicate::parse(&items[0])?)))
                }
                _ => Err(invalid_arguments(op)),
            },
            _ => {
                let cmp = ComparisonOp::parse(op)
                    .ok_or_else(|| OverlayError::UnsupportedOperator { op: op.to_string() })?;
                parse_comparison(cmp, args)
            }
        }
    }

    /// Parse an optional query; `None` means "match everything"
    pub fn parse_optional(query: Option<&Value>) -> Result<Option<Self>> {
        query.map(Predicate::parse).transpose()
    }

    /// Evaluate against a property map. `and`/`or` short-circuit left to right.
    pub fn evaluate(&self, properties: &Properties) -> bool {
        match self {
            Predicate::Comparison(c) => c.evaluate(properties),
            Predicate::And(children) => children.iter().all(|c| c.evaluate(properties)),
            Predicate::Or(children) => children.iter().any(|c| c.evaluate(properties)),
            Predicate::Not(inner) => !inner.evaluate(properties),
        }
    }
}

/// Parse and evaluate a query in one step
pub fn evaluate_query(query: &Value, properties: &Properties) -> Result<bool> {
    Ok(Predicate::parse(query)?.evaluate(properties))
}

/// OR-combine two optional queries. If either side is absent the other is kept.
pub fn consolidate_queries(a: Option<Value>, b: Option<Value>) -> Option<Value> {
    match (a, b) {
        (None, None) => None,
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (Some(a), Some(b)) => Some(json!({"op": "or", "args": [a, b]})),
    }
}

fn parse_children(args: &Value, op: &str) -> Result<Vec<Predicate>> {
    match args {
        Value::Array(items) => items.iter().map(Predicate::parse).collect(),
        _ => Err(invalid_arguments(op)),
    }
}

fn parse_comparison(op: ComparisonOp, args: &Value) -> Result<Predicate> {
    let items = match args {
        Value::Array(items) if items.len() == 2 => items,
        _ => return Err(invalid_arguments(op.as_str())),
    };
    let property = items[0]
        .get("property")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_arguments(op.as_str()))?
        .to_string();
    let literal = items[1].clone();

    let matcher = match (op, &literal) {
        (ComparisonOp::Like | ComparisonOp::ILike, Value::String(pattern)) => Some(
            RegexBuilder::new(&like_to_regex(pattern))
                .case_insensitive(op == ComparisonOp::ILike)
                .build()
                .map_err(|e| OverlayError::predicate(format!("Invalid like pattern: {}", e)))?,
        ),
        _ => None,
    };

    Ok(Predicate::Comparison(Comparison { op, property, literal, matcher }))
}

fn invalid_arguments(op: &str) -> OverlayError {
    OverlayError::predicate(format!("Invalid arguments for operator {}", op))
}

/// Translate a SQL LIKE pattern into an anchored regular expression
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    out.push('$');
    out
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Strict equality; numbers compare by value regardless of integer/float encoding.
/// A missing property only equals a `null` literal.
fn strict_equals(value: Option<&Value>, literal: &Value) -> bool {
    match (value, literal) {
        (None, Value::Null) => true,
        (None, _) => false,
        (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Some(a), b) => a == b,
    }
}

fn compare(value: Option<&Value>, literal: &Value) -> Option<std::cmp::Ordering> {
    match (value?, literal) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_equality_operators() {
        let p = props(json!({"name": "test", "age": 25}));
        assert!(evaluate_query(&json!({"op": "=", "args": [{"property": "name"}, "test"]}), &p).unwrap());
        assert!(evaluate_query(&json!({"op": "=", "args": [{"property": "age"}, 25.0]}), &p).unwrap());
        assert!(!evaluate_query(&json!({"op": "=", "args": [{"property": "name"}, "wrong"]}), &p).unwrap());
        assert!(evaluate_query(&json!({"op": "!=", "args": [{"property": "age"}, 30]}), &p).unwrap());
        assert!(!evaluate_query(&json!({"op": "!=", "args": [{"property": "name"}, "test"]}), &p).unwrap());
    }

    #[test]
    fn test_missing_property() {
        let p = props(json!({"name": "test"}));
        assert!(!evaluate_query(&json!({"op": "=", "args": [{"property": "depth"}, 0]}), &p).unwrap());
        assert!(evaluate_query(&json!({"op": "!=", "args": [{"property": "depth"}, 0]}), &p).unwrap());
        assert!(evaluate_query(&json!({"op": "=", "args": [{"property": "depth"}, null]}), &p).unwrap());
        assert!(!evaluate_query(&json!({"op": ">", "args": [{"property": "depth"}, 0]}), &p).unwrap());
    }

    #[test]
    fn test_ordering_operators() {
        let p = props(json!({"age": 25, "name": "m"}));
        assert!(evaluate_query(&json!({"op": "<", "args": [{"property": "age"}, 30]}), &p).unwrap());
        assert!(evaluate_query(&json!({"op": "<=", "args": [{"property": "age"}, 25]}), &p).unwrap());
        assert!(!evaluate_query(&json!({"op": ">", "args": [{"property": "age"}, 25]}), &p).unwrap());
        assert!(evaluate_query(&json!({"op": ">=", "args": [{"property": "name"}, "a"]}), &p).unwrap());
        assert!(!evaluate_query(&json!({"op": "<", "args": [{"property": "name"}, 3]}), &p).unwrap());
    }

    #[test]
    fn test_in_operator() {
        let p = props(json!({"name": "test", "age": 25}));
        assert!(evaluate_query(&json!({"op": "in", "args": [{"property": "name"}, ["test", "other"]]}), &p).unwrap());
        assert!(evaluate_query(&json!({"op": "in", "args": [{"property": "age"}, [25, 30]]}), &p).unwrap());
        assert!(!evaluate_query(&json!({"op": "in", "args": [{"property": "name"}, ["wrong"]]}), &p).unwrap());
        assert!(!evaluate_query(&json!({"op": "in", "args": [{"property": "name"}, "test"]}), &p).unwrap());
    }

    #[test]
    fn test_like_and_ilike() {
        let p = props(json!({"name": "Coral Reef", "code": 12}));
        assert!(evaluate_query(&json!({"op": "like", "args": [{"property": "name"}, "Coral%"]}), &p).unwrap());
        assert!(!evaluate_query(&json!({"op": "like", "args": [{"property": "name"}, "coral%"]}), &p).unwrap());
        assert!(evaluate_query(&json!({"op": "ilike", "args": [{"property": "name"}, "coral%"]}), &p).unwrap());
        assert!(evaluate_query(&json!({"op": "like", "args": [{"property": "name"}, "Coral_Reef"]}), &p).unwrap());
        assert!(!evaluate_query(&json!({"op": "like", "args": [{"property": "name"}, "Coral"]}), &p).unwrap());
        // regex metacharacters are literal
        assert!(!evaluate_query(&json!({"op": "like", "args": [{"property": "name"}, "C.*"]}), &p).unwrap());
        // non-string operands never match
        assert!(!evaluate_query(&json!({"op": "like", "args": [{"property": "code"}, "12"]}), &p).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        let p = props(json!({"name": "test", "age": 25, "role": "admin"}));
        let and = json!({"and": [
            {"op": "=", "args": [{"property": "name"}, "test"]},
            {"op": "=", "args": [{"property": "age"}, 30]}
        ]});
        assert!(!evaluate_query(&and, &p).unwrap());

        let nested = json!({"op": "and", "args": [
            {"op": "=", "args": [{"property": "name"}, "test"]},
            {"op": "or", "args": [
                {"op": "=", "args": [{"property": "age"}, 30]},
                {"op": "=", "args": [{"property": "role"}, "admin"]}
            ]}
        ]});
        assert!(evaluate_query(&nested, &p).unwrap());

        let not = json!({"not": {"op": "=", "args": [{"property": "name"}, "wrong"]}});
        assert!(evaluate_query(&not, &p).unwrap());
    }

    #[test]
    fn test_error_messages() {
        let p = Properties::new();
        let err = evaluate_query(&Value::Null, &p).unwrap_err();
        assert_eq!(err.to_string(), "Query cannot be null or undefined");

        let err = evaluate_query(&json!("invalid"), &p).unwrap_err();
        assert_eq!(err.to_string(), "Invalid query format: invalid");

        let err = evaluate_query(&json!({"op": "unsupported", "args": [{"property": "name"}, "x"]}), &p)
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported operator: unsupported");
        assert!(err.is_configuration());

        let err = evaluate_query(&json!({"op": "=", "args": [{"property": "name"}]}), &p).unwrap_err();
        assert_eq!(err.to_string(), "Invalid arguments for operator =");
    }

    #[test]
    fn test_consolidate_queries() {
        let q1 = json!({"op": "=", "args": [{"property": "name"}, "test"]});
        let q2 = json!({"op": "=", "args": [{"property": "age"}, 25]});
        assert_eq!(consolidate_queries(None, None), None);
        assert_eq!(consolidate_queries(Some(q1.clone()), None), Some(q1.clone()));
        assert_eq!(consolidate_queries(None, Some(q2.clone())), Some(q2.clone()));
        assert_eq!(
            consolidate_queries(Some(q1.clone()), Some(q2.clone())),
            Some(json!({"op": "or", "args": [q1, q2]}))
        );
    }
}
