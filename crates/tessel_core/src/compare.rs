//! Comparison operators
//!
//! Template rules (`["${kind}", "==", "a"]`) and instruction tests
//! (`">=5"`) both reduce to `compare(lhs, op, rhs, rhs2)`. Operators are
//! parsed once into [`CompareOp`]; unknown operator strings are a typed error
//! at registration rather than a silent `false` at evaluation.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

use crate::value::{
    as_number, display_string, is_truthy, loose_eq, strict_eq, string_to_primitive,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompareError {
    #[error("unknown comparison operator `{0}`")]
    UnknownOperator(String),

    #[error("operator `{0}` needs a second operand")]
    MissingOperand(CompareOp),
}

/// A comparison operator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `==` loose equality
    Eq,
    /// `===` strict equality
    StrictEq,
    /// `!=`
    Ne,
    /// `!==`
    StrictNe,
    Gt,
    Ge,
    Lt,
    Le,
    /// Left side is contained in the right side (array, string or object keys)
    In,
    NotIn,
    /// Left side contains the right side
    Includes,
    NotIncludes,
    /// Inclusive numeric range, needs two operands
    Between,
    /// Ignores operands
    Truthy,
    Falsy,
}

impl CompareOp {
    /// Operator spellings, longest first so prefix matching is unambiguous
    const SYMBOLS: &'static [(&'static str, CompareOp)] = &[
        ("!==", CompareOp::StrictNe),
        ("===", CompareOp::StrictEq),
        ("!=", CompareOp::Ne),
        ("==", CompareOp::Eq),
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::StrictEq => "===",
            CompareOp::Ne => "!=",
            CompareOp::StrictNe => "!==",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::In => "in",
            CompareOp::NotIn => "!in",
            CompareOp::Includes => "includes",
            CompareOp::NotIncludes => "!includes",
            CompareOp::Between => "between",
            CompareOp::Truthy => "truthy",
            CompareOp::Falsy => "falsy",
        }
    }

    /// Whether the operator reads a second right-hand operand
    pub fn is_ternary(self) -> bool {
        self == CompareOp::Between
    }

    /// Check a right-hand side arity for this operator
    pub fn check_operands(self, rhs2: Option<&Value>) -> Result<(), CompareError> {
        if self.is_ternary() && rhs2.is_none() {
            return Err(CompareError::MissingOperand(self));
        }
        Ok(())
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareOp {
    type Err = CompareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some((_, op)) = Self::SYMBOLS.iter().find(|(sym, _)| *sym == trimmed) {
            return Ok(*op);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "in" => Ok(CompareOp::In),
            "!in" | "not in" => Ok(CompareOp::NotIn),
            "includes" => Ok(CompareOp::Includes),
            "!includes" => Ok(CompareOp::NotIncludes),
            "between" => Ok(CompareOp::Between),
            "truthy" => Ok(CompareOp::Truthy),
            "falsy" => Ok(CompareOp::Falsy),
            _ => Err(CompareError::UnknownOperator(s.to_string())),
        }
    }
}

/// Split a test string like `">=5"` into operator and operand.
///
/// Returns `None` for the operator when the string does not start with one;
/// the operand is coerced with [`string_to_primitive`].
pub fn split_on_operator(s: &str) -> (Option<CompareOp>, Value) {
    let trimmed = s.trim_start();
    for (sym, op) in CompareOp::SYMBOLS {
        if let Some(rest) = trimmed.strip_prefix(sym) {
            return (Some(*op), string_to_primitive(rest.trim()));
        }
    }
    (None, string_to_primitive(s))
}

fn ordering(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return Some(a.cmp(b));
    }
    as_number(lhs)?.partial_cmp(&as_number(rhs)?)
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::String(s) => s.contains(display_string(needle).as_str()),
        Value::Object(map) => map.contains_key(display_string(needle).as_str()),
        _ => false,
    }
}

/// Evaluate `lhs <op> rhs [rhs2]`.
///
/// Ordering operators compare strings lexically and everything else
/// numerically; a side that cannot be ordered makes the result `false`.
pub fn compare(lhs: &Value, op: CompareOp, rhs: &Value, rhs2: Option<&Value>) -> bool {
    match op {
        CompareOp::Eq => loose_eq(lhs, rhs),
        CompareOp::Ne => !loose_eq(lhs, rhs),
        CompareOp::StrictEq => strict_eq(lhs, rhs),
        CompareOp::StrictNe => !strict_eq(lhs, rhs),
        CompareOp::Gt => ordering(lhs, rhs) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering(lhs, rhs), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::Lt => ordering(lhs, rhs) == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering(lhs, rhs), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::In => contains(rhs, lhs),
        CompareOp::NotIn => !contains(rhs, lhs),
        CompareOp::Includes => contains(lhs, rhs),
        CompareOp::NotIncludes => !contains(lhs, rhs),
        CompareOp::Between => {
            let Some(hi) = rhs2 else {
                return false;
            };
            matches!(ordering(lhs, rhs), Some(Ordering::Greater | Ordering::Equal))
                && matches!(ordering(lhs, hi), Some(Ordering::Less | Ordering::Equal))
        }
        CompareOp::Truthy => is_truthy(lhs),
        CompareOp::Falsy => !is_truthy(lhs),
    }
}
