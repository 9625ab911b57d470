//! Pattern projection
//!
//! A pattern maps an item `(index, value)` to the value a binding should use.
//!
//! | Pattern          | Result                                         |
//! |------------------|------------------------------------------------|
//! | `$`              | the value itself (borrowed, never copied)      |
//! | `#`              | the index as a number                          |
//! | `${a.b}`         | nested lookup, native type preserved           |
//! | `${a\|\|b}`      | first truthy alternative                       |
//! | `#-${name}`      | tokens concatenated into a string              |
//! | `?name`          | result handed to a registered evaluator        |
//!
//! String results are coerced back to primitives (`"3"` becomes `3`,
//! `"true"` becomes `true`) so comparisons behave as expected.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tessel_core::{display_string, is_truthy, nested_get, string_to_primitive};
use tessel_dom::NodeId;
use thiserror::Error;
use tracing::{trace, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("unterminated `${{` in pattern `{0}`")]
    Unterminated(String),

    #[error("empty `${{}}` in pattern `{0}`")]
    EmptyPath(String),
}

/// One parsed piece of a pattern
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    /// `#`
    Index,
    /// `$`
    Value,
    /// `${a.b||c}`: alternatives, each a dotted path
    Path(Vec<Vec<String>>),
}

/// A pre-parsed pattern
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    tokens: Vec<Token>,
}

impl Pattern {
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(c) = rest.chars().next() {
            match c {
                '#' => {
                    flush(&mut literal, &mut tokens);
                    tokens.push(Token::Index);
                    rest = &rest[1..];
                }
                '$' if rest[1..].starts_with('{') => {
                    flush(&mut literal, &mut tokens);
                    let close = rest
                        .find('}')
                        .ok_or_else(|| PatternError::Unterminated(source.to_string()))?;
                    let inner = rest[2..close].trim();
                    if inner.is_empty() {
                        return Err(PatternError::EmptyPath(source.to_string()));
                    }
                    let alts = inner
                        .split("||")
                        .map(|alt| alt.trim().split('.').map(str::to_string).collect())
                        .collect();
                    tokens.push(Token::Path(alts));
                    rest = &rest[close + 1..];
                }
                '$' => {
                    flush(&mut literal, &mut tokens);
                    tokens.push(Token::Value);
                    rest = &rest[1..];
                }
                other => {
                    literal.push(other);
                    rest = &rest[other.len_utf8()..];
                }
            }
        }
        flush(&mut literal, &mut tokens);

        Ok(Self {
            source: source.to_string(),
            tokens,
        })
    }

    /// Build `${a.b}` from a key path like `["a", "b"]`
    pub fn from_key_path<S: AsRef<str>>(path: &[S]) -> Result<Self, PatternError> {
        let joined = path.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(".");
        Self::parse(&format!("${{{}}}", joined))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Whether the result depends on the item's position
    pub fn is_index_dependent(&self) -> bool {
        self.tokens.iter().any(|t| matches!(t, Token::Index))
    }

    /// Whether the pattern reads anything from the item at all
    pub fn is_dynamic(&self) -> bool {
        self.source.contains('?') || self.tokens.iter().any(|t| !matches!(t, Token::Literal(_)))
    }

    /// Project `(index, value)` through this pattern
    pub fn apply<'v>(&self, index: usize, value: &'v Value, env: &PatternEnv<'_>) -> Cow<'v, Value> {
        match self.tokens.as_slice() {
            [Token::Value] => {
                trace!(pattern = %self.source, "resolved to the whole value");
                return Cow::Borrowed(value);
            }
            [Token::Index] => return Cow::Owned(Value::from(index)),
            _ => {}
        }

        let mut parts: Vec<Cow<'v, Value>> = self
            .tokens
            .iter()
            .map(|token| match token {
                Token::Literal(s) => Cow::Owned(Value::String(s.clone())),
                Token::Index => Cow::Owned(Value::from(index)),
                Token::Value => Cow::Borrowed(value),
                Token::Path(alts) => self.resolve_path(value, alts, env),
            })
            .collect();

        let whole = if parts.len() == 1 {
            parts.pop().unwrap_or(Cow::Owned(Value::Null))
        } else {
            let mut joined = String::new();
            for part in &parts {
                if part.is_object() || part.is_array() {
                    warn!(pattern = %self.source, "pattern concatenated a structured value");
                }
                joined.push_str(&display_string(part));
            }
            Cow::Owned(Value::String(joined))
        };

        let text = match whole.as_ref() {
            Value::String(s) => Some(s.clone()),
            _ => None,
        };
        let resolved = match text {
            Some(s) => match s.strip_prefix('?') {
                Some(name) => Cow::Owned(self.evaluate(name, index, value, env)),
                None => Cow::Owned(string_to_primitive(&s)),
            },
            None => whole,
        };

        let empty = match resolved.as_ref() {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        };
        if empty && !env.empty_ok {
            warn!(pattern = %self.source, index, "pattern resolved to nothing");
        } else {
            trace!(pattern = %self.source, index, resolved = %resolved, "resolved pattern");
        }
        resolved
    }

    fn resolve_path<'v>(&self, value: &'v Value, alts: &[Vec<String>], env: &PatternEnv<'_>) -> Cow<'v, Value> {
        match value {
            Value::Null => Cow::Owned(Value::Null),
            Value::Object(_) | Value::Array(_) => {
                let mut last = None;
                for alt in alts {
                    let found = nested_get(value, alt.as_slice());
                    if found.is_some_and(is_truthy) {
                        return found.map(Cow::Borrowed).unwrap_or(Cow::Owned(Value::Null));
                    }
                    last = found;
                }
                last.map(Cow::Borrowed).unwrap_or(Cow::Owned(Value::Null))
            }
            _ => {
                if !env.empty_ok {
                    warn!(pattern = %self.source, "pattern reads a property but the value is primitive");
                }
                Cow::Owned(Value::Null)
            }
        }
    }

    fn evaluate(&self, name: &str, index: usize, value: &Value, env: &PatternEnv<'_>) -> Value {
        let handler = env.evaluators.and_then(|e| e.get(name));
        match handler {
            Some(f) => f(&PatternContext {
                index,
                value,
                pattern: &self.source,
                node: env.node,
            }),
            None => {
                warn!(pattern = %self.source, evaluator = name, "no such evaluator, using empty string");
                Value::String(String::new())
            }
        }
    }
}

fn flush(literal: &mut String, tokens: &mut Vec<Token>) {
    if !literal.is_empty() {
        tokens.push(Token::Literal(std::mem::take(literal)));
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// What an evaluator sees when a pattern resolves to `?name`
pub struct PatternContext<'a> {
    pub index: usize,
    pub value: &'a Value,
    pub pattern: &'a str,
    pub node: Option<NodeId>,
}

pub type Evaluator = Rc<dyn Fn(&PatternContext<'_>) -> Value>;

/// Named functions reachable from `?name` pattern results
#[derive(Clone, Default)]
pub struct Evaluators {
    map: FxHashMap<String, Evaluator>,
}

impl Evaluators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&PatternContext<'_>) -> Value + 'static,
    {
        self.map.insert(name.into(), Rc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&Evaluator> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }
}

impl fmt::Debug for Evaluators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.map.keys()).finish()
    }
}

/// Options for a single projection
#[derive(Clone, Copy, Default)]
pub struct PatternEnv<'a> {
    pub evaluators: Option<&'a Evaluators>,
    /// Suppress "resolved to nothing" warnings
    pub empty_ok: bool,
    /// Node the binding is being applied to, passed on to evaluators
    pub node: Option<NodeId>,
}

impl<'a> PatternEnv<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evaluators(mut self, evaluators: &'a Evaluators) -> Self {
        self.evaluators = Some(evaluators);
        self
    }

    pub fn empty_ok(mut self, ok: bool) -> Self {
        self.empty_ok = ok;
        self
    }

    pub fn on_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }
}

/// Parse and apply a pattern in one step
pub fn apply<'v>(
    index: usize,
    value: &'v Value,
    pattern: &str,
    env: &PatternEnv<'_>,
) -> Result<Cow<'v, Value>, PatternError> {
    Ok(Pattern::parse(pattern)?.apply(index, value, env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn run(index: usize, value: &Value, pattern: &str) -> Value {
        apply(index, value, pattern, &PatternEnv::new().empty_ok(true))
            .unwrap()
            .into_owned()
    }

    #[test]
    fn test_index_and_path_concatenate() {
        assert_eq!(run(2, &json!({"foo": "bar"}), "#-${foo}"), json!("2-bar"));
        assert_eq!(
            run(7, &json!({"foo": "bar", "me": {"age": 4}}), "#-${me.age}${faa||foo}banan#hat"),
            json!("7-4barbanan7hat")
        );
    }

    #[test]
    fn test_index_alone_is_a_number() {
        assert_eq!(run(1, &json!("red"), "#"), json!(1));
    }

    #[test]
    fn test_whole_value_is_borrowed() {
        let value = json!({"a": 1});
        let out = apply(0, &value, "$", &PatternEnv::new()).unwrap();
        match out {
            Cow::Borrowed(v) => assert!(std::ptr::eq(v, &value)),
            Cow::Owned(_) => panic!("expected the same reference"),
        }
    }

    #[test]
    fn test_single_path_keeps_native_type() {
        let value = json!({"tags": ["a", "b"], "n": 3, "on": false});
        assert_eq!(run(0, &value, "${tags}"), json!(["a", "b"]));
        assert_eq!(run(0, &value, "${n}"), json!(3));
        assert_eq!(run(0, &value, "${tags.1}"), json!("b"));
        assert_eq!(run(0, &value, "${on}"), json!(false));
    }

    #[test]
    fn test_alternatives() {
        let value = json!({"nick": "", "name": "Ada", "zero": 0});
        assert_eq!(run(0, &value, "${nick||name}"), json!("Ada"));
        // Nothing truthy: the last alternative's raw value
        assert_eq!(run(0, &value, "${nick||zero}"), json!(0));
        assert_eq!(run(0, &value, "${missing||nope}"), json!(null));
    }

    #[test]
    fn test_path_on_primitive_or_null() {
        assert_eq!(run(0, &json!(null), "${a}"), json!(null));
        assert_eq!(run(0, &json!(5), "${a}"), json!(null));
        assert_eq!(run(3, &json!(5), "${a}#"), json!(3));
    }

    #[test]
    fn test_string_results_become_primitives() {
        assert_eq!(run(0, &json!({"n": "42"}), "${n}"), json!(42));
        assert_eq!(run(0, &json!({"b": "true"}), "${b}"), json!(true));
        assert_eq!(run(0, &json!("x"), "item-$"), json!("item-x"));
    }

    #[test]
    fn test_evaluators() {
        let mut evaluators = Evaluators::new();
        evaluators.register("double", |cx| {
            Value::from(cx.value.get("n").and_then(Value::as_i64).unwrap_or(0) * 2)
        });
        let env = PatternEnv::new().with_evaluators(&evaluators).empty_ok(true);

        let value = json!({"n": 21, "fn": "double"});
        assert_eq!(apply(0, &value, "?${fn}", &env).unwrap().into_owned(), json!(42));
        assert_eq!(apply(0, &value, "?unknown", &env).unwrap().into_owned(), json!(""));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Pattern::parse("${open"),
            Err(PatternError::Unterminated("${open".to_string()))
        );
        assert_eq!(
            Pattern::parse("a${ }b"),
            Err(PatternError::EmptyPath("a${ }b".to_string()))
        );
    }

    #[test]
    fn test_classification() {
        assert!(Pattern::parse("row-#").unwrap().is_index_dependent());
        assert!(!Pattern::parse("${a}").unwrap().is_index_dependent());
        assert!(!Pattern::parse("static").unwrap().is_dynamic());
        assert!(Pattern::parse("?fn").unwrap().is_dynamic());
        assert_eq!(
            Pattern::from_key_path(&["person", "age"]).unwrap().as_str(),
            "${person.age}"
        );
    }
}
