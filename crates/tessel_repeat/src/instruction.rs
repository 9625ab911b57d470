//! Reading binding instructions from node attributes
//!
//! Instructions can be written three ways (with the default base attribute):
//!
//! ```text
//! rv-repeat='[{"fn":"attr","key":"${href}","args":["href"]}, {"fn":"text","pattern":"$"}]'
//! rv-repeat-text="${name}"
//! rv-repeat_key="${price}" rv-repeat-classif='["cheap"]'
//! ```
//!
//! The JSON form allows the same action more than once. The sub-attribute
//! form names the action after the dash; its value is the pattern, or the
//! args when a `_key` attribute supplies a shared pattern.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use tessel_core::{compare, display_string, split_on_operator, CompareOp};
use tessel_dom::{Document, NodeId};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::action::ActionRegistry;
use crate::pattern::{Pattern, PatternError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InstructionError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("expected an object or an array of objects")]
    NotAnObject,

    #[error("instruction is missing `fn`")]
    MissingAction,

    #[error("instruction `{0}` has no pattern or key")]
    MissingPattern(String),

    #[error("no handler registered for action `{0}`")]
    UnknownAction(String),

    #[error("pattern must be a string or key path, got {0}")]
    BadPattern(Value),

    #[error("bad test: {0}")]
    BadTest(String),

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// An optional check on the projected value, passed to the action
#[derive(Clone, Debug, PartialEq)]
pub struct Test {
    pub op: CompareOp,
    pub operand: Value,
    pub operand2: Option<Value>,
}

impl Test {
    /// Accepts `">=5"`, `["!=", "x"]`, `[1, "between", 5]` or a bare value
    /// (strict equality).
    pub fn parse(spec: &Value) -> Result<Self, InstructionError> {
        let test = match spec {
            Value::String(s) => Self::from_split(s),
            Value::Array(items) => match items.as_slice() {
                [Value::String(s)] => Self::from_split(s),
                [single] => Self::strict(single.clone()),
                _ => {
                    let pos = items
                        .iter()
                        .position(|v| v.as_str().is_some_and(|s| s.parse::<CompareOp>().is_ok()))
                        .ok_or_else(|| InstructionError::BadTest("no comparison operator".into()))?;
                    let op = items[pos]
                        .as_str()
                        .and_then(|s| s.parse::<CompareOp>().ok())
                        .unwrap_or(CompareOp::StrictEq);
                    let mut operands = items
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != pos)
                        .map(|(_, v)| v.clone());
                    Self {
                        op,
                        operand: operands.next().unwrap_or(Value::Null),
                        operand2: operands.next(),
                    }
                }
            },
            other => Self::strict(other.clone()),
        };
        test.op
            .check_operands(test.operand2.as_ref())
            .map_err(|e| InstructionError::BadTest(e.to_string()))?;
        Ok(test)
    }

    fn from_split(s: &str) -> Self {
        let (op, operand) = split_on_operator(s);
        Self {
            op: op.unwrap_or(CompareOp::StrictEq),
            operand,
            operand2: None,
        }
    }

    fn strict(operand: Value) -> Self {
        Self {
            op: CompareOp::StrictEq,
            operand,
            operand2: None,
        }
    }

    pub fn check(&self, value: &Value) -> bool {
        compare(value, self.op, &self.operand, self.operand2.as_ref())
    }
}

/// One binding: run `action` with the value projected through `pattern`
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub action: String,
    pub pattern: Pattern,
    pub args: Vec<Value>,
    pub test: Option<Test>,
}

impl Instruction {
    pub fn new(action: impl Into<String>, pattern: &str) -> Result<Self, InstructionError> {
        Ok(Self {
            action: action.into().to_lowercase(),
            pattern: Pattern::parse(pattern)?,
            args: Vec::new(),
            test: None,
        })
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_test(mut self, test: Test) -> Self {
        self.test = Some(test);
        self
    }

    pub fn is_index_dependent(&self) -> bool {
        self.pattern.is_index_dependent()
    }
}

/// Parses instructions off a node's attributes, validating action names
/// against a registry
pub struct InstructionReader<'a> {
    pub base: &'a str,
    pub registry: &'a ActionRegistry,
}

impl<'a> InstructionReader<'a> {
    pub fn new(base: &'a str, registry: &'a ActionRegistry) -> Self {
        Self { base, registry }
    }

    /// Read every instruction on `node`.
    ///
    /// A bad attribute is renamed to `<attr>_fail` and skipped; the others
    /// still load.
    pub fn read(&self, doc: &mut Document, node: NodeId) -> Vec<Instruction> {
        let mut instructions = Vec::new();

        let global_key = doc.attr(node, &format!("{}_key", self.base)).map(|raw| {
            match serde_json::from_str::<Value>(raw) {
                Ok(v @ (Value::String(_) | Value::Array(_))) => v,
                _ => Value::String(raw.to_string()),
            }
        });

        if let Some(text) = doc.attr(node, self.base).map(str::to_string) {
            match self.read_json(&text, global_key.as_ref()) {
                Ok(mut parsed) => instructions.append(&mut parsed),
                Err(err) => self.fail(doc, node, self.base, &text, &err),
            }
        }

        let prefix = format!("{}-", self.base);
        let subs: Vec<(String, String)> = doc
            .attrs(node)
            .filter(|(name, _)| name.starts_with(&prefix) && !name.contains("_fail"))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        for (name, text) in subs {
            let action = &name[prefix.len()..];
            match self.read_sub(action, &text, global_key.as_ref()) {
                Ok(inst) => instructions.push(inst),
                Err(err) => self.fail(doc, node, &name, &text, &err),
            }
        }

        if !instructions.is_empty() {
            debug!(node = ?node, count = instructions.len(), "found instructions");
        }
        instructions
    }

    fn read_json(&self, text: &str, global_key: Option<&Value>) -> Result<Vec<Instruction>, InstructionError> {
        let parsed: Value = serde_json::from_str(text).map_err(|e| InstructionError::Json(e.to_string()))?;
        match parsed {
            Value::Object(obj) => Ok(vec![self.from_object(&obj, None, global_key)?]),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(obj) => self.from_object(obj, None, global_key),
                    _ => Err(InstructionError::NotAnObject),
                })
                .collect(),
            _ => Err(InstructionError::NotAnObject),
        }
    }

    fn read_sub(&self, action: &str, text: &str, global_key: Option<&Value>) -> Result<Instruction, InstructionError> {
        let parsed = serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::String(text.to_string()));
        let mut obj = match parsed {
            Value::Object(obj) => obj,
            other => {
                let mut obj = Map::new();
                let slot = if global_key.is_some() { "args" } else { "key" };
                obj.insert(slot.to_string(), other);
                obj
            }
        };
        obj.remove("fn");
        self.from_object(&obj, Some(action), global_key)
    }

    fn from_object(
        &self,
        obj: &Map<String, Value>,
        action: Option<&str>,
        global_key: Option<&Value>,
    ) -> Result<Instruction, InstructionError> {
        let action = action
            .or_else(|| obj.get("fn").and_then(Value::as_str))
            .ok_or(InstructionError::MissingAction)?
            .to_lowercase();
        if !self.registry.contains(&action) {
            return Err(InstructionError::UnknownAction(action));
        }

        let source = obj
            .get("pattern")
            .or_else(|| obj.get("key"))
            .or(global_key)
            .ok_or_else(|| InstructionError::MissingPattern(action.clone()))?;
        let pattern = match source {
            Value::String(s) => Pattern::parse(s)?,
            Value::Array(path) => {
                let path: Vec<String> = path.iter().map(display_string).collect();
                Pattern::from_key_path(&path)?
            }
            other => return Err(InstructionError::BadPattern(other.clone())),
        };
        if !pattern.is_dynamic() {
            warn!(%pattern, action = %action, "pattern has no #, $ or ?, it will never change");
        }

        let args = match obj.get("args").or_else(|| obj.get("arg")) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
        };

        let test = obj.get("test").map(Test::parse).transpose()?;

        Ok(Instruction {
            action,
            pattern,
            args,
            test,
        })
    }

    fn fail(&self, doc: &mut Document, node: NodeId, attr: &str, text: &str, err: &InstructionError) {
        error!(node = ?node, attr, %err, "bad instructions, renaming attribute to {attr}_fail");
        doc.remove_attr(node, attr);
        if let Err(e) = doc.set_attr(node, format!("{attr}_fail"), text) {
            error!(%e, "could not mark failed attribute");
        }
    }
}

/// Parsed instructions per node, shared between all clones of a template
#[derive(Debug, Default)]
pub struct InstructionCache {
    map: FxHashMap<NodeId, Rc<[Instruction]>>,
}

impl InstructionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: NodeId) -> Option<Rc<[Instruction]>> {
        self.map.get(&node).cloned()
    }

    pub fn insert(&mut self, node: NodeId, instructions: Vec<Instruction>) -> Rc<[Instruction]> {
        let shared: Rc<[Instruction]> = instructions.into();
        self.map.insert(node, shared.clone());
        shared
    }

    /// Parse on first use, then serve from the cache
    pub fn get_or_parse(&mut self, doc: &mut Document, node: NodeId, reader: &InstructionReader<'_>) -> Rc<[Instruction]> {
        if let Some(found) = self.map.get(&node) {
            return found.clone();
        }
        let parsed = reader.read(doc, node);
        self.insert(node, parsed)
    }

    pub fn forget(&mut self, node: NodeId) -> bool {
        self.map.remove(&node).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tessel_dom::el;

    fn read(doc: &mut Document, node: NodeId) -> Vec<Instruction> {
        let registry = ActionRegistry::with_builtins();
        InstructionReader::new("rv-repeat", &registry).read(doc, node)
    }

    #[test]
    fn test_json_attribute() {
        let mut doc = Document::new();
        let node = doc.build(el("a").attr(
            "rv-repeat",
            r#"[{"fn":"attr","key":"${href}","args":"href"},{"fn":"Text","pattern":"$","test":">=3"}]"#,
        ));
        let found = read(&mut doc, node);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].action, "attr");
        assert_eq!(found[0].pattern.as_str(), "${href}");
        assert_eq!(found[0].args, vec![json!("href")]);
        assert_eq!(found[1].action, "text");
        assert_eq!(
            found[1].test,
            Some(Test {
                op: CompareOp::Ge,
                operand: json!(3),
                operand2: None
            })
        );
    }

    #[test]
    fn test_sub_attributes_and_global_key() {
        let mut doc = Document::new();
        let node = doc.build(
            el("li")
                .attr("rv-repeat-text", "${name}")
                .attr("rv-repeat-class", r#"["meta","kind"]"#),
        );
        let found = read(&mut doc, node);
        assert_eq!(found[0].pattern.as_str(), "${name}");
        assert_eq!(found[1].pattern.as_str(), "${meta.kind}");

        let keyed = doc.build(
            el("li")
                .attr("rv-repeat_key", "${price}")
                .attr("rv-repeat-classif", r#"["cheap"]"#),
        );
        let found = read(&mut doc, keyed);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pattern.as_str(), "${price}");
        assert_eq!(found[0].args, vec![json!("cheap")]);
    }

    #[test]
    fn test_unknown_action_is_marked_failed() {
        let mut doc = Document::new();
        let node = doc.build(
            el("li")
                .attr("rv-repeat-sparkle", "$")
                .attr("rv-repeat-text", "$"),
        );
        let found = read(&mut doc, node);

        assert_eq!(found.len(), 1);
        assert!(!doc.has_attr(node, "rv-repeat-sparkle"));
        assert_eq!(doc.attr(node, "rv-repeat-sparkle_fail"), Some("$"));

        // A second read skips the failed attribute
        assert_eq!(read(&mut doc, node).len(), 1);
    }

    #[test]
    fn test_bad_json_fails_whole_attribute() {
        let mut doc = Document::new();
        let node = doc.build(el("li").attr("rv-repeat", r#"{"fn":"text","#));
        assert!(read(&mut doc, node).is_empty());
        assert!(doc.has_attr(node, "rv-repeat_fail"));
    }

    #[test]
    fn test_missing_pattern() {
        let registry = ActionRegistry::with_builtins();
        let reader = InstructionReader::new("rv-repeat", &registry);
        let obj = json!({"fn": "text"});
        assert_eq!(
            reader.from_object(obj.as_object().unwrap(), None, None),
            Err(InstructionError::MissingPattern("text".to_string()))
        );
    }

    #[test]
    fn test_test_forms() {
        assert_eq!(Test::parse(&json!("open")).unwrap().op, CompareOp::StrictEq);
        let between = Test::parse(&json!([1, "between", 5])).unwrap();
        assert_eq!(between.op, CompareOp::Between);
        assert_eq!(between.operand, json!(1));
        assert_eq!(between.operand2, Some(json!(5)));
        assert!(between.check(&json!(3)));
        assert!(Test::parse(&json!([1, 2])).is_err());
        assert!(Test::parse(&json!(["between", 1])).is_err());
    }

    #[test]
    fn test_cache_parses_once() {
        let registry = ActionRegistry::with_builtins();
        let reader = InstructionReader::new("rv-repeat", &registry);
        let mut doc = Document::new();
        let node = doc.build(el("li").attr("rv-repeat-text", "$"));
        let mut cache = InstructionCache::new();

        let first = cache.get_or_parse(&mut doc, node, &reader);
        doc.set_attr(node, "rv-repeat-text", "${other}").unwrap();
        let second = cache.get_or_parse(&mut doc, node, &reader);
        assert!(Rc::ptr_eq(&first, &second));

        assert!(cache.forget(node));
        let third = cache.get_or_parse(&mut doc, node, &reader);
        assert_eq!(third[0].pattern.as_str(), "${other}");
    }
}
