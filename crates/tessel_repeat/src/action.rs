//! Action dispatch
//!
//! An instruction names an action; the registry maps that name to one or
//! more handlers, called in registration order with the same
//! [`ActionContext`]. Built-in actions are a closed [`ActionKind`] set;
//! applications add their own with [`ActionRegistry::register`].

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use smallvec::{smallvec, SmallVec};
use tessel_core::{display_string, is_empty};
use tessel_dom::{Document, DomError, NodeId};
use thiserror::Error;
use tracing::{debug, trace};

use crate::instruction::Instruction;
use crate::pattern::{Evaluators, PatternEnv};

/// What the node's remaining instructions should do after this one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Skip the rest of this node's instructions. Not a failure.
    StopRemaining,
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no handler registered for action `{0}`")]
    UnknownAction(String),

    #[error("action `{action}`: {reason}")]
    InvalidArgs { action: String, reason: String },

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error("{0}")]
    Custom(String),
}

/// Built-in actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Hide when the test (or value) is truthy
    Hide,
    /// Show when the test (or value) is truthy
    Show,
    OnPrimitive,
    OnComplex,
    /// Show when the value is an object with the property in `args[0]`
    Has,
    HasNot,
    Id,
    /// Swap the old class for the new one
    Class,
    /// Toggle the class in `args[0]`
    ClassIf,
    Prop,
    PropIf,
    Attr,
    Value,
    Text,
    /// Text, then hide when empty
    ShowText,
    NoAction,
}

impl ActionKind {
    pub const ALL: [ActionKind; 16] = [
        ActionKind::Hide,
        ActionKind::Show,
        ActionKind::OnPrimitive,
        ActionKind::OnComplex,
        ActionKind::Has,
        ActionKind::HasNot,
        ActionKind::Id,
        ActionKind::Class,
        ActionKind::ClassIf,
        ActionKind::Prop,
        ActionKind::PropIf,
        ActionKind::Attr,
        ActionKind::Value,
        ActionKind::Text,
        ActionKind::ShowText,
        ActionKind::NoAction,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Hide => "hide",
            ActionKind::Show => "show",
            ActionKind::OnPrimitive => "onprimitive",
            ActionKind::OnComplex => "oncomplex",
            ActionKind::Has => "has",
            ActionKind::HasNot => "hasnot",
            ActionKind::Id => "id",
            ActionKind::Class => "class",
            ActionKind::ClassIf => "classif",
            ActionKind::Prop => "prop",
            ActionKind::PropIf => "propif",
            ActionKind::Attr => "attr",
            ActionKind::Value => "value",
            ActionKind::Text => "text",
            ActionKind::ShowText => "showtext",
            ActionKind::NoAction => "noaction",
        }
    }

    fn run(self, cx: &mut ActionContext<'_>) -> Result<Flow, ActionError> {
        match self {
            ActionKind::Hide => {
                let show = !cx.test_or_value();
                cx.display(show)
            }
            ActionKind::Show => {
                let show = cx.test_or_value();
                cx.display(show)
            }
            ActionKind::OnPrimitive => {
                let show = !is_complex(&cx.value);
                cx.display(show)
            }
            ActionKind::OnComplex => {
                let show = is_complex(&cx.value);
                cx.display(show)
            }
            ActionKind::Has | ActionKind::HasNot => {
                let prop = cx.arg_str(0)?;
                let has = cx.value.as_object().is_some_and(|obj| obj.contains_key(prop));
                cx.display(has == (self == ActionKind::Has))
            }
            ActionKind::Id => {
                let passes = cx.test.unwrap_or(true);
                match cx.value.as_str().filter(|s| !s.is_empty() && passes) {
                    Some(id) => {
                        let id = id.to_string();
                        cx.doc.set_attr(cx.node, "id", id)?;
                    }
                    None => {
                        cx.doc.remove_attr(cx.node, "id");
                    }
                }
                Ok(Flow::Continue)
            }
            ActionKind::Class => {
                if let Some(old) = cx.old.as_ref().and_then(class_name) {
                    cx.doc.remove_class(cx.node, &old)?;
                }
                match class_name(&cx.value) {
                    Some(new) => cx.doc.add_class(cx.node, &new)?,
                    None => trace!(node = ?cx.node, "no class to add"),
                }
                Ok(Flow::Continue)
            }
            ActionKind::ClassIf => {
                let class = cx.arg_str(0)?.to_string();
                if cx.test_or_value() {
                    cx.doc.add_class(cx.node, &class)?;
                } else {
                    cx.doc.remove_class(cx.node, &class)?;
                }
                Ok(Flow::Continue)
            }
            ActionKind::Prop => {
                let prop = cx.arg_str(0)?.to_string();
                cx.doc.set_prop(cx.node, prop, cx.value.clone())?;
                Ok(Flow::Continue)
            }
            ActionKind::PropIf => {
                let prop = cx.arg_str(0)?.to_string();
                let value = if cx.test_or_value() {
                    cx.args.get(1).cloned().unwrap_or_else(|| cx.value.clone())
                } else {
                    cx.args.get(2).cloned().unwrap_or(Value::Null)
                };
                cx.doc.set_prop(cx.node, prop, value)?;
                Ok(Flow::Continue)
            }
            ActionKind::Attr => {
                let name = cx.arg_str(0)?.to_string();
                if cx.test_or_value() {
                    let value = cx.args.get(1).unwrap_or(&cx.value);
                    let value = display_string(value);
                    cx.doc.set_attr(cx.node, name, value)?;
                } else {
                    cx.doc.remove_attr(cx.node, &name);
                }
                Ok(Flow::Continue)
            }
            ActionKind::Value => {
                let prop = if cx.value.is_boolean() { "checked" } else { "value" };
                cx.doc.set_prop(cx.node, prop, cx.value.clone())?;
                Ok(Flow::Continue)
            }
            ActionKind::Text => {
                cx.write_text()?;
                Ok(Flow::Continue)
            }
            ActionKind::ShowText => {
                cx.write_text()?;
                let show = cx.test_or_value();
                cx.display(show)
            }
            ActionKind::NoAction => Ok(Flow::Continue),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn is_complex(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn class_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(_) => Some(display_string(value)),
        _ => None,
    }
}

/// Everything a handler can see and touch
pub struct ActionContext<'a> {
    pub doc: &'a mut Document,
    pub node: NodeId,
    pub action: &'a str,
    /// Position of the item
    pub index: usize,
    /// The raw item value, before projection
    pub item: &'a Value,
    /// The item projected through the instruction's pattern
    pub value: Value,
    /// The previous item projected through the same pattern, on changes
    pub old: Option<Value>,
    pub args: &'a [Value],
    /// Outcome of the instruction's test, if it has one
    pub test: Option<bool>,
    pub break_on_hide: bool,
}

impl ActionContext<'_> {
    /// The test outcome, or whether the value is non-empty when there's no test
    pub fn test_or_value(&self) -> bool {
        self.test.unwrap_or_else(|| !is_empty(&self.value))
    }

    pub fn arg_str(&self, i: usize) -> Result<&str, ActionError> {
        self.args
            .get(i)
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::InvalidArgs {
                action: self.action.to_string(),
                reason: format!("expected a string at args[{i}]"),
            })
    }

    /// Show or hide the node. Hiding may stop the node's remaining
    /// instructions.
    pub fn display(&mut self, show: bool) -> Result<Flow, ActionError> {
        self.doc.set_hidden(self.node, !show)?;
        if !show && self.break_on_hide {
            trace!(node = ?self.node, "hidden, skipping remaining instructions");
            return Ok(Flow::StopRemaining);
        }
        Ok(Flow::Continue)
    }

    fn write_text(&mut self) -> Result<(), ActionError> {
        let text = if is_complex(&self.value) {
            String::new()
        } else {
            display_string(&self.value)
        };
        let text = match self.args.first().and_then(Value::as_str) {
            Some(format) if format.contains("{}") => format.replacen("{}", &text, 1),
            _ => text,
        };
        self.doc.set_text(self.node, text)?;
        Ok(())
    }
}

pub type ActionFn = Rc<dyn Fn(&mut ActionContext<'_>) -> Result<Flow, ActionError>>;

#[derive(Clone)]
enum Handler {
    Builtin(ActionKind),
    Custom(ActionFn),
}

/// The item an instruction is executed for
#[derive(Clone, Copy)]
pub struct ActionInput<'a> {
    pub index: usize,
    pub value: &'a Value,
    pub old: Option<&'a Value>,
    /// Slot `old` was last rendered at, when it differs from `index`
    pub old_index: Option<usize>,
    pub evaluators: Option<&'a Evaluators>,
    pub empty_pattern_ok: bool,
    pub break_on_hide: bool,
}

/// Action name to handler chain
#[derive(Clone)]
pub struct ActionRegistry {
    handlers: FxHashMap<String, SmallVec<[Handler; 2]>>,
}

impl ActionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in ActionKind::ALL {
            registry
                .handlers
                .insert(kind.name().to_string(), smallvec![Handler::Builtin(kind)]);
        }
        registry
    }

    /// Add a handler. Handlers registered under an existing name run after
    /// the ones already there.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&mut ActionContext<'_>) -> Result<Flow, ActionError> + 'static,
    {
        let name = name.to_lowercase();
        debug!(action = %name, "registering action handler");
        self.handlers
            .entry(name)
            .or_default()
            .push(Handler::Custom(Rc::new(handler)));
    }

    /// Make `alias` run the same chain as `target`
    pub fn alias(&mut self, alias: &str, target: &str) -> Result<(), ActionError> {
        let chain = self
            .handlers
            .get(&target.to_lowercase())
            .cloned()
            .ok_or_else(|| ActionError::UnknownAction(target.to_string()))?;
        self.handlers.insert(alias.to_lowercase(), chain);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Project the item through the instruction and run the handler chain
    /// on `node`
    pub fn execute(
        &self,
        doc: &mut Document,
        node: NodeId,
        inst: &Instruction,
        input: ActionInput<'_>,
    ) -> Result<Flow, ActionError> {
        let chain = self
            .handlers
            .get(&inst.action)
            .ok_or_else(|| ActionError::UnknownAction(inst.action.clone()))?;

        let env = PatternEnv {
            evaluators: input.evaluators,
            empty_ok: input.empty_pattern_ok,
            node: Some(node),
        };
        let value = inst.pattern.apply(input.index, input.value, &env).into_owned();
        let old = input.old.map(|old| {
            inst.pattern
                .apply(input.old_index.unwrap_or(input.index), old, &env.empty_ok(true))
                .into_owned()
        });
        let test = inst.test.as_ref().map(|t| t.check(&value));

        trace!(action = %inst.action, node = ?node, index = input.index, %value, "executing action");

        let mut cx = ActionContext {
            doc,
            node,
            action: &inst.action,
            index: input.index,
            item: input.value,
            value,
            old,
            args: &inst.args,
            test,
            break_on_hide: input.break_on_hide,
        };

        for handler in chain {
            let flow = match handler {
                Handler::Builtin(kind) => kind.run(&mut cx)?,
                Handler::Custom(f) => f(&mut cx)?,
            };
            if flow == Flow::StopRemaining {
                return Ok(Flow::StopRemaining);
            }
        }
        Ok(Flow::Continue)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ActionRegistry").field("actions", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Test;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::Cell;
    use tessel_core::CompareOp;
    use tessel_dom::el;

    fn input(value: &Value) -> ActionInput<'_> {
        ActionInput {
            index: 0,
            value,
            old: None,
            old_index: None,
            evaluators: None,
            empty_pattern_ok: true,
            break_on_hide: true,
        }
    }

    fn run(doc: &mut Document, node: NodeId, inst: &Instruction, value: &Value) -> Flow {
        ActionRegistry::with_builtins()
            .execute(doc, node, inst, input(value))
            .unwrap()
    }

    #[test]
    fn test_text_and_format() {
        let mut doc = Document::new();
        let li = doc.build(el("li"));
        let inst = Instruction::new("text", "${name}").unwrap();
        run(&mut doc, li, &inst, &json!({"name": "Ada"}));
        assert_eq!(doc.text_content(li), "Ada");

        let fmt = Instruction::new("text", "$").unwrap().with_args(vec![json!("Total: {}")]);
        run(&mut doc, li, &fmt, &json!(12));
        assert_eq!(doc.text_content(li), "Total: 12");
    }

    #[test]
    fn test_hide_stops_remaining() {
        let mut doc = Document::new();
        let li = doc.build(el("li"));
        let inst = Instruction::new("show", "${visible}").unwrap();

        assert_eq!(run(&mut doc, li, &inst, &json!({"visible": false})), Flow::StopRemaining);
        assert!(doc.is_hidden(li));
        assert_eq!(run(&mut doc, li, &inst, &json!({"visible": true})), Flow::Continue);
        assert!(!doc.is_hidden(li));
    }

    #[test]
    fn test_class_follows_value() {
        let mut doc = Document::new();
        let li = doc.build(el("li").class("row"));
        let registry = ActionRegistry::with_builtins();
        let inst = Instruction::new("class", "${state}").unwrap();

        let first = json!({"state": "open"});
        registry.execute(&mut doc, li, &inst, input(&first)).unwrap();
        let second = json!({"state": "closed"});
        let mut changed = input(&second);
        changed.old = Some(&first);
        registry.execute(&mut doc, li, &inst, changed).unwrap();

        assert_eq!(doc.attr(li, "class"), Some("row closed"));
    }

    #[test]
    fn test_class_from_index_drops_previous_slot() {
        let mut doc = Document::new();
        let li = doc.build(el("li").class("row"));
        let registry = ActionRegistry::with_builtins();
        let inst = Instruction::new("class", "slot-#").unwrap();
        let item = json!("a");

        let mut first = input(&item);
        first.index = 2;
        registry.execute(&mut doc, li, &inst, first).unwrap();
        assert_eq!(doc.attr(li, "class"), Some("row slot-2"));

        let mut moved = input(&item);
        moved.index = 1;
        moved.old = Some(&item);
        moved.old_index = Some(2);
        registry.execute(&mut doc, li, &inst, moved).unwrap();

        assert_eq!(doc.attr(li, "class"), Some("row slot-1"));
    }

    #[test]
    fn test_classif_with_test() {
        let mut doc = Document::new();
        let li = doc.build(el("li"));
        let inst = Instruction::new("classif", "${price}")
            .unwrap()
            .with_args(vec![json!("cheap")])
            .with_test(Test {
                op: CompareOp::Lt,
                operand: json!(10),
                operand2: None,
            });

        run(&mut doc, li, &inst, &json!({"price": 5}));
        assert!(doc.has_class(li, "cheap"));
        run(&mut doc, li, &inst, &json!({"price": 50}));
        assert!(!doc.has_class(li, "cheap"));
    }

    #[test]
    fn test_attr_prop_and_id() {
        let mut doc = Document::new();
        let a = doc.build(el("a"));
        let value = json!({"href": "/x", "id": "link-1", "on": true});

        let attr = Instruction::new("attr", "${href}").unwrap().with_args(vec![json!("href")]);
        run(&mut doc, a, &attr, &value);
        assert_eq!(doc.attr(a, "href"), Some("/x"));

        let prop = Instruction::new("propif", "${on}").unwrap().with_args(vec![json!("checked")]);
        run(&mut doc, a, &prop, &value);
        assert_eq!(doc.prop(a, "checked"), Some(&json!(true)));

        let id = Instruction::new("id", "${id}").unwrap();
        run(&mut doc, a, &id, &value);
        assert_eq!(doc.attr(a, "id"), Some("link-1"));
        run(&mut doc, a, &id, &json!({}));
        assert_eq!(doc.attr(a, "id"), None);
    }

    #[test]
    fn test_missing_args_is_an_error() {
        let mut doc = Document::new();
        let li = doc.build(el("li"));
        let inst = Instruction::new("classif", "$").unwrap();
        let err = ActionRegistry::with_builtins()
            .execute(&mut doc, li, &inst, input(&json!(1)))
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidArgs { .. }));
    }

    #[test]
    fn test_custom_handlers_chain_in_order() {
        let mut doc = Document::new();
        let li = doc.build(el("li"));
        let calls = Rc::new(Cell::new(0));

        let mut registry = ActionRegistry::with_builtins();
        let seen = calls.clone();
        registry.register("stamp", move |cx| {
            seen.set(seen.get() + 1);
            cx.doc.set_attr(cx.node, "data-stamp", display_string(&cx.value))?;
            Ok(Flow::StopRemaining)
        });
        let seen = calls.clone();
        registry.register("stamp", move |_| {
            seen.set(seen.get() + 100);
            Ok(Flow::Continue)
        });

        let inst = Instruction::new("stamp", "#").unwrap();
        let flow = registry.execute(&mut doc, li, &inst, input(&json!("x"))).unwrap();

        assert_eq!(flow, Flow::StopRemaining);
        assert_eq!(calls.get(), 1);
        assert_eq!(doc.attr(li, "data-stamp"), Some("0"));
    }

    #[test]
    fn test_alias() {
        let mut registry = ActionRegistry::new();
        assert!(registry.alias("label", "text").is_err());
        let mut registry_with = ActionRegistry::with_builtins();
        registry_with.alias("label", "text").unwrap();
        assert!(registry_with.contains("label"));
        registry.register("x", |_| Ok(Flow::Continue));
        assert!(registry.contains("x"));
    }
}
