//! Template selection
//!
//! A repeater may have several templates. Each is guarded by a [`Rule`]
//! (`pattern operator literal`), or flagged as the default or as the
//! placeholder shown for an empty list. Rules are tried in declaration order
//! and the first match wins.

use std::fmt;

use serde_json::Value;
use tessel_core::{compare, string_to_primitive, CompareOp};
use tessel_dom::{Document, NodeId, NodeKind};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::pattern::{Evaluators, Pattern, PatternEnv, PatternError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TemplateError {
    #[error("no usable templates")]
    NoTemplates,

    #[error("no template rule matched item {index} and there is no default")]
    NoMatch { index: usize, value: Value },

    #[error("bad template rule `{rule}`: {reason}")]
    BadRule { rule: String, reason: String },

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// `pattern operator literal [literal2]`
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub pattern: Pattern,
    pub op: CompareOp,
    pub literal: Value,
    pub literal2: Option<Value>,
}

impl Rule {
    pub fn new(pattern: &str, op: CompareOp, literal: Value) -> Result<Self, TemplateError> {
        Ok(Self {
            pattern: Pattern::parse(pattern)?,
            op,
            literal,
            literal2: None,
        })
    }

    pub fn between(pattern: &str, low: Value, high: Value) -> Result<Self, TemplateError> {
        Ok(Self {
            pattern: Pattern::parse(pattern)?,
            op: CompareOp::Between,
            literal: low,
            literal2: Some(high),
        })
    }

    /// Parse a `_useif` attribute value.
    ///
    /// Accepts a JSON array of one (`[literal]`, shorthand for
    /// `["$", "==", literal]`), three or four items. Anything that is not a
    /// JSON array is treated as a bare literal.
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let bad = |reason: &str| TemplateError::BadRule {
            rule: text.to_string(),
            reason: reason.to_string(),
        };

        let items = match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items,
            Ok(literal) => return Self::new("$", CompareOp::Eq, literal),
            Err(_) => return Self::new("$", CompareOp::Eq, string_to_primitive(text.trim())),
        };

        match items.as_slice() {
            [literal] => Self::new("$", CompareOp::Eq, literal.clone()),
            [pattern, op, literal] | [pattern, op, literal, _] => {
                let pattern = match pattern {
                    Value::String(s) => Pattern::parse(s)?,
                    Value::Array(path) => {
                        let path: Vec<String> = path.iter().map(tessel_core::display_string).collect();
                        Pattern::from_key_path(&path)?
                    }
                    _ => return Err(bad("pattern must be a string or key path")),
                };
                let op = op
                    .as_str()
                    .ok_or_else(|| bad("operator must be a string"))?
                    .parse::<CompareOp>()
                    .map_err(|e| bad(&format!("{e}")))?;
                let literal2 = items.get(3).cloned();
                op.check_operands(literal2.as_ref())
                    .map_err(|e| bad(&format!("{e}")))?;
                Ok(Self {
                    pattern,
                    op,
                    literal: literal.clone(),
                    literal2,
                })
            }
            _ => Err(bad("expected 1, 3 or 4 items")),
        }
    }

    pub fn matches(&self, index: usize, value: &Value, evaluators: Option<&Evaluators>) -> bool {
        let env = PatternEnv {
            evaluators,
            empty_ok: true,
            node: None,
        };
        let resolved = self.pattern.apply(index, value, &env);
        compare(&resolved, self.op, &self.literal, self.literal2.as_ref())
    }

    pub fn is_index_dependent(&self) -> bool {
        self.pattern.is_index_dependent()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.pattern, self.op, self.literal)?;
        if let Some(hi) = &self.literal2 {
            write!(f, " {hi}")?;
        }
        Ok(())
    }
}

/// How a template takes part in selection
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TemplateDescriptor {
    pub rule: Option<Rule>,
    pub is_default: bool,
    pub is_empty_placeholder: bool,
}

impl TemplateDescriptor {
    pub fn rule(rule: Rule) -> Self {
        Self {
            rule: Some(rule),
            ..Default::default()
        }
    }

    pub fn default_template() -> Self {
        Self {
            is_default: true,
            ..Default::default()
        }
    }

    pub fn empty_placeholder() -> Self {
        Self {
            is_empty_placeholder: true,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct Template {
    pub root: NodeId,
    pub descriptor: TemplateDescriptor,
}

/// Which template an item node was cloned from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Choice {
    /// The only selectable template
    Only(usize),
    /// Matched by its rule
    Rule(usize),
    /// Fallback after no rule matched
    Default(usize),
    /// The item is an error placeholder
    Failed,
}

impl Choice {
    pub fn template(self) -> Option<usize> {
        match self {
            Choice::Only(i) | Choice::Rule(i) | Choice::Default(i) => Some(i),
            Choice::Failed => None,
        }
    }
}

/// The templates of one repeater, validated
#[derive(Clone, Debug)]
pub struct TemplateSet {
    templates: Vec<Template>,
    index_dependent: bool,
}

impl TemplateSet {
    /// Build from explicit templates. Fails if none are selectable.
    pub fn new(templates: Vec<Template>) -> Result<Self, TemplateError> {
        if !templates.iter().any(|t| !t.descriptor.is_empty_placeholder) {
            return Err(TemplateError::NoTemplates);
        }
        let index_dependent = templates
            .iter()
            .filter_map(|t| t.descriptor.rule.as_ref())
            .any(Rule::is_index_dependent);
        Ok(Self {
            templates,
            index_dependent,
        })
    }

    /// Read templates from the child elements of `fragment`.
    ///
    /// With more than one candidate, each must carry `<base>_useif`,
    /// `<base>_usedefault` or `<base>_showonempty`; candidates without a
    /// usable flag are discarded with a warning.
    pub fn from_fragment(doc: &Document, fragment: NodeId, base: &str) -> Result<Self, TemplateError> {
        let candidates: Vec<NodeId> = doc
            .children(fragment)
            .iter()
            .copied()
            .filter(|&id| matches!(doc.node(id).map(|n| &n.kind), Some(NodeKind::Element(_))))
            .collect();

        let useif = format!("{base}_useif");
        let usedefault = format!("{base}_usedefault");
        let showonempty = format!("{base}_showonempty");

        if let [only] = candidates.as_slice() {
            if doc.has_attr(*only, &useif) {
                debug!(template = ?only, "single template, ignoring its rule");
            }
            return Self::new(vec![Template {
                root: *only,
                descriptor: TemplateDescriptor::default(),
            }]);
        }

        let mut templates = Vec::with_capacity(candidates.len());
        for id in candidates {
            let descriptor = if doc.has_attr(id, &showonempty) {
                TemplateDescriptor::empty_placeholder()
            } else if doc.has_attr(id, &usedefault) {
                TemplateDescriptor::default_template()
            } else if let Some(text) = doc.attr(id, &useif) {
                match Rule::parse(text) {
                    Ok(rule) => TemplateDescriptor::rule(rule),
                    Err(err) => {
                        warn!(%err, template = ?id, "discarding template with bad rule");
                        continue;
                    }
                }
            } else {
                warn!(template = ?id, "discarding template without {useif}, {usedefault} or {showonempty}");
                continue;
            };
            templates.push(Template { root: id, descriptor });
        }

        if templates.iter().filter(|t| t.descriptor.is_default).count() > 1 {
            warn!("several default templates, only the first is used");
        }

        let set = Self::new(templates)?;
        debug!(count = set.templates.len(), index_dependent = set.index_dependent, "templates prepared");
        Ok(set)
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn get(&self, index: usize) -> Option<&Template> {
        self.templates.get(index)
    }

    /// Whether any rule reads the item index
    pub fn is_index_dependent(&self) -> bool {
        self.index_dependent
    }

    pub fn placeholder(&self) -> Option<&Template> {
        self.templates.iter().find(|t| t.descriptor.is_empty_placeholder)
    }

    fn selectable(&self) -> impl Iterator<Item = (usize, &Template)> {
        self.templates
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.descriptor.is_empty_placeholder)
    }

    /// Pick the template for an item
    pub fn choose(&self, index: usize, value: &Value, evaluators: Option<&Evaluators>) -> Result<Choice, TemplateError> {
        let mut selectable = self.selectable();
        if let (Some((i, only)), None) = (selectable.next(), selectable.next()) {
            if only.descriptor.rule.is_none() {
                return Ok(Choice::Only(i));
            }
        }

        let mut fallback = None;
        for (i, template) in self.selectable() {
            match &template.descriptor.rule {
                Some(rule) if rule.matches(index, value, evaluators) => return Ok(Choice::Rule(i)),
                Some(_) => {}
                None if template.descriptor.is_default && fallback.is_none() => fallback = Some(i),
                None => {}
            }
        }

        match fallback {
            Some(i) => Ok(Choice::Default(i)),
            None => Err(TemplateError::NoMatch {
                index,
                value: value.clone(),
            }),
        }
    }

    /// Whether a node cloned for `choice` can stay for the item's new state.
    ///
    /// The node must be replaced if its rule stopped matching, an earlier
    /// rule started matching, or (for a default) any rule now matches.
    pub fn keep(&self, choice: Choice, index: usize, value: &Value, evaluators: Option<&Evaluators>) -> bool {
        match choice {
            Choice::Failed => false,
            Choice::Only(_) => true,
            Choice::Rule(_) | Choice::Default(_) => match self.choose(index, value, evaluators) {
                Ok(now) => now == choice,
                Err(err) => {
                    error!(%err, "template check failed");
                    false
                }
            },
        }
    }
}
