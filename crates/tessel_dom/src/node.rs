//! Node storage types

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde_json::Value;
use slotmap::new_key_type;

new_key_type! {
    /// Handle to a node in a [`Document`](crate::Document)
    pub struct NodeId;
}

/// An element node: tag, ordered attributes, properties and visibility.
///
/// Classes live in the `class` attribute as a space separated list.
/// Properties are runtime-only state that is not part of the markup and is
/// not copied by clones.
#[derive(Clone, Debug, Default)]
pub struct Element {
    pub tag: String,
    pub attrs: IndexMap<String, String>,
    pub props: FxHashMap<String, Value>,
    pub hidden: bool,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attrs
            .get("class")
            .map(|s| s.as_str())
            .unwrap_or("")
            .split_whitespace()
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes().any(|c| c == name)
    }
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Element(Element),
    Text(String),
    /// A detached container; inserting it moves its children instead
    Fragment,
}

#[derive(Clone, Debug)]
pub struct NodeData {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl NodeData {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match &self.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub(crate) fn as_element_mut(&mut self) -> Option<&mut Element> {
        match &mut self.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self.kind, NodeKind::Fragment)
    }
}

/// Operation counters, reset with [`Document::reset_stats`](crate::Document::reset_stats).
///
/// Each structural call counts once, so appending a fragment of fifty
/// children is one insert. Insertions into fragments are not counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DomStats {
    pub inserts: usize,
    pub removes: usize,
    pub moves: usize,
    pub created: usize,
    pub freed: usize,
}
