//! The arena-backed document tree

use serde_json::Value;
use slotmap::SlotMap;
use tracing::trace;

use crate::error::DomError;
use crate::node::{DomStats, Element, NodeData, NodeId, NodeKind};

/// A headless document: a forest of nodes stored in a slot map.
///
/// Nodes are created detached and live until [`free`](Document::free)d.
/// Structural operations keep `parent` and `children` links consistent in
/// both directions.
pub struct Document {
    nodes: SlotMap<NodeId, NodeData>,
    stats: DomStats,
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            stats: DomStats::default(),
        }
    }

    // ---------------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------------

    fn create(&mut self, kind: NodeKind) -> NodeId {
        self.stats.created += 1;
        self.nodes.insert(NodeData::new(kind))
    }

    pub fn create_element(&mut self, tag: impl Into<String>) -> NodeId {
        self.create(NodeKind::Element(Element::new(tag)))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.create(NodeKind::Text(text.into()))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.create(NodeKind::Fragment)
    }

    // ---------------------------------------------------------------------
    // Access
    // ---------------------------------------------------------------------

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.nodes.get(id)?.as_element()
    }

    pub(crate) fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        self.nodes.get_mut(id)?.as_element_mut()
    }

    fn element_mut_or_err(&mut self, id: NodeId) -> Result<&mut Element, DomError> {
        let node = self.nodes.get_mut(id).ok_or(DomError::NodeNotFound(id))?;
        node.as_element_mut().ok_or(DomError::NotAnElement(id))
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.tag.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn child_at(&self, parent: NodeId, index: usize) -> Option<NodeId> {
        self.children(parent).get(index).copied()
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&c| c == id)
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> DomStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = DomStats::default();
    }

    // ---------------------------------------------------------------------
    // Structure
    // ---------------------------------------------------------------------

    /// Whether `ancestor` is `node` or one of its ancestors
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Number of ancestors above `id`
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(p) = current {
            depth += 1;
            current = self.parent(p);
        }
        depth
    }

    fn ensure(&self, id: NodeId) -> Result<(), DomError> {
        if self.nodes.contains_key(id) {
            Ok(())
        } else {
            Err(DomError::NodeNotFound(id))
        }
    }

    /// Unlink `id` from its parent, if any
    fn unlink(&mut self, id: NodeId) {
        let Some(parent) = self.nodes.get(id).and_then(|n| n.parent) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.retain(|&c| c != id);
        }
        if let Some(n) = self.nodes.get_mut(id) {
            n.parent = None;
        }
    }

    /// Link an already detached node as the last child, without counting it
    pub(crate) fn adopt(&mut self, parent: NodeId, child: NodeId) {
        if let Some(n) = self.nodes.get_mut(child) {
            n.parent = Some(parent);
        }
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(child);
        }
    }

    /// Splice `child` (or a fragment's children) into `parent` at `index`
    fn splice(&mut self, parent: NodeId, child: NodeId, index: usize) -> Result<(), DomError> {
        self.ensure(parent)?;
        self.ensure(child)?;
        if self.is_ancestor_or_self(child, parent) {
            return Err(DomError::HierarchyCycle { parent, child });
        }

        let mut index = index;
        let moving: Vec<NodeId> = if self.nodes[child].is_fragment() {
            std::mem::take(&mut self.nodes[child].children)
        } else {
            // Moving within the same parent shifts later positions down
            if self.nodes[child].parent == Some(parent) {
                if let Some(pos) = self.index_in_parent(child) {
                    if pos < index {
                        index -= 1;
                    }
                }
            }
            self.unlink(child);
            vec![child]
        };

        let len = self.nodes[parent].children.len();
        let index = index.min(len);
        for &id in &moving {
            self.nodes[id].parent = Some(parent);
        }
        self.nodes[parent].children.splice(index..index, moving);
        if !self.nodes[parent].is_fragment() {
            self.stats.inserts += 1;
        }
        Ok(())
    }

    /// Append `child` as the last child of `parent`.
    ///
    /// Appending a fragment moves its children and leaves it empty.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let len = self.children(parent).len();
        self.splice(parent, child, len)
    }

    /// Insert `child` before `reference`, or append when `reference` is `None`
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        match reference {
            None => self.append_child(parent, child),
            Some(r) => {
                let index = self
                    .children(parent)
                    .iter()
                    .position(|&c| c == r)
                    .ok_or(DomError::NotAChild { parent, child: r })?;
                self.splice(parent, child, index)
            }
        }
    }

    /// Insert `child` at position `index` among `parent`'s children
    pub fn insert_at(&mut self, parent: NodeId, child: NodeId, index: usize) -> Result<(), DomError> {
        let len = self.children(parent).len();
        if index > len {
            return Err(DomError::IndexOutOfRange { index, len });
        }
        self.splice(parent, child, index)
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.ensure(parent)?;
        if self.parent(child) != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        self.unlink(child);
        self.stats.removes += 1;
        Ok(())
    }

    /// Remove `id` from its parent, if it has one
    pub fn detach(&mut self, id: NodeId) {
        if self.parent(id).is_some() {
            self.unlink(id);
            self.stats.removes += 1;
        }
    }

    /// Put `new` where `old` is and detach `old`
    pub fn replace_child(&mut self, parent: NodeId, new: NodeId, old: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, new, Some(old))?;
        self.remove_child(parent, old)
    }

    /// Move the child at `from` so it ends up at index `to`
    pub fn move_child(&mut self, parent: NodeId, from: usize, to: usize) -> Result<(), DomError> {
        let node = self.nodes.get_mut(parent).ok_or(DomError::NodeNotFound(parent))?;
        let len = node.children.len();
        if from >= len {
            return Err(DomError::IndexOutOfRange { index: from, len });
        }
        if to >= len {
            return Err(DomError::IndexOutOfRange { index: to, len });
        }
        let child = node.children.remove(from);
        node.children.insert(to, child);
        self.stats.moves += 1;
        Ok(())
    }

    /// Move every child of `parent` into a new fragment
    pub fn take_children(&mut self, parent: NodeId) -> Result<NodeId, DomError> {
        self.ensure(parent)?;
        let fragment = self.create_fragment();
        let children = std::mem::take(&mut self.nodes[parent].children);
        for &c in &children {
            self.nodes[c].parent = Some(fragment);
        }
        self.nodes[fragment].children = children;
        self.stats.removes += 1;
        Ok(fragment)
    }

    /// Deep-copy a subtree. Returns the new root and an `(original, clone)`
    /// pair for every copied node in preorder.
    ///
    /// Element properties are runtime state and are not copied.
    pub fn clone_subtree(&mut self, id: NodeId) -> Result<(NodeId, Vec<(NodeId, NodeId)>), DomError> {
        self.ensure(id)?;
        let mut pairs = Vec::new();
        let root = self.clone_rec(id, &mut pairs);
        Ok((root, pairs))
    }

    fn clone_rec(&mut self, id: NodeId, pairs: &mut Vec<(NodeId, NodeId)>) -> NodeId {
        let kind = match &self.nodes[id].kind {
            NodeKind::Element(el) => NodeKind::Element(Element {
                tag: el.tag.clone(),
                attrs: el.attrs.clone(),
                props: Default::default(),
                hidden: el.hidden,
            }),
            other => other.clone(),
        };
        let copy = self.create(kind);
        pairs.push((id, copy));

        let children = self.nodes[id].children.clone();
        for child in children {
            let child_copy = self.clone_rec(child, pairs);
            self.adopt(copy, child_copy);
        }
        copy
    }

    /// Detach and destroy a subtree. Returns the freed ids, root first.
    pub fn free(&mut self, id: NodeId) -> Vec<NodeId> {
        if !self.nodes.contains_key(id) {
            return Vec::new();
        }
        self.unlink(id);
        let mut freed = vec![id];
        freed.extend(self.descendants(id));
        for &n in &freed {
            self.nodes.remove(n);
        }
        self.stats.freed += freed.len();
        trace!(root = ?id, count = freed.len(), "dom: freed subtree");
        freed
    }

    // ---------------------------------------------------------------------
    // Attributes, classes, text, properties
    // ---------------------------------------------------------------------

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attrs.get(name).map(|s| s.as_str())
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.element(id).is_some_and(|el| el.attrs.contains_key(name))
    }

    pub fn set_attr(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), DomError> {
        self.element_mut_or_err(id)?
            .attrs
            .insert(name.into(), value.into());
        Ok(())
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        self.element_mut(id)?.attrs.shift_remove(name)
    }

    /// Attribute names and values in insertion order
    pub fn attrs(&self, id: NodeId) -> impl Iterator<Item = (&str, &str)> {
        self.element(id)
            .into_iter()
            .flat_map(|el| el.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Add one or more space separated classes
    pub fn add_class(&mut self, id: NodeId, names: &str) -> Result<(), DomError> {
        let el = self.element_mut_or_err(id)?;
        let mut classes: Vec<String> = el.classes().map(str::to_string).collect();
        for name in names.split_whitespace() {
            if !classes.iter().any(|c| c == name) {
                classes.push(name.to_string());
            }
        }
        el.attrs.insert("class".to_string(), classes.join(" "));
        Ok(())
    }

    /// Remove one or more space separated classes
    pub fn remove_class(&mut self, id: NodeId, names: &str) -> Result<(), DomError> {
        let el = self.element_mut_or_err(id)?;
        let remove: Vec<&str> = names.split_whitespace().collect();
        let kept: Vec<String> = el
            .classes()
            .filter(|c| !remove.contains(c))
            .map(str::to_string)
            .collect();
        if kept.is_empty() {
            el.attrs.shift_remove("class");
        } else {
            el.attrs.insert("class".to_string(), kept.join(" "));
        }
        Ok(())
    }

    pub fn has_class(&self, id: NodeId, name: &str) -> bool {
        self.element(id).is_some_and(|el| el.has_class(name))
    }

    /// Set the text of a node.
    ///
    /// Text nodes are updated in place. Elements get their first text child
    /// rewritten, or a new one appended when they have none.
    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) -> Result<(), DomError> {
        let text = text.into();
        let node = self.nodes.get_mut(id).ok_or(DomError::NodeNotFound(id))?;
        match &mut node.kind {
            NodeKind::Text(t) => {
                *t = text;
                return Ok(());
            }
            NodeKind::Fragment => return Err(DomError::NotAnElement(id)),
            NodeKind::Element(_) => {}
        }

        let existing = self.nodes[id]
            .children
            .iter()
            .copied()
            .find(|&c| matches!(self.nodes[c].kind, NodeKind::Text(_)));
        match existing {
            Some(child) => {
                if let NodeKind::Text(t) = &mut self.nodes[child].kind {
                    *t = text;
                }
            }
            None => {
                let child = self.create_text(text);
                self.adopt(id, child);
            }
        }
        Ok(())
    }

    /// Concatenated text of the node and its descendants
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if let NodeKind::Text(t) = &node.kind {
            out.push_str(t);
        }
        for &child in &node.children {
            self.collect_text(child, out);
        }
    }

    pub fn set_prop(&mut self, id: NodeId, name: impl Into<String>, value: Value) -> Result<(), DomError> {
        self.element_mut_or_err(id)?.props.insert(name.into(), value);
        Ok(())
    }

    pub fn prop(&self, id: NodeId, name: &str) -> Option<&Value> {
        self.element(id)?.props.get(name)
    }

    pub fn set_hidden(&mut self, id: NodeId, hidden: bool) -> Result<(), DomError> {
        self.element_mut_or_err(id)?.hidden = hidden;
        Ok(())
    }

    pub fn is_hidden(&self, id: NodeId) -> bool {
        self.element(id).is_some_and(|el| el.hidden)
    }

    // ---------------------------------------------------------------------
    // Traversal
    // ---------------------------------------------------------------------

    /// All descendants of `root` in preorder, excluding `root`
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Descendant elements of `root` carrying attribute `name`, in preorder
    pub fn query_attr(&self, root: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|&id| self.has_attr(id, name))
            .collect()
    }

    /// Sort nodes so deeper nodes come first
    pub fn sort_deepest_first(&self, ids: &mut [NodeId]) {
        ids.sort_by_key(|&id| std::cmp::Reverse(self.depth(id)));
    }

    // ---------------------------------------------------------------------
    // Debug output
    // ---------------------------------------------------------------------

    /// Render a subtree as HTML-like markup. Hidden elements carry a bare
    /// `hidden` attribute.
    pub fn to_markup(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_markup(id, &mut out);
        out
    }

    fn write_markup(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(t) => out.push_str(&escape(t)),
            NodeKind::Fragment => {
                for &child in &node.children {
                    self.write_markup(child, out);
                }
            }
            NodeKind::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in &el.attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape(value).replace('"', "&quot;"));
                    out.push('"');
                }
                if el.hidden {
                    out.push_str(" hidden");
                }
                out.push('>');
                for &child in &node.children {
                    self.write_markup(child, out);
                }
                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
