//! Event handling and item lifecycle for [`RepeatRuntime`]

use serde_json::Value;
use smallvec::SmallVec;
use tessel_core::{display_string, DataSource, ListEvent};
use tessel_dom::{el, Document, NodeId};
use tracing::{debug, error, info, trace, warn};

use crate::action::{ActionInput, Flow};
use crate::error::{RepeatError, Result};
use crate::instruction::{Instruction, InstructionReader};
use crate::repeater::{
    BoundNode, EventOrigin, HideCache, IndexDependency, ItemEventKind, ItemState, Repeater,
    RepeaterBuilder,
};
use crate::runtime::{RepeatRuntime, RepeaterId, AUTOCLONE_ATTR, ITEM_ATTR, TARGET_ATTR};
use crate::template::{Choice, TemplateError, TemplateSet};

/// Class of the node shown for an item no template could render
pub const ERROR_CLASS: &str = "repeat-error";

/// Disjoint borrows of the state one repeater works on
pub(crate) struct Parts<'a> {
    pub doc: &'a mut Document,
    pub rep: &'a mut Repeater,
    pub data: &'a DataSource,
}

impl RepeatRuntime {
    pub(crate) fn parts(&mut self, id: RepeaterId) -> Result<Parts<'_>> {
        let rep = self
            .repeaters
            .get_mut(id)
            .ok_or(RepeatError::UnknownRepeater(id))?;
        let data = self
            .sources
            .get(rep.source)
            .ok_or(RepeatError::UnknownSource(rep.source))?;
        Ok(Parts {
            doc: &mut self.document,
            rep,
            data,
        })
    }

    // =========================================================================
    // Data events
    // =========================================================================

    pub(crate) fn handle(&mut self, id: RepeaterId, event: &ListEvent) -> Result<()> {
        trace!(repeater = ?id, kind = ?event.kind(), index = event.index(), "handling list event");
        match event {
            ListEvent::New { index, value } => self.on_new(id, *index, value)?,
            ListEvent::Change { index, value, old } => self.on_change(id, *index, value, Some(old))?,
            ListEvent::Update { index } => self.on_update(id, *index)?,
            ListEvent::Delete { index, .. } => self.on_delete(id, *index)?,
            ListEvent::Move { from, to } => self.on_move(id, *from, *to)?,
        }
        self.check_in_sync(id)
    }

    fn on_new(&mut self, id: RepeaterId, index: usize, value: &Value) -> Result<()> {
        let Parts { doc, rep, data } = self.parts(id)?;
        remove_placeholder(doc, rep);

        let count = doc.children(rep.target).len();
        if count >= data.len() {
            return Err(RepeatError::Desync(format!(
                "new item at {index} but the target already holds {count} items for {} values",
                data.len()
            )));
        }
        if index > count {
            return Err(RepeatError::Desync(format!(
                "new item at {index} past the {count} items in the target"
            )));
        }

        let node = build_item(doc, rep, index, value);
        if let Err(err) = doc.insert_at(rep.target, node, index) {
            rep.items.remove(&node);
            doc.free(node);
            return Err(err.into());
        }
        rep.record(ItemEventKind::New, index, node, EventOrigin::Data);
        let reindex = rep.index_dependency.is_set();
        self.clone_nested_repeaters(id);

        if reindex {
            for i in index + 1..=count {
                self.on_index_changed(id, i)?;
            }
        }
        Ok(())
    }

    fn on_change(&mut self, id: RepeaterId, index: usize, value: &Value, old: Option<&Value>) -> Result<()> {
        let Parts { doc, rep, .. } = self.parts(id)?;
        let Some((node, choice)) = item_at(doc, rep, index) else {
            error!(repeater = %rep.name, index, "no item node to change");
            return Ok(());
        };

        let keep = rep
            .templates
            .as_ref()
            .is_some_and(|set| set.keep(choice, index, value, Some(&*rep.evaluators)));
        if keep {
            apply_bindings(doc, rep, node, index, value, old, false);
            rep.record(ItemEventKind::Change, index, node, EventOrigin::Data);
            Ok(())
        } else {
            self.replace_item(id, node, index, value).map(|_| ())
        }
    }

    fn on_update(&mut self, id: RepeaterId, index: usize) -> Result<()> {
        let Parts { rep, data, .. } = self.parts(id)?;
        let Some(value) = data.get(index).cloned() else {
            error!(repeater = %rep.name, index, "no value to update");
            return Ok(());
        };
        self.on_change(id, index, &value, Some(&value))
    }

    fn on_delete(&mut self, id: RepeaterId, index: usize) -> Result<()> {
        let Parts { doc, rep, .. } = self.parts(id)?;
        let Some((node, _)) = item_at(doc, rep, index) else {
            return Err(RepeatError::Desync(format!("no item node to delete at {index}")));
        };
        rep.record(ItemEventKind::Delete, index, node, EventOrigin::Data);

        self.remove_item_node(id, node)?;

        let Parts { doc, rep, .. } = self.parts(id)?;
        let remaining = doc.children(rep.target).len();
        if remaining == 0 {
            show_placeholder(doc, rep);
        }
        if rep.index_dependency.is_set() {
            for i in index..remaining {
                self.on_index_changed(id, i)?;
            }
        }
        Ok(())
    }

    fn on_move(&mut self, id: RepeaterId, from: usize, to: usize) -> Result<()> {
        let Parts { doc, rep, .. } = self.parts(id)?;
        let len = doc.children(rep.target).len();
        if from >= len || to >= len {
            return Err(RepeatError::Desync(format!(
                "move {from} -> {to} outside the {len} items in the target"
            )));
        }
        doc.move_child(rep.target, from, to)?;

        if rep.index_dependency.is_set() {
            for i in from.min(to)..=from.max(to) {
                self.on_index_changed(id, i)?;
            }
        }
        Ok(())
    }

    /// Re-run whatever depends on the position of the item at `index`
    fn on_index_changed(&mut self, id: RepeaterId, index: usize) -> Result<()> {
        let Parts { doc, rep, data } = self.parts(id)?;
        let (Some((node, choice)), Some(value)) = (item_at(doc, rep, index), data.get(index)) else {
            return Err(RepeatError::Desync(format!("no item at {index} after a reorder")));
        };
        let value = value.clone();
        let dependency = rep.index_dependency;

        if dependency.includes_template() {
            let keep = rep
                .templates
                .as_ref()
                .is_some_and(|set| set.keep(choice, index, &value, Some(&*rep.evaluators)));
            if !keep {
                return self.replace_item(id, node, index, &value).map(|_| ());
            }
        }

        let index_dependent = rep.items.get(&node).is_some_and(|s| s.index_dependent);
        if dependency.includes_pattern() && index_dependent {
            // Same value, so `old` projects what the item showed at its previous slot
            apply_bindings(doc, rep, node, index, &value, Some(&value), true);
        }
        Ok(())
    }

    fn check_in_sync(&self, id: RepeaterId) -> Result<()> {
        let Some(rep) = self.repeaters.get(id) else {
            return Ok(());
        };
        let expected = self.sources.get(rep.source).map_or(0, DataSource::len);
        let shown = self.item_count(id);
        if shown != expected {
            return Err(RepeatError::Desync(format!(
                "target holds {shown} items for {expected} values"
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Item nodes
    // =========================================================================

    /// Build a fresh node for `index` and put it where `old` is
    fn replace_item(&mut self, id: RepeaterId, old: NodeId, index: usize, value: &Value) -> Result<NodeId> {
        let Parts { doc, rep, .. } = self.parts(id)?;
        let node = build_item(doc, rep, index, value);
        if let Err(err) = doc.insert_before(rep.target, node, Some(old)) {
            rep.items.remove(&node);
            doc.free(node);
            return Err(err.into());
        }
        rep.record(ItemEventKind::Change, index, node, EventOrigin::Data);
        trace!(repeater = %rep.name, index, "replaced item node");

        self.remove_item_node(id, old)?;
        self.clone_nested_repeaters(id);
        Ok(node)
    }

    /// Destroy nested repeaters under `node`, then detach and free it
    fn remove_item_node(&mut self, id: RepeaterId, node: NodeId) -> Result<()> {
        for nested in self.find_nested_targets(node) {
            if let Err(err) = self.destroy(nested) {
                warn!(%err, "could not destroy nested repeater");
            }
        }
        let Parts { doc, rep, .. } = self.parts(id)?;
        doc.detach(node);
        rep.items.remove(&node);
        doc.free(node);
        Ok(())
    }

    /// Remove every node from the target
    pub(crate) fn clear_target(&mut self, id: RepeaterId) -> Result<()> {
        let Parts { doc, rep, .. } = self.parts(id)?;
        remove_placeholder(doc, rep);
        let children = doc.children(rep.target).to_vec();

        for (index, node) in children.into_iter().enumerate() {
            let Parts { doc, rep, .. } = self.parts(id)?;
            if rep.items.contains_key(&node) {
                rep.record(ItemEventKind::Delete, index, node, EventOrigin::Data);
                self.remove_item_node(id, node)?;
            } else {
                doc.detach(node);
                doc.free(node);
            }
        }

        // Anything left belongs to nodes that are no longer in the target
        let Parts { rep, .. } = self.parts(id)?;
        rep.items.clear();
        Ok(())
    }

    /// Render every value into the target with a single insert
    pub(crate) fn add_all(&mut self, id: RepeaterId, origin: EventOrigin) -> Result<()> {
        let Parts { doc, rep, data } = self.parts(id)?;
        let fragment = doc.create_fragment();
        let mut built = Vec::with_capacity(data.len());
        for (index, value) in data.iter().enumerate() {
            let node = build_item(doc, rep, index, value);
            doc.append_child(fragment, node)?;
            built.push(node);
        }
        let attached = doc.append_child(rep.target, fragment);
        doc.free(fragment);
        attached?;

        for (index, node) in built.into_iter().enumerate() {
            rep.record(ItemEventKind::New, index, node, origin);
        }
        if data.is_empty() {
            if !rep.config.empty_data_ok {
                info!(repeater = %rep.name, "showing an empty list");
            }
            show_placeholder(doc, rep);
        }
        debug!(repeater = %rep.name, count = data.len(), "items rendered");
        self.clone_nested_repeaters(id);
        Ok(())
    }

    /// Give each nested target queued by `clone_template` a repeater of its
    /// own, configured like the template repeater it was cloned from, and
    /// show it
    fn clone_nested_repeaters(&mut self, id: RepeaterId) {
        let Some(rep) = self.repeaters.get_mut(id) else {
            return;
        };
        let target = rep.target;
        let pending = std::mem::take(&mut rep.pending_clones);

        for (copy, original) in pending {
            if !self.document.is_ancestor_or_self(target, copy) || self.inside_other_target(target, copy) {
                continue;
            }
            if self.targets.contains_key(&copy) {
                warn!(target = ?copy, "cloned target already has a repeater");
                continue;
            }
            let Some(template_rep) = self.targets.get(&original).and_then(|t| self.repeaters.get(*t)) else {
                trace!(target = ?original, "no repeater registered on template target");
                continue;
            };
            let source = template_rep.source;
            let templates = template_rep.template_fragment;
            let builder = RepeaterBuilder::new()
                .name(template_rep.name.clone())
                .config(template_rep.config.clone())
                .actions(template_rep.actions.clone())
                .evaluators(template_rep.evaluators.clone());

            let cloned = self.clone_templates_into(copy, templates).and_then(|templates| {
                let builder = match templates {
                    Some(fragment) => builder.templates(fragment),
                    None => builder,
                };
                let nested = self.create_repeater(copy, source, builder)?;
                self.show(nested)
            });
            if let Err(err) = cloned {
                warn!(%err, "could not clone nested repeater");
            }
        }
    }

    /// Whether a registered target sits strictly between `node` and `target`
    fn inside_other_target(&self, target: NodeId, node: NodeId) -> bool {
        let mut current = self.document.parent(node);
        while let Some(parent) = current {
            if parent == target {
                return false;
            }
            if self.document.has_attr(parent, TARGET_ATTR) {
                return true;
            }
            current = self.document.parent(parent);
        }
        false
    }

    /// Templates for a cloned target. When the template repeater has already
    /// moved its templates aside, the clone gets its own copy of them in
    /// place of whatever the target holds.
    fn clone_templates_into(&mut self, copy: NodeId, templates: Option<NodeId>) -> Result<Option<NodeId>> {
        let Some(fragment) = templates else {
            return Ok(None);
        };
        let stale = self.document.take_children(copy)?;
        self.document.free(stale);
        let (fragment, _) = self.document.clone_subtree(fragment)?;
        Ok(Some(fragment))
    }

    /// Name the registered repeaters inside each template in its
    /// `autoclone-repeaters` list
    fn mark_template_repeaters(&mut self, id: RepeaterId) -> Result<()> {
        let rep = self.repeaters.get(id).ok_or(RepeatError::UnknownRepeater(id))?;
        if !rep.config.clone_template_repeaters {
            return Ok(());
        }
        let roots: Vec<NodeId> = rep
            .templates
            .iter()
            .flat_map(|set| set.templates())
            .filter(|t| !t.descriptor.is_empty_placeholder)
            .map(|t| t.root)
            .collect();

        for root in roots {
            let mut names: Vec<String> = self
                .document
                .attr(root, AUTOCLONE_ATTR)
                .map(|list| autoclone_names(list).map(str::to_string).collect())
                .unwrap_or_default();
            for nested in self.find_nested_targets(root) {
                if let Some(name) = self.repeaters.get(nested).map(|r| r.name.clone()) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
            if !names.is_empty() {
                debug!(repeater = ?id, template = ?root, nested = ?names, "cloning template repeaters");
                self.document.set_attr(root, AUTOCLONE_ATTR, names.join(","))?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Show and hide
    // =========================================================================

    /// Read templates and instructions once, on first show
    pub(crate) fn prepare(&mut self, id: RepeaterId) -> Result<()> {
        let Parts { doc, rep, .. } = self.parts(id)?;
        if rep.templates.is_some() {
            return Ok(());
        }

        let fragment = match rep.template_fragment {
            Some(fragment) => fragment,
            None => {
                let fragment = doc.take_children(rep.target)?;
                rep.template_fragment = Some(fragment);
                fragment
            }
        };
        let set = TemplateSet::from_fragment(doc, fragment, &rep.config.base_attr)?;

        let noaction = rep.config.sub_attr("_noaction");
        let reader = InstructionReader::new(&rep.config.base_attr, &rep.actions);
        let mut reads_index = false;
        for template in set.templates() {
            let root = template.root;
            if let Some(html_id) = doc.remove_attr(root, "id") {
                doc.set_attr(root, "_id", html_id)?;
            }
            if template.descriptor.is_empty_placeholder {
                continue;
            }

            let mut found = 0;
            for node in template_nodes(doc, root) {
                let instructions = rep.instructions.get_or_parse(doc, node, &reader);
                found += instructions.len();
                reads_index |= instructions.iter().any(Instruction::is_index_dependent);
            }
            if found == 0 && !doc.has_attr(root, &noaction) {
                warn!(
                    repeater = %rep.name,
                    template = ?root,
                    "template has no instructions, add {noaction} if that is intended"
                );
            }
        }

        if reads_index {
            rep.escalate(IndexDependency::Pattern);
        }
        if set.is_index_dependent() {
            rep.escalate(IndexDependency::Template);
        }
        rep.templates = Some(set);
        self.mark_template_repeaters(id)
    }

    /// Render into the target, from the hide cache when it is still valid
    pub(crate) fn attach(&mut self, id: RepeaterId) -> Result<()> {
        let Parts { doc, rep, data } = self.parts(id)?;
        if !doc.children(rep.target).is_empty() {
            return Err(RepeatError::TargetNotEmpty(rep.target));
        }
        doc.set_attr(rep.target, TARGET_ATTR, rep.name.clone())?;

        let version = data.version();
        let expected = data.len();
        let source = rep.source;
        let fresh = rep
            .hide_cache
            .as_ref()
            .map(|cache| cache.version == version && cache.source == source);

        match fresh {
            Some(true) => {
                self.restore_hidden(id)?;
                let restored = self.item_count(id);
                if restored != expected {
                    warn!(repeater = ?id, restored, expected, "hidden items out of step, rebuilding");
                    self.clear_target(id)?;
                    self.add_all(id, EventOrigin::Show)?;
                }
            }
            Some(false) => {
                debug!(repeater = ?id, "data changed while hidden, rebuilding");
                self.drop_hide_cache(id);
                self.add_all(id, EventOrigin::Show)?;
            }
            None => self.add_all(id, EventOrigin::Show)?,
        }

        self.subscribe(id, source);
        if let Some(rep) = self.repeaters.get_mut(id) {
            rep.showing = true;
            debug!(repeater = %rep.name, "showing");
        }
        Ok(())
    }

    fn restore_hidden(&mut self, id: RepeaterId) -> Result<()> {
        let Parts { doc, rep, .. } = self.parts(id)?;
        let Some(cache) = rep.hide_cache.take() else {
            return Ok(());
        };
        let nodes = doc.children(cache.fragment).to_vec();
        let attached = doc.append_child(rep.target, cache.fragment);
        doc.free(cache.fragment);
        attached?;

        for (index, node) in nodes.iter().enumerate() {
            rep.record(ItemEventKind::New, index, *node, EventOrigin::Show);
        }
        if nodes.is_empty() {
            show_placeholder(doc, rep);
        }
        trace!(repeater = %rep.name, count = nodes.len(), "restored hidden items");

        for nested in cache.nested {
            if !self.repeaters.contains_key(nested) {
                continue;
            }
            if let Err(err) = self.show(nested) {
                warn!(%err, "could not re-show nested repeater");
            }
        }
        Ok(())
    }

    /// Detach every item. Returns the fragment holding them when they were
    /// kept for a later show.
    pub(crate) fn hide_inner(&mut self, id: RepeaterId, allow_cache: bool) -> Result<Option<NodeId>> {
        let rep = self
            .repeaters
            .get_mut(id)
            .ok_or(RepeatError::UnknownRepeater(id))?;
        if !rep.showing {
            return Ok(rep.hide_cache.as_ref().map(|cache| cache.fragment));
        }
        // Items that are out of step with the data are not worth keeping
        let desynced = rep.rebuild.is_pending();
        rep.rebuild.cancel();
        let caching = allow_cache && rep.config.cache_on_hide && !desynced;
        let target = rep.target;
        self.unsubscribe(id);

        let mut hidden_nested = Vec::new();
        for nested in self.find_nested_targets(target) {
            let showing = self.repeaters.get(nested).is_some_and(|r| r.showing);
            let outcome = if !caching {
                self.destroy(nested)
            } else if showing {
                hidden_nested.push(nested);
                self.hide_inner(nested, true).map(|_| ())
            } else {
                Ok(())
            };
            if let Err(err) = outcome {
                warn!(%err, "could not hide nested repeater");
            }
        }

        let Parts { doc, rep, data } = self.parts(id)?;
        remove_placeholder(doc, rep);
        let children = doc.children(rep.target).to_vec();
        for (index, node) in children.iter().enumerate() {
            rep.record(ItemEventKind::Delete, index, *node, EventOrigin::Hide);
        }
        let fragment = doc.take_children(rep.target)?;
        rep.showing = false;

        debug!(repeater = %rep.name, cached = caching, "hidden");
        if caching {
            rep.hide_cache = Some(HideCache {
                version: data.version(),
                source: rep.source,
                fragment,
                nested: hidden_nested,
            });
            Ok(Some(fragment))
        } else {
            for node in &children {
                rep.items.remove(node);
            }
            doc.free(fragment);
            Ok(None)
        }
    }

    /// Free cached items and destroy the nested repeaters inside them
    pub(crate) fn drop_hide_cache(&mut self, id: RepeaterId) {
        let Some(cache) = self.repeaters.get_mut(id).and_then(|r| r.hide_cache.take()) else {
            return;
        };
        for nested in cache.nested {
            if self.repeaters.contains_key(nested) {
                if let Err(err) = self.destroy(nested) {
                    warn!(%err, "could not destroy cached nested repeater");
                }
            }
        }
        // Nested repeaters that were not showing at hide time
        for nested in self.find_nested_targets(cache.fragment) {
            if let Err(err) = self.destroy(nested) {
                warn!(%err, "could not destroy cached nested repeater");
            }
        }
        if let Some(rep) = self.repeaters.get_mut(id) {
            for node in self.document.children(cache.fragment) {
                rep.items.remove(node);
            }
        }
        self.document.free(cache.fragment);
    }
}

// =============================================================================
// Helpers over one repeater's borrowed state
// =============================================================================

/// The item node at `index` and the template it was built from
fn item_at(doc: &Document, rep: &Repeater, index: usize) -> Option<(NodeId, Choice)> {
    let node = doc.child_at(rep.target, index)?;
    rep.items.get(&node).map(|state| (node, state.choice))
}

/// Preorder walk of a template, not descending into nested repeater targets
fn template_nodes(doc: &Document, root: NodeId) -> Vec<NodeId> {
    let mut nodes = vec![root];
    let mut stack: Vec<NodeId> = doc.children(root).iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        if doc.element(id).is_none() {
            continue;
        }
        nodes.push(id);
        if !doc.has_attr(id, TARGET_ATTR) {
            stack.extend(doc.children(id).iter().rev().copied());
        }
    }
    nodes
}

/// Clone the chosen template, or an error node when none applies, and
/// run its bindings
fn build_item(doc: &mut Document, rep: &mut Repeater, index: usize, value: &Value) -> NodeId {
    let chosen = match rep.templates.as_ref() {
        Some(set) => set
            .choose(index, value, Some(&*rep.evaluators))
            .map_err(RepeatError::from),
        None => Err(TemplateError::NoTemplates.into()),
    };
    let built = chosen.and_then(|choice| {
        clone_template(doc, rep, choice).map(|(node, bound)| (choice, node, bound))
    });

    match built {
        Ok((choice, node, bound)) => {
            let index_dependent = bound.iter().any(|b| b.index_dependent);
            rep.items.insert(
                node,
                ItemState {
                    choice,
                    bound,
                    index_dependent,
                    index,
                },
            );
            apply_bindings(doc, rep, node, index, value, None, false);
            node
        }
        Err(err) => {
            error!(repeater = %rep.name, index, %err, "could not build item");
            let node = doc.build(
                el("span")
                    .class(ERROR_CLASS)
                    .text(format!("<repeat-error>{}", display_string(value))),
            );
            rep.items.insert(
                node,
                ItemState {
                    choice: Choice::Failed,
                    bound: SmallVec::new(),
                    index_dependent: false,
                    index,
                },
            );
            node
        }
    }
}

fn clone_template(
    doc: &mut Document,
    rep: &mut Repeater,
    choice: Choice,
) -> Result<(NodeId, SmallVec<[BoundNode; 4]>)> {
    let root = choice
        .template()
        .and_then(|i| rep.templates.as_ref()?.get(i))
        .map(|t| t.root)
        .ok_or(TemplateError::NoTemplates)?;
    let (clone, pairs) = doc.clone_subtree(root)?;
    let autoclone: Vec<String> = doc
        .attr(root, AUTOCLONE_ATTR)
        .map(|list| autoclone_names(list).map(str::to_string).collect())
        .unwrap_or_default();

    let mut bound = SmallVec::new();
    for (original, copy) in pairs {
        if !autoclone.is_empty()
            && original != root
            && doc
                .attr(original, TARGET_ATTR)
                .is_some_and(|name| autoclone.iter().any(|n| n == name))
        {
            rep.pending_clones.push((copy, original));
        }
        // Nodes inside nested targets are never parsed and keep their markup
        let Some(instructions) = rep.instructions.get(original) else {
            continue;
        };
        if !instructions.is_empty() {
            bound.push(BoundNode {
                node: copy,
                template: original,
                index_dependent: instructions.iter().any(Instruction::is_index_dependent),
            });
        }
        if !rep.config.debug_mode {
            strip_instruction_attrs(doc, copy, &rep.config.base_attr);
        }
    }

    if rep.config.debug_mode {
        doc.set_attr(clone, ITEM_ATTR, rep.name.clone())?;
    }
    Ok((clone, bound))
}

fn autoclone_names(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|name| !name.is_empty())
}

fn strip_instruction_attrs(doc: &mut Document, node: NodeId, base: &str) {
    let names: Vec<String> = doc
        .attrs(node)
        .map(|(name, _)| name)
        .filter(|name| {
            name.strip_prefix(base)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('-') || rest.starts_with('_'))
        })
        .map(str::to_string)
        .collect();
    for name in names {
        doc.remove_attr(node, &name);
    }
}

/// Run the parsed instructions of every bound node in an item.
///
/// With `only_index_dependent`, instructions that do not read `#` are
/// skipped.
fn apply_bindings(
    doc: &mut Document,
    rep: &mut Repeater,
    node: NodeId,
    index: usize,
    value: &Value,
    old: Option<&Value>,
    only_index_dependent: bool,
) {
    let Some(state) = rep.items.get(&node) else {
        return;
    };
    let bound_nodes = state.bound.clone();
    let input = ActionInput {
        index,
        value,
        old,
        old_index: (state.index != index).then_some(state.index),
        evaluators: Some(&*rep.evaluators),
        empty_pattern_ok: rep.config.empty_pattern_ok,
        break_on_hide: rep.config.break_on_hide,
    };

    for bound in &bound_nodes {
        if only_index_dependent && !bound.index_dependent {
            continue;
        }
        let Some(instructions) = rep.instructions.get(bound.template) else {
            continue;
        };
        for inst in instructions.iter() {
            if only_index_dependent && !inst.is_index_dependent() {
                continue;
            }
            match rep.actions.execute(doc, bound.node, inst, input) {
                Ok(Flow::Continue) => {}
                Ok(Flow::StopRemaining) => break,
                Err(err) => error!(
                    repeater = %rep.name,
                    index,
                    action = %inst.action,
                    %err,
                    "action failed"
                ),
            }
        }
    }

    if let Some(state) = rep.items.get_mut(&node) {
        state.index = index;
    }
}

fn show_placeholder(doc: &mut Document, rep: &mut Repeater) {
    if rep.placeholder.is_some() {
        return;
    }
    let Some(root) = rep.templates.as_ref().and_then(|s| s.placeholder()).map(|t| t.root) else {
        return;
    };
    let placed = doc.clone_subtree(root).and_then(|(clone, pairs)| {
        if !rep.config.debug_mode {
            for (_, copy) in &pairs {
                strip_instruction_attrs(doc, *copy, &rep.config.base_attr);
            }
        }
        doc.append_child(rep.target, clone).map(|()| clone)
    });
    match placed {
        Ok(node) => rep.placeholder = Some(node),
        Err(err) => error!(repeater = %rep.name, %err, "could not show empty placeholder"),
    }
}

fn remove_placeholder(doc: &mut Document, rep: &mut Repeater) {
    if let Some(node) = rep.placeholder.take() {
        doc.detach(node);
        doc.free(node);
    }
}
