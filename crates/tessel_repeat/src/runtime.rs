//! Repeat runtime
//!
//! [`RepeatRuntime`] owns the document, the data sources and the repeaters.
//! Every data-source mutation goes through it and is dispatched
//! synchronously, in order, to the repeaters subscribed to that source.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use tessel_dom::el;
//! use tessel_repeat::{RepeatRuntime, RepeaterBuilder};
//!
//! let mut rt = RepeatRuntime::new();
//! let list = rt.document_mut().build(
//!     el("ul").child(el("li").attr("rv-repeat-text", "${name}")),
//! );
//! let people = rt.create_source(vec![json!({"name": "Ada"}), json!({"name": "Grace"})]);
//! let repeater = rt.create_repeater(list, people, RepeaterBuilder::new()).unwrap();
//!
//! rt.show(repeater).unwrap();
//! rt.push(people, json!({"name": "Barbara"})).unwrap();
//!
//! assert_eq!(rt.document().text_content(list), "AdaGraceBarbara");
//! ```

use std::time::Instant;

use rustc_hash::FxHashMap;
use serde_json::Value;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use tessel_core::{Clock, DataError, DataSource, ListEvent, SystemClock};
use tessel_dom::{Document, DomError, NodeId};
use tracing::{debug, error, warn};

use crate::error::{RepeatError, Result};
use crate::repeater::{EventOrigin, ItemEvent, Repeater, RepeaterBuilder};

new_key_type! {
    /// Handle to a data source owned by a [`RepeatRuntime`]
    pub struct SourceId;
    /// Handle to a repeater owned by a [`RepeatRuntime`]
    pub struct RepeaterId;
}

/// Marks a node registered as a repeater target
pub const TARGET_ATTR: &str = "repeater-target";
/// Marks item nodes in debug mode
pub const ITEM_ATTR: &str = "repeater-item";
/// Comma separated names of the nested repeaters a template root wants
/// cloned into each of its items
pub const AUTOCLONE_ATTR: &str = "autoclone-repeaters";

pub struct RepeatRuntime {
    pub(crate) document: Document,
    pub(crate) sources: SlotMap<SourceId, DataSource>,
    pub(crate) repeaters: SlotMap<RepeaterId, Repeater>,
    pub(crate) targets: FxHashMap<NodeId, RepeaterId>,
    pub(crate) subscriptions: FxHashMap<SourceId, SmallVec<[RepeaterId; 4]>>,
    clock: Box<dyn Clock>,
}

impl RepeatRuntime {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Use a custom time source for rebuild scheduling
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            document: Document::new(),
            sources: SlotMap::with_key(),
            repeaters: SlotMap::with_key(),
            targets: FxHashMap::default(),
            subscriptions: FxHashMap::default(),
            clock: Box::new(clock),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    // =========================================================================
    // Data sources
    // =========================================================================

    pub fn create_source(&mut self, values: Vec<Value>) -> SourceId {
        self.sources.insert(DataSource::from_values(values))
    }

    pub fn source(&self, id: SourceId) -> Option<&DataSource> {
        self.sources.get(id)
    }

    fn mutate<F>(&mut self, source: SourceId, f: F) -> Result<()>
    where
        F: FnOnce(&mut DataSource) -> std::result::Result<ListEvent, DataError>,
    {
        let data = self
            .sources
            .get_mut(source)
            .ok_or(RepeatError::UnknownSource(source))?;
        let event = f(data)?;
        self.dispatch(source, event);
        Ok(())
    }

    pub fn push(&mut self, source: SourceId, value: Value) -> Result<()> {
        self.mutate(source, |data| Ok(data.push(value)))
    }

    pub fn insert(&mut self, source: SourceId, index: usize, value: Value) -> Result<()> {
        self.mutate(source, |data| data.insert(index, value))
    }

    pub fn set(&mut self, source: SourceId, index: usize, value: Value) -> Result<()> {
        self.mutate(source, |data| data.set(index, value))
    }

    pub fn remove(&mut self, source: SourceId, index: usize) -> Result<()> {
        self.mutate(source, |data| data.remove(index))
    }

    pub fn move_item(&mut self, source: SourceId, from: usize, to: usize) -> Result<()> {
        self.mutate(source, |data| data.move_item(from, to))
    }

    /// Ask subscribers to redraw one slot without changing it
    pub fn touch(&mut self, source: SourceId, index: usize) -> Result<()> {
        self.mutate(source, |data| data.touch(index))
    }

    /// Swap the whole list and rebuild every repeater showing it
    pub fn replace_all(&mut self, source: SourceId, values: Vec<Value>) -> Result<()> {
        self.sources
            .get_mut(source)
            .ok_or(RepeatError::UnknownSource(source))?
            .replace_all(values);
        for id in self.subscribers(source) {
            if let Err(err) = self.repopulate(id) {
                error!(%err, "rebuild after replace_all failed");
            }
        }
        Ok(())
    }

    fn subscribers(&self, source: SourceId) -> SmallVec<[RepeaterId; 4]> {
        self.subscriptions.get(&source).cloned().unwrap_or_default()
    }

    fn is_subscribed(&self, source: SourceId, id: RepeaterId) -> bool {
        self.subscriptions
            .get(&source)
            .is_some_and(|subs| subs.contains(&id))
    }

    pub(crate) fn subscribe(&mut self, id: RepeaterId, source: SourceId) {
        let subs = self.subscriptions.entry(source).or_default();
        if !subs.contains(&id) {
            subs.push(id);
        }
    }

    pub(crate) fn unsubscribe(&mut self, id: RepeaterId) {
        for subs in self.subscriptions.values_mut() {
            subs.retain(|s| *s != id);
        }
    }

    /// Deliver one event to every repeater subscribed to `source`.
    ///
    /// Normally called by the mutation methods. A repeater that cannot apply
    /// the event is left as is and rebuilds after its quiet window.
    pub fn dispatch(&mut self, source: SourceId, event: ListEvent) {
        for id in self.subscribers(source) {
            // An earlier handler may have hidden or destroyed this one
            if !self.is_subscribed(source, id) {
                continue;
            }
            if let Err(err) = self.handle(id, &event) {
                self.desynced(id, &err);
            }
        }
    }

    pub(crate) fn desynced(&mut self, id: RepeaterId, err: &RepeatError) {
        let now = self.now();
        if let Some(rep) = self.repeaters.get_mut(id) {
            match err {
                RepeatError::Desync(_) => warn!(
                    repeater = %rep.name,
                    %err,
                    delay_ms = rep.config.rebuild_delay_ms,
                    "scheduling rebuild"
                ),
                _ => error!(repeater = %rep.name, %err, "update failed, scheduling rebuild"),
            }
            rep.rebuild.trigger(now);
        }
    }

    // =========================================================================
    // Repeaters
    // =========================================================================

    /// Register `target` as a repeater over `source`. Nothing is rendered
    /// until [`show`](Self::show).
    pub fn create_repeater(
        &mut self,
        target: NodeId,
        source: SourceId,
        builder: RepeaterBuilder,
    ) -> Result<RepeaterId> {
        if !self.document.contains_node(target) {
            return Err(DomError::NodeNotFound(target).into());
        }
        if self.targets.contains_key(&target) {
            return Err(RepeatError::TargetTaken(target));
        }
        if !self.sources.contains_key(source) {
            return Err(RepeatError::UnknownSource(source));
        }

        let repeater = Repeater::new(target, source, builder);
        self.document
            .set_attr(target, TARGET_ATTR, repeater.name.clone())?;
        debug!(repeater = %repeater.name, target = ?target, "created repeater");

        let id = self.repeaters.insert(repeater);
        self.targets.insert(target, id);
        Ok(id)
    }

    pub fn repeater(&self, id: RepeaterId) -> Option<&Repeater> {
        self.repeaters.get(id)
    }

    pub fn repeater_mut(&mut self, id: RepeaterId) -> Option<&mut Repeater> {
        self.repeaters.get_mut(id)
    }

    pub fn repeater_for_target(&self, target: NodeId) -> Option<RepeaterId> {
        self.targets.get(&target).copied()
    }

    pub fn repeater_count(&self) -> usize {
        self.repeaters.len()
    }

    /// Attach the repeater: render every item into the target and start
    /// listening to the data source.
    pub fn show(&mut self, id: RepeaterId) -> Result<()> {
        let rep = self
            .repeaters
            .get(id)
            .ok_or(RepeatError::UnknownRepeater(id))?;
        if rep.showing {
            debug!(repeater = %rep.name, "already showing");
            return Ok(());
        }
        self.prepare(id)?;
        self.attach(id)
    }

    /// Re-point the repeater at another data source and show it. Any
    /// hidden items are discarded.
    pub fn show_with(&mut self, id: RepeaterId, source: SourceId) -> Result<()> {
        if !self.sources.contains_key(source) {
            return Err(RepeatError::UnknownSource(source));
        }
        self.hide_inner(id, false)?;
        self.drop_hide_cache(id);
        self.repeaters
            .get_mut(id)
            .ok_or(RepeatError::UnknownRepeater(id))?
            .source = source;
        self.show(id)
    }

    /// Detach the repeater: stop listening and move its items out of the
    /// target.
    ///
    /// With `cache_on_hide` the items stay in a detached fragment, owned by
    /// the repeater and returned here, that a later `show` puts back as is.
    /// Returns `None` when the items were freed instead, either because
    /// caching is off or because they were already out of step with the data.
    pub fn hide(&mut self, id: RepeaterId) -> Result<Option<NodeId>> {
        self.hide_inner(id, true)
    }

    /// Hide, free everything the repeater owns and unregister its target
    pub fn destroy(&mut self, id: RepeaterId) -> Result<()> {
        if !self.repeaters.contains_key(id) {
            return Err(RepeatError::UnknownRepeater(id));
        }
        if let Err(err) = self.hide_inner(id, false) {
            warn!(%err, "hide failed while destroying repeater");
        }
        self.drop_hide_cache(id);
        self.unsubscribe(id);

        let Some(rep) = self.repeaters.remove(id) else {
            return Ok(());
        };
        self.targets.remove(&rep.target);
        self.document.remove_attr(rep.target, TARGET_ATTR);
        if let Some(fragment) = rep.template_fragment {
            for nested in self.find_nested_targets(fragment) {
                if let Err(err) = self.destroy(nested) {
                    warn!(%err, "could not destroy template repeater");
                }
            }
            self.document.free(fragment);
        }
        debug!(repeater = %rep.name, "destroyed repeater");
        Ok(())
    }

    /// Redraw one item, or every item, from the current data
    pub fn trigger_update(&mut self, id: RepeaterId, index: Option<usize>) -> Result<()> {
        let rep = self
            .repeaters
            .get(id)
            .ok_or(RepeatError::UnknownRepeater(id))?;
        if !rep.showing {
            return Ok(());
        }
        let len = self.sources.get(rep.source).map_or(0, DataSource::len);
        let indices: Vec<usize> = match index {
            Some(i) => vec![i],
            None => (0..len).collect(),
        };
        for index in indices {
            if let Err(err) = self.handle(id, &ListEvent::Update { index }) {
                self.desynced(id, &err);
                break;
            }
        }
        Ok(())
    }

    /// Run due rebuilds. Returns how many repeaters were rebuilt.
    pub fn tick(&mut self) -> usize {
        let now = self.now();
        let due: Vec<RepeaterId> = self
            .repeaters
            .iter_mut()
            .filter_map(|(id, rep)| rep.rebuild.poll(now).then_some(id))
            .collect();
        for &id in &due {
            if let Err(err) = self.repopulate(id) {
                error!(%err, "rebuild failed");
            }
        }
        due.len()
    }

    /// Throw away every item node and render the data from scratch
    pub fn repopulate(&mut self, id: RepeaterId) -> Result<()> {
        let rep = self
            .repeaters
            .get_mut(id)
            .ok_or(RepeatError::UnknownRepeater(id))?;
        rep.rebuild.cancel();
        if !rep.showing {
            self.drop_hide_cache(id);
            return Ok(());
        }
        debug!(repeater = %rep.name, "repopulating");
        self.clear_target(id)?;
        self.add_all(id, EventOrigin::Data)
    }

    /// Repeaters whose targets sit below `root`, deepest first
    pub fn find_nested_targets(&self, root: NodeId) -> Vec<RepeaterId> {
        let mut nodes = self.document.query_attr(root, TARGET_ATTR);
        nodes.retain(|n| self.targets.contains_key(n));
        self.document.sort_deepest_first(&mut nodes);
        nodes
            .iter()
            .filter_map(|n| self.targets.get(n).copied())
            .collect()
    }

    /// The node currently rendering slot `index`
    pub fn item_node(&self, id: RepeaterId, index: usize) -> Option<NodeId> {
        let rep = self.repeaters.get(id)?;
        if rep.placeholder.is_some() {
            return None;
        }
        self.document.child_at(rep.target, index)
    }

    /// Number of item nodes in the target
    pub fn item_count(&self, id: RepeaterId) -> usize {
        self.repeaters.get(id).map_or(0, |rep| {
            let children = self.document.children(rep.target).len();
            children.saturating_sub(usize::from(rep.placeholder.is_some()))
        })
    }

    pub fn take_item_events(&mut self, id: RepeaterId) -> Vec<ItemEvent> {
        self.repeaters
            .get_mut(id)
            .map(Repeater::take_item_events)
            .unwrap_or_default()
    }
}

impl Default for RepeatRuntime {
    fn default() -> Self {
        Self::new()
    }
}
