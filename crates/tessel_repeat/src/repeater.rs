//! Per-repeater state
//!
//! A [`Repeater`] keeps a target node's children in step with one data
//! source. It owns its templates, parsed instructions and a side table from
//! item node to [`ItemState`]. The event handling itself lives on
//! [`RepeatRuntime`](crate::RepeatRuntime), which owns the document and the
//! data sources.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tessel_core::Debounced;
use tessel_dom::NodeId;
use tracing::warn;

use crate::action::ActionRegistry;
use crate::config::RepeatConfig;
use crate::instruction::InstructionCache;
use crate::pattern::Evaluators;
use crate::runtime::{RepeaterId, SourceId};
use crate::template::{Choice, TemplateSet};

/// Whether item output depends on item position.
///
/// Once raised it never drops back, since templates and instructions are
/// fixed after preparation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IndexDependency {
    #[default]
    None,
    /// Some binding pattern reads `#`
    Pattern,
    /// Some template rule reads `#`
    Template,
    Both,
}

impl IndexDependency {
    pub fn includes_pattern(self) -> bool {
        matches!(self, IndexDependency::Pattern | IndexDependency::Both)
    }

    pub fn includes_template(self) -> bool {
        matches!(self, IndexDependency::Template | IndexDependency::Both)
    }

    pub fn is_set(self) -> bool {
        self != IndexDependency::None
    }

    /// Union of two dependencies
    pub fn escalate(self, other: IndexDependency) -> IndexDependency {
        let pattern = self.includes_pattern() || other.includes_pattern();
        let template = self.includes_template() || other.includes_template();
        match (pattern, template) {
            (false, false) => IndexDependency::None,
            (true, false) => IndexDependency::Pattern,
            (false, true) => IndexDependency::Template,
            (true, true) => IndexDependency::Both,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemEventKind {
    New,
    Change,
    Delete,
}

/// What caused an item event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOrigin {
    Data,
    Show,
    Hide,
}

/// An item node appeared, was replaced or re-bound, or went away
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItemEvent {
    pub kind: ItemEventKind,
    pub index: usize,
    pub node: NodeId,
    pub origin: EventOrigin,
}

/// A node inside an item that carries instructions
#[derive(Clone, Copy, Debug)]
pub(crate) struct BoundNode {
    pub node: NodeId,
    /// The template node the instructions were parsed from
    pub template: NodeId,
    pub index_dependent: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct ItemState {
    pub choice: Choice,
    pub bound: SmallVec<[BoundNode; 4]>,
    pub index_dependent: bool,
    /// Slot the bindings were last applied for
    pub index: usize,
}

/// Items detached by `hide`, kept for a cheap re-show
#[derive(Debug)]
pub(crate) struct HideCache {
    pub version: u64,
    pub source: SourceId,
    pub fragment: NodeId,
    /// Nested repeaters hidden along with the items
    pub nested: Vec<RepeaterId>,
}

pub struct Repeater {
    pub(crate) name: String,
    pub(crate) config: RepeatConfig,
    pub(crate) target: NodeId,
    pub(crate) source: SourceId,
    /// Detached fragment holding the template roots
    pub(crate) template_fragment: Option<NodeId>,
    pub(crate) templates: Option<TemplateSet>,
    pub(crate) actions: Rc<ActionRegistry>,
    pub(crate) evaluators: Rc<Evaluators>,
    pub(crate) instructions: InstructionCache,
    pub(crate) items: FxHashMap<NodeId, ItemState>,
    pub(crate) index_dependency: IndexDependency,
    /// Empty placeholder currently in the target
    pub(crate) placeholder: Option<NodeId>,
    pub(crate) rebuild: Debounced,
    pub(crate) hide_cache: Option<HideCache>,
    pub(crate) showing: bool,
    pub(crate) events: Vec<ItemEvent>,
    /// Nested targets in freshly built items still waiting for their own
    /// repeater, paired with the template target they were cloned from
    pub(crate) pending_clones: Vec<(NodeId, NodeId)>,
}

impl Repeater {
    pub(crate) fn new(target: NodeId, source: SourceId, builder: RepeaterBuilder) -> Self {
        let RepeaterBuilder {
            name,
            config,
            templates,
            actions,
            evaluators,
        } = builder;
        let rebuild = Debounced::new(config.rebuild_delay());
        Self {
            name: name.unwrap_or_else(|| "repeater".to_string()),
            config,
            target,
            source,
            template_fragment: templates,
            templates: None,
            actions: actions.unwrap_or_else(|| Rc::new(ActionRegistry::with_builtins())),
            evaluators: evaluators.unwrap_or_default(),
            instructions: InstructionCache::new(),
            items: FxHashMap::default(),
            index_dependency: IndexDependency::None,
            placeholder: None,
            rebuild,
            hide_cache: None,
            showing: false,
            events: Vec::new(),
            pending_clones: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn config(&self) -> &RepeatConfig {
        &self.config
    }

    pub fn is_showing(&self) -> bool {
        self.showing
    }

    pub fn index_dependency(&self) -> IndexDependency {
        self.index_dependency
    }

    pub fn templates(&self) -> Option<&TemplateSet> {
        self.templates.as_ref()
    }

    /// Whether a desync has armed the rebuild timer
    pub fn rebuild_pending(&self) -> bool {
        self.rebuild.is_pending()
    }

    pub fn has_hide_cache(&self) -> bool {
        self.hide_cache.is_some()
    }

    /// Detached fragment holding the items kept by the last `hide`
    pub fn hidden_fragment(&self) -> Option<NodeId> {
        self.hide_cache.as_ref().map(|cache| cache.fragment)
    }

    pub fn placeholder(&self) -> Option<NodeId> {
        self.placeholder
    }

    /// Template choice recorded for an item node
    pub fn choice_of(&self, node: NodeId) -> Option<Choice> {
        self.items.get(&node).map(|s| s.choice)
    }

    /// Drain the item events recorded since the last call
    pub fn take_item_events(&mut self) -> Vec<ItemEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn record(&mut self, kind: ItemEventKind, index: usize, node: NodeId, origin: EventOrigin) {
        self.events.push(ItemEvent {
            kind,
            index,
            node,
            origin,
        });
    }

    pub(crate) fn escalate(&mut self, dependency: IndexDependency) {
        let raised = self.index_dependency.escalate(dependency);
        if raised != self.index_dependency {
            warn!(
                repeater = %self.name,
                from = ?self.index_dependency,
                to = ?raised,
                "index-dependent bindings re-run on every reorder"
            );
            self.index_dependency = raised;
        }
    }
}

/// Options for [`RepeatRuntime::create_repeater`](crate::RepeatRuntime::create_repeater)
#[derive(Default)]
pub struct RepeaterBuilder {
    name: Option<String>,
    config: RepeatConfig,
    templates: Option<NodeId>,
    actions: Option<Rc<ActionRegistry>>,
    evaluators: Option<Rc<Evaluators>>,
}

impl RepeaterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name used in logs and the `repeater-target` marker
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn config(mut self, config: RepeatConfig) -> Self {
        self.config = config;
        self
    }

    /// A detached fragment whose child elements are the templates. Without
    /// one, the target's own children become the templates on first show.
    pub fn templates(mut self, fragment: NodeId) -> Self {
        self.templates = Some(fragment);
        self
    }

    pub fn actions(mut self, registry: Rc<ActionRegistry>) -> Self {
        self.actions = Some(registry);
        self
    }

    pub fn evaluators(mut self, evaluators: Rc<Evaluators>) -> Self {
        self.evaluators = Some(evaluators);
        self
    }
}
