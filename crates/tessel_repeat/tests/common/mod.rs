//! Shared fixtures for the repeater integration tests

#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use serde_json::Value;
use tessel_dom::{el, ElementBuilder, NodeId};
use tessel_repeat::{ActionRegistry, Flow, RepeatRuntime, RepeaterBuilder, RepeaterId, SourceId};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Text of every child of `target`, in order
pub fn texts(rt: &RepeatRuntime, target: NodeId) -> Vec<String> {
    rt.document()
        .children(target)
        .iter()
        .map(|&node| rt.document().text_content(node))
        .collect()
}

/// A `<ul>` whose only child is `template`
pub fn list(rt: &mut RepeatRuntime, template: ElementBuilder) -> NodeId {
    rt.document_mut().build(el("ul").child(template))
}

/// Create a shown repeater over `values`
pub fn shown(
    rt: &mut RepeatRuntime,
    target: NodeId,
    values: Vec<Value>,
    builder: RepeaterBuilder,
) -> (RepeaterId, SourceId) {
    let source = rt.create_source(values);
    let repeater = rt.create_repeater(target, source, builder).unwrap();
    rt.show(repeater).unwrap();
    (repeater, source)
}

/// Built-in actions plus `count`, which counts how often it runs
pub fn counting_actions() -> (Rc<ActionRegistry>, Rc<Cell<usize>>) {
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let mut registry = ActionRegistry::with_builtins();
    registry.register("count", move |_cx| {
        counter.set(counter.get() + 1);
        Ok(Flow::Continue)
    });
    (Rc::new(registry), runs)
}
