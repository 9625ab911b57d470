//! Integration tests for the repeater lifecycle
//!
//! These tests verify that:
//! - Hidden items are reused when the data did not change, and rebuilt when it did
//! - Empty lists show the placeholder template and drop it on the first item
//! - Nested repeaters are torn down with the item that holds them
//! - Targets are registered once and released on destroy

mod common;

use std::time::Duration;

use common::{list, shown, texts};
use pretty_assertions::assert_eq;
use serde_json::json;
use tessel_core::ManualClock;
use tessel_dom::{el, ElementBuilder, NodeId};
use tessel_repeat::{
    EventOrigin, ItemEventKind, RepeatConfig, RepeatError, RepeatRuntime, RepeaterBuilder,
    RepeaterId, AUTOCLONE_ATTR, ITEM_ATTR, TARGET_ATTR,
};

#[test]
fn test_hide_then_show_reuses_cached_items() {
    let mut rt = RepeatRuntime::new();
    let target = list(&mut rt, el("li").attr("rv-repeat-text", "$"));
    let (repeater, _) = shown(&mut rt, target, vec![json!("a"), json!("b")], RepeaterBuilder::new());
    let nodes = rt.document().children(target).to_vec();
    rt.take_item_events(repeater);

    let fragment = rt.hide(repeater).unwrap().unwrap();
    assert!(rt.document().children(target).is_empty());
    assert!(!rt.repeater(repeater).unwrap().is_showing());
    assert!(rt.repeater(repeater).unwrap().has_hide_cache());
    assert_eq!(rt.repeater(repeater).unwrap().hidden_fragment(), Some(fragment));
    assert_eq!(rt.document().children(fragment), nodes.as_slice());

    let hidden = rt.take_item_events(repeater);
    assert_eq!(hidden.len(), 2);
    assert!(hidden
        .iter()
        .all(|e| e.kind == ItemEventKind::Delete && e.origin == EventOrigin::Hide));

    rt.document_mut().reset_stats();
    rt.show(repeater).unwrap();

    assert_eq!(rt.document().children(target), nodes.as_slice());
    assert_eq!(rt.document().stats().created, 0);
    assert!(!rt.repeater(repeater).unwrap().has_hide_cache());
    let restored = rt.take_item_events(repeater);
    assert!(restored
        .iter()
        .all(|e| e.kind == ItemEventKind::New && e.origin == EventOrigin::Show));
}

#[test]
fn test_show_rebuilds_when_data_changed_while_hidden() {
    let mut rt = RepeatRuntime::new();
    let target = list(&mut rt, el("li").attr("rv-repeat-text", "$"));
    let (repeater, source) = shown(&mut rt, target, vec![json!("a"), json!("b")], RepeaterBuilder::new());
    let old = rt.item_node(repeater, 0).unwrap();

    rt.hide(repeater).unwrap();
    // Not subscribed while hidden; the version still moves
    rt.push(source, json!("c")).unwrap();
    assert!(rt.document().children(target).is_empty());

    rt.show(repeater).unwrap();

    assert_eq!(texts(&rt, target), vec!["a", "b", "c"]);
    assert!(!rt.document().contains_node(old));
}

#[test]
fn test_hide_while_out_of_step_does_not_cache() {
    let clock = ManualClock::new();
    let mut rt = RepeatRuntime::with_clock(clock.clone());
    let target = list(&mut rt, el("li").attr("rv-repeat-text", "$"));
    let (repeater, source) = shown(
        &mut rt,
        target,
        vec![json!("a"), json!("b"), json!("c")],
        RepeaterBuilder::new(),
    );

    let middle = rt.item_node(repeater, 1).unwrap();
    rt.document_mut().detach(middle);
    rt.push(source, json!("d")).unwrap();
    assert!(rt.repeater(repeater).unwrap().rebuild_pending());

    assert_eq!(rt.hide(repeater).unwrap(), None);
    assert!(!rt.repeater(repeater).unwrap().has_hide_cache());
    assert!(!rt.repeater(repeater).unwrap().rebuild_pending());

    rt.show(repeater).unwrap();
    assert_eq!(rt.item_count(repeater), 4);
    assert_eq!(texts(&rt, target), vec!["a", "b", "c", "d"]);

    clock.advance(Duration::from_secs(5));
    assert_eq!(rt.tick(), 0);
}

#[test]
fn test_show_rebuilds_hidden_items_that_lost_a_node() {
    let mut rt = RepeatRuntime::new();
    let target = list(&mut rt, el("li").attr("rv-repeat-text", "$"));
    let (repeater, _) = shown(&mut rt, target, vec![json!("a"), json!("b")], RepeaterBuilder::new());

    let fragment = rt.hide(repeater).unwrap().unwrap();
    let first = rt.document().children(fragment)[0];
    rt.document_mut().detach(first);

    rt.show(repeater).unwrap();
    assert_eq!(rt.item_count(repeater), 2);
    assert_eq!(texts(&rt, target), vec!["a", "b"]);
}

#[test]
fn test_hide_without_cache_frees_items() {
    let mut rt = RepeatRuntime::new();
    let target = list(&mut rt, el("li").attr("rv-repeat-text", "$"));
    let config = RepeatConfig {
        cache_on_hide: false,
        ..RepeatConfig::default()
    };
    let (repeater, _) = shown(
        &mut rt,
        target,
        vec![json!("a")],
        RepeaterBuilder::new().config(config),
    );
    let node = rt.item_node(repeater, 0).unwrap();

    assert_eq!(rt.hide(repeater).unwrap(), None);

    assert!(!rt.repeater(repeater).unwrap().has_hide_cache());
    assert!(!rt.document().contains_node(node));

    rt.show(repeater).unwrap();
    assert_eq!(texts(&rt, target), vec!["a"]);
}

#[test]
fn test_show_with_switches_source() {
    let mut rt = RepeatRuntime::new();
    let target = list(&mut rt, el("li").attr("rv-repeat-text", "$"));
    let (repeater, first) = shown(&mut rt, target, vec![json!("a")], RepeaterBuilder::new());
    let second = rt.create_source(vec![json!("p"), json!("q")]);

    rt.show_with(repeater, second).unwrap();
    assert_eq!(texts(&rt, target), vec!["p", "q"]);
    assert_eq!(rt.repeater(repeater).unwrap().source(), second);

    rt.push(first, json!("ignored")).unwrap();
    rt.push(second, json!("r")).unwrap();
    assert_eq!(texts(&rt, target), vec!["p", "q", "r"]);
}

fn with_placeholder(rt: &mut RepeatRuntime) -> NodeId {
    rt.document_mut().build(
        el("ul")
            .child(
                el("li")
                    .attr("rv-repeat_usedefault", "")
                    .attr("rv-repeat-text", "$"),
            )
            .child(
                el("li")
                    .class("empty")
                    .attr("rv-repeat_showonempty", "")
                    .text("nothing here"),
            ),
    )
}

#[test]
fn test_placeholder_comes_and_goes() {
    let mut rt = RepeatRuntime::new();
    let target = with_placeholder(&mut rt);
    let (repeater, source) = shown(&mut rt, target, vec![], RepeaterBuilder::new());

    assert_eq!(texts(&rt, target), vec!["nothing here"]);
    assert_eq!(rt.item_count(repeater), 0);
    assert!(rt.repeater(repeater).unwrap().placeholder().is_some());
    assert_eq!(rt.item_node(repeater, 0), None);

    rt.push(source, json!("a")).unwrap();
    assert_eq!(texts(&rt, target), vec!["a"]);
    assert!(rt.repeater(repeater).unwrap().placeholder().is_none());

    rt.remove(source, 0).unwrap();
    assert_eq!(texts(&rt, target), vec!["nothing here"]);
    assert!(!rt.repeater(repeater).unwrap().rebuild_pending());
}

#[test]
fn test_placeholder_survives_hide_and_show() {
    let mut rt = RepeatRuntime::new();
    let target = with_placeholder(&mut rt);
    let (repeater, _) = shown(&mut rt, target, vec![], RepeaterBuilder::new());

    rt.hide(repeater).unwrap();
    assert!(rt.document().children(target).is_empty());

    rt.show(repeater).unwrap();
    assert_eq!(texts(&rt, target), vec!["nothing here"]);
}

fn nested_lists(rt: &mut RepeatRuntime) -> NodeId {
    rt.document_mut().build(
        el("ul").child(
            el("li")
                .attr("rv-repeat_noaction", "")
                .child(
                    el("ol")
                        .attr(TARGET_ATTR, "")
                        .child(el("li").attr("rv-repeat-text", "$")),
                ),
        ),
    )
}

#[test]
fn test_removing_item_destroys_nested_repeater() {
    let mut rt = RepeatRuntime::new();
    let outer_target = nested_lists(&mut rt);
    let (outer, outer_source) = shown(
        &mut rt,
        outer_target,
        vec![json!("group")],
        RepeaterBuilder::new().name("groups"),
    );

    let item = rt.item_node(outer, 0).unwrap();
    let inner_target = rt.document().children(item)[0];
    let (inner, _) = shown(
        &mut rt,
        inner_target,
        vec![json!("x"), json!("y")],
        RepeaterBuilder::new().name("members"),
    );
    assert_eq!(texts(&rt, inner_target), vec!["x", "y"]);
    assert_eq!(rt.find_nested_targets(outer_target), vec![inner]);
    assert_eq!(rt.repeater_count(), 2);

    rt.remove(outer_source, 0).unwrap();

    assert_eq!(rt.repeater_count(), 1);
    assert!(rt.repeater(inner).is_none());
    assert_eq!(rt.repeater_for_target(inner_target), None);
    assert!(!rt.document().contains_node(inner_target));
}

#[test]
fn test_nested_repeaters_hide_and_show_with_parent() {
    let mut rt = RepeatRuntime::new();
    let outer_target = nested_lists(&mut rt);
    let (outer, _) = shown(&mut rt, outer_target, vec![json!("group")], RepeaterBuilder::new());
    let item = rt.item_node(outer, 0).unwrap();
    let inner_target = rt.document().children(item)[0];
    let (inner, _) = shown(&mut rt, inner_target, vec![json!("x")], RepeaterBuilder::new());

    rt.hide(outer).unwrap();
    assert!(!rt.repeater(inner).unwrap().is_showing());

    rt.show(outer).unwrap();
    assert!(rt.repeater(inner).unwrap().is_showing());
    assert_eq!(texts(&rt, inner_target), vec!["x"]);
}

/// Rows that each hold a `<select>` registered as the "choices" repeater
fn rows_with_dropdown(rt: &mut RepeatRuntime, row: ElementBuilder) -> (NodeId, NodeId) {
    let target = rt.document_mut().build(
        el("ul").child(
            row.attr("rv-repeat_noaction", "")
                .child(el("select").child(el("option").attr("rv-repeat-text", "$"))),
        ),
    );
    let select = rt
        .document()
        .descendants(target)
        .into_iter()
        .find(|&n| rt.document().tag(n) == Some("select"))
        .unwrap();
    (target, select)
}

fn dropdown_in(rt: &RepeatRuntime, repeater: RepeaterId, index: usize) -> NodeId {
    let row = rt.item_node(repeater, index).unwrap();
    rt.document().children(row)[0]
}

#[test]
fn test_template_repeaters_cloned_into_each_item() {
    let mut rt = RepeatRuntime::new();
    let (target, select) = rows_with_dropdown(&mut rt, el("li"));
    let choices = rt.create_source(vec![json!("x"), json!("y")]);
    rt.create_repeater(select, choices, RepeaterBuilder::new().name("choices"))
        .unwrap();

    let config = RepeatConfig {
        clone_template_repeaters: true,
        ..RepeatConfig::default()
    };
    let (rows, row_source) = shown(
        &mut rt,
        target,
        vec![json!(1), json!(2)],
        RepeaterBuilder::new().name("rows").config(config),
    );
    assert_eq!(rt.repeater_count(), 4);

    for index in 0..2 {
        let dropdown = dropdown_in(&rt, rows, index);
        assert!(rt.repeater_for_target(dropdown).is_some());
        assert_eq!(texts(&rt, dropdown), vec!["x", "y"]);
    }

    rt.push(choices, json!("z")).unwrap();
    assert_eq!(texts(&rt, dropdown_in(&rt, rows, 0)), vec!["x", "y", "z"]);
    assert_eq!(texts(&rt, dropdown_in(&rt, rows, 1)), vec!["x", "y", "z"]);

    rt.push(row_source, json!(3)).unwrap();
    assert_eq!(rt.repeater_count(), 5);
    assert_eq!(texts(&rt, dropdown_in(&rt, rows, 2)), vec!["x", "y", "z"]);

    rt.remove(row_source, 0).unwrap();
    assert_eq!(rt.repeater_count(), 4);

    rt.destroy(rows).unwrap();
    assert_eq!(rt.repeater_count(), 0);
}

#[test]
fn test_autoclone_marker_picks_nested_repeaters() {
    let mut rt = RepeatRuntime::new();
    let (target, select) = rows_with_dropdown(&mut rt, el("li").attr(AUTOCLONE_ATTR, "choices"));
    let choices = rt.create_source(vec![json!("x")]);
    rt.create_repeater(select, choices, RepeaterBuilder::new().name("choices"))
        .unwrap();
    let (rows, _) = shown(&mut rt, target, vec![json!(1)], RepeaterBuilder::new());

    let dropdown = dropdown_in(&rt, rows, 0);
    assert!(rt.repeater_for_target(dropdown).is_some());
    assert_eq!(texts(&rt, dropdown), vec!["x"]);
}

#[test]
fn test_template_repeaters_left_alone_by_default() {
    let mut rt = RepeatRuntime::new();
    let (target, select) = rows_with_dropdown(&mut rt, el("li"));
    let choices = rt.create_source(vec![json!("x")]);
    rt.create_repeater(select, choices, RepeaterBuilder::new().name("choices"))
        .unwrap();
    let (rows, _) = shown(&mut rt, target, vec![json!(1)], RepeaterBuilder::new());

    assert_eq!(rt.repeater_count(), 2);
    assert_eq!(rt.repeater_for_target(dropdown_in(&rt, rows, 0)), None);
}

#[test]
fn test_target_can_only_be_taken_once() {
    let mut rt = RepeatRuntime::new();
    let target = list(&mut rt, el("li").attr("rv-repeat-text", "$"));
    let source = rt.create_source(vec![]);
    let repeater = rt
        .create_repeater(target, source, RepeaterBuilder::new().name("colors"))
        .unwrap();
    assert_eq!(rt.document().attr(target, TARGET_ATTR), Some("colors"));

    let err = rt
        .create_repeater(target, source, RepeaterBuilder::new())
        .unwrap_err();
    assert!(matches!(err, RepeatError::TargetTaken(node) if node == target));

    rt.destroy(repeater).unwrap();
    assert!(!rt.document().has_attr(target, TARGET_ATTR));
    assert!(rt.create_repeater(target, source, RepeaterBuilder::new()).is_ok());
}

#[test]
fn test_destroy_empties_target() {
    let mut rt = RepeatRuntime::new();
    let target = list(&mut rt, el("li").attr("rv-repeat-text", "$"));
    let (repeater, source) = shown(&mut rt, target, vec![json!("a")], RepeaterBuilder::new());

    rt.destroy(repeater).unwrap();

    assert!(rt.document().children(target).is_empty());
    assert!(rt.repeater(repeater).is_none());
    // Later mutations reach nobody
    rt.push(source, json!("b")).unwrap();
    assert!(rt.document().children(target).is_empty());
}

#[test]
fn test_show_requires_empty_target_with_explicit_templates() {
    let mut rt = RepeatRuntime::new();
    let templates = rt
        .document_mut()
        .build_fragment([el("li").attr("rv-repeat-text", "$")]);
    let target = rt.document_mut().build(el("ul").child(el("li").text("stale")));
    let source = rt.create_source(vec![json!("a")]);
    let repeater = rt
        .create_repeater(target, source, RepeaterBuilder::new().templates(templates))
        .unwrap();

    let err = rt.show(repeater).unwrap_err();
    assert!(matches!(err, RepeatError::TargetNotEmpty(node) if node == target));
}

#[test]
fn test_debug_mode_controls_item_markup() {
    let mut rt = RepeatRuntime::new();
    let target = list(&mut rt, el("li").attr("rv-repeat-text", "$"));
    let (repeater, _) = shown(
        &mut rt,
        target,
        vec![json!("a")],
        RepeaterBuilder::new().name("debugged"),
    );
    let item = rt.item_node(repeater, 0).unwrap();
    assert_eq!(rt.document().attr(item, ITEM_ATTR), Some("debugged"));
    assert!(rt.document().has_attr(item, "rv-repeat-text"));

    let plain = list(&mut rt, el("li").attr("rv-repeat-text", "$"));
    let config = RepeatConfig {
        debug_mode: false,
        ..RepeatConfig::default()
    };
    let (repeater, _) = shown(
        &mut rt,
        plain,
        vec![json!("a")],
        RepeaterBuilder::new().config(config),
    );
    let item = rt.item_node(repeater, 0).unwrap();
    assert_eq!(rt.document().attr(item, ITEM_ATTR), None);
    assert!(!rt.document().has_attr(item, "rv-repeat-text"));
    assert_eq!(texts(&rt, plain), vec!["a"]);
}

#[test]
fn test_template_id_moves_aside() {
    let mut rt = RepeatRuntime::new();
    let target = list(
        &mut rt,
        el("li").attr("id", "row").attr("rv-repeat-text", "$"),
    );
    let (repeater, _) = shown(&mut rt, target, vec![json!("a"), json!("b")], RepeaterBuilder::new());

    let first = rt.item_node(repeater, 0).unwrap();
    assert_eq!(rt.document().attr(first, "id"), None);
    assert_eq!(rt.document().attr(first, "_id"), Some("row"));
}

#[test]
fn test_config_loaded_from_toml_drives_repeater() {
    let config = RepeatConfig::from_toml_str(
        r#"
        base_attr = "data-each"
        debug_mode = false
        "#,
    )
    .unwrap();

    let mut rt = RepeatRuntime::new();
    let target = list(&mut rt, el("li").attr("data-each-text", "${n}"));
    let (_, source) = shown(
        &mut rt,
        target,
        vec![json!({"n": 1})],
        RepeaterBuilder::new().config(config),
    );
    rt.push(source, json!({"n": 2})).unwrap();
    assert_eq!(texts(&rt, target), vec!["1", "2"]);
}
