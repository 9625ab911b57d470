//! Tessel Repeat
//!
//! Keeps the children of a target node in step with an ordered data source.
//! Each list mutation touches only the affected item nodes:
//!
//! - **Templates**: the target's child elements, selected per item by
//!   `<base>_useif` rules with `<base>_usedefault` and `<base>_showonempty`
//!   fallbacks
//! - **Instructions**: `<base>` / `<base>-<action>` attributes on template
//!   nodes, parsed once and run against every clone
//! - **Patterns**: `$`, `#` and `${path}` projections of the item value
//! - **Actions**: a registry of named handler chains that mutate item nodes
//! - **Recovery**: when the target and the data disagree, the repeater
//!   rebuilds from scratch after a quiet window
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
//!     el("ol")
//!         .child(el("li").attr("rv-repeat_useif", r#"["${done}", "==", true]"#)
//!             .attr("rv-repeat-text", "done: {}")
//!             .attr("rv-repeat_key", "${title}"))
//!         .child(el("li").attr("rv-repeat_usedefault", "")
//!             .attr("rv-repeat-text", "${title}")),
//! );
//! let todos = rt.create_source(vec![
//!     json!({"title": "write", "done": true}),
//!     json!({"title": "test", "done": false}),
//! ]);
//! let repeater = rt.create_repeater(list, todos, RepeaterBuilder::new()).unwrap();
//! rt.show(repeater).unwrap();
//!
//! assert_eq!(rt.document().text_content(list), "done: writetest");
//! ```

pub mod action;
pub mod config;
mod engine;
pub mod error;
pub mod instruction;
pub mod pattern;
pub mod repeater;
pub mod runtime;
pub mod template;

pub use action::{ActionContext, ActionError, ActionFn, ActionInput, ActionKind, ActionRegistry, Flow};
pub use config::{ConfigError, RepeatConfig};
pub use engine::ERROR_CLASS;
pub use error::{RepeatError, Result};
pub use instruction::{Instruction, InstructionCache, InstructionError, InstructionReader, Test};
pub use pattern::{Evaluator, Evaluators, Pattern, PatternContext, PatternEnv, PatternError, Token};
pub use repeater::{EventOrigin, IndexDependency, ItemEvent, ItemEventKind, Repeater, RepeaterBuilder};
pub use runtime::{RepeatRuntime, RepeaterId, SourceId, AUTOCLONE_ATTR, ITEM_ATTR, TARGET_ATTR};
pub use template::{Choice, Rule, Template, TemplateDescriptor, TemplateError, TemplateSet};
