//! Tessel Core
//!
//! Foundational pieces shared by the Tessel crates:
//!
//! - **Values**: slot values are `serde_json::Value`, with the loose truthiness,
//!   stringification and coercion rules the pattern language relies on
//! - **Comparison**: the operator set used by template rules and instruction tests
//! - **Data sources**: an ordered, mutable list that reports one [`ListEvent`]
//!   per mutation
//! - **Clocks**: injectable time plus a cancellable [`Debounced`] task
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use tessel_core::{DataSource, ListEvent};
//!
//! let mut list = DataSource::from_values(vec![json!("red"), json!("blue")]);
//! let event = list.insert(1, json!("green")).unwrap();
//!
//! assert_eq!(event, ListEvent::New { index: 1, value: json!("green") });
//! assert_eq!(list.len(), 3);
//! ```

pub mod clock;
pub mod compare;
pub mod data;
pub mod value;

pub use clock::{Clock, Debounced, ManualClock, SystemClock};
pub use compare::{compare, split_on_operator, CompareError, CompareOp};
pub use data::{DataError, DataSource, ListEvent, ListEventKind};
pub use value::{display_string, is_empty, is_truthy, loose_eq, nested_get, string_to_primitive};

/// Re-exported so downstream crates agree on the slot value type
pub use serde_json::Value;
