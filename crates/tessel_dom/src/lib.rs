//! Tessel DOM
//!
//! A headless document tree. Nodes live in a slot-map arena and are addressed
//! by [`NodeId`]; elements carry ordered attributes, runtime properties and a
//! hidden flag. Fragments behave like detached containers: inserting one moves
//! its children, which makes batched insertion a single operation.
//!
//! [`DomStats`] counts structural operations so callers can assert how much
//! work an update did.

pub mod builder;
pub mod document;
pub mod error;
pub mod node;

pub use builder::{el, ElementBuilder};
pub use document::Document;
pub use error::DomError;
pub use node::{DomStats, Element, NodeData, NodeId, NodeKind};
