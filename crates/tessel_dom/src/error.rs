use thiserror::Error;

use crate::NodeId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("node {0:?} does not exist")]
    NodeNotFound(NodeId),

    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("child index {index} out of range for {len} children")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("inserting {child:?} under {parent:?} would create a cycle")]
    HierarchyCycle { parent: NodeId, child: NodeId },

    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),
}
