//! Ordered data sources
//!
//! A [`DataSource`] is a list of slot values that reports exactly one
//! [`ListEvent`] per mutation. Events carry the index they apply to and,
//! where relevant, the new and previous values, so a consumer can mirror the
//! list without re-reading it.

use serde_json::Value;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// A single list mutation
#[derive(Clone, Debug, PartialEq)]
pub enum ListEvent {
    /// A value was inserted at `index`
    New { index: usize, value: Value },
    /// The value at `index` was replaced
    Change { index: usize, value: Value, old: Value },
    /// The value at `index` was removed
    Delete { index: usize, old: Value },
    /// A value moved from `from` to `to` (indices in the final list)
    Move { from: usize, to: usize },
    /// The value at `index` should be re-rendered without changing
    Update { index: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListEventKind {
    New,
    Change,
    Delete,
    Move,
    Update,
}

impl ListEvent {
    pub fn kind(&self) -> ListEventKind {
        match self {
            ListEvent::New { .. } => ListEventKind::New,
            ListEvent::Change { .. } => ListEventKind::Change,
            ListEvent::Delete { .. } => ListEventKind::Delete,
            ListEvent::Move { .. } => ListEventKind::Move,
            ListEvent::Update { .. } => ListEventKind::Update,
        }
    }

    /// The primary index of the event (`to` for moves)
    pub fn index(&self) -> usize {
        match self {
            ListEvent::New { index, .. }
            | ListEvent::Change { index, .. }
            | ListEvent::Delete { index, .. }
            | ListEvent::Update { index } => *index,
            ListEvent::Move { to, .. } => *to,
        }
    }
}

/// An ordered, versioned list of slot values
#[derive(Clone, Debug, Default)]
pub struct DataSource {
    items: Vec<Value>,
    version: u64,
}

impl DataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(items: Vec<Value>) -> Self {
        Self { items, version: 0 }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }

    pub fn values(&self) -> &[Value] {
        &self.items
    }

    /// Incremented on every structural or value change
    pub fn version(&self) -> u64 {
        self.version
    }

    fn bump(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    fn check(&self, index: usize, len: usize) -> Result<(), DataError> {
        if index < len {
            Ok(())
        } else {
            Err(DataError::IndexOutOfRange {
                index,
                len: self.items.len(),
            })
        }
    }

    pub fn push(&mut self, value: Value) -> ListEvent {
        let index = self.items.len();
        self.items.push(value.clone());
        self.bump();
        trace!(index, "data: push");
        ListEvent::New { index, value }
    }

    pub fn insert(&mut self, index: usize, value: Value) -> Result<ListEvent, DataError> {
        self.check(index, self.items.len() + 1)?;
        self.items.insert(index, value.clone());
        self.bump();
        trace!(index, "data: insert");
        Ok(ListEvent::New { index, value })
    }

    /// Replace the value at `index`. Setting one past the end appends.
    pub fn set(&mut self, index: usize, value: Value) -> Result<ListEvent, DataError> {
        if index == self.items.len() {
            return Ok(self.push(value));
        }
        self.check(index, self.items.len())?;
        let old = std::mem::replace(&mut self.items[index], value.clone());
        self.bump();
        trace!(index, "data: set");
        Ok(ListEvent::Change { index, value, old })
    }

    pub fn remove(&mut self, index: usize) -> Result<ListEvent, DataError> {
        self.check(index, self.items.len())?;
        let old = self.items.remove(index);
        self.bump();
        trace!(index, "data: remove");
        Ok(ListEvent::Delete { index, old })
    }

    /// Move the value at `from` so it ends up at `to`
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<ListEvent, DataError> {
        let len = self.items.len();
        self.check(from, len)?;
        self.check(to, len)?;
        let value = self.items.remove(from);
        self.items.insert(to, value);
        self.bump();
        trace!(from, to, "data: move");
        Ok(ListEvent::Move { from, to })
    }

    /// Request a re-render of `index` without touching the value
    pub fn touch(&mut self, index: usize) -> Result<ListEvent, DataError> {
        self.check(index, self.items.len())?;
        Ok(ListEvent::Update { index })
    }

    /// Swap the whole list in one step. No per-item events are produced;
    /// consumers are expected to rebuild.
    pub fn replace_all(&mut self, items: Vec<Value>) {
        self.items = items;
        self.bump();
        trace!(len = self.items.len(), "data: replace_all");
    }
}
