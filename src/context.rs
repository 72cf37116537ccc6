// src/context.rs
use crate::document::{DocumentOps, NodeHandle};
use crate::value::{Record, Value};
use std::sync::Arc;

/// Carrier of "where evaluation currently stands": the document plus the
/// current working value. Contexts are derived, never mutated — every
/// nesting boundary (iteration, sub-collection, step transition) clones
/// with a new current value, so nested evaluation cannot disturb its
/// parent.
#[derive(Clone)]
pub struct ExecutionContext {
    doc: Arc<dyn DocumentOps>,
    current: Value,
    iteration: Option<Record>,
}

impl ExecutionContext {
    pub fn new(doc: Arc<dyn DocumentOps>) -> Self {
        ExecutionContext {
            doc,
            current: Value::Null,
            iteration: None,
        }
    }

    pub fn doc(&self) -> &Arc<dyn DocumentOps> {
        &self.doc
    }

    pub fn current(&self) -> &Value {
        &self.current
    }

    /// The combination record of the enclosing option iteration, if any.
    pub fn iteration(&self) -> Option<&Record> {
        self.iteration.as_ref()
    }

    /// Clone-with-update: same document, new current value.
    pub fn derive(&self, current: Value) -> Self {
        ExecutionContext {
            doc: Arc::clone(&self.doc),
            current,
            iteration: self.iteration.clone(),
        }
    }

    /// Clone-with-update carrying an option-combination record.
    pub fn with_iteration(&self, iteration: Record) -> Self {
        ExecutionContext {
            doc: Arc::clone(&self.doc),
            current: self.current.clone(),
            iteration: Some(iteration),
        }
    }

    /// The nodes the current value stands for. An unset current value
    /// resolves to the document root.
    pub fn current_nodes(&self) -> Vec<NodeHandle> {
        if matches!(self.current, Value::Null) {
            return vec![self.doc.root()];
        }
        self.current.nodes()
    }

    /// The single node to scope lookups to: the first current node, or the
    /// document root when the current value holds none.
    pub fn scope_node(&self) -> NodeHandle {
        self.current_nodes()
            .first()
            .copied()
            .unwrap_or_else(|| self.doc.root())
    }
}
