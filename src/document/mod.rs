// src/document/mod.rs
pub mod html;

use crate::utils::error::ExtractError;
use crate::value::Value;
use async_trait::async_trait;

pub use html::HtmlDocument;

/// Opaque handle to one node of a backing document. Handles are only
/// meaningful to the document that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub(crate) usize);

/// The document capability the engine runs against: selector lookup,
/// property reads, and choice activation. The engine assumes nothing about
/// the query language beyond "string expression in, node list out".
///
/// All operations are async so a live-session backend can slot in; the
/// engine awaits them strictly sequentially (no internal parallelism).
#[async_trait(?Send)]
pub trait DocumentOps {
    /// The document root node.
    fn root(&self) -> NodeHandle;

    /// All nodes under `scope` matching a CSS-like selector expression.
    async fn query_all(&self, scope: NodeHandle, selector: &str)
        -> Result<Vec<NodeHandle>, ExtractError>;

    /// All nodes under `scope` matching a path expression like
    /// `/html/body/div[2]`. Indexes are 1-based; a segment without an
    /// index keeps every matching child.
    async fn query_by_path(&self, scope: NodeHandle, path: &str)
        -> Result<Vec<NodeHandle>, ExtractError>;

    /// Reads a named property off a node. `None` means the node has no
    /// such property; callers compact missing values away.
    async fn read_property(&self, node: NodeHandle, name: &str) -> Option<Value>;

    /// Makes one choice of an option group the active one. The new state
    /// must be observable through `read_property(group, "value")`.
    async fn activate_choice(&self, group: NodeHandle, value: &Value)
        -> Result<(), ExtractError>;

    /// Lowercased element name, if the node is an element.
    async fn tag_name(&self, node: NodeHandle) -> Option<String>;

    /// Raw attribute value, if present.
    async fn attribute(&self, node: NodeHandle, name: &str) -> Option<String>;
}
