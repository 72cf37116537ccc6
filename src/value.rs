// src/value.rs
use crate::document::{DocumentOps, NodeHandle};
use futures::future::LocalBoxFuture;

/// An insertion-ordered set of named values, the shape of one extracted row.
pub type Record = Vec<(String, Value)>;

/// The dynamic result threaded through a pipeline. A step receives the
/// previous step's `Value` as its working input and produces the next one.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Str(String),
    List(Vec<Value>),
    Record(Record),
    Node(NodeHandle),
}

impl Value {
    /// Empty means "nothing was extracted": either no value at all or a
    /// list that matched nothing. Defaulting and require steps key off this.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Coerces the value to a list of items. `Null` contributes nothing,
    /// a list contributes its elements, anything else is a one-item list.
    pub fn into_items(self) -> Vec<Value> {
        match self {
            Value::Null => Vec::new(),
            Value::List(items) => items,
            other => vec![other],
        }
    }

    /// Borrowing variant of [`Value::into_items`].
    pub fn items(&self) -> Vec<Value> {
        self.clone().into_items()
    }

    /// Node handles contained in this value, in order. Non-node items are
    /// skipped; nested lists and record values are searched.
    pub fn nodes(&self) -> Vec<NodeHandle> {
        fn collect(value: &Value, out: &mut Vec<NodeHandle>) {
            match value {
                Value::Node(handle) => out.push(*handle),
                Value::List(items) => {
                    for item in items {
                        collect(item, out);
                    }
                }
                Value::Record(fields) => {
                    for (_, item) in fields {
                        collect(item, out);
                    }
                }
                _ => {}
            }
        }
        let mut out = Vec::new();
        collect(self, &mut out);
        out
    }

    /// Looks a field up by name on a record value.
    pub fn record_get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Renders the value as JSON for output. Node handles render as their
    /// outer HTML so stored records stay self-contained.
    pub fn render<'a>(&'a self, doc: &'a dyn DocumentOps) -> LocalBoxFuture<'a, serde_json::Value> {
        Box::pin(async move {
            match self {
                Value::Null => serde_json::Value::Null,
                Value::Bool(flag) => serde_json::Value::Bool(*flag),
                Value::Str(text) => serde_json::Value::String(text.clone()),
                Value::List(items) => {
                    let mut rendered = Vec::with_capacity(items.len());
                    for item in items {
                        rendered.push(item.render(doc).await);
                    }
                    serde_json::Value::Array(rendered)
                }
                Value::Record(fields) => {
                    let mut map = serde_json::Map::new();
                    for (name, value) in fields {
                        map.insert(name.clone(), value.render(doc).await);
                    }
                    serde_json::Value::Object(map)
                }
                Value::Node(handle) => match doc.read_property(*handle, "outerHtml").await {
                    Some(Value::Str(html)) => serde_json::Value::String(html),
                    _ => serde_json::Value::Null,
                },
            }
        })
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Str(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Str(text)
    }
}
