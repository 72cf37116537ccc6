// src/document/html.rs
use crate::document::{DocumentOps, NodeHandle};
use crate::utils::error::ExtractError;
use crate::value::Value;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// In-memory HTML backend built on `scraper`.
///
/// Node handles are interned ids over the parsed tree. Activation state
/// lives in a side table keyed by group handle, so `activate_choice`
/// followed by `read_property(group, "value")` observes the live choice
/// even though the parsed tree itself is immutable.
pub struct HtmlDocument {
    html: Html,
    state: Mutex<DocState>,
}

#[derive(Default)]
struct DocState {
    nodes: Vec<ego_tree::NodeId>,
    handles: HashMap<ego_tree::NodeId, usize>,
    selectors: HashMap<String, Selector>,
    activated: HashMap<NodeHandle, Value>,
}

impl HtmlDocument {
    pub fn parse(html: &str) -> Self {
        let html = Html::parse_document(html);
        let doc = HtmlDocument {
            html,
            state: Mutex::new(DocState::default()),
        };
        // Handle 0 is always the root element.
        let root_id = doc.html.root_element().id();
        doc.state().intern(root_id);
        doc
    }

    fn state(&self) -> MutexGuard<'_, DocState> {
        self.state.lock().expect("document state lock poisoned")
    }

    fn element(&self, handle: NodeHandle) -> Option<ElementRef<'_>> {
        let id = *self.state().nodes.get(handle.0)?;
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    fn intern_all(&self, ids: impl IntoIterator<Item = ego_tree::NodeId>) -> Vec<NodeHandle> {
        let mut state = self.state();
        ids.into_iter().map(|id| state.intern(id)).collect()
    }

    fn selector(&self, expr: &str) -> Result<Selector, ExtractError> {
        let mut state = self.state();
        if let Some(cached) = state.selectors.get(expr) {
            return Ok(cached.clone());
        }
        let selector = Selector::parse(expr).map_err(|e| {
            ExtractError::Expression(format!("invalid selector '{}': {:?}", expr, e))
        })?;
        state.selectors.insert(expr.to_string(), selector.clone());
        Ok(selector)
    }

    /// The value most recently activated on a group, if any. Mainly for
    /// inspection; extraction code reads it through `read_property`.
    pub fn activated_value(&self, group: NodeHandle) -> Option<Value> {
        self.state().activated.get(&group).cloned()
    }
}

impl DocState {
    fn intern(&mut self, id: ego_tree::NodeId) -> NodeHandle {
        if let Some(&index) = self.handles.get(&id) {
            return NodeHandle(index);
        }
        let index = self.nodes.len();
        self.nodes.push(id);
        self.handles.insert(id, index);
        NodeHandle(index)
    }
}

#[async_trait(?Send)]
impl DocumentOps for HtmlDocument {
    fn root(&self) -> NodeHandle {
        NodeHandle(0)
    }

    async fn query_all(
        &self,
        scope: NodeHandle,
        selector: &str,
    ) -> Result<Vec<NodeHandle>, ExtractError> {
        let compiled = self.selector(selector)?;
        let scope_el = self.element(scope).ok_or_else(|| {
            ExtractError::Expression(format!("scope node {:?} is not an element", scope))
        })?;
        let ids: Vec<_> = scope_el.select(&compiled).map(|el| el.id()).collect();
        tracing::trace!("selector '{}' matched {} node(s)", selector, ids.len());
        Ok(self.intern_all(ids))
    }

    async fn query_by_path(
        &self,
        scope: NodeHandle,
        path: &str,
    ) -> Result<Vec<NodeHandle>, ExtractError> {
        let scope_el = self.element(scope).ok_or_else(|| {
            ExtractError::Expression(format!("scope node {:?} is not an element", scope))
        })?;

        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
        // An absolute path may start with the scope's own tag ("/html/...").
        if let Some(first) = segments.peek() {
            let (name, _) = split_path_segment(first)?;
            if name.eq_ignore_ascii_case(scope_el.value().name()) {
                segments.next();
            }
        }

        let mut current = vec![scope_el];
        for segment in segments {
            let (name, index) = split_path_segment(segment)?;
            let mut next = Vec::new();
            for el in &current {
                let matching = el
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|child| child.value().name().eq_ignore_ascii_case(name));
                match index {
                    Some(n) => next.extend(matching.skip(n - 1).take(1)),
                    None => next.extend(matching),
                }
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }

        tracing::trace!("path '{}' matched {} node(s)", path, current.len());
        Ok(self.intern_all(current.into_iter().map(|el| el.id())))
    }

    async fn read_property(&self, node: NodeHandle, name: &str) -> Option<Value> {
        let el = self.element(node)?;
        match name {
            "text" | "textContent" => {
                Some(Value::Str(el.text().collect::<String>().trim().to_string()))
            }
            "html" | "innerHtml" => Some(Value::Str(el.inner_html())),
            "outerHtml" => Some(Value::Str(el.html())),
            "tag" | "name" => Some(Value::Str(el.value().name().to_string())),
            "value" => match self.state().activated.get(&node) {
                Some(active) => Some(active.clone()),
                None => el.value().attr("value").map(Value::from),
            },
            attr => el.value().attr(attr).map(Value::from),
        }
    }

    async fn activate_choice(
        &self,
        group: NodeHandle,
        value: &Value,
    ) -> Result<(), ExtractError> {
        tracing::debug!("activating choice {:?} on group {:?}", value, group);
        self.state().activated.insert(group, value.clone());
        Ok(())
    }

    async fn tag_name(&self, node: NodeHandle) -> Option<String> {
        self.element(node).map(|el| el.value().name().to_lowercase())
    }

    async fn attribute(&self, node: NodeHandle, name: &str) -> Option<String> {
        self.element(node)
            .and_then(|el| el.value().attr(name).map(String::from))
    }
}

/// Splits one path segment into `(tag, 1-based index)`.
fn split_path_segment(segment: &str) -> Result<(&str, Option<usize>), ExtractError> {
    match segment.split_once('[') {
        None => Ok((segment, None)),
        Some((name, rest)) => {
            let digits = rest.strip_suffix(']').ok_or_else(|| {
                ExtractError::Expression(format!("malformed path segment '{}'", segment))
            })?;
            let index: usize = digits.parse().map_err(|_| {
                ExtractError::Expression(format!("malformed path index in '{}'", segment))
            })?;
            if index == 0 {
                return Err(ExtractError::Expression(format!(
                    "path indexes are 1-based, got '{}'",
                    segment
                )));
            }
            Ok((name, Some(index)))
        }
    }
}
