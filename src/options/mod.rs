// src/options/mod.rs
pub mod combinations;

use crate::context::ExecutionContext;
use crate::document::{DocumentOps, NodeHandle};
use crate::query::Query;
use crate::utils::error::ExtractError;
use crate::value::Value;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::sync::Arc;

pub use combinations::CombinationStream;

/// Declares one selectable option group: an identifier for its fields in
/// the output records, plus how to find the group element.
#[derive(Debug, Clone)]
pub struct OptionDecl {
    pub identifier: String,
    pub source: OptionSource,
}

#[derive(Debug, Clone)]
pub enum OptionSource {
    /// A selector expression resolved against the current scope.
    Selector(String),
    /// A pre-built query whose first matched node is the group element.
    Query(Query),
}

impl OptionDecl {
    pub fn selector(identifier: impl Into<String>, selector: impl Into<String>) -> Self {
        OptionDecl {
            identifier: identifier.into(),
            source: OptionSource::Selector(selector.into()),
        }
    }

    pub fn query(identifier: impl Into<String>, query: Query) -> Self {
        OptionDecl {
            identifier: identifier.into(),
            source: OptionSource::Query(query),
        }
    }
}

/// One row of one option group's enumerable choices.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionChoice {
    /// What activation sends to the document.
    pub value: Value,
    /// What the choice shows to a reader.
    pub display: Value,
}

impl OptionChoice {
    /// The stand-in for a group with no natural choices, so a product over
    /// several groups never collapses to zero.
    pub fn placeholder() -> Self {
        OptionChoice {
            value: Value::Null,
            display: Value::Null,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.value == Value::Null && self.display == Value::Null
    }
}

/// Enumerates and activates the choices of one option-group shape.
#[async_trait(?Send)]
pub trait OptionStrategy {
    fn name(&self) -> &'static str;

    /// Shape predicate: does this strategy understand the group node?
    async fn matches(&self, doc: &dyn DocumentOps, node: NodeHandle) -> bool;

    async fn choices(
        &self,
        doc: &dyn DocumentOps,
        node: NodeHandle,
    ) -> Result<Vec<OptionChoice>, ExtractError>;

    async fn activate(
        &self,
        doc: &dyn DocumentOps,
        node: NodeHandle,
        choice: &OptionChoice,
    ) -> Result<(), ExtractError>;
}

/// Ordered, first-match-wins dispatch over option strategies. The
/// catch-all sits last, so lookup always resolves.
pub struct OptionStrategyRegistry {
    strategies: Vec<Arc<dyn OptionStrategy>>,
}

impl OptionStrategyRegistry {
    pub fn new() -> Self {
        OptionStrategyRegistry {
            strategies: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = OptionStrategyRegistry::new();
        registry.add(Arc::new(SelectListStrategy));
        registry.add(Arc::new(ToggleStrategy));
        registry.add(Arc::new(ChoiceGroupStrategy));
        registry.add(Arc::new(MissingStrategy));
        registry
    }

    pub fn add(&mut self, strategy: Arc<dyn OptionStrategy>) {
        self.strategies.push(strategy);
    }

    pub async fn lookup(
        &self,
        doc: &dyn DocumentOps,
        node: NodeHandle,
    ) -> Result<Arc<dyn OptionStrategy>, ExtractError> {
        for strategy in &self.strategies {
            if strategy.matches(doc, node).await {
                tracing::debug!("option group {:?} matched strategy '{}'", node, strategy.name());
                return Ok(Arc::clone(strategy));
            }
        }
        Err(ExtractError::StrategyExhausted(format!(
            "no option strategy accepts node {:?}",
            node
        )))
    }
}

impl Default for OptionStrategyRegistry {
    fn default() -> Self {
        OptionStrategyRegistry::with_defaults()
    }
}

/// One resolved option group. The strategy is looked up on first use and
/// cached for the rest of the group's life.
pub struct OptionGroup {
    identifier: String,
    node: Option<NodeHandle>,
    strategy: OnceCell<Arc<dyn OptionStrategy>>,
}

impl OptionGroup {
    pub fn new(identifier: impl Into<String>, node: Option<NodeHandle>) -> Self {
        OptionGroup {
            identifier: identifier.into(),
            node,
            strategy: OnceCell::new(),
        }
    }

    /// Finds the group element a declaration points at. A source that
    /// matches nothing yields a group with no node (and so one
    /// placeholder choice), never an error.
    pub async fn resolve(
        decl: &OptionDecl,
        ctx: &ExecutionContext,
    ) -> Result<OptionGroup, ExtractError> {
        let node = match &decl.source {
            OptionSource::Selector(selector) => ctx
                .doc()
                .query_all(ctx.scope_node(), selector)
                .await
                .map_err(|e| ExtractError::scoped(decl.identifier.clone(), e))?
                .into_iter()
                .next(),
            OptionSource::Query(query) => query
                .call(ctx)
                .await
                .map_err(|e| ExtractError::scoped(decl.identifier.clone(), e))?
                .nodes()
                .into_iter()
                .next(),
        };
        if node.is_none() {
            tracing::debug!("option group '{}' matched no element", decl.identifier);
        }
        Ok(OptionGroup::new(decl.identifier.clone(), node))
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn resolve_strategy(
        &self,
        doc: &dyn DocumentOps,
        registry: &OptionStrategyRegistry,
    ) -> Result<Arc<dyn OptionStrategy>, ExtractError> {
        if let Some(cached) = self.strategy.get() {
            return Ok(Arc::clone(cached));
        }
        let node = match self.node {
            Some(node) => node,
            None => {
                return Err(ExtractError::StrategyExhausted(format!(
                    "option group '{}' has no element",
                    self.identifier
                )))
            }
        };
        let resolved = registry.lookup(doc, node).await?;
        let _ = self.strategy.set(Arc::clone(&resolved));
        Ok(resolved)
    }

    /// The group's enumerable choices. Groups without an element fall back
    /// to the single placeholder choice.
    pub async fn choices(
        &self,
        doc: &dyn DocumentOps,
        registry: &OptionStrategyRegistry,
    ) -> Result<Vec<OptionChoice>, ExtractError> {
        let node = match self.node {
            Some(node) => node,
            None => return Ok(vec![OptionChoice::placeholder()]),
        };
        let strategy = self.resolve_strategy(doc, registry).await?;
        strategy.choices(doc, node).await
    }

    /// Makes one choice the active one. Placeholder choices activate
    /// nothing.
    pub async fn activate(
        &self,
        doc: &dyn DocumentOps,
        registry: &OptionStrategyRegistry,
        choice: &OptionChoice,
    ) -> Result<(), ExtractError> {
        if choice.is_placeholder() {
            return Ok(());
        }
        let node = match self.node {
            Some(node) => node,
            None => return Ok(()),
        };
        let strategy = self.resolve_strategy(doc, registry).await?;
        strategy.activate(doc, node, choice).await
    }
}

/// `<select>` drop-down: one choice per `<option>` child.
struct SelectListStrategy;

#[async_trait(?Send)]
impl OptionStrategy for SelectListStrategy {
    fn name(&self) -> &'static str {
        "select-list"
    }

    async fn matches(&self, doc: &dyn DocumentOps, node: NodeHandle) -> bool {
        doc.tag_name(node).await.as_deref() == Some("select")
    }

    async fn choices(
        &self,
        doc: &dyn DocumentOps,
        node: NodeHandle,
    ) -> Result<Vec<OptionChoice>, ExtractError> {
        let mut choices = Vec::new();
        for option in doc.query_all(node, "option").await? {
            let display = doc
                .read_property(option, "text")
                .await
                .unwrap_or(Value::Null);
            let value = match doc.attribute(option, "value").await {
                Some(value) => Value::Str(value),
                None => display.clone(),
            };
            choices.push(OptionChoice { value, display });
        }
        Ok(choices)
    }

    async fn activate(
        &self,
        doc: &dyn DocumentOps,
        node: NodeHandle,
        choice: &OptionChoice,
    ) -> Result<(), ExtractError> {
        doc.activate_choice(node, &choice.value).await
    }
}

/// Checkbox: exactly two choices, on and off.
struct ToggleStrategy;

#[async_trait(?Send)]
impl OptionStrategy for ToggleStrategy {
    fn name(&self) -> &'static str {
        "toggle"
    }

    async fn matches(&self, doc: &dyn DocumentOps, node: NodeHandle) -> bool {
        doc.tag_name(node).await.as_deref() == Some("input")
            && doc.attribute(node, "type").await.as_deref() == Some("checkbox")
    }

    async fn choices(
        &self,
        _doc: &dyn DocumentOps,
        _node: NodeHandle,
    ) -> Result<Vec<OptionChoice>, ExtractError> {
        Ok(vec![
            OptionChoice {
                value: Value::Bool(true),
                display: Value::Bool(true),
            },
            OptionChoice {
                value: Value::Bool(false),
                display: Value::Bool(false),
            },
        ])
    }

    async fn activate(
        &self,
        doc: &dyn DocumentOps,
        node: NodeHandle,
        choice: &OptionChoice,
    ) -> Result<(), ExtractError> {
        doc.activate_choice(node, &choice.value).await
    }
}

/// A container whose choices are child elements carrying `data-value`
/// markers (tab strips, swatch lists, radio-like button rows).
struct ChoiceGroupStrategy;

#[async_trait(?Send)]
impl OptionStrategy for ChoiceGroupStrategy {
    fn name(&self) -> &'static str {
        "choice-group"
    }

    async fn matches(&self, doc: &dyn DocumentOps, node: NodeHandle) -> bool {
        matches!(doc.query_all(node, "[data-value]").await, Ok(found) if !found.is_empty())
    }

    async fn choices(
        &self,
        doc: &dyn DocumentOps,
        node: NodeHandle,
    ) -> Result<Vec<OptionChoice>, ExtractError> {
        let mut choices = Vec::new();
        for child in doc.query_all(node, "[data-value]").await? {
            let value = doc
                .attribute(child, "data-value")
                .await
                .map(Value::Str)
                .unwrap_or(Value::Null);
            let display = doc
                .read_property(child, "text")
                .await
                .unwrap_or(Value::Null);
            choices.push(OptionChoice { value, display });
        }
        Ok(choices)
    }

    async fn activate(
        &self,
        doc: &dyn DocumentOps,
        node: NodeHandle,
        choice: &OptionChoice,
    ) -> Result<(), ExtractError> {
        doc.activate_choice(node, &choice.value).await
    }
}

/// Catch-all: an unrecognized group shape contributes one placeholder
/// choice and activates nothing.
struct MissingStrategy;

#[async_trait(?Send)]
impl OptionStrategy for MissingStrategy {
    fn name(&self) -> &'static str {
        "missing"
    }

    async fn matches(&self, _doc: &dyn DocumentOps, _node: NodeHandle) -> bool {
        true
    }

    async fn choices(
        &self,
        _doc: &dyn DocumentOps,
        _node: NodeHandle,
    ) -> Result<Vec<OptionChoice>, ExtractError> {
        Ok(vec![OptionChoice::placeholder()])
    }

    async fn activate(
        &self,
        _doc: &dyn DocumentOps,
        _node: NodeHandle,
        _choice: &OptionChoice,
    ) -> Result<(), ExtractError> {
        Ok(())
    }
}
