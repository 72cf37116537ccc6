// src/collection/mod.rs
pub mod collector;

use crate::context::ExecutionContext;
use crate::interpreter;
use crate::query::Query;
use crate::registry::Registries;
use crate::utils::error::ExtractError;
use crate::value::{Record, Value};
use futures::future::LocalBoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub use collector::{Accessor, Collector};

/// A caller-supplied extraction function entry.
pub type CollectionFn =
    Arc<dyn Fn(ExecutionContext) -> LocalBoxFuture<'static, Result<Value, ExtractError>>>;

/// Transforms a collection's raw output into its final shape.
pub type PostProcessor = Arc<dyn Fn(Value) -> Result<Value, ExtractError>>;

/// One named entry of a collection: an expression compiled on demand, a
/// pre-built query, or plain user code.
#[derive(Clone)]
pub enum Entry {
    Expr(String),
    Query(Query),
    Func(CollectionFn),
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Expr(expr) => write!(f, "Expr({:?})", expr),
            Entry::Query(query) => write!(f, "Query(steps={})", query.steps.len()),
            Entry::Func(_) => write!(f, "Func"),
        }
    }
}

/// Wraps an async closure into a collection entry.
pub fn entry_fn<F, Fut>(f: F) -> Entry
where
    F: Fn(ExecutionContext) -> Fut + 'static,
    Fut: Future<Output = Result<Value, ExtractError>> + 'static,
{
    Entry::Func(Arc::new(move |ctx| Box::pin(f(ctx))))
}

/// Ordered named entries; insertion order is execution order.
pub type CollectionSpec = Vec<(String, Entry)>;

/// A named map of independent queries executed against one context,
/// followed by an ordered post-processor chain. Calling a collection is
/// repeatable: the result is purely a function of the entries and the
/// context.
#[derive(Clone)]
pub struct Collection {
    registries: Arc<Registries>,
    entries: CollectionSpec,
    post: Vec<PostProcessor>,
}

impl Collection {
    pub fn new(registries: Arc<Registries>, entries: CollectionSpec) -> Self {
        Collection {
            registries,
            entries,
            post: Vec::new(),
        }
    }

    /// Appends a post-processor; processors run in attachment order, each
    /// receiving the previous stage's output.
    pub fn with_post(mut self, post: PostProcessor) -> Self {
        self.post.push(post);
        self
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    /// Executes every entry in insertion order, then the post chain. An
    /// entry failure is wrapped with that entry's field name; a
    /// post-processor failure with the collection itself.
    pub fn call<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
    ) -> LocalBoxFuture<'a, Result<Value, ExtractError>> {
        Box::pin(async move {
            let mut record: Record = Vec::with_capacity(self.entries.len());
            for (name, entry) in &self.entries {
                let result = match entry {
                    Entry::Expr(expr) => match interpreter::interpret(&self.registries, expr) {
                        Ok(query) => query.call(ctx).await,
                        Err(err) => Err(err),
                    },
                    Entry::Query(query) => query.call(ctx).await,
                    Entry::Func(func) => func(ctx.clone()).await,
                };
                let value =
                    result.map_err(|e| ExtractError::scoped(name.clone(), e))?;
                record.push((name.clone(), value));
            }

            let mut output = Value::Record(record);
            for post in &self.post {
                output = post(output).map_err(|e| {
                    let inner = match e {
                        ExtractError::PostProcess(_) => e,
                        other => ExtractError::PostProcess(other.to_string()),
                    };
                    ExtractError::scoped("Collection", inner)
                })?;
            }
            Ok(output)
        })
    }
}

/// Post-processor: squash heterogeneous matches into the flat sequence of
/// element nodes they contain, in order.
pub fn flatten_to_elements() -> PostProcessor {
    Arc::new(|value| {
        Ok(Value::List(
            value.nodes().into_iter().map(Value::Node).collect(),
        ))
    })
}

/// Post-processor: expand a record of per-option choice lists into the
/// full list of combination records (pure data, no activation). Empty
/// choice lists contribute a single null so the product never drops to
/// zero.
pub fn expand_option_combinations() -> PostProcessor {
    Arc::new(|value| {
        let fields = match value {
            Value::Record(fields) => fields,
            other => {
                return Err(ExtractError::PostProcess(format!(
                    "expected a record of option lists, got {:?}",
                    other
                )))
            }
        };
        let sets: Vec<(String, Vec<Value>)> = fields
            .into_iter()
            .map(|(name, value)| {
                let mut items = value.into_items();
                if items.is_empty() {
                    items.push(Value::Null);
                }
                (name, items)
            })
            .collect();

        let mut combinations = Vec::new();
        if sets.is_empty() {
            combinations.push(Value::Record(Vec::new()));
            return Ok(Value::List(combinations));
        }

        let mut indexes = vec![0usize; sets.len()];
        let mut done = false;
        while !done {
            combinations.push(Value::Record(
                sets.iter()
                    .zip(&indexes)
                    .map(|((name, items), &index)| (name.clone(), items[index].clone()))
                    .collect(),
            ));
            let mut position = sets.len() - 1;
            loop {
                indexes[position] += 1;
                if indexes[position] < sets[position].1.len() {
                    break;
                }
                indexes[position] = 0;
                if position == 0 {
                    done = true;
                    break;
                }
                position -= 1;
            }
        }
        Ok(Value::List(combinations))
    })
}
