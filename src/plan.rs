// src/plan.rs
use crate::collection::{Collection, CollectionSpec, Collector, Entry};
use crate::context::ExecutionContext;
use crate::options::OptionDecl;
use crate::registry::Registries;
use crate::utils::error::AppError;
use crate::value::Value;
use serde::Deserialize;
use std::sync::Arc;

/// A JSON extraction plan.
///
/// `fields` maps output names to mini-language expressions. With `each`,
/// the per-element fields run once per node the selector matches. With
/// `options`, `fields` run once per combination of the declared option
/// groups, against the live activated state, and every record carries the
/// current `selection`.
#[derive(Debug, Deserialize)]
pub struct PlanSpec {
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub each: Option<EachSpec>,

    #[serde(default)]
    pub options: Vec<OptionSpec>,
}

#[derive(Debug, Deserialize)]
pub struct EachSpec {
    pub selector: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct OptionSpec {
    pub id: String,
    pub selector: String,
}

/// A plan compiled onto the engine: page-level fields and/or a collector
/// producing row records.
pub struct CompiledPlan {
    page: Option<Collection>,
    items: Option<Collector>,
}

impl std::fmt::Debug for CompiledPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPlan")
            .field("page", &self.page.is_some())
            .field("items", &self.items.is_some())
            .finish()
    }
}

/// What one plan run produced.
#[derive(Debug)]
pub struct PlanOutput {
    pub page: Option<Value>,
    pub items: Option<Value>,
}

impl PlanSpec {
    pub fn from_json(text: &str) -> Result<Self, AppError> {
        serde_json::from_str(text).map_err(|e| AppError::Plan(e.to_string()))
    }

    pub fn compile(&self, registries: &Arc<Registries>) -> Result<CompiledPlan, AppError> {
        if !self.options.is_empty() && self.each.is_some() {
            return Err(AppError::Plan(
                "'each' and 'options' cannot be combined in one plan".to_string(),
            ));
        }

        if !self.options.is_empty() {
            let decls: Vec<OptionDecl> = self
                .options
                .iter()
                .map(|spec| OptionDecl::selector(&spec.id, &spec.selector))
                .collect();
            let base = Collector::over_options(
                Arc::clone(registries),
                decls,
                Collection::new(Arc::clone(registries), Vec::new()),
            );
            // `iterate` merges the plan fields with the pre-registered
            // selection entry, so each row shows its combination.
            let items = base.iterate(entries_from(&self.fields)?);
            return Ok(CompiledPlan {
                page: None,
                items: Some(items),
            });
        }

        let page = if self.fields.is_empty() {
            None
        } else {
            Some(Collection::new(
                Arc::clone(registries),
                entries_from(&self.fields)?,
            ))
        };

        let items = match &self.each {
            None => None,
            Some(each) => Some(
                Collector::over_elements(
                    Arc::clone(registries),
                    &each.selector,
                    Collection::new(Arc::clone(registries), entries_from(&each.fields)?),
                )
                .map_err(AppError::Extraction)?,
            ),
        };

        Ok(CompiledPlan { page, items })
    }
}

impl CompiledPlan {
    pub async fn run(&self, ctx: &ExecutionContext) -> Result<PlanOutput, AppError> {
        let page = match &self.page {
            None => None,
            Some(collection) => Some(collection.call(ctx).await?),
        };
        let items = match &self.items {
            None => None,
            Some(collector) => Some(collector.call(ctx).await?),
        };
        Ok(PlanOutput { page, items })
    }
}

/// Plan field values must be expression strings; anything else is a
/// malformed plan, not an extraction failure.
fn entries_from(
    fields: &serde_json::Map<String, serde_json::Value>,
) -> Result<CollectionSpec, AppError> {
    let mut entries = Vec::with_capacity(fields.len());
    for (name, value) in fields {
        match value {
            serde_json::Value::String(expr) => {
                entries.push((name.clone(), Entry::Expr(expr.clone())));
            }
            other => {
                return Err(AppError::Plan(format!(
                    "field '{}' must be an expression string, got {}",
                    name, other
                )))
            }
        }
    }
    Ok(entries)
}
