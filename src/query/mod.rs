// src/query/mod.rs
pub mod builder;
pub mod step;

use crate::context::ExecutionContext;
use crate::registry::Registries;
use crate::utils::error::ExtractError;
use crate::value::Value;
use futures::future::LocalBoxFuture;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

pub use builder::StepRegistry;
pub use step::{step_fn, MatchDef, MatchSyntax, Step, StepDef, StepFn, StepKind};

/// An ordered pipeline of extraction steps.
///
/// Built incrementally through the fluent surface (each call appends one
/// step and returns the query to continue chaining), then executed
/// top-to-bottom once per context passed to [`Query::call`]. The step list
/// is a plain arena appended at the tail; there is no linked list to walk.
#[derive(Clone)]
pub struct Query {
    pub(crate) registries: Arc<Registries>,
    pub(crate) steps: Vec<Step>,
    /// The chain actually executed, with implicit defaults appended.
    /// Computed lazily before the first execution and invalidated by any
    /// later append.
    pub(crate) effective: OnceCell<Vec<Step>>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("steps", &self.steps).finish()
    }
}

impl Query {
    pub fn new(registries: Arc<Registries>) -> Self {
        Query {
            registries,
            steps: Vec::new(),
            effective: OnceCell::new(),
        }
    }

    pub(crate) fn push(mut self, step: Step) -> Self {
        self.steps.push(step);
        self.effective = OnceCell::new();
        self
    }

    /// The executed chain: the authored steps plus the implicit terminal
    /// pair. If no cardinality-resolving step exists *anywhere* in the
    /// chain, a resolve-single step is appended; then, unless the tail
    /// already defaults or requires, a fail-if-empty step is appended.
    fn effective_steps(&self) -> &[Step] {
        self.effective.get_or_init(|| {
            let mut steps = self.steps.clone();
            if !steps.iter().any(|s| s.kind.resolves_cardinality()) {
                steps.push(Step::new(StepKind::Single, StepDef::None));
            }
            let closed = steps.last().map(|s| s.kind.closes_chain()).unwrap_or(false);
            if !closed {
                steps.push(Step::new(StepKind::Require, StepDef::None));
            }
            steps
        })
    }

    /// Runs the pipeline. Each step executes against a context derived
    /// from the previous step's result; the final result is returned.
    /// Any step failure aborts the chain, wrapped with that step's name.
    pub fn call<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
    ) -> LocalBoxFuture<'a, Result<Value, ExtractError>> {
        Box::pin(async move {
            let steps = self.effective_steps();
            tracing::trace!("executing query with {} step(s)", steps.len());

            let mut threaded = ctx.clone();
            let mut result = ctx.current().clone();
            for step in steps {
                if step.kind == StepKind::Init {
                    // Init sees the query's original context; the threaded
                    // result passes through untouched.
                    step.execute(ctx, &self.registries)
                        .await
                        .map_err(|e| ExtractError::scoped(step.kind.name(), e))?;
                    continue;
                }
                result = step
                    .execute(&threaded, &self.registries)
                    .await
                    .map_err(|e| ExtractError::scoped(step.kind.name(), e))?;
                threaded = ctx.derive(result.clone());
            }
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Entry;
    use crate::document::{DocumentOps, HtmlDocument};
    use crate::interpreter::interpret;
    use crate::options::OptionDecl;

    const PAGE: &str = r#"
        <html><body>
            <h1>Plato Plugin</h1>
            <h2>Fallback Title</h2>
            <div class="review"><span class="author">ann</span><p class="body">Great</p></div>
            <div class="review"><span class="author">bob</span><p class="body">Okay</p></div>
            <img class="first" src="a.png"><img class="second" src="b.png">
            <select id="edition">
                <option value="basic">Basic</option>
                <option value="pro">Pro</option>
            </select>
            <select id="support">
                <option value="none">None</option>
                <option value="gold">Gold</option>
            </select>
        </body></html>
    "#;

    fn fixture() -> (Arc<Registries>, ExecutionContext) {
        let registries = Registries::with_defaults();
        let doc: Arc<dyn DocumentOps> = Arc::new(HtmlDocument::parse(PAGE));
        (registries, ExecutionContext::new(doc))
    }

    #[tokio::test]
    async fn single_match_resolves_to_a_scalar() {
        let (registries, ctx) = fixture();
        let result = interpret(&registries, "h1").unwrap().call(&ctx).await.unwrap();
        assert_eq!(result, Value::from("Plato Plugin"));
    }

    #[tokio::test]
    async fn explicit_all_turns_the_same_match_into_a_list() {
        let (registries, ctx) = fixture();
        let result = interpret(&registries, "h1")
            .unwrap()
            .all()
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(result, Value::List(vec![Value::from("Plato Plugin")]));
    }

    #[tokio::test]
    async fn no_match_without_default_is_a_require_error() {
        let (registries, ctx) = fixture();
        let err = interpret(&registries, ".missing")
            .unwrap()
            .call(&ctx)
            .await
            .unwrap_err();
        match err {
            ExtractError::Scoped { scope, source } => {
                assert_eq!(scope, "Require");
                assert!(matches!(*source, ExtractError::Require(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn default_rescues_an_empty_result() {
        let (registries, ctx) = fixture();
        let result = interpret(&registries, ".missing")
            .unwrap()
            .default_value(Value::from("n/a"))
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(result, Value::from("n/a"));
    }

    #[tokio::test]
    async fn starred_element_reference_with_default_returns_empty_list() {
        let (registries, ctx) = fixture();
        let result = interpret(&registries, "{.missing}*")
            .unwrap()
            .default_value(Value::List(Vec::new()))
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(result, Value::List(Vec::new()));
    }

    #[tokio::test]
    async fn alternatives_are_tried_in_declaration_order() {
        let (registries, ctx) = fixture();
        // First alternative matches nothing, second does.
        let result = Query::new(Arc::clone(&registries))
            .select(".missing")
            .alt(".also-missing")
            .alt("h2")
            .prop("text")
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(result, Value::from("Fallback Title"));

        // A non-empty primary never consults its alternatives.
        let result = Query::new(Arc::clone(&registries))
            .select("h1")
            .alt("h2")
            .prop("text")
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(result, Value::from("Plato Plugin"));
    }

    #[tokio::test]
    async fn more_than_one_match_is_a_cardinality_error() {
        let (registries, ctx) = fixture();
        let err = interpret(&registries, ".author")
            .unwrap()
            .call(&ctx)
            .await
            .unwrap_err();
        match err {
            ExtractError::Scoped { scope, source } => {
                assert_eq!(scope, "Single");
                assert!(matches!(*source, ExtractError::Cardinality(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn a_mid_chain_cardinality_step_suppresses_the_implicit_single() {
        let (registries, ctx) = fixture();
        // `all` sits mid-chain; the scan still finds it, so two results
        // survive to the end instead of tripping a single-step.
        let result = Query::new(Arc::clone(&registries))
            .select(".author")
            .all()
            .prop("text")
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::from("ann"), Value::from("bob")])
        );
    }

    #[tokio::test]
    async fn merge_concatenates_in_declaration_order() {
        let (registries, ctx) = fixture();
        let result = interpret(&registries, "img.first{src} + img.second{src}")
            .unwrap()
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::from("a.png"), Value::from("b.png")])
        );
    }

    #[tokio::test]
    async fn post_transforms_the_running_result() {
        let (registries, ctx) = fixture();
        let result = interpret(&registries, "h1")
            .unwrap()
            .post(step_fn(|_ctx, value| async move {
                match value {
                    Value::List(items) => Ok(Value::List(
                        items
                            .into_iter()
                            .map(|item| match item {
                                Value::Str(text) => Value::Str(text.to_uppercase()),
                                other => other,
                            })
                            .collect(),
                    )),
                    other => Ok(other),
                }
            }))
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(result, Value::from("PLATO PLUGIN"));
    }

    #[tokio::test]
    async fn init_sees_the_original_context_and_passes_through() {
        let (registries, ctx) = fixture();
        let result = Query::new(Arc::clone(&registries))
            .init(step_fn(|ctx, _value| async move {
                assert!(matches!(ctx.current(), Value::Null));
                Ok(Value::from("discarded"))
            }))
            .select("h1")
            .prop("text")
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(result, Value::from("Plato Plugin"));
    }

    #[tokio::test]
    async fn elements_step_builds_one_record_per_match() {
        let (registries, ctx) = fixture();
        let result = Query::new(Arc::clone(&registries))
            .select(".review")
            .elements(vec![
                ("author".to_string(), Entry::Expr(".author".to_string())),
                ("body".to_string(), Entry::Expr(".body".to_string())),
            ])
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(
            result,
            Value::List(vec![
                Value::Record(vec![
                    ("author".to_string(), Value::from("ann")),
                    ("body".to_string(), Value::from("Great")),
                ]),
                Value::Record(vec![
                    ("author".to_string(), Value::from("bob")),
                    ("body".to_string(), Value::from("Okay")),
                ]),
            ])
        );
    }

    #[tokio::test]
    async fn options_step_yields_every_combination() {
        let (registries, ctx) = fixture();
        let result = Query::new(Arc::clone(&registries))
            .options(vec![
                OptionDecl::selector("edition", "#edition"),
                OptionDecl::selector("support", "#support"),
            ])
            .call(&ctx)
            .await
            .unwrap();
        let rows = match result {
            Value::List(rows) => rows,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(rows.len(), 4);
        let first_edition = rows[0].record_get("edition").unwrap();
        assert_eq!(first_edition.record_get("value"), Some(&Value::from("basic")));
        assert_eq!(first_edition.record_get("label"), Some(&Value::from("Basic")));
    }

    #[tokio::test]
    async fn delegate_runs_a_compiled_expression() {
        let (registries, ctx) = fixture();
        let result = Query::new(Arc::clone(&registries))
            .delegate("h1")
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(result, Value::from("Plato Plugin"));
    }

    #[test]
    fn registry_rejects_unknown_steps_and_bad_definitions() {
        let registries = Registries::with_defaults();
        let query = Query::new(Arc::clone(&registries));
        let err = query.next("teleport", StepDef::None).unwrap_err();
        assert!(matches!(err, ExtractError::Validation(_)));

        let query = Query::new(Arc::clone(&registries));
        let err = query
            .next("pre", StepDef::Name("not a function".to_string()))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Validation(_)));
    }

    #[test]
    fn registry_builds_steps_by_name() {
        let registries = Registries::with_defaults();
        let query = Query::new(Arc::clone(&registries))
            .next("select", StepDef::Match(MatchDef::css("h1")))
            .unwrap()
            .next("prop", StepDef::Name("text".to_string()))
            .unwrap();
        assert_eq!(query.steps.len(), 2);
    }
}
