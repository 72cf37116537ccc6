// src/collection/collector.rs
use crate::collection::{
    entry_fn, flatten_to_elements, Collection, CollectionSpec, Entry,
};
use crate::context::ExecutionContext;
use crate::options::{CombinationStream, OptionDecl, OptionGroup};
use crate::registry::Registries;
use crate::utils::error::ExtractError;
use crate::value::Value;
use std::sync::Arc;

/// Yields the contexts a collector iterates over: the input context
/// unchanged, one derived context per matched element, or one per option
/// combination (with activation driven in lock-step).
#[derive(Clone)]
pub enum Accessor {
    Identity,
    /// A collection whose (post-processed) output is the flat element
    /// list to derive contexts from.
    Elements(Collection),
    Options(Vec<OptionDecl>),
}

/// Composes an accessor with a collection: the collection runs once per
/// derived context and the per-context results flatten into one record
/// list. This is the record-per-matched-element engine.
#[derive(Clone)]
pub struct Collector {
    registries: Arc<Registries>,
    accessor: Accessor,
    collection: Collection,
    /// Entries merged into the inner collection by `iterate`; the options
    /// factory uses this to expose the currently active selection.
    iteration_entries: CollectionSpec,
}

impl Collector {
    /// A collector over the single input context.
    pub fn new(registries: Arc<Registries>, collection: Collection) -> Self {
        Collector {
            registries,
            accessor: Accessor::Identity,
            collection,
            iteration_entries: Vec::new(),
        }
    }

    /// A collector deriving one context per element matched by `selector`.
    /// Zero matches mean zero records, not a failure.
    pub fn over_elements(
        registries: Arc<Registries>,
        selector: &str,
        collection: Collection,
    ) -> Result<Self, ExtractError> {
        let matches = crate::interpreter::interpret(&registries, &format!("{{{}}}*", selector))?
            .default_value(Value::List(Vec::new()));
        let matcher = Collection::new(
            Arc::clone(&registries),
            vec![("elements".to_string(), Entry::Query(matches))],
        )
        .with_post(flatten_to_elements());
        Ok(Collector {
            registries,
            accessor: Accessor::Elements(matcher),
            collection,
            iteration_entries: Vec::new(),
        })
    }

    /// A collector deriving one context per option combination. The
    /// current combination is exposed to the inner collection as the
    /// pre-registered `selection` iteration entry.
    pub fn over_options(
        registries: Arc<Registries>,
        decls: Vec<OptionDecl>,
        collection: Collection,
    ) -> Self {
        Collector {
            registries,
            accessor: Accessor::Options(decls),
            collection,
            iteration_entries: vec![("selection".to_string(), selection_entry())],
        }
    }

    /// Builds a new collector that re-applies `queries` once per item this
    /// collector produces. Element/identity collectors become the
    /// accessor themselves (their output, flattened to elements, is the
    /// iteration set); an options collector keeps its combination
    /// accessor so activation still runs in lock-step.
    pub fn iterate(&self, queries: CollectionSpec) -> Collector {
        let mut entries = queries;
        entries.extend(self.iteration_entries.iter().cloned());
        let inner = Collection::new(Arc::clone(&self.registries), entries);

        let accessor = match &self.accessor {
            Accessor::Options(decls) => Accessor::Options(decls.clone()),
            _ => {
                let this = self.clone();
                let matcher = Collection::new(
                    Arc::clone(&self.registries),
                    vec![(
                        "self".to_string(),
                        entry_fn(move |ctx: ExecutionContext| {
                            let collector = this.clone();
                            async move { collector.call(&ctx).await }
                        }),
                    )],
                )
                .with_post(flatten_to_elements());
                Accessor::Elements(matcher)
            }
        };

        Collector {
            registries: Arc::clone(&self.registries),
            accessor,
            collection: inner,
            iteration_entries: self.iteration_entries.clone(),
        }
    }

    /// Runs the wrapped collection once per derived context, in the order
    /// the accessor yields them, and flattens everything into one list.
    pub async fn call(&self, ctx: &ExecutionContext) -> Result<Value, ExtractError> {
        let mut records = Vec::new();
        match &self.accessor {
            Accessor::Identity => {
                push_flat(&mut records, self.collection.call(ctx).await?);
            }
            Accessor::Elements(matcher) => {
                let matched = matcher
                    .call(ctx)
                    .await
                    .map_err(|e| ExtractError::scoped("Collector", e))?;
                let nodes = matched.nodes();
                tracing::debug!("collector iterating {} derived context(s)", nodes.len());
                for node in nodes {
                    let derived = ctx.derive(Value::Node(node));
                    push_flat(&mut records, self.collection.call(&derived).await?);
                }
            }
            Accessor::Options(decls) => {
                let mut groups = Vec::with_capacity(decls.len());
                for decl in decls {
                    groups.push(
                        OptionGroup::resolve(decl, ctx)
                            .await
                            .map_err(|e| ExtractError::scoped("Collector", e))?,
                    );
                }
                let mut stream =
                    CombinationStream::new(Arc::clone(ctx.doc()), groups, &self.registries);
                while let Some(combination) = stream.next().await? {
                    // Extraction happens against the live activated state
                    // before the next combination is activated.
                    let derived = ctx.with_iteration(combination);
                    push_flat(&mut records, self.collection.call(&derived).await?);
                }
            }
        }
        Ok(Value::List(records))
    }
}

/// Flattens one per-context result into the running record list.
fn push_flat(records: &mut Vec<Value>, result: Value) {
    match result {
        Value::List(items) => records.extend(items),
        other => records.push(other),
    }
}

/// The pre-registered iteration entry: the current combination record.
fn selection_entry() -> Entry {
    entry_fn(|ctx: ExecutionContext| async move {
        Ok(Value::Record(ctx.iteration().cloned().unwrap_or_default()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentOps, HtmlDocument};

    const SHOP: &str = r#"
        <html><body>
            <h1>Plato Plugin</h1>
            <div class="review"><span class="author">ann</span><p class="body">Great</p></div>
            <div class="review"><span class="author">bob</span><p class="body">Okay</p></div>
            <select id="edition">
                <option value="basic">Basic</option>
                <option value="pro">Pro</option>
                <option value="ultimate">Ultimate</option>
            </select>
            <select id="support">
                <option value="none">None</option>
                <option value="gold">Gold</option>
            </select>
        </body></html>
    "#;

    fn fixture() -> (Arc<Registries>, ExecutionContext) {
        let registries = Registries::with_defaults();
        let doc: Arc<dyn DocumentOps> = Arc::new(HtmlDocument::parse(SHOP));
        (registries, ExecutionContext::new(doc))
    }

    #[tokio::test]
    async fn identity_collector_runs_the_collection_once() {
        let (registries, ctx) = fixture();
        let collection = Collection::new(
            Arc::clone(&registries),
            vec![("name".to_string(), Entry::Expr("h1".to_string()))],
        );
        let result = Collector::new(Arc::clone(&registries), collection)
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::Record(vec![(
                "name".to_string(),
                Value::from("Plato Plugin"),
            )])])
        );
    }

    #[tokio::test]
    async fn element_collector_produces_one_record_per_match() {
        let (registries, ctx) = fixture();
        let fields = Collection::new(
            Arc::clone(&registries),
            vec![
                ("author".to_string(), Entry::Expr(".author".to_string())),
                ("body".to_string(), Entry::Expr(".body".to_string())),
            ],
        );
        let collector =
            Collector::over_elements(Arc::clone(&registries), ".review", fields).unwrap();
        let result = collector.call(&ctx).await.unwrap();
        let rows = match result {
            Value::List(rows) => rows,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].record_get("author"), Some(&Value::from("ann")));
        assert_eq!(rows[1].record_get("author"), Some(&Value::from("bob")));
    }

    #[tokio::test]
    async fn element_collector_with_no_matches_yields_no_records() {
        let (registries, ctx) = fixture();
        let fields = Collection::new(
            Arc::clone(&registries),
            vec![("author".to_string(), Entry::Expr(".author".to_string()))],
        );
        let collector =
            Collector::over_elements(Arc::clone(&registries), ".missing", fields).unwrap();
        let result = collector.call(&ctx).await.unwrap();
        assert_eq!(result, Value::List(Vec::new()));
    }

    #[tokio::test]
    async fn iterate_reapplies_queries_per_collected_element() {
        let (registries, ctx) = fixture();
        let base = Collector::new(
            Arc::clone(&registries),
            Collection::new(
                Arc::clone(&registries),
                vec![("reviews".to_string(), Entry::Expr("{.review}*".to_string()))],
            ),
        );
        let rows = base
            .iterate(vec![(
                "author".to_string(),
                Entry::Expr(".author".to_string()),
            )])
            .call(&ctx)
            .await
            .unwrap();
        assert_eq!(
            rows,
            Value::List(vec![
                Value::Record(vec![("author".to_string(), Value::from("ann"))]),
                Value::Record(vec![("author".to_string(), Value::from("bob"))]),
            ])
        );
    }

    #[tokio::test]
    async fn option_collector_extracts_against_live_activation() {
        let (registries, ctx) = fixture();
        let decls = vec![
            OptionDecl::selector("edition", "#edition"),
            OptionDecl::selector("support", "#support"),
        ];
        let base = Collector::over_options(
            Arc::clone(&registries),
            decls,
            Collection::new(Arc::clone(&registries), Vec::new()),
        );
        // The active values are read back off the document while each
        // combination is activated.
        let rows = base
            .iterate(vec![
                (
                    "edition_active".to_string(),
                    Entry::Expr("#edition{value}".to_string()),
                ),
                (
                    "support_active".to_string(),
                    Entry::Expr("#support{value}".to_string()),
                ),
            ])
            .call(&ctx)
            .await
            .unwrap();

        let rows = match rows {
            Value::List(rows) => rows,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(rows.len(), 6);

        // Last option varies fastest.
        let actives: Vec<(Value, Value)> = rows
            .iter()
            .map(|row| {
                (
                    row.record_get("edition_active").cloned().unwrap(),
                    row.record_get("support_active").cloned().unwrap(),
                )
            })
            .collect();
        assert_eq!(actives[0], (Value::from("basic"), Value::from("none")));
        assert_eq!(actives[1], (Value::from("basic"), Value::from("gold")));
        assert_eq!(actives[2], (Value::from("pro"), Value::from("none")));
        assert_eq!(actives[5], (Value::from("ultimate"), Value::from("gold")));

        // Every row also carries its combination via the selection entry.
        let selection = rows[3].record_get("selection").unwrap();
        let edition = selection.record_get("edition").unwrap();
        assert_eq!(edition.record_get("value"), Some(&Value::from("pro")));
        assert_eq!(edition.record_get("label"), Some(&Value::from("Pro")));
        let support = selection.record_get("support").unwrap();
        assert_eq!(support.record_get("value"), Some(&Value::from("gold")));
    }
}
