// src/query/step.rs
use crate::collection::{Collection, CollectionSpec};
use crate::context::ExecutionContext;
use crate::interpreter;
use crate::options::{CombinationStream, OptionDecl, OptionGroup};
use crate::registry::Registries;
use crate::utils::error::ExtractError;
use crate::value::Value;
use futures::future::LocalBoxFuture;
use std::fmt;
use std::sync::Arc;

/// User code run by the pre/post/init steps. Receives a derived context
/// and the current working value, returns the replacement value.
pub type StepFn =
    Arc<dyn Fn(ExecutionContext, Value) -> LocalBoxFuture<'static, Result<Value, ExtractError>>>;

/// Wraps an async closure into a [`StepFn`].
pub fn step_fn<F, Fut>(f: F) -> StepFn
where
    F: Fn(ExecutionContext, Value) -> Fut + 'static,
    Fut: std::future::Future<Output = Result<Value, ExtractError>> + 'static,
{
    Arc::new(move |ctx, value| Box::pin(f(ctx, value)))
}

/// The closed set of pipeline step kinds. Dispatch is always on this tag,
/// never on type or name strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Match nodes by a CSS-like or path-like expression.
    Select,
    /// Read a named property off every item of the current result.
    Prop,
    /// Resolve the current result to its sole entry.
    Single,
    /// Resolve the current result to a list; with a nested definition,
    /// run a sub-collection per matched element instead.
    All,
    /// Substitute a configured value when the current result is empty.
    Default,
    /// Fail when the current result is empty.
    Require,
    /// Run several sub-queries against the same context and concatenate.
    Merge,
    /// Run user code before matching (side effects allowed).
    Pre,
    /// Run user code on the result (side effects allowed).
    Post,
    /// Run user code once with the query's original context.
    Init,
    /// One record per matched element, via a sub-collection.
    Elements,
    /// One record per option combination.
    Options,
    /// Like `Elements`, but each record also carries the fields of the
    /// enclosing option iteration.
    Iterate,
    /// Compile a textual expression and run the resulting query.
    Delegate,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Select => "Select",
            StepKind::Prop => "Prop",
            StepKind::Single => "Single",
            StepKind::All => "All",
            StepKind::Default => "Default",
            StepKind::Require => "Require",
            StepKind::Merge => "Merge",
            StepKind::Pre => "Pre",
            StepKind::Post => "Post",
            StepKind::Init => "Init",
            StepKind::Elements => "Elements",
            StepKind::Options => "Options",
            StepKind::Iterate => "Iterate",
            StepKind::Delegate => "Delegate",
        }
    }

    /// Kinds that decide the shape of the final result. If any of these is
    /// present anywhere in a chain, no implicit cardinality step is added.
    pub fn resolves_cardinality(&self) -> bool {
        matches!(
            self,
            StepKind::Single
                | StepKind::All
                | StepKind::Elements
                | StepKind::Options
                | StepKind::Iterate
                | StepKind::Delegate
        )
    }

    /// Kinds that may legitimately end a chain without an implicit
    /// fail-if-empty step after them.
    pub fn closes_chain(&self) -> bool {
        matches!(self, StepKind::Default | StepKind::Require)
    }
}

/// Which lookup operation a match expression compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSyntax {
    Css,
    Path,
}

/// One match expression plus where it is anchored.
#[derive(Debug, Clone)]
pub struct MatchDef {
    pub expr: String,
    /// Anchor at the document root instead of the current node.
    pub rooted: bool,
    pub syntax: MatchSyntax,
}

impl MatchDef {
    pub fn css(expr: impl Into<String>) -> Self {
        MatchDef {
            expr: expr.into(),
            rooted: false,
            syntax: MatchSyntax::Css,
        }
    }

    pub fn path(expr: impl Into<String>) -> Self {
        MatchDef {
            expr: expr.into(),
            rooted: false,
            syntax: MatchSyntax::Path,
        }
    }

    pub fn rooted(mut self) -> Self {
        self.rooted = true;
        self
    }
}

/// The per-kind payload of a step.
#[derive(Clone)]
pub enum StepDef {
    None,
    Match(MatchDef),
    Name(String),
    Value(Value),
    Queries(Vec<crate::query::Query>),
    Entries(CollectionSpec),
    OptionDecls(Vec<OptionDecl>),
    Func(StepFn),
    Expr(String),
}

impl fmt::Debug for StepDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepDef::None => write!(f, "None"),
            StepDef::Match(def) => write!(f, "Match({:?})", def),
            StepDef::Name(name) => write!(f, "Name({:?})", name),
            StepDef::Value(value) => write!(f, "Value({:?})", value),
            StepDef::Queries(qs) => write!(f, "Queries(len={})", qs.len()),
            StepDef::Entries(entries) => write!(f, "Entries(len={})", entries.len()),
            StepDef::OptionDecls(decls) => write!(f, "OptionDecls(len={})", decls.len()),
            StepDef::Func(_) => write!(f, "Func"),
            StepDef::Expr(expr) => write!(f, "Expr({:?})", expr),
        }
    }
}

/// One unit of extraction logic. `alternatives` is a FIFO queue of fallback
/// definitions; only Select and Prop steps consult it, and only when their
/// own result comes back empty. The queue is walked afresh on every
/// execution, never consumed.
#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    pub def: StepDef,
    pub alternatives: Vec<StepDef>,
}

impl Step {
    pub fn new(kind: StepKind, def: StepDef) -> Self {
        Step {
            kind,
            def,
            alternatives: Vec::new(),
        }
    }

    pub fn push_alternative(&mut self, def: StepDef) {
        self.alternatives.push(def);
    }

    /// Executes this step against a context. The step reads the context's
    /// current value as its input and returns the next working value.
    pub fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        registries: &'a Arc<Registries>,
    ) -> LocalBoxFuture<'a, Result<Value, ExtractError>> {
        Box::pin(async move {
            match self.kind {
                StepKind::Select => self.run_select(ctx).await,
                StepKind::Prop => self.run_prop(ctx).await,
                StepKind::Single => run_single(ctx),
                StepKind::All => run_all(&self.def, ctx, registries).await,
                StepKind::Default => run_default(&self.def, ctx),
                StepKind::Require => run_require(ctx),
                StepKind::Merge => run_merge(&self.def, ctx).await,
                StepKind::Pre | StepKind::Post | StepKind::Init => run_func(&self.def, ctx).await,
                StepKind::Elements => run_elements(&self.def, ctx, registries, false).await,
                StepKind::Iterate => run_elements(&self.def, ctx, registries, true).await,
                StepKind::Options => run_options(&self.def, ctx, registries).await,
                StepKind::Delegate => run_delegate(&self.def, ctx, registries).await,
            }
        })
    }

    async fn run_select(&self, ctx: &ExecutionContext) -> Result<Value, ExtractError> {
        let mut attempts: Vec<&StepDef> = Vec::with_capacity(1 + self.alternatives.len());
        attempts.push(&self.def);
        attempts.extend(self.alternatives.iter());

        let last = attempts.len() - 1;
        for (attempt, def) in attempts.into_iter().enumerate() {
            let matched = match def {
                StepDef::Match(m) => match_nodes(m, ctx).await?,
                other => {
                    return Err(ExtractError::Validation(format!(
                        "Select expects a match expression, got {:?}",
                        other
                    )))
                }
            };
            if !matched.is_empty() {
                return Ok(Value::List(matched.into_iter().map(Value::Node).collect()));
            }
            if attempt < last {
                tracing::debug!("select matched nothing, trying next alternative");
            }
        }
        Ok(Value::List(Vec::new()))
    }

    async fn run_prop(&self, ctx: &ExecutionContext) -> Result<Value, ExtractError> {
        let mut attempts: Vec<&StepDef> = Vec::with_capacity(1 + self.alternatives.len());
        attempts.push(&self.def);
        attempts.extend(self.alternatives.iter());

        let items = match ctx.current() {
            // Property reads on an unset context target the root node.
            Value::Null => vec![Value::Node(ctx.doc().root())],
            current => current.items(),
        };

        let last = attempts.len() - 1;
        for (attempt, def) in attempts.into_iter().enumerate() {
            let name = match def {
                StepDef::Name(name) => name,
                other => {
                    return Err(ExtractError::Validation(format!(
                        "Prop expects a property name, got {:?}",
                        other
                    )))
                }
            };
            let mut values = Vec::new();
            for item in &items {
                let read = match item {
                    Value::Node(handle) => ctx.doc().read_property(*handle, name).await,
                    Value::Record(_) => item.record_get(name).cloned(),
                    _ => None,
                };
                // Missing values are compacted away.
                if let Some(value) = read {
                    values.push(value);
                }
            }
            if !values.is_empty() {
                return Ok(Value::List(values));
            }
            if attempt < last {
                tracing::debug!("property '{}' absent everywhere, trying next alternative", name);
            }
        }
        Ok(Value::List(Vec::new()))
    }
}

async fn match_nodes(
    def: &MatchDef,
    ctx: &ExecutionContext,
) -> Result<Vec<crate::document::NodeHandle>, ExtractError> {
    let scopes = if def.rooted {
        vec![ctx.doc().root()]
    } else {
        ctx.current_nodes()
    };
    let mut matched = Vec::new();
    for scope in scopes {
        let found = match def.syntax {
            MatchSyntax::Css => ctx.doc().query_all(scope, &def.expr).await?,
            MatchSyntax::Path => ctx.doc().query_by_path(scope, &def.expr).await?,
        };
        matched.extend(found);
    }
    Ok(matched)
}

fn run_single(ctx: &ExecutionContext) -> Result<Value, ExtractError> {
    let mut items = ctx.current().items();
    match items.len() {
        0 => Ok(Value::Null),
        1 => Ok(items.remove(0)),
        n => Err(ExtractError::Cardinality(format!(
            "{} results where one was expected",
            n
        ))),
    }
}

async fn run_all(
    def: &StepDef,
    ctx: &ExecutionContext,
    registries: &Arc<Registries>,
) -> Result<Value, ExtractError> {
    match def {
        // Plain list cardinality.
        StepDef::None => Ok(Value::List(ctx.current().items())),
        // A nested definition recurses into a sub-collection per element.
        StepDef::Entries(spec) => collect_per_node(spec, ctx, registries, false).await,
        other => Err(ExtractError::Validation(format!(
            "All expects no definition or nested entries, got {:?}",
            other
        ))),
    }
}

fn run_default(def: &StepDef, ctx: &ExecutionContext) -> Result<Value, ExtractError> {
    let fallback = match def {
        StepDef::Value(value) => value,
        other => {
            return Err(ExtractError::Validation(format!(
                "Default expects a value, got {:?}",
                other
            )))
        }
    };
    if ctx.current().is_empty() {
        tracing::debug!("result empty, substituting default {:?}", fallback);
        Ok(fallback.clone())
    } else {
        Ok(ctx.current().clone())
    }
}

fn run_require(ctx: &ExecutionContext) -> Result<Value, ExtractError> {
    if ctx.current().is_empty() {
        Err(ExtractError::Require(
            "query produced an empty result".to_string(),
        ))
    } else {
        Ok(ctx.current().clone())
    }
}

async fn run_merge(def: &StepDef, ctx: &ExecutionContext) -> Result<Value, ExtractError> {
    let queries = match def {
        StepDef::Queries(queries) => queries,
        other => {
            return Err(ExtractError::Validation(format!(
                "Merge expects sub-queries, got {:?}",
                other
            )))
        }
    };
    let mut merged = Vec::new();
    // Every sub-query sees the same incoming context; results concatenate
    // in declaration order.
    for query in queries {
        let result = query.call(ctx).await?;
        merged.extend(result.into_items());
    }
    Ok(Value::List(merged))
}

async fn run_func(def: &StepDef, ctx: &ExecutionContext) -> Result<Value, ExtractError> {
    match def {
        StepDef::Func(func) => func(ctx.clone(), ctx.current().clone()).await,
        other => Err(ExtractError::Validation(format!(
            "expected a function definition, got {:?}",
            other
        ))),
    }
}

async fn run_elements(
    def: &StepDef,
    ctx: &ExecutionContext,
    registries: &Arc<Registries>,
    merge_iteration: bool,
) -> Result<Value, ExtractError> {
    match def {
        StepDef::Entries(spec) => collect_per_node(spec, ctx, registries, merge_iteration).await,
        other => Err(ExtractError::Validation(format!(
            "expected nested entries, got {:?}",
            other
        ))),
    }
}

/// Runs a sub-collection once per node of the current result, producing one
/// record per node.
async fn collect_per_node(
    spec: &CollectionSpec,
    ctx: &ExecutionContext,
    registries: &Arc<Registries>,
    merge_iteration: bool,
) -> Result<Value, ExtractError> {
    let collection = Collection::new(Arc::clone(registries), spec.clone());
    let mut records = Vec::new();
    for node in ctx.current().nodes() {
        let derived = ctx.derive(Value::Node(node));
        let mut row = collection.call(&derived).await?;
        if merge_iteration {
            if let (Value::Record(fields), Some(iteration)) = (&mut row, ctx.iteration()) {
                fields.extend(iteration.iter().cloned());
            }
        }
        records.push(row);
    }
    Ok(Value::List(records))
}

async fn run_options(
    def: &StepDef,
    ctx: &ExecutionContext,
    registries: &Arc<Registries>,
) -> Result<Value, ExtractError> {
    let decls = match def {
        StepDef::OptionDecls(decls) => decls,
        other => {
            return Err(ExtractError::Validation(format!(
                "Options expects option declarations, got {:?}",
                other
            )))
        }
    };
    let mut groups = Vec::with_capacity(decls.len());
    for decl in decls {
        groups.push(OptionGroup::resolve(decl, ctx).await?);
    }
    let mut stream = CombinationStream::new(Arc::clone(ctx.doc()), groups, registries);
    let mut combinations = Vec::new();
    while let Some(combination) = stream.next().await? {
        combinations.push(Value::Record(combination));
    }
    Ok(Value::List(combinations))
}

async fn run_delegate(
    def: &StepDef,
    ctx: &ExecutionContext,
    registries: &Arc<Registries>,
) -> Result<Value, ExtractError> {
    let expr = match def {
        StepDef::Expr(expr) => expr,
        other => {
            return Err(ExtractError::Validation(format!(
                "Delegate expects an expression, got {:?}",
                other
            )))
        }
    };
    let compiled = interpreter::interpret(registries, expr)?;
    compiled.call(ctx).await
}
