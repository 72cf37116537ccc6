// src/query/builder.rs
use crate::collection::CollectionSpec;
use crate::options::OptionDecl;
use crate::query::step::{MatchDef, Step, StepDef, StepFn, StepKind};
use crate::query::Query;
use crate::utils::error::ExtractError;
use crate::value::Value;
use once_cell::sync::OnceCell;
use std::collections::HashMap;

/// Validating constructor for one step kind.
pub type StepCtor = fn(StepDef) -> Result<Step, ExtractError>;

/// Maps a step's textual name to its constructor. Populated once at
/// startup and read thereafter; `add` exists so callers can extend the
/// builder surface without touching existing constructors.
pub struct StepRegistry {
    ctors: HashMap<&'static str, StepCtor>,
}

impl StepRegistry {
    pub fn new() -> Self {
        StepRegistry {
            ctors: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = StepRegistry::new();
        registry.add("select", |def| build(StepKind::Select, def));
        registry.add("prop", |def| build(StepKind::Prop, def));
        registry.add("single", |def| build(StepKind::Single, def));
        registry.add("all", |def| build(StepKind::All, def));
        registry.add("default", |def| build(StepKind::Default, def));
        registry.add("require", |def| build(StepKind::Require, def));
        registry.add("merge", |def| build(StepKind::Merge, def));
        registry.add("pre", |def| build(StepKind::Pre, def));
        registry.add("post", |def| build(StepKind::Post, def));
        registry.add("init", |def| build(StepKind::Init, def));
        registry.add("elements", |def| build(StepKind::Elements, def));
        registry.add("options", |def| build(StepKind::Options, def));
        registry.add("iterate", |def| build(StepKind::Iterate, def));
        registry.add("delegate", |def| build(StepKind::Delegate, def));
        registry
    }

    pub fn add(&mut self, name: &'static str, ctor: StepCtor) {
        self.ctors.insert(name, ctor);
    }

    pub fn build(&self, name: &str, def: StepDef) -> Result<Step, ExtractError> {
        let ctor = self.ctors.get(name).ok_or_else(|| {
            ExtractError::Validation(format!("unknown step '{}'", name))
        })?;
        ctor(def)
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        StepRegistry::with_defaults()
    }
}

/// Shared constructor: checks the definition shape fits the kind.
fn build(kind: StepKind, def: StepDef) -> Result<Step, ExtractError> {
    let ok = match kind {
        StepKind::Select => matches!(def, StepDef::Match(_)),
        StepKind::Prop => matches!(def, StepDef::Name(_)),
        StepKind::Single | StepKind::Require => matches!(def, StepDef::None),
        StepKind::All => matches!(def, StepDef::None | StepDef::Entries(_)),
        StepKind::Default => matches!(def, StepDef::Value(_)),
        StepKind::Merge => matches!(def, StepDef::Queries(_)),
        StepKind::Pre | StepKind::Post | StepKind::Init => matches!(def, StepDef::Func(_)),
        StepKind::Elements | StepKind::Iterate => matches!(def, StepDef::Entries(_)),
        StepKind::Options => matches!(def, StepDef::OptionDecls(_)),
        StepKind::Delegate => matches!(def, StepDef::Expr(_)),
    };
    if !ok {
        return Err(ExtractError::Validation(format!(
            "{} step cannot take definition {:?}",
            kind.name(),
            def
        )));
    }
    Ok(Step::new(kind, def))
}

// The typed fluent surface. Every method appends one step and returns the
// query, so any step can be followed by any other; `next` reaches the same
// constructors through the registry by name.
impl Query {
    /// Appends a step by its registered name.
    pub fn next(self, name: &str, def: StepDef) -> Result<Self, ExtractError> {
        let step = self.registries.steps.build(name, def)?;
        Ok(self.push(step))
    }

    /// Match nodes by CSS selector, scoped to the current node.
    pub fn select(self, css: &str) -> Self {
        self.push(Step::new(StepKind::Select, StepDef::Match(MatchDef::css(css))))
    }

    /// Match nodes by CSS selector, anchored at the document root.
    pub fn select_rooted(self, css: &str) -> Self {
        self.push(Step::new(
            StepKind::Select,
            StepDef::Match(MatchDef::css(css).rooted()),
        ))
    }

    /// Match nodes by path expression (`/html/body/div[2]`).
    pub fn select_path(self, path: &str) -> Self {
        self.push(Step::new(
            StepKind::Select,
            StepDef::Match(MatchDef::path(path)),
        ))
    }

    /// Read a named property off every item of the current result.
    pub fn prop(self, name: &str) -> Self {
        self.push(Step::new(StepKind::Prop, StepDef::Name(name.to_string())))
    }

    /// Attach a fallback to the preceding select/prop step. Alternatives
    /// are tried in declaration order, only when the result is empty.
    pub fn alt(mut self, expr: &str) -> Self {
        match self.steps.last_mut() {
            Some(step) if step.kind == StepKind::Select => {
                step.push_alternative(StepDef::Match(MatchDef::css(expr)));
            }
            Some(step) if step.kind == StepKind::Prop => {
                step.push_alternative(StepDef::Name(expr.to_string()));
            }
            _ => {
                tracing::warn!(
                    "alternative '{}' ignored: only select/prop steps take alternatives",
                    expr
                );
            }
        }
        self.effective = OnceCell::new();
        self
    }

    /// Resolve to the sole result; more than one match is an error.
    pub fn single(self) -> Self {
        self.push(Step::new(StepKind::Single, StepDef::None))
    }

    /// Resolve to the full result list.
    pub fn all(self) -> Self {
        self.push(Step::new(StepKind::All, StepDef::None))
    }

    /// Resolve to one sub-collection record per matched element.
    pub fn all_of(self, entries: CollectionSpec) -> Self {
        self.push(Step::new(StepKind::All, StepDef::Entries(entries)))
    }

    /// Substitute a value when the result so far is empty.
    pub fn default_value(self, value: Value) -> Self {
        self.push(Step::new(StepKind::Default, StepDef::Value(value)))
    }

    /// Fail when the result so far is empty.
    pub fn require(self) -> Self {
        self.push(Step::new(StepKind::Require, StepDef::None))
    }

    /// Run every sub-query against the same context and concatenate.
    pub fn merge(self, queries: Vec<Query>) -> Self {
        self.push(Step::new(StepKind::Merge, StepDef::Queries(queries)))
    }

    /// Run user code before the following steps (side effects allowed).
    pub fn pre(self, func: StepFn) -> Self {
        self.push(Step::new(StepKind::Pre, StepDef::Func(func)))
    }

    /// Run user code on the current result (side effects allowed).
    pub fn post(self, func: StepFn) -> Self {
        self.push(Step::new(StepKind::Post, StepDef::Func(func)))
    }

    /// Run user code once with the query's original context.
    pub fn init(self, func: StepFn) -> Self {
        self.push(Step::new(StepKind::Init, StepDef::Func(func)))
    }

    /// One record per matched element, built from nested entries.
    pub fn elements(self, entries: CollectionSpec) -> Self {
        self.push(Step::new(StepKind::Elements, StepDef::Entries(entries)))
    }

    /// Like `elements`, but merges the enclosing option-iteration fields
    /// into every record.
    pub fn iterate(self, entries: CollectionSpec) -> Self {
        self.push(Step::new(StepKind::Iterate, StepDef::Entries(entries)))
    }

    /// One record per combination of the given option groups.
    pub fn options(self, decls: Vec<OptionDecl>) -> Self {
        self.push(Step::new(StepKind::Options, StepDef::OptionDecls(decls)))
    }

    /// Compile a textual expression and run the resulting query here.
    pub fn delegate(self, expr: &str) -> Self {
        self.push(Step::new(StepKind::Delegate, StepDef::Expr(expr.to_string())))
    }
}
