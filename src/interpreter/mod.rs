// src/interpreter/mod.rs
//
// Compiles the short textual selector expressions into query pipelines.
// Each grammar is a strategy; the registry tries them in registration
// order and the first whose `matches` predicate accepts the expression
// compiles it. A catch-all "missing" grammar sits last, so lookup never
// comes back empty-handed.

use crate::query::Query;
use crate::registry::Registries;
use crate::utils::error::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Property names accepted inside `{...}` accessors.
static PROP_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_:.\-]*$").expect("Failed to compile PROP_NAME_RE")
});

/// One textual grammar.
pub trait GrammarStrategy {
    fn name(&self) -> &'static str;
    fn matches(&self, expr: &str) -> bool;
    fn compile(&self, expr: &str, registries: &Arc<Registries>) -> Result<Query, ExtractError>;
}

/// Ordered, first-match-wins dispatch over grammars.
pub struct GrammarRegistry {
    strategies: Vec<Arc<dyn GrammarStrategy>>,
}

impl GrammarRegistry {
    pub fn new() -> Self {
        GrammarRegistry {
            strategies: Vec::new(),
        }
    }

    /// Priority order: element-reference, merge, property, plain-text,
    /// missing.
    pub fn with_defaults() -> Self {
        let mut registry = GrammarRegistry::new();
        registry.add(Arc::new(ElementRefGrammar));
        registry.add(Arc::new(MergeGrammar));
        registry.add(Arc::new(PropertyGrammar));
        registry.add(Arc::new(PlainTextGrammar));
        registry.add(Arc::new(MissingGrammar));
        registry
    }

    pub fn add(&mut self, strategy: Arc<dyn GrammarStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn lookup(&self, expr: &str) -> Result<&Arc<dyn GrammarStrategy>, ExtractError> {
        self.strategies
            .iter()
            .find(|s| s.matches(expr))
            .ok_or_else(|| {
                ExtractError::StrategyExhausted(format!("no grammar accepts '{}'", expr))
            })
    }
}

impl Default for GrammarRegistry {
    fn default() -> Self {
        GrammarRegistry::with_defaults()
    }
}

/// Compiles an expression into a ready-to-run query.
pub fn interpret(registries: &Arc<Registries>, expr: &str) -> Result<Query, ExtractError> {
    let expr = expr.trim();
    let grammar = registries.grammars.lookup(expr)?;
    tracing::trace!("expression '{}' handled by {} grammar", expr, grammar.name());
    grammar.compile(expr, registries)
}

/// Strips a trailing list-cardinality marker. A `*` that follows
/// whitespace stays put — it is a universal selector, not a marker.
fn strip_list_marker(expr: &str) -> (&str, bool) {
    if expr.len() > 1 && expr.ends_with('*') && !expr.ends_with(" *") {
        (&expr[..expr.len() - 1], true)
    } else {
        (expr, false)
    }
}

/// Byte index of the brace closing the one at `open`, honoring nesting.
fn matching_brace(expr: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, ch) in expr[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits on `+` at nesting depth zero (braces and parentheses both
/// nest, so `:nth-child(2n+1)` stays whole). Returns None unless the
/// split produces at least two non-empty parts.
fn split_top_level_plus(expr: &str) -> Option<Vec<&str>> {
    let mut depth = 0i32;
    let mut parts = Vec::new();
    let mut start = 0usize;
    for (index, ch) in expr.char_indices() {
        match ch {
            '{' | '(' => depth += 1,
            '}' | ')' => depth -= 1,
            '+' if depth == 0 => {
                parts.push(expr[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(expr[start..].trim());
    if parts.len() >= 2 && parts.iter().all(|part| !part.is_empty()) {
        Some(parts)
    } else {
        None
    }
}

/// Appends one select step for a selector that is either CSS or a path
/// expression (leading `/`).
fn push_select(query: Query, selector: &str, rooted: bool) -> Query {
    use crate::query::{MatchDef, Step, StepDef, StepKind};
    let def = if selector.starts_with('/') {
        MatchDef::path(selector)
    } else {
        MatchDef::css(selector)
    };
    let def = if rooted { def.rooted() } else { def };
    query.push(Step::new(StepKind::Select, StepDef::Match(def)))
}

/// `{sel}` — match and return the raw node(s); `{::document > sel}`
/// anchors at the document root.
struct ElementRefGrammar;

impl GrammarStrategy for ElementRefGrammar {
    fn name(&self) -> &'static str {
        "element-reference"
    }

    fn matches(&self, expr: &str) -> bool {
        let (body, _) = strip_list_marker(expr);
        body.starts_with('{') && matching_brace(body, 0) == Some(body.len() - 1)
    }

    fn compile(&self, expr: &str, registries: &Arc<Registries>) -> Result<Query, ExtractError> {
        let (body, list) = strip_list_marker(expr);
        let mut inner = body[1..body.len() - 1].trim();
        let mut rooted = false;
        if let Some(rest) = inner.strip_prefix("::document") {
            rooted = true;
            inner = rest.trim_start().strip_prefix('>').unwrap_or(rest).trim();
        }
        if inner.is_empty() {
            return Err(ExtractError::Interpretation(expr.to_string()));
        }
        let query = push_select(Query::new(Arc::clone(registries)), inner, rooted);
        Ok(if list { query.all() } else { query })
    }
}

/// `exprA + exprB` — run both against the same context, concatenate in
/// declaration order.
struct MergeGrammar;

impl GrammarStrategy for MergeGrammar {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn matches(&self, expr: &str) -> bool {
        split_top_level_plus(expr).is_some()
    }

    fn compile(&self, expr: &str, registries: &Arc<Registries>) -> Result<Query, ExtractError> {
        let parts = split_top_level_plus(expr)
            .ok_or_else(|| ExtractError::Interpretation(expr.to_string()))?;
        let mut queries = Vec::with_capacity(parts.len());
        for part in parts {
            queries.push(interpret(registries, part)?);
        }
        Ok(Query::new(Arc::clone(registries)).merge(queries).all())
    }
}

/// `sel{prop}` / `sel{prop{prop2}}` / `::item{prop}` — match (or keep the
/// current node) and read a chain of properties.
struct PropertyGrammar;

impl GrammarStrategy for PropertyGrammar {
    fn name(&self) -> &'static str {
        "property"
    }

    fn matches(&self, expr: &str) -> bool {
        let (body, _) = strip_list_marker(expr);
        match body.find('{') {
            Some(0) | None => false,
            Some(open) => matching_brace(body, open) == Some(body.len() - 1),
        }
    }

    fn compile(&self, expr: &str, registries: &Arc<Registries>) -> Result<Query, ExtractError> {
        let (body, list) = strip_list_marker(expr);
        let open = body
            .find('{')
            .ok_or_else(|| ExtractError::Interpretation(expr.to_string()))?;
        let prefix = body[..open].trim();
        let inner = &body[open + 1..body.len() - 1];

        let mut query = Query::new(Arc::clone(registries));
        if prefix != "::item" {
            query = push_select(query, prefix, false);
        }
        for name in parse_property_chain(inner, expr)? {
            query = query.prop(name);
        }
        Ok(if list { query.all() } else { query })
    }
}

/// Unwraps `prop{sub{...}}` into the ordered property names.
fn parse_property_chain<'a>(
    mut inner: &'a str,
    whole: &str,
) -> Result<Vec<&'a str>, ExtractError> {
    let mut names = Vec::new();
    loop {
        inner = inner.trim();
        match inner.find('{') {
            None => {
                if !PROP_NAME_RE.is_match(inner) {
                    return Err(ExtractError::Interpretation(whole.to_string()));
                }
                names.push(inner);
                return Ok(names);
            }
            Some(open) => {
                if matching_brace(inner, open) != Some(inner.len() - 1) {
                    return Err(ExtractError::Interpretation(whole.to_string()));
                }
                let name = inner[..open].trim();
                if !PROP_NAME_RE.is_match(name) {
                    return Err(ExtractError::Interpretation(whole.to_string()));
                }
                names.push(name);
                inner = &inner[open + 1..inner.len() - 1];
            }
        }
    }
}

/// Bare selector — match it and read its text content.
struct PlainTextGrammar;

impl GrammarStrategy for PlainTextGrammar {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    fn matches(&self, expr: &str) -> bool {
        let (body, _) = strip_list_marker(expr);
        !body.is_empty() && !body.contains('{') && !body.contains('}')
    }

    fn compile(&self, expr: &str, registries: &Arc<Registries>) -> Result<Query, ExtractError> {
        let (body, list) = strip_list_marker(expr);
        let query = push_select(Query::new(Arc::clone(registries)), body.trim(), false).prop("text");
        Ok(if list { query.all() } else { query })
    }
}

/// Catch-all: reaching it means no grammar understood the expression.
struct MissingGrammar;

impl GrammarStrategy for MissingGrammar {
    fn name(&self) -> &'static str {
        "missing"
    }

    fn matches(&self, _expr: &str) -> bool {
        true
    }

    fn compile(&self, expr: &str, _registries: &Arc<Registries>) -> Result<Query, ExtractError> {
        Err(ExtractError::Interpretation(expr.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{MatchSyntax, StepDef, StepKind};

    fn kinds(query: &Query) -> Vec<StepKind> {
        query.steps.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn plain_selector_compiles_to_match_plus_text() {
        let registries = Registries::with_defaults();
        let query = interpret(&registries, "h1").unwrap();
        assert_eq!(kinds(&query), vec![StepKind::Select, StepKind::Prop]);
    }

    #[test]
    fn trailing_star_selects_list_cardinality() {
        let registries = Registries::with_defaults();
        let query = interpret(&registries, ".review*").unwrap();
        assert_eq!(
            kinds(&query),
            vec![StepKind::Select, StepKind::Prop, StepKind::All]
        );
        // A star after whitespace is a universal selector, not a marker.
        let query = interpret(&registries, "div *").unwrap();
        assert_eq!(kinds(&query), vec![StepKind::Select, StepKind::Prop]);
    }

    #[test]
    fn element_reference_returns_raw_nodes() {
        let registries = Registries::with_defaults();
        let query = interpret(&registries, "{.price}").unwrap();
        assert_eq!(kinds(&query), vec![StepKind::Select]);

        let query = interpret(&registries, "{.price}*").unwrap();
        assert_eq!(kinds(&query), vec![StepKind::Select, StepKind::All]);
    }

    #[test]
    fn document_rooted_reference_is_anchored_at_root() {
        let registries = Registries::with_defaults();
        let query = interpret(&registries, "{::document > .banner}").unwrap();
        match &query.steps[0].def {
            StepDef::Match(def) => {
                assert!(def.rooted);
                assert_eq!(def.expr, ".banner");
            }
            other => panic!("unexpected def {:?}", other),
        }
    }

    #[test]
    fn path_expressions_compile_to_path_matches() {
        let registries = Registries::with_defaults();
        let query = interpret(&registries, "{/html/body/div[2]}").unwrap();
        match &query.steps[0].def {
            StepDef::Match(def) => assert_eq!(def.syntax, MatchSyntax::Path),
            other => panic!("unexpected def {:?}", other),
        }
    }

    #[test]
    fn property_access_nests_arbitrarily() {
        let registries = Registries::with_defaults();
        let query = interpret(&registries, "img{src}").unwrap();
        assert_eq!(kinds(&query), vec![StepKind::Select, StepKind::Prop]);

        let query = interpret(&registries, "a{href{text}}").unwrap();
        assert_eq!(
            kinds(&query),
            vec![StepKind::Select, StepKind::Prop, StepKind::Prop]
        );
    }

    #[test]
    fn item_form_skips_the_match_step() {
        let registries = Registries::with_defaults();
        let query = interpret(&registries, "::item{value}").unwrap();
        assert_eq!(kinds(&query), vec![StepKind::Prop]);
    }

    #[test]
    fn merge_splits_at_the_top_level_only() {
        let registries = Registries::with_defaults();
        let query = interpret(&registries, "imgA{src} + imgB{src}").unwrap();
        assert_eq!(kinds(&query), vec![StepKind::Merge, StepKind::All]);

        // '+' inside parentheses belongs to the selector.
        let query = interpret(&registries, "li:nth-child(2n+1)").unwrap();
        assert_eq!(kinds(&query), vec![StepKind::Select, StepKind::Prop]);
    }

    #[test]
    fn unparseable_expressions_raise_interpretation_errors() {
        let registries = Registries::with_defaults();
        let err = interpret(&registries, "div{").unwrap_err();
        assert!(matches!(err, ExtractError::Interpretation(_)));

        let err = interpret(&registries, "").unwrap_err();
        assert!(matches!(err, ExtractError::Interpretation(_)));
    }
}
