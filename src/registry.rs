// src/registry.rs
use crate::interpreter::GrammarRegistry;
use crate::options::OptionStrategyRegistry;
use crate::query::StepRegistry;
use std::sync::Arc;

/// The dispatch tables of one engine instance: step constructors, option
/// strategies, and expression grammars. Constructed once (per process or
/// per test) and passed by reference into everything that dispatches —
/// there are no global singletons, so registration order is an explicit,
/// testable input. Populate before use; never mutate mid-execution.
pub struct Registries {
    pub steps: StepRegistry,
    pub options: OptionStrategyRegistry,
    pub grammars: GrammarRegistry,
}

impl Registries {
    pub fn with_defaults() -> Arc<Self> {
        Arc::new(Registries {
            steps: StepRegistry::with_defaults(),
            options: OptionStrategyRegistry::with_defaults(),
            grammars: GrammarRegistry::with_defaults(),
        })
    }

    /// Assemble from explicitly built registries, for callers extending
    /// the dispatch tables.
    pub fn from_parts(
        steps: StepRegistry,
        options: OptionStrategyRegistry,
        grammars: GrammarRegistry,
    ) -> Arc<Self> {
        Arc::new(Registries {
            steps,
            options,
            grammars,
        })
    }
}
