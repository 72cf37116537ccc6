// src/options/combinations.rs
use crate::document::DocumentOps;
use crate::options::{OptionChoice, OptionGroup};
use crate::registry::Registries;
use crate::utils::error::ExtractError;
use crate::value::{Record, Value};
use std::sync::Arc;

/// Lazily enumerates every combination of one choice per option group,
/// activating choices in lock-step so callers can extract against the
/// live document state between pulls.
///
/// The walk is an explicit odometer over per-group choice indexes — no
/// recursion, depth is just the group count. The first group varies
/// slowest, the last group fastest, and each group activates its control
/// exactly once per time a choice is visited. A group whose strategy
/// enumerates no choices contributes a single placeholder, so the product
/// never collapses to zero; zero groups yield exactly one empty
/// combination.
pub struct CombinationStream {
    doc: Arc<dyn DocumentOps>,
    registries: Arc<Registries>,
    groups: Vec<OptionGroup>,
    choice_sets: Vec<Vec<OptionChoice>>,
    indexes: Vec<usize>,
    state: StreamState,
}

#[derive(Clone, Copy)]
enum StreamState {
    Fresh,
    Running,
    Done,
}

impl CombinationStream {
    pub fn new(
        doc: Arc<dyn DocumentOps>,
        groups: Vec<OptionGroup>,
        registries: &Arc<Registries>,
    ) -> Self {
        CombinationStream {
            doc,
            registries: Arc::clone(registries),
            groups,
            choice_sets: Vec::new(),
            indexes: Vec::new(),
            state: StreamState::Fresh,
        }
    }

    /// The next combination, or `None` once the product is exhausted. A
    /// fresh stream re-enumerates from the start; there is no resuming a
    /// finished one.
    pub async fn next(&mut self) -> Result<Option<Record>, ExtractError> {
        match self.state {
            StreamState::Fresh => {
                self.enumerate_choices().await?;
                self.indexes = vec![0; self.groups.len()];
                for index in 0..self.groups.len() {
                    self.activate(index).await?;
                }
                self.state = StreamState::Running;
                Ok(Some(self.build()))
            }
            StreamState::Running => {
                // Odometer tick: bump the rightmost group that still has
                // choices left, resetting (and re-activating) everything
                // to its right.
                for index in (0..self.groups.len()).rev() {
                    if self.indexes[index] + 1 < self.choice_sets[index].len() {
                        self.indexes[index] += 1;
                        self.activate(index).await?;
                        for right in index + 1..self.groups.len() {
                            self.indexes[right] = 0;
                            self.activate(right).await?;
                        }
                        return Ok(Some(self.build()));
                    }
                }
                self.state = StreamState::Done;
                Ok(None)
            }
            StreamState::Done => Ok(None),
        }
    }

    /// Drains the stream into a list of combination records.
    pub async fn collect_all(&mut self) -> Result<Vec<Record>, ExtractError> {
        let mut all = Vec::new();
        while let Some(combination) = self.next().await? {
            all.push(combination);
        }
        Ok(all)
    }

    async fn enumerate_choices(&mut self) -> Result<(), ExtractError> {
        self.choice_sets.clear();
        for group in &self.groups {
            let mut choices = group
                .choices(self.doc.as_ref(), &self.registries.options)
                .await
                .map_err(|e| ExtractError::scoped(group.identifier().to_string(), e))?;
            if choices.is_empty() {
                choices.push(OptionChoice::placeholder());
            }
            tracing::debug!(
                "option group '{}' enumerated {} choice(s)",
                group.identifier(),
                choices.len()
            );
            self.choice_sets.push(choices);
        }
        Ok(())
    }

    async fn activate(&self, index: usize) -> Result<(), ExtractError> {
        let group = &self.groups[index];
        let choice = &self.choice_sets[index][self.indexes[index]];
        group
            .activate(self.doc.as_ref(), &self.registries.options, choice)
            .await
            .map_err(|e| ExtractError::scoped(group.identifier().to_string(), e))
    }

    /// One merged record: each group contributes its display label and
    /// activation value under its own identifier.
    fn build(&self) -> Record {
        self.groups
            .iter()
            .zip(&self.choice_sets)
            .zip(&self.indexes)
            .map(|((group, choices), &index)| {
                let choice = &choices[index];
                (
                    group.identifier().to_string(),
                    Value::Record(vec![
                        ("label".to_string(), choice.display.clone()),
                        ("value".to_string(), choice.value.clone()),
                    ]),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::document::HtmlDocument;
    use crate::options::OptionDecl;

    const CONTROLS: &str = r#"
        <html><body>
            <select id="edition">
                <option value="basic">Basic</option>
                <option value="pro">Pro</option>
                <option value="ultimate">Ultimate</option>
            </select>
            <select id="support">
                <option value="none">None</option>
                <option value="gold">Gold</option>
            </select>
            <select id="hollow"></select>
            <input id="gift" type="checkbox">
            <div id="swatches">
                <span data-value="red">Red</span>
                <span data-value="blue">Blue</span>
            </div>
            <div id="opaque"><p>nothing selectable</p></div>
        </body></html>
    "#;

    async fn stream_for(selectors: &[(&str, &str)]) -> (CombinationStream, ExecutionContext) {
        let registries = Registries::with_defaults();
        let doc: Arc<dyn DocumentOps> = Arc::new(HtmlDocument::parse(CONTROLS));
        let ctx = ExecutionContext::new(doc);
        let mut groups = Vec::new();
        for (id, selector) in selectors {
            let decl = OptionDecl::selector(*id, *selector);
            groups.push(OptionGroup::resolve(&decl, &ctx).await.unwrap());
        }
        let stream = CombinationStream::new(Arc::clone(ctx.doc()), groups, &registries);
        (stream, ctx)
    }

    fn field<'a>(record: &'a Record, id: &str, key: &str) -> &'a Value {
        record
            .iter()
            .find(|(name, _)| name == id)
            .map(|(_, value)| value)
            .unwrap()
            .record_get(key)
            .unwrap()
    }

    #[tokio::test]
    async fn product_count_is_the_product_of_choice_counts() {
        let (mut stream, _ctx) =
            stream_for(&[("edition", "#edition"), ("support", "#support")]).await;
        let all = stream.collect_all().await.unwrap();
        assert_eq!(all.len(), 6);

        // Distinct tuples, first option slowest, last option fastest.
        assert_eq!(field(&all[0], "edition", "value"), &Value::from("basic"));
        assert_eq!(field(&all[0], "support", "value"), &Value::from("none"));
        assert_eq!(field(&all[1], "support", "value"), &Value::from("gold"));
        assert_eq!(field(&all[2], "edition", "value"), &Value::from("pro"));
        assert_eq!(field(&all[5], "edition", "value"), &Value::from("ultimate"));
        assert_eq!(field(&all[5], "support", "value"), &Value::from("gold"));
    }

    #[tokio::test]
    async fn empty_groups_contribute_a_placeholder_not_zero() {
        let (mut stream, _ctx) =
            stream_for(&[("edition", "#edition"), ("extras", "#hollow")]).await;
        let all = stream.collect_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(field(&all[0], "extras", "value"), &Value::Null);
        assert_eq!(field(&all[0], "extras", "label"), &Value::Null);
    }

    #[tokio::test]
    async fn missing_group_elements_also_fall_back_to_a_placeholder() {
        let (mut stream, _ctx) = stream_for(&[("ghost", "#no-such-element")]).await;
        let all = stream.collect_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(field(&all[0], "ghost", "value"), &Value::Null);
    }

    #[tokio::test]
    async fn zero_options_yield_exactly_one_empty_combination() {
        let (mut stream, _ctx) = stream_for(&[]).await;
        let all = stream.collect_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_empty());
    }

    #[tokio::test]
    async fn toggles_and_choice_groups_dispatch_to_their_strategies() {
        let (mut stream, _ctx) =
            stream_for(&[("gift", "#gift"), ("color", "#swatches")]).await;
        let all = stream.collect_all().await.unwrap();
        // 2 toggle states x 2 swatches.
        assert_eq!(all.len(), 4);
        assert_eq!(field(&all[0], "gift", "value"), &Value::Bool(true));
        assert_eq!(field(&all[0], "color", "value"), &Value::from("red"));
        assert_eq!(field(&all[3], "gift", "value"), &Value::Bool(false));
        assert_eq!(field(&all[3], "color", "value"), &Value::from("blue"));
    }

    #[tokio::test]
    async fn unrecognized_shapes_hit_the_catch_all_strategy() {
        let (mut stream, _ctx) = stream_for(&[("mystery", "#opaque")]).await;
        let all = stream.collect_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(field(&all[0], "mystery", "value"), &Value::Null);
    }

    #[tokio::test]
    async fn activation_tracks_the_yielded_combination() {
        let (mut stream, ctx) = stream_for(&[("edition", "#edition")]).await;
        let select = ctx
            .doc()
            .query_all(ctx.doc().root(), "#edition")
            .await
            .unwrap()[0];

        let mut seen = Vec::new();
        while let Some(combination) = stream.next().await.unwrap() {
            // The document's live state matches the combination just
            // yielded, not a later one.
            let live = ctx.doc().read_property(select, "value").await.unwrap();
            assert_eq!(&live, field(&combination, "edition", "value"));
            seen.push(live);
        }
        assert_eq!(
            seen,
            vec![
                Value::from("basic"),
                Value::from("pro"),
                Value::from("ultimate"),
            ]
        );
    }
}
