//! The per-event scoring pipeline (spec.md §5 "Scheduling model": "input
//! record → DataContext.clear → ModelBody.score(get) → Output emission;
//! optionally ProducerAlgorithm.update(get)").

use crate::consumer::ruleset::score_rule_set;
use crate::consumer::tree::score_tree;
use crate::context::{DataContext, RawInputProvider};
use crate::output::{emit_outputs, Prediction};
use dashmap::DashMap;
use pmml_common::FieldValue;
use pmml_document::{ModelBody, ModelContent, ModelDocument};
use rayon::prelude::*;

/// `ModelSetup.updateEvery` (spec.md §6): when a producer's `update` runs
/// relative to scoring. `Pipeline` only tracks the policy; driving the
/// aggregate-boundary case is the caller's responsibility, since "aggregate"
/// boundaries are defined by the configuration's `AggregationSettings`, not
/// by anything a single event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateEvery {
    Event,
    Aggregate,
    Both,
}

/// A producer's per-event training hook, decoupled from which concrete
/// producer (incremental `Worlds`, batch CART/ID3/C4.5) is in play. Batch
/// producers that only build a tree once at the end of a stream implement
/// this as a no-op and rely on a separate end-of-stream call instead.
pub trait ProducerUpdate {
    fn update(&mut self, input: &dyn RawInputProvider);
}

/// Drives one model body's clear/score/emit/update cycle for a stream of
/// events. Holds the `DataContext` so its per-event cache and aggregate
/// accumulators persist across calls.
pub struct ScoringPipeline<'doc> {
    model: &'doc ModelBody,
    ctx: DataContext<'doc>,
    update_every: UpdateEvery,
}

impl<'doc> ScoringPipeline<'doc> {
    pub fn new(document: &'doc ModelDocument, model: &'doc ModelBody, update_every: UpdateEvery) -> Self {
        let ctx = DataContext::new(
            &document.data_dictionary,
            &model.mining_schema,
            &document.transformation_dictionary,
            &model.local_transformations,
            &document.function_table,
            None,
        );
        ScoringPipeline { model, ctx, update_every }
    }

    pub fn context(&self) -> &DataContext<'doc> {
        &self.ctx
    }

    /// Clears per-event state, scores through the model's tree/rule-set
    /// body, and emits the configured `OutputField`s. Returns an empty
    /// vector for an unscorable model or a model family with no scoring
    /// math implemented (spec.md §1 Non-goals).
    pub fn score_event(
        &self,
        input: &dyn RawInputProvider,
        producer: Option<&mut dyn ProducerUpdate>,
    ) -> Vec<(String, FieldValue)> {
        self.ctx.clear();
        self.ctx.increment_aggregates(input);

        if !self.model.is_scorable {
            return Vec::new();
        }

        let prediction = match &self.model.content {
            ModelContent::TreeModel(body) => score_tree(body, &self.ctx, input).map(Prediction::from),
            ModelContent::RuleSetModel(body) => score_rule_set(body, &self.ctx, input).map(Prediction::from),
            ModelContent::Opaque(_) => None,
        }
        .unwrap_or_default();

        let emitted = emit_outputs(&self.model.output, &prediction, &self.ctx, input);
        tracing::trace!(fields = emitted.len(), "scored event");

        if let (UpdateEvery::Event | UpdateEvery::Both, Some(producer)) = (self.update_every, producer) {
            producer.update(input);
        }

        emitted
    }
}

/// Drives a batch of events across independent segments concurrently
/// (spec.md §5: "Parallelism, when introduced, is across segments... each
/// segment owns an independent MiningSchema, LocalTransformations, producer
/// state, and DataContext"). Each segment builds its own `ScoringPipeline`
/// and is advanced entirely on one worker thread; segments never share a
/// `DataContext`, so no synchronization is needed inside a segment's
/// scoring loop. `event_counts` is the only state shared across threads,
/// used purely for progress reporting.
pub struct SegmentedDriver<'doc> {
    document: &'doc ModelDocument,
    models_by_name: rustc_hash::FxHashMap<&'doc str, &'doc ModelBody>,
    event_counts: DashMap<String, u64>,
}

impl<'doc> SegmentedDriver<'doc> {
    pub fn new(document: &'doc ModelDocument) -> Self {
        let models_by_name = document
            .models
            .iter()
            .filter_map(|m| m.model_name.as_deref().map(|name| (name, m)))
            .collect();
        SegmentedDriver { document, models_by_name, event_counts: DashMap::new() }
    }

    pub fn event_count(&self, segment_model_name: &str) -> u64 {
        self.event_counts.get(segment_model_name).map(|c| *c).unwrap_or(0)
    }

    /// Scores one batch per segment, in parallel across segments, and in
    /// receipt order within a segment (spec.md §5 "Ordering guarantees").
    /// `batches` maps a segment's model name to its ordered events.
    pub fn score_batches<I>(&self, batches: Vec<(String, I)>, update_every: UpdateEvery) -> Vec<(String, Vec<Vec<(String, FieldValue)>>)>
    where
        I: IntoIterator<Item = rustc_hash::FxHashMap<String, String>> + Send,
        I::IntoIter: Send,
    {
        batches
            .into_par_iter()
            .filter_map(|(segment_name, events)| {
                let model = *self.models_by_name.get(segment_name.as_str())?;
                let pipeline = ScoringPipeline::new(self.document, model, update_every);
                let mut results = Vec::new();
                for event in events {
                    results.push(pipeline.score_event(&event, None));
                    *self.event_counts.entry(segment_name.clone()).or_insert(0) += 1;
                }
                tracing::debug!(segment = %segment_name, events = results.len(), "segment batch scored");
                Some((segment_name, results))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmml_document::{
        DataDictionary, FunctionTable, Header, MiningSchema, MissingValueStrategy, Node, NoTrueChildStrategy, Predicate,
        ScoreDistribution, TransformationDictionary, TreeModelBody,
    };
    use rustc_hash::FxHashMap;

    fn leaf(id: &str, score: &str) -> Node {
        Node {
            id: id.into(),
            score: Some(score.into()),
            predicate: Predicate::True,
            children: Vec::new(),
            score_distribution: vec![ScoreDistribution { value: score.into(), record_count: 1.0, probability: Some(1.0) }],
            default_child: None,
            regression: None,
        }
    }

    fn model_named(name: &str) -> ModelBody {
        ModelBody {
            model_name: Some(name.into()),
            function_name: pmml_document::FunctionName::Classification,
            is_scorable: true,
            mining_schema: MiningSchema::default(),
            output: Vec::new(),
            local_transformations: pmml_document::LocalTransformations::default(),
            content: ModelContent::TreeModel(TreeModelBody {
                root: leaf("N1", "yes"),
                missing_value_strategy: MissingValueStrategy::NullPrediction,
                no_true_child_strategy: NoTrueChildStrategy::ReturnNullPrediction,
                missing_value_penalty: None,
            }),
        }
    }

    fn document_with_tree() -> (ModelDocument, ModelBody) {
        let body = model_named("m");
        let document = ModelDocument {
            version: "4.4".into(),
            header: Header::default(),
            data_dictionary: DataDictionary::new(),
            transformation_dictionary: TransformationDictionary::default(),
            function_table: FunctionTable::default(),
            models: Vec::new(),
        };
        (document, body)
    }

    #[test]
    fn scores_a_single_leaf_tree() {
        let (document, model) = document_with_tree();
        let pipeline = ScoringPipeline::new(&document, &model, UpdateEvery::Event);
        let input: FxHashMap<String, String> = FxHashMap::default();
        let emitted = pipeline.score_event(&input, None);
        assert!(emitted.is_empty());
    }

    #[test]
    fn unscorable_model_emits_nothing() {
        let (document, mut model) = document_with_tree();
        model.is_scorable = false;
        let pipeline = ScoringPipeline::new(&document, &model, UpdateEvery::Event);
        let input: FxHashMap<String, String> = FxHashMap::default();
        assert!(pipeline.score_event(&input, None).is_empty());
    }

    #[test]
    fn segmented_driver_scores_each_segment_and_counts_events() {
        let document = ModelDocument {
            version: "4.4".into(),
            header: Header::default(),
            data_dictionary: DataDictionary::new(),
            transformation_dictionary: TransformationDictionary::default(),
            function_table: FunctionTable::default(),
            models: vec![model_named("west"), model_named("east")],
        };
        let driver = SegmentedDriver::new(&document);
        let batches = vec![
            ("west".to_string(), vec![FxHashMap::default(), FxHashMap::default()]),
            ("east".to_string(), vec![FxHashMap::default()]),
        ];
        let results = driver.score_batches(batches, UpdateEvery::Event);
        assert_eq!(results.len(), 2);
        assert_eq!(driver.event_count("west"), 2);
        assert_eq!(driver.event_count("east"), 1);
    }
}
