//! Output emission (spec.md §4.11): turns a model's prediction into the
//! document's `OutputField` list, supporting forward references from one
//! `OutputField` to an earlier one in the same list (a `transformedValue`
//! can read a previously emitted field by name, same mechanism as a
//! `DerivedField` reading a `MiningField`).

use crate::context::{DataContext, RawInputProvider};
use crate::expr_eval::{eval_expression, EvalOutcome};
use pmml_common::FieldValue;
use pmml_document::{OutputFeature, OutputField, ScoreDistribution};
use rustc_hash::FxHashMap;

/// The family-agnostic shape every consumer (tree, rule-set) reduces to
/// before output emission.
#[derive(Debug, Clone, Default)]
pub struct Prediction {
    pub score: Option<String>,
    pub confidence: Option<f64>,
    pub distribution: Vec<ScoreDistribution>,
    pub entity_id: Option<String>,
}

impl From<crate::consumer::tree::TreeScore> for Prediction {
    fn from(t: crate::consumer::tree::TreeScore) -> Self {
        Prediction {
            score: t.score,
            confidence: t.confidence,
            distribution: t.score_distribution,
            entity_id: Some(t.node_id),
        }
    }
}

impl From<crate::consumer::ruleset::RuleScore> for Prediction {
    fn from(r: crate::consumer::ruleset::RuleScore) -> Self {
        Prediction {
            score: r.score,
            confidence: r.confidence,
            distribution: r.score_distribution,
            entity_id: None,
        }
    }
}

pub fn emit_outputs(
    fields: &[OutputField],
    prediction: &Prediction,
    ctx: &DataContext,
    input: &dyn RawInputProvider,
) -> Vec<(String, FieldValue)> {
    let mut overlay: FxHashMap<String, FieldValue> = FxHashMap::default();
    let mut emitted = Vec::with_capacity(fields.len());

    for field in fields {
        ctx.push_override(overlay.clone(), true);
        let value = emit_one(field, prediction, ctx, input);
        ctx.pop_override();

        overlay.insert(field.name.clone(), value.clone());
        emitted.push((field.name.clone(), value));
    }
    emitted
}

fn emit_one(field: &OutputField, prediction: &Prediction, ctx: &DataContext, input: &dyn RawInputProvider) -> FieldValue {
    match field.feature {
        OutputFeature::PredictedValue | OutputFeature::PredictedDisplayValue => {
            prediction.score.clone().map(FieldValue::String).unwrap_or(FieldValue::Missing)
        }
        OutputFeature::Probability | OutputFeature::Affinity => {
            let target = field.value_filter.as_deref().or(prediction.score.as_deref());
            target
                .and_then(|v| prediction.distribution.iter().find(|d| d.value == v))
                .and_then(|d| d.probability)
                .map(FieldValue::Double)
                .unwrap_or(FieldValue::Missing)
        }
        OutputFeature::TransformedValue => evaluate_expression(field, ctx, input),
        OutputFeature::Decision => {
            let transformed = evaluate_expression(field, ctx, input);
            let key = transformed.to_string();
            field
                .decisions
                .iter()
                .find(|d| d.value == key)
                .map(|d| FieldValue::String(d.decision.clone()))
                .unwrap_or(FieldValue::Missing)
        }
        OutputFeature::EntityId => prediction.entity_id.clone().map(FieldValue::String).unwrap_or(FieldValue::Missing),
        // Clustering/association/regression-specific features: no producer
        // in this implementation emits the data they would read (spec.md §1
        // Non-goals), so they resolve to MISSING rather than panicking.
        OutputFeature::Residual
        | OutputFeature::StandardError
        | OutputFeature::ClusterId
        | OutputFeature::ClusterAffinity
        | OutputFeature::EntityAffinity
        | OutputFeature::Warning
        | OutputFeature::RuleValue
        | OutputFeature::ReasonCode => FieldValue::Missing,
    }
}

fn evaluate_expression(field: &OutputField, ctx: &DataContext, input: &dyn RawInputProvider) -> FieldValue {
    match &field.expression {
        Some(expr) => match eval_expression(expr, ctx, input) {
            EvalOutcome::Value(v) => v,
            EvalOutcome::Invalid => FieldValue::Invalid,
        },
        None => FieldValue::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmml_document::{DataDictionary, FunctionTable, LocalTransformations, MiningSchema, TransformationDictionary};

    fn empty_ctx() -> (DataDictionary, MiningSchema, TransformationDictionary, LocalTransformations, FunctionTable) {
        (
            DataDictionary::new(),
            MiningSchema::default(),
            TransformationDictionary::default(),
            LocalTransformations::default(),
            FunctionTable::default(),
        )
    }

    #[test]
    fn predicted_value_reads_through_from_prediction() {
        let (dd, ms, td, lt, ft) = empty_ctx();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = rustc_hash::FxHashMap::default();
        let prediction = Prediction { score: Some("yes".into()), confidence: Some(0.9), distribution: vec![], entity_id: None };
        let fields = vec![OutputField {
            name: "predicted".into(),
            display_name: None,
            feature: OutputFeature::PredictedValue,
            expression: None,
            decisions: vec![],
            value_filter: None,
            rank: None,
        }];
        let emitted = emit_outputs(&fields, &prediction, &ctx, &input);
        assert_eq!(emitted[0], ("predicted".to_string(), FieldValue::String("yes".into())));
    }

    #[test]
    fn probability_looks_up_matching_class() {
        let (dd, ms, td, lt, ft) = empty_ctx();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = rustc_hash::FxHashMap::default();
        let prediction = Prediction {
            score: Some("yes".into()),
            confidence: Some(0.75),
            distribution: vec![ScoreDistribution { value: "yes".into(), record_count: 4.0, probability: Some(0.75) }],
            entity_id: None,
        };
        let fields = vec![OutputField {
            name: "p_yes".into(),
            display_name: None,
            feature: OutputFeature::Probability,
            expression: None,
            decisions: vec![],
            value_filter: None,
            rank: None,
        }];
        let emitted = emit_outputs(&fields, &prediction, &ctx, &input);
        assert_eq!(emitted[0], ("p_yes".to_string(), FieldValue::Double(0.75)));
    }
}
