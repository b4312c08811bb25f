//! Decision-tree scoring (spec.md §4.7 "Tree consumer"). A single top-down
//! walk from the root: each node picks the first child whose predicate is
//! `True`; the `missingValueStrategy` decides what to do when a child was
//! `Unknown` instead, and `noTrueChildStrategy` when every child was `False`.

use crate::context::{DataContext, RawInputProvider};
use crate::expr_eval::eval_expression;
use crate::predicate_eval::eval_predicate_counted;
use pmml_common::Truth;
use pmml_document::{MissingValueStrategy, Node, NoTrueChildStrategy, ScoreDistribution, TreeModelBody};

#[derive(Debug, Clone, PartialEq)]
pub struct TreeScore {
    pub node_id: String,
    pub score: Option<String>,
    pub confidence: Option<f64>,
    pub score_distribution: Vec<ScoreDistribution>,
    /// Surrogate children bypassed (Unknown) across the whole walk, before a
    /// decidable result, at every node visited (spec.md §4.6/§8).
    pub surrogate_unknowns: u32,
}

pub fn score_tree(body: &TreeModelBody, ctx: &DataContext, input: &dyn RawInputProvider) -> Option<TreeScore> {
    let mut unknowns = 0;
    walk(
        &body.root,
        body.missing_value_strategy,
        body.no_true_child_strategy,
        body.missing_value_penalty.unwrap_or(1.0),
        ctx,
        input,
        1.0,
        &mut unknowns,
    )
}

fn walk(
    node: &Node,
    strategy: MissingValueStrategy,
    no_true_child: NoTrueChildStrategy,
    penalty: f64,
    ctx: &DataContext,
    input: &dyn RawInputProvider,
    confidence_mult: f64,
    unknowns: &mut u32,
) -> Option<TreeScore> {
    if node.is_leaf() {
        return Some(leaf(node, ctx, input, confidence_mult, *unknowns));
    }

    let mut saw_unknown = false;
    for child in &node.children {
        match eval_predicate_counted(&child.predicate, ctx, input, unknowns) {
            Truth::True => return walk(child, strategy, no_true_child, penalty, ctx, input, confidence_mult, unknowns),
            Truth::Unknown => saw_unknown = true,
            Truth::False => {}
        }
    }

    if saw_unknown {
        match strategy {
            MissingValueStrategy::LastPrediction => return Some(leaf(node, ctx, input, confidence_mult, *unknowns)),
            MissingValueStrategy::NullPrediction => return None,
            MissingValueStrategy::DefaultChild => {
                if let Some(default_id) = &node.default_child {
                    if let Some(child) = node.children.iter().find(|c| &c.id == default_id) {
                        return walk(
                            child,
                            strategy,
                            no_true_child,
                            penalty,
                            ctx,
                            input,
                            confidence_mult * penalty,
                            unknowns,
                        );
                    }
                }
                return Some(leaf(node, ctx, input, confidence_mult, *unknowns));
            }
            MissingValueStrategy::None => {}
            MissingValueStrategy::WeightedConfidence | MissingValueStrategy::AggregateNodes => {
                unreachable!("rejected at bind time, see bind::bind_tree_model")
            }
        }
    }

    match no_true_child {
        NoTrueChildStrategy::ReturnNullPrediction => None,
        NoTrueChildStrategy::ReturnLastPrediction => Some(leaf(node, ctx, input, confidence_mult, *unknowns)),
    }
}

fn leaf(node: &Node, ctx: &DataContext, input: &dyn RawInputProvider, confidence_mult: f64, surrogate_unknowns: u32) -> TreeScore {
    let score = match &node.regression {
        Some(expr) => match eval_expression(expr, ctx, input) {
            crate::expr_eval::EvalOutcome::Value(v) if v.is_valid() => Some(v.to_string()),
            _ => None,
        },
        None => node.score.clone(),
    };
    let confidence = node
        .score_distribution
        .iter()
        .filter_map(|d| d.probability)
        .fold(None, |best: Option<f64>, p| match best {
            Some(b) if b >= p => Some(b),
            _ => Some(p),
        })
        .map(|p| p * confidence_mult);
    TreeScore {
        node_id: node.id.clone(),
        score,
        confidence,
        score_distribution: node.score_distribution.clone(),
        surrogate_unknowns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataContext;
    use pmml_common::FieldValue;
    use pmml_document::{
        DataDictionary, DataType, FieldType, FunctionTable, LocalTransformations, MiningField, MiningSchema,
        Predicate, SimpleOp, TransformationDictionary,
    };
    use rustc_hash::FxHashMap;

    fn two_level_tree(strategy: MissingValueStrategy) -> TreeModelBody {
        TreeModelBody {
            root: Node {
                id: "1".into(),
                score: Some("root".into()),
                predicate: Predicate::True,
                children: vec![
                    Node {
                        id: "2".into(),
                        score: Some("left".into()),
                        predicate: Predicate::SimplePredicate {
                            field: "x".into(),
                            op: SimpleOp::LessThan,
                            value: Some(FieldValue::Double(0.0)),
                        },
                        children: vec![],
                        score_distribution: vec![],
                        default_child: None,
                        regression: None,
                    },
                    Node {
                        id: "3".into(),
                        score: Some("right".into()),
                        predicate: Predicate::SimplePredicate {
                            field: "x".into(),
                            op: SimpleOp::GreaterOrEqual,
                            value: Some(FieldValue::Double(0.0)),
                        },
                        children: vec![],
                        score_distribution: vec![],
                        default_child: Some("3".into()),
                        regression: None,
                    },
                ],
                score_distribution: vec![],
                default_child: None,
                regression: None,
            },
            missing_value_strategy: strategy,
            no_true_child_strategy: NoTrueChildStrategy::ReturnNullPrediction,
            missing_value_penalty: Some(0.5),
        }
    }

    fn ctx_fixture() -> (DataDictionary, MiningSchema, TransformationDictionary, LocalTransformations, FunctionTable) {
        let mut dd = DataDictionary::new();
        dd.insert("x", FieldType::continuous(DataType::Double));
        let ms = MiningSchema::new(vec![MiningField::active("x")]);
        (dd, ms, TransformationDictionary::default(), LocalTransformations::default(), FunctionTable::default())
    }

    #[test]
    fn descends_to_matching_leaf() {
        let (dd, ms, td, lt, ft) = ctx_fixture();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let mut input = FxHashMap::default();
        input.insert("x".to_string(), "5".to_string());
        let body = two_level_tree(MissingValueStrategy::NullPrediction);
        let result = score_tree(&body, &ctx, &input).unwrap();
        assert_eq!(result.score.as_deref(), Some("right"));
    }

    #[test]
    fn null_prediction_on_missing_field() {
        let (dd, ms, td, lt, ft) = ctx_fixture();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let body = two_level_tree(MissingValueStrategy::NullPrediction);
        assert!(score_tree(&body, &ctx, &input).is_none());
    }

    #[test]
    fn last_prediction_falls_back_to_current_node() {
        let (dd, ms, td, lt, ft) = ctx_fixture();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let body = two_level_tree(MissingValueStrategy::LastPrediction);
        let result = score_tree(&body, &ctx, &input).unwrap();
        assert_eq!(result.score.as_deref(), Some("root"));
    }

    #[test]
    fn default_child_descends_with_penalty() {
        let (dd, ms, td, lt, ft) = ctx_fixture();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let body = two_level_tree(MissingValueStrategy::DefaultChild);
        let result = score_tree(&body, &ctx, &input).unwrap();
        assert_eq!(result.score.as_deref(), Some("right"));
    }
}
