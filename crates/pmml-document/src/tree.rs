//! `Node`/`Rule` document structure from spec.md §3 "Node (batch/consumer)"
//! and "Rule (batch/consumer)". Walking logic (the consumer) lives in
//! `pmml-eval::consumer`.

use crate::expression::Expression;
use crate::predicate::Predicate;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingValueStrategy {
    LastPrediction,
    NullPrediction,
    DefaultChild,
    WeightedConfidence,
    AggregateNodes,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoTrueChildStrategy {
    ReturnNullPrediction,
    ReturnLastPrediction,
}

/// Per-class probability, either given explicitly or computed from
/// `recordCount`s at bind time (spec.md §3 invariant: "sum to 1 ± 1e-5").
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreDistribution {
    pub value: String,
    pub record_count: f64,
    pub probability: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub score: Option<String>,
    pub predicate: Predicate,
    pub children: Vec<Node>,
    pub score_distribution: Vec<ScoreDistribution>,
    pub default_child: Option<String>,
    /// Embedded regression, evaluated against `get` instead of using `score`
    /// verbatim (spec.md §3 "Node").
    pub regression: Option<Expression>,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Normalizes `score_distribution` probabilities, filling any that are
    /// `None` from `recordCount` totals — assembled once at bind time.
    pub fn normalize_score_distribution(&mut self) {
        let total: f64 = self.score_distribution.iter().map(|d| d.record_count).sum();
        if total <= 0.0 {
            return;
        }
        for d in &mut self.score_distribution {
            if d.probability.is_none() {
                d.probability = Some(d.record_count / total);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSelectionCriterion {
    FirstHit,
    WeightedMax,
    WeightedSum,
}

#[derive(Debug, Clone)]
pub struct SimpleRule {
    pub predicate: Predicate,
    pub score: String,
    pub weight: f64,
    pub score_distribution: Vec<ScoreDistribution>,
}

#[derive(Debug, Clone)]
pub struct CompoundRule {
    pub predicate: Predicate,
    pub children: Vec<Rule>,
}

#[derive(Debug, Clone)]
pub enum Rule {
    Simple(SimpleRule),
    Compound(CompoundRule),
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    pub criterion: RuleSelectionCriterion,
    pub rules: Vec<Rule>,
    pub default_score: Option<String>,
    pub default_confidence: Option<f64>,
}

/// A batch tree's root-to-node index, built once at bind time so the
/// incremental producer's `defaultChild` lookups and the consumer's
/// `defaultChild` strategy don't re-walk the tree per event.
#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    by_id: HashMap<String, ()>,
}

impl NodeIndex {
    pub fn build(root: &Node) -> Self {
        let mut by_id = HashMap::new();
        fn walk(n: &Node, by_id: &mut HashMap<String, ()>) {
            by_id.insert(n.id.clone(), ());
            for c in &n.children {
                walk(c, by_id);
            }
        }
        walk(root, &mut by_id);
        NodeIndex { by_id }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }
}
