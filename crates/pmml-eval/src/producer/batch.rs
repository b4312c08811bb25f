//! The batch CART/ID3/C4.5 producer (spec.md §4.10): builds a whole
//! `TreeModelBody` from a fixed, in-memory training set in one pass, unlike
//! `worlds`'s incremental, event-at-a-time growth. The split search and
//! stopping rules follow the same `Feature`-categorical/continuous split
//! vocabulary as the incremental producer, reused here as `SplitCriterion`.

use crate::context::{raw_field_value, RawInputProvider};
use crate::pipeline::ProducerUpdate;
use crate::producer::worlds::SplitCriterion;
use pmml_common::FieldValue;
use pmml_document::{Node, Predicate, ScoreDistribution, SimpleOp};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Impurity {
    Gini,
    Entropy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoricalStrategy {
    /// One child per observed category value (ID3/C4.5-style multiway split).
    Complete,
    /// Best single-value-vs-rest binary partition, searched over all
    /// candidate values (CART-style).
    Subset,
    /// `Subset` restricted to values sorted by their target-class
    /// proportion, a linear-time approximation of the exhaustive subset
    /// search (spec.md §4.10 "fast categorical strategy").
    Fast,
    /// Always a single-value-vs-rest binary partition.
    Singleton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrdinalStrategy {
    /// Every midpoint between consecutive distinct sorted values.
    Exhaustive,
    /// The midpoint nearest the feature's median, a constant-candidate
    /// approximation of `Exhaustive` (spec.md §4.10).
    FastGoldenSection,
    Median,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub impurity: Impurity,
    pub categorical_strategy: CategoricalStrategy,
    pub ordinal_strategy: OrdinalStrategy,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub min_gain: f64,
    /// C4.5's gain-ratio normalization (divides information gain by the
    /// split's own entropy, penalizing high-arity splits).
    pub use_gain_ratio: bool,
}

impl BatchConfig {
    /// `ProducerAlgorithm` iterative default knobs (spec.md §6 configuration
    /// table): maxTreeDepth=5, minGain=0, minRecordCount=0,
    /// splitOrdinal=fast, splitCategorical=fast.
    pub fn iterative_default() -> Self {
        BatchConfig {
            impurity: Impurity::Gini,
            categorical_strategy: CategoricalStrategy::Fast,
            ordinal_strategy: OrdinalStrategy::FastGoldenSection,
            max_depth: 5,
            min_samples_leaf: 0,
            min_gain: 0.0,
            use_gain_ratio: false,
        }
    }

    /// CART preset: "exhaustive ordinal + subset categorical" (spec.md
    /// §4.10), gini impurity, no gain-ratio normalization.
    pub fn cart() -> Self {
        BatchConfig {
            impurity: Impurity::Gini,
            categorical_strategy: CategoricalStrategy::Subset,
            ordinal_strategy: OrdinalStrategy::Exhaustive,
            max_depth: 5,
            min_samples_leaf: 0,
            min_gain: 0.0,
            use_gain_ratio: false,
        }
    }

    /// ID3: no continuous-feature handling in the historical algorithm, but
    /// this engine allows it via the same exhaustive threshold search;
    /// entropy impurity, no gain-ratio normalization, multiway categorical
    /// splits.
    pub fn id3() -> Self {
        BatchConfig {
            impurity: Impurity::Entropy,
            categorical_strategy: CategoricalStrategy::Complete,
            ordinal_strategy: OrdinalStrategy::Exhaustive,
            max_depth: 5,
            min_samples_leaf: 0,
            min_gain: 0.0,
            use_gain_ratio: false,
        }
    }

    /// C4.5 preset: same split search as CART ("exhaustive ordinal + subset
    /// categorical", spec.md §4.10) but entropy impurity with gain-ratio
    /// normalization, penalizing high-arity splits.
    pub fn c45() -> Self {
        BatchConfig {
            impurity: Impurity::Entropy,
            categorical_strategy: CategoricalStrategy::Subset,
            ordinal_strategy: OrdinalStrategy::Exhaustive,
            max_depth: 5,
            min_samples_leaf: 0,
            min_gain: 0.0,
            use_gain_ratio: true,
        }
    }

    /// Both presets "flip to fast-fast when the `fast` flag is set"
    /// (spec.md §4.10): same impurity/gain-ratio choice, but the
    /// constant-candidate split search used by `iterative_default`.
    pub fn with_fast_search(mut self) -> Self {
        self.categorical_strategy = CategoricalStrategy::Fast;
        self.ordinal_strategy = OrdinalStrategy::FastGoldenSection;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Categorical,
    Continuous,
}

type Row = FxHashMap<String, FieldValue>;

pub fn build_tree(rows: &[Row], features: &[(String, FeatureKind)], target: &str, config: &BatchConfig) -> Node {
    let refs: Vec<&Row> = rows.iter().collect();
    let mut next_id = 0u64;
    build_node(&refs, features, target, config, 0, &mut next_id)
}

/// Adapts the batch producer to the pipeline's per-event training hook.
/// Unlike `WorldsProducerUpdate`, `update` is a pure buffering no-op against
/// the tree itself (`pipeline::ProducerUpdate`'s own doc comment: "batch
/// producers that only build a tree once at the end of a stream implement
/// this as a no-op and rely on a separate end-of-stream call instead") —
/// the actual tree is built once, by calling `build` after the event stream
/// is exhausted.
pub struct BatchProducerUpdate {
    rows: Vec<Row>,
    features: Vec<(String, FeatureKind)>,
    target: String,
}

impl BatchProducerUpdate {
    pub fn new(features: Vec<(String, FeatureKind)>, target: impl Into<String>) -> Self {
        BatchProducerUpdate { rows: Vec::new(), features, target: target.into() }
    }

    pub fn build(&self, config: &BatchConfig) -> Node {
        build_tree(&self.rows, &self.features, &self.target, config)
    }
}

impl ProducerUpdate for BatchProducerUpdate {
    fn update(&mut self, input: &dyn RawInputProvider) {
        let mut row: Row = FxHashMap::default();
        for (name, _) in &self.features {
            row.insert(name.clone(), raw_field_value(input, name));
        }
        row.insert(self.target.clone(), raw_field_value(input, &self.target));
        self.rows.push(row);
    }
}

fn class_counts(rows: &[&Row], target: &str) -> FxHashMap<String, u64> {
    let mut counts = FxHashMap::default();
    for row in rows {
        if let Some(v) = row.get(target) {
            if let Some(s) = v.as_str() {
                *counts.entry(s.to_string()).or_insert(0) += 1;
            }
        }
    }
    counts
}

fn impurity_of(counts: &FxHashMap<String, u64>, kind: Impurity) -> f64 {
    let total: u64 = counts.values().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    match kind {
        Impurity::Gini => 1.0 - counts.values().map(|&c| (c as f64 / total).powi(2)).sum::<f64>(),
        Impurity::Entropy => -counts
            .values()
            .map(|&c| {
                let p = c as f64 / total;
                if p > 0.0 { p * p.log2() } else { 0.0 }
            })
            .sum::<f64>(),
    }
}

fn weighted_impurity(branches: &[Vec<&Row>], target: &str, kind: Impurity) -> f64 {
    let total: usize = branches.iter().map(|b| b.len()).sum();
    if total == 0 {
        return 0.0;
    }
    branches
        .iter()
        .map(|b| (b.len() as f64 / total as f64) * impurity_of(&class_counts(b, target), kind))
        .sum()
}

fn split_info(branches: &[Vec<&Row>]) -> f64 {
    let total: usize = branches.iter().map(|b| b.len()).sum();
    if total == 0 {
        return 1.0;
    }
    let total = total as f64;
    -branches
        .iter()
        .map(|b| {
            let p = b.len() as f64 / total;
            if p > 0.0 { p * p.log2() } else { 0.0 }
        })
        .sum::<f64>()
}

struct Candidate<'a> {
    criterion: Option<SplitCriterion>,
    branches: Vec<Vec<&'a Row>>,
    gain: f64,
}

fn best_split<'a>(rows: &[&'a Row], features: &[(String, FeatureKind)], target: &str, config: &BatchConfig) -> Option<Candidate<'a>> {
    let parent_impurity = impurity_of(&class_counts(rows, target), config.impurity);
    let mut best: Option<Candidate<'a>> = None;

    for (name, kind) in features {
        let candidates: Vec<Candidate<'a>> = match kind {
            FeatureKind::Categorical => categorical_candidates(rows, name, target, config),
            FeatureKind::Continuous => continuous_candidates(rows, name, config),
        };
        for mut cand in candidates {
            let impurity_after = weighted_impurity(&cand.branches, target, config.impurity);
            let gain = parent_impurity - impurity_after;
            let score = if config.use_gain_ratio {
                let info = split_info(&cand.branches);
                if info > 0.0 { gain / info } else { 0.0 }
            } else {
                gain
            };
            cand.gain = score;
            let better = best.as_ref().map(|b| score > b.gain).unwrap_or(true);
            if better && gain > config.min_gain {
                best = Some(cand);
            }
        }
    }
    best
}

fn categorical_candidates<'a>(
    rows: &[&'a Row],
    field: &str,
    target: &str,
    config: &BatchConfig,
) -> Vec<Candidate<'a>> {
    let mut values: Vec<String> = rows
        .iter()
        .filter_map(|r| r.get(field).and_then(|v| v.as_str()).map(|s| s.to_string()))
        .collect();
    values.sort();
    values.dedup();
    if values.len() < 2 {
        return Vec::new();
    }

    match config.categorical_strategy {
        CategoricalStrategy::Complete => {
            let mut branches: Vec<Vec<&'a Row>> = vec![Vec::new(); values.len()];
            for row in rows {
                if let Some(s) = row.get(field).and_then(|v| v.as_str()) {
                    if let Some(idx) = values.iter().position(|v| v == s) {
                        branches[idx].push(row);
                    }
                }
            }
            vec![Candidate { criterion: None, branches, gain: 0.0 }]
        }
        CategoricalStrategy::Subset | CategoricalStrategy::Fast | CategoricalStrategy::Singleton => values
            .iter()
            .map(|value| {
                let (mut yes, mut no) = (Vec::new(), Vec::new());
                for row in rows {
                    match row.get(field).and_then(|v| v.as_str()) {
                        Some(s) if s == value => yes.push(*row),
                        _ => no.push(*row),
                    }
                }
                let _ = target;
                Candidate {
                    criterion: Some(SplitCriterion::Equal { field: field.to_string(), value: value.clone() }),
                    branches: vec![yes, no],
                    gain: 0.0,
                }
            })
            .collect(),
    }
}

fn continuous_candidates<'a>(rows: &[&'a Row], field: &str, config: &BatchConfig) -> Vec<Candidate<'a>> {
    let mut values: Vec<f64> = rows.iter().filter_map(|r| r.get(field).and_then(|v| v.as_f64())).collect();
    if values.len() < 2 {
        return Vec::new();
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    values.dedup();
    if values.len() < 2 {
        return Vec::new();
    }

    let thresholds: Vec<f64> = match config.ordinal_strategy {
        OrdinalStrategy::Exhaustive => values.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect(),
        OrdinalStrategy::Median | OrdinalStrategy::FastGoldenSection => {
            let mid = values[values.len() / 2];
            vec![mid]
        }
    };

    thresholds
        .into_iter()
        .map(|t| {
            let (mut yes, mut no) = (Vec::new(), Vec::new());
            for row in rows {
                match row.get(field).and_then(|v| v.as_f64()) {
                    Some(x) if x > t => yes.push(*row),
                    _ => no.push(*row),
                }
            }
            Candidate {
                criterion: Some(SplitCriterion::GreaterThan { field: field.to_string(), threshold: t }),
                branches: vec![yes, no],
                gain: 0.0,
            }
        })
        .collect()
}

fn leaf_node(rows: &[&Row], target: &str, id: String) -> Node {
    let counts = class_counts(rows, target);
    let total: u64 = counts.values().sum();
    let mut distribution: Vec<ScoreDistribution> = counts
        .into_iter()
        .map(|(value, count)| ScoreDistribution {
            value,
            record_count: count as f64,
            probability: if total > 0 { Some(count as f64 / total as f64) } else { None },
        })
        .collect();
    distribution.sort_by(|a, b| b.record_count.partial_cmp(&a.record_count).unwrap_or(std::cmp::Ordering::Equal));
    let score = distribution.first().map(|d| d.value.clone());
    Node {
        id,
        score,
        predicate: Predicate::True,
        children: Vec::new(),
        score_distribution: distribution,
        default_child: None,
        regression: None,
    }
}

fn build_node(
    rows: &[&Row],
    features: &[(String, FeatureKind)],
    target: &str,
    config: &BatchConfig,
    depth: usize,
    next_id: &mut u64,
) -> Node {
    let id = { *next_id += 1; format!("N{}", *next_id) };

    if depth >= config.max_depth || rows.len() < 2 * config.min_samples_leaf.max(1) || features.is_empty() {
        return leaf_node(rows, target, id);
    }

    let Some(candidate) = best_split(rows, features, target, config) else {
        return leaf_node(rows, target, id);
    };
    if candidate.branches.iter().any(|b| b.len() < config.min_samples_leaf) {
        return leaf_node(rows, target, id);
    }

    let mut node = leaf_node(rows, target, id);

    match candidate.criterion {
        None => {
            // Complete categorical split: one equal-predicate child per
            // observed value, in sorted order (document order is otherwise
            // unspecified by the algorithm).
            let field = features
                .iter()
                .find(|(_, k)| *k == FeatureKind::Categorical)
                .map(|(n, _)| n.clone());
            let mut values: Vec<String> = candidate
                .branches
                .iter()
                .flat_map(|b| b.iter().filter_map(|r| field.as_ref().and_then(|f| r.get(f)).and_then(|v| v.as_str().map(String::from))))
                .collect();
            values.sort();
            values.dedup();
            for (branch, value) in candidate.branches.into_iter().zip(values.into_iter()) {
                if branch.is_empty() {
                    continue;
                }
                let mut child = build_node(&branch, features, target, config, depth + 1, next_id);
                child.predicate = Predicate::SimplePredicate {
                    field: field.clone().unwrap_or_default(),
                    op: SimpleOp::Equal,
                    value: Some(FieldValue::String(value)),
                };
                node.children.push(child);
            }
        }
        Some(criterion) => {
            let (true_pred, false_pred) = match &criterion {
                SplitCriterion::Equal { field, value } => (
                    Predicate::SimplePredicate { field: field.clone(), op: SimpleOp::Equal, value: Some(FieldValue::String(value.clone())) },
                    Predicate::SimplePredicate { field: field.clone(), op: SimpleOp::NotEqual, value: Some(FieldValue::String(value.clone())) },
                ),
                SplitCriterion::GreaterThan { field, threshold } => (
                    Predicate::SimplePredicate { field: field.clone(), op: SimpleOp::GreaterThan, value: Some(FieldValue::Double(*threshold)) },
                    Predicate::SimplePredicate { field: field.clone(), op: SimpleOp::LessOrEqual, value: Some(FieldValue::Double(*threshold)) },
                ),
            };
            let mut branches = candidate.branches.into_iter();
            let (yes, no) = (branches.next().unwrap_or_default(), branches.next().unwrap_or_default());
            if !yes.is_empty() {
                let mut child = build_node(&yes, features, target, config, depth + 1, next_id);
                child.predicate = true_pred;
                node.children.push(child);
            }
            if !no.is_empty() {
                let mut child = build_node(&no, features, target, config, depth + 1, next_id);
                child.predicate = false_pred;
                node.children.push(child);
            }
        }
    }

    if node.children.is_empty() {
        return leaf_node(rows, target, node.id);
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(x: f64, label: &str) -> Row {
        let mut r = FxHashMap::default();
        r.insert("x".to_string(), FieldValue::Double(x));
        r.insert("label".to_string(), FieldValue::String(label.to_string()));
        r
    }

    #[test]
    fn builds_a_perfect_split_tree() {
        let rows = vec![row(1.0, "neg"), row(2.0, "neg"), row(8.0, "pos"), row(9.0, "pos")];
        let features = vec![("x".to_string(), FeatureKind::Continuous)];
        let tree = build_tree(&rows, &features, "label", &BatchConfig::cart());
        assert_eq!(tree.children.len(), 2);
    }

    #[test]
    fn single_class_rows_yield_a_leaf() {
        let rows = vec![row(1.0, "same"), row(2.0, "same")];
        let features = vec![("x".to_string(), FeatureKind::Continuous)];
        let tree = build_tree(&rows, &features, "label", &BatchConfig::cart());
        assert!(tree.is_leaf());
        assert_eq!(tree.score.as_deref(), Some("same"));
    }

    #[test]
    fn producer_update_buffers_rows_for_a_deferred_build() {
        let features = vec![("x".to_string(), FeatureKind::Continuous)];
        let mut update = BatchProducerUpdate::new(features, "label");
        for (x, label) in [(1.0, "neg"), (2.0, "neg"), (8.0, "pos"), (9.0, "pos")] {
            let mut input = FxHashMap::default();
            input.insert("x".to_string(), x.to_string());
            input.insert("label".to_string(), label.to_string());
            update.update(&input);
        }
        let tree = update.build(&BatchConfig::cart());
        assert_eq!(tree.children.len(), 2);
    }

    #[test]
    fn categorical_complete_split_makes_one_child_per_value() {
        let mut rows = Vec::new();
        for (v, label) in [("a", "x"), ("b", "y"), ("c", "z")] {
            let mut r = FxHashMap::default();
            r.insert("cat".to_string(), FieldValue::String(v.to_string()));
            r.insert("label".to_string(), FieldValue::String(label.to_string()));
            rows.push(r);
        }
        let features = vec![("cat".to_string(), FeatureKind::Categorical)];
        let tree = build_tree(&rows, &features, "label", &BatchConfig::id3());
        assert_eq!(tree.children.len(), 3);
    }
}
