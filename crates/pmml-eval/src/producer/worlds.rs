//! The incremental tree producer (spec.md §4.9 "Worlds producer"), grounded
//! in the `Feature`/`Split`/`World` design of Open Data Group's Augustus
//! scoring engine (`algorithms/trees.py`): per-node candidate splits are
//! grown from a pool of immature trials into mature, gain-scored splits, and
//! a node commits to its single best split once enough evidence has
//! accumulated, recursing into two children up to a configured depth.
//!
//! Unlike the original, which lets `worldsToSplit` candidate splits each
//! spawn a provisional child `World` and explores several simultaneously,
//! this producer commits a node to its single best-by-gain split as soon as
//! it matures — see DESIGN.md for why that simplification still satisfies
//! the "fully seeded, bit-identical runs" determinism contract.

use crate::context::{raw_field_value, RawInputProvider};
use crate::pipeline::ProducerUpdate;
use pmml_common::FieldValue;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Categorical,
    Continuous,
}

/// Running per-feature statistics a node uses to generate candidate splits:
/// the observed value set for categorical features, Welford mean/variance
/// for continuous ones.
#[derive(Debug, Clone)]
pub struct Feature {
    pub name: String,
    pub kind: FeatureKind,
    count: u64,
    mean: f64,
    m2: f64,
    values: HashSet<String>,
}

impl Feature {
    pub fn new(name: impl Into<String>, kind: FeatureKind) -> Self {
        Feature {
            name: name.into(),
            kind,
            count: 0,
            mean: 0.0,
            m2: 0.0,
            values: HashSet::new(),
        }
    }

    pub fn update(&mut self, value: &FieldValue) {
        if !value.is_valid() {
            return;
        }
        match self.kind {
            FeatureKind::Categorical => {
                if let Some(s) = value.as_str() {
                    self.values.insert(s.to_string());
                }
            }
            FeatureKind::Continuous => {
                if let Some(x) = value.as_f64() {
                    self.count += 1;
                    let delta = x - self.mean;
                    self.mean += delta / self.count as f64;
                    self.m2 += delta * (x - self.mean);
                }
            }
        }
    }

    fn is_mature(&self, threshold: u64) -> bool {
        match self.kind {
            FeatureKind::Categorical => self.values.len() as u64 >= threshold.min(2),
            FeatureKind::Continuous => self.count >= threshold,
        }
    }

    fn stdev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / self.count as f64).sqrt()
        }
    }

    fn random_split(&self, rng: &mut SmallRng) -> Option<SplitCriterion> {
        match self.kind {
            FeatureKind::Categorical => {
                let values: Vec<&String> = self.values.iter().collect();
                if values.is_empty() {
                    return None;
                }
                let idx = rng.gen_range(0..values.len());
                Some(SplitCriterion::Equal {
                    field: self.name.clone(),
                    value: values[idx].clone(),
                })
            }
            FeatureKind::Continuous => {
                // Box-Muller: no dependency on rand_distr, matching
                // `random.gauss(mean, stdev)` closely enough for a candidate
                // threshold (exact reproduction of Python's RNG is not a
                // design goal, only within-process determinism is).
                let u1: f64 = rng.gen_range(1e-12..1.0);
                let u2: f64 = rng.gen_range(0.0..1.0);
                let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
                Some(SplitCriterion::GreaterThan {
                    field: self.name.clone(),
                    threshold: self.mean + z * self.stdev(),
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum SplitCriterion {
    Equal { field: String, value: String },
    GreaterThan { field: String, threshold: f64 },
}

impl SplitCriterion {
    fn route(&self, get: &dyn Fn(&str) -> FieldValue) -> Option<bool> {
        match self {
            SplitCriterion::Equal { field, value } => {
                let v = get(field);
                v.as_str().map(|s| s == value)
            }
            SplitCriterion::GreaterThan { field, threshold } => {
                let v = get(field);
                v.as_f64().map(|x| x > *threshold)
            }
        }
    }

    fn field(&self) -> &str {
        match self {
            SplitCriterion::Equal { field, .. } | SplitCriterion::GreaterThan { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone)]
struct Split {
    criterion: SplitCriterion,
    maturity_counter: u64,
    mature: bool,
    true_counts: FxHashMap<String, u64>,
    false_counts: FxHashMap<String, u64>,
}

impl Split {
    fn new(criterion: SplitCriterion) -> Self {
        Split {
            criterion,
            maturity_counter: 0,
            mature: false,
            true_counts: FxHashMap::default(),
            false_counts: FxHashMap::default(),
        }
    }

    fn increment(&mut self, get: &dyn Fn(&str) -> FieldValue, class_label: &str, maturity_threshold: u64) {
        let Some(decision) = self.criterion.route(get) else {
            return;
        };
        let counts = if decision { &mut self.true_counts } else { &mut self.false_counts };
        *counts.entry(class_label.to_string()).or_insert(0) += 1;
        self.maturity_counter += 1;
        if self.maturity_counter >= maturity_threshold {
            self.mature = true;
        }
    }

    fn gain(&self) -> f64 {
        gini_gain(&self.true_counts, &self.false_counts)
    }
}

fn gini(counts: &FxHashMap<String, u64>) -> f64 {
    let total: u64 = counts.values().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts.values().map(|&c| (c as f64 / total).powi(2)).sum::<f64>()
}

fn gini_gain(true_counts: &FxHashMap<String, u64>, false_counts: &FxHashMap<String, u64>) -> f64 {
    let nt: u64 = true_counts.values().sum();
    let nf: u64 = false_counts.values().sum();
    let n = (nt + nf) as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mut merged = true_counts.clone();
    for (k, v) in false_counts {
        *merged.entry(k.clone()).or_insert(0) += v;
    }
    let weighted = (nt as f64 / n) * gini(true_counts) + (nf as f64 / n) * gini(false_counts);
    gini(&merged) - weighted
}

#[derive(Debug, Clone, Copy)]
pub struct WorldsConfig {
    pub feature_maturity_threshold: u64,
    pub split_maturity_threshold: u64,
    pub trials_to_keep: usize,
    pub worlds_to_split: usize,
    pub tree_depth: usize,
}

impl Default for WorldsConfig {
    /// Mirrors Augustus's `ProducerTreeModel.defaultParams` (spec.md §4.9).
    fn default() -> Self {
        WorldsConfig {
            feature_maturity_threshold: 10,
            split_maturity_threshold: 30,
            trials_to_keep: 50,
            worlds_to_split: 3,
            tree_depth: 3,
        }
    }
}

struct World {
    depth: usize,
    class_counts: FxHashMap<String, u64>,
    mature: Vec<Split>,
    immature: Vec<Split>,
    committed: Option<usize>,
    true_child: Option<usize>,
    false_child: Option<usize>,
}

impl World {
    fn new(depth: usize) -> Self {
        World {
            depth,
            class_counts: FxHashMap::default(),
            mature: Vec::new(),
            immature: Vec::new(),
            committed: None,
            true_child: None,
            false_child: None,
        }
    }
}

/// Grows one decision tree incrementally, event by event, using a fully
/// seeded PRNG so repeated runs over the same event stream are bit-identical
/// (spec.md §4.9 determinism contract).
pub struct WorldsProducer {
    config: WorldsConfig,
    rng: SmallRng,
    features: Vec<Feature>,
    arena: Vec<World>,
    root: usize,
}

impl WorldsProducer {
    pub fn new(seed: u64, features: Vec<Feature>, config: WorldsConfig) -> Self {
        WorldsProducer {
            config,
            rng: SmallRng::seed_from_u64(seed),
            features,
            arena: vec![World::new(0)],
            root: 0,
        }
    }

    /// Advances every active feature's running statistics and the
    /// committed-split path for one event. Per spec.md §4.9 step 1, this is
    /// all-or-nothing: if `class_label` is itself invalid, or any active
    /// feature's raw value is invalid/missing, the event contributes nothing
    /// at all — no feature statistic, no class count, no split counter
    /// advances. Values are read for every feature before any mutation so a
    /// later feature's invalid value can't leave earlier ones partially
    /// updated.
    pub fn increment(&mut self, get: &dyn Fn(&str) -> FieldValue, class_label: &FieldValue) {
        if !class_label.is_valid() {
            return;
        }
        let values: Vec<FieldValue> = self.features.iter().map(|f| get(&f.name)).collect();
        if values.iter().any(|v| !v.is_valid()) {
            return;
        }
        for (feature, value) in self.features.iter_mut().zip(&values) {
            feature.update(value);
        }

        let class_label = class_label.to_string();
        let mut node = self.root;
        loop {
            *self.arena[node].class_counts.entry(class_label.clone()).or_insert(0) += 1;

            if let Some(split_idx) = self.arena[node].committed {
                let criterion = self.arena[node].mature[split_idx].criterion.clone();
                let Some(decision) = criterion.route(get) else { return };
                let next = self.ensure_child(node, decision);
                node = next;
                continue;
            }

            self.grow_node(node, get, &class_label);
            return;
        }
    }

    fn ensure_child(&mut self, node: usize, decision: bool) -> usize {
        let depth = self.arena[node].depth + 1;
        let existing = if decision { self.arena[node].true_child } else { self.arena[node].false_child };
        if let Some(idx) = existing {
            return idx;
        }
        self.arena.push(World::new(depth));
        let idx = self.arena.len() - 1;
        if decision {
            self.arena[node].true_child = Some(idx);
        } else {
            self.arena[node].false_child = Some(idx);
        }
        idx
    }

    fn grow_node(&mut self, node: usize, get: &dyn Fn(&str) -> FieldValue, class_label: &str) {
        let mature_features: Vec<&Feature> = self
            .features
            .iter()
            .filter(|f| f.is_mature(self.config.feature_maturity_threshold))
            .collect();
        if mature_features.is_empty() {
            return;
        }

        let world = &mut self.arena[node];
        while world.mature.len() + world.immature.len() <= self.config.trials_to_keep {
            let idx = self.rng.gen_range(0..mature_features.len());
            let Some(criterion) = mature_features[idx].random_split(&mut self.rng) else {
                break;
            };
            world.immature.push(Split::new(criterion));
        }

        for split in world.mature.iter_mut().chain(world.immature.iter_mut()) {
            split.increment(get, class_label, self.config.split_maturity_threshold);
        }

        let (newly_mature, still_immature): (Vec<Split>, Vec<Split>) =
            world.immature.drain(..).partition(|s| s.mature);
        world.mature.extend(newly_mature);
        world.immature = still_immature;

        if world.mature.len() > self.config.trials_to_keep {
            world
                .mature
                .sort_by(|a, b| b.gain().partial_cmp(&a.gain()).unwrap_or(std::cmp::Ordering::Equal));
            world.mature.truncate(self.config.trials_to_keep);
        }

        if world.depth < self.config.tree_depth && world.mature.len() >= self.config.worlds_to_split {
            let best = world
                .mature
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.gain().partial_cmp(&b.1.gain()).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i);
            world.committed = best;
        }
    }

    /// Materializes the current state of the tree as a bound `Node` tree,
    /// usable immediately for scoring even mid-stream (spec.md §4.9 "the
    /// producer's tree is queryable at any point, not only at the end of the
    /// stream").
    pub fn best_tree(&self) -> pmml_document::Node {
        self.materialize(self.root, "N")
    }

    fn materialize(&self, idx: usize, id: &str) -> pmml_document::Node {
        use pmml_document::{Predicate, ScoreDistribution, SimpleOp};

        let world = &self.arena[idx];
        let total: u64 = world.class_counts.values().sum();
        let mut distribution: Vec<ScoreDistribution> = world
            .class_counts
            .iter()
            .map(|(value, &count)| ScoreDistribution {
                value: value.clone(),
                record_count: count as f64,
                probability: if total > 0 { Some(count as f64 / total as f64) } else { None },
            })
            .collect();
        distribution.sort_by(|a, b| b.record_count.partial_cmp(&a.record_count).unwrap_or(std::cmp::Ordering::Equal));
        let score = distribution.first().map(|d| d.value.clone());

        let children = match world.committed {
            Some(split_idx) => {
                let criterion = &world.mature[split_idx].criterion;
                let (true_id, false_id) = (format!("{id}-T"), format!("{id}-F"));
                let true_pred = match criterion {
                    SplitCriterion::Equal { field, value } => Predicate::SimplePredicate {
                        field: field.clone(),
                        op: SimpleOp::Equal,
                        value: Some(FieldValue::String(value.clone())),
                    },
                    SplitCriterion::GreaterThan { field, threshold } => Predicate::SimplePredicate {
                        field: field.clone(),
                        op: SimpleOp::GreaterThan,
                        value: Some(FieldValue::Double(*threshold)),
                    },
                };
                let false_pred = match criterion {
                    SplitCriterion::Equal { field, value } => Predicate::SimplePredicate {
                        field: field.clone(),
                        op: SimpleOp::NotEqual,
                        value: Some(FieldValue::String(value.clone())),
                    },
                    SplitCriterion::GreaterThan { field, threshold } => Predicate::SimplePredicate {
                        field: field.clone(),
                        op: SimpleOp::LessOrEqual,
                        value: Some(FieldValue::Double(*threshold)),
                    },
                };
                let mut kids = Vec::new();
                if let Some(true_child) = world.true_child {
                    let mut node = self.materialize(true_child, &true_id);
                    node.predicate = true_pred;
                    kids.push(node);
                }
                if let Some(false_child) = world.false_child {
                    let mut node = self.materialize(false_child, &false_id);
                    node.predicate = false_pred;
                    kids.push(node);
                }
                let _ = criterion.field();
                kids
            }
            None => Vec::new(),
        };

        pmml_document::Node {
            id: id.to_string(),
            score,
            predicate: Predicate::True,
            children,
            score_distribution: distribution,
            default_child: None,
            regression: None,
        }
    }
}

/// Adapts `WorldsProducer` to the pipeline's per-event training hook
/// (spec.md §5: "optionally ProducerAlgorithm.update(get)"). Reads the
/// classifier field and every feature straight off the event's untreated
/// wire value, the same way `increment`'s own doc comment already describes
/// its `get` closure's contract.
pub struct WorldsProducerUpdate {
    pub producer: WorldsProducer,
    classifier_field: String,
}

impl WorldsProducerUpdate {
    pub fn new(producer: WorldsProducer, classifier_field: impl Into<String>) -> Self {
        WorldsProducerUpdate { producer, classifier_field: classifier_field.into() }
    }
}

impl ProducerUpdate for WorldsProducerUpdate {
    fn update(&mut self, input: &dyn RawInputProvider) {
        let class_label = raw_field_value(input, &self.classifier_field);
        let get = |name: &str| raw_field_value(input, name);
        self.producer.increment(&get, &class_label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_fn(x: f64) -> impl Fn(&str) -> FieldValue {
        move |name: &str| if name == "x" { FieldValue::Double(x) } else { FieldValue::Missing }
    }

    #[test]
    fn feature_matures_after_threshold_events() {
        let mut f = Feature::new("x", FeatureKind::Continuous);
        for i in 0..10 {
            f.update(&FieldValue::Double(i as f64));
        }
        assert!(f.is_mature(10));
    }

    #[test]
    fn gini_gain_is_positive_for_perfect_split() {
        let mut t = FxHashMap::default();
        t.insert("yes".to_string(), 10u64);
        let mut f = FxHashMap::default();
        f.insert("no".to_string(), 10u64);
        assert!(gini_gain(&t, &f) > 0.4);
    }

    #[test]
    fn producer_grows_a_root_and_stays_queryable_mid_stream() {
        let features = vec![Feature::new("x", FeatureKind::Continuous)];
        let config = WorldsConfig {
            feature_maturity_threshold: 2,
            split_maturity_threshold: 3,
            trials_to_keep: 4,
            worlds_to_split: 1,
            tree_depth: 2,
        };
        let mut producer = WorldsProducer::new(42, features, config);
        for i in 0..40 {
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            let label = FieldValue::String(if i % 2 == 0 { "pos" } else { "neg" }.to_string());
            producer.increment(&get_fn(x), &label);
        }
        let tree = producer.best_tree();
        assert!(!tree.score_distribution.is_empty());
    }

    #[test]
    fn invalid_feature_value_skips_the_whole_event() {
        let features = vec![Feature::new("x", FeatureKind::Continuous)];
        let config = WorldsConfig { feature_maturity_threshold: 2, ..WorldsConfig::default() };
        let mut producer = WorldsProducer::new(1, features, config);
        let label = FieldValue::String("pos".to_string());
        producer.increment(&|_: &str| FieldValue::Invalid, &label);
        assert_eq!(producer.features[0].count, 0);
        assert!(producer.arena[producer.root].class_counts.is_empty());
    }

    #[test]
    fn invalid_classifier_label_skips_the_whole_event() {
        let features = vec![Feature::new("x", FeatureKind::Continuous)];
        let config = WorldsConfig { feature_maturity_threshold: 2, ..WorldsConfig::default() };
        let mut producer = WorldsProducer::new(1, features, config);
        producer.increment(&get_fn(1.0), &FieldValue::Invalid);
        assert_eq!(producer.features[0].count, 0);
        assert!(producer.arena[producer.root].class_counts.is_empty());
    }

    #[test]
    fn producer_update_reads_classifier_and_features_from_raw_input() {
        let features = vec![Feature::new("x", FeatureKind::Continuous)];
        let config = WorldsConfig { feature_maturity_threshold: 2, ..WorldsConfig::default() };
        let mut update = WorldsProducerUpdate::new(WorldsProducer::new(7, features, config), "label");
        let mut input = FxHashMap::default();
        input.insert("x".to_string(), "1.0".to_string());
        input.insert("label".to_string(), "pos".to_string());
        update.update(&input);
        assert_eq!(update.producer.features[0].count, 1);
    }
}
