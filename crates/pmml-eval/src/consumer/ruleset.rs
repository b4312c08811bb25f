//! Rule-set scoring (spec.md §4.8 "Rule-set consumer"). `CompoundRule`
//! nests a predicate that gates every rule beneath it; the document is
//! walked once per event, AND-ing enclosing predicates down each path, and
//! `ruleSelectionCriterion` decides how the resulting set of `True`
//! `SimpleRule`s combines into a final score.

use crate::context::{DataContext, RawInputProvider};
use crate::predicate_eval::eval_predicate_counted;
use pmml_common::Truth;
use pmml_document::{Rule, RuleSelectionCriterion, RuleSetModelBody, ScoreDistribution, SimpleRule};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct RuleScore {
    pub score: Option<String>,
    pub confidence: Option<f64>,
    pub score_distribution: Vec<ScoreDistribution>,
    /// Surrogate children bypassed (Unknown) across every rule's predicate
    /// evaluated for this event (spec.md §4.6/§8).
    pub surrogate_unknowns: u32,
}

pub fn score_rule_set(body: &RuleSetModelBody, ctx: &DataContext, input: &dyn RawInputProvider) -> Option<RuleScore> {
    let mut matches = Vec::new();
    let mut unknowns = 0;
    for rule in &body.rule_set.rules {
        collect_matches(rule, ctx, input, Truth::True, &mut matches, &mut unknowns);
    }
    let true_rules: Vec<&SimpleRule> = matches
        .into_iter()
        .filter(|(t, _)| *t == Truth::True)
        .map(|(_, r)| r)
        .collect();

    let scored = match body.rule_set.criterion {
        RuleSelectionCriterion::FirstHit => true_rules.first().map(|r| simple_to_score(r, unknowns)),
        RuleSelectionCriterion::WeightedMax => true_rules
            .into_iter()
            .max_by(|a, b| a.weight.partial_cmp(&b.weight).unwrap_or(std::cmp::Ordering::Equal))
            .map(|r| simple_to_score(r, unknowns)),
        RuleSelectionCriterion::WeightedSum => weighted_sum(&true_rules, unknowns),
    };

    scored.or_else(|| default_score(body))
}

fn collect_matches<'a>(
    rule: &'a Rule,
    ctx: &DataContext,
    input: &dyn RawInputProvider,
    parent: Truth,
    out: &mut Vec<(Truth, &'a SimpleRule)>,
    unknowns: &mut u32,
) {
    match rule {
        Rule::Simple(r) => out.push((parent.and(eval_predicate_counted(&r.predicate, ctx, input, unknowns)), r)),
        Rule::Compound(c) => {
            let combined = parent.and(eval_predicate_counted(&c.predicate, ctx, input, unknowns));
            for child in &c.children {
                collect_matches(child, ctx, input, combined, out, unknowns);
            }
        }
    }
}

fn simple_to_score(rule: &SimpleRule, surrogate_unknowns: u32) -> RuleScore {
    RuleScore {
        score: Some(rule.score.clone()),
        confidence: Some(rule.weight),
        score_distribution: rule.score_distribution.clone(),
        surrogate_unknowns,
    }
}

/// Weighted-sum: each matching rule's `score_distribution` contributes
/// `weight * probability` per class; the combined distribution is
/// renormalized over the **count** of matched rules, not their total weight
/// (spec.md §4.8: `R1(S,0.6) R2(T,0.3) R3(S,0.2)` all firing yields
/// `confidence(S) = (0.6+0.2)/3`, not `/1.1`).
fn weighted_sum(rules: &[&SimpleRule], surrogate_unknowns: u32) -> Option<RuleScore> {
    if rules.is_empty() {
        return None;
    }
    let mut totals: FxHashMap<String, f64> = FxHashMap::default();
    for rule in rules {
        if rule.score_distribution.is_empty() {
            *totals.entry(rule.score.clone()).or_insert(0.0) += rule.weight;
            continue;
        }
        for d in &rule.score_distribution {
            let p = d.probability.unwrap_or(0.0);
            *totals.entry(d.value.clone()).or_insert(0.0) += rule.weight * p;
        }
    }
    let count = rules.len() as f64;
    let mut distribution: Vec<ScoreDistribution> = totals
        .into_iter()
        .map(|(value, total)| ScoreDistribution {
            value,
            record_count: 0.0,
            probability: Some(total / count),
        })
        .collect();
    distribution.sort_by(|a, b| b.probability.partial_cmp(&a.probability).unwrap_or(std::cmp::Ordering::Equal));
    let best = distribution.first()?;
    Some(RuleScore {
        score: Some(best.value.clone()),
        confidence: best.probability,
        score_distribution: distribution,
        surrogate_unknowns,
    })
}

fn default_score(body: &RuleSetModelBody) -> Option<RuleScore> {
    body.rule_set.default_score.clone().map(|score| RuleScore {
        score: Some(score),
        confidence: body.rule_set.default_confidence,
        score_distribution: Vec::new(),
        surrogate_unknowns: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataContext;
    use pmml_common::FieldValue;
    use pmml_document::{
        DataDictionary, DataType, FieldType, FunctionTable, LocalTransformations, MiningField, MiningSchema,
        Predicate, RuleSet, SimpleOp, TransformationDictionary,
    };
    use rustc_hash::FxHashMap as Map;

    fn fixture() -> (DataDictionary, MiningSchema, TransformationDictionary, LocalTransformations, FunctionTable) {
        let mut dd = DataDictionary::new();
        dd.insert("x", FieldType::continuous(DataType::Double));
        let ms = MiningSchema::new(vec![MiningField::active("x")]);
        (dd, ms, TransformationDictionary::default(), LocalTransformations::default(), FunctionTable::default())
    }

    fn rule(id_score: &str, threshold: f64, weight: f64) -> Rule {
        Rule::Simple(SimpleRule {
            predicate: Predicate::SimplePredicate {
                field: "x".into(),
                op: SimpleOp::GreaterThan,
                value: Some(FieldValue::Double(threshold)),
            },
            score: id_score.to_string(),
            weight,
            score_distribution: vec![],
        })
    }

    #[test]
    fn first_hit_returns_first_matching_rule() {
        let (dd, ms, td, lt, ft) = fixture();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let mut input = Map::default();
        input.insert("x".to_string(), "5".to_string());
        let body = RuleSetModelBody {
            rule_set: RuleSet {
                criterion: RuleSelectionCriterion::FirstHit,
                rules: vec![rule("low", 10.0, 1.0), rule("high", 0.0, 2.0)],
                default_score: None,
                default_confidence: None,
            },
        };
        let result = score_rule_set(&body, &ctx, &input).unwrap();
        assert_eq!(result.score.as_deref(), Some("high"));
    }

    #[test]
    fn weighted_max_picks_highest_weight_among_matches() {
        let (dd, ms, td, lt, ft) = fixture();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let mut input = Map::default();
        input.insert("x".to_string(), "5".to_string());
        let body = RuleSetModelBody {
            rule_set: RuleSet {
                criterion: RuleSelectionCriterion::WeightedMax,
                rules: vec![rule("weak", 0.0, 1.0), rule("strong", 0.0, 9.0)],
                default_score: None,
                default_confidence: None,
            },
        };
        let result = score_rule_set(&body, &ctx, &input).unwrap();
        assert_eq!(result.score.as_deref(), Some("strong"));
    }

    #[test]
    fn weighted_sum_divides_by_rule_count_not_weight() {
        let (dd, ms, td, lt, ft) = fixture();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let mut input = Map::default();
        input.insert("x".to_string(), "5".to_string());
        let body = RuleSetModelBody {
            rule_set: RuleSet {
                criterion: RuleSelectionCriterion::WeightedSum,
                rules: vec![rule("S", 0.0, 0.6), rule("T", 0.0, 0.3), rule("S", 0.0, 0.2)],
                default_score: None,
                default_confidence: None,
            },
        };
        let result = score_rule_set(&body, &ctx, &input).unwrap();
        assert_eq!(result.score.as_deref(), Some("S"));
        assert!((result.confidence.unwrap() - (0.8 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn no_match_falls_back_to_default_score() {
        let (dd, ms, td, lt, ft) = fixture();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let mut input = Map::default();
        input.insert("x".to_string(), "-5".to_string());
        let body = RuleSetModelBody {
            rule_set: RuleSet {
                criterion: RuleSelectionCriterion::FirstHit,
                rules: vec![rule("only", 0.0, 1.0)],
                default_score: Some("fallback".into()),
                default_confidence: Some(0.1),
            },
        };
        let result = score_rule_set(&body, &ctx, &input).unwrap();
        assert_eq!(result.score.as_deref(), Some("fallback"));
    }
}
