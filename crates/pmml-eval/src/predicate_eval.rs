//! Three-valued predicate evaluation (spec.md §4.6). `Truth::Unknown` is
//! produced whenever a `SimplePredicate`/`CompoundPredicate` needed to
//! inspect a `Missing` or `Invalid` field; `SimpleSetPredicate` is the one
//! exception (spec.md §4.6: "a set predicate over an unreachable field is
//! False, not Unknown — set membership is decidable even when the field
//! itself carries no information").

use crate::context::{DataContext, RawInputProvider};
use crate::expr_eval::EvalOutcome;
use pmml_common::{FieldValue, Truth};
use pmml_document::{CompoundOp, Predicate, SetOp, SimpleOp};
use std::cmp::Ordering;

pub fn eval_predicate(pred: &Predicate, ctx: &DataContext, input: &dyn RawInputProvider) -> Truth {
    let mut unknowns = 0;
    eval_predicate_counted(pred, ctx, input, &mut unknowns)
}

/// Same as [`eval_predicate`], but accumulates into `unknowns` the number of
/// `Surrogate` children bypassed (evaluated `Unknown`) before the first
/// decidable result (spec.md §4.6/§8: `surrogate[(x>0),(y=='foo')]` over
/// `{x:MISSING, y:'foo'}` is `True` with `unknowns == 1`). Callers that score
/// a whole document per event (tree/rule-set consumers) pass one counter
/// through the entire walk so it accumulates across every surrogate
/// encountered, not just one predicate.
pub fn eval_predicate_counted(pred: &Predicate, ctx: &DataContext, input: &dyn RawInputProvider, unknowns: &mut u32) -> Truth {
    match pred {
        Predicate::True => Truth::True,
        Predicate::False => Truth::False,

        Predicate::SimplePredicate { field, op, value } => eval_simple(ctx, input, field, *op, value.as_ref()),

        Predicate::CompoundPredicate { op, children } => eval_compound(ctx, input, *op, children, unknowns),

        Predicate::SimpleSetPredicate { field, op, array } => match ctx.get(field, input) {
            EvalOutcome::Value(v) if v.is_valid() => {
                let member = array.contains(&v);
                Truth::from_bool(match op {
                    SetOp::IsIn => member,
                    SetOp::IsNotIn => !member,
                })
            }
            _ => Truth::False,
        },
    }
}

fn eval_simple(
    ctx: &DataContext,
    input: &dyn RawInputProvider,
    field: &str,
    op: SimpleOp,
    value: Option<&FieldValue>,
) -> Truth {
    let resolved = match ctx.get(field, input) {
        EvalOutcome::Value(v) => v,
        EvalOutcome::Invalid => return Truth::Unknown,
    };

    match op {
        SimpleOp::IsMissing => return Truth::from_bool(resolved.is_missing()),
        SimpleOp::IsNotMissing => return Truth::from_bool(!resolved.is_missing()),
        _ => {}
    }

    if !resolved.is_valid() {
        return Truth::Unknown;
    }
    let Some(literal) = value else {
        return Truth::Unknown;
    };

    match op {
        SimpleOp::Equal => Truth::from_bool(&resolved == literal),
        SimpleOp::NotEqual => Truth::from_bool(&resolved != literal),
        SimpleOp::LessThan | SimpleOp::LessOrEqual | SimpleOp::GreaterThan | SimpleOp::GreaterOrEqual => {
            let ordering = ctx
                .field_type(field)
                .and_then(|ft| ft.compare(&resolved, literal))
                .or_else(|| resolved.as_f64()?.partial_cmp(&literal.as_f64()?));
            let Some(ordering) = ordering else {
                return Truth::Unknown;
            };
            Truth::from_bool(match op {
                SimpleOp::LessThan => ordering == Ordering::Less,
                SimpleOp::LessOrEqual => ordering != Ordering::Greater,
                SimpleOp::GreaterThan => ordering == Ordering::Greater,
                SimpleOp::GreaterOrEqual => ordering != Ordering::Less,
                _ => unreachable!(),
            })
        }
        SimpleOp::IsMissing | SimpleOp::IsNotMissing => unreachable!(),
    }
}

fn eval_compound(ctx: &DataContext, input: &dyn RawInputProvider, op: CompoundOp, children: &[Predicate], unknowns: &mut u32) -> Truth {
    match op {
        CompoundOp::And => children
            .iter()
            .map(|c| eval_predicate_counted(c, ctx, input, unknowns))
            .fold(Truth::True, Truth::and),
        CompoundOp::Or => children
            .iter()
            .map(|c| eval_predicate_counted(c, ctx, input, unknowns))
            .fold(Truth::False, Truth::or),
        CompoundOp::Xor => children
            .iter()
            .map(|c| eval_predicate_counted(c, ctx, input, unknowns))
            .reduce(Truth::xor)
            .unwrap_or(Truth::Unknown),
        // Surrogate: use the first child whose truth is decidable, falling
        // through to the next on Unknown (spec.md §4.6 "surrogate chains
        // let a tree fall back to alternate splits for a missing field").
        // Every bypassed (Unknown) child ahead of the first decidable one
        // counts against `unknowns` (spec.md §8).
        CompoundOp::Surrogate => {
            for child in children {
                match eval_predicate_counted(child, ctx, input, unknowns) {
                    Truth::Unknown => *unknowns += 1,
                    decided => return decided,
                }
            }
            Truth::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmml_document::{DataDictionary, DataType, FieldType, FunctionTable, LocalTransformations, MiningField, MiningSchema, TransformationDictionary};
    use rustc_hash::FxHashMap;

    fn ctx_with_x() -> (DataDictionary, MiningSchema, TransformationDictionary, LocalTransformations, FunctionTable) {
        let mut dd = DataDictionary::new();
        dd.insert("x", FieldType::continuous(DataType::Double));
        let ms = MiningSchema::new(vec![MiningField::active("x")]);
        (dd, ms, TransformationDictionary::default(), LocalTransformations::default(), FunctionTable::default())
    }

    #[test]
    fn missing_field_yields_unknown_for_comparison() {
        let (dd, ms, td, lt, ft) = ctx_with_x();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let pred = Predicate::SimplePredicate {
            field: "x".to_string(),
            op: SimpleOp::GreaterThan,
            value: Some(FieldValue::Double(1.0)),
        };
        assert_eq!(eval_predicate(&pred, &ctx, &input), Truth::Unknown);
    }

    #[test]
    fn is_missing_is_decidable_even_when_missing() {
        let (dd, ms, td, lt, ft) = ctx_with_x();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let pred = Predicate::SimplePredicate { field: "x".to_string(), op: SimpleOp::IsMissing, value: None };
        assert_eq!(eval_predicate(&pred, &ctx, &input), Truth::True);
    }

    #[test]
    fn set_predicate_over_missing_field_is_false_not_unknown() {
        let (dd, ms, td, lt, ft) = ctx_with_x();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let pred = Predicate::SimpleSetPredicate {
            field: "x".to_string(),
            op: SetOp::IsIn,
            array: vec![FieldValue::Double(1.0)],
        };
        assert_eq!(eval_predicate(&pred, &ctx, &input), Truth::False);
    }

    #[test]
    fn and_short_circuits_on_false_child() {
        let (dd, ms, td, lt, ft) = ctx_with_x();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let pred = Predicate::CompoundPredicate {
            op: CompoundOp::And,
            children: vec![
                Predicate::False,
                Predicate::SimplePredicate { field: "x".to_string(), op: SimpleOp::GreaterThan, value: Some(FieldValue::Double(1.0)) },
            ],
        };
        assert_eq!(eval_predicate(&pred, &ctx, &input), Truth::False);
    }

    #[test]
    fn surrogate_falls_through_unknown_children() {
        let (dd, ms, td, lt, ft) = ctx_with_x();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let pred = Predicate::CompoundPredicate {
            op: CompoundOp::Surrogate,
            children: vec![
                Predicate::SimplePredicate { field: "x".to_string(), op: SimpleOp::GreaterThan, value: Some(FieldValue::Double(1.0)) },
                Predicate::True,
            ],
        };
        assert_eq!(eval_predicate(&pred, &ctx, &input), Truth::True);
    }

    #[test]
    fn surrogate_counts_one_bypass_before_deciding() {
        let mut dd = DataDictionary::new();
        dd.insert("x", FieldType::continuous(DataType::Double));
        dd.insert("y", FieldType::categorical_string());
        let ms = MiningSchema::new(vec![MiningField::active("x"), MiningField::active("y")]);
        let (td, lt, ft) = (TransformationDictionary::default(), LocalTransformations::default(), FunctionTable::default());
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let mut input = FxHashMap::default();
        input.insert("y".to_string(), "foo".to_string());
        let pred = Predicate::CompoundPredicate {
            op: CompoundOp::Surrogate,
            children: vec![
                Predicate::SimplePredicate { field: "x".to_string(), op: SimpleOp::GreaterThan, value: Some(FieldValue::Double(0.0)) },
                Predicate::SimplePredicate {
                    field: "y".to_string(),
                    op: SimpleOp::Equal,
                    value: Some(FieldValue::String("foo".to_string())),
                },
            ],
        };
        let mut unknowns = 0;
        let truth = eval_predicate_counted(&pred, &ctx, &input, &mut unknowns);
        assert_eq!(truth, Truth::True);
        assert_eq!(unknowns, 1);
    }
}
