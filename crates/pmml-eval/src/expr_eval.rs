//! Expression evaluation (spec.md §4.4) and the `sqlWhere` mini-dialect used
//! by `Aggregate` (spec.md §4.5). Both are pure functions of a
//! [`DataContext`] and the current event's raw input — no state of their own
//! lives here, it all lives in `DataContext` and `AggregateTable`.

use crate::builtins;
use crate::context::{DataContext, RawInputProvider};
use pmml_common::FieldValue;
use pmml_document::{ApplyInvalidTreatment, Expression, Function, OutlierTreatmentExpr, SimpleOp, SqlWhere};

/// The result of evaluating an expression: a value, or `Invalid` when the
/// evaluation needs to raise past this point (spec.md §4.4 "INVALID
/// propagates by raising to the nearest boundary that can act on it" — for
/// an `Apply` that boundary is `returnInvalid`/`asIs`; elsewhere it is the
/// DataContext caller, which records it verbatim).
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    Value(FieldValue),
    Invalid,
}

impl EvalOutcome {
    fn missing_or(self, map_missing_to: &Option<FieldValue>) -> EvalOutcome {
        match self {
            EvalOutcome::Value(v) if v.is_missing() => match map_missing_to {
                Some(m) => EvalOutcome::Value(m.clone()),
                None => EvalOutcome::Value(FieldValue::Missing),
            },
            other => other,
        }
    }
}

pub fn eval_expression(expr: &Expression, ctx: &DataContext, input: &dyn RawInputProvider) -> EvalOutcome {
    match expr {
        Expression::Constant(v) => EvalOutcome::Value(v.clone()),

        Expression::FieldRef { field, map_missing_to } => {
            let resolved = ctx.get(field, input);
            match &resolved {
                EvalOutcome::Value(v) if v.is_invalid() => EvalOutcome::Invalid,
                _ => resolved.missing_or(map_missing_to),
            }
        }

        Expression::NormContinuous {
            field,
            knots,
            map_missing_to,
            outliers,
        } => norm_continuous(ctx, input, field, knots, map_missing_to, *outliers),

        Expression::NormDiscrete {
            field,
            value,
            map_missing_to,
        } => match resolve_input(ctx, input, field, map_missing_to) {
            ResolvedInput::Value(v) => EvalOutcome::Value(FieldValue::Double(if &v == value { 1.0 } else { 0.0 })),
            ResolvedInput::Missing(outcome) | ResolvedInput::Invalid(outcome) => outcome,
        },

        Expression::Discretize {
            field,
            bins,
            map_missing_to,
            default_value,
        } => match resolve_input(ctx, input, field, map_missing_to) {
            ResolvedInput::Value(v) => {
                let Some(x) = v.as_f64() else {
                    return EvalOutcome::Invalid;
                };
                let hit = bins.iter().find(|bin| {
                    let above_left = bin.left.map(|l| x >= l).unwrap_or(true);
                    let below_right = bin.right.map(|r| x < r).unwrap_or(true);
                    above_left && below_right
                });
                match hit {
                    Some(bin) => EvalOutcome::Value(bin.value.clone()),
                    None => EvalOutcome::Value(default_value.clone().unwrap_or(FieldValue::Missing)),
                }
            }
            ResolvedInput::Missing(outcome) | ResolvedInput::Invalid(outcome) => outcome,
        },

        Expression::MapValues {
            field_columns,
            table,
            map_missing_to,
            default_value,
        } => {
            let mut key = Vec::with_capacity(field_columns.len());
            for (field_name, _column) in field_columns {
                match ctx.get(field_name, input) {
                    EvalOutcome::Value(v) if v.is_missing() => {
                        return match map_missing_to {
                            Some(m) => EvalOutcome::Value(m.clone()),
                            None => EvalOutcome::Value(FieldValue::Missing),
                        };
                    }
                    EvalOutcome::Value(v) if v.is_invalid() => return EvalOutcome::Invalid,
                    EvalOutcome::Invalid => return EvalOutcome::Invalid,
                    EvalOutcome::Value(v) => key.push(v),
                }
            }
            match table.lookup(&key) {
                Some(v) => EvalOutcome::Value(v.clone()),
                None => EvalOutcome::Value(default_value.clone().unwrap_or(FieldValue::Missing)),
            }
        }

        // The top-level Aggregate of a derived field is intercepted by
        // `DataContext::eval_derived` before this function runs; a nested
        // Aggregate (inside an Apply argument, say) is read the same way.
        Expression::Aggregate {
            field,
            function,
            group_field,
            ..
        } => {
            let group_key = match group_field {
                Some(g) => match ctx.get(g, input) {
                    EvalOutcome::Value(v) if v.is_valid() => Some(v),
                    _ => return EvalOutcome::Value(FieldValue::Missing),
                },
                None => None,
            };
            match ctx.read_aggregate(field, *function, group_key) {
                Some(v) => EvalOutcome::Value(v),
                None => EvalOutcome::Value(FieldValue::Invalid),
            }
        }

        Expression::Apply {
            function,
            args,
            map_missing_to,
            invalid_value_treatment,
        } => eval_apply(ctx, input, function, args, map_missing_to, *invalid_value_treatment),
    }
}

enum ResolvedInput {
    Value(FieldValue),
    Missing(EvalOutcome),
    Invalid(EvalOutcome),
}

fn resolve_input(
    ctx: &DataContext,
    input: &dyn RawInputProvider,
    field: &str,
    map_missing_to: &Option<FieldValue>,
) -> ResolvedInput {
    match ctx.get(field, input) {
        EvalOutcome::Value(v) if v.is_missing() => ResolvedInput::Missing(match map_missing_to {
            Some(m) => EvalOutcome::Value(m.clone()),
            None => EvalOutcome::Value(FieldValue::Missing),
        }),
        EvalOutcome::Value(v) if v.is_invalid() => ResolvedInput::Invalid(EvalOutcome::Invalid),
        EvalOutcome::Invalid => ResolvedInput::Invalid(EvalOutcome::Invalid),
        EvalOutcome::Value(v) => ResolvedInput::Value(v),
    }
}

fn norm_continuous(
    ctx: &DataContext,
    input: &dyn RawInputProvider,
    field: &str,
    knots: &[pmml_document::LinearNorm],
    map_missing_to: &Option<FieldValue>,
    outliers: OutlierTreatmentExpr,
) -> EvalOutcome {
    let x = match resolve_input(ctx, input, field, map_missing_to) {
        ResolvedInput::Value(v) => match v.as_f64() {
            Some(x) => x,
            None => return EvalOutcome::Invalid,
        },
        ResolvedInput::Missing(outcome) | ResolvedInput::Invalid(outcome) => return outcome,
    };
    if knots.is_empty() {
        return EvalOutcome::Invalid;
    }
    if knots.len() == 1 {
        return EvalOutcome::Value(FieldValue::Double(knots[0].norm));
    }

    let first = knots[0];
    let last = knots[knots.len() - 1];

    if x < first.orig {
        return EvalOutcome::Value(FieldValue::Double(match outliers {
            OutlierTreatmentExpr::AsMissingValues => return EvalOutcome::Value(FieldValue::Missing),
            OutlierTreatmentExpr::AsExtremeValues => first.norm,
            OutlierTreatmentExpr::AsIs => extrapolate(first, knots[1], x),
        }));
    }
    if x > last.orig {
        return EvalOutcome::Value(FieldValue::Double(match outliers {
            OutlierTreatmentExpr::AsMissingValues => return EvalOutcome::Value(FieldValue::Missing),
            OutlierTreatmentExpr::AsExtremeValues => last.norm,
            OutlierTreatmentExpr::AsIs => extrapolate(knots[knots.len() - 2], last, x),
        }));
    }

    for w in knots.windows(2) {
        let (a, b) = (w[0], w[1]);
        if x >= a.orig && x <= b.orig {
            let t = if b.orig > a.orig { (x - a.orig) / (b.orig - a.orig) } else { 0.0 };
            return EvalOutcome::Value(FieldValue::Double(a.norm + t * (b.norm - a.norm)));
        }
    }
    EvalOutcome::Invalid
}

fn extrapolate(a: pmml_document::LinearNorm, b: pmml_document::LinearNorm, x: f64) -> f64 {
    let slope = (b.norm - a.norm) / (b.orig - a.orig);
    a.norm + slope * (x - a.orig)
}

fn eval_apply(
    ctx: &DataContext,
    input: &dyn RawInputProvider,
    function: &Function,
    args: &[Expression],
    map_missing_to: &Option<FieldValue>,
    invalid_value_treatment: ApplyInvalidTreatment,
) -> EvalOutcome {
    let missing_allowed = matches!(function, Function::Builtin(f) if f.is_missing_allowed());

    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        match eval_expression(arg, ctx, input) {
            EvalOutcome::Value(v) if v.is_missing() => {
                if missing_allowed {
                    values.push(v);
                    continue;
                }
                return match map_missing_to {
                    Some(m) => EvalOutcome::Value(m.clone()),
                    None => EvalOutcome::Value(FieldValue::Missing),
                };
            }
            EvalOutcome::Value(v) if v.is_invalid() => {
                return apply_invalid(invalid_value_treatment, map_missing_to);
            }
            EvalOutcome::Invalid => {
                return apply_invalid(invalid_value_treatment, map_missing_to);
            }
            EvalOutcome::Value(v) => values.push(v),
        }
    }

    match function {
        Function::Builtin(f) => match builtins::call(*f, &values) {
            Ok(v) => EvalOutcome::Value(v),
            Err(_) => apply_invalid(invalid_value_treatment, map_missing_to),
        },
        Function::UserDefined(index) => {
            let Some(user_fn) = ctx.function_table().get(*index) else {
                return EvalOutcome::Invalid;
            };
            let mut overrides = rustc_hash::FxHashMap::default();
            for (name, value) in user_fn.parameters.iter().zip(values.into_iter()) {
                overrides.insert(name.clone(), value);
            }
            ctx.push_override(overrides, true);
            let result = eval_expression(&user_fn.body, ctx, input);
            ctx.pop_override();
            result
        }
    }
}

fn apply_invalid(treatment: ApplyInvalidTreatment, map_missing_to: &Option<FieldValue>) -> EvalOutcome {
    match treatment {
        ApplyInvalidTreatment::ReturnInvalid | ApplyInvalidTreatment::AsIs => EvalOutcome::Invalid,
        ApplyInvalidTreatment::AsMissing => match map_missing_to {
            Some(m) => EvalOutcome::Value(m.clone()),
            None => EvalOutcome::Value(FieldValue::Missing),
        },
    }
}

/// Evaluates the `sqlWhere` clause compiled at bind time (spec.md §4.5). A
/// field that resolves to `Missing`/`Invalid` makes the clause false rather
/// than raising — `sqlWhere` only gates whether an event counts toward the
/// aggregate, it never aborts scoring.
pub fn eval_sql_where(clause: &SqlWhere, ctx: &DataContext, input: &dyn RawInputProvider) -> bool {
    match clause {
        SqlWhere::Compare { field, op, literal } => match ctx.get(field, input) {
            EvalOutcome::Value(v) if v.is_valid() => compare(&v, *op, literal),
            _ => false,
        },
        SqlWhere::Between { field, low, high } => match ctx.get(field, input) {
            EvalOutcome::Value(v) if v.is_valid() => match (v.as_f64(), low.as_f64(), high.as_f64()) {
                (Some(x), Some(l), Some(h)) => x >= l && x <= h,
                _ => false,
            },
            _ => false,
        },
        SqlWhere::Like { field, pattern } => match ctx.get(field, input) {
            EvalOutcome::Value(v) if v.is_valid() => match v.as_str() {
                Some(s) => like_matches(s, pattern),
                None => false,
            },
            _ => false,
        },
        SqlWhere::In { field, values } => match ctx.get(field, input) {
            EvalOutcome::Value(v) if v.is_valid() => values.contains(&v),
            _ => false,
        },
    }
}

fn compare(value: &FieldValue, op: SimpleOp, literal: &FieldValue) -> bool {
    match op {
        SimpleOp::Equal => value == literal,
        SimpleOp::NotEqual => value != literal,
        SimpleOp::IsMissing => value.is_missing(),
        SimpleOp::IsNotMissing => !value.is_missing(),
        SimpleOp::LessThan | SimpleOp::LessOrEqual | SimpleOp::GreaterThan | SimpleOp::GreaterOrEqual => {
            let (Some(a), Some(b)) = (value.as_f64(), literal.as_f64()) else {
                return false;
            };
            match op {
                SimpleOp::LessThan => a < b,
                SimpleOp::LessOrEqual => a <= b,
                SimpleOp::GreaterThan => a > b,
                SimpleOp::GreaterOrEqual => a >= b,
                _ => unreachable!(),
            }
        }
    }
}

/// Translates the SQL `%`/`_` wildcards to an anchored regex. Built once per
/// call rather than cached: `sqlWhere LIKE` clauses are rare relative to the
/// hot path of tree/rule evaluation.
fn like_matches(text: &str, pattern: &str) -> bool {
    let mut regex_src = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => regex_src.push_str(".*"),
            '_' => regex_src.push('.'),
            c => regex_src.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex_src.push('$');
    regex::Regex::new(&regex_src).map(|re| re.is_match(text)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmml_document::{AggregateFn, BuiltinFn, DataDictionary, FunctionTable, LocalTransformations, MiningSchema, TransformationDictionary};
    use rustc_hash::FxHashMap;

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
    fn constant_evaluates_to_itself() {
        let (dd, ms, td, lt, ft) = empty_ctx();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let expr = Expression::Constant(FieldValue::Integer(7));
        assert_eq!(eval_expression(&expr, &ctx, &input), EvalOutcome::Value(FieldValue::Integer(7)));
    }

    #[test]
    fn missing_field_ref_uses_map_missing_to() {
        let (dd, ms, td, lt, ft) = empty_ctx();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let expr = Expression::FieldRef {
            field: "ghost".to_string(),
            map_missing_to: Some(FieldValue::Double(0.0)),
        };
        assert_eq!(eval_expression(&expr, &ctx, &input), EvalOutcome::Value(FieldValue::Double(0.0)));
    }

    #[test]
    fn apply_add_computes_sum() {
        let (dd, ms, td, lt, ft) = empty_ctx();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let expr = Expression::Apply {
            function: Function::Builtin(BuiltinFn::Add),
            args: vec![Expression::Constant(FieldValue::Integer(2)), Expression::Constant(FieldValue::Integer(3))],
            map_missing_to: None,
            invalid_value_treatment: ApplyInvalidTreatment::ReturnInvalid,
        };
        assert_eq!(eval_expression(&expr, &ctx, &input), EvalOutcome::Value(FieldValue::Integer(5)));
    }

    #[test]
    fn apply_short_circuits_missing_argument() {
        let (dd, ms, td, lt, ft) = empty_ctx();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let expr = Expression::Apply {
            function: Function::Builtin(BuiltinFn::Add),
            args: vec![
                Expression::FieldRef { field: "ghost".to_string(), map_missing_to: None },
                Expression::Constant(FieldValue::Integer(3)),
            ],
            map_missing_to: Some(FieldValue::Integer(-1)),
            invalid_value_treatment: ApplyInvalidTreatment::ReturnInvalid,
        };
        assert_eq!(eval_expression(&expr, &ctx, &input), EvalOutcome::Value(FieldValue::Integer(-1)));
    }

    #[test]
    fn is_missing_is_missing_allowed() {
        let (dd, ms, td, lt, ft) = empty_ctx();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let expr = Expression::Apply {
            function: Function::Builtin(BuiltinFn::IsMissing),
            args: vec![Expression::FieldRef { field: "ghost".to_string(), map_missing_to: None }],
            map_missing_to: None,
            invalid_value_treatment: ApplyInvalidTreatment::ReturnInvalid,
        };
        assert_eq!(eval_expression(&expr, &ctx, &input), EvalOutcome::Value(FieldValue::Boolean(true)));
    }

    #[test]
    fn norm_continuous_interpolates_between_knots() {
        let (dd, ms, td, lt, ft) = empty_ctx();
        let mut dd = dd;
        dd.insert("x", pmml_document::FieldType::continuous(pmml_document::DataType::Double));
        let mut ms = ms;
        ms = MiningSchema::new(vec![pmml_document::MiningField::active("x")]);
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let mut input = FxHashMap::default();
        input.insert("x".to_string(), "5".to_string());
        let expr = Expression::NormContinuous {
            field: "x".to_string(),
            knots: vec![
                pmml_document::LinearNorm { orig: 0.0, norm: 0.0 },
                pmml_document::LinearNorm { orig: 10.0, norm: 1.0 },
            ],
            map_missing_to: None,
            outliers: OutlierTreatmentExpr::AsIs,
        };
        assert_eq!(eval_expression(&expr, &ctx, &input), EvalOutcome::Value(FieldValue::Double(0.5)));
    }

    #[test]
    fn like_wildcard_translates_percent_and_underscore() {
        assert!(like_matches("hello", "h_llo"));
        assert!(like_matches("hello world", "hello%"));
        assert!(!like_matches("goodbye", "hello%"));
    }

    #[test]
    fn sql_where_between_is_inclusive() {
        let (dd, ms, td, lt, ft) = empty_ctx();
        let mut dd = dd;
        dd.insert("x", pmml_document::FieldType::continuous(pmml_document::DataType::Double));
        let ms = MiningSchema::new(vec![pmml_document::MiningField::active("x")]);
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let mut input = FxHashMap::default();
        input.insert("x".to_string(), "10".to_string());
        let clause = SqlWhere::Between {
            field: "x".to_string(),
            low: FieldValue::Double(0.0),
            high: FieldValue::Double(10.0),
        };
        assert!(eval_sql_where(&clause, &ctx, &input));
    }

    #[test]
    fn aggregate_expression_reads_through_context_accumulator() {
        let (dd, ms, td, lt, ft) = empty_ctx();
        let ctx = DataContext::new(&dd, &ms, &td, &lt, &ft, None);
        let input = FxHashMap::default();
        let expr = Expression::Aggregate {
            field: "x".to_string(),
            function: AggregateFn::Sum,
            group_field: None,
            sql_where: None,
        };
        assert_eq!(eval_expression(&expr, &ctx, &input), EvalOutcome::Value(FieldValue::Invalid));
    }
}
