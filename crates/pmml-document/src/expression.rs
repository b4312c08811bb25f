//! The expression sum type from spec.md §4.4, plus the small pieces each
//! variant needs (`LinearNorm`, `DiscretizeBin`, `MapValuesTable`,
//! `SqlWhere`). Evaluation lives in `pmml-eval::expr_eval`; this module only
//! holds parsed, bound structure — a "ready-to-evaluate plan" per design
//! note §9, not a closure, so the whole tree stays `Clone + Debug`.

use crate::predicate::SimpleOp;
use pmml_common::FieldValue;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Average,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierTreatmentExpr {
    AsIs,
    AsMissingValues,
    AsExtremeValues,
}

/// One `(orig, norm)` knot of a `NormContinuous` piecewise-linear mapping.
/// `orig` values must be strictly increasing across the list (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearNorm {
    pub orig: f64,
    pub norm: f64,
}

/// One bin of a `Discretize` expression: `[left, right)`-style interval plus
/// the value it maps to. `left`/`right` of `None` mean unbounded on that
/// side.
#[derive(Debug, Clone)]
pub struct DiscretizeBin {
    pub left: Option<f64>,
    pub right: Option<f64>,
    pub value: FieldValue,
}

/// A `MapValues` lookup table: each row is a tuple of input-column values
/// keyed in the same order as `MapValues::field_columns`, plus the output
/// value.
#[derive(Debug, Clone, Default)]
pub struct MapValuesTable {
    pub rows: Vec<(Vec<FieldValue>, FieldValue)>,
}

impl MapValuesTable {
    pub fn lookup(&self, key: &[FieldValue]) -> Option<&FieldValue> {
        self.rows
            .iter()
            .find(|(cols, _)| cols.as_slice() == key)
            .map(|(_, v)| v)
    }
}

/// The `sqlWhere` grammar compiled at bind time, per design note §9: "a
/// disciplined implementation uses a small recursive-descent parser over a
/// documented grammar... any unrecognized input is a SchemaValidationError".
#[derive(Debug, Clone)]
pub enum SqlWhere {
    Compare {
        field: String,
        op: SimpleOp,
        literal: FieldValue,
    },
    Between {
        field: String,
        low: FieldValue,
        high: FieldValue,
    },
    /// `%`/`_` wildcards, translated to a regex at evaluation time.
    Like { field: String, pattern: String },
    In { field: String, values: Vec<FieldValue> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFn {
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Or,
    Not,
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Log10,
    Ln,
    Sqrt,
    Abs,
    Exp,
    Pow,
    Threshold,
    Floor,
    Ceil,
    Round,
    IsMissing,
    IsNotMissing,
    Min,
    Max,
    Sum,
    Avg,
    IsIn,
    IsNotIn,
    Lowercase,
    Uppercase,
    Substring,
    TrimBlanks,
    FormatNumber,
    FormatDatetime,
    DateDaysSinceYear,
    DateSecondsSinceYear,
    DateSecondsSinceMidnight,
    If,
}

impl BuiltinFn {
    /// Only `isMissing`/`isNotMissing` are "missing-allowed" (spec.md §4.4):
    /// their MISSING arguments pass through rather than short-circuiting.
    pub fn is_missing_allowed(self) -> bool {
        matches!(self, BuiltinFn::IsMissing | BuiltinFn::IsNotMissing)
    }

    /// `(min, max)` argument count, `max == None` for variadic functions.
    /// Checked at bind time so a malformed `Apply` fails with a schema
    /// error instead of indexing past the end of the evaluated argument
    /// list during scoring.
    pub fn arity(self) -> (usize, Option<usize>) {
        use BuiltinFn::*;
        match self {
            Not | Log10 | Ln | Sqrt | Abs | Exp | Floor | Ceil | Round | IsMissing | IsNotMissing | Lowercase
            | Uppercase | TrimBlanks | DateSecondsSinceMidnight => (1, Some(1)),
            Add | Subtract | Multiply | Divide | And | Or | Equal | NotEqual | LessThan | LessOrEqual
            | GreaterThan | GreaterOrEqual | Pow | Threshold | FormatNumber | FormatDatetime | DateDaysSinceYear
            | DateSecondsSinceYear => (2, Some(2)),
            Substring => (3, Some(3)),
            If => (2, Some(3)),
            Min | Max | Sum | Avg => (1, None),
            IsIn | IsNotIn => (2, None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyInvalidTreatment {
    ReturnInvalid,
    AsIs,
    AsMissing,
}

#[derive(Debug, Clone)]
pub enum Function {
    Builtin(BuiltinFn),
    /// Index into the bound function table (spec.md §4.4 "User-defined
    /// functions are bound at load time to a pair (parameter names, body
    /// expression)").
    UserDefined(usize),
}

#[derive(Debug, Clone)]
pub enum Expression {
    Constant(FieldValue),
    FieldRef {
        field: String,
        map_missing_to: Option<FieldValue>,
    },
    NormContinuous {
        field: String,
        knots: Vec<LinearNorm>,
        map_missing_to: Option<FieldValue>,
        outliers: OutlierTreatmentExpr,
    },
    NormDiscrete {
        field: String,
        value: FieldValue,
        map_missing_to: Option<FieldValue>,
    },
    Discretize {
        field: String,
        bins: Vec<DiscretizeBin>,
        map_missing_to: Option<FieldValue>,
        default_value: Option<FieldValue>,
    },
    MapValues {
        field_columns: Vec<(String, String)>,
        table: MapValuesTable,
        map_missing_to: Option<FieldValue>,
        default_value: Option<FieldValue>,
    },
    Aggregate {
        field: String,
        function: AggregateFn,
        group_field: Option<String>,
        sql_where: Option<SqlWhere>,
    },
    Apply {
        function: Function,
        args: Vec<Expression>,
        map_missing_to: Option<FieldValue>,
        invalid_value_treatment: ApplyInvalidTreatment,
    },
}

/// A user-defined function bound at load time: parameter names plus the body
/// expression evaluated against an override pushing those parameters
/// (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct UserFunction {
    pub name: String,
    pub parameters: Vec<String>,
    pub body: Expression,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    pub functions: Vec<UserFunction>,
}

impl FunctionTable {
    pub fn get(&self, index: usize) -> Option<&UserFunction> {
        self.functions.get(index)
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }
}

/// A named, derived field: an expression tree plus the name it is bound to
/// (spec.md glossary "DerivedField").
#[derive(Debug, Clone)]
pub struct DerivedField {
    pub name: String,
    pub expression: Expression,
    pub optype: Option<crate::field_type::OpType>,
    pub data_type: Option<crate::field_type::DataType>,
}

/// Global transformation scope (spec.md §3 "TransformationDictionary").
#[derive(Debug, Clone, Default)]
pub struct TransformationDictionary {
    pub derived_fields: HashMap<String, DerivedField>,
}

/// Per-model transformation scope (spec.md §3 "LocalTransformations").
#[derive(Debug, Clone, Default)]
pub struct LocalTransformations {
    pub derived_fields: HashMap<String, DerivedField>,
}
