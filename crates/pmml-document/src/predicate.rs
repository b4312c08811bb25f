//! The predicate sum type from spec.md §4.6 and design note §9
//! ("Expressions and predicates form sum types, not class hierarchies").
//! Evaluation (the three-valued logic) lives in `pmml-eval::predicate_eval`;
//! this module only holds the parsed, bound structure.

use pmml_common::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleOp {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    IsMissing,
    IsNotMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    And,
    Or,
    Xor,
    Surrogate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    IsIn,
    IsNotIn,
}

#[derive(Debug, Clone)]
pub enum Predicate {
    SimplePredicate {
        field: String,
        op: SimpleOp,
        /// Bound (cast) at load time, absent for `isMissing`/`isNotMissing`.
        value: Option<FieldValue>,
    },
    CompoundPredicate {
        op: CompoundOp,
        children: Vec<Predicate>,
    },
    SimpleSetPredicate {
        field: String,
        op: SetOp,
        array: Vec<FieldValue>,
    },
    True,
    False,
}

impl Predicate {
    pub fn is_true_constant(&self) -> bool {
        matches!(self, Predicate::True)
    }
}
