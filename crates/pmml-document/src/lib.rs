pub mod bind;
pub mod expression;
pub mod field_type;
pub mod mining_schema;
pub mod model;
pub mod output;
pub mod predicate;
pub mod tree;
pub mod xml;

pub use bind::parse_model_document;
pub use expression::{
    AggregateFn, ApplyInvalidTreatment, BuiltinFn, DerivedField, DiscretizeBin, Expression, Function, FunctionTable,
    LinearNorm, LocalTransformations, MapValuesTable, OutlierTreatmentExpr, SqlWhere, TransformationDictionary,
    UserFunction,
};
pub use field_type::{Closure, DataDictionary, DataType, EpochYear, FieldType, Interval, OpType};
pub use mining_schema::{InvalidValueTreatment, MiningField, MiningSchema, OutlierTreatment, Treatment, UsageType};
pub use model::{
    FunctionName, Header, ModelBody, ModelContent, ModelDocument, OpaqueModelBody, RuleSetModelBody, SUPPORTED_VERSION_MAJOR,
    TreeModelBody,
};
pub use output::{DecisionRow, OutputFeature, OutputField};
pub use predicate::{CompoundOp, Predicate, SetOp, SimpleOp};
pub use tree::{
    MissingValueStrategy, Node, NodeIndex, NoTrueChildStrategy, Rule, RuleSelectionCriterion, RuleSet,
    ScoreDistribution, SimpleRule,
};
