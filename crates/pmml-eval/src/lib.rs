//! Evaluation engine: field resolution, expression/predicate evaluation,
//! tree/rule-set consumers, tree producers, output emission, segment
//! routing, and the per-event scoring pipeline that wires them together.

pub mod aggregate;
pub mod builtins;
pub mod consumer;
pub mod context;
pub mod expr_eval;
pub mod host;
pub mod output;
pub mod pipeline;
pub mod predicate_eval;
pub mod producer;
pub mod segment;

pub use context::{raw_field_value, DataContext, RawInputProvider};
pub use expr_eval::{eval_expression, eval_sql_where, EvalOutcome};
pub use output::{emit_outputs, Prediction};
pub use pipeline::{ProducerUpdate, ScoringPipeline, UpdateEvery};
pub use predicate_eval::{eval_predicate, eval_predicate_counted};
