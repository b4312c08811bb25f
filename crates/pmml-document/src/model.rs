//! Model-document root structure, spec.md §6 "Model document".

use crate::expression::LocalTransformations;
use crate::mining_schema::MiningSchema;
use crate::output::OutputField;
use crate::tree::{MissingValueStrategy, NoTrueChildStrategy, Node, RuleSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionName {
    AssociationRules,
    Sequences,
    Classification,
    Regression,
    Clustering,
    TimeSeries,
    Mixed,
}

#[derive(Debug, Clone, Default)]
pub struct Header {
    pub copyright: Option<String>,
    pub description: Option<String>,
    pub application_name: Option<String>,
    pub application_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TreeModelBody {
    pub root: Node,
    pub missing_value_strategy: MissingValueStrategy,
    pub no_true_child_strategy: NoTrueChildStrategy,
    pub missing_value_penalty: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RuleSetModelBody {
    pub rule_set: RuleSet,
}

/// Model families other than Tree/RuleSet are out of scope for scoring math
/// (spec.md §1 Non-goals) but still occupy a slot in the document so the
/// `functionName`/`isScorable` contract and sibling segments parse correctly.
#[derive(Debug, Clone)]
pub struct OpaqueModelBody {
    pub element_name: String,
}

#[derive(Debug, Clone)]
pub enum ModelContent {
    TreeModel(TreeModelBody),
    RuleSetModel(RuleSetModelBody),
    Opaque(OpaqueModelBody),
}

#[derive(Debug, Clone)]
pub struct ModelBody {
    pub model_name: Option<String>,
    pub function_name: FunctionName,
    pub is_scorable: bool,
    pub mining_schema: MiningSchema,
    pub output: Vec<OutputField>,
    pub local_transformations: LocalTransformations,
    pub content: ModelContent,
}

/// The document root: Header, optional MiningBuildTask (not modeled — it
/// carries no scoring-relevant content), exactly one DataDictionary, an
/// optional TransformationDictionary, any number of model bodies.
#[derive(Debug, Clone)]
pub struct ModelDocument {
    pub version: String,
    pub header: Header,
    pub data_dictionary: crate::field_type::DataDictionary,
    pub transformation_dictionary: crate::expression::TransformationDictionary,
    pub function_table: crate::expression::FunctionTable,
    pub models: Vec<ModelBody>,
}

/// The one major version this implementation targets (spec.md §6: "the
/// implementation targets one specific major version and rejects others").
pub const SUPPORTED_VERSION_MAJOR: &str = "4";
