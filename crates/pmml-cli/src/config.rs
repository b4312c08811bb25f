//! `AugustusConfiguration` parsing (spec.md §6 "Configuration"): a small,
//! hand-rolled reader over the generic [`pmml_document::xml::XmlElement`]
//! tree, the same two-pass split (tokenize, then bind) the model document
//! itself uses, just without a typed-AST middle layer since the
//! configuration schema is far smaller.

use pmml_common::{FieldValue, ModelError};
use pmml_document::xml::{parse_tree, XmlElement};
use pmml_document::Closure;
use pmml_eval::segment::{Dimension, DimensionOp, EnumeratedDimension, PartitionedDimension, Segment, SegmentKind, SegmentationSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARNING" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// `stderr` / `stdout` / a file path; absent means `stderr`.
    pub sink: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: LogLevel::Info, sink: "stderr".to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    LastAlphabetic,
    MostRecent,
}

#[derive(Debug, Clone)]
pub struct ModelInputConfig {
    pub file_location: String,
    pub select_mode: SelectMode,
    pub maturity_threshold: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Xml,
    Csv,
    Xtbl,
    Nab,
}

#[derive(Debug, Clone)]
pub enum DataInputSource {
    FromFile(String),
    FromStandardIn,
    FromHttp(String),
    Interactive,
}

#[derive(Debug, Clone)]
pub struct DataInputConfig {
    pub source: DataInputSource,
    pub format: DataFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateEveryConfig {
    Event,
    Aggregate,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSetupMode {
    LockExisting,
    ReplaceExisting,
    UpdateExisting,
}

#[derive(Debug, Clone)]
pub struct ModelSetupConfig {
    pub mode: ModelSetupMode,
    pub update_every: UpdateEveryConfig,
    pub output_filename: Option<String>,
}

impl Default for ModelSetupConfig {
    fn default() -> Self {
        ModelSetupConfig { mode: ModelSetupMode::LockExisting, update_every: UpdateEveryConfig::Event, output_filename: None }
    }
}

/// Streaming `Worlds` producer knobs, spec.md §6's literal defaults.
#[derive(Debug, Clone, Copy)]
pub struct StreamingProducerConfig {
    pub update_existing: bool,
    pub feature_maturity_threshold: u32,
    pub split_maturity_threshold: u32,
    pub trials_to_keep: u32,
    pub worlds_to_split: u32,
    pub tree_depth: u32,
}

impl Default for StreamingProducerConfig {
    fn default() -> Self {
        StreamingProducerConfig {
            update_existing: false,
            feature_maturity_threshold: 10,
            split_maturity_threshold: 30,
            trials_to_keep: 50,
            worlds_to_split: 3,
            tree_depth: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitOrdinal {
    Fast,
    Exhaustive,
    Median,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitCategorical {
    Complete,
    Subset,
    Fast,
    Singleton,
}

/// Batch CART/ID3/C4.5 producer knobs, spec.md §6's literal defaults.
#[derive(Debug, Clone, Copy)]
pub struct IterativeProducerConfig {
    pub max_tree_depth: u32,
    pub min_gain: f64,
    pub min_record_count: u32,
    pub split_ordinal: SplitOrdinal,
    pub split_categorical: SplitCategorical,
    pub pruning_data_fraction: f64,
    pub pruning_threshold: f64,
}

impl Default for IterativeProducerConfig {
    fn default() -> Self {
        IterativeProducerConfig {
            max_tree_depth: 5,
            min_gain: 0.0,
            min_record_count: 0,
            split_ordinal: SplitOrdinal::Fast,
            split_categorical: SplitCategorical::Fast,
            pruning_data_fraction: 0.0,
            pruning_threshold: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ProducerAlgorithmConfig {
    Streaming(StreamingProducerConfig),
    Iterative(IterativeProducerConfig),
    /// `(model, algorithm)` pairs this engine does not score (spec.md §1
    /// Non-goals: BaselineModel, ClusteringModel, RegressionModel,
    /// NaiveBayesModel, kmeans) still parse, so a configuration naming one
    /// doesn't fail validation; they just never drive a producer.
    Unsupported,
}

#[derive(Debug, Clone, Default)]
pub struct AugustusConfiguration {
    pub logging: LoggingConfig,
    pub model_input: Option<ModelInputConfig>,
    pub data_input: Option<DataInputConfig>,
    pub model_setup: ModelSetupConfig,
    pub producer_algorithm: Option<ProducerAlgorithmConfig>,
    pub classifier_field: String,
    /// Raw `connect` URI from `<PersistentStorage connect="json://...">`, if
    /// configured. `pmml_eval::host::parse_storage_uri` splits it further.
    pub persistent_storage: Option<String>,
    /// `<SegmentationSchema>`, if configured. `ExternalSegmentationSchema`'s
    /// `fileName` indirection (spec.md §6) is not implemented; only an
    /// inline schema binds.
    pub segmentation_schema: Option<SegmentationSchema>,
}

pub fn load_configuration(xml: &str) -> Result<AugustusConfiguration, ModelError> {
    let root = parse_tree(xml)?;
    if root.name != "AugustusConfiguration" {
        return Err(ModelError::schema(format!("expected root element AugustusConfiguration, found {}", root.name)));
    }
    Ok(bind_configuration(&root))
}

fn bind_configuration(root: &XmlElement) -> AugustusConfiguration {
    AugustusConfiguration {
        logging: root.child("Logging").map(bind_logging).unwrap_or_default(),
        model_input: root.child("ModelInput").map(bind_model_input),
        data_input: root.child("DataInput").map(bind_data_input),
        model_setup: root.child("ModelSetup").map(bind_model_setup).unwrap_or_default(),
        producer_algorithm: root.child("ProducerAlgorithm").map(bind_producer_algorithm),
        classifier_field: root
            .child("ProducerAlgorithm")
            .and_then(|p| p.attr("classifierField"))
            .unwrap_or_default()
            .to_string(),
        persistent_storage: root.child("PersistentStorage").and_then(|p| p.attr("connect")).map(String::from),
        segmentation_schema: root
            .child("SegmentationSchema")
            .or_else(|| root.child("ExternalSegmentationSchema"))
            .map(bind_segmentation_schema),
    }
}

/// Binds `SegmentationSchema` (spec.md §6): `BlacklistedSegments`/
/// `SpecificSegments`/`GenericSegment` groups, each a conjunction of
/// `EnumeratedDimension`/`PartitionedDimension` children. Augustus's own XML
/// names the model each segment scores against by directory layout, not by
/// an attribute in this element (`examples/original_source` config.py has no
/// such attribute); since this engine keeps every segment's model as a
/// distinctly `modelName`-tagged body in one document, a group's intended
/// model is read from its own `modelName` attribute (falling back to the
/// group's `id`, then to an empty name that simply won't match any model).
/// Only the first `Selection` in an `EnumeratedDimension` and the first
/// `Partition` in a `PartitionedDimension` are honored; see DESIGN.md.
fn bind_segmentation_schema(el: &XmlElement) -> SegmentationSchema {
    let mut segments = Vec::new();
    for (group, kind) in el
        .children_named("BlacklistedSegments")
        .map(|g| (g, SegmentKind::Blacklisted))
        .chain(el.children_named("SpecificSegments").map(|g| (g, SegmentKind::Specific)))
        .chain(el.child("GenericSegment").map(|g| (g, SegmentKind::Generic)).into_iter())
    {
        segments.extend(bind_segment_group(group, kind));
    }
    SegmentationSchema { segments }
}

fn bind_segment_group(group: &XmlElement, kind: SegmentKind) -> Vec<Segment> {
    let model_name = group.attr("modelName").or_else(|| group.attr("id")).unwrap_or_default().to_string();
    let id = group.attr("id").unwrap_or(&model_name).to_string();

    let enumerated: Vec<Dimension> = group
        .children_named("EnumeratedDimension")
        .filter_map(bind_enumerated_dimension)
        .map(Dimension::Enumerated)
        .collect();

    let partitioned = group.children_named("PartitionedDimension").find_map(bind_partitioned_dimension);

    let Some((field, low, high, closure, divisions)) = partitioned else {
        return vec![Segment { id, kind, dimensions: enumerated, model_name }];
    };

    (0..divisions.max(1))
        .map(|bucket| {
            let mut dimensions = enumerated.clone();
            dimensions.push(Dimension::Partitioned(PartitionedDimension {
                field: field.clone(),
                low,
                high,
                closure,
                divisions: divisions.max(1),
                bucket,
            }));
            Segment { id: format!("{id}#{bucket}"), kind, dimensions, model_name: model_name.clone() }
        })
        .collect()
}

fn bind_enumerated_dimension(el: &XmlElement) -> Option<EnumeratedDimension> {
    let field = el.attr("field")?.to_string();
    let selection = el.child("Selection")?;
    let value = FieldValue::String(selection.attr("value")?.to_string());
    let op = match selection.attr("operator") {
        Some("notEqual") => DimensionOp::NotEqual,
        _ => DimensionOp::Equal,
    };
    Some(EnumeratedDimension { field, op, value })
}

fn bind_partitioned_dimension(el: &XmlElement) -> Option<(String, f64, f64, Closure, u32)> {
    let field = el.attr("field")?.to_string();
    let partition = el.child("Partition")?;
    let low = partition.attr("low").and_then(|v| v.parse().ok()).unwrap_or(f64::NEG_INFINITY);
    let high = partition.attr("high").and_then(|v| v.parse().ok()).unwrap_or(f64::INFINITY);
    let divisions = partition.attr("divisions").and_then(|v| v.parse().ok()).unwrap_or(1);
    let closure = match partition.attr("closure") {
        Some("closedClosed") => Closure::ClosedClosed,
        Some("closedOpen") => Closure::ClosedOpen,
        Some("openOpen") => Closure::OpenOpen,
        _ => Closure::OpenClosed,
    };
    Some((field, low, high, closure, divisions))
}

fn bind_logging(el: &XmlElement) -> LoggingConfig {
    let mut config = LoggingConfig::default();
    if let Some(level) = el.attr("level").and_then(LogLevel::parse) {
        config.level = level;
    }
    if let Some(sink) = el.attr("sink") {
        config.sink = sink.to_string();
    }
    config
}

fn bind_model_input(el: &XmlElement) -> ModelInputConfig {
    ModelInputConfig {
        file_location: el.attr("fileLocation").unwrap_or_default().to_string(),
        select_mode: match el.attr("selectmode") {
            Some("mostRecent") => SelectMode::MostRecent,
            _ => SelectMode::LastAlphabetic,
        },
        maturity_threshold: el.attr("maturityThreshold").and_then(|s| s.parse().ok()).unwrap_or(0),
    }
}

fn bind_data_input(el: &XmlElement) -> DataInputConfig {
    let format = match el.attr("format") {
        Some("CSV") => DataFormat::Csv,
        Some("XTBL") => DataFormat::Xtbl,
        Some("NAB") => DataFormat::Nab,
        _ => DataFormat::Xml,
    };
    let source = if let Some(file) = el.child("FromFile") {
        DataInputSource::FromFile(file.attr("name").unwrap_or_default().to_string())
    } else if let Some(http) = el.child("FromHTTP") {
        DataInputSource::FromHttp(http.attr("url").unwrap_or_default().to_string())
    } else if el.child("Interactive").is_some() {
        DataInputSource::Interactive
    } else {
        DataInputSource::FromStandardIn
    };
    DataInputConfig { source, format }
}

fn bind_model_setup(el: &XmlElement) -> ModelSetupConfig {
    let mode = match el.attr("mode") {
        Some("replaceExisting") => ModelSetupMode::ReplaceExisting,
        Some("updateExisting") => ModelSetupMode::UpdateExisting,
        _ => ModelSetupMode::LockExisting,
    };
    let update_every = match el.attr("updateEvery") {
        Some("aggregate") => UpdateEveryConfig::Aggregate,
        Some("both") => UpdateEveryConfig::Both,
        _ => UpdateEveryConfig::Event,
    };
    ModelSetupConfig { mode, update_every, output_filename: el.attr("outputFilename").map(String::from) }
}

fn bind_producer_algorithm(el: &XmlElement) -> ProducerAlgorithmConfig {
    let algorithm = el.attr("algorithm").unwrap_or_default();
    let param = |name: &str| -> Option<&str> {
        el.children_named("Parameter").find(|p| p.attr("name") == Some(name)).and_then(|p| p.attr("value"))
    };
    let parse_or = |name: &str, default: u32| param(name).and_then(|v| v.parse().ok()).unwrap_or(default);
    let parse_f64_or = |name: &str, default: f64| param(name).and_then(|v| v.parse().ok()).unwrap_or(default);

    match algorithm {
        "streaming" => {
            let defaults = StreamingProducerConfig::default();
            ProducerAlgorithmConfig::Streaming(StreamingProducerConfig {
                update_existing: param("updateExisting").map(|v| v == "true").unwrap_or(defaults.update_existing),
                feature_maturity_threshold: parse_or("featureMaturityThreshold", defaults.feature_maturity_threshold),
                split_maturity_threshold: parse_or("splitMaturityThreshold", defaults.split_maturity_threshold),
                trials_to_keep: parse_or("trialsToKeep", defaults.trials_to_keep),
                worlds_to_split: parse_or("worldsToSplit", defaults.worlds_to_split),
                tree_depth: parse_or("treeDepth", defaults.tree_depth),
            })
        }
        "iterative" | "c45" | "cart" => {
            let defaults = IterativeProducerConfig::default();
            let split_ordinal = match param("splitOrdinal") {
                Some("exhaustive") => SplitOrdinal::Exhaustive,
                Some("median") => SplitOrdinal::Median,
                _ => defaults.split_ordinal,
            };
            let split_categorical = match param("splitCategorical") {
                Some("complete") => SplitCategorical::Complete,
                Some("subset") => SplitCategorical::Subset,
                Some("singleton") => SplitCategorical::Singleton,
                _ => defaults.split_categorical,
            };
            ProducerAlgorithmConfig::Iterative(IterativeProducerConfig {
                max_tree_depth: parse_or("maxTreeDepth", defaults.max_tree_depth),
                min_gain: parse_f64_or("minGain", defaults.min_gain),
                min_record_count: parse_or("minRecordCount", defaults.min_record_count),
                split_ordinal,
                split_categorical,
                pruning_data_fraction: parse_f64_or("pruningDataFraction", defaults.pruning_data_fraction),
                pruning_threshold: parse_f64_or("pruningThreshold", defaults.pruning_threshold),
            })
        }
        _ => ProducerAlgorithmConfig::Unsupported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parameters_fall_back_to_documented_defaults() {
        let xml = r#"<AugustusConfiguration>
            <ProducerAlgorithm model="TreeModel" algorithm="streaming"/>
        </AugustusConfiguration>"#;
        let config = load_configuration(xml).unwrap();
        match config.producer_algorithm {
            Some(ProducerAlgorithmConfig::Streaming(s)) => {
                assert_eq!(s.feature_maturity_threshold, 10);
                assert_eq!(s.worlds_to_split, 3);
                assert_eq!(s.tree_depth, 3);
            }
            other => panic!("expected streaming config, got {other:?}"),
        }
    }

    #[test]
    fn explicit_parameters_override_defaults() {
        let xml = r#"<AugustusConfiguration>
            <ProducerAlgorithm model="TreeModel" algorithm="cart">
                <Parameter name="maxTreeDepth" value="12"/>
                <Parameter name="splitOrdinal" value="exhaustive"/>
            </ProducerAlgorithm>
        </AugustusConfiguration>"#;
        let config = load_configuration(xml).unwrap();
        match config.producer_algorithm {
            Some(ProducerAlgorithmConfig::Iterative(i)) => {
                assert_eq!(i.max_tree_depth, 12);
                assert_eq!(i.split_ordinal, SplitOrdinal::Exhaustive);
            }
            other => panic!("expected iterative config, got {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_root_element() {
        assert!(load_configuration("<NotAConfiguration/>").is_err());
    }

    #[test]
    fn segmentation_schema_binds_blacklisted_and_generic_groups() {
        let xml = r#"<AugustusConfiguration>
            <SegmentationSchema>
                <BlacklistedSegments id="bad" modelName="scorer">
                    <EnumeratedDimension field="region">
                        <Selection value="unknown" operator="equal"/>
                    </EnumeratedDimension>
                </BlacklistedSegments>
                <GenericSegment id="fallback" modelName="scorer"/>
            </SegmentationSchema>
        </AugustusConfiguration>"#;
        let config = load_configuration(xml).unwrap();
        let schema = config.segmentation_schema.expect("schema should bind");
        assert_eq!(schema.segments.len(), 2);
        assert!(schema.segments.iter().any(|s| s.kind == pmml_eval::segment::SegmentKind::Blacklisted));
        assert!(schema.segments.iter().any(|s| s.kind == pmml_eval::segment::SegmentKind::Generic));
    }

    #[test]
    fn partitioned_dimension_expands_into_one_segment_per_division() {
        let xml = r#"<AugustusConfiguration>
            <SegmentationSchema>
                <SpecificSegments>
                    <PartitionedDimension field="age">
                        <Partition low="0" high="100" divisions="4" closure="closedOpen"/>
                    </PartitionedDimension>
                </SpecificSegments>
            </SegmentationSchema>
        </AugustusConfiguration>"#;
        let config = load_configuration(xml).unwrap();
        let schema = config.segmentation_schema.expect("schema should bind");
        assert_eq!(schema.segments.len(), 4);
    }
}
