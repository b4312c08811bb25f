//! Event loop: read a model document + configuration, drive events through
//! `pmml-eval`'s `ScoringPipeline`, write a partial score stream on a fatal
//! error (spec.md §6 "Exit and errors": "The driver must write a partial
//! score stream for events processed before a fatal error").

use crate::config::{AugustusConfiguration, DataInputSource, ProducerAlgorithmConfig, UpdateEveryConfig};
use crate::storage::JsonFileStorage;
use anyhow::{Context, Result};
use pmml_common::FieldValue;
use pmml_document::{ModelBody, ModelContent, ModelDocument, OpType};
use pmml_eval::host::{parse_storage_uri, HostCapability, NullHostCapability, PersistentStorage, StorageProtocol};
use pmml_eval::producer::batch::{BatchConfig, BatchProducerUpdate, FeatureKind as BatchFeatureKind};
use pmml_eval::producer::worlds::{Feature, FeatureKind as WorldsFeatureKind, WorldsConfig, WorldsProducer, WorldsProducerUpdate};
use pmml_eval::segment::SegmentationSchema;
use pmml_eval::{raw_field_value, ProducerUpdate, ScoringPipeline, UpdateEvery};
use rustc_hash::FxHashMap;
use std::io::Write;

fn to_update_every(u: UpdateEveryConfig) -> UpdateEvery {
    match u {
        UpdateEveryConfig::Event => UpdateEvery::Event,
        UpdateEveryConfig::Aggregate => UpdateEvery::Aggregate,
        UpdateEveryConfig::Both => UpdateEvery::Both,
    }
}

/// Picks the model body to score when no `SegmentationSchema` is configured:
/// the first scorable `TreeModel` or `RuleSetModel` in the document.
fn select_model(document: &ModelDocument) -> Result<&ModelBody> {
    document
        .models
        .iter()
        .find(|m| m.is_scorable && matches!(m.content, ModelContent::TreeModel(_) | ModelContent::RuleSetModel(_)))
        .context("model document has no scorable TreeModel or RuleSetModel body")
}

/// Picks the model body a `SegmentationSchema` segment named `name` routes
/// to: the scorable `TreeModel`/`RuleSetModel` body whose `modelName`
/// matches.
fn select_model_named<'doc>(document: &'doc ModelDocument, name: &str) -> Option<&'doc ModelBody> {
    document.models.iter().find(|m| {
        m.is_scorable
            && matches!(m.content, ModelContent::TreeModel(_) | ModelContent::RuleSetModel(_))
            && m.model_name.as_deref() == Some(name)
    })
}

/// Minimal CSV reader: comma-separated, first row is the header, no quoting
/// or embedded-comma support (spec.md's `DataInput` formats are a closed
/// enumeration; only CSV is implemented here, matching what this engine's
/// scoring math actually needs to exercise end to end).
fn read_csv_events(text: &str) -> Vec<FxHashMap<String, String>> {
    let mut lines = text.lines();
    let Some(header_line) = lines.next() else {
        return Vec::new();
    };
    let header: Vec<&str> = header_line.split(',').collect();
    lines
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut row = FxHashMap::default();
            for (name, value) in header.iter().zip(line.split(',')) {
                row.insert(name.to_string(), value.to_string());
            }
            row
        })
        .collect()
}

fn read_events(config: &AugustusConfiguration) -> Result<Vec<FxHashMap<String, String>>> {
    let source = config.data_input.as_ref().map(|d| &d.source).context("no DataInput configured")?;
    let text = match source {
        DataInputSource::FromFile(path) => std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?,
        DataInputSource::FromStandardIn | DataInputSource::Interactive => {
            std::io::read_to_string(std::io::stdin()).context("reading stdin")?
        }
        DataInputSource::FromHttp(url) => {
            anyhow::bail!("DataInput.FromHTTP ({url}) is not implemented by this driver")
        }
    };
    Ok(read_csv_events(&text))
}

fn write_partial_scores(writer: &mut dyn Write, scored: &[Vec<(String, FieldValue)>]) -> Result<()> {
    writeln!(writer, "<Events>")?;
    for event in scored {
        write!(writer, "  <Event>")?;
        for (name, value) in event {
            write!(writer, "<{name}>{value}</{name}>")?;
        }
        writeln!(writer, "</Event>")?;
    }
    writeln!(writer, "</Events>")?;
    Ok(())
}

fn field_kind(document: &ModelDocument, name: &str) -> OpType {
    document.data_dictionary.get(name).map(|ft| ft.optype).unwrap_or(OpType::Continuous)
}

/// The concrete producer `config.producer_algorithm` selected, kept behind
/// one name so `driver::run`'s event loop can hold a single
/// `Option<&mut dyn ProducerUpdate>` regardless of which algorithm is
/// driving it.
enum Producer {
    Streaming(WorldsProducerUpdate),
    Batch(BatchProducerUpdate),
}

impl Producer {
    fn as_update(&mut self) -> &mut dyn ProducerUpdate {
        match self {
            Producer::Streaming(p) => p,
            Producer::Batch(p) => p,
        }
    }

    /// Materializes whatever the producer has learned and logs a summary.
    /// Neither algorithm in this driver persists a trained tree back into
    /// the document; spec.md §6's `ModelSetup.outputFilename` is where a
    /// full host implementation would write it.
    fn log_summary(&self, batch_config: &BatchConfig) {
        match self {
            Producer::Streaming(p) => {
                let tree = p.producer.best_tree();
                tracing::info!(node_id = %tree.id, classes = tree.score_distribution.len(), "streaming producer tree updated");
            }
            Producer::Batch(p) => {
                let tree = p.build(batch_config);
                tracing::info!(children = tree.children.len(), "batch producer tree built");
            }
        }
    }
}

/// Constructs the producer named by `config.producer_algorithm`, using the
/// default-selected model's active `MiningField`s (minus the classifier
/// field) as its feature set (spec.md §4.9/§4.10; §5 "optionally
/// ProducerAlgorithm.update(get)"). Returns `None` for `Unsupported`
/// algorithms, or when no scorable model exists to derive a feature set
/// from.
fn build_producer(document: &ModelDocument, config: &AugustusConfiguration) -> Option<Producer> {
    let algorithm = config.producer_algorithm?;
    let model = select_model(document).ok()?;
    let feature_names: Vec<&str> = model
        .mining_schema
        .active_fields()
        .map(|f| f.name.as_str())
        .filter(|n| *n != config.classifier_field)
        .collect();

    match algorithm {
        ProducerAlgorithmConfig::Streaming(s) => {
            let features = feature_names
                .iter()
                .map(|name| {
                    let kind = match field_kind(document, name) {
                        OpType::Continuous => WorldsFeatureKind::Continuous,
                        OpType::Categorical | OpType::Ordinal => WorldsFeatureKind::Categorical,
                    };
                    Feature::new(*name, kind)
                })
                .collect();
            let worlds_config = WorldsConfig {
                feature_maturity_threshold: s.feature_maturity_threshold as u64,
                split_maturity_threshold: s.split_maturity_threshold as u64,
                trials_to_keep: s.trials_to_keep as usize,
                worlds_to_split: s.worlds_to_split as usize,
                tree_depth: s.tree_depth as usize,
            };
            let producer = WorldsProducer::new(0, features, worlds_config);
            Some(Producer::Streaming(WorldsProducerUpdate::new(producer, config.classifier_field.clone())))
        }
        ProducerAlgorithmConfig::Iterative(_) => {
            let features = feature_names
                .iter()
                .map(|name| {
                    let kind = match field_kind(document, name) {
                        OpType::Continuous => BatchFeatureKind::Continuous,
                        OpType::Categorical | OpType::Ordinal => BatchFeatureKind::Categorical,
                    };
                    (name.to_string(), kind)
                })
                .collect();
            Some(Producer::Batch(BatchProducerUpdate::new(features, config.classifier_field.clone())))
        }
        ProducerAlgorithmConfig::Unsupported => None,
    }
}

/// Scores every event against the segment `schema` routes it to, caching
/// one `ScoringPipeline` per distinct model name encountered (spec.md §5:
/// "each segment owns an independent MiningSchema... and DataContext").
/// Events a `Blacklisted` segment excludes, or that no segment claims,
/// contribute an empty output record rather than being dropped from the
/// partial score stream's event count.
fn score_segmented<'doc>(
    document: &'doc ModelDocument,
    schema: &SegmentationSchema,
    events: &[FxHashMap<String, String>],
    update_every: UpdateEvery,
    mut producer: Option<&mut dyn ProducerUpdate>,
) -> Result<Vec<Vec<(String, FieldValue)>>> {
    let mut pipelines: FxHashMap<String, ScoringPipeline<'doc>> = FxHashMap::default();
    let mut scored = Vec::with_capacity(events.len());
    for event in events {
        let get = |name: &str| raw_field_value(event, name);
        let Some(model_name) = schema.route(&get) else {
            scored.push(Vec::new());
            continue;
        };
        if !pipelines.contains_key(model_name) {
            let model = select_model_named(document, model_name)
                .with_context(|| format!("segment routed to model {model_name:?}, which has no scorable body"))?;
            pipelines.insert(model_name.to_string(), ScoringPipeline::new(document, model, update_every));
        }
        let pipeline = pipelines.get(model_name).expect("just inserted");
        scored.push(pipeline.score_event(event, producer.as_deref_mut()));
    }
    Ok(scored)
}

/// Scores every event, writing whatever was produced so far to `out` before
/// any later step's error is allowed to propagate, so the "partial score
/// stream" contract holds even on a fatal error.
fn score_and_emit(
    document: &ModelDocument,
    config: &AugustusConfiguration,
    events: &[FxHashMap<String, String>],
    out: &mut dyn Write,
) -> Result<()> {
    let update_every = to_update_every(config.model_setup.update_every);
    let mut producer = build_producer(document, config);

    let scored = if let Some(schema) = &config.segmentation_schema {
        score_segmented(document, schema, events, update_every, producer.as_mut().map(Producer::as_update))?
    } else {
        let model = select_model(document)?;
        let pipeline = ScoringPipeline::new(document, model, update_every);
        let mut scored = Vec::with_capacity(events.len());
        for event in events {
            scored.push(pipeline.score_event(event, producer.as_mut().map(Producer::as_update)));
        }
        scored
    };

    if let Some(producer) = &producer {
        let batch_config = match config.producer_algorithm {
            Some(ProducerAlgorithmConfig::Iterative(i)) => BatchConfig {
                impurity: pmml_eval::producer::batch::Impurity::Gini,
                categorical_strategy: match i.split_categorical {
                    crate::config::SplitCategorical::Complete => pmml_eval::producer::batch::CategoricalStrategy::Complete,
                    crate::config::SplitCategorical::Subset => pmml_eval::producer::batch::CategoricalStrategy::Subset,
                    crate::config::SplitCategorical::Fast => pmml_eval::producer::batch::CategoricalStrategy::Fast,
                    crate::config::SplitCategorical::Singleton => pmml_eval::producer::batch::CategoricalStrategy::Singleton,
                },
                ordinal_strategy: match i.split_ordinal {
                    crate::config::SplitOrdinal::Fast => pmml_eval::producer::batch::OrdinalStrategy::FastGoldenSection,
                    crate::config::SplitOrdinal::Exhaustive => pmml_eval::producer::batch::OrdinalStrategy::Exhaustive,
                    crate::config::SplitOrdinal::Median => pmml_eval::producer::batch::OrdinalStrategy::Median,
                },
                max_depth: i.max_tree_depth as usize,
                min_samples_leaf: i.min_record_count as usize,
                min_gain: i.min_gain,
                use_gain_ratio: false,
            },
            _ => BatchConfig::iterative_default(),
        };
        producer.log_summary(&batch_config);
    }

    let result = write_partial_scores(out, &scored);
    tracing::info!(events = scored.len(), "scoring run complete");
    result.context("writing score stream")
}

/// Loads the persistence snapshot at begin and writes it back at end,
/// mirroring `HostCapability`'s begin/end hook ordering. This driver's
/// `ScoringPipeline` doesn't expose its runtime aggregate state as a
/// `Namespace` yet, so the round trip is currently a pass-through; it still
/// exercises the `connect` URI and the on-disk format end to end.
fn with_persistent_storage(config: &AugustusConfiguration, body: impl FnOnce() -> Result<()>) -> Result<()> {
    let Some(connect) = &config.persistent_storage else {
        return body();
    };
    let (protocol, address) = parse_storage_uri(connect).context("parsing PersistentStorage connect URI")?;
    if protocol != StorageProtocol::Json {
        anyhow::bail!("PersistentStorage protocol {protocol:?} is not implemented by this driver");
    }
    let mut storage = JsonFileStorage::new(address);
    let snapshot = storage.load();
    tracing::debug!(segments = snapshot.segments.len(), "loaded persistent storage");
    let result = body();
    storage.save(&snapshot);
    result
}

pub fn run(document: &ModelDocument, config: &AugustusConfiguration) -> Result<()> {
    let mut host: Box<dyn HostCapability> = Box::new(NullHostCapability);
    let mut fragments: Vec<String> = Vec::new();
    fragments.extend(host.begin());

    let result = match read_events(config) {
        Ok(events) => {
            fragments.extend(host.action(events.len() as u64));
            with_persistent_storage(config, || {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                score_and_emit(document, config, &events, &mut out)
            })
        }
        Err(err) => Err(err),
    };

    fragments.extend(match &result {
        Ok(()) => host.end(),
        Err(err) => host.exception(&err.to_string()),
    });
    if !fragments.is_empty() {
        tracing::debug!(fragments = fragments.len(), "HostCapability hooks produced XML fragments");
    }

    result
}
