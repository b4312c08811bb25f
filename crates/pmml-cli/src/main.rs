mod config;
mod driver;
mod storage;

use anyhow::Context;
use clap::Parser;
use config::AugustusConfiguration;
use pmml_common::ModelError;

/// Scores a stream of events against a PMML-like model document, per an
/// `AugustusConfiguration` document (spec.md §6).
#[derive(Parser, Debug)]
#[command(name = "pmml-score", about = "Streaming predictive-model scoring driver")]
struct Cli {
    /// Path to the model document (TreeModel/RuleSetModel XML).
    #[arg(long)]
    model: String,

    /// Path to an `AugustusConfiguration` document. When absent, the driver
    /// falls back to every documented default (spec.md §6).
    #[arg(long)]
    config: Option<String>,
}

fn load_configuration(path: Option<&str>) -> anyhow::Result<AugustusConfiguration> {
    match path {
        Some(path) => {
            let xml = std::fs::read_to_string(path).with_context(|| format!("reading configuration {path}"))?;
            config::load_configuration(&xml).map_err(anyhow::Error::from)
        }
        None => Ok(AugustusConfiguration::default()),
    }
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "fatal error");
            eprintln!("pmml-score: {error}");
            let code = error.downcast_ref::<ModelError>().map(ModelError::exit_code).unwrap_or(1);
            std::process::ExitCode::from(code as u8)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let model_xml = std::fs::read_to_string(&cli.model).with_context(|| format!("reading model document {}", cli.model))?;
    let document = pmml_document::parse_model_document(&model_xml)?;
    let config = load_configuration(cli.config.as_deref())?;
    driver::run(&document, &config)
}
