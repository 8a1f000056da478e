mod cli;
mod commands;
mod config;

use clap::Parser;
use corpus::CorpusError;
use explain_core::ModelError;
use inference::InferenceError;
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use trainer::TrainError;

use crate::cli::{Cli, Command};
use crate::config::{AppConfig, ConfigError};

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIGURATION: u8 = 2;
const EXIT_MODEL_LOAD: u8 = 3;
const EXIT_RESOURCE_EXHAUSTED: u8 = 4;

fn model_exit_code(err: &ModelError) -> Option<u8> {
    match err {
        ModelError::Load { .. } => Some(EXIT_MODEL_LOAD),
        ModelError::ResourceExhausted(_) => Some(EXIT_RESOURCE_EXHAUSTED),
        ModelError::InvalidConfig(_) => Some(EXIT_CONFIGURATION),
        _ => None,
    }
}

fn corpus_exit_code(err: &CorpusError) -> Option<u8> {
    matches!(err, CorpusError::Configuration(_)).then_some(EXIT_CONFIGURATION)
}

fn classify(err: &(dyn Error + 'static)) -> Option<u8> {
    if let Some(e) = err.downcast_ref::<ModelError>() {
        return model_exit_code(e);
    }
    if let Some(e) = err.downcast_ref::<CorpusError>() {
        return corpus_exit_code(e);
    }
    if let Some(e) = err.downcast_ref::<TrainError>() {
        return match e {
            TrainError::Model(m) => model_exit_code(m),
            TrainError::Corpus(c) => corpus_exit_code(c),
            TrainError::EmptyTrainingSet | TrainError::Configuration(_) => Some(EXIT_CONFIGURATION),
            _ => None,
        };
    }
    if let Some(e) = err.downcast_ref::<InferenceError>() {
        return match e {
            InferenceError::Model(m) => model_exit_code(m),
            InferenceError::Corpus(c) => corpus_exit_code(c),
            InferenceError::Rules { .. } => Some(EXIT_CONFIGURATION),
            _ => None,
        };
    }
    err.downcast_ref::<ConfigError>().map(|_| EXIT_CONFIGURATION)
}

/// Maps the first recognizable error in the chain to a process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| classify(cause))
        .unwrap_or(EXIT_FAILURE)
}

fn run(command: Command, config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    commands::dispatch(command, &config)
}

fn main() -> ExitCode {
    // Usage errors exit with status 2 here, before any config or model is touched.
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let command = Command::try_from(cli).unwrap_or_else(|e| e.exit());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(command, &config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_model_load_error_exits_3() {
        let err = anyhow::Error::from(ModelError::Load {
            name: "x".into(),
            reason: "missing".into(),
        })
        .context("loading model");
        assert_eq!(exit_code(&err), EXIT_MODEL_LOAD);
    }

    #[test]
    fn test_wrapped_resource_exhausted_exits_4() {
        let err: anyhow::Error =
            TrainError::Model(ModelError::ResourceExhausted("CUDA out of memory".into())).into();
        assert_eq!(exit_code(&err), EXIT_RESOURCE_EXHAUSTED);

        let err: anyhow::Error =
            InferenceError::Model(ModelError::ResourceExhausted("out of memory".into())).into();
        assert_eq!(exit_code(&err), EXIT_RESOURCE_EXHAUSTED);
    }

    #[test]
    fn test_configuration_errors_exit_2() {
        let err = Err::<(), _>(CorpusError::Configuration("empty".into()))
            .context("data preprocessing failed")
            .unwrap_err();
        assert_eq!(exit_code(&err), EXIT_CONFIGURATION);

        let err: anyhow::Error = TrainError::EmptyTrainingSet.into();
        assert_eq!(exit_code(&err), EXIT_CONFIGURATION);
    }

    #[test]
    fn test_other_errors_exit_1() {
        let err: anyhow::Error = CorpusError::DataFormat {
            source_name: "gcc_errors.txt".into(),
            line: 3,
            reason: "empty explanation text".into(),
        }
        .into();
        assert_eq!(exit_code(&err), EXIT_FAILURE);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), EXIT_FAILURE);
    }
}
