use corpus::CorpusError;
use explain_core::ModelError;
use std::path::PathBuf;
use thiserror::Error;

pub mod baseline;
pub mod config;
pub mod evaluator;
pub mod explainer;
pub mod generator;
pub mod sampling;

pub use baseline::{RuleBasedExplainer, NO_MATCH_EXPLANATION};
pub use config::GenerationConfig;
pub use evaluator::{EvaluationResults, Evaluator, RESULTS_FILE};
pub use explainer::CompilerErrorExplainer;
pub use generator::Generator;
pub use sampling::{Sampler, SamplingParams};

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("invalid rules file {path}: {reason}")]
    Rules { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tch::TchError> for InferenceError {
    fn from(err: tch::TchError) -> Self {
        InferenceError::Model(err.into())
    }
}

pub type Result<T> = std::result::Result<T, InferenceError>;

/// Anything that turns a compiler error message into an explanation.
pub trait Explain {
    fn explain(&mut self, error_message: &str) -> Result<String>;
}
