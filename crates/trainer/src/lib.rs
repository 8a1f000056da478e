pub mod dataset;
pub mod train;

pub use dataset::{Batch, Encoding, Seq2SeqDataset, IGNORE_INDEX};
pub use train::{prepare_artifact, TrainReport, Trainer};

use corpus::CorpusError;
use explain_core::ModelError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("training split is empty, nothing to fine-tune on")]
    EmptyTrainingSet,

    #[error("invalid training config: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tch::TchError> for TrainError {
    fn from(err: tch::TchError) -> Self {
        TrainError::Model(err.into())
    }
}

pub type Result<T> = std::result::Result<T, TrainError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Saved model directory, a directory name under `model_root`, or a preset.
    pub model_name: String,
    pub model_root: Option<PathBuf>,
    pub max_input_length: usize,
    pub max_target_length: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub num_epochs: usize,
    pub output_dir: PathBuf,
    pub warmup_steps: usize,
    pub weight_decay: f64,
    /// Batches whose gradients are summed into one optimizer step.
    pub gradient_accumulation_steps: usize,
    /// Validation every this many optimizer steps; 0 means only at epoch end.
    pub eval_steps: usize,
    pub logging_steps: usize,
    pub seed: u64,
    pub load_best_model_at_end: bool,
    /// Used only when `model_name` is a preset and a tokenizer must be trained.
    pub tokenizer_vocab_size: usize,
    pub tokenizer_min_frequency: u32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model_name: "seq2seq-small".to_string(),
            model_root: None,
            max_input_length: 512,
            max_target_length: 256,
            batch_size: 8,
            learning_rate: 3e-4,
            num_epochs: 3,
            output_dir: PathBuf::from("experiments/seq2seq_small"),
            warmup_steps: 500,
            weight_decay: 0.01,
            gradient_accumulation_steps: 1,
            eval_steps: 500,
            logging_steps: 100,
            seed: 42,
            load_best_model_at_end: true,
            tokenizer_vocab_size: 8000,
            tokenizer_min_frequency: 2,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TrainError::Configuration("batch_size must be at least 1".into()));
        }
        if self.gradient_accumulation_steps == 0 {
            return Err(TrainError::Configuration(
                "gradient_accumulation_steps must be at least 1".into(),
            ));
        }
        if self.max_input_length < 2 || self.max_target_length < 2 {
            return Err(TrainError::Configuration(
                "max_input_length and max_target_length must be at least 2".into(),
            ));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(TrainError::Configuration("learning_rate must be positive".into()));
        }
        Ok(())
    }

    pub fn best_model_dir(&self) -> PathBuf {
        self.output_dir.join("best_model")
    }

    pub fn final_model_dir(&self) -> PathBuf {
        self.output_dir.join("final_model")
    }
}
