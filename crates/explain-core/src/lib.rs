//! Encoder-decoder transformer, its weight I/O and the on-disk model artifact.

pub mod artifact;
pub mod attention;
pub mod config;
pub mod error;
pub mod layer_norm;
pub mod rotary;
pub mod safetensors_util;
pub mod transformer;

pub use artifact::{ModelArtifact, ModelSource, CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE};
pub use config::{ModelConfig, PRESETS};
pub use error::{catch_torch, is_out_of_memory, ModelError, Result};
pub use transformer::Seq2SeqTransformer;
