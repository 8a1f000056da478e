use serde::{Deserialize, Serialize};

use crate::sampling::SamplingParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Input tokens kept, including the closing `</s>`.
    pub max_input_length: usize,
    pub max_output_length: usize,
    /// `</s>` is masked until this many tokens exist.
    pub min_new_tokens: usize,
    /// More than one beam selects beam search.
    pub num_beams: usize,
    pub do_sample: bool,
    pub temperature: f64,
    pub top_k: usize,
    pub top_p: f64,
    pub repetition_penalty: f64,
    /// Beam scores are divided by `length ^ length_penalty`.
    pub length_penalty: f64,
    /// Beam search stops once `num_beams` hypotheses have finished.
    pub early_stopping: bool,
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_input_length: 512,
            max_output_length: 256,
            min_new_tokens: 1,
            num_beams: 4,
            do_sample: false,
            temperature: 1.0,
            top_k: 50,
            top_p: 1.0,
            repetition_penalty: 1.0,
            length_penalty: 1.0,
            early_stopping: true,
            seed: None,
        }
    }
}

impl GenerationConfig {
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            repetition_penalty: self.repetition_penalty,
        }
    }
}
