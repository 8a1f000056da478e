use serde::{Deserialize, Serialize};

/// Built-in base model presets, usable as `model_name`.
pub const PRESETS: [&str; 2] = ["seq2seq-tiny", "seq2seq-small"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Width of token embeddings and every hidden state.
    pub d_model: i64,
    /// Number of attention heads; must divide `d_model`.
    pub n_head: i64,
    pub n_encoder_layer: i64,
    pub n_decoder_layer: i64,
    /// Inner width of the feed-forward blocks.
    pub d_ff: i64,
    pub vocab_size: i64,
    /// Longest decoder sequence the causal mask is built for.
    pub max_seq_len: i64,
    pub dropout: f64,
    /// RMSNorm epsilon.
    pub layer_norm_epsilon: f64,
    pub use_bias: bool,
    pub pad_token_id: i64,
    pub eos_token_id: i64,
    /// First decoder input token. T5-style models reuse the pad token.
    pub decoder_start_token_id: i64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        // Roughly T5-small sized.
        Self {
            d_model: 512,
            n_head: 8,
            n_encoder_layer: 6,
            n_decoder_layer: 6,
            d_ff: 2048,
            vocab_size: 32_000,
            max_seq_len: 512,
            dropout: 0.1,
            layer_norm_epsilon: 1e-6,
            use_bias: false,
            pad_token_id: 0,
            eos_token_id: 3,
            decoder_start_token_id: 0,
        }
    }
}

impl ModelConfig {
    /// Architecture for a preset name, with the vocabulary left at its default.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "seq2seq-tiny" => Some(Self {
                d_model: 64,
                n_head: 4,
                n_encoder_layer: 2,
                n_decoder_layer: 2,
                d_ff: 256,
                max_seq_len: 512,
                dropout: 0.0,
                ..Self::default()
            }),
            "seq2seq-small" => Some(Self::default()),
            _ => None,
        }
    }

    pub fn head_size(&self) -> i64 {
        self.d_model / self.n_head
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.n_head <= 0 || self.d_model % self.n_head != 0 {
            return Err(format!(
                "d_model ({}) must be divisible by n_head ({})",
                self.d_model, self.n_head
            ));
        }
        if self.head_size() % 2 != 0 {
            return Err(format!(
                "head size {} must be even for rotary embeddings",
                self.head_size()
            ));
        }
        if self.vocab_size <= 0 || self.max_seq_len <= 0 {
            return Err("vocab_size and max_seq_len must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_resolve_and_validate() {
        for name in PRESETS {
            let config = ModelConfig::preset(name).unwrap();
            assert!(config.validate().is_ok(), "{}", name);
        }
        assert!(ModelConfig::preset("t5-unknown").is_none());
    }

    #[test]
    fn test_validate_rejects_bad_heads() {
        let config = ModelConfig {
            d_model: 30,
            n_head: 4,
            ..ModelConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
