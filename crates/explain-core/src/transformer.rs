use tch::{nn, Tensor};

use crate::attention::{CrossAttention, SelfAttention};
use crate::config::ModelConfig;
use crate::layer_norm::RMSNorm;

fn norm(vs: &nn::Path, config: &ModelConfig) -> RMSNorm {
    RMSNorm::new(vs, config.d_model, config.layer_norm_epsilon)
}

/// FeedForward block (MLP)
pub struct MLP {
    c_fc: nn::Linear,
    c_proj: nn::Linear,
    dropout: f64,
}

impl MLP {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let c_fc = nn::linear(vs / "c_fc", config.d_model, config.d_ff, Default::default());
        let c_proj = nn::linear(vs / "c_proj", config.d_ff, config.d_model, Default::default());

        Self {
            c_fc,
            c_proj,
            dropout: config.dropout,
        }
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Tensor {
        x.apply(&self.c_fc)
            .gelu("none")
            .apply(&self.c_proj)
            .dropout(self.dropout, train)
    }
}

/// Pre-norm encoder block: self-attention, then MLP.
pub struct EncoderBlock {
    ln_1: RMSNorm,
    attn: SelfAttention,
    ln_2: RMSNorm,
    mlp: MLP,
}

impl EncoderBlock {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        Self {
            ln_1: norm(&(vs / "ln_1"), config),
            attn: SelfAttention::new(&(vs / "attn"), config, false),
            ln_2: norm(&(vs / "ln_2"), config),
            mlp: MLP::new(&(vs / "mlp"), config),
        }
    }

    pub fn forward(&self, x: &Tensor, padding_mask: &Tensor, train: bool) -> Tensor {
        let x = x + self.attn.forward(&self.ln_1.forward(x), Some(padding_mask), train);
        &x + self.mlp.forward(&self.ln_2.forward(&x), train)
    }
}

/// Pre-norm decoder block: causal self-attention, cross-attention, then MLP.
pub struct DecoderBlock {
    ln_1: RMSNorm,
    self_attn: SelfAttention,
    ln_2: RMSNorm,
    cross_attn: CrossAttention,
    ln_3: RMSNorm,
    mlp: MLP,
}

impl DecoderBlock {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        Self {
            ln_1: norm(&(vs / "ln_1"), config),
            self_attn: SelfAttention::new(&(vs / "self_attn"), config, true),
            ln_2: norm(&(vs / "ln_2"), config),
            cross_attn: CrossAttention::new(&(vs / "cross_attn"), config),
            ln_3: norm(&(vs / "ln_3"), config),
            mlp: MLP::new(&(vs / "mlp"), config),
        }
    }

    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        memory_mask: &Tensor,
        train: bool,
    ) -> Tensor {
        let x = x + self.self_attn.forward(&self.ln_1.forward(x), None, train);
        let x = &x + self
            .cross_attn
            .forward(&self.ln_2.forward(&x), memory, Some(memory_mask), train);
        &x + self.mlp.forward(&self.ln_3.forward(&x), train)
    }
}

/// Encoder-decoder transformer with a shared token embedding.
pub struct Seq2SeqTransformer {
    shared: nn::Embedding,
    encoder: Vec<EncoderBlock>,
    encoder_ln_f: RMSNorm,
    decoder: Vec<DecoderBlock>,
    decoder_ln_f: RMSNorm,
    lm_head: nn::Linear,
    drop: f64,
    pub config: ModelConfig,
}

impl Seq2SeqTransformer {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let shared = nn::embedding(
            vs / "shared",
            config.vocab_size,
            config.d_model,
            Default::default(),
        );

        let encoder = (0..config.n_encoder_layer)
            .map(|i| EncoderBlock::new(&(vs / "encoder" / i), config))
            .collect();
        let decoder = (0..config.n_decoder_layer)
            .map(|i| DecoderBlock::new(&(vs / "decoder" / i), config))
            .collect();

        let lm_head = nn::linear(
            vs / "lm_head",
            config.d_model,
            config.vocab_size,
            nn::LinearConfig {
                bias: false,
                ..Default::default()
            },
        );

        Self {
            shared,
            encoder,
            encoder_ln_f: norm(&(vs / "encoder_ln_f"), config),
            decoder,
            decoder_ln_f: norm(&(vs / "decoder_ln_f"), config),
            lm_head,
            drop: config.dropout,
            config: config.clone(),
        }
    }

    /// attention_mask: [batch, src_len] with 1 for real tokens and 0 for padding.
    /// Returns the boolean mask attention layers expect: [batch, 1, 1, src_len], true on padding.
    pub fn padding_mask(attention_mask: &Tensor) -> Tensor {
        let size = attention_mask.size();
        attention_mask.eq(0).view([size[0], 1, 1, size[1]])
    }

    /// input_ids: [batch, src_len] -> encoder states [batch, src_len, d_model]
    pub fn encode(&self, input_ids: &Tensor, padding_mask: &Tensor, train: bool) -> Tensor {
        let mut x = input_ids.apply(&self.shared).dropout(self.drop, train);
        for block in &self.encoder {
            x = block.forward(&x, padding_mask, train);
        }
        self.encoder_ln_f.forward(&x)
    }

    /// decoder_input_ids: [batch, tgt_len] -> logits [batch, tgt_len, vocab_size]
    pub fn decode(
        &self,
        decoder_input_ids: &Tensor,
        memory: &Tensor,
        memory_mask: &Tensor,
        train: bool,
    ) -> Tensor {
        let mut x = decoder_input_ids.apply(&self.shared).dropout(self.drop, train);
        for block in &self.decoder {
            x = block.forward(&x, memory, memory_mask, train);
        }
        self.decoder_ln_f.forward(&x).apply(&self.lm_head)
    }

    /// Full pass over known decoder inputs, used for training and validation loss.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        decoder_input_ids: &Tensor,
        train: bool,
    ) -> Tensor {
        let padding_mask = Self::padding_mask(attention_mask);
        let memory = self.encode(input_ids, &padding_mask, train);
        self.decode(decoder_input_ids, &memory, &padding_mask, train)
    }
}
