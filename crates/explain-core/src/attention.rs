use tch::{nn, IndexOp, Kind, Tensor};

use crate::config::ModelConfig;
use crate::rotary::RotaryEmbedding;

fn split_heads(x: &Tensor, n_head: i64) -> Tensor {
    let size = x.size();
    let (b, t, c) = (size[0], size[1], size[2]);
    x.view([b, t, n_head, c / n_head]).transpose(1, 2)
}

fn merge_heads(y: &Tensor) -> Tensor {
    let size = y.size();
    let (b, h, t, d) = (size[0], size[1], size[2], size[3]);
    y.transpose(1, 2).contiguous().view([b, t, h * d])
}

/// Scaled dot-product attention. `mask` is true where attention is NOT allowed.
fn attend(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: Option<&Tensor>,
    dropout: f64,
    train: bool,
) -> Tensor {
    let head_size = q.size()[3];
    let mut att = q.matmul(&k.transpose(-2, -1)) * (1.0 / (head_size as f64).sqrt());
    if let Some(mask) = mask {
        att = att.masked_fill(mask, f64::NEG_INFINITY);
    }
    att.softmax(-1, Kind::Float).dropout(dropout, train).matmul(v)
}

/// Multi-head self-attention with rotary positions.
/// Encoder layers use it bidirectionally; decoder layers build it causal.
pub struct SelfAttention {
    c_attn: nn::Linear,
    c_proj: nn::Linear,
    n_head: i64,
    dropout: f64,
    causal_mask: Option<Tensor>,
    rotary_emb: RotaryEmbedding,
}

impl SelfAttention {
    pub fn new(vs: &nn::Path, config: &ModelConfig, causal: bool) -> Self {
        let d_model = config.d_model;
        let linear_config = nn::LinearConfig {
            bias: config.use_bias,
            ..Default::default()
        };

        let c_attn = nn::linear(vs / "c_attn", d_model, 3 * d_model, linear_config);
        let c_proj = nn::linear(vs / "c_proj", d_model, d_model, linear_config);
        let rotary_emb = RotaryEmbedding::new(config.head_size(), config.max_seq_len, vs.device());

        let causal_mask = causal.then(|| {
            let len = config.max_seq_len;
            Tensor::ones([len, len], (Kind::Bool, vs.device()))
                .tril(0)
                .logical_not()
                .reshape([1, 1, len, len])
        });

        Self {
            c_attn,
            c_proj,
            n_head: config.n_head,
            dropout: config.dropout,
            causal_mask,
            rotary_emb,
        }
    }

    /// x: [batch, seq_len, d_model]
    /// key_padding_mask: [batch, 1, 1, seq_len], true on padding positions.
    pub fn forward(&self, x: &Tensor, key_padding_mask: Option<&Tensor>, train: bool) -> Tensor {
        let t = x.size()[1];

        let qkv = x.apply(&self.c_attn);
        let chunks = qkv.chunk(3, -1);
        let q = self.rotary_emb.forward(&split_heads(&chunks[0], self.n_head));
        let k = self.rotary_emb.forward(&split_heads(&chunks[1], self.n_head));
        let v = split_heads(&chunks[2], self.n_head);

        let causal = self
            .causal_mask
            .as_ref()
            .map(|mask| mask.i((.., .., ..t, ..t)));
        let mask = match (causal, key_padding_mask) {
            (Some(c), Some(p)) => Some(c.logical_or(p)),
            (Some(c), None) => Some(c),
            (None, Some(p)) => Some(p.shallow_clone()),
            (None, None) => None,
        };

        let y = attend(&q, &k, &v, mask.as_ref(), self.dropout, train);
        merge_heads(&y).apply(&self.c_proj)
    }
}

/// Decoder-to-encoder attention. No positional rotation: positions come from the
/// encoder states themselves.
pub struct CrossAttention {
    q_proj: nn::Linear,
    kv_proj: nn::Linear,
    c_proj: nn::Linear,
    n_head: i64,
    dropout: f64,
}

impl CrossAttention {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let d_model = config.d_model;
        let linear_config = nn::LinearConfig {
            bias: config.use_bias,
            ..Default::default()
        };

        Self {
            q_proj: nn::linear(vs / "q_proj", d_model, d_model, linear_config),
            kv_proj: nn::linear(vs / "kv_proj", d_model, 2 * d_model, linear_config),
            c_proj: nn::linear(vs / "c_proj", d_model, d_model, linear_config),
            n_head: config.n_head,
            dropout: config.dropout,
        }
    }

    /// x: [batch, tgt_len, d_model], memory: [batch, src_len, d_model]
    /// memory_mask: [batch, 1, 1, src_len], true on padding positions.
    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        memory_mask: Option<&Tensor>,
        train: bool,
    ) -> Tensor {
        let q = split_heads(&x.apply(&self.q_proj), self.n_head);
        let kv = memory.apply(&self.kv_proj).chunk(2, -1);
        let k = split_heads(&kv[0], self.n_head);
        let v = split_heads(&kv[1], self.n_head);

        let y = attend(&q, &k, &v, memory_mask, self.dropout, train);
        merge_heads(&y).apply(&self.c_proj)
    }
}
