use tch::{nn, Kind, Tensor};

/// Root-mean-square normalization with a learned per-channel gain and no bias.
#[derive(Debug)]
pub struct RMSNorm {
    weight: Tensor,
    eps: f64,
}

impl RMSNorm {
    pub fn new(vs: &nn::Path, dim: i64, eps: f64) -> Self {
        Self {
            weight: vs.var("weight", &[dim], nn::Init::Const(1.0)),
            eps,
        }
    }

    /// x: [batch, seq_len, dim]
    pub fn forward(&self, x: &Tensor) -> Tensor {
        let mean_square = x.square().mean_dim(Some(&[-1i64][..]), true, Kind::Float);
        x * (mean_square + self.eps).rsqrt() * &self.weight
    }
}
