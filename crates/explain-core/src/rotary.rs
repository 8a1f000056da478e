use tch::{Device, Kind, Tensor};

const ROPE_BASE: f64 = 10_000.0;

/// Rotary position embedding applied to queries and keys of self-attention.
///
/// Angles for the first `max_positions` positions are tabulated once; longer
/// inputs get fresh tables.
pub struct RotaryEmbedding {
    inv_freq: Tensor,
    cos: Tensor,
    sin: Tensor,
}

impl RotaryEmbedding {
    pub fn new(head_dim: i64, max_positions: i64, device: Device) -> Self {
        let inv_freq: Vec<f32> = (0..head_dim / 2)
            .map(|i| ROPE_BASE.powf(-2.0 * i as f64 / head_dim as f64) as f32)
            .collect();
        let inv_freq = Tensor::from_slice(&inv_freq).to(device);
        let (cos, sin) = Self::tables(&inv_freq, max_positions);
        Self { inv_freq, cos, sin }
    }

    /// cos and sin of each position's angles, both [positions, head_dim].
    fn tables(inv_freq: &Tensor, positions: i64) -> (Tensor, Tensor) {
        let angles = Tensor::arange(positions, (Kind::Float, inv_freq.device()))
            .outer(inv_freq)
            .repeat([1, 2]);
        (angles.cos(), angles.sin())
    }

    /// x: [batch, n_head, seq_len, head_dim]
    pub fn forward(&self, x: &Tensor) -> Tensor {
        let seq_len = x.size()[2];
        let (cos, sin) = if seq_len <= self.cos.size()[0] {
            (self.cos.narrow(0, 0, seq_len), self.sin.narrow(0, 0, seq_len))
        } else {
            Self::tables(&self.inv_freq, seq_len)
        };
        x * cos + rotate_half(x) * sin
    }
}

/// (x1, x2) -> (-x2, x1) over the two halves of the last dimension.
fn rotate_half(x: &Tensor) -> Tensor {
    let halves = x.chunk(2, -1);
    Tensor::cat(&[halves[1].neg(), halves[0].shallow_clone()], -1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(seq_len: i64) -> Tensor {
        Tensor::arange(2 * seq_len * 8, (Kind::Float, Device::Cpu))
            .view([1, 2, seq_len, 8])
            .sin()
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f64 {
        (a - b).abs().max().double_value(&[])
    }

    #[test]
    fn test_first_position_is_unrotated() {
        let rope = RotaryEmbedding::new(8, 16, Device::Cpu);
        let x = input(4);
        let y = rope.forward(&x);
        assert!(max_abs_diff(&y.narrow(2, 0, 1), &x.narrow(2, 0, 1)) < 1e-6);
        assert!(max_abs_diff(&y.narrow(2, 1, 1), &x.narrow(2, 1, 1)) > 1e-3);
    }

    #[test]
    fn test_rotation_preserves_norm() {
        let rope = RotaryEmbedding::new(8, 16, Device::Cpu);
        let x = input(6);
        let norms = |t: &Tensor| t.square().sum_dim_intlist(Some(&[-1i64][..]), false, Kind::Float);
        assert!(max_abs_diff(&norms(&rope.forward(&x)), &norms(&x)) < 1e-4);
    }

    #[test]
    fn test_inputs_past_the_table_match_a_larger_table() {
        let short = RotaryEmbedding::new(8, 4, Device::Cpu);
        let long = RotaryEmbedding::new(8, 32, Device::Cpu);
        let x = input(10);
        assert!(max_abs_diff(&short.forward(&x), &long.forward(&x)) < 1e-5);
    }
}
