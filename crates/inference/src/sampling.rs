use explain_core::ModelError;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use tch::{Kind, TchError, Tensor};

#[derive(Debug, Clone)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_k: usize,
    pub top_p: f64,
    pub repetition_penalty: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: 50,
            top_p: 1.0,
            repetition_penalty: 1.0,
        }
    }
}

/// Scales down logits of already generated tokens.
/// logits: [vocab_size]
pub fn apply_repetition_penalty(logits: &Tensor, history: &[i64], penalty: f64) -> Tensor {
    if penalty == 1.0 || history.is_empty() {
        return logits.shallow_clone();
    }
    let mut seen = history.to_vec();
    seen.sort_unstable();
    seen.dedup();

    let index = Tensor::from_slice(&seen).to_device(logits.device());
    let selected = logits.index_select(0, &index);
    let penalized = (&selected * penalty).where_self(&selected.lt(0.0), &(&selected / penalty));
    logits.index_copy(0, &index, &penalized)
}

pub struct Sampler;

impl Sampler {
    /// Sample a token ID from logits.
    /// logits: [vocab_size] tensor, with banned tokens already at -inf.
    /// history: previously generated token IDs.
    pub fn sample(
        logits: &Tensor,
        params: &SamplingParams,
        history: &[i64],
        rng: &mut StdRng,
    ) -> Result<i64, ModelError> {
        let _guard = tch::no_grad_guard();

        // 0. Repetition Penalty
        let logits = apply_repetition_penalty(logits, history, params.repetition_penalty);

        // 1. Temperature scaling
        if params.temperature < 1e-5 {
            return Ok(logits.f_argmax(0, false)?.f_int64_value(&[])?);
        }
        let scaled_logits = logits / params.temperature;

        // 2. Softmax for probabilities, sampled on the CPU
        let probs = scaled_logits.softmax(-1, Kind::Float);
        let probs_vec: Vec<f64> = Vec::<f64>::try_from(&probs)?;

        let mut candidates: Vec<(f64, usize)> = probs_vec
            .iter()
            .enumerate()
            .filter(|(_, &p)| p > 0.0)
            .map(|(i, &p)| (p, i))
            .collect();
        if candidates.is_empty() {
            return Err(TchError::Torch("no token has non-zero probability".to_string()).into());
        }

        // Sort descending by probability
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        // 3. Top-K Cutoff
        if params.top_k > 0 && params.top_k < candidates.len() {
            candidates.truncate(params.top_k);
        }

        // 4. Top-P (Nucleus) Cutoff
        if params.top_p < 1.0 {
            let mut cumulative = 0.0;
            let mut cutoff_index = candidates.len() - 1;
            for (i, (p, _)) in candidates.iter().enumerate() {
                cumulative += p;
                if cumulative > params.top_p {
                    cutoff_index = i;
                    break;
                }
            }
            candidates.truncate(cutoff_index + 1);
        }

        // 5. Renormalize and sample
        let sum_p: f64 = candidates.iter().map(|(p, _)| p).sum();
        let renorm_probs: Vec<f64> = candidates.iter().map(|(p, _)| p / sum_p).collect();
        let dist = WeightedIndex::new(&renorm_probs)
            .map_err(|e| TchError::Torch(format!("WeightedIndex error: {}", e)))?;

        Ok(candidates[dist.sample(rng)].1 as i64)
    }
}
