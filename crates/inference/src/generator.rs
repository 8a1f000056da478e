use explain_core::{catch_torch, ModelArtifact, ModelError, Seq2SeqTransformer};
use rand::rngs::StdRng;
use tch::{Device, IndexOp, Kind, Tensor};

use crate::config::GenerationConfig;
use crate::sampling::{apply_repetition_penalty, Sampler};

type GenResult<T> = std::result::Result<T, ModelError>;

struct Hypothesis {
    tokens: Vec<i64>,
    score: f64,
}

/// Autoregressive decoding over the encoder-decoder model.
///
/// The decoder is re-run over the whole prefix each step. `<pad>`, `<s>` and
/// `<unk>` can never be produced, and `</s>` is masked until
/// `min_new_tokens` tokens exist.
pub struct Generator<'a> {
    model: &'a Seq2SeqTransformer,
    config: &'a GenerationConfig,
    device: Device,
    banned: Vec<i64>,
    eos_id: i64,
    start_id: i64,
}

impl<'a> Generator<'a> {
    pub fn new(artifact: &'a ModelArtifact, config: &'a GenerationConfig) -> Self {
        let tokenizer = &artifact.tokenizer;
        let banned = [tokenizer.pad_id(), tokenizer.bos_id(), tokenizer.unk_id()]
            .into_iter()
            .map(i64::from)
            .collect();
        Self {
            model: &artifact.model,
            config,
            device: artifact.device(),
            banned,
            eos_id: artifact.config().eos_token_id,
            start_id: artifact.config().decoder_start_token_id,
        }
    }

    /// Longest output the causal mask allows, capped by `max_output_length`.
    fn max_new_tokens(&self) -> usize {
        let room = (self.model.config.max_seq_len - 1).max(1) as usize;
        self.config.max_output_length.min(room)
    }

    /// Returns generated ids without the start token and without `</s>`.
    pub fn generate(&self, input_ids: &[i64], rng: &mut StdRng) -> GenResult<Vec<i64>> {
        if input_ids.is_empty() || self.max_new_tokens() == 0 {
            return Ok(Vec::new());
        }
        catch_torch(|| {
            let _guard = tch::no_grad_guard();
            let input = Tensor::from_slice(input_ids)
                .view([1, input_ids.len() as i64])
                .to_device(self.device);
            let mask = Seq2SeqTransformer::padding_mask(&input.ones_like());
            let memory = self.model.encode(&input, &mask, false);

            if self.config.do_sample {
                self.decode_single(&memory, &mask, Some(rng))
            } else if self.config.num_beams > 1 {
                self.beam_search(&memory, &mask)
            } else {
                self.decode_single(&memory, &mask, None)
            }
        })?
    }

    /// Adds -inf to every token that may not be produced at this length.
    fn mask_logits(&self, logits: &Tensor, generated: usize) -> Tensor {
        let mut banned = self.banned.clone();
        if generated < self.config.min_new_tokens {
            banned.push(self.eos_id);
        }
        let index = Tensor::from_slice(&banned).to_device(logits.device());
        logits.index_fill(-1, &index, f64::NEG_INFINITY)
    }

    fn next_logits(&self, prefix: &Tensor, memory: &Tensor, mask: &Tensor) -> Tensor {
        let logits = self.model.decode(prefix, memory, mask, false);
        logits.i((.., -1, ..)).to_kind(Kind::Float)
    }

    /// Greedy decoding, or sampling when an rng is given.
    fn decode_single(
        &self,
        memory: &Tensor,
        mask: &Tensor,
        mut rng: Option<&mut StdRng>,
    ) -> GenResult<Vec<i64>> {
        let params = self.config.sampling_params();
        let mut tokens = vec![self.start_id];

        for step in 0..self.max_new_tokens() {
            let prefix = Tensor::from_slice(&tokens)
                .view([1, tokens.len() as i64])
                .to_device(self.device);
            let logits = self.mask_logits(&self.next_logits(&prefix, memory, mask).i(0), step);

            let next = match rng.as_deref_mut() {
                Some(rng) => Sampler::sample(&logits, &params, &tokens[1..], rng)?,
                None => apply_repetition_penalty(&logits, &tokens[1..], params.repetition_penalty)
                    .f_argmax(0, false)?
                    .f_int64_value(&[])?,
            };

            if next == self.eos_id {
                break;
            }
            tokens.push(next);
        }

        tokens.remove(0);
        Ok(tokens)
    }

    fn length_normalized(&self, hypothesis: &Hypothesis) -> f64 {
        let length = hypothesis.tokens.len().max(1) as f64;
        hypothesis.score / length.powf(self.config.length_penalty)
    }

    fn beam_search(&self, memory: &Tensor, mask: &Tensor) -> GenResult<Vec<i64>> {
        let num_beams = self.config.num_beams;
        let penalty = self.config.repetition_penalty;
        let mut beams = vec![Hypothesis {
            tokens: vec![self.start_id],
            score: 0.0,
        }];
        let mut finished: Vec<Hypothesis> = Vec::new();

        for step in 0..self.max_new_tokens() {
            let width = beams.len() as i64;
            let flat: Vec<i64> = beams.iter().flat_map(|b| b.tokens.iter().copied()).collect();
            let prefix = Tensor::from_slice(&flat)
                .view([width, (step + 1) as i64])
                .to_device(self.device);
            let logits = self.next_logits(
                &prefix,
                &memory.repeat([width, 1, 1]),
                &mask.repeat([width, 1, 1, 1]),
            );

            let mut candidates: Vec<(f64, usize, i64)> = Vec::new();
            for (row, beam) in beams.iter().enumerate() {
                let row_logits = apply_repetition_penalty(
                    &self.mask_logits(&logits.i(row as i64), step),
                    &beam.tokens[1..],
                    penalty,
                );
                let log_probs = row_logits.log_softmax(-1, Kind::Float);
                let k = (2 * num_beams).min(log_probs.size()[0] as usize) as i64;
                let (values, indices) = log_probs.topk(k, -1, true, true);
                let values = Vec::<f64>::try_from(&values)?;
                let indices = Vec::<i64>::try_from(&indices)?;
                for (value, token) in values.into_iter().zip(indices) {
                    if value.is_finite() {
                        candidates.push((beam.score + value, row, token));
                    }
                }
            }
            candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

            let mut next_beams = Vec::with_capacity(num_beams);
            for (score, row, token) in candidates {
                if token == self.eos_id {
                    finished.push(Hypothesis {
                        tokens: beams[row].tokens[1..].to_vec(),
                        score,
                    });
                } else {
                    let mut tokens = beams[row].tokens.clone();
                    tokens.push(token);
                    next_beams.push(Hypothesis { tokens, score });
                }
                if next_beams.len() == num_beams {
                    break;
                }
            }

            beams = next_beams;
            let done = self.config.early_stopping && finished.len() >= num_beams;
            if beams.is_empty() || done {
                break;
            }
        }

        // Unfinished beams compete with finished ones when the length limit is hit.
        finished.extend(beams.into_iter().map(|mut b| {
            b.tokens.remove(0);
            b
        }));

        let best = finished.into_iter().max_by(|a, b| {
            self.length_normalized(a)
                .partial_cmp(&self.length_normalized(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(best.map(|h| h.tokens).unwrap_or_default())
    }
}
