use corpus::ErrorExplanationPair;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tch::{Device, Tensor};
use tokenizer::BPE;

/// Label value the loss skips.
pub const IGNORE_INDEX: i64 = -100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub labels: Vec<i64>,
}

impl Encoding {
    pub fn new(
        pair: &ErrorExplanationPair,
        tokenizer: &BPE,
        max_input_length: usize,
        max_target_length: usize,
    ) -> Self {
        let input_ids: Vec<i64> = tokenizer
            .encode_with_eos(&pair.input_text(), max_input_length)
            .into_iter()
            .map(i64::from)
            .collect();
        let labels = tokenizer
            .encode_with_eos(&pair.explanation_text, max_target_length)
            .into_iter()
            .map(i64::from)
            .collect();

        Self {
            attention_mask: vec![1; input_ids.len()],
            input_ids,
            labels,
        }
    }

    /// Right-pads inputs with `pad_id` (mask 0) and labels with `IGNORE_INDEX`.
    /// Sequences already longer than the target length are left alone.
    pub fn pad_to(&self, input_len: usize, label_len: usize, pad_id: i64) -> Self {
        let pad = |values: &[i64], len: usize, fill: i64| {
            let mut out = values.to_vec();
            if out.len() < len {
                out.resize(len, fill);
            }
            out
        };
        Self {
            input_ids: pad(&self.input_ids, input_len, pad_id),
            attention_mask: pad(&self.attention_mask, input_len, 0),
            labels: pad(&self.labels, label_len, IGNORE_INDEX),
        }
    }
}

/// Decoder inputs: labels shifted one step right behind the start token.
pub fn shift_right(labels: &[i64], decoder_start_id: i64, pad_id: i64) -> Vec<i64> {
    std::iter::once(decoder_start_id)
        .chain(labels.iter().take(labels.len().saturating_sub(1)).copied())
        .map(|id| if id == IGNORE_INDEX { pad_id } else { id })
        .collect()
}

pub struct Batch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub decoder_input_ids: Tensor,
    pub labels: Tensor,
}

/// A split encoded once up front, batched with padding to the longest member.
pub struct Seq2SeqDataset {
    encodings: Vec<Encoding>,
    pad_id: i64,
    decoder_start_id: i64,
}

impl Seq2SeqDataset {
    pub fn new(
        pairs: &[ErrorExplanationPair],
        tokenizer: &BPE,
        max_input_length: usize,
        max_target_length: usize,
        decoder_start_id: i64,
    ) -> Self {
        let encodings = pairs
            .iter()
            .map(|pair| Encoding::new(pair, tokenizer, max_input_length, max_target_length))
            .collect();
        Self {
            encodings,
            pad_id: i64::from(tokenizer.pad_id()),
            decoder_start_id,
        }
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Encoding> {
        self.encodings.get(index)
    }

    /// Index groups for one epoch. With an rng the order is shuffled first.
    pub fn batch_indices(&self, batch_size: usize, rng: Option<&mut StdRng>) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.encodings.len()).collect();
        if let Some(rng) = rng {
            order.shuffle(rng);
        }
        order.chunks(batch_size.max(1)).map(|c| c.to_vec()).collect()
    }

    pub fn num_batches(&self, batch_size: usize) -> usize {
        self.encodings.len().div_ceil(batch_size.max(1))
    }

    pub fn collate(&self, indices: &[usize], device: Device) -> Batch {
        let members: Vec<&Encoding> = indices
            .iter()
            .filter_map(|&i| self.encodings.get(i))
            .collect();
        let input_len = members.iter().map(|e| e.input_ids.len()).max().unwrap_or(1);
        let label_len = members.iter().map(|e| e.labels.len()).max().unwrap_or(1);
        let rows = members.len() as i64;

        let mut input_ids = Vec::with_capacity(members.len() * input_len);
        let mut attention_mask = Vec::with_capacity(members.len() * input_len);
        let mut labels = Vec::with_capacity(members.len() * label_len);
        let mut decoder_input_ids = Vec::with_capacity(members.len() * label_len);

        for encoding in members {
            let padded = encoding.pad_to(input_len, label_len, self.pad_id);
            decoder_input_ids.extend(shift_right(
                &padded.labels,
                self.decoder_start_id,
                self.pad_id,
            ));
            input_ids.extend(padded.input_ids);
            attention_mask.extend(padded.attention_mask);
            labels.extend(padded.labels);
        }

        let to_tensor = |values: &[i64], width: usize| {
            Tensor::from_slice(values)
                .view([rows, width as i64])
                .to_device(device)
        };

        Batch {
            input_ids: to_tensor(&input_ids, input_len),
            attention_mask: to_tensor(&attention_mask, input_len),
            decoder_input_ids: to_tensor(&decoder_input_ids, label_len),
            labels: to_tensor(&labels, label_len),
        }
    }
}
