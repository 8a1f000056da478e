use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};

use crate::bpe::{pretokenizer, BPE};
use crate::vocab::Vocab;

type Pair = (String, String);

/// Learns BPE merges from a corpus.
///
/// The resulting vocabulary is laid out as: special tokens, the 256 byte tokens,
/// the corpus characters (sorted), then one token per merge.
pub struct Trainer {
    vocab_size: usize,
    min_frequency: u32,
}

impl Trainer {
    pub fn new(vocab_size: usize, min_frequency: u32) -> Self {
        Self {
            vocab_size,
            min_frequency: min_frequency.max(1),
        }
    }

    pub fn train_from_texts<S: AsRef<str> + Sync>(&self, texts: &[S]) -> BPE {
        let word_counts = count_words(texts);
        tracing::debug!(unique_words = word_counts.len(), "counted pre-tokenized words");

        let mut split_words: HashMap<String, Vec<String>> = word_counts
            .keys()
            .map(|word| (word.clone(), word.chars().map(|c| c.to_string()).collect()))
            .collect();

        let mut vocab = Vocab::byte_level();
        let base_chars: BTreeSet<&String> = split_words.values().flatten().collect();
        for ch in base_chars {
            vocab.push(ch.clone());
        }

        let mut merges: HashMap<Pair, u32> = HashMap::new();

        while vocab.len() < self.vocab_size {
            let pair_counts = count_pairs(&word_counts, &split_words);

            // Highest count wins; ties go to the lexicographically smallest pair.
            let best = pair_counts
                .into_iter()
                .filter(|(_, count)| *count >= self.min_frequency)
                .max_by(|(pa, ca), (pb, cb)| ca.cmp(cb).then_with(|| pb.cmp(pa)));

            let Some(((first, second), _)) = best else {
                tracing::debug!("no more pairs to merge");
                break;
            };

            let new_token = format!("{}{}", first, second);
            vocab.push(new_token.clone());
            merges.insert((first.clone(), second.clone()), merges.len() as u32);

            for tokens in split_words.values_mut() {
                if tokens.len() < 2 {
                    continue;
                }
                let mut merged = Vec::with_capacity(tokens.len());
                let mut i = 0;
                while i < tokens.len() {
                    if i + 1 < tokens.len() && tokens[i] == first && tokens[i + 1] == second {
                        merged.push(new_token.clone());
                        i += 2;
                    } else {
                        merged.push(tokens[i].clone());
                        i += 1;
                    }
                }
                *tokens = merged;
            }
        }

        tracing::info!(
            vocab_size = vocab.len(),
            merges = merges.len(),
            "tokenizer training finished"
        );
        BPE::new(vocab, merges)
    }
}

fn count_words<S: AsRef<str> + Sync>(texts: &[S]) -> HashMap<String, u32> {
    texts
        .par_iter()
        .fold(HashMap::new, |mut counts: HashMap<String, u32>, text| {
            for mat in pretokenizer().find_iter(text.as_ref()) {
                *counts.entry(mat.as_str().to_string()).or_insert(0) += 1;
            }
            counts
        })
        .reduce(HashMap::new, merge_counts)
}

fn count_pairs(
    word_counts: &HashMap<String, u32>,
    split_words: &HashMap<String, Vec<String>>,
) -> HashMap<Pair, u32> {
    word_counts
        .par_iter()
        .fold(HashMap::new, |mut counts: HashMap<Pair, u32>, (word, count)| {
            if let Some(tokens) = split_words.get(word) {
                for window in tokens.windows(2) {
                    *counts
                        .entry((window[0].clone(), window[1].clone()))
                        .or_insert(0) += count;
                }
            }
            counts
        })
        .reduce(HashMap::new, merge_counts)
}

fn merge_counts<K: std::hash::Hash + Eq>(
    mut left: HashMap<K, u32>,
    right: HashMap<K, u32>,
) -> HashMap<K, u32> {
    for (key, count) in right {
        *left.entry(key).or_insert(0) += count;
    }
    left
}
