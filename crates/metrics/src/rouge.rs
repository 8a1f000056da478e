use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Tokens this short are compared as written.
const MIN_STEM_LEN: usize = 4;

fn separator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("separator pattern is valid"))
}

fn stemmer() -> &'static Stemmer {
    static STEMMER: OnceLock<Stemmer> = OnceLock::new();
    STEMMER.get_or_init(|| Stemmer::create(Algorithm::English))
}

/// Lowercased ASCII alphanumeric runs; everything else separates tokens.
/// Tokens of four or more characters are stemmed.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    separator_pattern()
        .replace_all(&lower, " ")
        .split_whitespace()
        .map(|token| {
            if token.len() >= MIN_STEM_LEN {
                stemmer().stem(token).into_owned()
            } else {
                token.to_string()
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Score {
    pub precision: f64,
    pub recall: f64,
    pub fmeasure: f64,
}

impl Score {
    fn from_counts(hits: usize, predicted: usize, reference: usize) -> Self {
        if predicted == 0 || reference == 0 {
            return Self::default();
        }
        let precision = hits as f64 / predicted as f64;
        let recall = hits as f64 / reference as f64;
        let fmeasure = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            fmeasure,
        }
    }
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n == 0 || tokens.len() < n {
        return counts;
    }
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// ROUGE-N over pre-tokenized text.
pub fn rouge_n(prediction: &[String], reference: &[String], n: usize) -> Score {
    let pred = ngram_counts(prediction, n);
    let refs = ngram_counts(reference, n);
    let hits: usize = pred
        .iter()
        .map(|(gram, count)| (*count).min(refs.get(gram).copied().unwrap_or(0)))
        .sum();
    Score::from_counts(hits, pred.values().sum(), refs.values().sum())
}

/// ROUGE-L: longest common subsequence over tokens.
pub fn rouge_l(prediction: &[String], reference: &[String]) -> Score {
    Score::from_counts(
        lcs_len(prediction, reference),
        prediction.len(),
        reference.len(),
    )
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        tokenize(s)
    }

    #[test]
    fn test_tokenize_drops_punctuation() {
        assert_eq!(tokenize("Add a semicolon."), tokenize("add a semicolon!"));
        assert_eq!(tokenize("x; y -- z"), vec!["x", "y", "z"]);
        assert!(tokenize("   ").is_empty());
        assert!(tokenize("';' '}'").is_empty());
    }

    #[test]
    fn test_tokenize_stems_long_tokens() {
        assert_eq!(tokenize("variable declared"), tokenize("variable declare"));
        assert_eq!(tokenize("errors"), tokenize("error"));
        assert_eq!(tokenize("was"), vec!["was"]);
    }

    #[test]
    fn test_rouge_ignores_punctuation_and_inflection() {
        let pred = toks("Add a semicolon.");
        let reference = toks("add a semicolon!");
        assert!((rouge_n(&pred, &reference, 1).fmeasure - 1.0).abs() < 1e-12);
        assert!((rouge_n(&pred, &reference, 2).fmeasure - 1.0).abs() < 1e-12);
        assert!((rouge_l(&pred, &reference).fmeasure - 1.0).abs() < 1e-12);

        let score = rouge_n(&toks("variable declared"), &toks("variable declare"), 1);
        assert!((score.fmeasure - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rouge1_partial_overlap() {
        let score = rouge_n(&toks("the cat sat"), &toks("the cat ran away"), 1);
        assert!((score.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((score.recall - 0.5).abs() < 1e-12);
        assert!((score.fmeasure - 4.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_rouge_n_clips_repeated_ngrams() {
        let score = rouge_n(&toks("the the the"), &toks("the cat"), 1);
        assert!((score.precision - 1.0 / 3.0).abs() < 1e-12);
        assert!((score.recall - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rouge2_without_bigrams_is_zero() {
        assert_eq!(rouge_n(&toks("word"), &toks("word"), 2).fmeasure, 0.0);
    }

    #[test]
    fn test_rouge_l_uses_subsequence() {
        let score = rouge_l(&toks("a b c d"), &toks("a x c y d"));
        assert!((score.precision - 0.75).abs() < 1e-12);
        assert!((score.recall - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_empty_sides_are_zero() {
        assert_eq!(rouge_l(&[], &toks("a")).fmeasure, 0.0);
        assert_eq!(rouge_n(&[], &[], 1).fmeasure, 0.0);
    }
}
