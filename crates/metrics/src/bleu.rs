use std::collections::HashMap;

const MAX_ORDER: usize = 4;
const SMOOTHING_EPSILON: f64 = 0.1;

/// Lowercased whitespace tokens, as BLEU is usually computed on explanations.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn ngrams(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

/// Clipped matches and the (floored at 1) candidate n-gram count.
fn modified_precision(hypothesis: &[String], reference: &[String], n: usize) -> (usize, usize) {
    let hyp = ngrams(hypothesis, n);
    let refs = ngrams(reference, n);
    let matches = hyp
        .iter()
        .map(|(gram, count)| (*count).min(refs.get(gram).copied().unwrap_or(0)))
        .sum();
    let total = hyp.values().sum::<usize>().max(1);
    (matches, total)
}

/// Sentence BLEU with uniform 1..=4-gram weights, brevity penalty and
/// additive-epsilon smoothing for orders without matches.
pub fn sentence_bleu(hypothesis: &[String], reference: &[String]) -> f64 {
    let precisions: Vec<(usize, usize)> = (1..=MAX_ORDER)
        .map(|n| modified_precision(hypothesis, reference, n))
        .collect();

    if precisions[0].0 == 0 {
        return 0.0;
    }

    let hyp_len = hypothesis.len() as f64;
    let ref_len = reference.len() as f64;
    let brevity_penalty = if hyp_len > ref_len {
        1.0
    } else {
        (1.0 - ref_len / hyp_len).exp()
    };

    let weight = 1.0 / MAX_ORDER as f64;
    let log_sum: f64 = precisions
        .iter()
        .map(|&(matches, total)| {
            let p = if matches == 0 {
                SMOOTHING_EPSILON / total as f64
            } else {
                matches as f64 / total as f64
            };
            weight * p.ln()
        })
        .sum();

    brevity_penalty * log_sum.exp()
}
