//! Text-similarity metrics for generated explanations.
//!
//! Edge cases are defined rather than left to NaN:
//! - an empty prediction or empty reference scores 0 on every metric;
//! - a non-empty prediction identical to its reference scores 1 on every metric,
//!   even when it is too short to contain bigrams or 4-grams.

pub mod bleu;
pub mod rouge;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub rouge1: f64,
    pub rouge2: f64,
    #[serde(rename = "rougeL")]
    pub rouge_l: f64,
    pub bleu: f64,
}

impl MetricReport {
    const EXACT_MATCH: Self = Self {
        rouge1: 1.0,
        rouge2: 1.0,
        rouge_l: 1.0,
        bleu: 1.0,
    };

    /// Element-wise mean. An empty slice gives the all-zero report.
    pub fn mean(reports: &[MetricReport]) -> Self {
        if reports.is_empty() {
            return Self::default();
        }
        let n = reports.len() as f64;
        let sum = reports.iter().fold(Self::default(), |acc, r| Self {
            rouge1: acc.rouge1 + r.rouge1,
            rouge2: acc.rouge2 + r.rouge2,
            rouge_l: acc.rouge_l + r.rouge_l,
            bleu: acc.bleu + r.bleu,
        });
        Self {
            rouge1: sum.rouge1 / n,
            rouge2: sum.rouge2 / n,
            rouge_l: sum.rouge_l / n,
            bleu: sum.bleu / n,
        }
    }

    pub fn entries(&self) -> [(&'static str, f64); 4] {
        [
            ("rouge1", self.rouge1),
            ("rouge2", self.rouge2),
            ("rougeL", self.rouge_l),
            ("bleu", self.bleu),
        ]
    }
}

/// Scores one prediction against its reference.
pub fn score_pair(prediction: &str, reference: &str) -> MetricReport {
    if prediction.is_empty() || reference.is_empty() {
        return MetricReport::default();
    }
    if prediction == reference {
        return MetricReport::EXACT_MATCH;
    }

    let pred_tokens = rouge::tokenize(prediction);
    let ref_tokens = rouge::tokenize(reference);

    MetricReport {
        rouge1: rouge::rouge_n(&pred_tokens, &ref_tokens, 1).fmeasure,
        rouge2: rouge::rouge_n(&pred_tokens, &ref_tokens, 2).fmeasure,
        rouge_l: rouge::rouge_l(&pred_tokens, &ref_tokens).fmeasure,
        bleu: bleu::sentence_bleu(&bleu::tokenize(prediction), &bleu::tokenize(reference)),
    }
}

/// Mean of per-pair scores. Extra items on the longer side are ignored.
pub fn compute_metrics<P, R>(predictions: &[P], references: &[R]) -> MetricReport
where
    P: AsRef<str>,
    R: AsRef<str>,
{
    let scores: Vec<MetricReport> = predictions
        .iter()
        .zip(references)
        .map(|(p, r)| score_pair(p.as_ref(), r.as_ref()))
        .collect();
    MetricReport::mean(&scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_vs_empty_is_zero() {
        let report = score_pair("", "");
        assert_eq!(report, MetricReport::default());
        assert!(report.entries().iter().all(|(_, v)| !v.is_nan()));
    }

    #[test]
    fn test_one_side_empty_is_zero() {
        assert_eq!(score_pair("", "reference"), MetricReport::default());
        assert_eq!(score_pair("prediction", ""), MetricReport::default());
    }

    #[test]
    fn test_exact_match_is_one() {
        for x in [
            "x",
            "segfault",
            "!!",
            "   ",
            "Add a semicolon after the closing brace of the struct definition.",
        ] {
            assert_eq!(score_pair(x, x), MetricReport::EXACT_MATCH, "x = {:?}", x);
        }
    }

    #[test]
    fn test_long_identical_tokens_score_one_without_shortcut() {
        let pred = "Include the stdio header before calling printf in main";
        let reference = "include the stdio header before calling printf in main";
        let report = score_pair(pred, reference);
        assert!((report.rouge1 - 1.0).abs() < 1e-12);
        assert!((report.rouge2 - 1.0).abs() < 1e-12);
        assert!((report.rouge_l - 1.0).abs() < 1e-12);
        assert!((report.bleu - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rouge_ignores_trailing_punctuation() {
        let report = score_pair("Add a semicolon.", "add a semicolon!");
        assert!((report.rouge1 - 1.0).abs() < 1e-12);
        assert!((report.rouge2 - 1.0).abs() < 1e-12);
        assert!((report.rouge_l - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_partial_overlap_between_zero_and_one() {
        let report = score_pair(
            "the variable is not declared",
            "the identifier was not declared in this scope",
        );
        for (name, value) in report.entries() {
            assert!((0.0..1.0).contains(&value), "{} = {}", name, value);
        }
        assert!(report.rouge1 > 0.0);
    }

    #[test]
    fn test_compute_metrics_averages() {
        let preds = ["same text here", ""];
        let refs = ["same text here", "anything"];
        let report = compute_metrics(&preds, &refs);
        assert!((report.rouge1 - 0.5).abs() < 1e-12);
        assert!((report.bleu - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_split_is_zero_report() {
        let none: [&str; 0] = [];
        assert_eq!(compute_metrics(&none, &none), MetricReport::default());
    }

    #[test]
    fn test_report_serializes_rouge_l_name() {
        let json = serde_json::to_string(&MetricReport::default()).unwrap();
        assert!(json.contains("\"rougeL\""));
    }
}
