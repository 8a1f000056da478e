use corpus::ErrorExplanationPair;
use metrics::{compute_metrics, MetricReport};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::{Explain, Result};

pub const RESULTS_FILE: &str = "evaluation_results.json";

/// Predictions and references kept in the results file as examples.
const SAMPLE_COUNT: usize = 10;
const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResults {
    pub metrics: MetricReport,
    pub predictions: Vec<String>,
    pub references: Vec<String>,
}

/// Scores any explainer against a test split and records the results.
pub struct Evaluator<'a, E: Explain> {
    explainer: &'a mut E,
    output_dir: PathBuf,
}

impl<'a, E: Explain> Evaluator<'a, E> {
    pub fn new(explainer: &'a mut E, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            explainer,
            output_dir: output_dir.into(),
        }
    }

    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join(RESULTS_FILE)
    }

    pub fn evaluate(&mut self, test: &[ErrorExplanationPair]) -> Result<EvaluationResults> {
        tracing::info!(samples = test.len(), "generating predictions");

        let mut predictions = Vec::with_capacity(test.len());
        let mut references = Vec::with_capacity(test.len());
        for (i, pair) in test.iter().enumerate() {
            predictions.push(self.explainer.explain(&pair.error_text)?);
            references.push(pair.explanation_text.clone());
            if (i + 1) % PROGRESS_EVERY == 0 {
                tracing::info!("processed {}/{} samples", i + 1, test.len());
            }
        }

        let metrics = compute_metrics(&predictions, &references);
        for (name, value) in metrics.entries() {
            tracing::info!("  {}: {:.4}", name, value);
        }

        predictions.truncate(SAMPLE_COUNT);
        references.truncate(SAMPLE_COUNT);
        let results = EvaluationResults {
            metrics,
            predictions,
            references,
        };
        write_results(&self.results_path(), &results)?;
        tracing::info!(path = %self.results_path().display(), "results saved");
        Ok(results)
    }
}

fn write_results(path: &Path, results: &EvaluationResults) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_json(File::create(path)?, results)
}

fn write_json<W: Write>(inner: W, results: &EvaluationResults) -> Result<()> {
    let mut writer = BufWriter::new(inner);
    serde_json::to_writer_pretty(&mut writer, results)?;
    writer.flush()?;
    Ok(())
}
