use corpus::ErrorExplanationPair;
use explain_core::{catch_torch, ModelArtifact, ModelConfig, WEIGHTS_FILE};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tch::{nn, nn::OptimizerConfig, Device, Reduction, TchError, Tensor};
use tokenizer::Trainer as TokenizerTrainer;

use crate::dataset::{Batch, Seq2SeqDataset, IGNORE_INDEX};
use crate::{Result, TrainError, TrainingConfig};

/// Loads the configured base model. A preset gets a tokenizer trained on the
/// training split first, since it has none of its own.
pub fn prepare_artifact(
    config: &TrainingConfig,
    train: &[ErrorExplanationPair],
    device: Device,
) -> Result<ModelArtifact> {
    if let Some(dir) = ModelArtifact::locate(&config.model_name, config.model_root.as_deref()) {
        log::info!("Fine-tuning saved model at {:?}", dir);
        return Ok(ModelArtifact::load_dir(&dir, device)?);
    }

    if ModelConfig::preset(&config.model_name).is_none() {
        // resolve() produces the load error with the full search description
        return Ok(ModelArtifact::resolve(
            &config.model_name,
            config.model_root.as_deref(),
            device,
        )?);
    }

    let texts: Vec<String> = train
        .iter()
        .flat_map(|pair| [pair.input_text(), pair.explanation_text.clone()])
        .collect();
    let tokenizer =
        TokenizerTrainer::new(config.tokenizer_vocab_size, config.tokenizer_min_frequency)
            .train_from_texts(&texts);
    log::info!(
        "Trained tokenizer for preset {} with {} tokens",
        config.model_name,
        tokenizer.vocab_size()
    );

    Ok(ModelArtifact::from_preset(&config.model_name, tokenizer, device)?)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    /// Mean training loss over every optimizer step.
    pub train_loss: f64,
    pub best_val_loss: Option<f64>,
    pub global_step: usize,
    pub model_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
struct LogEntry {
    step: usize,
    epoch: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    learning_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    eval_loss: Option<f64>,
}

#[derive(Debug, Default, Serialize)]
struct TrainerState {
    global_step: usize,
    best_metric: Option<f64>,
    best_model_checkpoint: Option<PathBuf>,
    log_history: Vec<LogEntry>,
}

fn seq2seq_loss(logits: &Tensor, labels: &Tensor) -> std::result::Result<Tensor, TchError> {
    let vocab = logits.size()[2];
    logits.view([-1, vocab]).f_cross_entropy_loss::<Tensor>(
        &labels.view([-1]),
        None,
        Reduction::Mean,
        IGNORE_INDEX,
        0.0,
    )
}

pub struct Trainer {
    config: TrainingConfig,
    artifact: ModelArtifact,
    optimizer: nn::Optimizer,
    rng: StdRng,
    state: TrainerState,
}

impl Trainer {
    pub fn new(artifact: ModelArtifact, config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        let max_seq_len = artifact.config().max_seq_len;
        if config.max_target_length as i64 > max_seq_len {
            return Err(TrainError::Configuration(format!(
                "max_target_length ({}) exceeds the model's max_seq_len ({})",
                config.max_target_length, max_seq_len
            )));
        }

        let optimizer = nn::AdamW {
            wd: config.weight_decay,
            ..Default::default()
        }
        .build(&artifact.vs, config.learning_rate)?;

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            artifact,
            optimizer,
            state: TrainerState::default(),
        })
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// Linear warmup from zero to the configured rate, then linear decay to zero.
    /// `step` counts optimizer steps already taken.
    fn learning_rate(&self, step: usize, total_steps: usize) -> f64 {
        let lr = self.config.learning_rate;
        let warmup = self.config.warmup_steps;
        if step < warmup {
            return lr * step as f64 / warmup as f64;
        }
        let remaining = total_steps.saturating_sub(step) as f64;
        let decay_span = total_steps.saturating_sub(warmup).max(1) as f64;
        lr * (remaining / decay_span).clamp(0.0, 1.0)
    }

    fn dataset(&self, pairs: &[ErrorExplanationPair]) -> Seq2SeqDataset {
        Seq2SeqDataset::new(
            pairs,
            &self.artifact.tokenizer,
            self.config.max_input_length,
            self.config.max_target_length,
            self.artifact.config().decoder_start_token_id,
        )
    }

    fn batch_loss(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let model = &self.artifact.model;
        let logits = catch_torch(|| {
            model.forward(
                &batch.input_ids,
                &batch.attention_mask,
                &batch.decoder_input_ids,
                train,
            )
        })?;
        Ok(seq2seq_loss(&logits, &batch.labels)?)
    }

    /// Adds this batch's gradients, scaled down by the accumulation count.
    /// Returns the unscaled loss.
    fn accumulate_gradients(&self, batch: &Batch) -> Result<f64> {
        let loss = self.batch_loss(batch, true)?;
        let scale = 1.0 / self.config.gradient_accumulation_steps as f64;
        (&loss * scale).f_backward()?;
        Ok(loss.f_double_value(&[])?)
    }

    fn optimizer_step(&mut self, lr: f64) -> Result<()> {
        self.optimizer.set_lr(lr);
        catch_torch(|| self.optimizer.step())?;
        self.optimizer.zero_grad();
        Ok(())
    }

    /// Mean loss over the split, or None when it is empty.
    fn evaluate(&self, dataset: &Seq2SeqDataset) -> Result<Option<f64>> {
        if dataset.is_empty() {
            return Ok(None);
        }
        let _guard = tch::no_grad_guard();
        let device = self.artifact.device();

        let mut total = 0.0;
        let mut batches = 0usize;
        for indices in dataset.batch_indices(self.config.batch_size, None) {
            let batch = dataset.collate(&indices, device);
            total += self.batch_loss(&batch, false)?.f_double_value(&[])?;
            batches += 1;
        }
        Ok(Some(total / batches as f64))
    }

    fn evaluate_and_checkpoint(
        &mut self,
        val: &Seq2SeqDataset,
        step: usize,
        epoch: f64,
    ) -> Result<Option<f64>> {
        let Some(eval_loss) = self.evaluate(val)? else {
            return Ok(None);
        };
        log::info!("Step {} | eval_loss {:.4}", step, eval_loss);
        self.state.log_history.push(LogEntry {
            step,
            epoch,
            eval_loss: Some(eval_loss),
            ..Default::default()
        });

        let improved = self.state.best_metric.map_or(true, |best| eval_loss < best);
        if improved {
            let dir = self.config.best_model_dir();
            self.artifact.save(&dir)?;
            log::info!("New best eval_loss {:.4}, saved to {:?}", eval_loss, dir);
            self.state.best_metric = Some(eval_loss);
            self.state.best_model_checkpoint = Some(dir);
        }
        Ok(Some(eval_loss))
    }

    pub fn train(
        &mut self,
        train: &[ErrorExplanationPair],
        val: &[ErrorExplanationPair],
    ) -> Result<TrainReport> {
        let train_set = self.dataset(train);
        if train_set.is_empty() {
            return Err(TrainError::EmptyTrainingSet);
        }
        let val_set = self.dataset(val);

        let device = self.artifact.device();
        let accumulation = self.config.gradient_accumulation_steps;
        let steps_per_epoch = train_set.num_batches(self.config.batch_size).div_ceil(accumulation);
        let total_steps = steps_per_epoch * self.config.num_epochs;
        fs::create_dir_all(&self.config.output_dir)?;

        log::info!(
            "Starting training: {} train / {} val examples, {} epochs, {} steps",
            train_set.len(),
            val_set.len(),
            self.config.num_epochs,
            total_steps
        );

        let mut step = 0usize;
        let mut loss_sum = 0.0;
        let mut window_sum = 0.0;
        let mut window_len = 0usize;
        self.optimizer.zero_grad();

        for epoch in 0..self.config.num_epochs {
            let order = train_set.batch_indices(self.config.batch_size, Some(&mut self.rng));
            let mut epoch_loss = 0.0;
            let mut epoch_steps = 0usize;
            let mut micro_loss = 0.0;
            let mut micro_batches = 0usize;

            for (batch_idx, indices) in order.iter().enumerate() {
                let batch = train_set.collate(indices, device);
                micro_loss += self.accumulate_gradients(&batch)?;
                micro_batches += 1;
                if micro_batches < accumulation && batch_idx + 1 < order.len() {
                    continue;
                }

                let lr = self.learning_rate(step, total_steps);
                self.optimizer_step(lr)?;
                step += 1;
                epoch_steps += 1;

                let loss = micro_loss / micro_batches as f64;
                micro_loss = 0.0;
                micro_batches = 0;

                loss_sum += loss;
                epoch_loss += loss;
                window_sum += loss;
                window_len += 1;
                let epoch_progress = epoch as f64 + epoch_steps as f64 / steps_per_epoch as f64;

                if self.config.logging_steps > 0 && step % self.config.logging_steps == 0 {
                    let mean = window_sum / window_len as f64;
                    log::info!(
                        "Epoch {} | Step {}/{} | Loss: {:.4} | lr {:.2e}",
                        epoch,
                        step,
                        total_steps,
                        mean,
                        lr
                    );
                    self.state.log_history.push(LogEntry {
                        step,
                        epoch: epoch_progress,
                        loss: Some(mean),
                        learning_rate: Some(lr),
                        ..Default::default()
                    });
                    window_sum = 0.0;
                    window_len = 0;
                }

                if self.config.eval_steps > 0 && step % self.config.eval_steps == 0 {
                    self.evaluate_and_checkpoint(&val_set, step, epoch_progress)?;
                }
            }

            log::info!(
                "Epoch {} Average Loss: {:.4}",
                epoch,
                epoch_loss / epoch_steps.max(1) as f64
            );
            self.evaluate_and_checkpoint(&val_set, step, (epoch + 1) as f64)?;
        }

        if self.config.load_best_model_at_end {
            if let Some(best) = &self.state.best_model_checkpoint {
                log::info!("Loading best model from {:?}", best);
                self.artifact.load_weights(&best.join(WEIGHTS_FILE))?;
            }
        }

        let final_dir = self.config.final_model_dir();
        self.artifact.save(&final_dir)?;
        self.state.global_step = step;
        fs::write(
            self.config.output_dir.join("trainer_state.json"),
            serde_json::to_string_pretty(&self.state)?,
        )?;
        log::info!("Training complete, final model saved to {:?}", final_dir);

        Ok(TrainReport {
            train_loss: if step == 0 { 0.0 } else { loss_sum / step as f64 },
            best_val_loss: self.state.best_metric,
            global_step: step,
            model_dir: final_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use explain_core::ModelSource;

    fn pairs(n: usize) -> Vec<ErrorExplanationPair> {
        (0..n)
            .map(|i| {
                ErrorExplanationPair::new(
                    format!("error: 'x{}' was not declared in this scope", i),
                    format!("Declare x{} before using it.", i),
                    Default::default(),
                )
                .unwrap()
            })
            .collect()
    }

    fn tiny_config(output_dir: PathBuf) -> TrainingConfig {
        TrainingConfig {
            model_name: "seq2seq-tiny".to_string(),
            max_input_length: 64,
            max_target_length: 32,
            batch_size: 2,
            num_epochs: 1,
            output_dir,
            warmup_steps: 1,
            eval_steps: 0,
            logging_steps: 1,
            tokenizer_vocab_size: 300,
            tokenizer_min_frequency: 1,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_learning_rate_warmup_then_decay() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            warmup_steps: 4,
            learning_rate: 1.0,
            ..tiny_config(dir.path().to_path_buf())
        };
        let artifact = ModelArtifact::resolve("seq2seq-tiny", None, Device::Cpu).unwrap();
        let trainer = Trainer::new(artifact, config).unwrap();

        assert_eq!(trainer.learning_rate(0, 12), 0.0);
        assert!((trainer.learning_rate(3, 12) - 0.75).abs() < 1e-12);
        assert!((trainer.learning_rate(4, 12) - 1.0).abs() < 1e-12);
        assert!((trainer.learning_rate(8, 12) - 0.5).abs() < 1e-12);
        assert_eq!(trainer.learning_rate(12, 12), 0.0);
    }

    #[test]
    fn test_loss_skips_ignore_index() {
        let logits = Tensor::zeros([1, 2, 4], (tch::Kind::Float, Device::Cpu));
        let labels = Tensor::from_slice(&[1i64, IGNORE_INDEX]).view([1, 2]);
        let loss = seq2seq_loss(&logits, &labels).unwrap().double_value(&[]);
        assert!((loss - 4f64.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_empty_training_split_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path().to_path_buf());
        let artifact = prepare_artifact(&config, &[], Device::Cpu).unwrap();
        let mut trainer = Trainer::new(artifact, config).unwrap();
        let err = trainer.train(&[], &pairs(2)).unwrap_err();
        assert!(matches!(err, TrainError::EmptyTrainingSet));
    }

    #[test]
    fn test_zero_batch_size_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            batch_size: 0,
            ..tiny_config(dir.path().to_path_buf())
        };
        let artifact = ModelArtifact::resolve("seq2seq-tiny", None, Device::Cpu).unwrap();
        assert!(matches!(
            Trainer::new(artifact, config).err().unwrap(),
            TrainError::Configuration(_)
        ));
    }

    #[test]
    fn test_target_longer_than_decoder_mask_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            max_target_length: 1024,
            ..tiny_config(dir.path().to_path_buf())
        };
        let artifact = ModelArtifact::resolve("seq2seq-tiny", None, Device::Cpu).unwrap();
        assert!(artifact.config().max_seq_len < 1024);
        assert!(matches!(
            Trainer::new(artifact, config).err().unwrap(),
            TrainError::Configuration(_)
        ));
    }

    #[test]
    fn test_zero_accumulation_steps_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            gradient_accumulation_steps: 0,
            ..tiny_config(dir.path().to_path_buf())
        };
        assert!(matches!(config.validate(), Err(TrainError::Configuration(_))));
    }

    #[test]
    fn test_gradient_accumulation_counts_optimizer_steps() {
        let dir = tempfile::tempdir().unwrap();
        let train = pairs(8);

        let single = tiny_config(dir.path().join("single"));
        let artifact = prepare_artifact(&single, &train, Device::Cpu).unwrap();
        let report = Trainer::new(artifact, single).unwrap().train(&train, &[]).unwrap();
        assert_eq!(report.global_step, 4);

        let accumulated = TrainingConfig {
            gradient_accumulation_steps: 2,
            ..tiny_config(dir.path().join("accumulated"))
        };
        let artifact = prepare_artifact(&accumulated, &train, Device::Cpu).unwrap();
        let report = Trainer::new(artifact, accumulated.clone())
            .unwrap()
            .train(&train, &[])
            .unwrap();
        assert_eq!(report.global_step, 2);
        assert!(report.train_loss.is_finite() && report.train_loss > 0.0);

        let state: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(accumulated.output_dir.join("trainer_state.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(state["global_step"], 2);
    }

    #[test]
    fn test_train_writes_best_final_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path().join("run"));
        let train = pairs(6);

        let artifact = prepare_artifact(&config, &train, Device::Cpu).unwrap();
        assert!(artifact.tokenizer.vocab_size() > 260);
        let mut trainer = Trainer::new(artifact, config.clone()).unwrap();
        let report = trainer.train(&train, &pairs(2)).unwrap();

        assert_eq!(report.global_step, 3);
        assert!(report.train_loss.is_finite() && report.train_loss > 0.0);
        assert!(report.best_val_loss.is_some());
        assert_eq!(report.model_dir, config.final_model_dir());
        assert!(config.best_model_dir().join(WEIGHTS_FILE).is_file());
        assert!(config.output_dir.join("trainer_state.json").is_file());

        let reloaded = ModelArtifact::resolve(
            config.final_model_dir().to_str().unwrap(),
            None,
            Device::Cpu,
        )
        .unwrap();
        assert!(matches!(reloaded.source, ModelSource::Directory(_)));
        assert_eq!(reloaded.tokenizer.vocab_size(), trainer.artifact().tokenizer.vocab_size());
    }
}
