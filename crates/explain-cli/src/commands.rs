use anyhow::{Context, Result};
use corpus::{DatasetBuilder, SplitKind};
use inference::{CompilerErrorExplainer, Evaluator, RuleBasedExplainer};
use std::io;
use std::path::{Path, PathBuf};
use tch::Device;
use trainer::{prepare_artifact, Trainer};

use crate::cli::Command;
use crate::config::AppConfig;

pub fn dispatch(command: Command, config: &AppConfig) -> Result<()> {
    match command {
        Command::Preprocess => preprocess(config),
        Command::Train => train(config),
        Command::Evaluate { model_path } => evaluate(config, model_path.as_deref()),
        Command::Inference { model_path, error } => {
            inference(config, model_path.as_deref(), &error)
        }
        Command::Interactive { model_path } => interactive(config, model_path.as_deref()),
        Command::Baseline { rules, error } => baseline(config, &rules, error.as_deref()),
    }
}

fn preprocess(config: &AppConfig) -> Result<()> {
    tracing::info!("running data preprocessing");
    let summary = DatasetBuilder::new(&config.data)
        .build()
        .context("data preprocessing failed")?;
    println!(
        "Wrote {} pairs to {} (train {}, val {}, test {}; {} duplicates removed)",
        summary.total,
        summary.output_dir.display(),
        summary.train,
        summary.val,
        summary.test,
        summary.duplicates_removed
    );
    Ok(())
}

fn train(config: &AppConfig) -> Result<()> {
    tracing::info!("running model training");
    let builder = DatasetBuilder::new(&config.data);
    let train_split = builder
        .load(SplitKind::Train)
        .context("loading the train split, run --mode preprocess first")?;
    let val_split = builder
        .load(SplitKind::Val)
        .context("loading the validation split")?;

    let device = Device::cuda_if_available();
    tracing::info!(?device, "using device");

    let artifact = prepare_artifact(&config.training, &train_split, device)?;
    let mut trainer = Trainer::new(artifact, config.training.clone())?;
    let report = trainer.train(&train_split, &val_split)?;

    println!("Training complete after {} steps", report.global_step);
    println!("  train loss: {:.4}", report.train_loss);
    if let Some(val_loss) = report.best_val_loss {
        println!("  best validation loss: {:.4}", val_loss);
    }
    println!("  model saved to {}", report.model_dir.display());
    Ok(())
}

/// `--model-path` when it exists, otherwise the configured base model.
fn model_reference(config: &AppConfig, model_path: Option<&Path>) -> String {
    match model_path {
        Some(path) if path.exists() => path.display().to_string(),
        Some(path) => {
            tracing::warn!(
                path = %path.display(),
                base = %config.training.model_name,
                "model path does not exist, using base model"
            );
            config.training.model_name.clone()
        }
        None => config.training.model_name.clone(),
    }
}

fn load_explainer(config: &AppConfig, model_path: Option<&Path>) -> Result<CompilerErrorExplainer> {
    let model = model_reference(config, model_path);
    let explainer = CompilerErrorExplainer::load(
        &model,
        config.training.model_root.as_deref(),
        config.generation.clone(),
        Device::cuda_if_available(),
    )?;
    Ok(explainer)
}

fn evaluate(config: &AppConfig, model_path: Option<&Path>) -> Result<()> {
    tracing::info!("running model evaluation");
    let test_split = DatasetBuilder::new(&config.data)
        .load(SplitKind::Test)
        .context("loading the test split, run --mode preprocess first")?;

    let mut explainer = load_explainer(config, model_path)?;
    let results =
        Evaluator::new(&mut explainer, &config.training.output_dir).evaluate(&test_split)?;

    println!("Evaluation Results:");
    for (name, value) in results.metrics.entries() {
        println!("  {}: {:.4}", name, value);
    }
    Ok(())
}

fn inference(config: &AppConfig, model_path: Option<&Path>, error: &str) -> Result<()> {
    tracing::info!("running inference");
    let mut explainer = load_explainer(config, model_path)?;
    let explanation = explainer.explain(error)?;
    println!("\nError: {}", error);
    println!("Explanation: {}\n", explanation);
    Ok(())
}

fn interactive(config: &AppConfig, model_path: Option<&Path>) -> Result<()> {
    let mut explainer = load_explainer(config, model_path)?;
    let stdin = io::stdin();
    explainer.explain_interactive(stdin.lock(), io::stdout())?;
    Ok(())
}

fn baseline(config: &AppConfig, rules: &Path, error: Option<&str>) -> Result<()> {
    let mut explainer = RuleBasedExplainer::from_file(rules)?;

    if let Some(error) = error {
        println!("\nError: {}", error);
        println!("Explanation: {}\n", explainer.explain(error));
        return Ok(());
    }

    tracing::info!("evaluating rule-based baseline");
    let test_split = DatasetBuilder::new(&config.data)
        .load(SplitKind::Test)
        .context("loading the test split, run --mode preprocess first")?;
    let output_dir: PathBuf = config.training.output_dir.join("baseline");
    let results = Evaluator::new(&mut explainer, output_dir).evaluate(&test_split)?;

    println!("Baseline Results ({} rules):", explainer.len());
    for (name, value) in results.metrics.entries() {
        println!("  {}: {:.4}", name, value);
    }
    Ok(())
}
