use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Build train/val/test splits from the raw error files
    Preprocess,
    /// Fine-tune the configured model
    Train,
    /// Score a model on the test split
    Evaluate,
    /// Explain a single error given with --error
    Inference,
    /// Read errors from stdin and explain each one
    Interactive,
    /// Keyword-rule baseline: explain --error, or score the test split
    Baseline,
}

#[derive(Debug, Parser)]
#[command(
    name = "compiler-explain",
    author,
    version,
    about = "Compiler error explanation system",
    long_about = None
)]
pub struct Cli {
    /// Mode to run
    #[arg(long, value_enum)]
    pub mode: Mode,

    /// Path to a trained model directory (evaluate, inference, interactive)
    #[arg(long)]
    pub model_path: Option<PathBuf>,

    /// Compiler error message to explain
    #[arg(long, required_if_eq("mode", "inference"))]
    pub error: Option<String>,

    /// YAML configuration file
    #[arg(long, default_value = "configs/config.yaml")]
    pub config: PathBuf,

    /// JSON rules file for the baseline
    #[arg(long, default_value = "configs/rules.json")]
    pub rules: PathBuf,
}

/// One variant per mode, carrying only what that mode reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Preprocess,
    Train,
    Evaluate {
        model_path: Option<PathBuf>,
    },
    Inference {
        model_path: Option<PathBuf>,
        error: String,
    },
    Interactive {
        model_path: Option<PathBuf>,
    },
    Baseline {
        rules: PathBuf,
        error: Option<String>,
    },
}

impl TryFrom<Cli> for Command {
    type Error = clap::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        Ok(match cli.mode {
            Mode::Preprocess => Command::Preprocess,
            Mode::Train => Command::Train,
            Mode::Evaluate => Command::Evaluate {
                model_path: cli.model_path,
            },
            Mode::Inference => {
                let error = cli.error.ok_or_else(|| {
                    clap::Error::raw(
                        ErrorKind::MissingRequiredArgument,
                        "--error is required in inference mode\n",
                    )
                })?;
                Command::Inference {
                    model_path: cli.model_path,
                    error,
                }
            }
            Mode::Interactive => Command::Interactive {
                model_path: cli.model_path,
            },
            Mode::Baseline => Command::Baseline {
                rules: cli.rules,
                error: cli.error,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        let argv = std::iter::once("compiler-explain").chain(args.iter().copied());
        Command::try_from(Cli::try_parse_from(argv)?)
    }

    #[test]
    fn test_inference_without_error_is_usage_error() {
        let err = parse(&["--mode", "inference"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_inference_with_error() {
        let command =
            parse(&["--mode", "inference", "--error", "error: segmentation fault"]).unwrap();
        assert_eq!(
            command,
            Command::Inference {
                model_path: None,
                error: "error: segmentation fault".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let err = parse(&["--mode", "serve"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_mode_is_required() {
        let err = parse(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_other_modes_do_not_need_error() {
        assert_eq!(parse(&["--mode", "train"]).unwrap(), Command::Train);
        assert_eq!(
            parse(&["--mode", "evaluate", "--model-path", "experiments/x/final_model"]).unwrap(),
            Command::Evaluate {
                model_path: Some(PathBuf::from("experiments/x/final_model")),
            }
        );
        assert_eq!(
            parse(&["--mode", "baseline"]).unwrap(),
            Command::Baseline {
                rules: PathBuf::from("configs/rules.json"),
                error: None,
            }
        );
    }
}
