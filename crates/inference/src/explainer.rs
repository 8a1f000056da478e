use corpus::format_input;
use explain_core::ModelArtifact;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::{BufRead, Write};
use std::path::Path;
use tch::Device;

use crate::config::GenerationConfig;
use crate::generator::Generator;
use crate::{Explain, Result};

const EXIT_COMMANDS: [&str; 3] = ["quit", "exit", "q"];

/// Explains one compiler error at a time with a loaded model.
pub struct CompilerErrorExplainer {
    artifact: ModelArtifact,
    generation: GenerationConfig,
    rng: StdRng,
}

impl CompilerErrorExplainer {
    pub fn new(artifact: ModelArtifact, generation: GenerationConfig) -> Self {
        let rng = generation
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            artifact,
            generation,
            rng,
        }
    }

    /// Resolves `model` as a saved directory, a name under `model_root`, or a preset.
    pub fn load(
        model: &str,
        model_root: Option<&Path>,
        generation: GenerationConfig,
        device: Device,
    ) -> Result<Self> {
        let artifact = ModelArtifact::resolve(model, model_root, device)?;
        tracing::info!(source = ?artifact.source, "model loaded and ready for inference");
        Ok(Self::new(artifact, generation))
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn explain(&mut self, error_message: &str) -> Result<String> {
        let tokenizer = &self.artifact.tokenizer;
        let input_ids: Vec<i64> = tokenizer
            .encode_with_eos(&format_input(error_message), self.generation.max_input_length)
            .into_iter()
            .map(i64::from)
            .collect();

        let output = Generator::new(&self.artifact, &self.generation)
            .generate(&input_ids, &mut self.rng)?;
        let output: Vec<u32> = output.into_iter().map(|id| id as u32).collect();
        Ok(tokenizer.decode(&output))
    }

    /// Reads one error per line and writes its explanation, until EOF or an exit
    /// command. Returns how many errors were explained.
    pub fn explain_interactive<R: BufRead, W: Write>(
        &mut self,
        input: R,
        mut output: W,
    ) -> Result<usize> {
        writeln!(output, "{}", "=".repeat(60))?;
        writeln!(output, "Compiler Error Explanation System - Interactive Demo")?;
        writeln!(output, "{}", "=".repeat(60))?;
        writeln!(output, "Enter compiler error messages to get explanations.")?;
        writeln!(output, "Type 'quit' or 'exit' to stop.\n")?;

        let mut answered = 0;
        let mut lines = input.lines();
        loop {
            write!(output, "Compiler Error: ")?;
            output.flush()?;

            let Some(line) = lines.next() else {
                break;
            };
            let error = line?;
            let error = error.trim();

            if EXIT_COMMANDS.contains(&error.to_lowercase().as_str()) {
                break;
            }
            if error.is_empty() {
                continue;
            }

            match self.explain(error) {
                Ok(explanation) => {
                    writeln!(output, "\nExplanation: {}\n", explanation)?;
                    writeln!(output, "{}\n", "-".repeat(60))?;
                    answered += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "explanation failed");
                    writeln!(output, "An error occurred: {}\n", e)?;
                }
            }
        }

        writeln!(output, "Goodbye!")?;
        Ok(answered)
    }
}

impl Explain for CompilerErrorExplainer {
    fn explain(&mut self, error_message: &str) -> Result<String> {
        CompilerErrorExplainer::explain(self, error_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_explainer(generation: GenerationConfig) -> CompilerErrorExplainer {
        CompilerErrorExplainer::load("seq2seq-tiny", None, generation, Device::Cpu).unwrap()
    }

    fn short_generation() -> GenerationConfig {
        GenerationConfig {
            max_output_length: 12,
            seed: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_untrained_model_gives_non_empty_explanation() {
        let mut explainer = tiny_explainer(short_generation());
        let explanation = explainer.explain("error: segmentation fault").unwrap();
        assert!(!explanation.is_empty());
    }

    #[test]
    fn test_empty_and_huge_inputs_still_answer() {
        let mut explainer = tiny_explainer(GenerationConfig {
            num_beams: 1,
            max_input_length: 32,
            ..short_generation()
        });
        assert!(!explainer.explain("").unwrap().is_empty());
        assert!(!explainer.explain(&"x".repeat(10_000)).unwrap().is_empty());
    }

    #[test]
    fn test_interactive_stops_on_quit() {
        let mut explainer = tiny_explainer(GenerationConfig {
            num_beams: 1,
            ..short_generation()
        });
        let input = "error: expected ';'\n\n   \nQUIT\nerror: never read\n";
        let mut output = Vec::new();
        let answered = explainer.explain_interactive(input.as_bytes(), &mut output).unwrap();

        assert_eq!(answered, 1);
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.matches("Explanation: ").count(), 1);
        assert!(text.trim_end().ends_with("Goodbye!"));
    }

    #[test]
    fn test_unknown_model_fails_to_load() {
        let err =
            CompilerErrorExplainer::load("missing-model", None, short_generation(), Device::Cpu)
                .err()
                .unwrap();
        assert!(matches!(
            err,
            crate::InferenceError::Model(explain_core::ModelError::Load { .. })
        ));
    }
}
