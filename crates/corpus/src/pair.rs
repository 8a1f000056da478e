use serde::{Deserialize, Serialize};
use std::path::Path;

/// Instruction prefix put in front of every error message fed to the model.
pub const INPUT_PREFIX: &str = "explain compiler error: ";

pub fn format_input(error_text: &str) -> String {
    format!("{}{}", INPUT_PREFIX, error_text)
}

/// Which toolchain produced the error. Derived from the raw file name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerFamily {
    Gcc,
    Clang,
    #[default]
    Generic,
}

impl CompilerFamily {
    pub fn from_path(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if stem.starts_with("gcc") {
            Self::Gcc
        } else if stem.starts_with("clang") {
            Self::Clang
        } else {
            Self::Generic
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorExplanationPair {
    pub error_text: String,
    pub explanation_text: String,
    #[serde(default)]
    pub compiler: CompilerFamily,
}

impl ErrorExplanationPair {
    /// Builds a pair from raw lines. Both sides must be non-empty after trimming.
    pub fn new(
        error_text: impl Into<String>,
        explanation_text: impl Into<String>,
        compiler: CompilerFamily,
    ) -> std::result::Result<Self, &'static str> {
        let error_text = error_text.into().trim().to_string();
        let explanation_text = explanation_text.into().trim().to_string();
        if error_text.is_empty() {
            return Err("empty error text");
        }
        if explanation_text.is_empty() {
            return Err("empty explanation text");
        }
        Ok(Self {
            error_text,
            explanation_text,
            compiler,
        })
    }

    /// Model input: prefix + error text.
    pub fn input_text(&self) -> String {
        format_input(&self.error_text)
    }

    /// Collapses whitespace runs in both fields into single spaces.
    pub fn cleaned(self) -> Self {
        Self {
            error_text: collapse_whitespace(&self.error_text),
            explanation_text: collapse_whitespace(&self.explanation_text),
            compiler: self.compiler,
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_and_rejects_empty() {
        let pair = ErrorExplanationPair::new("  error: x  ", "why\t", CompilerFamily::Gcc).unwrap();
        assert_eq!(pair.error_text, "error: x");
        assert_eq!(pair.explanation_text, "why");
        assert!(ErrorExplanationPair::new("   ", "why", CompilerFamily::Gcc).is_err());
        assert!(ErrorExplanationPair::new("error", "", CompilerFamily::Gcc).is_err());
    }

    #[test]
    fn test_input_text_has_prefix() {
        let pair =
            ErrorExplanationPair::new("error: segmentation fault", "x", CompilerFamily::Generic)
                .unwrap();
        assert_eq!(
            pair.input_text(),
            "explain compiler error: error: segmentation fault"
        );
    }

    #[test]
    fn test_cleaned_collapses_whitespace() {
        let pair =
            ErrorExplanationPair::new("error:   expected\t';'", "add  it", CompilerFamily::Clang)
                .unwrap()
                .cleaned();
        assert_eq!(pair.error_text, "error: expected ';'");
        assert_eq!(pair.explanation_text, "add it");
    }

    #[test]
    fn test_compiler_from_path() {
        let family = |name: &str| CompilerFamily::from_path(Path::new(name));
        assert_eq!(family("raw/gcc_errors.txt"), CompilerFamily::Gcc);
        assert_eq!(family("Clang_errors.txt"), CompilerFamily::Clang);
        assert_eq!(family("explanations.txt"), CompilerFamily::Generic);
    }

    #[test]
    fn test_compiler_defaults_when_missing_from_json() {
        let pair: ErrorExplanationPair =
            serde_json::from_str(r#"{"error_text":"e","explanation_text":"x"}"#).unwrap();
        assert_eq!(pair.compiler, CompilerFamily::Generic);
    }
}
