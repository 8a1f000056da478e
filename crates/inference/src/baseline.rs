use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::{Explain, InferenceError, Result};

pub const NO_MATCH_EXPLANATION: &str = "No matching rule found for this error.";

/// Keyword baseline: the first pattern, in sorted order, contained in the error
/// (case-insensitive) supplies the explanation.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedExplainer {
    rules: Vec<(String, String)>,
}

impl RuleBasedExplainer {
    pub fn new(rules: BTreeMap<String, String>) -> Self {
        let rules = rules
            .into_iter()
            .map(|(pattern, explanation)| (pattern.to_lowercase(), explanation))
            .collect();
        Self { rules }
    }

    /// Loads a JSON object of `pattern -> explanation`. A missing file gives no rules.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "rules file not found, every error will be unmatched"
            );
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let rules: BTreeMap<String, String> =
            serde_json::from_str(&text).map_err(|e| InferenceError::Rules {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        tracing::info!(rules = rules.len(), "loaded rules");
        Ok(Self::new(rules))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn explain(&self, error_message: &str) -> String {
        let error = error_message.to_lowercase();
        self.rules
            .iter()
            .find(|(pattern, _)| error.contains(pattern.as_str()))
            .map(|(_, explanation)| explanation.clone())
            .unwrap_or_else(|| NO_MATCH_EXPLANATION.to_string())
    }
}

impl Explain for RuleBasedExplainer {
    fn explain(&mut self, error_message: &str) -> Result<String> {
        Ok(RuleBasedExplainer::explain(self, error_message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleBasedExplainer {
        RuleBasedExplainer::new(BTreeMap::from([
            ("was not declared".to_string(), "Declare it first.".to_string()),
            ("Expected ';'".to_string(), "Add the missing semicolon.".to_string()),
        ]))
    }

    #[test]
    fn test_matches_case_insensitively() {
        let explainer = rules();
        assert_eq!(
            explainer.explain("error: EXPECTED ';' before '}' token"),
            "Add the missing semicolon."
        );
        assert_eq!(
            explainer.explain("error: 'printf' was not declared in this scope"),
            "Declare it first."
        );
    }

    #[test]
    fn test_sorted_order_breaks_ties() {
        let explainer = rules();
        // both patterns match; "expected ';'" sorts first
        assert_eq!(
            explainer.explain("expected ';' and x was not declared"),
            "Add the missing semicolon."
        );
    }

    #[test]
    fn test_no_match_default() {
        assert_eq!(rules().explain("linker failure"), NO_MATCH_EXPLANATION);
        assert_eq!(RuleBasedExplainer::default().explain("anything"), NO_MATCH_EXPLANATION);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        fs::write(&path, r#"{"segmentation fault": "Invalid memory access."}"#).unwrap();
        let explainer = RuleBasedExplainer::from_file(&path).unwrap();
        assert_eq!(explainer.len(), 1);
        assert_eq!(explainer.explain("Segmentation Fault (core dumped)"), "Invalid memory access.");

        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            RuleBasedExplainer::from_file(&path),
            Err(InferenceError::Rules { .. })
        ));

        assert!(RuleBasedExplainer::from_file(&dir.path().join("missing.json"))
            .unwrap()
            .is_empty());
    }
}
