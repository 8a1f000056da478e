use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::split::{SplitKind, SplitRatios};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub raw_data_dir: PathBuf,
    /// File names under `raw_data_dir`, read in this order.
    pub raw_files: Vec<String>,
    pub processed_data_dir: PathBuf,
    pub max_samples: Option<usize>,
    pub train_split: f64,
    pub val_split: f64,
    pub test_split: f64,
    pub seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            raw_data_dir: PathBuf::from("data/raw"),
            raw_files: vec![
                "gcc_errors.txt".to_string(),
                "clang_errors.txt".to_string(),
                "explanations.txt".to_string(),
            ],
            processed_data_dir: PathBuf::from("data/processed"),
            max_samples: None,
            train_split: 0.8,
            val_split: 0.1,
            test_split: 0.1,
            seed: 42,
        }
    }
}

impl DataConfig {
    pub fn raw_paths(&self) -> Vec<PathBuf> {
        self.raw_files
            .iter()
            .map(|name| self.raw_data_dir.join(name))
            .collect()
    }

    pub fn ratios(&self) -> SplitRatios {
        SplitRatios {
            train: self.train_split,
            val: self.val_split,
            test: self.test_split,
        }
    }

    pub fn split_path(&self, kind: SplitKind) -> PathBuf {
        self.processed_data_dir.join(kind.file_name())
    }
}
