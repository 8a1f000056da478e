use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::DataConfig;
use crate::error::{CorpusError, Result};
use crate::pair::ErrorExplanationPair;
use crate::reader::RawCorpusReader;
use crate::split::{split_pairs, DatasetSplits, SplitKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub total: usize,
    pub duplicates_removed: usize,
    pub train: usize,
    pub val: usize,
    pub test: usize,
    pub output_dir: PathBuf,
}

/// Turns raw alternating-line files into `train.json`, `val.json` and `test.json`.
pub struct DatasetBuilder<'a> {
    config: &'a DataConfig,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(config: &'a DataConfig) -> Self {
        Self { config }
    }

    pub fn build(&self) -> Result<BuildSummary> {
        tracing::info!("starting data preprocessing");
        let reader = RawCorpusReader::from_config(self.config);
        let pairs = reader.read_all()?;
        if pairs.is_empty() {
            tracing::warn!(
                dir = %self.config.raw_data_dir.display(),
                "no raw data found, add data files to the raw data directory"
            );
        }
        self.build_from_pairs(pairs)
    }

    /// Cleans, deduplicates, limits, splits and writes. Existing split files are overwritten.
    pub fn build_from_pairs(&self, pairs: Vec<ErrorExplanationPair>) -> Result<BuildSummary> {
        // Check ratios before touching the filesystem.
        self.config.ratios().validate()?;

        let (mut pairs, duplicates_removed) = clean_and_dedup(pairs);
        if duplicates_removed > 0 {
            tracing::info!(duplicates_removed, "removed duplicate pairs");
        }

        if let Some(max) = self.config.max_samples {
            if pairs.len() > max {
                pairs.truncate(max);
                tracing::info!(max_samples = max, "limited sample count");
            }
        }

        if pairs.is_empty() {
            return Err(CorpusError::Configuration(
                "no error-explanation pairs to split".to_string(),
            ));
        }

        let total = pairs.len();
        let splits = split_pairs(pairs, self.config.ratios(), self.config.seed)?;
        self.write_splits(&splits)?;

        tracing::info!("data preprocessing completed");
        Ok(BuildSummary {
            total,
            duplicates_removed,
            train: splits.train.len(),
            val: splits.val.len(),
            test: splits.test.len(),
            output_dir: self.config.processed_data_dir.clone(),
        })
    }

    fn write_splits(&self, splits: &DatasetSplits) -> Result<()> {
        let dir = &self.config.processed_data_dir;
        fs::create_dir_all(dir).map_err(|e| CorpusError::io(dir, e))?;
        for split in splits.iter() {
            let path = self.config.split_path(split.kind);
            write_split(&path, &split.records)?;
            tracing::info!(split = %split.kind, path = %path.display(), "saved split");
        }
        Ok(())
    }

    pub fn load(&self, kind: SplitKind) -> Result<Vec<ErrorExplanationPair>> {
        load_split(&self.config.split_path(kind))
    }
}

fn clean_and_dedup(pairs: Vec<ErrorExplanationPair>) -> (Vec<ErrorExplanationPair>, usize) {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut kept = Vec::with_capacity(pairs.len());
    let mut removed = 0;
    for pair in pairs.into_iter().map(ErrorExplanationPair::cleaned) {
        let key = (pair.error_text.clone(), pair.explanation_text.clone());
        if seen.insert(key) {
            kept.push(pair);
        } else {
            removed += 1;
        }
    }
    (kept, removed)
}

pub fn write_split(path: &Path, records: &[ErrorExplanationPair]) -> Result<()> {
    let file = File::create(path).map_err(|e| CorpusError::io(path, e))?;
    write_records(file, path, records)
}

fn write_records<W: Write>(inner: W, path: &Path, records: &[ErrorExplanationPair]) -> Result<()> {
    let mut writer = BufWriter::new(inner);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.flush().map_err(|e| CorpusError::io(path, e))
}

pub fn load_split(path: &Path) -> Result<Vec<ErrorExplanationPair>> {
    let file = File::open(path).map_err(|e| CorpusError::io(path, e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC_EXAMPLE: &str = "\
error: 'printf' was not declared in this scope
You are calling printf without including <stdio.h>; add #include <stdio.h> at the top of the file.
error: expected ';' before '}' token
A statement is missing its terminating semicolon; add ';' at the end of the previous line.
";

    fn config_in(dir: &Path) -> DataConfig {
        DataConfig {
            raw_data_dir: dir.join("raw"),
            processed_data_dir: dir.join("processed"),
            ..DataConfig::default()
        }
    }

    #[test]
    fn test_documented_pairs_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig {
            train_split: 0.5,
            val_split: 0.25,
            test_split: 0.25,
            seed: 42,
            ..config_in(dir.path())
        };
        fs::create_dir_all(&config.raw_data_dir).unwrap();
        fs::write(config.raw_data_dir.join("gcc_errors.txt"), DOC_EXAMPLE).unwrap();

        let builder = DatasetBuilder::new(&config);
        let summary = builder.build().unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.train, 1);
        assert!(summary.val <= 1 && summary.test <= 1);
        assert_eq!(summary.train + summary.val + summary.test, 2);

        let train = builder.load(SplitKind::Train).unwrap();
        let val = builder.load(SplitKind::Val).unwrap();
        let test = builder.load(SplitKind::Test).unwrap();
        assert_eq!(train.len(), 1);
        assert_eq!(train.len() + val.len() + test.len(), 2);
        assert_ne!(train[0], test.first().or(val.first()).unwrap().clone());
    }

    #[test]
    fn test_rebuild_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let pairs: Vec<_> = (0..40)
            .map(|i| {
                ErrorExplanationPair::new(
                    format!("error: e{}", i),
                    format!("x{}", i),
                    Default::default(),
                )
                .unwrap()
            })
            .collect();

        let builder = DatasetBuilder::new(&config);
        builder.build_from_pairs(pairs.clone()).unwrap();
        let first: Vec<_> = SplitKind::ALL.iter().map(|k| builder.load(*k).unwrap()).collect();
        builder.build_from_pairs(pairs).unwrap();
        let second: Vec<_> = SplitKind::ALL.iter().map(|k| builder.load(*k).unwrap()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_input_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let err = DatasetBuilder::new(&config).build().unwrap_err();
        assert!(matches!(err, CorpusError::Configuration(_)));
        assert!(!config.processed_data_dir.exists());
    }

    #[test]
    fn test_bad_ratios_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig {
            train_split: 0.9,
            ..config_in(dir.path())
        };
        let pair = ErrorExplanationPair::new("e", "x", Default::default()).unwrap();
        let err = DatasetBuilder::new(&config)
            .build_from_pairs(vec![pair])
            .unwrap_err();
        assert!(matches!(err, CorpusError::Configuration(_)));
    }

    #[test]
    fn test_duplicates_and_whitespace_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig {
            train_split: 1.0,
            val_split: 0.0,
            test_split: 0.0,
            ..config_in(dir.path())
        };
        let pairs = vec![
            ErrorExplanationPair::new("error:  x", "why", Default::default()).unwrap(),
            ErrorExplanationPair::new("error: x", "why", Default::default()).unwrap(),
            ErrorExplanationPair::new("error: y", "why", Default::default()).unwrap(),
        ];
        let summary = DatasetBuilder::new(&config).build_from_pairs(pairs).unwrap();
        assert_eq!(summary.duplicates_removed, 1);
        assert_eq!(summary.train, 2);
    }

    #[test]
    fn test_max_samples_limits_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig {
            max_samples: Some(5),
            ..config_in(dir.path())
        };
        let pairs: Vec<_> = (0..20)
            .map(|i| ErrorExplanationPair::new(format!("e{}", i), "x", Default::default()).unwrap())
            .collect();
        let summary = DatasetBuilder::new(&config).build_from_pairs(pairs).unwrap();
        assert_eq!(summary.total, 5);
    }

    #[test]
    fn test_existing_files_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        fs::create_dir_all(&config.processed_data_dir).unwrap();
        fs::write(config.split_path(SplitKind::Train), "not json").unwrap();

        let pairs: Vec<_> = (0..10)
            .map(|i| ErrorExplanationPair::new(format!("e{}", i), "x", Default::default()).unwrap())
            .collect();
        let builder = DatasetBuilder::new(&config);
        builder.build_from_pairs(pairs).unwrap();
        assert_eq!(builder.load(SplitKind::Train).unwrap().len(), 8);
    }

    /// Accepts nothing, as on a full disk.
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_split_reports_failed_final_flush() {
        let records = vec![ErrorExplanationPair::new(
            "error: a".to_string(),
            "explain a".to_string(),
            Default::default(),
        )
        .unwrap()];
        let err = write_records(FullDisk, Path::new("train.json"), &records).unwrap_err();
        assert!(matches!(err, CorpusError::Io { .. }));
    }
}
