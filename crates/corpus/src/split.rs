use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{CorpusError, Result};
use crate::pair::ErrorExplanationPair;

const RATIO_TOLERANCE: f64 = 1e-6;
// Absorbs products like 10 * 0.7 = 7.000000000000001 and 100 * 0.29 = 28.999999999999996.
const FLOOR_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitKind {
    Train,
    Val,
    Test,
}

impl SplitKind {
    pub const ALL: [SplitKind; 3] = [SplitKind::Train, SplitKind::Val, SplitKind::Test];

    pub fn file_name(self) -> &'static str {
        match self {
            SplitKind::Train => "train.json",
            SplitKind::Val => "val.json",
            SplitKind::Test => "test.json",
        }
    }
}

impl std::fmt::Display for SplitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SplitKind::Train => "train",
            SplitKind::Val => "val",
            SplitKind::Test => "test",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl SplitRatios {
    pub fn validate(&self) -> Result<()> {
        for (name, ratio) in [("train", self.train), ("val", self.val), ("test", self.test)] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(CorpusError::Configuration(format!(
                    "{} split ratio {} is outside [0, 1]",
                    name, ratio
                )));
            }
        }
        let sum = self.train + self.val + self.test;
        if (sum - 1.0).abs() > RATIO_TOLERANCE {
            return Err(CorpusError::Configuration(format!(
                "split ratios must sum to 1, got {:.6}",
                sum
            )));
        }
        Ok(())
    }

    /// (train, val, test) sizes for `n` items. Test takes the remainder.
    pub fn sizes(&self, n: usize) -> (usize, usize, usize) {
        let floor = |ratio: f64| ((n as f64) * ratio + FLOOR_EPSILON).floor() as usize;
        let train = floor(self.train).min(n);
        let val = floor(self.val).min(n - train);
        (train, val, n - train - val)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplit {
    pub kind: SplitKind,
    pub records: Vec<ErrorExplanationPair>,
}

impl DatasetSplit {
    pub fn new(kind: SplitKind, records: Vec<ErrorExplanationPair>) -> Self {
        Self { kind, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplits {
    pub train: DatasetSplit,
    pub val: DatasetSplit,
    pub test: DatasetSplit,
}

impl DatasetSplits {
    pub fn iter(&self) -> impl Iterator<Item = &DatasetSplit> {
        [&self.train, &self.val, &self.test].into_iter()
    }
}

/// Shuffles with a seeded RNG and cuts into three disjoint partitions.
///
/// Same input, ratios and seed always give the same membership.
pub fn split_pairs(
    mut pairs: Vec<ErrorExplanationPair>,
    ratios: SplitRatios,
    seed: u64,
) -> Result<DatasetSplits> {
    ratios.validate()?;

    let mut rng = StdRng::seed_from_u64(seed);
    pairs.shuffle(&mut rng);

    let (train_len, val_len, _) = ratios.sizes(pairs.len());
    let mut val = pairs.split_off(train_len);
    let test = val.split_off(val_len);

    tracing::info!(
        train = pairs.len(),
        val = val.len(),
        test = test.len(),
        "split data"
    );

    Ok(DatasetSplits {
        train: DatasetSplit::new(SplitKind::Train, pairs),
        val: DatasetSplit::new(SplitKind::Val, val),
        test: DatasetSplit::new(SplitKind::Test, test),
    })
}
