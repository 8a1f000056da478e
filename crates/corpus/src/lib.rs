//! Raw corpus reading and train/val/test dataset preparation.

pub mod builder;
pub mod config;
pub mod error;
pub mod pair;
pub mod reader;
pub mod split;

pub use builder::{load_split, write_split, BuildSummary, DatasetBuilder};
pub use config::DataConfig;
pub use error::{CorpusError, Result};
pub use pair::{format_input, CompilerFamily, ErrorExplanationPair, INPUT_PREFIX};
pub use reader::{PairReader, RawCorpusReader};
pub use split::{split_pairs, DatasetSplit, DatasetSplits, SplitKind, SplitRatios};
