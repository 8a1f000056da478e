pub mod bpe;
pub mod error;
pub mod trainer;
pub mod vocab;

pub use bpe::BPE;
pub use error::{Result, TokenizerError};
pub use trainer::Trainer;
pub use vocab::{Vocab, BOS_TOKEN, EOS_TOKEN, PAD_TOKEN, SPECIAL_TOKENS, UNK_TOKEN};
