use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::OnceLock;

use crate::error::Result;
use crate::vocab::{
    byte_token, parse_byte_token, Vocab, BOS_TOKEN, EOS_TOKEN, PAD_TOKEN, SPECIAL_TOKENS,
    UNK_TOKEN,
};

const PRETOKENIZE_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+";

pub(crate) fn pretokenizer() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(PRETOKENIZE_PATTERN).expect("pre-tokenizer pattern is valid"))
}

/// Byte-fallback BPE tokenizer.
///
/// Pieces missing from the vocabulary are encoded as `<0xNN>` byte tokens, so any
/// UTF-8 input round-trips through `encode`/`decode`.
#[derive(Clone, Serialize, Deserialize)]
pub struct BPE {
    pub vocab: Vocab,
    #[serde(with = "merge_table")]
    pub merges: HashMap<(String, String), u32>,
}

impl std::fmt::Debug for BPE {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPE")
            .field("vocab_size", &self.vocab.len())
            .field("merges_count", &self.merges.len())
            .finish()
    }
}

impl BPE {
    pub fn new(vocab: Vocab, merges: HashMap<(String, String), u32>) -> Self {
        Self { vocab, merges }
    }

    /// Tokenizer with no merges: every character is spelled out in bytes.
    /// Used for untrained base models.
    pub fn byte_level() -> Self {
        Self::new(Vocab::byte_level(), HashMap::new())
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn special_id(&self, token: &str) -> u32 {
        self.vocab.get_id(token).unwrap_or_else(|| {
            SPECIAL_TOKENS
                .iter()
                .position(|t| *t == token)
                .unwrap_or(0) as u32
        })
    }

    pub fn pad_id(&self) -> u32 {
        self.special_id(PAD_TOKEN)
    }

    pub fn unk_id(&self) -> u32 {
        self.special_id(UNK_TOKEN)
    }

    pub fn bos_id(&self) -> u32 {
        self.special_id(BOS_TOKEN)
    }

    pub fn eos_id(&self) -> u32 {
        self.special_id(EOS_TOKEN)
    }

    fn get_pairs(word: &[String]) -> HashSet<(String, String)> {
        let mut pairs = HashSet::new();
        if word.len() < 2 {
            return pairs;
        }
        for i in 0..word.len() - 1 {
            pairs.insert((word[i].clone(), word[i + 1].clone()));
        }
        pairs
    }

    fn bpe(&self, token: &str) -> Vec<String> {
        let mut word: Vec<String> = token.chars().map(|c| c.to_string()).collect();

        loop {
            let best = Self::get_pairs(&word)
                .into_iter()
                .filter_map(|pair| self.merges.get(&pair).map(|&rank| (rank, pair)))
                .min_by_key(|(rank, _)| *rank);

            let Some((_, (first, second))) = best else {
                break;
            };

            let mut merged = Vec::with_capacity(word.len());
            let mut i = 0;
            while i < word.len() {
                if i + 1 < word.len() && word[i] == first && word[i + 1] == second {
                    merged.push(format!("{}{}", first, second));
                    i += 2;
                } else {
                    merged.push(word[i].clone());
                    i += 1;
                }
            }

            word = merged;
            if word.len() == 1 {
                break;
            }
        }

        word
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        let mut ids = Vec::new();
        for mat in pretokenizer().find_iter(text) {
            for piece in self.bpe(mat.as_str()) {
                if let Some(id) = self.vocab.get_id(&piece) {
                    ids.push(id);
                    continue;
                }
                for byte in piece.bytes() {
                    match self.vocab.get_id(&byte_token(byte)) {
                        Some(id) => ids.push(id),
                        None => ids.push(self.unk_id()),
                    }
                }
            }
        }
        ids
    }

    /// Encodes and keeps the first `max_tokens` ids.
    pub fn encode_with_max_tokens(&self, text: &str, max_tokens: usize) -> Vec<u32> {
        let mut ids = self.encode(text);
        ids.truncate(max_tokens);
        ids
    }

    /// Model-ready sequence: at most `max_len - 1` text ids followed by `</s>`.
    pub fn encode_with_eos(&self, text: &str, max_len: usize) -> Vec<u32> {
        let mut ids = self.encode_with_max_tokens(text, max_len.saturating_sub(1));
        ids.push(self.eos_id());
        ids
    }

    /// Decodes ids to text, dropping special tokens and reassembling byte tokens.
    pub fn decode(&self, ids: &[u32]) -> String {
        let mut text = String::new();
        let mut pending_bytes: Vec<u8> = Vec::new();

        for &id in ids {
            if self.vocab.is_special(id) {
                continue;
            }
            let Some(token) = self.vocab.get_token(id) else {
                continue;
            };
            if let Some(byte) = parse_byte_token(token) {
                pending_bytes.push(byte);
                continue;
            }
            if !pending_bytes.is_empty() {
                text.push_str(&String::from_utf8_lossy(&pending_bytes));
                pending_bytes.clear();
            }
            text.push_str(token);
        }
        if !pending_bytes.is_empty() {
            text.push_str(&String::from_utf8_lossy(&pending_bytes));
        }
        text
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_json(File::create(path)?)
    }

    fn write_json<W: Write>(&self, inner: W) -> Result<()> {
        let mut writer = BufWriter::new(inner);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }
}

/// Merges are stored as a rank-ordered list of pairs; JSON has no tuple keys.
mod merge_table {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        merges: &HashMap<(String, String), u32>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut ranked: Vec<_> = merges.iter().collect();
        ranked.sort_by_key(|&(_, rank)| *rank);
        let pairs: Vec<&(String, String)> = ranked.into_iter().map(|(pair, _)| pair).collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<(String, String), u32>, D::Error> {
        let pairs = Vec::<(String, String)>::deserialize(deserializer)?;
        Ok(pairs
            .into_iter()
            .enumerate()
            .map(|(rank, pair)| (pair, rank as u32))
            .collect())
    }
}
