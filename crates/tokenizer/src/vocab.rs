use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";
pub const BOS_TOKEN: &str = "<s>";
pub const EOS_TOKEN: &str = "</s>";

/// Special tokens in id order. Every vocabulary built by this crate starts with them.
pub const SPECIAL_TOKENS: [&str; 4] = [PAD_TOKEN, UNK_TOKEN, BOS_TOKEN, EOS_TOKEN];

/// Bidirectional token <-> id table.
///
/// Only `token_to_id` is serialized; the reverse map is rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "HashMap<String, u32>", into = "HashMap<String, u32>")]
pub struct Vocab {
    pub token_to_id: HashMap<String, u32>,
    pub id_to_token: HashMap<u32, String>,
}

impl From<HashMap<String, u32>> for Vocab {
    fn from(token_to_id: HashMap<String, u32>) -> Self {
        let id_to_token = token_to_id
            .iter()
            .map(|(token, id)| (*id, token.clone()))
            .collect();
        Self {
            token_to_id,
            id_to_token,
        }
    }
}

impl From<Vocab> for HashMap<String, u32> {
    fn from(vocab: Vocab) -> Self {
        vocab.token_to_id
    }
}

impl Vocab {
    pub fn new() -> Self {
        Self {
            token_to_id: HashMap::new(),
            id_to_token: HashMap::new(),
        }
    }

    /// Special tokens followed by the 256 `<0xNN>` byte tokens.
    pub fn byte_level() -> Self {
        let mut vocab = Self::new();
        for token in SPECIAL_TOKENS {
            vocab.push(token.to_string());
        }
        for byte in 0..=255u8 {
            vocab.push(byte_token(byte));
        }
        vocab
    }

    pub fn insert(&mut self, token: String, id: u32) {
        self.token_to_id.insert(token.clone(), id);
        self.id_to_token.insert(id, token);
    }

    /// Appends `token` with the next free id unless it is already present.
    pub fn push(&mut self, token: String) -> u32 {
        if let Some(id) = self.get_id(&token) {
            return id;
        }
        let id = self.len() as u32;
        self.insert(token, id);
        id
    }

    pub fn get_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn get_token(&self, id: u32) -> Option<&String> {
        self.id_to_token.get(&id)
    }

    pub fn is_special(&self, id: u32) -> bool {
        self.get_token(id)
            .map_or(false, |t| SPECIAL_TOKENS.contains(&t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }

}

impl Default for Vocab {
    fn default() -> Self {
        Self::new()
    }
}

pub fn byte_token(byte: u8) -> String {
    format!("<0x{:02X}>", byte)
}

/// Inverse of [`byte_token`].
pub fn parse_byte_token(token: &str) -> Option<u8> {
    let hex = token.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}
