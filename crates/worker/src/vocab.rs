//! Vocabulary table
//!
//! Immutable bidirectional mapping between symbols and token ids, loaded once
//! at worker startup. One symbol is reserved as the "unknown" placeholder that
//! stands in for any input character the table does not contain.

use quill_common::{QuillError, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Token identifier
pub type TokenId = u32;

/// Symbol <-> id table
#[derive(Debug, Clone)]
pub struct Vocabulary {
    symbol_to_id: HashMap<String, TokenId>,
    id_to_symbol: HashMap<TokenId, String>,
    unknown_id: TokenId,
    max_id: TokenId,
}

impl Vocabulary {
    /// Load a vocabulary from a JSON object of `"<id>": "<symbol>"` entries.
    ///
    /// UTF-8 and UTF-16 (with byte order mark) files are accepted.
    pub fn load<P: AsRef<Path>>(path: P, unknown_symbol: &str) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            QuillError::vocabulary(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let content = decode_text(&bytes)
            .ok_or_else(|| QuillError::vocabulary(format!("{} is not valid text", path.display())))?;

        let raw: HashMap<String, String> = serde_json::from_str(&content)?;
        let mut pairs = Vec::with_capacity(raw.len());
        for (id, symbol) in raw {
            let id = id
                .parse::<TokenId>()
                .map_err(|_| QuillError::vocabulary(format!("Invalid token id: {:?}", id)))?;
            pairs.push((id, symbol));
        }

        let vocab = Self::from_pairs(pairs, unknown_symbol)?;
        info!(
            "Vocabulary loaded from {}: {} symbols, unknown id {}",
            path.display(),
            vocab.len(),
            vocab.unknown_id
        );
        Ok(vocab)
    }

    /// Build a vocabulary from `(id, symbol)` pairs
    pub fn from_pairs<I, S>(pairs: I, unknown_symbol: &str) -> Result<Self>
    where
        I: IntoIterator<Item = (TokenId, S)>,
        S: Into<String>,
    {
        let mut symbol_to_id = HashMap::new();
        let mut id_to_symbol = HashMap::new();
        let mut max_id = 0;

        for (id, symbol) in pairs {
            let symbol = symbol.into();
            if symbol_to_id.insert(symbol.clone(), id).is_some() {
                return Err(QuillError::vocabulary(format!("Duplicate symbol {:?}", symbol)));
            }
            if id_to_symbol.insert(id, symbol).is_some() {
                return Err(QuillError::vocabulary(format!("Duplicate token id {}", id)));
            }
            max_id = max_id.max(id);
        }

        let unknown_id = *symbol_to_id.get(unknown_symbol).ok_or_else(|| {
            QuillError::vocabulary(format!("Unknown symbol {:?} is not in the table", unknown_symbol))
        })?;

        Ok(Self {
            symbol_to_id,
            id_to_symbol,
            unknown_id,
            max_id,
        })
    }

    /// Reserved id substituted for characters outside the table
    pub fn unknown_id(&self) -> TokenId {
        self.unknown_id
    }

    /// Number of symbols in the table
    pub fn len(&self) -> usize {
        self.id_to_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_symbol.is_empty()
    }

    /// Size of a logits vector able to address every id in the table
    pub fn logits_len(&self) -> usize {
        self.max_id as usize + 1
    }

    pub fn id_of(&self, symbol: &str) -> Option<TokenId> {
        self.symbol_to_id.get(symbol).copied()
    }

    pub fn symbol_of(&self, id: TokenId) -> Option<&str> {
        self.id_to_symbol.get(&id).map(String::as_str)
    }

    /// Map every character to its id, substituting the unknown id
    pub fn encode(&self, text: &str) -> Vec<TokenId> {
        let mut buf = [0u8; 4];
        text.chars()
            .map(|c| self.id_of(c.encode_utf8(&mut buf)).unwrap_or(self.unknown_id))
            .collect()
    }

    /// Concatenate the symbols of `ids`; ids without a symbol contribute nothing
    pub fn decode(&self, ids: &[TokenId]) -> String {
        ids.iter()
            .filter_map(|&id| self.symbol_of(id))
            .collect()
    }
}

/// Decode a UTF-8 or BOM-prefixed UTF-16 byte buffer
fn decode_text(bytes: &[u8]) -> Option<String> {
    let utf16 = |bytes: &[u8], from: fn([u8; 2]) -> u16| -> Option<String> {
        if bytes.len() % 2 != 0 {
            return None;
        }
        let units: Vec<u16> = bytes.chunks_exact(2).map(|c| from([c[0], c[1]])).collect();
        String::from_utf16(&units).ok()
    };

    match bytes {
        [0xff, 0xfe, rest @ ..] => utf16(rest, u16::from_le_bytes),
        [0xfe, 0xff, rest @ ..] => utf16(rest, u16::from_be_bytes),
        [0xef, 0xbb, 0xbf, rest @ ..] => String::from_utf8(rest.to_vec()).ok(),
        _ => String::from_utf8(bytes.to_vec()).ok(),
    }
}
