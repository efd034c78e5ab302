//! Fixed-length tokenization: every text becomes exactly `max_length` ids,
//! truncated or padded, with a matching attention mask.

use std::path::Path;

use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::info;

pub const TOKENIZER_FILE: &str = "tokenizer.json";

const DEFAULT_PAD_TOKEN: &str = "[PAD]";

/// Token ids and attention mask for one text, both `max_length` long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedText {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

#[derive(Clone)]
pub struct FixedLengthTokenizer {
    inner: Tokenizer,
    max_length: usize,
}

impl FixedLengthTokenizer {
    /// Load `tokenizer.json` from a model directory.
    pub fn from_dir(dir: &Path, max_length: usize) -> anyhow::Result<Self> {
        let path = dir.join(TOKENIZER_FILE);
        anyhow::ensure!(path.exists(), "tokenizer.json not found in {dir:?}");
        let inner =
            Tokenizer::from_file(&path).map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        let tokenizer = Self::configure(inner, max_length)?;
        info!(max_length, tokenizer = %path.display(), "loaded tokenizer");
        Ok(tokenizer)
    }

    /// Build from the serialized `tokenizer.json` contents.
    pub fn from_bytes(bytes: &[u8], max_length: usize) -> anyhow::Result<Self> {
        let inner =
            Tokenizer::from_bytes(bytes).map_err(|e| anyhow::anyhow!("parse tokenizer: {e}"))?;
        Self::configure(inner, max_length)
    }

    fn configure(mut inner: Tokenizer, max_length: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(max_length > 0, "max_length must be positive");

        let (pad_id, pad_token) = match inner.get_padding() {
            Some(p) => (p.pad_id, p.pad_token.clone()),
            None => (
                inner.token_to_id(DEFAULT_PAD_TOKEN).unwrap_or(0),
                DEFAULT_PAD_TOKEN.to_string(),
            ),
        };

        inner
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;
        inner.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            pad_id,
            pad_token,
            ..Default::default()
        }));

        Ok(Self { inner, max_length })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn encode(&self, text: &str) -> anyhow::Result<EncodedText> {
        let mut batch = self.encode_batch(&[text])?;
        batch
            .pop()
            .ok_or_else(|| anyhow::anyhow!("tokenizer returned no encoding"))
    }

    pub fn encode_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<EncodedText>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;

        encodings
            .iter()
            .map(|e| {
                let ids = e.get_ids();
                anyhow::ensure!(
                    ids.len() == self.max_length,
                    "encoding has {} tokens, expected {}",
                    ids.len(),
                    self.max_length
                );
                Ok(EncodedText {
                    input_ids: ids.to_vec(),
                    attention_mask: e.get_attention_mask().to_vec(),
                })
            })
            .collect()
    }

    /// Decode ids back to text, dropping padding and other special tokens.
    pub fn decode(&self, ids: &[u32]) -> anyhow::Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| anyhow::anyhow!("decode: {e}"))
    }

    /// Write `tokenizer.json` into `dir`.
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(TOKENIZER_FILE);
        self.inner
            .save(&path, true)
            .map_err(|e| anyhow::anyhow!("save tokenizer: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::toy_tokenizer;

    #[test]
    fn short_text_is_padded() {
        let tok = toy_tokenizer(16);
        let enc = tok.encode("this agreement is governed").unwrap();
        assert_eq!(enc.input_ids.len(), 16);
        assert_eq!(enc.attention_mask.len(), 16);
        assert_eq!(enc.attention_mask.iter().sum::<u32>(), 4);
        assert_eq!(enc.input_ids[15], 0);
    }

    #[test]
    fn long_text_is_truncated() {
        let tok = toy_tokenizer(4);
        let enc = tok
            .encode("this agreement shall be governed by the laws of new york")
            .unwrap();
        assert_eq!(enc.input_ids.len(), 4);
        assert!(enc.attention_mask.iter().all(|&m| m == 1));
    }

    #[test]
    fn every_encoding_has_exactly_max_length() {
        let tok = toy_tokenizer(8);
        let texts = ["", "notices", "the parties agree to arbitration in new york city today"];
        for enc in tok.encode_batch(&texts).unwrap() {
            assert_eq!(enc.input_ids.len(), 8);
        }
    }

    #[test]
    fn decode_reproduces_short_input() {
        let tok = toy_tokenizer(32);
        let text = "this agreement shall be governed by the laws of new york";
        let enc = tok.encode(text).unwrap();
        assert_eq!(tok.decode(&enc.input_ids).unwrap(), text);
    }

    #[test]
    fn save_writes_tokenizer_json() {
        let tmp = tempfile::tempdir().unwrap();
        let tok = toy_tokenizer(8);
        tok.save(tmp.path()).unwrap();
        let reloaded = FixedLengthTokenizer::from_dir(tmp.path(), 8).unwrap();
        assert_eq!(
            reloaded.encode("notices").unwrap(),
            tok.encode("notices").unwrap()
        );
    }

    #[test]
    fn missing_tokenizer_errors() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(FixedLengthTokenizer::from_dir(tmp.path(), 8).is_err());
    }
}
