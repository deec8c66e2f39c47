//! Tokenizer seam
//!
//! The windower only needs to encode rendered text and measure its length.
//! [`ByteTokenizer`] is exact and dependency-free; [`HfTokenizer`] wraps a
//! HuggingFace `tokenizer.json` when the `token-counting` feature is enabled.

use crate::error::ContextResult;

pub type TokenId = u32;

/// Encoder/decoder used to measure and build prompts
pub trait Tokenizer: Send + Sync {
    /// Encode `text`, optionally prefixed with the beginning-of-sequence token.
    fn encode(&self, text: &str, add_bos: bool) -> ContextResult<Vec<TokenId>>;

    fn decode(&self, tokens: &[TokenId]) -> ContextResult<String>;

    fn eos_token_id(&self) -> TokenId;

    fn count_tokens(&self, text: &str) -> ContextResult<usize> {
        Ok(self.encode(text, false)?.len())
    }
}

/// One token per UTF-8 byte
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    pub const BOS: TokenId = 256;
    pub const EOS: TokenId = 257;

    pub fn new() -> Self {
        Self
    }
}

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str, add_bos: bool) -> ContextResult<Vec<TokenId>> {
        let mut tokens = Vec::with_capacity(text.len() + usize::from(add_bos));
        if add_bos {
            tokens.push(Self::BOS);
        }
        tokens.extend(text.bytes().map(TokenId::from));
        Ok(tokens)
    }

    fn decode(&self, tokens: &[TokenId]) -> ContextResult<String> {
        let bytes: Vec<u8> = tokens
            .iter()
            .filter_map(|&token| u8::try_from(token).ok())
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_token_id(&self) -> TokenId {
        Self::EOS
    }

    fn count_tokens(&self, text: &str) -> ContextResult<usize> {
        Ok(text.len())
    }
}

#[cfg(feature = "token-counting")]
pub use hf::HfTokenizer;

#[cfg(feature = "token-counting")]
mod hf {
    use std::path::Path;

    use super::{TokenId, Tokenizer};
    use crate::error::{ContextError, ContextResult};

    const BOS_CANDIDATES: &[&str] = &["<s>", "<|begin_of_text|>", "<bos>"];
    const EOS_CANDIDATES: &[&str] = &["</s>", "<|end_of_text|>", "<|endoftext|>", "<eos>"];

    /// HuggingFace `tokenizers` backed tokenizer
    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
        bos: Option<TokenId>,
        eos: TokenId,
    }

    impl HfTokenizer {
        pub fn from_file(path: impl AsRef<Path>) -> ContextResult<Self> {
            let inner = tokenizers::Tokenizer::from_file(path.as_ref())
                .map_err(|e| ContextError::Tokenizer(e.to_string()))?;
            Self::from_tokenizer(inner)
        }

        pub fn from_tokenizer(inner: tokenizers::Tokenizer) -> ContextResult<Self> {
            let bos = BOS_CANDIDATES
                .iter()
                .find_map(|token| inner.token_to_id(token));
            let eos = EOS_CANDIDATES
                .iter()
                .find_map(|token| inner.token_to_id(token))
                .ok_or_else(|| {
                    ContextError::Tokenizer("tokenizer defines no end-of-sequence token".to_string())
                })?;

            Ok(Self { inner, bos, eos })
        }
    }

    impl Tokenizer for HfTokenizer {
        fn encode(&self, text: &str, add_bos: bool) -> ContextResult<Vec<TokenId>> {
            let encoding = self
                .inner
                .encode(text, false)
                .map_err(|e| ContextError::Tokenizer(e.to_string()))?;

            let mut tokens = Vec::with_capacity(encoding.len() + 1);
            if add_bos {
                if let Some(bos) = self.bos {
                    tokens.push(bos);
                }
            }
            tokens.extend_from_slice(encoding.get_ids());
            Ok(tokens)
        }

        fn decode(&self, tokens: &[TokenId]) -> ContextResult<String> {
            self.inner
                .decode(tokens, true)
                .map_err(|e| ContextError::Tokenizer(e.to_string()))
        }

        fn eos_token_id(&self) -> TokenId {
            self.eos
        }
    }

}
