//! Token counting and truncation with the `cl100k_base` BPE, the tokenizer used by
//! OpenAI's embedding models.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use tiktoken_rs::CoreBPE;

/// Shared handle to the BPE tables. Cheap to clone.
#[derive(Clone)]
pub struct Tokenizer {
    bpe: Arc<CoreBPE>,
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Tokenizer(cl100k_base)")
    }
}

impl Tokenizer {
    pub fn cl100k() -> Result<Self, TokenizerError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| TokenizerError(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Cut `text` to at most `max_tokens` tokens. Borrows when no cut is needed.
    ///
    /// A token boundary can fall inside a multi-byte character; in that case the cut
    /// backs off one token at a time until the prefix decodes cleanly and re-encodes
    /// within budget.
    pub fn truncate<'a>(&self, text: &'a str, max_tokens: usize) -> Cow<'a, str> {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return Cow::Borrowed(text);
        }
        let mut end = max_tokens;
        while end > 0 {
            if let Ok(prefix) = self.bpe.decode(tokens[..end].to_vec()) {
                if self.count(&prefix) <= max_tokens {
                    return Cow::Owned(prefix);
                }
            }
            end -= 1;
        }
        Cow::Owned(String::new())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to load tokenizer: {0}")]
pub struct TokenizerError(String);
