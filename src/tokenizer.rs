//! Token counting and trimming against the embedding model's tokenizer.
//!
//! Chunk size limits are expressed in tokens, so counts here must match
//! what the embedding provider bills and truncates on. The `cl100k_base`
//! BPE is loaded once and shared; counting is deterministic for a given
//! model family.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, CoreBPE};

static BPE: Lazy<CoreBPE> =
    Lazy::new(|| cl100k_base().expect("cl100k_base tokenizer data is bundled"));

/// Token counter for a named model family.
#[derive(Debug, Clone)]
pub struct TokenCounter {
    model: String,
}

impl TokenCounter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Number of tokens in `text`. Zero for the empty string, strictly
    /// positive for any non-empty input (including CJK-only text).
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        BPE.encode_with_special_tokens(text).len()
    }

    /// Truncate `text` to at most `max_tokens` tokens. Returns the input
    /// unchanged when it is already within bounds.
    pub fn trim(&self, text: &str, max_tokens: usize) -> Result<String> {
        if max_tokens == 0 {
            return Ok(String::new());
        }
        let tokens = BPE.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return Ok(text.to_string());
        }
        BPE.decode(tokens[..max_tokens].to_vec())
            .context("decoding truncated token stream")
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new("cl100k_base")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        let tc = TokenCounter::default();
        assert_eq!(tc.count(""), 0);
    }

    #[test]
    fn test_nonempty_is_positive() {
        let tc = TokenCounter::default();
        assert!(tc.count("a") > 0);
        assert!(tc.count("hello world") > 0);
    }

    #[test]
    fn test_mixed_cjk_ascii_positive() {
        let tc = TokenCounter::default();
        assert!(tc.count("以下のコードを参照: see below") > 0);
        assert!(tc.count("日本語") > 0);
    }

    #[test]
    fn test_trim_noop_when_within_bounds() {
        let tc = TokenCounter::default();
        let text = "short text";
        assert_eq!(tc.trim(text, 100).unwrap(), text);
    }

    #[test]
    fn test_trim_reduces_token_count() {
        let tc = TokenCounter::default();
        let text = "one two three four five six seven eight nine ten";
        let trimmed = tc.trim(text, 3).unwrap();
        assert!(tc.count(&trimmed) <= 3);
        assert!(text.starts_with(&trimmed));
    }

    #[test]
    fn test_count_deterministic() {
        let tc = TokenCounter::default();
        let text = "func Greet(name string) string { return name }";
        assert_eq!(tc.count(text), tc.count(text));
    }
}
