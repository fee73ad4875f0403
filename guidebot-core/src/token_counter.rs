//! Token counting and token-exact truncation.
//!
//! All budget math runs over a single fixed encoding (`o200k_base`) so counts
//! stay comparable across assembly, truncation, and usage logging regardless of
//! which chat model is configured.

use tiktoken_rs::CoreBPE;

use crate::error::PromptError;

/// Token counter using tiktoken-rs for accurate BPE tokenization.
pub struct TokenCounter {
    bpe: CoreBPE,
}

impl TokenCounter {
    pub fn new() -> Self {
        let bpe = tiktoken_rs::o200k_base().expect("o200k_base encoding should be available");
        Self { bpe }
    }

    /// Count the number of tokens in a string.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Cut `text` down to at most `max_tokens` tokens.
    ///
    /// Returns the text unchanged when it already fits. The cut happens at a
    /// token boundary, which can land mid-character for multi-byte input; that
    /// surfaces as a decode error rather than silently corrupted output.
    pub fn truncate_exact(&self, text: &str, max_tokens: usize) -> Result<String, PromptError> {
        let mut tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return Ok(text.to_string());
        }
        tokens.truncate(max_tokens);
        self.bpe
            .decode(tokens)
            .map_err(|e| PromptError::TokenizerDecode {
                message: e.to_string(),
            })
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_empty_is_zero() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn test_count_grows_with_text() {
        let counter = TokenCounter::new();
        let short = counter.count("Deviation report");
        let long = counter.count("Deviation report for batch 4711, filed under SOP-017.");
        assert!(short > 0);
        assert!(long > short);
    }

    #[test]
    fn test_truncate_noop_when_within_budget() {
        let counter = TokenCounter::new();
        let text = "Line clearance must be documented before startup.";
        let result = counter.truncate_exact(text, 10_000).unwrap();
        assert_eq!(result, text);
    }

    #[test]
    fn test_truncate_hits_exact_token_count() {
        let counter = TokenCounter::new();
        let text = "the ".repeat(300);
        let truncated = counter.truncate_exact(&text, 50).unwrap();
        assert_eq!(counter.count(&truncated), 50);
        assert!(text.starts_with(&truncated));
    }

    #[test]
    fn test_truncate_to_zero_yields_empty() {
        let counter = TokenCounter::new();
        let truncated = counter.truncate_exact("anything at all", 0).unwrap();
        assert_eq!(truncated, "");
    }
}
