//! Token estimation for request budgeting.
//!
//! Batch packing only needs an approximate size, so token counts are derived
//! from character length instead of running a real tokenizer.

/// Quickly estimate token count without full tokenization.
///
/// Uses a heuristic ratio of ~3.7 characters per token. Characters are
/// counted as Unicode scalar values so multi-byte scripts are not inflated.
///
/// # Returns
/// Estimated number of tokens (rounded up)
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    (chars * 10).div_ceil(37)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_ENGLISH: &str = "The quick brown fox jumps over the lazy dog.";

    #[test]
    fn test_estimate_tokens_simple() {
        // 44 chars / 3.7 = 11.89 -> 12
        assert_eq!(estimate_tokens(SIMPLE_ENGLISH), 12);
    }

    #[test]
    fn test_estimate_tokens_empty_string() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_single_char() {
        assert_eq!(estimate_tokens("a"), 1);
    }

    #[test]
    fn test_estimate_tokens_counts_chars_not_bytes() {
        // Arabic letters are two bytes each in UTF-8
        let arabic = "بسم الله";
        assert_eq!(estimate_tokens(arabic), estimate_tokens("abcdefgh"));
    }

    #[test]
    fn test_estimate_tokens_boundary() {
        assert_eq!(estimate_tokens(&"x".repeat(370)), 100);
        assert_eq!(estimate_tokens(&"x".repeat(371)), 101);
    }
}
