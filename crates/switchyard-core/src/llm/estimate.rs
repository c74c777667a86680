//! Heuristic token estimation.
//!
//! Exact counting is vendor-specific and not needed for admission control;
//! the rate limiter is only as safe as this estimate.

/// Estimate tokens as the larger of a word-based and a character-based guess.
///
/// Words are weighted 1.3 to account for subword tokenization; characters
/// are divided by 3.
pub fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count() as f64;
    let chars = text.chars().count();

    let word_tokens = (words * 1.3) as u64;
    let char_tokens = (chars / 3) as u64;

    word_tokens.max(char_tokens).min(u64::from(u32::MAX)) as u32
}

/// Character-only estimate (about four characters per token).
pub fn estimate_tokens_by_chars(text: &str) -> u32 {
    (text.chars().count() / 4).min(u32::MAX as usize) as u32
}
