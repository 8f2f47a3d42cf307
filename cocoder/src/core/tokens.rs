//! Token estimation with the cl100k_base BPE used by the GPT-4 model family.

use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;

use crate::core::types::Turn;

static BPE: LazyLock<CoreBPE> =
    LazyLock::new(|| tiktoken_rs::cl100k_base().expect("cl100k_base BPE should load"));

/// Count tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    BPE.encode_ordinary(text).len()
}

/// Estimate the size of a request carrying `turns`.
///
/// Measures the JSON array of turn contents behind a `"_ "` prefix, so an
/// empty conversation still costs a token.
pub fn estimate_request_tokens(turns: &[Turn]) -> usize {
    let contents: Vec<&str> = turns.iter().map(|turn| turn.content.as_str()).collect();
    let encoded = serde_json::to_string(&contents).unwrap_or_default();
    count_tokens(&format!("_ {encoded}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_grow_with_text() {
        assert_eq!(count_tokens(""), 0);
        let short = count_tokens("hello world");
        let long = count_tokens(&"hello world ".repeat(50));
        assert!(short > 0);
        assert!(long > short * 10);
    }

    #[test]
    fn request_estimate_covers_every_turn() {
        let one = estimate_request_tokens(&[Turn::system("a system prompt")]);
        let two = estimate_request_tokens(&[
            Turn::system("a system prompt"),
            Turn::user("a much longer user prompt with several more words in it"),
        ]);
        assert!(one > 0);
        assert!(two > one);
    }
}
