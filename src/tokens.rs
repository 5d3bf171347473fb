use once_cell::sync::Lazy;
use regex::Regex;

static CJK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u{4e00}-\u{9fff}]").expect("cjk regex"));

/// Estimate the token count of a text for chunk budgeting.
///
/// Deterministic heuristic: CJK characters count as roughly one token
/// each, everything else as one token per four characters. The model name
/// is accepted for signature compatibility with callers that select an
/// estimator per model, but does not change the result.
pub fn estimate_tokens(text: &str, _model: &str) -> usize {
    let cjk = CJK_RE.find_iter(text).count();
    let other = text.chars().count().saturating_sub(cjk);
    cjk + other.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_zero_tokens() {
        assert_eq!(estimate_tokens("", "gpt-5-mini"), 0);
    }

    #[test]
    fn test_ascii_counts_quarter_char() {
        // 8 ASCII chars -> 2 tokens
        assert_eq!(estimate_tokens("abcdefgh", "gpt-5-mini"), 2);
        // Rounds up
        assert_eq!(estimate_tokens("abcde", "gpt-5-mini"), 2);
    }

    #[test]
    fn test_cjk_counts_one_token_per_char() {
        assert_eq!(estimate_tokens("你好吗", "gpt-5-mini"), 3);
    }

    #[test]
    fn test_mixed_text() {
        // 3 CJK + 4 ASCII -> 3 + 1
        assert_eq!(estimate_tokens("你好吗test", "gpt-5-mini"), 4);
    }

    #[test]
    fn test_model_name_does_not_change_estimate() {
        let text = "Tonight, on JAG... 今晚";
        assert_eq!(
            estimate_tokens(text, "gpt-5-mini"),
            estimate_tokens(text, "gpt-4o-mini")
        );
    }
}
