// Response recovery
//
// Turns a raw model response into text a codec can decode. Cleanup order
// matters: thinking blocks are removed first, then the first fenced code
// block (if any) is extracted. If decoding the cleaned text fails, a
// second pass retries from the first format-specific structural marker.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::codec::{self, PairFormat};
use crate::error::{RefineError, Result};
use crate::pair::SubtitlePair;

/// Number of characters of each excerpt kept for diagnostics.
const EXCERPT_CHARS: usize = 500;

static THINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\s*<think>.*?</think>\s*").expect("think regex"));

static CODE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:\w+)?[ \t]*\n(.*?)\n```").expect("code block regex"));

/// Remove every `<think>...</think>` span (case-insensitive).
///
/// Retained segments are rejoined with a single blank line so interior
/// span removal leaves no whitespace artifacts.
pub fn strip_thinking_blocks(text: &str) -> String {
    let segments: Vec<&str> = THINK_RE
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    segments.join("\n\n")
}

/// Content of the first fenced code block, if any (language tag optional).
pub fn extract_fenced_block(text: &str) -> Option<String> {
    CODE_BLOCK_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
}

/// Clean a raw model response: strip thinking blocks, then prefer the
/// first fenced code block over the surrounding prose.
pub fn clean_response(text: &str) -> String {
    let stripped = strip_thinking_blocks(text);

    match extract_fenced_block(&stripped) {
        Some(block) => block,
        None => stripped.trim().to_string(),
    }
}

/// Fallback extraction: the substring starting at the first structural
/// marker of the format (`<pair>`, the first `[`/`{`, or `[pair]`).
/// Expects text already passed through `clean_response`.
pub fn extract_from_marker(text: &str, format: PairFormat) -> Option<&str> {
    format.marker_index(text).map(|idx| text[idx..].trim())
}

/// Decode cleaned text, retrying from the format marker when the primary
/// decode fails. Exhausting both stages yields a `RecoveryExhausted`
/// error carrying excerpts of everything tried.
pub fn decode_with_recovery(cleaned: &str, format: PairFormat) -> Result<Vec<SubtitlePair>> {
    let primary_err = match codec::deserialize(cleaned, format) {
        Ok(pairs) => return Ok(pairs),
        Err(e) => e,
    };

    debug!("Primary {} decode failed: {}", format.name(), primary_err);

    match extract_from_marker(cleaned, format) {
        Some(extracted) => match codec::deserialize(extracted, format) {
            Ok(pairs) => {
                warn!(
                    "Recovered {} response via marker fallback ({} pairs)",
                    format.name(),
                    pairs.len()
                );
                Ok(pairs)
            }
            Err(fallback_err) => Err(RefineError::RecoveryExhausted {
                reason: format!(
                    "primary decode failed ({}); marker fallback failed ({})",
                    primary_err, fallback_err
                ),
                cleaned_excerpt: excerpt(cleaned),
                extracted_excerpt: Some(excerpt(extracted)),
            }),
        },
        None => Err(RefineError::RecoveryExhausted {
            reason: format!(
                "primary decode failed ({}); no {} marker found in cleaned text",
                primary_err,
                format.name()
            ),
            cleaned_excerpt: excerpt(cleaned),
            extracted_excerpt: None,
        }),
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thinking_block_removal() {
        assert_eq!(strip_thinking_blocks("<think>X</think>\nY"), "Y");
        assert_eq!(strip_thinking_blocks("<THINK>Some thoughts</THINK>\nContent"), "Content");
        assert_eq!(strip_thinking_blocks("Just plain content"), "Just plain content");
        assert_eq!(strip_thinking_blocks("<think></think>Content"), "Content");
    }

    #[test]
    fn test_multiple_blocks_collapse_to_single_blank_line() {
        let text = "<think>First thought</think>\nSome text\n<think>Second thought</think>\nMore text";
        assert_eq!(strip_thinking_blocks(text), "Some text\n\nMore text");
    }

    #[test]
    fn test_cleaning_is_idempotent() {
        let cases = [
            "<think>X</think>\nY",
            "<think>a</think>\ntext\n<think>b</think>\nmore",
            "```json\n[1]\n```",
            "<think>t</think>\n```\ncontent\n```",
            "plain",
            "Some text ```incomplete",
        ];
        for case in cases {
            let once = clean_response(case);
            assert_eq!(clean_response(&once), once, "not idempotent for {:?}", case);
        }
    }

    #[test]
    fn test_first_fenced_block_wins() {
        let text = "```json\n{\"first\": true}\n```\n```json\n{\"second\": true}\n```";
        assert_eq!(extract_fenced_block(text).unwrap(), "{\"first\": true}");
    }

    #[test]
    fn test_fence_without_language_tag() {
        assert_eq!(extract_fenced_block("```\ncontent here\n```").unwrap(), "content here");
    }

    #[test]
    fn test_incomplete_fence_is_ignored() {
        assert!(extract_fenced_block("Some text ```incomplete").is_none());
        assert_eq!(clean_response("Some text ```incomplete"), "Some text ```incomplete");
    }

    #[test]
    fn test_fenced_block_preferred_after_thinking_removal() {
        let text = "<think>Step 1: Analysis</think>\nHere is the result:\n```json\n{\"done\": true}\n```";
        assert_eq!(clean_response(text), "{\"done\": true}");
    }

    #[test]
    fn test_clean_then_decode_via_normal_path() {
        let response = "<think>ok</think>\n```json\n[{\"id\": 0, \"eng\": \"Hello\", \"chinese\": \"你好\"}]\n```";
        let cleaned = clean_response(response);
        let pairs = decode_with_recovery(&cleaned, PairFormat::Json).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].id, 0);
        assert_eq!(pairs[0].source, "Hello");
    }

    #[test]
    fn test_marker_fallback_xml() {
        let cleaned = "Sure, here are the corrected pairs:\n<pair>\nID=3\neng=Hi\nchinese=嗨\n</pair>";
        let pairs = decode_with_recovery(cleaned, PairFormat::XmlPair).unwrap();
        assert_eq!(pairs, vec![SubtitlePair::new(3, "Hi", "嗨")]);
    }

    #[test]
    fn test_marker_fallback_json() {
        let cleaned = "Corrected output follows. [{\"id\": 1, \"eng\": \"a\", \"chinese\": \"b\"}]";
        let pairs = decode_with_recovery(cleaned, PairFormat::Json).unwrap();
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_marker_fallback_pseudo_toml() {
        let cleaned = "Notes first.\n[pair]\nid = 2\neng = a\nchinese = b";
        let pairs = decode_with_recovery(cleaned, PairFormat::PseudoToml).unwrap();
        assert_eq!(pairs[0].id, 2);
    }

    #[test]
    fn test_recovery_exhausted_carries_both_excerpts() {
        let cleaned = "commentary then <pair>\nbroken";
        let err = decode_with_recovery(cleaned, PairFormat::XmlPair).unwrap_err();
        match err {
            RefineError::RecoveryExhausted {
                cleaned_excerpt,
                extracted_excerpt,
                ..
            } => {
                assert!(cleaned_excerpt.contains("commentary"));
                assert!(extracted_excerpt.unwrap().starts_with("<pair>"));
            }
            other => panic!("expected RecoveryExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_exhausted_without_marker() {
        let err = decode_with_recovery("no structure at all", PairFormat::XmlPair).unwrap_err();
        match err {
            RefineError::RecoveryExhausted {
                extracted_excerpt, ..
            } => assert!(extracted_excerpt.is_none()),
            other => panic!("expected RecoveryExhausted, got {:?}", other),
        }
    }
}
