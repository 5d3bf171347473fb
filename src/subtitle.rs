// ASS document I/O
//
// Parses an .ass file into passthrough lines and dialogue events, builds
// bilingual subtitle pairs from the event text, and applies corrected
// pairs back without disturbing anything else in the document. Dialogue
// text holds English and Chinese joined by a literal \N, English first.

use std::io::Write;
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::error::{RefineError, Result};
use crate::pair::SubtitlePair;

/// Number of commas separating a Dialogue line's fields from its text.
const DIALOGUE_FIELD_COMMAS: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub enum DocLine {
    /// Header, comments, Format: lines, blank lines — kept verbatim.
    Passthrough(String),
    /// A Dialogue event: everything up to the text field, plus the text.
    Dialogue { prelude: String, text: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssDocument {
    pub lines: Vec<DocLine>,
}

impl AssDocument {
    pub fn dialogue_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, DocLine::Dialogue { .. }))
            .count()
    }
}

/// Parse an .ass document. Lines are normalized to `\n` endings.
pub fn parse_ass(content: &str) -> Result<AssDocument> {
    let mut lines = Vec::new();

    for raw in content.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);

        if let Some(rest) = line.strip_prefix("Dialogue:") {
            let mut commas = 0;
            let mut text_start = None;
            for (idx, ch) in rest.char_indices() {
                if ch == ',' {
                    commas += 1;
                    if commas == DIALOGUE_FIELD_COMMAS {
                        text_start = Some(idx + 1);
                        break;
                    }
                }
            }

            let text_start = text_start.ok_or_else(|| {
                RefineError::Subtitle(format!("Malformed Dialogue line: {}", line))
            })?;

            lines.push(DocLine::Dialogue {
                prelude: format!("Dialogue:{}", &rest[..text_start]),
                text: rest[text_start..].to_string(),
            });
        } else {
            lines.push(DocLine::Passthrough(line.to_string()));
        }
    }

    Ok(AssDocument { lines })
}

/// Render the document back to text.
pub fn render_ass(doc: &AssDocument) -> String {
    doc.lines
        .iter()
        .map(|line| match line {
            DocLine::Passthrough(text) => text.clone(),
            DocLine::Dialogue { prelude, text } => format!("{}{}", prelude, text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build subtitle pairs from the dialogue events, in document order.
/// Ids are the zero-based dialogue indices. Event text splits on the
/// first `\N`; a line without one is English-only.
pub fn build_pairs(doc: &AssDocument) -> Vec<SubtitlePair> {
    doc.lines
        .iter()
        .filter_map(|line| match line {
            DocLine::Dialogue { text, .. } => Some(text),
            DocLine::Passthrough(_) => None,
        })
        .enumerate()
        .map(|(id, text)| match text.split_once(r"\N") {
            Some((eng, chinese)) => SubtitlePair::new(id as i64, eng, chinese),
            None => SubtitlePair::new(id as i64, text.clone(), ""),
        })
        .collect()
}

/// Write corrected pair text back into the matching dialogue events.
/// Pairs whose id has no dialogue slot are ignored, as are dialogue slots
/// without a correction.
pub fn apply_pairs(doc: &mut AssDocument, pairs: &[SubtitlePair]) {
    let by_id: std::collections::HashMap<i64, &SubtitlePair> =
        pairs.iter().map(|p| (p.id, p)).collect();

    let mut dialogue_index: i64 = 0;
    for line in &mut doc.lines {
        if let DocLine::Dialogue { text, .. } = line {
            if let Some(pair) = by_id.get(&dialogue_index) {
                *text = if pair.target.is_empty() {
                    pair.source.clone()
                } else {
                    format!(r"{}\N{}", pair.source, pair.target)
                };
            }
            dialogue_index += 1;
        }
    }
}

/// Read and parse an .ass file.
pub async fn read_ass_file<P: AsRef<Path>>(path: P) -> Result<AssDocument> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RefineError::FileNotFound(path.display().to_string()));
    }

    let content = fs::read_to_string(path).await?;
    let doc = parse_ass(&content)?;
    info!(
        "Parsed {} ({} dialogue lines)",
        path.display(),
        doc.dialogue_count()
    );
    Ok(doc)
}

/// Render and write an .ass file atomically (temp file + rename).
pub async fn write_ass_file<P: AsRef<Path>>(path: P, doc: &AssDocument) -> Result<()> {
    let path = path.as_ref();
    let content = render_ass(doc);

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(content.as_bytes())?;
    file.persist(path)
        .map_err(|e| RefineError::Subtitle(format!("Failed to write {}: {}", path.display(), e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[Script Info]
Title: Sample

[Events]
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text
Dialogue: 0,0:00:01.00,0:00:03.00,Default,,0,0,0,,Tonight, on JAG...\\N今晚，在《军法署》...
Dialogue: 0,0:00:03.50,0:00:05.00,Default,,0,0,0,,Good evening.\\N晚上好
Dialogue: 0,0:00:05.50,0:00:06.00,Default,,0,0,0,,[music]";

    #[test]
    fn test_parse_splits_dialogue_from_passthrough() {
        let doc = parse_ass(SAMPLE).unwrap();
        assert_eq!(doc.dialogue_count(), 3);
        assert!(matches!(doc.lines[0], DocLine::Passthrough(_)));
    }

    #[test]
    fn test_render_round_trips() {
        let doc = parse_ass(SAMPLE).unwrap();
        assert_eq!(render_ass(&doc), SAMPLE);
    }

    #[test]
    fn test_build_pairs_splits_on_first_line_break() {
        let doc = parse_ass(SAMPLE).unwrap();
        let pairs = build_pairs(&doc);
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].id, 0);
        assert_eq!(pairs[0].source, "Tonight, on JAG...");
        assert_eq!(pairs[0].target, "今晚，在《军法署》...");
        // No \N: English-only line
        assert_eq!(pairs[2].source, "[music]");
        assert_eq!(pairs[2].target, "");
    }

    #[test]
    fn test_apply_pairs_overwrites_only_matching_ids() {
        let mut doc = parse_ass(SAMPLE).unwrap();
        let corrections = vec![
            SubtitlePair::new(1, "Good evening, Admiral.", "晚上好，上将"),
            // Id without a dialogue slot: ignored
            SubtitlePair::new(99, "ghost", "幽灵"),
        ];
        apply_pairs(&mut doc, &corrections);

        let pairs = build_pairs(&doc);
        assert_eq!(pairs[0].source, "Tonight, on JAG...");
        assert_eq!(pairs[1].source, "Good evening, Admiral.");
        assert_eq!(pairs[1].target, "晚上好，上将");
        assert_eq!(pairs[2].source, "[music]");
    }

    #[test]
    fn test_text_field_may_contain_commas() {
        let doc = parse_ass(SAMPLE).unwrap();
        let pairs = build_pairs(&doc);
        assert!(pairs[0].source.contains(','));
    }

    #[test]
    fn test_malformed_dialogue_line_is_rejected() {
        let err = parse_ass("Dialogue: only,two").unwrap_err();
        assert!(matches!(err, RefineError::Subtitle(_)));
    }

    #[test]
    fn test_crlf_lines_are_normalized() {
        let doc = parse_ass("[Script Info]\r\nDialogue: 0,a,b,c,d,0,0,0,,Hi\\N嗨\r\n").unwrap();
        let pairs = build_pairs(&doc);
        assert_eq!(pairs[0].source, "Hi");
    }
}
