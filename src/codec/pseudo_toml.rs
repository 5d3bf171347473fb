use super::PairCodec;
use crate::error::{RefineError, Result};
use crate::pair::SubtitlePair;

/// Pseudo-TOML format: repeated sections of
///
/// ```text
/// [pair]
/// id = 0
/// eng = Tonight, on JAG...
/// chinese = 今晚，在《军法署》...
/// ```
///
/// Keys within a section may appear in any order but each is mandatory.
/// Values are not quoted or escaped, which is what makes it "pseudo".
pub struct PseudoTomlCodec;

impl PairCodec for PseudoTomlCodec {
    fn serialize(&self, pairs: &[SubtitlePair]) -> String {
        let mut lines = Vec::new();
        for pair in pairs {
            lines.push("[pair]".to_string());
            lines.push(format!("id = {}", pair.id));
            lines.push(format!("eng = {}", pair.source));
            lines.push(format!("chinese = {}", pair.target));
            lines.push(String::new());
        }

        lines.join("\n").trim_end().to_string()
    }

    fn deserialize(&self, text: &str) -> Result<Vec<SubtitlePair>> {
        let lines: Vec<&str> = text.trim().split('\n').collect();
        let mut pairs = Vec::new();

        let mut i = 0;
        while i < lines.len() {
            let line = lines[i].trim();

            if line.is_empty() {
                i += 1;
                continue;
            }

            if line != "[pair]" {
                return Err(RefineError::Format(format!(
                    "Expected '[pair]' at line {}, got: {}",
                    i + 1,
                    line
                )));
            }
            i += 1;

            let mut id_raw: Option<String> = None;
            let mut eng: Option<String> = None;
            let mut chinese: Option<String> = None;

            while i < lines.len() {
                let line = lines[i].trim();

                if line == "[pair]" {
                    break;
                }
                if line.is_empty() {
                    i += 1;
                    continue;
                }

                let (key, value) = line.split_once('=').ok_or_else(|| {
                    RefineError::Format(format!(
                        "Expected 'key = value' at line {}, got: {}",
                        i + 1,
                        line
                    ))
                })?;
                let key = key.trim();
                let value = value.trim().to_string();

                let slot = match key {
                    "id" => &mut id_raw,
                    "eng" => &mut eng,
                    "chinese" => &mut chinese,
                    _ => {
                        return Err(RefineError::Format(format!(
                            "Unexpected field '{}' at line {}",
                            key,
                            i + 1
                        )));
                    }
                };

                if slot.is_some() {
                    return Err(RefineError::Format(format!(
                        "Duplicate field '{}' at line {}",
                        key,
                        i + 1
                    )));
                }
                *slot = Some(value);
                i += 1;
            }

            let id_raw = id_raw
                .ok_or_else(|| RefineError::Format("Missing field 'id' in [pair] section".to_string()))?;
            let eng = eng
                .ok_or_else(|| RefineError::Format("Missing field 'eng' in [pair] section".to_string()))?;
            let chinese = chinese.ok_or_else(|| {
                RefineError::Format("Missing field 'chinese' in [pair] section".to_string())
            })?;

            let id: i64 = id_raw
                .parse()
                .map_err(|_| RefineError::Format(format!("Invalid ID value: {}", id_raw)))?;

            pairs.push(SubtitlePair::new(id, eng, chinese));
        }

        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_layout() {
        let text = PseudoTomlCodec.serialize(&[
            SubtitlePair::new(0, "Hello", "你好"),
            SubtitlePair::new(1, "Bye", "再见"),
        ]);
        assert_eq!(
            text,
            "[pair]\nid = 0\neng = Hello\nchinese = 你好\n\n[pair]\nid = 1\neng = Bye\nchinese = 再见"
        );
    }

    #[test]
    fn test_keys_may_appear_in_any_order() {
        let text = "[pair]\nchinese = 你好\nid = 4\neng = Hello";
        let pairs = PseudoTomlCodec.deserialize(text).unwrap();
        assert_eq!(pairs, vec![SubtitlePair::new(4, "Hello", "你好")]);
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let text = "[pair]\nid = 0\neng = Hello";
        let err = PseudoTomlCodec.deserialize(text).unwrap_err();
        match err {
            RefineError::Format(msg) => assert!(msg.contains("chinese")),
            other => panic!("expected Format error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let text = "[pair]\nid = 0\neng = a\nchinese = b\nextra = c";
        assert!(PseudoTomlCodec.deserialize(text).is_err());
    }

    #[test]
    fn test_blank_lines_inside_section_are_skipped() {
        let text = "[pair]\nid = 0\n\neng = a\nchinese = b";
        let pairs = PseudoTomlCodec.deserialize(text).unwrap();
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_bad_id_is_rejected() {
        let text = "[pair]\nid = zero\neng = a\nchinese = b";
        let err = PseudoTomlCodec.deserialize(text).unwrap_err();
        match err {
            RefineError::Format(msg) => assert!(msg.contains("Invalid ID")),
            other => panic!("expected Format error, got {:?}", other),
        }
    }

    #[test]
    fn test_leading_garbage_is_rejected() {
        let text = "note:\n[pair]\nid = 0\neng = a\nchinese = b";
        let err = PseudoTomlCodec.deserialize(text).unwrap_err();
        match err {
            RefineError::Format(msg) => assert!(msg.contains("Expected '[pair]'")),
            other => panic!("expected Format error, got {:?}", other),
        }
    }
}
