use super::PairCodec;
use crate::error::{RefineError, Result};
use crate::pair::SubtitlePair;

/// XML-pair format: repeated blocks of
///
/// ```text
/// <pair>
/// ID=0
/// eng=Tonight, on JAG...
/// chinese=今晚，在《军法署》...
/// </pair>
/// ```
///
/// Decode requires the exact field name at each position.
pub struct XmlPairCodec;

const FIELDS: [&str; 3] = ["ID", "eng", "chinese"];

impl PairCodec for XmlPairCodec {
    fn serialize(&self, pairs: &[SubtitlePair]) -> String {
        let mut lines = Vec::new();
        for pair in pairs {
            lines.push("<pair>".to_string());
            lines.push(format!("ID={}", pair.id));
            lines.push(format!("eng={}", pair.source));
            lines.push(format!("chinese={}", pair.target));
            lines.push("</pair>".to_string());
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

            if line != "<pair>" {
                return Err(RefineError::Format(format!(
                    "Expected '<pair>' at line {}, got: {}",
                    i + 1,
                    line
                )));
            }
            i += 1;

            let mut values = [const { String::new() }; 3];
            for (slot, field) in FIELDS.iter().enumerate() {
                if i >= lines.len() {
                    return Err(RefineError::Format(format!(
                        "Unexpected end of input while reading {}",
                        field
                    )));
                }

                let line = lines[i].trim();
                let (key, value) = line.split_once('=').ok_or_else(|| {
                    RefineError::Format(format!(
                        "Expected '{}=...' at line {}, got: {}",
                        field,
                        i + 1,
                        line
                    ))
                })?;

                if key != *field {
                    return Err(RefineError::Format(format!(
                        "Expected field '{}' at line {}, got: {}",
                        field,
                        i + 1,
                        key
                    )));
                }

                values[slot] = value.to_string();
                i += 1;
            }

            if i >= lines.len() {
                return Err(RefineError::Format("Expected '</pair>' tag".to_string()));
            }
            let line = lines[i].trim();
            if line != "</pair>" {
                return Err(RefineError::Format(format!(
                    "Expected '</pair>' at line {}, got: {}",
                    i + 1,
                    line
                )));
            }
            i += 1;

            let id: i64 = values[0]
                .parse()
                .map_err(|_| RefineError::Format(format!("Invalid ID value: {}", values[0])))?;

            pairs.push(SubtitlePair::new(id, values[1].clone(), values[2].clone()));
        }

        Ok(pairs)
    }
}
