use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::PairCodec;
use crate::error::{RefineError, Result};
use crate::pair::SubtitlePair;

/// On-wire JSON shape: an array of these objects.
#[derive(Debug, Serialize, Deserialize)]
struct WirePair {
    id: i64,
    eng: String,
    chinese: String,
}

pub struct JsonCodec;

impl PairCodec for JsonCodec {
    fn serialize(&self, pairs: &[SubtitlePair]) -> String {
        let wire: Vec<WirePair> = pairs
            .iter()
            .map(|p| WirePair {
                id: p.id,
                eng: p.source.clone(),
                chinese: p.target.clone(),
            })
            .collect();

        // Infallible: WirePair contains only strings and integers.
        serde_json::to_string_pretty(&wire).unwrap_or_else(|_| "[]".to_string())
    }

    fn deserialize(&self, text: &str) -> Result<Vec<SubtitlePair>> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RefineError::Format(format!("Failed to parse JSON: {}", e)))?;

        let items = value
            .as_array()
            .ok_or_else(|| RefineError::Format("JSON must be an array".to_string()))?;

        let mut pairs = Vec::with_capacity(items.len());
        for item in items {
            let obj = item
                .as_object()
                .ok_or_else(|| RefineError::Format(format!("Invalid JSON item: {}", item)))?;

            for key in ["id", "eng", "chinese"] {
                if !obj.contains_key(key) {
                    return Err(RefineError::Format(format!(
                        "Missing required field '{}' in: {}",
                        key, item
                    )));
                }
            }

            let id = obj["id"]
                .as_i64()
                .ok_or_else(|| RefineError::Format(format!("Invalid ID value: {}", obj["id"])))?;
            let eng = obj["eng"]
                .as_str()
                .ok_or_else(|| RefineError::Format(format!("Field 'eng' must be a string: {}", obj["eng"])))?;
            let chinese = obj["chinese"].as_str().ok_or_else(|| {
                RefineError::Format(format!("Field 'chinese' must be a string: {}", obj["chinese"]))
            })?;

            pairs.push(SubtitlePair::new(id, eng, chinese));
        }

        Ok(pairs)
    }
}
