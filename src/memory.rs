// Terminology memory
//
// Accumulates glossary entries across chunks: a user-supplied glossary set
// once at initialization (authoritative, never touched by the pipeline)
// and a learned glossary appended after each successful chunk. Only the
// learned glossary is replaced by compression, persisted to the
// checkpoint file, and restored on resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{RefineError, Result};
use crate::llm::{ChatClient, ChatMessage};
use crate::pair::SubtitlePair;
use crate::prompts;
use crate::recovery;
use crate::stats::UsageStats;
use crate::tokens::estimate_tokens;

/// One authoritative user-supplied term mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGlossaryEntry {
    pub eng: String,
    pub zh: String,
}

/// One learned term mapping. Duplicate `eng` keys are allowed to
/// accumulate until compression dedupes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub eng: String,
    pub zh: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalMemory {
    #[serde(default)]
    pub user_glossary: Vec<UserGlossaryEntry>,
    #[serde(default)]
    pub glossary: Vec<GlossaryEntry>,
}

impl GlobalMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Estimate the memory's token footprint from its serialized glossaries.
pub fn estimate_memory_tokens(memory: &GlobalMemory, model: &str) -> usize {
    let serialized = serde_json::to_string(memory).unwrap_or_default();
    estimate_tokens(&serialized, model)
}

/// Structural validation of a compression result: a `glossary` array (or
/// bare array) of objects carrying string `eng` and `zh` fields.
pub fn validate_glossary_value(value: &Value) -> bool {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(map) => match map.get("glossary") {
            Some(Value::Array(entries)) => entries,
            _ => return false,
        },
        _ => return false,
    };

    entries.iter().all(|entry| {
        entry
            .as_object()
            .is_some_and(|obj| obj.get("eng").is_some_and(Value::is_string) && obj.get("zh").is_some_and(Value::is_string))
    })
}

fn parse_glossary_entries(value: Value) -> Result<Vec<GlossaryEntry>> {
    let entries = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => map
            .remove("glossary")
            .ok_or_else(|| RefineError::CompressionValidation("missing 'glossary' key".to_string()))?,
        _ => {
            return Err(RefineError::CompressionValidation(
                "expected a JSON array or object".to_string(),
            ));
        }
    };

    serde_json::from_value(entries)
        .map_err(|e| RefineError::CompressionValidation(format!("invalid glossary entries: {}", e)))
}

/// Extract a JSON document from a cleaned model response, tolerating
/// leading commentary.
fn extract_json_payload(text: &str) -> &str {
    let bracket = text.find('[');
    let brace = text.find('{');
    let start = match (bracket, brace) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return text,
    };
    text[start..].trim()
}

/// Compress the learned glossary via a model call.
///
/// Invoked only when the memory exceeds its token budget. The result is
/// validated before acceptance; an invalid reply yields a
/// `CompressionValidation` error and the caller keeps the uncompressed
/// memory. The user glossary is carried over untouched.
pub async fn compress_memory(
    client: &dyn ChatClient,
    memory: &GlobalMemory,
    target_tokens: usize,
) -> Result<(GlobalMemory, UsageStats)> {
    let messages = [
        ChatMessage::system(prompts::MEMORY_COMPRESSION_SYSTEM_PROMPT),
        ChatMessage::user(prompts::build_memory_compression_prompt(memory, target_tokens)),
    ];

    let response = client.complete(&messages).await?;
    let cleaned = recovery::clean_response(&response.text);
    let payload = extract_json_payload(&cleaned);

    let value: Value = serde_json::from_str(payload).map_err(|e| {
        RefineError::CompressionValidation(format!("compression reply is not JSON: {}", e))
    })?;

    if !validate_glossary_value(&value) {
        return Err(RefineError::CompressionValidation(
            "compression reply has invalid structure".to_string(),
        ));
    }

    let compressed = GlobalMemory {
        user_glossary: memory.user_glossary.clone(),
        glossary: parse_glossary_entries(value)?,
    };

    Ok((compressed, response.usage))
}

/// Append terminology learned from a corrected chunk.
///
/// Best-effort by design: any failure is logged and the memory comes back
/// unchanged, so a terminology hiccup never aborts the chunk. Duplicate
/// entries are allowed to accumulate until compression.
pub async fn update_memory(
    client: &dyn ChatClient,
    memory: GlobalMemory,
    corrected_pairs: &[SubtitlePair],
) -> (GlobalMemory, UsageStats) {
    if corrected_pairs.is_empty() {
        return (memory, UsageStats::default());
    }

    let listing = corrected_pairs
        .iter()
        .map(|p| format!("{} | {}", p.source, p.target))
        .collect::<Vec<_>>()
        .join("\n");

    let messages = [
        ChatMessage::system(prompts::TERMINOLOGY_SYSTEM_PROMPT),
        ChatMessage::user(prompts::build_terminology_prompt(&listing)),
    ];

    let response = match client.complete(&messages).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Terminology extraction failed, keeping memory unchanged: {}", e);
            return (memory, UsageStats::default());
        }
    };

    let cleaned = recovery::clean_response(&response.text);
    let payload = extract_json_payload(&cleaned);

    let entries: Vec<GlossaryEntry> = match serde_json::from_str(payload) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Unparseable terminology reply, keeping memory unchanged: {}", e);
            return (memory, response.usage);
        }
    };

    if !entries.is_empty() {
        info!("Learned {} new terminology entries", entries.len());
    }

    let mut updated = memory;
    updated.glossary.extend(entries);
    (updated, response.usage)
}

// ---------------------------------------------------------------------------
// Glossary checkpoint
// ---------------------------------------------------------------------------

/// On-disk checkpoint: ordered `[[terms]]` tables, diff-friendly.
#[derive(Debug, Serialize, Deserialize)]
struct GlossaryCheckpoint {
    saved_at: DateTime<Utc>,
    terms: Vec<GlossaryEntry>,
}

/// Checkpoint path derived from the input file:
/// `input.ass` -> `input.ass.glossary.toml`.
pub fn checkpoint_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(".glossary.toml");
    PathBuf::from(name)
}

/// Persist the learned glossary. Writes are atomic (temp file + rename);
/// the caller treats failures as non-fatal.
pub fn save_glossary_checkpoint(glossary: &[GlossaryEntry], path: &Path) -> Result<()> {
    let checkpoint = GlossaryCheckpoint {
        saved_at: Utc::now(),
        terms: glossary.to_vec(),
    };

    let content = toml::to_string_pretty(&checkpoint)
        .map_err(|e| RefineError::Checkpoint(format!("Failed to serialize glossary: {}", e)))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| RefineError::Checkpoint(format!("Failed to create temp file: {}", e)))?;
    file.write_all(content.as_bytes())
        .map_err(|e| RefineError::Checkpoint(format!("Failed to write checkpoint: {}", e)))?;
    file.persist(path)
        .map_err(|e| RefineError::Checkpoint(format!("Failed to persist checkpoint: {}", e)))?;

    Ok(())
}

/// User glossary file: `[[terms]]` tables with `eng` and `zh` keys.
#[derive(Debug, Deserialize)]
struct UserGlossaryFile {
    terms: Vec<UserGlossaryEntry>,
}

/// Load the authoritative user glossary. Unlike the checkpoint, a broken
/// user glossary file is a hard configuration error.
pub fn load_user_glossary(path: &Path) -> Result<Vec<UserGlossaryEntry>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RefineError::Config(format!(
            "Failed to read user glossary {}: {}",
            path.display(),
            e
        ))
    })?;

    let parsed: UserGlossaryFile = toml::from_str(&content).map_err(|e| {
        RefineError::Config(format!(
            "Invalid user glossary {}: {}",
            path.display(),
            e
        ))
    })?;

    Ok(parsed.terms)
}

/// Load a previously checkpointed glossary, if present and valid.
pub fn load_glossary_checkpoint(path: &Path) -> Option<Vec<GlossaryEntry>> {
    if !path.exists() {
        return None;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Could not read glossary checkpoint {}: {}", path.display(), e);
            return None;
        }
    };

    match toml::from_str::<GlossaryCheckpoint>(&content) {
        Ok(checkpoint) => Some(checkpoint.terms),
        Err(e) => {
            warn!("Invalid glossary checkpoint {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(eng: &str, zh: &str) -> GlossaryEntry {
        GlossaryEntry {
            eng: eng.to_string(),
            zh: zh.to_string(),
            entry_type: None,
            confidence: None,
        }
    }

    #[test]
    fn test_memory_tokens_grow_with_glossary() {
        let mut memory = GlobalMemory::new();
        let empty = estimate_memory_tokens(&memory, "gpt-5-mini");

        for i in 0..20 {
            memory.glossary.push(entry(&format!("Term number {}", i), "术语"));
        }
        assert!(estimate_memory_tokens(&memory, "gpt-5-mini") > empty);
    }

    #[test]
    fn test_validate_glossary_value() {
        assert!(validate_glossary_value(&json!([{"eng": "a", "zh": "b"}])));
        assert!(validate_glossary_value(&json!({"glossary": [{"eng": "a", "zh": "b", "type": "name"}]})));
        assert!(validate_glossary_value(&json!([])));

        assert!(!validate_glossary_value(&json!("nope")));
        assert!(!validate_glossary_value(&json!({"terms": []})));
        assert!(!validate_glossary_value(&json!([{"eng": "a"}])));
        assert!(!validate_glossary_value(&json!([{"eng": 1, "zh": "b"}])));
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("show.ass.glossary.toml");

        let glossary = vec![
            GlossaryEntry {
                eng: "Admiral".to_string(),
                zh: "上将".to_string(),
                entry_type: Some("rank".to_string()),
                confidence: Some(0.9),
            },
            entry("JAG", "军法署"),
        ];

        save_glossary_checkpoint(&glossary, &path).unwrap();
        let loaded = load_glossary_checkpoint(&path).unwrap();
        assert_eq!(loaded, glossary);
    }

    #[test]
    fn test_checkpoint_load_missing_or_invalid_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(load_glossary_checkpoint(&missing).is_none());

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "not toml [").unwrap();
        assert!(load_glossary_checkpoint(&bad).is_none());
    }

    #[test]
    fn test_checkpoint_path_derivation() {
        assert_eq!(
            checkpoint_path(Path::new("input.ass")),
            PathBuf::from("input.ass.glossary.toml")
        );
    }

    #[test]
    fn test_user_glossary_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glossary.toml");
        std::fs::write(
            &path,
            "[[terms]]\neng = \"JAG\"\nzh = \"军法署\"\n\n[[terms]]\neng = \"Admiral\"\nzh = \"上将\"\n",
        )
        .unwrap();

        let terms = load_user_glossary(&path).unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].eng, "JAG");

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "terms = 3").unwrap();
        assert!(matches!(
            load_user_glossary(&bad),
            Err(RefineError::Config(_))
        ));
    }

    #[test]
    fn test_extract_json_payload_skips_commentary() {
        assert_eq!(extract_json_payload("Here you go: [1, 2]"), "[1, 2]");
        assert_eq!(extract_json_payload("{\"glossary\": []}"), "{\"glossary\": []}");
        assert_eq!(extract_json_payload("no json"), "no json");
    }
}
