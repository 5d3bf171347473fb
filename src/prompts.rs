// Prompt assembly
//
// Produces the system prompt (instructions + terminology + format-matched
// few-shot example), the per-chunk user prompt, and the memory-compression
// and terminology-extraction prompts. The wording here is informational,
// not a contract; the pipeline only relies on the response formats it
// requests.

use crate::codec::{self, PairFormat};
use crate::error::Result;
use crate::memory::GlobalMemory;

/// Few-shot example, stored as JSON and converted to the configured
/// intermediate format at prompt build time.
const EXAMPLE_PAIRS_JSON: &str = r#"[
  {
    "id": 120,
    "eng": "She'll forgive you.",
    "chinese": "她会原谅你"
  },
  {
    "id": 121,
    "eng": "You'll pay, but she'll forgive you.",
    "chinese": "你会付出代价，但她会原谅你"
  }
]"#;

pub const MEMORY_COMPRESSION_SYSTEM_PROMPT: &str = "\
You are a terminology curator for a subtitle translation project. \
You will receive a glossary of learned English-Chinese term mappings. \
Merge duplicates, drop low-confidence or one-off entries, and keep the \
terms most useful for consistent translation. \
Reply with ONLY a JSON object of the form {\"glossary\": [{\"eng\": ..., \
\"zh\": ..., \"type\": ..., \"confidence\": ...}]} and nothing else.";

pub const TERMINOLOGY_SYSTEM_PROMPT: &str = "\
You extract recurring terminology from bilingual subtitles. \
Given corrected English-Chinese subtitle pairs, list proper nouns, \
character names, ranks, and recurring phrases whose translation should \
stay consistent. Reply with ONLY a JSON array of objects with keys \
\"eng\", \"zh\", optional \"type\" and optional \"confidence\" (0.0-1.0). \
Reply with [] if there is nothing noteworthy.";

/// Convert the embedded JSON few-shot example into the target format.
pub fn example_in_format(format: PairFormat) -> Result<String> {
    if format == PairFormat::Json {
        return Ok(EXAMPLE_PAIRS_JSON.trim().to_string());
    }
    let pairs = codec::deserialize(EXAMPLE_PAIRS_JSON, PairFormat::Json)?;
    Ok(codec::serialize(&pairs, format))
}

/// Build the system prompt with current terminology injected.
pub fn build_system_prompt(memory: &GlobalMemory, format: PairFormat) -> Result<String> {
    let mut prompt = String::from(
        "You are a professional bilingual subtitle editor working on \
         English-Chinese subtitles.\n\
         \n\
         TASK: For each subtitle pair below, fix transcription errors in \
         the English text and improve the Chinese translation so it is \
         accurate, natural, and consistent with the terminology. Preserve \
         all formatting tags (e.g. {\\i1}...{\\i0}) and line-break markers \
         (\\N) exactly. Keep every pair's id unchanged.\n",
    );

    if !memory.user_glossary.is_empty() {
        prompt.push_str("\nUser-defined glossary (authoritative, always follow):\n");
        for entry in &memory.user_glossary {
            prompt.push_str(&format!("- {} -> {}\n", entry.eng, entry.zh));
        }
    }

    if !memory.glossary.is_empty() {
        prompt.push_str("\nLearned terminology (follow unless it conflicts with the user glossary):\n");
        for entry in &memory.glossary {
            prompt.push_str(&format!("- {} -> {}", entry.eng, entry.zh));
            if let Some(entry_type) = &entry.entry_type {
                prompt.push_str(&format!(" [{}]", entry_type));
            }
            prompt.push('\n');
        }
    }

    prompt.push_str(&format!(
        "\nOUTPUT: Reply with ONLY the corrected pairs in {} format, \
         with no commentary. Example of the expected shape:\n\n{}\n",
        format.name(),
        example_in_format(format)?
    ));

    Ok(prompt)
}

/// Build the user prompt wrapping one serialized chunk.
pub fn build_user_prompt_for_chunk(serialized_chunk: &str) -> String {
    format!(
        "Refine the following subtitle pairs. Return every pair, corrected, \
         in the same format:\n\n{}",
        serialized_chunk
    )
}

/// Build the user prompt for a memory-compression call.
pub fn build_memory_compression_prompt(memory: &GlobalMemory, target_tokens: usize) -> String {
    let glossary_json = serde_json::to_string_pretty(&memory.glossary)
        .unwrap_or_else(|_| "[]".to_string());

    format!(
        "Compress the following learned glossary to roughly {} tokens or \
         fewer while keeping the most useful entries:\n\n{}",
        target_tokens, glossary_json
    )
}

/// Build the user prompt for a terminology-extraction call.
pub fn build_terminology_prompt(serialized_pairs: &str) -> String {
    format!(
        "Extract recurring terminology from these corrected subtitle pairs:\n\n{}",
        serialized_pairs
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{GlossaryEntry, UserGlossaryEntry};

    #[test]
    fn test_example_converts_to_every_format() {
        let json = example_in_format(PairFormat::Json).unwrap();
        assert!(json.contains("\"eng\""));

        let xml = example_in_format(PairFormat::XmlPair).unwrap();
        assert!(xml.starts_with("<pair>"));
        assert!(xml.contains("ID=120"));

        let toml = example_in_format(PairFormat::PseudoToml).unwrap();
        assert!(toml.starts_with("[pair]"));
        assert!(toml.contains("id = 121"));
    }

    #[test]
    fn test_system_prompt_injects_glossaries() {
        let mut memory = GlobalMemory::new();
        memory.user_glossary.push(UserGlossaryEntry {
            eng: "JAG".to_string(),
            zh: "军法署".to_string(),
        });
        memory.glossary.push(GlossaryEntry {
            eng: "Admiral".to_string(),
            zh: "上将".to_string(),
            entry_type: Some("rank".to_string()),
            confidence: Some(0.9),
        });

        let prompt = build_system_prompt(&memory, PairFormat::XmlPair).unwrap();
        assert!(prompt.contains("JAG -> 军法署"));
        assert!(prompt.contains("Admiral -> 上将 [rank]"));
        assert!(prompt.contains("xml-pair"));
        assert!(prompt.contains("<pair>"));
    }

    #[test]
    fn test_system_prompt_omits_empty_glossary_sections() {
        let prompt = build_system_prompt(&GlobalMemory::new(), PairFormat::Json).unwrap();
        assert!(!prompt.contains("User-defined glossary"));
        assert!(!prompt.contains("Learned terminology"));
    }

    #[test]
    fn test_user_prompt_embeds_chunk() {
        let prompt = build_user_prompt_for_chunk("[pair]\nid = 0");
        assert!(prompt.contains("[pair]\nid = 0"));
    }
}
