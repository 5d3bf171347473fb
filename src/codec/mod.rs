// Intermediate representation codecs
//
// This module provides the three wire formats used to ship subtitle pairs
// through the chat API via a common trait:
// - Json: standard JSON array of pair objects
// - XmlPair: repeated <pair>...</pair> blocks with KEY=value lines
// - PseudoToml: repeated [pair] sections with key = value lines

pub mod json;
pub mod pseudo_toml;
pub mod xml_pair;

use crate::error::{RefineError, Result};
use crate::pair::SubtitlePair;

/// Intermediate representation format, resolved case-insensitively by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairFormat {
    Json,
    XmlPair,
    PseudoToml,
}

impl PairFormat {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "xml-pair" => Ok(Self::XmlPair),
            "pseudo-toml" => Ok(Self::PseudoToml),
            _ => Err(RefineError::UnsupportedFormat(format!(
                "{}. Supported formats: json, xml-pair, pseudo-toml",
                name
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::XmlPair => "xml-pair",
            Self::PseudoToml => "pseudo-toml",
        }
    }

    /// Byte offset of the first format-specific structural marker, used by
    /// the recovery fallback to skip leading commentary.
    pub fn marker_index(&self, text: &str) -> Option<usize> {
        match self {
            Self::Json => {
                let bracket = text.find('[');
                let brace = text.find('{');
                match (bracket, brace) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (Some(a), None) => Some(a),
                    (None, Some(b)) => Some(b),
                    (None, None) => None,
                }
            }
            Self::XmlPair => text.find("<pair>"),
            Self::PseudoToml => text.find("[pair]"),
        }
    }
}

/// A serializer/deserializer for one intermediate format.
///
/// `serialize` is deterministic and never fails for well-formed pairs;
/// `deserialize` is strict and fails atomically with a `Format` error
/// citing the offending line or field.
pub trait PairCodec: Send + Sync {
    fn serialize(&self, pairs: &[SubtitlePair]) -> String;
    fn deserialize(&self, text: &str) -> Result<Vec<SubtitlePair>>;
}

/// Factory for creating codec instances.
pub struct CodecFactory;

impl CodecFactory {
    pub fn create(format: PairFormat) -> Box<dyn PairCodec> {
        match format {
            PairFormat::Json => Box::new(json::JsonCodec),
            PairFormat::XmlPair => Box::new(xml_pair::XmlPairCodec),
            PairFormat::PseudoToml => Box::new(pseudo_toml::PseudoTomlCodec),
        }
    }
}

/// Serialize subtitle pairs using the given format.
pub fn serialize(pairs: &[SubtitlePair], format: PairFormat) -> String {
    CodecFactory::create(format).serialize(pairs)
}

/// Deserialize text into subtitle pairs using the given format.
pub fn deserialize(text: &str, format: PairFormat) -> Result<Vec<SubtitlePair>> {
    CodecFactory::create(format).deserialize(text)
}
