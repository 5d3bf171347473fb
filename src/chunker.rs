use tracing::{debug, info};

use crate::codec::{self, PairFormat};
use crate::config::RefineConfig;
use crate::error::{RefineError, Result};
use crate::pair::SubtitlePair;
use crate::tokens::estimate_tokens;

/// Chunk partitioning policy. The two policies are mutually exclusive;
/// a configured fixed count wins over token budgeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPolicy {
    /// Exactly N pairs per chunk, remainder in the last chunk.
    FixedCount(usize),
    /// Grow chunks while the serialized estimate plus the shared prompt
    /// overhead stays under the soft limit.
    TokenBudget { soft_limit: usize },
}

impl ChunkPolicy {
    pub fn from_config(refine: &RefineConfig) -> Result<Self> {
        match refine.pairs_per_chunk {
            Some(0) => Err(RefineError::Config(
                "pairs_per_chunk must be at least 1".to_string(),
            )),
            Some(n) => Ok(Self::FixedCount(n)),
            None => Ok(Self::TokenBudget {
                soft_limit: refine.chunk_token_soft_limit,
            }),
        }
    }
}

/// Partition pairs into ordered chunks.
///
/// `base_prompt_tokens` is the caller's estimate of the system prompt plus
/// current memory; it grows over a run, so callers recompute it before
/// every chunking call rather than caching it here.
pub fn chunk_pairs(
    pairs: &[SubtitlePair],
    policy: &ChunkPolicy,
    format: PairFormat,
    model: &str,
    base_prompt_tokens: usize,
) -> Result<Vec<Vec<SubtitlePair>>> {
    let chunks = match *policy {
        ChunkPolicy::FixedCount(n) => {
            if n < 1 {
                return Err(RefineError::Config(
                    "pairs_per_chunk must be at least 1".to_string(),
                ));
            }
            pairs.chunks(n).map(|c| c.to_vec()).collect()
        }
        ChunkPolicy::TokenBudget { soft_limit } => {
            chunk_by_tokens(pairs, format, model, base_prompt_tokens, soft_limit)
        }
    };

    debug!(
        "Partitioned {} pairs into {} chunks ({:?})",
        pairs.len(),
        count_pairs(&chunks),
        policy
    );

    Ok(chunks)
}

fn chunk_by_tokens(
    pairs: &[SubtitlePair],
    format: PairFormat,
    model: &str,
    base_prompt_tokens: usize,
    soft_limit: usize,
) -> Vec<Vec<SubtitlePair>> {
    let mut chunks: Vec<Vec<SubtitlePair>> = Vec::new();
    let mut current: Vec<SubtitlePair> = Vec::new();

    for pair in pairs {
        let mut candidate = current.clone();
        candidate.push(pair.clone());

        let serialized = codec::serialize(&candidate, format);
        let candidate_tokens = estimate_tokens(&serialized, model) + base_prompt_tokens;

        if candidate_tokens <= soft_limit || current.is_empty() {
            // A single pair over the limit still ships alone; an empty
            // chunk is never produced.
            current = candidate;
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push(pair.clone());
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn count_pairs(chunks: &[Vec<SubtitlePair>]) -> usize {
    chunks.iter().map(Vec::len).sum()
}

/// Log a short per-chunk token summary.
pub fn log_chunk_statistics(chunks: &[Vec<SubtitlePair>], format: PairFormat, model: &str) {
    info!("Created {} chunks ({} pairs)", chunks.len(), count_pairs(chunks));
    for (i, chunk) in chunks.iter().enumerate() {
        let serialized = codec::serialize(chunk, format);
        debug!(
            "Chunk {}/{}: {} pairs, ~{} tokens",
            i + 1,
            chunks.len(),
            chunk.len(),
            estimate_tokens(&serialized, model)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pairs(count: usize) -> Vec<SubtitlePair> {
        (0..count)
            .map(|i| {
                SubtitlePair::new(
                    i as i64,
                    format!("English line number {}", i),
                    format!("中文行{}", i),
                )
            })
            .collect()
    }

    #[test]
    fn test_fixed_count_250_by_100_yields_100_100_50() {
        let pairs = make_pairs(250);
        let chunks = chunk_pairs(
            &pairs,
            &ChunkPolicy::FixedCount(100),
            PairFormat::Json,
            "gpt-5-mini",
            0,
        )
        .unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn test_fixed_count_zero_is_rejected() {
        let refine = RefineConfig {
            pairs_per_chunk: Some(0),
            ..crate::config::Config::default().refine
        };
        assert!(ChunkPolicy::from_config(&refine).is_err());
    }

    #[test]
    fn test_policy_selection_prefers_fixed_count() {
        let refine = RefineConfig {
            pairs_per_chunk: Some(50),
            ..crate::config::Config::default().refine
        };
        assert_eq!(
            ChunkPolicy::from_config(&refine).unwrap(),
            ChunkPolicy::FixedCount(50)
        );

        let refine = RefineConfig {
            pairs_per_chunk: None,
            chunk_token_soft_limit: 4_000,
            ..crate::config::Config::default().refine
        };
        assert_eq!(
            ChunkPolicy::from_config(&refine).unwrap(),
            ChunkPolicy::TokenBudget { soft_limit: 4_000 }
        );
    }

    #[test]
    fn test_token_budget_never_emits_empty_chunk() {
        let pairs = make_pairs(5);
        // Limit far below a single pair's estimate
        let chunks = chunk_pairs(
            &pairs,
            &ChunkPolicy::TokenBudget { soft_limit: 1 },
            PairFormat::Json,
            "gpt-5-mini",
            0,
        )
        .unwrap();

        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_token_budget_respects_base_prompt_overhead() {
        let pairs = make_pairs(10);
        let generous = chunk_pairs(
            &pairs,
            &ChunkPolicy::TokenBudget { soft_limit: 10_000 },
            PairFormat::Json,
            "gpt-5-mini",
            0,
        )
        .unwrap();
        assert_eq!(generous.len(), 1);

        // The same limit with most of it eaten by prompt overhead
        // produces more, smaller chunks.
        let tight = chunk_pairs(
            &pairs,
            &ChunkPolicy::TokenBudget { soft_limit: 10_000 },
            PairFormat::Json,
            "gpt-5-mini",
            9_970,
        )
        .unwrap();
        assert!(tight.len() > 1);
    }

    #[test]
    fn test_chunks_preserve_order_and_tolerate_id_gaps() {
        let mut pairs = make_pairs(6);
        pairs.remove(2);
        let chunks = chunk_pairs(
            &pairs,
            &ChunkPolicy::FixedCount(2),
            PairFormat::Json,
            "gpt-5-mini",
            0,
        )
        .unwrap();

        let flat: Vec<i64> = chunks.iter().flatten().map(|p| p.id).collect();
        assert_eq!(flat, vec![0, 1, 3, 4, 5]);
    }

    #[test]
    fn test_empty_input_produces_no_chunks() {
        let chunks = chunk_pairs(
            &[],
            &ChunkPolicy::TokenBudget { soft_limit: 100 },
            PairFormat::Json,
            "gpt-5-mini",
            0,
        )
        .unwrap();
        assert!(chunks.is_empty());
    }
}
