use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One aligned English/Chinese subtitle line identified by an integer id.
///
/// Ids are unique within a document but not necessarily contiguous; two
/// pairs refer to the same subtitle slot iff their ids match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitlePair {
    pub id: i64,
    /// English text (wire label `eng`).
    pub source: String,
    /// Chinese text (wire label `chinese`).
    pub target: String,
}

impl SubtitlePair {
    pub fn new(id: i64, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Collect ids that occur more than once, in first-appearance order.
pub fn duplicate_ids(pairs: &[SubtitlePair]) -> Vec<i64> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for pair in pairs {
        *counts.entry(pair.id).or_insert(0) += 1;
    }

    let mut seen = HashSet::new();
    pairs
        .iter()
        .filter(|p| counts[&p.id] > 1 && seen.insert(p.id))
        .map(|p| p.id)
        .collect()
}

/// Resolve duplicate ids in a decoded chunk.
///
/// Later entries supersede earlier ones (a model correcting itself
/// mid-response emits the fix last), so the LAST occurrence of each id
/// wins, while the output keeps the order in which each id first appeared.
pub fn dedupe_keep_last(pairs: Vec<SubtitlePair>) -> Vec<SubtitlePair> {
    let mut last: HashMap<i64, SubtitlePair> = HashMap::new();
    for pair in &pairs {
        last.insert(pair.id, pair.clone());
    }

    let mut seen = HashSet::new();
    pairs
        .into_iter()
        .filter(|p| seen.insert(p.id))
        .map(|p| last[&p.id].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(id: i64, source: &str) -> SubtitlePair {
        SubtitlePair::new(id, source, "")
    }

    #[test]
    fn test_duplicate_ids_detection() {
        let pairs = vec![pair(0, "a"), pair(1, "b"), pair(0, "c"), pair(2, "d")];
        assert_eq!(duplicate_ids(&pairs), vec![0]);

        let unique = vec![pair(0, "a"), pair(1, "b")];
        assert!(duplicate_ids(&unique).is_empty());
    }

    #[test]
    fn test_dedupe_keeps_last_occurrence_in_first_appearance_order() {
        let pairs = vec![
            pair(0, "first-0"),
            pair(1, "first-1"),
            pair(0, "last-0"),
            pair(2, "only-2"),
            pair(1, "last-1"),
        ];

        let deduped = dedupe_keep_last(pairs);
        assert_eq!(deduped.len(), 3);
        assert_eq!(
            deduped.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(deduped[0].source, "last-0");
        assert_eq!(deduped[1].source, "last-1");
        assert_eq!(deduped[2].source, "only-2");
    }

    #[test]
    fn test_dedupe_without_duplicates_is_identity() {
        let pairs = vec![pair(5, "a"), pair(9, "b")];
        assert_eq!(dedupe_keep_last(pairs.clone()), pairs);
    }
}
