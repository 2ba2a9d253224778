//! Label filtering and sparse-vector construction.

use std::collections::BTreeMap;

use crate::dictionary::Dictionary;
use crate::models::LabelScore;
use crate::vector::SparseVector;

/// Keep labels scoring at or above `threshold`, preserving input order.
///
/// Negative scores are always dropped, whatever the threshold.
pub fn filter_labels(labels: Vec<LabelScore>, threshold: i64) -> Vec<LabelScore> {
    let threshold = threshold.max(0);
    labels.into_iter().filter(|l| l.score >= threshold).collect()
}

/// Translate labels into a sparse vector over dictionary indices.
///
/// - labels with a non-positive score carry no signal and are skipped;
/// - labels missing from the dictionary are skipped with a warning;
/// - when several labels share an index the highest score is kept;
/// - indices come out sorted ascending.
pub fn build_sparse_vector(labels: &[LabelScore], dictionary: &Dictionary) -> SparseVector {
    let mut by_index: BTreeMap<u32, i64> = BTreeMap::new();

    for label in labels {
        if label.score <= 0 {
            continue;
        }
        let Some(index) = dictionary.index_of(&label.label) else {
            tracing::warn!(label = %label.label, "label not in dictionary, dropped");
            continue;
        };
        by_index
            .entry(index)
            .and_modify(|s| *s = (*s).max(label.score))
            .or_insert(label.score);
    }

    let mut sparse = SparseVector::default();
    for (index, score) in by_index {
        sparse.indices.push(index);
        sparse.values.push(score as f32);
    }
    sparse
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> Dictionary {
        Dictionary::from_entries([("rust", 7), ("tokio", 2), ("async", 2), ("db", 40)])
    }

    #[test]
    fn test_filter_keeps_threshold_and_above() {
        let labels = vec![
            LabelScore::new("a", 2),
            LabelScore::new("b", 3),
            LabelScore::new("c", 5),
        ];
        let kept = filter_labels(labels, 3);
        let names: Vec<&str> = kept.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_filter_never_keeps_negative_scores() {
        let labels = vec![
            LabelScore::new("a", -4),
            LabelScore::new("b", 0),
            LabelScore::new("c", 2),
        ];
        let kept = filter_labels(labels, -10);
        let names: Vec<&str> = kept.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_sparse_sorted_and_deduplicated() {
        let labels = vec![
            LabelScore::new("db", 4),
            LabelScore::new("tokio", 3),
            LabelScore::new("rust", 9),
            LabelScore::new("async", 6),
        ];
        let sparse = build_sparse_vector(&labels, &dict());
        assert_eq!(sparse.indices, vec![2, 7, 40]);
        assert_eq!(sparse.values, vec![6.0, 9.0, 4.0]);
    }

    #[test]
    fn test_sparse_drops_unknown_and_non_positive() {
        let labels = vec![
            LabelScore::new("unknown", 8),
            LabelScore::new("rust", 0),
            LabelScore::new("db", -1),
        ];
        let sparse = build_sparse_vector(&labels, &dict());
        assert!(sparse.is_empty());
    }
}
