//! In-memory embedding index: one embedding per user, exact brute-force
//! top-K similarity queries.
//!
//! The live content is an immutable snapshot behind `RwLock<Arc<_>>`.
//! Readers clone the `Arc` and scan without holding the lock, so queries
//! never observe a half-written entry. Mutations copy-on-write and publish
//! through a single pointer swap; `rebuild` replaces the whole snapshot
//! atomically. Brute-force scan is exact and O(n) per query — adequate at
//! this population size; an approximate backend would be a documented
//! configuration choice, not a silent change in behavior.

use ndarray::Array1;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Index content at one point in time. Tagged with the model version that
/// produced its vectors; mixing versions across entries is impossible by
/// construction.
#[derive(Debug, Clone, Default)]
struct IndexSnapshot {
    model_version: u64,
    entries: HashMap<i64, Arc<Array1<f32>>>,
}

#[derive(Debug, Default)]
pub struct EmbeddingIndex {
    inner: RwLock<Arc<IndexSnapshot>>,
}

impl EmbeddingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.inner.read().expect("index lock poisoned").clone()
    }

    /// Model version that produced the current content; 0 before the first
    /// rebuild.
    pub fn model_version(&self) -> u64 {
        self.snapshot().model_version
    }

    pub fn len(&self) -> usize {
        self.snapshot().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace the embedding for a user. The entry is superseded,
    /// never mutated in place.
    pub fn upsert(&self, user_id: i64, embedding: Array1<f32>) {
        let mut guard = self.inner.write().expect("index lock poisoned");
        // Copy-on-write: in-place when no reader holds the snapshot,
        // cloned otherwise.
        let snapshot = Arc::make_mut(&mut guard);
        snapshot.entries.insert(user_id, Arc::new(embedding));
    }

    /// Delete a user's entry; subsequent queries never return the id.
    pub fn remove(&self, user_id: i64) {
        let mut guard = self.inner.write().expect("index lock poisoned");
        let snapshot = Arc::make_mut(&mut guard);
        snapshot.entries.remove(&user_id);
    }

    /// Atomically replace the entire index content. All-or-nothing: readers
    /// see either the previous snapshot or the new one in full.
    pub fn rebuild(&self, entries: Vec<(i64, Array1<f32>)>, model_version: u64) {
        let entries: HashMap<i64, Arc<Array1<f32>>> = entries
            .into_iter()
            .map(|(id, e)| (id, Arc::new(e)))
            .collect();
        debug!(
            model_version,
            count = entries.len(),
            "rebuilding embedding index"
        );

        let fresh = Arc::new(IndexSnapshot {
            model_version,
            entries,
        });
        *self.inner.write().expect("index lock poisoned") = fresh;
    }

    /// Top-k most similar entries to `embedding`, descending score with
    /// ties broken by ascending user id. `for_user` and every id in
    /// `exclude` never appear in the result.
    pub fn query(
        &self,
        for_user: i64,
        embedding: &Array1<f32>,
        k: usize,
        exclude: &HashSet<i64>,
    ) -> Vec<(i64, f32)> {
        let snapshot = self.snapshot();

        let mut scored: Vec<(i64, f32)> = snapshot
            .entries
            .iter()
            .filter(|(id, _)| **id != for_user && !exclude.contains(id))
            .map(|(id, entry)| (*id, embedding.dot(entry.as_ref())))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(coords: &[f32]) -> Array1<f32> {
        let v = Array1::from_vec(coords.to_vec());
        let norm = v.dot(&v).sqrt();
        v / norm
    }

    fn populated() -> EmbeddingIndex {
        let index = EmbeddingIndex::new();
        index.rebuild(
            vec![
                (1, unit(&[1.0, 0.0, 0.0])),
                (2, unit(&[0.9, 0.1, 0.0])),
                (3, unit(&[0.0, 1.0, 0.0])),
                (4, unit(&[0.0, 0.0, 1.0])),
            ],
            1,
        );
        index
    }

    #[test]
    fn test_query_never_returns_own_id() {
        let index = populated();
        let results = index.query(1, &unit(&[1.0, 0.0, 0.0]), 10, &HashSet::new());
        assert!(results.iter().all(|(id, _)| *id != 1));
    }

    #[test]
    fn test_query_respects_exclusion_set() {
        let index = populated();
        let exclude: HashSet<i64> = [2, 3].into_iter().collect();
        let results = index.query(1, &unit(&[1.0, 0.0, 0.0]), 10, &exclude);
        assert_eq!(results.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_query_sorted_descending_with_id_tie_break() {
        let index = EmbeddingIndex::new();
        // 20 and 10 are equidistant; ascending id must win the tie.
        index.rebuild(
            vec![
                (20, unit(&[0.0, 1.0])),
                (10, unit(&[0.0, 1.0])),
                (5, unit(&[1.0, 0.0])),
            ],
            1,
        );

        let results = index.query(99, &unit(&[0.0, 1.0]), 3, &HashSet::new());
        assert_eq!(
            results.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec![10, 20, 5]
        );
    }

    #[test]
    fn test_query_truncates_to_k() {
        let index = populated();
        let results = index.query(99, &unit(&[1.0, 0.0, 0.0]), 2, &HashSet::new());
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_upsert_replaces_prior_embedding() {
        let index = populated();
        index.upsert(3, unit(&[1.0, 0.0, 0.0]));
        index.upsert(3, unit(&[0.0, 0.0, 1.0]));

        let results = index.query(99, &unit(&[0.0, 0.0, 1.0]), 1, &HashSet::new());
        // Only the second value is visible.
        assert_eq!(results[0].0, 3);
        assert!((results[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_remove_deletes_entry() {
        let index = populated();
        index.remove(2);
        let results = index.query(99, &unit(&[1.0, 0.0, 0.0]), 10, &HashSet::new());
        assert!(results.iter().all(|(id, _)| *id != 2));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_rebuild_replaces_all_content() {
        let index = populated();
        index.rebuild(vec![(7, unit(&[1.0, 0.0, 0.0]))], 2);

        let results = index.query(99, &unit(&[1.0, 0.0, 0.0]), 10, &HashSet::new());
        // No entries from the prior snapshot leak through.
        assert_eq!(results.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![7]);
        assert_eq!(index.model_version(), 2);
    }

    #[test]
    fn test_readers_keep_consistent_snapshot_across_rebuild() {
        let index = populated();
        let query_vec = unit(&[1.0, 0.0, 0.0]);

        // A reader holding the old snapshot is unaffected by the swap.
        let before = index.query(99, &query_vec, 10, &HashSet::new());
        index.rebuild(vec![(7, query_vec.clone())], 2);
        let after = index.query(99, &query_vec, 10, &HashSet::new());

        assert_eq!(before.len(), 4);
        assert_eq!(after.len(), 1);
    }
}
