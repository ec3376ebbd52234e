//! Training-pair generation.
//!
//! Pairs are ephemeral: regenerated from the current profiles and
//! friend-graph edges at the start of every training run. Friend edges
//! become positive pairs, seeded random sampling of unconnected users
//! produces the negatives.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::features::{build_features, FeatureSchema, FeatureVector};
use crate::models::Profile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairLabel {
    Match,
    NonMatch,
}

impl PairLabel {
    pub fn as_target(self) -> f32 {
        match self {
            PairLabel::Match => 1.0,
            PairLabel::NonMatch => 0.0,
        }
    }
}

pub struct TrainingPair {
    pub features_a: FeatureVector,
    pub features_b: FeatureVector,
    pub label: PairLabel,
}

/// Build the contrastive training set for one run.
///
/// Positive pairs are the distinct undirected friend edges among the given
/// profiles. Negatives are sampled uniformly from unconnected user pairs at
/// `negative_ratio` negatives per positive; sampling is seeded so a run is
/// reproducible.
pub fn build_training_pairs(
    profiles: &[Profile],
    friends: &HashMap<i64, BTreeSet<i64>>,
    schema: &FeatureSchema,
    negative_ratio: f32,
    seed: u64,
) -> Vec<TrainingPair> {
    let by_id: HashMap<i64, &Profile> = profiles.iter().map(|p| (p.user_id, p)).collect();

    // Feature vectors are reused across every pair a user participates in.
    let feature_cache: HashMap<i64, FeatureVector> = profiles
        .iter()
        .map(|p| (p.user_id, build_features(p, schema)))
        .collect();

    // Distinct undirected edges, both endpoints present.
    let mut positive_edges: BTreeSet<(i64, i64)> = BTreeSet::new();
    for (user_id, friend_ids) in friends {
        for friend_id in friend_ids {
            if user_id == friend_id {
                continue;
            }
            if by_id.contains_key(user_id) && by_id.contains_key(friend_id) {
                let edge = (*user_id.min(friend_id), *user_id.max(friend_id));
                positive_edges.insert(edge);
            }
        }
    }

    let mut pairs: Vec<TrainingPair> = positive_edges
        .iter()
        .map(|(a, b)| TrainingPair {
            features_a: feature_cache[a].clone(),
            features_b: feature_cache[b].clone(),
            label: PairLabel::Match,
        })
        .collect();

    let negative_target = (positive_edges.len() as f32 * negative_ratio).ceil() as usize;
    let user_ids: Vec<i64> = {
        let mut ids: Vec<i64> = by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    };

    if user_ids.len() >= 2 && negative_target > 0 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sampled = 0usize;
        // Bounded attempts so a dense friend graph cannot spin forever.
        let max_attempts = negative_target.saturating_mul(20).max(100);

        for _ in 0..max_attempts {
            if sampled >= negative_target {
                break;
            }
            let a = user_ids[rng.gen_range(0..user_ids.len())];
            let b = user_ids[rng.gen_range(0..user_ids.len())];
            if a == b {
                continue;
            }
            let edge = (a.min(b), a.max(b));
            if positive_edges.contains(&edge) {
                continue;
            }
            pairs.push(TrainingPair {
                features_a: feature_cache[&edge.0].clone(),
                features_b: feature_cache[&edge.1].clone(),
                label: PairLabel::NonMatch,
            });
            sampled += 1;
        }
    }

    debug!(
        positives = positive_edges.len(),
        total = pairs.len(),
        "built training pairs"
    );

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiles(count: i64) -> Vec<Profile> {
        (1..=count)
            .map(|user_id| {
                let mut profile = Profile::new(user_id);
                profile.industry = "technology".to_string();
                profile.skills = vec![format!("skill-{user_id}")];
                profile
            })
            .collect()
    }

    fn friend_graph(edges: &[(i64, i64)]) -> HashMap<i64, BTreeSet<i64>> {
        let mut graph: HashMap<i64, BTreeSet<i64>> = HashMap::new();
        for (a, b) in edges {
            graph.entry(*a).or_default().insert(*b);
            graph.entry(*b).or_default().insert(*a);
        }
        graph
    }

    #[test]
    fn test_positive_pairs_are_distinct_edges() {
        let pairs = build_training_pairs(
            &profiles(4),
            // Both directions of the same edge must collapse into one pair.
            &friend_graph(&[(1, 2), (2, 1), (3, 4)]),
            &FeatureSchema::default(),
            0.0,
            42,
        );

        let positives = pairs
            .iter()
            .filter(|p| p.label == PairLabel::Match)
            .count();
        assert_eq!(positives, 2);
    }

    #[test]
    fn test_negative_sampling_respects_ratio() {
        let pairs = build_training_pairs(
            &profiles(10),
            &friend_graph(&[(1, 2), (3, 4)]),
            &FeatureSchema::default(),
            2.0,
            42,
        );

        let negatives = pairs
            .iter()
            .filter(|p| p.label == PairLabel::NonMatch)
            .count();
        assert_eq!(negatives, 4);
    }

    #[test]
    fn test_sampling_is_reproducible() {
        let schema = FeatureSchema::default();
        let graph = friend_graph(&[(1, 2)]);
        let a = build_training_pairs(&profiles(8), &graph, &schema, 3.0, 7);
        let b = build_training_pairs(&profiles(8), &graph, &schema, 3.0, 7);

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.label, y.label);
            assert_eq!(x.features_a.values.to_vec(), y.features_a.values.to_vec());
        }
    }

    #[test]
    fn test_edges_to_missing_profiles_are_skipped() {
        let pairs = build_training_pairs(
            &profiles(2),
            &friend_graph(&[(1, 2), (1, 99)]),
            &FeatureSchema::default(),
            0.0,
            42,
        );
        assert_eq!(pairs.len(), 1);
    }
}
