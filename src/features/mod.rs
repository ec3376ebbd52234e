//! Deterministic profile -> feature-vector transform.
//!
//! The pipeline is a pure function of (profile content, schema version):
//! identical inputs produce bit-identical output. Text is embedded with a
//! hashed bag-of-words projection so the transform needs no external model
//! and stays reproducible across runs.

use ndarray::Array1;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::models::Profile;

/// Dimension of the hashed text embedding block.
pub const TEXT_DIM: usize = 384;
/// Dimension of the normalized numeric block.
pub const NUMERIC_DIM: usize = 2;

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9']+").expect("valid token pattern"));

static INDUSTRY_BUCKETS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    vec![
        "technology",
        "healthcare",
        "finance",
        "education",
        "retail",
        "energy",
        "manufacturing",
        "media",
        "transportation",
    ]
});

const ROLE_BUCKETS: usize = 5;

/// Versioned layout of the feature vector. An encoder trained against one
/// schema version cannot interpret vectors produced by another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    /// Free text longer than this many characters is truncated before
    /// hashing to bound per-request latency.
    pub text_cap: usize,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self {
            version: 1,
            text_cap: 2000,
        }
    }
}

impl FeatureSchema {
    /// Total feature dimension: hashed text + numeric + one-hot categorical.
    pub fn dimension(&self) -> usize {
        TEXT_DIM + NUMERIC_DIM + (INDUSTRY_BUCKETS.len() + 1) + ROLE_BUCKETS
    }
}

/// Derived feature vector, tied to the schema version that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_version: u32,
    pub values: Array1<f32>,
}

/// Build the feature vector for a profile. Pure and deterministic; unknown
/// categorical values land in the reserved "other" bucket instead of
/// failing.
pub fn build_features(profile: &Profile, schema: &FeatureSchema) -> FeatureVector {
    let mut values = Vec::with_capacity(schema.dimension());

    values.extend_from_slice(&text_block(profile, schema));
    values.extend_from_slice(&numeric_block(profile));
    values.extend_from_slice(&industry_block(&profile.industry));
    values.extend_from_slice(&role_block(&profile.role));

    debug_assert_eq!(values.len(), schema.dimension());

    FeatureVector {
        schema_version: schema.version,
        values: Array1::from_vec(values),
    }
}

/// Hashed bag-of-words embedding over the concatenated free-text fields.
fn text_block(profile: &Profile, schema: &FeatureSchema) -> Vec<f32> {
    let joined = format!(
        "{} {} {}",
        profile.role,
        profile.skills.join(" "),
        profile.goals
    )
    .to_lowercase();

    // Char-boundary safe truncation.
    let capped: String = joined.chars().take(schema.text_cap).collect();

    let mut block = vec![0.0f32; TEXT_DIM];
    for token in TOKEN_PATTERN.find_iter(&capped) {
        let hash = fnv1a(token.as_str().as_bytes());
        let bucket = ((hash >> 1) % TEXT_DIM as u64) as usize;
        let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
        block[bucket] += sign;
    }

    l2_normalize(&mut block);
    block
}

fn numeric_block(profile: &Profile) -> Vec<f32> {
    let mut block = vec![profile.projects.len() as f32, profile.skills.len() as f32];
    l2_normalize(&mut block);
    block
}

fn industry_block(industry: &str) -> Vec<f32> {
    let mut block = vec![0.0f32; INDUSTRY_BUCKETS.len() + 1];
    let needle = industry.trim().to_lowercase();
    let slot = INDUSTRY_BUCKETS
        .iter()
        .position(|b| *b == needle)
        // Reserved "other" bucket for unknown or missing values.
        .unwrap_or(INDUSTRY_BUCKETS.len());
    block[slot] = 1.0;
    block
}

fn role_block(role: &str) -> Vec<f32> {
    let mut block = vec![0.0f32; ROLE_BUCKETS];
    let needle = role.trim().to_lowercase();

    let slot = if ["engineer", "developer", "cto", "technical"]
        .iter()
        .any(|kw| needle.contains(kw))
    {
        0
    } else if needle.contains("product") {
        1
    } else if needle.contains("design") {
        2
    } else if ["founder", "ceo", "business", "sales", "marketing", "operations"]
        .iter()
        .any(|kw| needle.contains(kw))
    {
        3
    } else {
        // Reserved "other" bucket.
        4
    };

    block[slot] = 1.0;
    block
}

/// FNV-1a. Implemented here so token bucketing never depends on `std`
/// hasher internals, which are not stable across releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> Profile {
        let mut profile = Profile::new(1);
        profile.industry = "Technology".to_string();
        profile.role = "Software Engineer".to_string();
        profile.location = "New York, USA".to_string();
        profile.skills = vec!["rust".to_string(), "ml".to_string()];
        profile.goals = "Build a developer tools startup".to_string();
        profile.projects = [10, 11].into_iter().collect();
        profile
    }

    #[test]
    fn test_build_features_deterministic() {
        let schema = FeatureSchema::default();
        let profile = sample_profile();

        let a = build_features(&profile, &schema);
        let b = build_features(&profile, &schema);

        assert_eq!(a.schema_version, b.schema_version);
        // Bit-identical, not merely approximately equal.
        assert_eq!(a.values.to_vec(), b.values.to_vec());
    }

    #[test]
    fn test_feature_dimension() {
        let schema = FeatureSchema::default();
        let vector = build_features(&sample_profile(), &schema);
        assert_eq!(vector.values.len(), schema.dimension());
        assert_eq!(schema.dimension(), 401);
    }

    #[test]
    fn test_unknown_industry_maps_to_other_bucket() {
        let schema = FeatureSchema::default();
        let mut profile = sample_profile();
        profile.industry = "Underwater Basket Weaving".to_string();

        let vector = build_features(&profile, &schema);
        let categorical = &vector.values.as_slice().unwrap()[TEXT_DIM + NUMERIC_DIM..];

        // Last industry slot is the reserved "other" bucket.
        assert_eq!(categorical[INDUSTRY_BUCKETS.len()], 1.0);
        assert_eq!(
            categorical[..INDUSTRY_BUCKETS.len()]
                .iter()
                .filter(|v| **v != 0.0)
                .count(),
            0
        );
    }

    #[test]
    fn test_long_goals_text_is_truncated() {
        let mut schema = FeatureSchema::default();
        schema.text_cap = 64;

        let mut profile = sample_profile();
        profile.goals = "startup ".repeat(10_000);

        // Must not panic and must stay unit length.
        let vector = build_features(&profile, &schema);
        let text = &vector.values.as_slice().unwrap()[..TEXT_DIM];
        let norm = text.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_profile_does_not_fail() {
        let schema = FeatureSchema::default();
        let vector = build_features(&Profile::new(7), &schema);
        assert_eq!(vector.values.len(), schema.dimension());
        assert!(vector.values.iter().all(|v| v.is_finite()));
    }
}
