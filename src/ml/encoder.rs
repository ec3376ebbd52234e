//! Shared-weight tower encoder mapping feature vectors to unit-normalized
//! embeddings.
//!
//! Both "towers" of the twin-tower model are this one function applied to
//! two inputs, so symmetry of the similarity holds by construction and
//! there is no duplicate parameter state to keep in sync.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::features::FeatureVector;

/// Output dimension of the tower.
pub const EMBEDDING_DIM: usize = 128;

/// Hidden layer widths, decreasing toward the embedding space. Tunable, not
/// part of the encoder contract.
const HIDDEN_DIMS: [usize; 3] = [512, 256, 128];

/// Guard against division by zero when normalizing a degenerate output.
const NORM_EPS: f32 = 1e-12;

/// One fully-connected layer: y = Wx + b.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    /// [out_features, in_features]
    pub(crate) weight: Array2<f32>,
    /// [out_features]
    pub(crate) bias: Array1<f32>,
}

impl DenseLayer {
    /// Xavier-uniform initialization: U(-sqrt(6/(in+out)), sqrt(6/(in+out))).
    fn xavier(in_features: usize, out_features: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (in_features + out_features) as f64).sqrt();
        let weight = Array2::from_shape_fn((out_features, in_features), |_| {
            rng.gen_range(-limit..limit) as f32
        });
        let bias = Array1::zeros(out_features);
        Self { weight, bias }
    }

    fn forward(&self, input: &Array1<f32>) -> Array1<f32> {
        self.weight.dot(input) + &self.bias
    }
}

/// Per-layer activations recorded during a forward pass, consumed by the
/// trainer's backward pass.
pub struct ForwardTrace {
    /// Input to each layer, in forward order.
    pub inputs: Vec<Array1<f32>>,
    /// Pre-activation output of each layer.
    pub pre_activations: Vec<Array1<f32>>,
    /// Raw (pre-normalization) tower output.
    pub output: Array1<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TowerEncoder {
    layers: Vec<DenseLayer>,
    input_dim: usize,
}

impl TowerEncoder {
    /// Build a fresh tower with seeded initialization. The stack is
    /// input -> 512 -> 256 -> 128 with ReLU between layers, plus a final
    /// linear projection into the embedding space.
    pub fn new(input_dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut layers = Vec::with_capacity(HIDDEN_DIMS.len() + 1);

        let mut prev = input_dim;
        for hidden in HIDDEN_DIMS {
            layers.push(DenseLayer::xavier(prev, hidden, &mut rng));
            prev = hidden;
        }
        layers.push(DenseLayer::xavier(prev, EMBEDDING_DIM, &mut rng));

        Self { layers, input_dim }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn embedding_dim(&self) -> usize {
        EMBEDDING_DIM
    }

    pub(crate) fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [DenseLayer] {
        &mut self.layers
    }

    /// Raw tower output before normalization. ReLU after every layer except
    /// the final projection.
    fn raw_forward(&self, input: &Array1<f32>) -> Array1<f32> {
        let last = self.layers.len() - 1;
        let mut activation = input.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            activation = layer.forward(&activation);
            if i < last {
                activation.mapv_inplace(|v| v.max(0.0));
            }
        }
        activation
    }

    /// Forward pass that records per-layer activations for backprop.
    pub(crate) fn trace(&self, input: &Array1<f32>) -> ForwardTrace {
        let last = self.layers.len() - 1;
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pre_activations = Vec::with_capacity(self.layers.len());

        let mut activation = input.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            inputs.push(activation.clone());
            let pre = layer.forward(&activation);
            pre_activations.push(pre.clone());
            activation = if i < last {
                pre.mapv(|v| v.max(0.0))
            } else {
                pre
            };
        }

        ForwardTrace {
            inputs,
            pre_activations,
            output: activation,
        }
    }

    /// Encode a feature vector into a unit-normalized embedding.
    pub fn encode(&self, features: &FeatureVector) -> Array1<f32> {
        normalize(&self.raw_forward(&features.values))
    }
}

/// L2-normalize a raw tower output.
pub fn normalize(raw: &Array1<f32>) -> Array1<f32> {
    let norm = raw.dot(raw).sqrt().max(NORM_EPS);
    raw / norm
}

/// Cosine similarity of two unit-normalized embeddings reduces to their dot
/// product. Symmetric, and 1.0 for identical inputs.
pub fn sim(e1: &Array1<f32>, e2: &Array1<f32>) -> f32 {
    e1.dot(e2)
}

/// Outer product g * a^T, used for weight gradients.
pub(crate) fn outer(g: &Array1<f32>, a: &Array1<f32>) -> Array2<f32> {
    let g_col = g.clone().insert_axis(Axis(1));
    let a_row = a.clone().insert_axis(Axis(0));
    g_col.dot(&a_row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{build_features, FeatureSchema};
    use crate::models::Profile;

    fn schema() -> FeatureSchema {
        FeatureSchema::default()
    }

    fn sample_features(user_id: i64, industry: &str) -> FeatureVector {
        let mut profile = Profile::new(user_id);
        profile.industry = industry.to_string();
        profile.role = "Software Engineer".to_string();
        profile.skills = vec!["rust".to_string()];
        profile.goals = "build developer tools".to_string();
        build_features(&profile, &schema())
    }

    #[test]
    fn test_encode_is_unit_normalized() {
        let encoder = TowerEncoder::new(schema().dimension(), 42);
        let embedding = encoder.encode(&sample_features(1, "technology"));

        assert_eq!(embedding.len(), EMBEDDING_DIM);
        let norm = embedding.dot(&embedding).sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn test_self_similarity_is_one() {
        let encoder = TowerEncoder::new(schema().dimension(), 42);
        let embedding = encoder.encode(&sample_features(1, "technology"));
        assert!((sim(&embedding, &embedding) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let encoder = TowerEncoder::new(schema().dimension(), 42);
        let a = encoder.encode(&sample_features(1, "technology"));
        let b = encoder.encode(&sample_features(2, "finance"));
        assert!((sim(&a, &b) - sim(&b, &a)).abs() < 1e-7);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let encoder = TowerEncoder::new(schema().dimension(), 42);
        let features = sample_features(1, "technology");
        let a = encoder.encode(&features);
        let b = encoder.encode(&features);
        assert_eq!(a.to_vec(), b.to_vec());
    }

    #[test]
    fn test_seeded_init_is_reproducible() {
        let a = TowerEncoder::new(schema().dimension(), 7);
        let b = TowerEncoder::new(schema().dimension(), 7);
        let features = sample_features(1, "technology");
        assert_eq!(a.encode(&features).to_vec(), b.encode(&features).to_vec());
    }

    #[test]
    fn test_similarity_bounded() {
        let encoder = TowerEncoder::new(schema().dimension(), 42);
        let a = encoder.encode(&sample_features(1, "technology"));
        let b = encoder.encode(&sample_features(2, "healthcare"));
        let s = sim(&a, &b);
        assert!((-1.0 - 1e-5..=1.0 + 1e-5).contains(&s));
    }
}
