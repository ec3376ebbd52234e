//! Contrastive training of the tower encoder.
//!
//! Margin-based loss over the cosine similarity of a pair: matching pairs
//! are pulled above the margin, non-matching pairs pushed below it. The
//! tower is shared, so gradients from both sides of a pair accumulate into
//! the same parameters. Mini-batch SGD, early stopping on a held-out
//! validation split, and a resumable checkpoint written after every epoch
//! that improves validation loss.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::{ApiError, Result};
use crate::features::FeatureSchema;
use crate::ml::dataset::{PairLabel, TrainingPair};
use crate::ml::encoder::{outer, TowerEncoder};
use crate::ml::snapshot::ModelSnapshot;

const NORM_EPS: f32 = 1e-12;

#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub batch_size: usize,
    pub learning_rate: f32,
    pub max_epochs: usize,
    /// Early-stopping window: epochs without validation improvement.
    pub patience: usize,
    pub margin: f32,
    /// Minimum distinct positive pairs needed to form a meaningful
    /// contrastive batch.
    pub min_positive_pairs: usize,
    /// Negatives sampled per positive during dataset generation.
    pub negative_ratio: f32,
    pub validation_fraction: f32,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            learning_rate: 1e-2,
            max_epochs: 50,
            patience: 5,
            margin: 0.5,
            min_positive_pairs: 8,
            negative_ratio: 1.0,
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

pub struct Trainer {
    config: TrainerConfig,
    checkpoint_dir: PathBuf,
}

/// Per-layer gradient accumulators, mirroring the encoder's layer shapes.
struct Grads {
    weights: Vec<Array2<f32>>,
    biases: Vec<Array1<f32>>,
}

impl Grads {
    fn zeros_like(encoder: &TowerEncoder) -> Self {
        let weights = encoder
            .layers()
            .iter()
            .map(|l| Array2::zeros(l.weight.raw_dim()))
            .collect();
        let biases = encoder
            .layers()
            .iter()
            .map(|l| Array1::zeros(l.bias.raw_dim()))
            .collect();
        Self { weights, biases }
    }
}

impl Trainer {
    pub fn new(config: TrainerConfig, checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    /// Fit encoder parameters on the given pairs and return the best
    /// checkpoint. `version` stamps the produced snapshot; an existing
    /// checkpoint for the same version and schema is resumed.
    pub fn train(
        &self,
        pairs: &[TrainingPair],
        schema: &FeatureSchema,
        version: u64,
    ) -> Result<ModelSnapshot> {
        let positives = pairs
            .iter()
            .filter(|p| p.label == PairLabel::Match)
            .count();
        if positives < self.config.min_positive_pairs {
            return Err(ApiError::InsufficientData(format!(
                "{positives} distinct positive pairs, need at least {}",
                self.config.min_positive_pairs
            )));
        }
        if pairs.len() < 2 {
            return Err(ApiError::InsufficientData(
                "need at least one training and one validation pair".to_string(),
            ));
        }

        // Deterministic train/validation split.
        let mut indices: Vec<usize> = (0..pairs.len()).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(self.config.seed));
        let val_len = ((pairs.len() as f32 * self.config.validation_fraction).round() as usize)
            .clamp(1, pairs.len() - 1);
        let (val_indices, train_indices) = indices.split_at(val_len);

        // Resume from a checkpoint of the same run if one exists; a
        // checkpoint from an older model version is ignored.
        let resumed = ModelSnapshot::load_latest(&self.checkpoint_dir).filter(|s| {
            s.version == version
                && s.schema_version == schema.version
                && s.encoder.input_dim() == schema.dimension()
        });

        let (mut encoder, mut best_val_loss, start_epoch, mut best_snapshot) = match resumed {
            Some(snapshot) => {
                info!(
                    "Resuming training from checkpoint at epoch {} (val loss {:.4})",
                    snapshot.epoch, snapshot.best_val_loss
                );
                (
                    snapshot.encoder.clone(),
                    snapshot.best_val_loss,
                    snapshot.epoch + 1,
                    Some(snapshot),
                )
            }
            None => (
                TowerEncoder::new(schema.dimension(), self.config.seed),
                f32::INFINITY,
                0,
                None,
            ),
        };

        let mut patience_counter = 0usize;
        let batch_size = self.config.batch_size.max(1);

        for epoch in start_epoch..self.config.max_epochs {
            // Epoch shuffling is keyed on (seed, epoch) so resuming a run
            // reproduces the same batch order.
            let mut epoch_rng =
                StdRng::seed_from_u64(self.config.seed ^ (epoch as u64 + 1).wrapping_mul(0x9e37));
            let mut order = train_indices.to_vec();
            order.shuffle(&mut epoch_rng);

            let mut train_loss_sum = 0.0f32;
            let mut batches = 0usize;

            for chunk in order.chunks(batch_size) {
                let mut grads = Grads::zeros_like(&encoder);
                let mut batch_loss = 0.0f32;
                for &idx in chunk {
                    batch_loss += pair_loss(
                        &encoder,
                        &pairs[idx],
                        self.config.margin,
                        Some(&mut grads),
                    );
                }
                let batch_loss = batch_loss / chunk.len() as f32;
                if !batch_loss.is_finite() {
                    return Err(ApiError::Divergence(format!(
                        "non-finite training loss in epoch {epoch}"
                    )));
                }

                let scale = self.config.learning_rate / chunk.len() as f32;
                for (layer, (gw, gb)) in encoder
                    .layers_mut()
                    .iter_mut()
                    .zip(grads.weights.iter().zip(grads.biases.iter()))
                {
                    layer.weight.scaled_add(-scale, gw);
                    layer.bias.scaled_add(-scale, gb);
                }

                train_loss_sum += batch_loss;
                batches += 1;
            }

            let train_loss = train_loss_sum / batches.max(1) as f32;
            let val_loss = self.evaluate(&encoder, pairs, val_indices)?;

            info!(
                "Epoch {}/{} - Train Loss: {:.4} - Val Loss: {:.4}",
                epoch + 1,
                self.config.max_epochs,
                train_loss,
                val_loss
            );

            if val_loss < best_val_loss {
                best_val_loss = val_loss;
                patience_counter = 0;
                let snapshot = ModelSnapshot::new(
                    version,
                    schema.version,
                    encoder.clone(),
                    epoch,
                    val_loss,
                );
                snapshot.save(&self.checkpoint_dir)?;
                best_snapshot = Some(snapshot);
            } else {
                patience_counter += 1;
                if patience_counter >= self.config.patience {
                    info!("Early stopping triggered after epoch {}", epoch + 1);
                    break;
                }
            }
        }

        best_snapshot.ok_or_else(|| {
            warn!("Training loop produced no checkpoint");
            ApiError::InternalError("training produced no checkpoint".to_string())
        })
    }

    fn evaluate(
        &self,
        encoder: &TowerEncoder,
        pairs: &[TrainingPair],
        val_indices: &[usize],
    ) -> Result<f32> {
        let mut sum = 0.0f32;
        for &idx in val_indices {
            sum += pair_loss(encoder, &pairs[idx], self.config.margin, None);
        }
        let val_loss = sum / val_indices.len().max(1) as f32;
        if !val_loss.is_finite() {
            return Err(ApiError::Divergence(
                "non-finite validation loss".to_string(),
            ));
        }
        Ok(val_loss)
    }
}

/// Loss for one pair; when `grads` is given, accumulates parameter
/// gradients for both sides of the pair into it.
///
/// With label y and similarity s:
///   loss = y * relu(margin - s) + (1 - y) * relu(s - margin)
fn pair_loss(
    encoder: &TowerEncoder,
    pair: &TrainingPair,
    margin: f32,
    grads: Option<&mut Grads>,
) -> f32 {
    let trace_a = encoder.trace(&pair.features_a.values);
    let trace_b = encoder.trace(&pair.features_b.values);

    let norm_a = trace_a.output.dot(&trace_a.output).sqrt().max(NORM_EPS);
    let norm_b = trace_b.output.dot(&trace_b.output).sqrt().max(NORM_EPS);
    let e_a = &trace_a.output / norm_a;
    let e_b = &trace_b.output / norm_b;
    let s = e_a.dot(&e_b);
    // f32::max would swallow a NaN similarity, so divergence must be
    // detected before the hinge terms.
    if !s.is_finite() {
        return f32::NAN;
    }

    let y = pair.label.as_target();
    let loss = y * (margin - s).max(0.0) + (1.0 - y) * (s - margin).max(0.0);

    if let Some(grads) = grads {
        // Subgradient of the hinge terms with respect to s.
        let dl_ds = if pair.label == PairLabel::Match {
            if margin - s > 0.0 {
                -1.0
            } else {
                0.0
            }
        } else if s - margin > 0.0 {
            1.0
        } else {
            0.0
        };

        if dl_ds != 0.0 {
            // d s / d u for e = u / ||u||: (e_other - s * e_self) / ||u||.
            let g_a = (&e_b - &(&e_a * s)) * (dl_ds / norm_a);
            let g_b = (&e_a - &(&e_b * s)) * (dl_ds / norm_b);
            backprop(encoder, &trace_a, g_a, grads);
            backprop(encoder, &trace_b, g_b, grads);
        }
    }

    loss
}

/// Standard MLP backward pass; ReLU between all layers except the final
/// projection, matching the encoder's forward.
fn backprop(
    encoder: &TowerEncoder,
    trace: &crate::ml::encoder::ForwardTrace,
    mut g: Array1<f32>,
    grads: &mut Grads,
) {
    for i in (0..encoder.layers().len()).rev() {
        grads.weights[i] += &outer(&g, &trace.inputs[i]);
        grads.biases[i] += &g;
        if i > 0 {
            g = encoder.layers()[i].weight.t().dot(&g);
            // The input to layer i was relu(pre_activations[i-1]).
            let mask = trace.pre_activations[i - 1].mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
            g = g * mask;
        }
    }
}
