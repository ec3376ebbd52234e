//! Versioned encoder checkpoints.
//!
//! A snapshot ties trained tower weights to the feature schema version they
//! were trained against. The embedding index is only valid when paired with
//! the snapshot whose `version` stamped it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::ml::encoder::TowerEncoder;

/// File name of the stable checkpoint used for resume.
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub snapshot_id: Uuid,
    /// Monotonic model version; bumped per retrain run.
    pub version: u64,
    /// Feature schema version the weights were trained against.
    pub schema_version: u32,
    pub encoder: TowerEncoder,
    pub epoch: usize,
    pub best_val_loss: f32,
    pub trained_at: DateTime<Utc>,
}

impl ModelSnapshot {
    pub fn new(
        version: u64,
        schema_version: u32,
        encoder: TowerEncoder,
        epoch: usize,
        best_val_loss: f32,
    ) -> Self {
        Self {
            snapshot_id: Uuid::new_v4(),
            version,
            schema_version,
            encoder,
            epoch,
            best_val_loss,
            trained_at: Utc::now(),
        }
    }

    /// Persist to the checkpoint directory: a timestamped history file plus
    /// the stable `checkpoint.json` used for resume.
    pub fn save(&self, checkpoint_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(checkpoint_dir)?;

        let payload = serde_json::to_vec(self)?;
        let timestamp = self.trained_at.format("%Y%m%d_%H%M%S");
        let history_path = checkpoint_dir.join(format!("twin_tower_{timestamp}.json"));
        fs::write(&history_path, &payload)?;

        // Write-then-rename so an interrupted save never corrupts the
        // resume checkpoint.
        let stable_path = checkpoint_dir.join(CHECKPOINT_FILE);
        let tmp_path = checkpoint_dir.join(format!("{CHECKPOINT_FILE}.tmp"));
        fs::write(&tmp_path, &payload)?;
        fs::rename(&tmp_path, &stable_path)?;

        info!("Saved checkpoint to {}", history_path.display());
        Ok(stable_path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let payload = fs::read(path).map_err(|e| {
            ApiError::ModelUnavailable(format!("cannot read checkpoint {}: {e}", path.display()))
        })?;
        serde_json::from_slice(&payload).map_err(|e| {
            ApiError::ModelUnavailable(format!("cannot parse checkpoint {}: {e}", path.display()))
        })
    }

    /// Load the stable resume checkpoint from a directory, if present.
    pub fn load_latest(checkpoint_dir: &Path) -> Option<Self> {
        let path = checkpoint_dir.join(CHECKPOINT_FILE);
        if !path.exists() {
            return None;
        }
        Self::load(&path).ok()
    }
}
