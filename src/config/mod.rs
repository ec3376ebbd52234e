use anyhow::Result;
use std::env;

use crate::ml::trainer::TrainerConfig;

/// Runtime configuration, loaded from environment variables with defaults
/// suitable for local development. `.env` files are honored via `dotenv`
/// in `main`.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Token required by the privileged retrain endpoint.
    pub admin_token: String,
    /// Directory where model checkpoints are written during training.
    pub checkpoint_dir: String,
    /// Optional JSON file used to seed the in-memory profile store.
    pub profiles_path: Option<String>,
    pub trainer: TrainerConfig,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Config {
            host: env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_parsed("APP_PORT", 3000),
            admin_token: env::var("APP_ADMIN_TOKEN").unwrap_or_else(|_| "change-me".to_string()),
            checkpoint_dir: env::var("APP_CHECKPOINT_DIR").unwrap_or_else(|_| "models".to_string()),
            profiles_path: env::var("APP_PROFILES_PATH").ok(),
            trainer: TrainerConfig {
                batch_size: env_parsed("APP_TRAIN_BATCH_SIZE", 32),
                learning_rate: env_parsed("APP_TRAIN_LEARNING_RATE", 1e-2),
                max_epochs: env_parsed("APP_TRAIN_MAX_EPOCHS", 50),
                patience: env_parsed("APP_TRAIN_PATIENCE", 5),
                margin: env_parsed("APP_TRAIN_MARGIN", 0.5),
                min_positive_pairs: env_parsed("APP_TRAIN_MIN_POSITIVE_PAIRS", 8),
                negative_ratio: env_parsed("APP_TRAIN_NEGATIVE_RATIO", 1.0),
                validation_fraction: env_parsed("APP_TRAIN_VALIDATION_FRACTION", 0.2),
                seed: env_parsed("APP_TRAIN_SEED", 42),
            },
        })
    }
}
