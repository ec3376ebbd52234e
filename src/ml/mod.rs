pub mod dataset;
pub mod encoder;
pub mod snapshot;
pub mod trainer;

pub use dataset::{build_training_pairs, PairLabel, TrainingPair};
pub use encoder::{sim, TowerEncoder, EMBEDDING_DIM};
pub use snapshot::ModelSnapshot;
pub use trainer::{Trainer, TrainerConfig};
