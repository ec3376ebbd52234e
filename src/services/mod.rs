pub mod profile_store;
pub mod recommendation;

// Re-export public types
pub use profile_store::{InMemoryProfileStore, ProfileStore};
pub use recommendation::{RecommendationService, RetrainAck};
