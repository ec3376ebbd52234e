use serde::{Deserialize, Serialize};

// Re-export types from profile.rs
pub use profile::{Profile, ProfileSummary, RankedMatch};

mod profile;

/// Query parameters for the recommendations endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationQuery {
    /// Number of recommendations to return (default: 10)
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// Response structure for the recommendations endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    /// Ranked list of recommended cofounders
    pub recommendations: Vec<RankedMatch>,
}

/// Acknowledgment returned by the retrain endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainResponse {
    /// "started" when a new run was launched, "already_running" when coalesced
    pub status: String,
}

fn default_top_k() -> usize {
    10
}
