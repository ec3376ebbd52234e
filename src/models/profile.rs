use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A user's cofounder-matching profile. Owned by exactly one user and only
/// mutated through profile updates, which bump `version` so downstream
/// feature vectors and embeddings can detect staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: i64,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub location: String,
    /// Ordered list of skill names.
    #[serde(default)]
    pub skills: Vec<String>,
    /// Free-text description of what the user is looking for.
    #[serde(default)]
    pub goals: String,
    /// Platform name -> URL.
    #[serde(default)]
    pub social_links: BTreeMap<String, String>,
    /// Opaque ids of associated projects.
    #[serde(default)]
    pub projects: BTreeSet<i64>,
    /// Monotonically increasing, bumped on every mutation.
    #[serde(default = "initial_version")]
    pub version: u64,
}

fn initial_version() -> u64 {
    1
}

impl Profile {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            industry: String::new(),
            role: String::new(),
            location: String::new(),
            skills: Vec::new(),
            goals: String::new(),
            social_links: BTreeMap::new(),
            projects: BTreeSet::new(),
            version: 1,
        }
    }

    /// Compact view returned inside recommendation results.
    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            industry: self.industry.clone(),
            role: self.role.clone(),
            location: self.location.clone(),
            skills: self.skills.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub industry: String,
    pub role: String,
    pub location: String,
    pub skills: Vec<String>,
}

/// One entry of a ranked recommendation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedMatch {
    pub user_id: i64,
    pub profile_summary: ProfileSummary,
    pub score: f32,
}
