//! Collaborator interface to the profile/friend subsystems.
//!
//! Registration, profile CRUD and friend bookkeeping live outside this
//! service; the recommendation core only needs read access to profiles and
//! the friend graph. The in-memory implementation backs the server
//! (optionally seeded from a JSON file) and test fixtures.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::RwLock;
use tracing::info;

use crate::error::Result;
use crate::models::Profile;

pub trait ProfileStore: Send + Sync {
    fn get_profile(&self, user_id: i64) -> Option<Profile>;
    /// All profiles, ordered by ascending user id.
    fn list_profiles(&self) -> Vec<Profile>;
    fn get_friends(&self, user_id: i64) -> BTreeSet<i64>;
}

#[derive(Default)]
struct StoreInner {
    profiles: HashMap<i64, Profile>,
    friends: HashMap<i64, BTreeSet<i64>>,
}

#[derive(Default)]
pub struct InMemoryProfileStore {
    inner: RwLock<StoreInner>,
}

/// Seed file layout: profiles plus undirected friendship edges.
#[derive(Deserialize)]
struct SeedFile {
    #[serde(default)]
    profiles: Vec<Profile>,
    #[serde(default)]
    friendships: Vec<(i64, i64)>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let payload = std::fs::read(path)?;
        let seed: SeedFile = serde_json::from_slice(&payload)?;

        let store = Self::new();
        for profile in seed.profiles {
            store.upsert_profile(profile);
        }
        for (a, b) in &seed.friendships {
            store.add_friendship(*a, *b);
        }

        info!(
            "Seeded profile store from {} ({} profiles)",
            path.display(),
            store.list_profiles().len()
        );
        Ok(store)
    }

    /// Insert or replace a profile. Replacing bumps the version counter so
    /// cached feature vectors and embeddings become stale.
    pub fn upsert_profile(&self, mut profile: Profile) {
        let mut inner = self.inner.write().expect("store lock poisoned");
        if let Some(existing) = inner.profiles.get(&profile.user_id) {
            profile.version = existing.version + 1;
        }
        inner.profiles.insert(profile.user_id, profile);
    }

    pub fn remove_profile(&self, user_id: i64) {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.profiles.remove(&user_id);
    }

    /// Record an undirected friendship edge.
    pub fn add_friendship(&self, a: i64, b: i64) {
        if a == b {
            return;
        }
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.friends.entry(a).or_default().insert(b);
        inner.friends.entry(b).or_default().insert(a);
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn get_profile(&self, user_id: i64) -> Option<Profile> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .profiles
            .get(&user_id)
            .cloned()
    }

    fn list_profiles(&self) -> Vec<Profile> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut profiles: Vec<Profile> = inner.profiles.values().cloned().collect();
        profiles.sort_by_key(|p| p.user_id);
        profiles
    }

    fn get_friends(&self, user_id: i64) -> BTreeSet<i64> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .friends
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}
