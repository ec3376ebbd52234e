use crate::error::Result;
use crate::{
    error::ApiError,
    features::{build_features, FeatureSchema},
    index::EmbeddingIndex,
    ml::{build_training_pairs, ModelSnapshot, Trainer, TrainerConfig},
    models::{Profile, RankedMatch},
    services::profile_store::ProfileStore,
};
use ndarray::Array1;
use regex::Regex;
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, LazyLock, RwLock,
    },
};
use tracing::{error, info, warn};

static KEYWORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9']+").expect("valid keyword pattern"));

/// Minimum token length counted as a goals keyword; filters articles and
/// other filler words.
const MIN_KEYWORD_LEN: usize = 4;

/// Acknowledgment for a retrain trigger. The caller never waits for the
/// training result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainAck {
    Started,
    /// A run was already in flight; the trigger was coalesced into it.
    AlreadyRunning,
}

/// Embedding cached per user, invalidated when either the profile or the
/// model moves on.
struct CachedEmbedding {
    profile_version: u64,
    model_version: u64,
    embedding: Array1<f32>,
}

struct ServiceInner {
    store: Arc<dyn ProfileStore>,
    index: EmbeddingIndex,
    /// Current encoder snapshot; `None` until the first successful training
    /// run (or checkpoint load) — the rule-based fallback serves until then.
    model: RwLock<Option<Arc<ModelSnapshot>>>,
    embedding_cache: RwLock<HashMap<i64, CachedEmbedding>>,
    schema: FeatureSchema,
    trainer_config: TrainerConfig,
    checkpoint_dir: PathBuf,
    /// Single-flight guard: at most one retrain per process.
    retrain_in_flight: AtomicBool,
}

/// Orchestrates the feature pipeline, encoder, embedding index and the
/// rule-based fallback. The single entry point consumed by the HTTP layer.
#[derive(Clone)]
pub struct RecommendationService {
    inner: Arc<ServiceInner>,
}

impl RecommendationService {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        schema: FeatureSchema,
        trainer_config: TrainerConfig,
        checkpoint_dir: impl Into<PathBuf>,
    ) -> Self {
        let service = Self {
            inner: Arc::new(ServiceInner {
                store,
                index: EmbeddingIndex::new(),
                model: RwLock::new(None),
                embedding_cache: RwLock::new(HashMap::new()),
                schema,
                trainer_config,
                checkpoint_dir: checkpoint_dir.into(),
                retrain_in_flight: AtomicBool::new(false),
            }),
        };
        service.load_checkpoint_at_startup();
        service
    }

    /// Warm start: if a checkpoint from a previous process matches the
    /// current feature schema, adopt it and rebuild the index so the ML
    /// path is available immediately.
    fn load_checkpoint_at_startup(&self) {
        let inner = &self.inner;
        let Some(snapshot) = ModelSnapshot::load_latest(&inner.checkpoint_dir) else {
            info!("No model checkpoint found; serving rule-based fallback until first retrain");
            return;
        };
        if snapshot.schema_version != inner.schema.version
            || snapshot.encoder.input_dim() != inner.schema.dimension()
        {
            warn!(
                "Ignoring checkpoint trained against schema v{} (current v{})",
                snapshot.schema_version, inner.schema.version
            );
            return;
        }

        let snapshot = Arc::new(snapshot);
        Self::publish_snapshot(inner, &snapshot);
        info!(
            "Loaded model snapshot {} (version {}) from checkpoint",
            snapshot.snapshot_id, snapshot.version
        );
    }

    /// Top-k ranked matches for a user. Falls back to rule-based scoring
    /// whenever the ML path is unavailable; only a missing profile fails
    /// the request.
    pub fn get_recommendations(&self, user_id: i64, top_k: usize) -> Result<Vec<RankedMatch>> {
        let profile = self
            .inner
            .store
            .get_profile(user_id)
            .ok_or(ApiError::ProfileNotFound(user_id))?;
        let friends = self.inner.store.get_friends(user_id);

        match self.ml_recommendations(&profile, &friends, top_k) {
            Ok(matches) => Ok(matches),
            Err(err) => {
                match &err {
                    ApiError::ModelUnavailable(reason) => {
                        info!("ML path unavailable ({reason}); using rule-based fallback")
                    }
                    // Wrong-schema results must never be served; halt the
                    // ML path and degrade instead.
                    ApiError::IndexInconsistency { .. } => {
                        error!("{err}; halting index serving and using rule-based fallback")
                    }
                    other => warn!("ML path failed ({other}); using rule-based fallback"),
                }
                Ok(self.fallback_recommendations(&profile, &friends, top_k))
            }
        }
    }

    fn ml_recommendations(
        &self,
        profile: &Profile,
        friends: &BTreeSet<i64>,
        top_k: usize,
    ) -> Result<Vec<RankedMatch>> {
        let inner = &self.inner;
        let model = inner
            .model
            .read()
            .expect("model lock poisoned")
            .clone()
            .ok_or_else(|| ApiError::ModelUnavailable("no trained model".to_string()))?;

        let index_version = inner.index.model_version();
        if index_version != model.version {
            return Err(ApiError::IndexInconsistency {
                index_version,
                model_version: model.version,
            });
        }

        let embedding = self.embedding_for(profile, &model);
        let exclude: HashSet<i64> = friends.iter().copied().collect();
        let hits = inner
            .index
            .query(profile.user_id, &embedding, top_k, &exclude);

        // A user deleted between the index query and the profile lookup
        // simply drops out of the page.
        let matches = hits
            .into_iter()
            .filter_map(|(user_id, score)| {
                inner.store.get_profile(user_id).map(|p| RankedMatch {
                    user_id,
                    profile_summary: p.summary(),
                    score,
                })
            })
            .collect();
        Ok(matches)
    }

    /// Cached embedding for a profile, recomputed only when the profile
    /// version or the model version advanced. A recompute also upserts the
    /// index so the user stays visible to other queries.
    fn embedding_for(&self, profile: &Profile, model: &ModelSnapshot) -> Array1<f32> {
        let inner = &self.inner;
        if let Ok(cache) = inner.embedding_cache.read() {
            if let Some(entry) = cache.get(&profile.user_id) {
                if entry.profile_version == profile.version && entry.model_version == model.version
                {
                    return entry.embedding.clone();
                }
            }
        }

        let features = build_features(profile, &inner.schema);
        let embedding = model.encoder.encode(&features);

        inner.index.upsert(profile.user_id, embedding.clone());
        if let Ok(mut cache) = inner.embedding_cache.write() {
            cache.insert(
                profile.user_id,
                CachedEmbedding {
                    profile_version: profile.version,
                    model_version: model.version,
                    embedding: embedding.clone(),
                },
            );
        }
        embedding
    }

    /// Re-encode one profile after an edit, superseding its index entry.
    pub fn sync_profile(&self, user_id: i64) {
        let Some(profile) = self.inner.store.get_profile(user_id) else {
            return;
        };
        let model = self.inner.model.read().expect("model lock poisoned").clone();
        if let Some(model) = model {
            self.embedding_for(&profile, &model);
        }
    }

    /// Drop a user from the index and cache; queries never return the id
    /// afterwards.
    pub fn remove_user(&self, user_id: i64) {
        self.inner.index.remove(user_id);
        if let Ok(mut cache) = self.inner.embedding_cache.write() {
            cache.remove(&user_id);
        }
    }

    /// Rule-based degraded mode: score = count of matched criteria among
    /// industry, role, location, non-empty skills overlap and goals keyword
    /// overlap. Never errors solely because the ML path is down.
    fn fallback_recommendations(
        &self,
        profile: &Profile,
        friends: &BTreeSet<i64>,
        top_k: usize,
    ) -> Vec<RankedMatch> {
        let mut matches: Vec<RankedMatch> = self
            .inner
            .store
            .list_profiles()
            .into_iter()
            .filter(|candidate| {
                candidate.user_id != profile.user_id && !friends.contains(&candidate.user_id)
            })
            .filter_map(|candidate| {
                let score = criteria_score(profile, &candidate);
                if score == 0 {
                    return None;
                }
                Some(RankedMatch {
                    user_id: candidate.user_id,
                    profile_summary: candidate.summary(),
                    score: score as f32,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        matches.truncate(top_k);
        matches
    }

    /// Launch a background retrain. Returns immediately; a trigger while a
    /// run is in flight is coalesced into the running one.
    pub fn trigger_retrain(&self) -> RetrainAck {
        if self.inner.retrain_in_flight.swap(true, Ordering::SeqCst) {
            info!("Retrain already in flight; coalescing trigger");
            return RetrainAck::AlreadyRunning;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let worker = inner.clone();
            let outcome = tokio::task::spawn_blocking(move || Self::run_retrain(&worker)).await;
            match outcome {
                Ok(Ok(version)) => info!("Retrain finished; model version {version} is live"),
                // Training errors leave the previous snapshot and index
                // untouched.
                Ok(Err(e)) => error!("Retrain aborted: {e}"),
                Err(e) => error!("Retrain task panicked: {e}"),
            }
            inner.retrain_in_flight.store(false, Ordering::SeqCst);
        });
        RetrainAck::Started
    }

    /// The retrain body: regenerate pairs, train, re-encode every profile
    /// and swap the index + model together. Runs on a blocking worker.
    fn run_retrain(inner: &ServiceInner) -> Result<u64> {
        let profiles = inner.store.list_profiles();
        let friends: HashMap<i64, BTreeSet<i64>> = profiles
            .iter()
            .map(|p| (p.user_id, inner.store.get_friends(p.user_id)))
            .collect();

        let pairs = build_training_pairs(
            &profiles,
            &friends,
            &inner.schema,
            inner.trainer_config.negative_ratio,
            inner.trainer_config.seed,
        );

        let current_version = inner
            .model
            .read()
            .expect("model lock poisoned")
            .as_ref()
            .map(|m| m.version)
            .unwrap_or(0);
        let next_version = current_version + 1;

        info!(
            "Starting retrain: {} profiles, {} pairs, target model version {next_version}",
            profiles.len(),
            pairs.len()
        );

        let trainer = Trainer::new(inner.trainer_config.clone(), &inner.checkpoint_dir);
        let snapshot = Arc::new(trainer.train(&pairs, &inner.schema, next_version)?);

        Self::publish_snapshot(inner, &snapshot);
        Ok(snapshot.version)
    }

    /// Encode every profile with the snapshot's encoder, atomically swap
    /// the index, then publish the model and invalidate the cache.
    fn publish_snapshot(inner: &ServiceInner, snapshot: &Arc<ModelSnapshot>) {
        let profiles = inner.store.list_profiles();
        let entries: Vec<(i64, Array1<f32>)> = profiles
            .iter()
            .map(|p| {
                let features = build_features(p, &inner.schema);
                (p.user_id, snapshot.encoder.encode(&features))
            })
            .collect();

        inner.index.rebuild(entries, snapshot.version);
        *inner.model.write().expect("model lock poisoned") = Some(snapshot.clone());
        if let Ok(mut cache) = inner.embedding_cache.write() {
            cache.clear();
        }
    }
}

/// Count of matched criteria between two profiles. Each criterion
/// contributes exactly 1.
fn criteria_score(a: &Profile, b: &Profile) -> u32 {
    let mut score = 0;

    if !a.industry.is_empty() && a.industry == b.industry {
        score += 1;
    }
    if !a.role.is_empty() && a.role == b.role {
        score += 1;
    }
    if !a.location.is_empty() && a.location == b.location {
        score += 1;
    }

    let skills_a: HashSet<String> = a.skills.iter().map(|s| s.trim().to_lowercase()).collect();
    let skills_b: HashSet<String> = b.skills.iter().map(|s| s.trim().to_lowercase()).collect();
    if skills_a.intersection(&skills_b).any(|s| !s.is_empty()) {
        score += 1;
    }

    let goals_a = goal_keywords(&a.goals);
    let goals_b = goal_keywords(&b.goals);
    if !goals_a.is_disjoint(&goals_b) {
        score += 1;
    }

    score
}

fn goal_keywords(goals: &str) -> HashSet<String> {
    KEYWORD_PATTERN
        .find_iter(&goals.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|token| token.len() >= MIN_KEYWORD_LEN)
        .collect()
}
