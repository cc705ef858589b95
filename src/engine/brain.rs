// Athena Engine — Brain Facade
//
// Wires the subsystems over one BrainStore and exposes the caller API:
//   memory      — store_memory / search_memory / get_memory / forget_memory
//   evolution   — track_mistake / get_rules / retire_rule / list_patterns
//   profile     — get_profile
//
// Startup is all-or-nothing: a missing key, a dimensionality mismatch or an
// invalid config fails `open` before any record is touched.

use std::sync::Arc;

use log::info;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::evolution_types::{
    MistakePattern, MistakeReport, ProfileSnapshot, Rule, TrackOutcome,
};
use crate::atoms::types::{
    BrainConfig, MemoryRecord, MemoryStats, RecordMeta, ScoredMemory, SearchRequest,
    StoreRequest,
};
use crate::engine::config::resolve_db_path;
use crate::engine::evolution::{MistakeTracker, RuleSynthesizer};
use crate::engine::memory::{EmbeddingClient, EmbeddingProvider, MemoryManager, StoreOutcome};
use crate::engine::personalization::PersonalizationProfile;
use crate::engine::store::BrainStore;
use crate::engine::vault::{EncryptedVectorStore, FieldCipher, MasterKey};

pub struct Brain {
    config: BrainConfig,
    memory: MemoryManager,
    tracker: MistakeTracker,
    profile: Arc<PersonalizationProfile>,
}

impl Brain {
    /// Open the on-disk vault named by `config`, reading the key from its
    /// configured source. The key is loaded before the database is touched.
    pub fn open(config: BrainConfig, embedder: Arc<dyn EmbeddingProvider>) -> EngineResult<Self> {
        config.validate()?;
        let key = MasterKey::load(&config.vault.key_source).map_err(|e| e.context("open"))?;
        let path = resolve_db_path(&config)?;
        let db = BrainStore::open(&path)?;
        Self::open_with(config, embedder, db, key)
    }

    /// Open with the HTTP embedding client described by `config.memory`.
    pub fn with_http_embeddings(config: BrainConfig) -> EngineResult<Self> {
        let embedder = Arc::new(EmbeddingClient::new(&config.memory));
        Self::open(config, embedder)
    }

    /// Assemble over an already-open store with caller-supplied key material.
    pub fn open_with(
        config: BrainConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        db: BrainStore,
        key: MasterKey,
    ) -> EngineResult<Self> {
        config.validate()?;
        let dims = config.memory.embedding_dims;
        if embedder.dimensions() != dims {
            return Err(EngineError::Config(format!(
                "embedding model '{}' produces {} dimensions, config says {}",
                embedder.model_name(),
                embedder.dimensions(),
                dims
            )));
        }

        let db = Arc::new(db);
        let cipher = FieldCipher::new(&key)?;
        drop(key);
        let vault = Arc::new(EncryptedVectorStore::open(db.clone(), cipher, dims)?);
        let profile = Arc::new(PersonalizationProfile::open(
            db.clone(),
            config.personalization.learning_rate,
        )?);
        let memory = MemoryManager::new(vault, embedder.clone(), profile.clone(), config.memory.clone())?;
        let tracker = MistakeTracker::new(
            db,
            RuleSynthesizer::new(config.evolution.rule_threshold)?,
            profile.clone(),
        );

        info!(
            "[brain] Ready: model '{}' ({} dims), rule threshold {}, learning rate {}",
            embedder.model_name(),
            dims,
            config.evolution.rule_threshold,
            config.personalization.learning_rate
        );
        Ok(Brain {
            config,
            memory,
            tracker,
            profile,
        })
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    // ── Memory ─────────────────────────────────────────────────────────

    /// Store content and return its id (the existing id for a near-duplicate).
    pub async fn store_memory(&self, content: &str, category: &str, tags: &[&str]) -> EngineResult<String> {
        let outcome = self
            .memory
            .store(StoreRequest::new(content, category).tags(tags.iter().copied()))
            .await?;
        Ok(outcome.id().to_string())
    }

    pub async fn store(&self, request: StoreRequest) -> EngineResult<StoreOutcome> {
        self.memory.store(request).await
    }

    pub async fn search_memory(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> EngineResult<Vec<ScoredMemory>> {
        let mut request = SearchRequest::new(query, limit);
        if let Some(category) = category {
            request = request.category(category);
        }
        self.memory.search(request).await
    }

    pub async fn search(&self, request: SearchRequest) -> EngineResult<Vec<ScoredMemory>> {
        self.memory.search(request).await
    }

    pub fn get_memory(&self, id: &str) -> EngineResult<MemoryRecord> {
        self.memory.get(id)
    }

    pub fn forget_memory(&self, id: &str) -> EngineResult<bool> {
        self.memory.forget(id)
    }

    pub fn memory_stats(&self) -> EngineResult<MemoryStats> {
        self.memory.stats()
    }

    /// Decay all weights by `decay_factor`, then prune those under `min_weight`.
    pub fn apply_retention(&self, decay_factor: f64, min_weight: f64) -> EngineResult<Vec<RecordMeta>> {
        self.memory.apply_retention(decay_factor, min_weight)
    }

    // ── Evolution ──────────────────────────────────────────────────────

    /// Record one mistake. `category` defaults to `general` and is fixed by
    /// the first report of a pattern; it is carried onto the rule and the
    /// `mistake:<category>` profile dimension.
    pub fn track_mistake(
        &self,
        pattern: &str,
        solution: &str,
        context: Option<&str>,
        category: Option<&str>,
    ) -> EngineResult<TrackOutcome> {
        let mut report = MistakeReport::new(pattern, solution);
        if let Some(context) = context {
            report = report.context(context);
        }
        if let Some(category) = category {
            report = report.category(category);
        }
        self.tracker.track(&report)
    }

    pub fn track(&self, report: &MistakeReport) -> EngineResult<TrackOutcome> {
        self.tracker.track(report)
    }

    /// Active rules, highest confidence first.
    pub fn get_rules(&self) -> EngineResult<Vec<Rule>> {
        self.tracker.rules(false)
    }

    /// Active and retired rules.
    pub fn all_rules(&self) -> EngineResult<Vec<Rule>> {
        self.tracker.rules(true)
    }

    pub fn retire_rule(&self, pattern: &str) -> EngineResult<Rule> {
        self.tracker.retire_rule(pattern)
    }

    pub fn get_pattern(&self, pattern: &str) -> EngineResult<Option<MistakePattern>> {
        self.tracker.pattern(pattern)
    }

    pub fn list_patterns(&self) -> EngineResult<Vec<MistakePattern>> {
        self.tracker.patterns()
    }

    // ── Profile ────────────────────────────────────────────────────────

    pub fn get_profile(&self) -> Arc<ProfileSnapshot> {
        self.profile.snapshot()
    }
}
