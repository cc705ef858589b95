//! Shared fixtures: deterministic embedders and brain constructors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use athena_brain::{Brain, BrainConfig, BrainStore, EmbeddingProvider, EngineError, EngineResult, MasterKey};

pub const DIMS: usize = 8;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Words grouped into concept axes, so paraphrases that share a concept land
/// close together. Text with no known word goes to the last axis.
const CONCEPTS: [&[&str]; DIMS - 1] = [
    &["python", "javascript", "rust", "language", "languages", "code"],
    &["prefers", "prefer", "like", "likes", "favorite", "loves"],
    &["user", "person", "they"],
    &["coffee", "tea", "breakfast", "lunch"],
    &["bug", "error", "panic", "crash"],
    &["monday", "tuesday", "meeting", "deadline"],
    &["deploy", "server", "cluster", "kubernetes"],
];

pub struct ConceptEmbedder;

impl ConceptEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v = vec![0.0f32; DIMS];
        for word in lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            for (axis, words) in CONCEPTS.iter().enumerate() {
                if words.contains(&word) {
                    v[axis] += 1.0;
                }
            }
        }
        if v.iter().all(|x| *x == 0.0) {
            v[DIMS - 1] = 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for ConceptEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        Ok(Self::vector(text))
    }
    fn dimensions(&self) -> usize {
        DIMS
    }
    fn model_name(&self) -> &str {
        "concept-stub"
    }
}

pub struct UnavailableEmbedder;

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedder {
    async fn embed(&self, _text: &str) -> EngineResult<Vec<f32>> {
        Err(EngineError::EmbeddingUnavailable("gateway down".into()))
    }
    fn dimensions(&self) -> usize {
        DIMS
    }
    fn model_name(&self) -> &str {
        "unavailable-stub"
    }
}

pub struct SlowEmbedder(pub Duration);

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        tokio::time::sleep(self.0).await;
        Ok(ConceptEmbedder::vector(text))
    }
    fn dimensions(&self) -> usize {
        DIMS
    }
    fn model_name(&self) -> &str {
        "slow-stub"
    }
}

/// Holds every caller until `n` embeds are in flight, then releases them
/// together so whatever follows the embed runs contended.
pub struct LockstepEmbedder(pub tokio::sync::Barrier);

impl LockstepEmbedder {
    pub fn new(n: usize) -> Self {
        LockstepEmbedder(tokio::sync::Barrier::new(n))
    }
}

#[async_trait]
impl EmbeddingProvider for LockstepEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        self.0.wait().await;
        Ok(ConceptEmbedder::vector(text))
    }
    fn dimensions(&self) -> usize {
        DIMS
    }
    fn model_name(&self) -> &str {
        "lockstep-stub"
    }
}

pub fn test_key() -> MasterKey {
    MasterKey::from_bytes(&[0x5Au8; 32]).expect("32-byte key")
}

pub fn config(rule_threshold: u32) -> BrainConfig {
    let mut config = BrainConfig::default();
    config.memory.embedding_dims = DIMS;
    config.evolution.rule_threshold = rule_threshold;
    config
}

/// Brain over a private in-memory database.
pub fn brain_with(embedder: Arc<dyn EmbeddingProvider>, rule_threshold: u32) -> Brain {
    init_logger();
    Brain::open_with(
        config(rule_threshold),
        embedder,
        BrainStore::open_in_memory().expect("in-memory store"),
        test_key(),
    )
    .expect("brain opens")
}

pub fn brain() -> Brain {
    brain_with(Arc::new(ConceptEmbedder), 2)
}
