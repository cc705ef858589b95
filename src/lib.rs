//! Athena Brain — encrypted long-term memory and self-evolution for stateless
//! AI assistants.
//!
//! - **Memory**: content is embedded, sealed with AES-256-CBC + HMAC-SHA256 and
//!   stored in SQLite next to its plaintext vector; search ranks by cosine
//!   similarity and decrypts only the hits.
//! - **Evolution**: recurring mistakes are counted under a normalized key and
//!   turned into rules once they cross a threshold.
//! - **Personalization**: an EMA profile learned from memories and rules.
//!
//! ```ignore
//! use std::sync::Arc;
//! use athena_brain::{Brain, BrainConfig, EmbeddingClient};
//!
//! let config = BrainConfig::default();
//! let brain = Brain::open(config.clone(), Arc::new(EmbeddingClient::new(&config.memory)))?;
//! let id = brain.store_memory("User prefers Python over JavaScript", "preference", &[]).await?;
//! let hits = brain.search_memory("what language does the user like", 5, None).await?;
//! ```

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::evolution_types::{
    MistakePattern, MistakeReport, ProfileSnapshot, Rule, RuleState, RuleStatus, SolutionEntry,
    TrackOutcome,
};
pub use atoms::types::{
    BrainConfig, EmotionTag, KeySource, MemoryFilter, MemoryRecord, MemoryStats, RecordMeta,
    ScoredMemory, SearchRequest, StoreRequest,
};
pub use engine::brain::Brain;
pub use engine::memory::{EmbeddingClient, EmbeddingProvider, HashingEmbedder, StoreOutcome};
pub use engine::store::BrainStore;
pub use engine::vault::MasterKey;
