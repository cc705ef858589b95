use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use athena_brain::{
    Brain, BrainStore, EngineError, KeySource, MemoryFilter, SearchRequest, StoreRequest,
};
use base64::Engine as _;

use crate::common::{self, ConceptEmbedder, LockstepEmbedder, SlowEmbedder, UnavailableEmbedder};

#[tokio::test]
async fn preference_is_found_by_paraphrase() {
    let brain = common::brain();
    let id = brain
        .store_memory("User prefers Python over JavaScript", "preference", &["language"])
        .await
        .unwrap();
    brain.store_memory("Deploy the server on Monday", "task", &[]).await.unwrap();

    let hits = brain
        .search_memory("what language does the user like", 5, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.id, id);
    assert_eq!(hits[0].record.content, "User prefers Python over JavaScript");
    assert!(hits[0].score > 0.9);

    let profile = brain.get_profile();
    assert!(profile.weight("category:preference") > 0.0);
    assert!(profile.weight("tag:language") > 0.0);
}

#[tokio::test]
async fn near_duplicates_grow_the_collection_by_one() {
    let brain = common::brain();
    let first = brain
        .store_memory("User prefers Python over JavaScript", "preference", &[])
        .await
        .unwrap();
    let again = brain
        .store_memory("user PREFERS python over javascript!", "preference", &[])
        .await
        .unwrap();
    assert_eq!(first, again);
    assert_eq!(brain.memory_stats().unwrap().total_memories, 1);

    let record = brain.get_memory(&first).unwrap();
    assert_eq!(record.content, "User prefers Python over JavaScript");
    assert!(record.last_reinforced_at.is_some());

    // Same vector, other category: a separate record.
    let elsewhere = brain
        .store_memory("User prefers Python over JavaScript", "fact", &[])
        .await
        .unwrap();
    assert_ne!(elsewhere, first);
    assert_eq!(brain.memory_stats().unwrap().total_memories, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_stores_keep_one_record() {
    const WRITERS: usize = 16;
    let brain = Arc::new(common::brain_with(Arc::new(LockstepEmbedder::new(WRITERS)), 2));

    for round in 0..4 {
        let category = format!("habit{round}");
        let tasks: Vec<_> = (0..WRITERS)
            .map(|_| {
                let brain = brain.clone();
                let category = category.clone();
                tokio::spawn(async move {
                    brain
                        .store(StoreRequest::new("Coffee before the deadline", category))
                        .await
                })
            })
            .collect();
        let outcomes: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert!(outcomes.iter().all(|o| o.id() == outcomes[0].id()), "round {round}");
        assert_eq!(outcomes.iter().filter(|o| !o.is_duplicate()).count(), 1, "round {round}");
        assert!(brain.get_memory(outcomes[0].id()).unwrap().last_reinforced_at.is_some());
    }
    assert_eq!(brain.memory_stats().unwrap().total_memories, 4);
    assert_eq!(brain.get_profile().observations, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forgets_racing_stores_leave_no_profile_residue() {
    let brain = Arc::new(common::brain_with(
        Arc::new(SlowEmbedder(Duration::from_millis(2))),
        2,
    ));
    let done = Arc::new(AtomicBool::new(false));

    let sweeper = {
        let brain = brain.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut forgotten = 0usize;
            loop {
                let finished = done.load(Ordering::SeqCst);
                for hit in brain.search_memory("note", 64, None).await.unwrap() {
                    if brain.forget_memory(&hit.record.id).unwrap() {
                        forgotten += 1;
                    }
                }
                if finished {
                    return forgotten;
                }
            }
        })
    };

    let stores: Vec<_> = (0..24)
        .map(|i| {
            let brain = brain.clone();
            tokio::spawn(async move {
                brain
                    .store_memory(&format!("note {i}"), &format!("batch{i}"), &["scratch"])
                    .await
            })
        })
        .collect();
    for joined in futures::future::join_all(stores).await {
        joined.unwrap().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    assert_eq!(sweeper.await.unwrap(), 24);

    assert_eq!(brain.memory_stats().unwrap().total_memories, 0);
    let profile = brain.get_profile();
    assert_eq!(profile.observations, 0);
    assert!(profile.weights.is_empty(), "left over: {:?}", profile.weights);
}

#[tokio::test]
async fn metadata_is_returned_by_get_and_search() {
    let brain = common::brain();
    let outcome = brain
        .store(
            StoreRequest::new("User prefers Python over JavaScript", "preference")
                .metadata("source", "onboarding chat")
                .metadata("turn", 3),
        )
        .await
        .unwrap();

    let record = brain.get_memory(outcome.id()).unwrap();
    assert_eq!(record.metadata["source"], serde_json::json!("onboarding chat"));
    assert_eq!(record.metadata["turn"], serde_json::json!(3));

    let hits = brain
        .search_memory("what language does the user like", 1, None)
        .await
        .unwrap();
    assert_eq!(hits[0].record.metadata, record.metadata);

    let plain = brain.store_memory("Deploy the server on Monday", "task", &[]).await.unwrap();
    assert!(brain.get_memory(&plain).unwrap().metadata.is_empty());
}

#[tokio::test]
async fn results_are_bounded_sorted_and_above_the_floor() {
    let brain = common::brain();
    for (content, category) in [
        ("User prefers Python over JavaScript", "preference"),
        ("User likes coffee", "preference"),
        ("Coffee before the deadline", "habit"),
        ("Deploy the server on Monday", "task"),
    ] {
        brain.store_memory(content, category, &[]).await.unwrap();
    }

    let hits = brain
        .search_memory("what language does the user like", 5, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2, "only the two related memories clear the floor");
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(hits.iter().all(|h| h.score >= brain.config().memory.similarity_floor));

    let one = brain
        .search_memory("what language does the user like", 1, None)
        .await
        .unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].record.id, hits[0].record.id);

    let habits = brain
        .search(SearchRequest::new("coffee", 5).filter(MemoryFilter::category("habit")))
        .await
        .unwrap();
    assert_eq!(habits.len(), 1);
    assert_eq!(habits[0].record.content, "Coffee before the deadline");

    assert!(matches!(
        brain.search_memory("anything", 0, None).await,
        Err(EngineError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn embedding_failures_write_nothing() {
    let down = common::brain_with(Arc::new(UnavailableEmbedder), 2);
    let err = down.store_memory("User likes tea", "preference", &[]).await;
    assert!(matches!(err, Err(EngineError::EmbeddingUnavailable(_))));
    assert_eq!(down.memory_stats().unwrap().total_memories, 0);
    assert_eq!(down.get_profile().observations, 0);

    let slow = common::brain_with(Arc::new(SlowEmbedder(Duration::from_secs(5))), 2);
    let err = slow
        .store(StoreRequest::new("User likes tea", "preference").timeout(Duration::from_millis(50)))
        .await;
    assert!(matches!(err, Err(EngineError::EmbeddingTimeout(_))));
    assert_eq!(slow.memory_stats().unwrap().total_memories, 0);

    let err = slow
        .search(SearchRequest::new("tea", 3).timeout(Duration::from_millis(50)))
        .await;
    assert!(matches!(err, Err(EngineError::EmbeddingTimeout(_))));
}

#[tokio::test]
async fn forgetting_rebuilds_the_profile() {
    let brain = common::brain();
    let id = brain
        .store_memory("Rust panic on unwrap", "fact", &["rust"])
        .await
        .unwrap();
    assert!(brain.get_profile().weight("tag:rust") > 0.0);

    assert!(brain.forget_memory(&id).unwrap());
    assert!(!brain.forget_memory(&id).unwrap());
    assert!(matches!(brain.get_memory(&id), Err(EngineError::NotFound(_))));

    let profile = brain.get_profile();
    assert_eq!(profile.weight("tag:rust"), 0.0);
    assert_eq!(profile.weight("category:fact"), 0.0);
}

// ── On-disk vault ─────────────────────────────────────────────────────────

struct TempVault {
    path: PathBuf,
}

impl TempVault {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("athena-brain-it-{}.db", uuid::Uuid::new_v4()));
        TempVault { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempVault {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut p = self.path.clone().into_os_string();
            p.push(suffix);
            let _ = std::fs::remove_file(PathBuf::from(p));
        }
    }
}

fn disk_brain(vault: &TempVault, key_var: &str) -> Result<Brain, EngineError> {
    let mut config = common::config(2);
    config.vault.db_path = Some(vault.path().to_path_buf());
    config.vault.key_source = KeySource::Env { var: key_var.into() };
    Brain::open(config, Arc::new(ConceptEmbedder))
}

#[tokio::test]
async fn vault_survives_reopen_and_detects_tampering() {
    common::init_logger();
    let key_var = "ATHENA_BRAIN_IT_VAULT_KEY";
    std::env::set_var(key_var, base64::engine::general_purpose::STANDARD.encode([7u8; 32]));
    let vault = TempVault::new();

    let id = {
        let brain = disk_brain(&vault, key_var).unwrap();
        let id = brain
            .store_memory("User prefers Python over JavaScript", "preference", &[])
            .await
            .unwrap();
        brain.track_mistake("null check missing", "add null guard", None, None).unwrap();
        brain.track_mistake("null check missing", "add null guard", None, None).unwrap();
        id
    };

    {
        let brain = disk_brain(&vault, key_var).unwrap();
        assert_eq!(
            brain.get_memory(&id).unwrap().content,
            "User prefers Python over JavaScript"
        );
        assert_eq!(brain.get_rules().unwrap().len(), 1);
        assert!(brain.get_profile().weight("category:preference") > 0.0);
        assert!(brain.get_profile().weight("rule:null check missing") > 0.0);
    }

    {
        let store = BrainStore::open(vault.path()).unwrap();
        let conn = store.conn.lock();
        let mut sealed: Vec<u8> = conn
            .query_row("SELECT sealed FROM memories WHERE id = ?1", [&id], |r| r.get(0))
            .unwrap();
        assert!(!String::from_utf8_lossy(&sealed).contains("Python"));
        let mid = sealed.len() / 2;
        sealed[mid] ^= 0x01;
        conn.execute(
            "UPDATE memories SET sealed = ?1 WHERE id = ?2",
            rusqlite::params![sealed, id],
        )
        .unwrap();
    }

    let brain = disk_brain(&vault, key_var).unwrap();
    assert!(matches!(brain.get_memory(&id), Err(EngineError::Integrity(_))));
    assert!(matches!(
        brain.search_memory("what language does the user like", 3, None).await,
        Err(EngineError::Integrity(_))
    ));
    assert_eq!(brain.memory_stats().unwrap().total_memories, 1);
}

#[tokio::test]
async fn wrong_key_cannot_read_and_other_dims_cannot_open() {
    common::init_logger();
    let key_a = "ATHENA_BRAIN_IT_KEY_A";
    let key_b = "ATHENA_BRAIN_IT_KEY_B";
    std::env::set_var(key_a, base64::engine::general_purpose::STANDARD.encode([1u8; 32]));
    std::env::set_var(key_b, base64::engine::general_purpose::STANDARD.encode([2u8; 32]));
    let vault = TempVault::new();

    let id = disk_brain(&vault, key_a)
        .unwrap()
        .store_memory("Deploy the server on Monday", "task", &[])
        .await
        .unwrap();

    let intruder = disk_brain(&vault, key_b).unwrap();
    assert!(matches!(intruder.get_memory(&id), Err(EngineError::Integrity(_))));
    drop(intruder);

    let mut config = common::config(2);
    config.memory.embedding_dims = 16;
    config.vault.db_path = Some(vault.path().to_path_buf());
    config.vault.key_source = KeySource::Env { var: key_a.into() };
    let wider = athena_brain::HashingEmbedder::new(16).unwrap();
    assert!(matches!(
        Brain::open(config, Arc::new(wider)),
        Err(EngineError::Config(_))
    ));
}
