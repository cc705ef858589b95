// Athena Engine — Offline Hashing Embedder
//
// Deterministic feature-hashing embedder for hosts without an embedding
// service. Each lowercased word token is hashed (SHA-256) to a signed bucket;
// the result is L2-normalized. Texts that share words score close together,
// paraphrases without shared words do not.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::embedding::EmbeddingProvider;
use crate::atoms::error::{EngineError, EngineResult};

pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> EngineResult<Self> {
        if dims == 0 {
            return Err(EngineError::Config("hashing embedder needs dims > 0".into()));
        }
        Ok(HashingEmbedder { dims })
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut idx = [0u8; 8];
            idx.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(idx) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        Ok(self.vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "feature-hash"
    }
}
