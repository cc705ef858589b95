// ── Vector math utilities ──────────────────────────────────────────────

/// Convert a byte slice (from SQLite BLOB) to a Vec<f32>.
/// Trailing bytes that do not form a whole f32 are ignored.
pub fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Convert a Vec<f32> to bytes for SQLite BLOB storage.
pub fn f32_vec_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

/// Cosine similarity between two vectors. Returns 0.0 on length mismatch,
/// empty input or a zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    CosineQuery::new(a).score(b)
}

/// A query vector with its norm computed once, for scoring many candidates.
pub struct CosineQuery<'a> {
    vector: &'a [f32],
    norm: f64,
}

impl<'a> CosineQuery<'a> {
    pub fn new(vector: &'a [f32]) -> Self {
        CosineQuery {
            vector,
            norm: l2_norm(vector),
        }
    }

    pub fn score(&self, candidate: &[f32]) -> f64 {
        if candidate.len() != self.vector.len() || candidate.is_empty() {
            return 0.0;
        }
        let dot: f64 = self
            .vector
            .iter()
            .zip(candidate.iter())
            .map(|(x, y)| (*x as f64) * (*y as f64))
            .sum();
        let denom = self.norm * l2_norm(candidate);
        if denom < 1e-12 {
            0.0
        } else {
            // Clamp float drift so identical vectors score exactly ≤ 1.0.
            (dot / denom).clamp(-1.0, 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_query_reuses_norm() {
        let q = vec![3.0f32, 4.0];
        let query = CosineQuery::new(&q);
        assert!((query.score(&[6.0, 8.0]) - 1.0).abs() < 1e-9);
        assert!((query.score(&[4.0, -3.0])).abs() < 1e-9);
    }

    #[test]
    fn blob_codec_roundtrip() {
        let original = vec![1.0f32, -2.5, 3.14159, 0.0];
        assert_eq!(bytes_to_f32_vec(&f32_vec_to_bytes(&original)), original);
        assert!(bytes_to_f32_vec(&[1, 2, 3]).is_empty());
    }
}
