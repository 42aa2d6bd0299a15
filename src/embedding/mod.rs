pub mod cache;

pub use cache::EmbeddingCache;

/// Participates in every cache key. Bump on any change to the pooling
/// semantics so stale vectors invalidate atomically across deployments.
pub const POOLING_VERSION: &str = "v1";

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Return a unit-length copy. Zero-norm vectors come back unchanged.
pub fn l2_normalized(vector: &[f32]) -> Vec<f32> {
    let norm = l2_norm(vector);
    if norm > 0.0 {
        vector.iter().map(|x| x / norm).collect()
    } else {
        vector.to_vec()
    }
}

/// Pool chunk vectors into one document vector: L2-normalize each chunk,
/// take the arithmetic mean, L2-normalize the result. Empty input yields
/// an empty vector.
pub fn normalized_mean_pool(chunks: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = chunks.first() else {
        return Vec::new();
    };
    if chunks.len() == 1 {
        return l2_normalized(first);
    }

    let dim = first.len();
    let mut mean = vec![0.0f32; dim];
    for chunk in chunks {
        let normalized = l2_normalized(chunk);
        for (acc, x) in mean.iter_mut().zip(&normalized) {
            *acc += x;
        }
    }
    let n = chunks.len() as f32;
    for x in &mut mean {
        *x /= n;
    }
    l2_normalized(&mean)
}

/// Arithmetic mean of a set of vectors (topic centroids; no
/// re-normalization, assignment uses cosine).
pub fn mean_vector(vectors: &[&[f32]]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut mean = vec![0.0f32; first.len()];
    for vector in vectors {
        for (acc, x) in mean.iter_mut().zip(vector.iter()) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    for x in &mut mean {
        *x /= n;
    }
    mean
}

/// Cosine similarity clamped to [0, 1]. Zero-norm inputs score 0;
/// mismatched dimensions are a caller bug and return None.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    Some((dot / (norm_a * norm_b)).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_pool_just_normalizes() {
        let pooled = normalized_mean_pool(&[vec![1.0, 2.0, 3.0]]);
        assert!((l2_norm(&pooled) - 1.0).abs() < 1e-5);
        let expected = l2_normalized(&[1.0, 2.0, 3.0]);
        for (a, b) in pooled.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn multi_chunk_pool_is_mean_of_normalized() {
        let pooled = normalized_mean_pool(&[
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ]);
        assert!((l2_norm(&pooled) - 1.0).abs() < 1e-5);
        // Symmetric input: all components equal
        assert!((pooled[0] - pooled[1]).abs() < 1e-6);
        assert!((pooled[1] - pooled[2]).abs() < 1e-6);
    }

    #[test]
    fn zero_norm_chunks_survive_pooling() {
        let pooled = normalized_mean_pool(&[vec![0.0, 0.0], vec![0.0, 2.0]]);
        assert_eq!(pooled.len(), 2);
        assert!(l2_norm(&pooled) <= 1.0 + 1e-5);
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap(), 0.0);
        // Opposite vectors clamp to 0, not -1
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 1.0], &[0.0, 0.0]).unwrap(), 0.0);
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn centroid_is_plain_mean() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let centroid = mean_vector(&[&a, &b]);
        assert_eq!(centroid, vec![0.5, 0.5]);
    }
}
