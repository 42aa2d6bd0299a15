use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::POOLING_VERSION;

/// Content-addressed cache of per-chunk embedding vectors.
///
/// Keys are `SHA-256(model ":" pooling_version ":" text)`; values are the
/// raw little-endian f32 vector bytes. The cache is write-through and
/// failure-tolerant: it is a latency optimization, never a correctness
/// input, so every I/O error degrades to a miss or a skipped write.
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>) -> EmbeddingCache {
        EmbeddingCache { dir: dir.into() }
    }

    pub fn key(model: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(b":");
        hasher.update(POOLING_VERSION.as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.npy"))
    }

    pub async fn load(&self, key: &str) -> Option<Vec<f32>> {
        let bytes = tokio::fs::read(self.path_for(key)).await.ok()?;
        if bytes.len() % 4 != 0 {
            return None;
        }
        Some(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
    }

    /// Store a vector. Concurrent writers racing on the same key are safe:
    /// the bytes are idempotent and the rename is atomic.
    pub async fn store(&self, key: &str, vector: &[f32]) {
        let result = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            let path = self.path_for(key);
            let temp = path.with_extension("npy.tmp");
            let bytes: Vec<u8> = vector.iter().flat_map(|x| x.to_le_bytes()).collect();
            tokio::fs::write(&temp, bytes).await?;
            tokio::fs::rename(&temp, &path).await
        }
        .await;

        if let Err(e) = result {
            debug!(error = %e, "embedding cache write failed, continuing");
        }
    }
}
