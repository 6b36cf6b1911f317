//! Text embedding backend for the Tool Index.
//!
//! Wraps a fixed 384-dimensional sentence embedding model. The model
//! identity (and therefore the vector dimension and similarity metric) is
//! fixed per deployment; changing it requires a full index rebuild.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::{Error, Result};

/// Vector dimension produced by [`Embedder`]. Fixed for the life of a
/// deployment's persisted index.
pub const EMBEDDING_DIM: usize = 384;

/// Computes unit-normalized embeddings for tool corpus text.
pub struct Embedder {
    model: TextEmbedding,
}

impl Embedder {
    /// Load the embedding model.
    ///
    /// # Errors
    ///
    /// Returns `Error::IndexUnavailable` if the model cannot be initialized
    /// (e.g. missing cache directory, download failure).
    pub fn load() -> Result<Self> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
        )
        .map_err(|e| Error::IndexUnavailable(format!("loading embedding model: {e}")))?;

        Ok(Self { model })
    }

    /// Compose the blob embedded for a tool: `description + ". Tags: " + tags`.
    #[must_use]
    pub fn compose_blob(description: &str, tags: &[String]) -> String {
        if tags.is_empty() {
            description.to_string()
        } else {
            format!("{description}. Tags: {}", tags.join(", "))
        }
    }

    /// Embed a batch of text blobs, returning one unit-normalized 384-dim
    /// vector per input, in input order.
    ///
    /// # Errors
    ///
    /// Returns `Error::IndexUnavailable` if the underlying model run fails.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let raw = self
            .model
            .embed(refs, None)
            .map_err(|e| Error::IndexUnavailable(format!("embedding batch: {e}")))?;
        Ok(raw.into_iter().map(|v| normalize(&v)).collect())
    }

    /// Embed a single query string.
    ///
    /// # Errors
    ///
    /// Returns `Error::IndexUnavailable` if the underlying model run fails.
    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_batch(std::slice::from_ref(&text.to_string()))?.remove(0))
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Cosine similarity between two unit-normalized vectors (reduces to a dot product).
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_blob_with_tags() {
        let blob = Embedder::compose_blob("Gets the current time", &["time".to_string(), "utility".to_string()]);
        assert_eq!(blob, "Gets the current time. Tags: time, utility");
    }

    #[test]
    fn compose_blob_without_tags() {
        let blob = Embedder::compose_blob("Gets the current time", &[]);
        assert_eq!(blob, "Gets the current time");
    }

    #[test]
    fn normalize_produces_unit_vector() {
        let v = normalize(&[3.0, 4.0]);
        let norm = (v[0] * v[0] + v[1] * v[1]).sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_zero_vector_stays_zero() {
        let v = normalize(&[0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = normalize(&[1.0, 2.0, 3.0]);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        let a = normalize(&[1.0, 0.0]);
        let b = normalize(&[0.0, 1.0]);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }
}
