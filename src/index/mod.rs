//! Tool Index — semantic search over registered tools.

mod embeddings;

pub use embeddings::{EMBEDDING_DIM, Embedder, cosine_similarity};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::config::IndexConfig;
use crate::ranking::SearchRanker;
use crate::registry::RegistryStore;
use crate::{Error, Result};

const SCHEMA_VERSION: u32 = 1;
const VECTOR_FILE_MAGIC: u32 = 0x4D43_5049; // "MCPI"

/// One corpus entry: a single tool on a single Service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The owning Service's path.
    pub service_path: String,
    /// The owning Service's name.
    pub service_name: String,
    /// The owning Service's tags, carried for tag-filtered queries.
    pub service_tags: Vec<String>,
    /// Tool name.
    pub tool_name: String,
    /// Tool description, as embedded.
    pub description: String,
    /// Tool-level tags, carried for tag-filtered queries.
    pub tool_tags: Vec<String>,
}

/// A single query result.
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    /// Owning Service path.
    pub service_path: String,
    /// Owning Service name.
    pub service_name: String,
    /// Tool name.
    pub tool_name: String,
    /// Tool description.
    pub description: String,
    /// Combined similarity + usage-boost score.
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
    schema_version: u32,
    entries: Vec<IndexEntry>,
}

struct IndexData {
    entries: Vec<IndexEntry>,
    vectors: Vec<Vec<f32>>,
}

impl IndexData {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            vectors: Vec::new(),
        }
    }
}

/// Semantic search index over the registered tool catalog.
///
/// `current` is swapped atomically on each rebuild so in-flight queries
/// never observe a half-built index.
pub struct ToolIndex {
    embedder: Arc<Embedder>,
    current: ArcSwap<IndexData>,
    ranker: Arc<SearchRanker>,
    default_top_k: usize,
}

impl ToolIndex {
    /// Construct an empty index (not yet built).
    #[must_use]
    pub fn new(embedder: Arc<Embedder>, ranker: Arc<SearchRanker>, config: &IndexConfig) -> Self {
        Self {
            embedder,
            current: ArcSwap::from_pointee(IndexData::empty()),
            ranker,
            default_top_k: config.default_top_k,
        }
    }

    /// Load the persisted index from disk if present and well-formed;
    /// otherwise rebuild from the registry's current contents.
    ///
    /// # Errors
    ///
    /// Returns an error only if a fresh rebuild is also needed and fails
    /// (e.g. the embedding model cannot run).
    pub fn load_or_rebuild(
        &self,
        registry: &RegistryStore,
        index_file: &Path,
        metadata_file: &Path,
    ) -> Result<()> {
        match Self::load_from_disk(index_file, metadata_file) {
            Ok(Some(data)) => {
                self.current.store(Arc::new(data));
                Ok(())
            }
            Ok(None) => self.rebuild(registry),
            Err(e) => {
                tracing::warn!(error = %e, "corrupt tool index on disk, deleting and rebuilding");
                let _ = std::fs::remove_file(index_file);
                let _ = std::fs::remove_file(metadata_file);
                self.rebuild(registry)
            }
        }
    }

    fn load_from_disk(index_file: &Path, metadata_file: &Path) -> Result<Option<IndexData>> {
        if !index_file.exists() || !metadata_file.exists() {
            return Ok(None);
        }

        let metadata_json = std::fs::read_to_string(metadata_file)?;
        let metadata: MetadataFile = serde_json::from_str(&metadata_json)?;
        if metadata.schema_version != SCHEMA_VERSION {
            return Ok(None);
        }

        let bytes = std::fs::read(index_file)?;
        let vectors = decode_vectors(&bytes, metadata.entries.len())?;

        Ok(Some(IndexData {
            entries: metadata.entries,
            vectors,
        }))
    }

    /// Rebuild the index from the registry's current contents and persist
    /// it is left to the caller (see [`ToolIndex::persist`]).
    ///
    /// # Errors
    ///
    /// Returns `Error::IndexUnavailable` if the embedding model fails to run.
    pub fn rebuild(&self, registry: &RegistryStore) -> Result<()> {
        let snapshot = registry.snapshot();
        let mut entries = Vec::new();
        let mut blobs = Vec::new();

        for service in snapshot.list(&crate::registry::ListFilter::default()) {
            for tool in &service.tools {
                let blob = Embedder::compose_blob(&tool.description, &tool.tags);
                entries.push(IndexEntry {
                    service_path: service.path.clone(),
                    service_name: service.name.clone(),
                    service_tags: service.tags.clone(),
                    tool_name: tool.name.clone(),
                    description: tool.description.clone(),
                    tool_tags: tool.tags.clone(),
                });
                blobs.push(blob);
            }
        }

        let vectors = if blobs.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(&blobs)?
        };

        self.current.store(Arc::new(IndexData { entries, vectors }));
        tracing::info!(tools = blobs.len(), "rebuilt tool index");
        Ok(())
    }

    /// Persist the current index to disk atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be written.
    pub fn persist(&self, index_file: &Path, metadata_file: &Path) -> Result<()> {
        let data = self.current.load();

        if let Some(parent) = index_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let metadata = MetadataFile {
            schema_version: SCHEMA_VERSION,
            entries: data.entries.clone(),
        };
        let metadata_json = serde_json::to_string_pretty(&metadata)?;
        let metadata_tmp = metadata_file.with_extension("json.tmp");
        std::fs::write(&metadata_tmp, metadata_json)?;
        std::fs::rename(&metadata_tmp, metadata_file)?;

        let bytes = encode_vectors(&data.vectors);
        let index_tmp = index_file.with_extension("bin.tmp");
        std::fs::write(&index_tmp, bytes)?;
        std::fs::rename(&index_tmp, index_file)?;

        Ok(())
    }

    /// Find the top-k tools most relevant to `query`, optionally restricted
    /// to Services whose tags are a superset of `tags` (case-insensitive AND).
    ///
    /// # Errors
    ///
    /// Returns `Error::IndexUnavailable` if the query cannot be embedded.
    pub fn query(&self, query: &str, top_k: Option<usize>, tags: &[String]) -> Result<Vec<QueryHit>> {
        let data = self.current.load();
        if data.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_query(query)?;
        let wanted: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();

        let mut scored: Vec<QueryHit> = data
            .entries
            .iter()
            .zip(data.vectors.iter())
            .filter(|(entry, _)| tags_match(&entry.service_tags, &wanted))
            .map(|(entry, vector)| {
                let similarity = cosine_similarity(&query_vec, vector);
                let usage = self.ranker.usage_count(&entry.service_name, &entry.tool_name);
                #[allow(clippy::cast_precision_loss)]
                let usage_boost = if usage > 0 { ((usage + 1) as f32).log2() * 0.01 } else { 0.0 };
                QueryHit {
                    service_path: entry.service_path.clone(),
                    service_name: entry.service_name.clone(),
                    tool_name: entry.tool_name.clone(),
                    description: entry.description.clone(),
                    score: similarity + usage_boost,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let k = top_k.unwrap_or(self.default_top_k);
        scored.truncate(k);
        Ok(scored)
    }

    /// Number of tools currently indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.load().entries.len()
    }

    /// Whether the index currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn tags_match(service_tags: &[String], wanted_lower: &[String]) -> bool {
    if wanted_lower.is_empty() {
        return true;
    }
    let have: Vec<String> = service_tags.iter().map(|t| t.to_lowercase()).collect();
    wanted_lower.iter().all(|w| have.contains(w))
}

fn encode_vectors(vectors: &[Vec<f32>]) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation)]
    let count = vectors.len() as u64;
    let mut bytes = Vec::with_capacity(16 + vectors.len() * EMBEDDING_DIM * 4);
    bytes.extend_from_slice(&VECTOR_FILE_MAGIC.to_le_bytes());
    #[allow(clippy::cast_possible_truncation)]
    bytes.extend_from_slice(&(EMBEDDING_DIM as u32).to_le_bytes());
    bytes.extend_from_slice(&count.to_le_bytes());
    for vector in vectors {
        for component in vector {
            bytes.extend_from_slice(&component.to_le_bytes());
        }
    }
    bytes
}

fn decode_vectors(bytes: &[u8], expected_count: usize) -> Result<Vec<Vec<f32>>> {
    if bytes.len() < 16 {
        return Err(Error::IndexUnavailable("vector file truncated".to_string()));
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if magic != VECTOR_FILE_MAGIC {
        return Err(Error::IndexUnavailable("vector file magic mismatch".to_string()));
    }
    let dim = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    if dim != EMBEDDING_DIM {
        return Err(Error::IndexUnavailable("vector file dimension mismatch".to_string()));
    }
    let count = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
    if count != expected_count {
        return Err(Error::IndexUnavailable("vector file count mismatch".to_string()));
    }

    let expected_len = 16 + count * dim * 4;
    if bytes.len() != expected_len {
        return Err(Error::IndexUnavailable("vector file length mismatch".to_string()));
    }

    let mut vectors = Vec::with_capacity(count);
    let mut offset = 16;
    for _ in 0..count {
        let mut vector = Vec::with_capacity(dim);
        for _ in 0..dim {
            let component = f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
            vector.push(component);
            offset += 4;
        }
        vectors.push(vector);
    }
    Ok(vectors)
}

/// Spawn a task that watches `registry` for mutation events and rebuilds
/// (then persists) the index after a debounce window of quiet.
pub fn spawn_rebuild_task(
    index: Arc<ToolIndex>,
    registry: Arc<RegistryStore>,
    debounce: Duration,
    index_file: std::path::PathBuf,
    metadata_file: std::path::PathBuf,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut events = registry.subscribe();
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Ok(_event) = event else { continue };
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep(debounce) => break,
                            more = events.recv() => {
                                if more.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    if let Err(e) = index.rebuild(&registry) {
                        tracing::warn!(error = %e, "tool index rebuild failed, keeping previous index");
                        continue;
                    }
                    if let Err(e) = index.persist(&index_file, &metadata_file) {
                        tracing::warn!(error = %e, "failed to persist tool index");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("tool index rebuild task shutting down");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let vectors = vec![vec![1.0; EMBEDDING_DIM], vec![0.5; EMBEDDING_DIM]];
        let bytes = encode_vectors(&vectors);
        let decoded = decode_vectors(&bytes, 2).unwrap();
        assert_eq!(decoded, vectors);
    }

    #[test]
    fn decode_rejects_wrong_count() {
        let vectors = vec![vec![1.0; EMBEDDING_DIM]];
        let bytes = encode_vectors(&vectors);
        assert!(decode_vectors(&bytes, 2).is_err());
    }

    #[test]
    fn decode_rejects_truncated_file() {
        assert!(decode_vectors(&[1, 2, 3], 0).is_err());
    }

    #[test]
    fn tags_match_requires_superset() {
        let have = vec!["time".to_string(), "utility".to_string()];
        assert!(tags_match(&have, &["time".to_string()]));
        assert!(!tags_match(&have, &["finance".to_string()]));
        assert!(tags_match(&have, &[]));
    }

    #[test]
    fn tags_match_is_case_insensitive() {
        let have = vec!["Time".to_string()];
        assert!(tags_match(&have, &["time".to_string()]));
    }
}
