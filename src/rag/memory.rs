use async_trait::async_trait;
use log::{ debug, info };
use serde::{ Deserialize, Serialize };
use std::collections::HashMap;
use std::error::Error as StdError;
use std::path::PathBuf;
use tokio::sync::RwLock;

use super::store::{ check_lengths, cosine_similarity, ScoredDocument, StoreError, StoredDocument, VectorStore };

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    document: StoredDocument,
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    entries: Vec<IndexEntry>,
}

#[derive(Default)]
struct Index {
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
}

impl Index {
    fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let mut index = Index::default();
        for entry in entries {
            index.upsert(entry);
        }
        index
    }

    fn upsert(&mut self, entry: IndexEntry) {
        match self.positions.get(&entry.document.id) {
            Some(&pos) => {
                self.entries[pos] = entry;
            }
            None => {
                self.positions.insert(entry.document.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }
}

/// Brute-force cosine index kept in memory and mirrored to a JSON file.
pub struct LocalVectorStore {
    path: Option<PathBuf>,
    index: RwLock<Index>,
}

impl LocalVectorStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            index: RwLock::new(Index::default()),
        }
    }

    /// Opens the index file at `path`, starting empty when it does not exist yet.
    pub async fn open(path: PathBuf) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let file: IndexFile = serde_json
                    ::from_str(&text)
                    .map_err(|e| StoreError(format!("Corrupt index '{}': {}", path.display(), e)))?;
                info!("Loaded {} documents from {}", file.entries.len(), path.display());
                file.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(Box::new(e));
            }
        };
        Ok(Self {
            path: Some(path),
            index: RwLock::new(Index::from_entries(entries)),
        })
    }

    async fn persist(&self, index: &Index) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = IndexFile { entries: index.entries.clone() };
        let text = serde_json::to_string(&file)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Persisted {} documents to {}", index.entries.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn add(
        &self,
        docs: Vec<StoredDocument>,
        embeddings: Vec<Vec<f32>>
    ) -> Result<(), Box<dyn StdError + Send + Sync>> {
        check_lengths(docs.len(), embeddings.len())?;
        let mut index = self.index.write().await;

        let expected = index.dimension().or_else(|| embeddings.first().map(|e| e.len()));
        if let Some(dim) = expected {
            if let Some(bad) = embeddings.iter().find(|e| e.len() != dim) {
                return Err(
                    Box::new(
                        StoreError(format!("Embedding dimension {} does not match index dimension {}", bad.len(), dim))
                    )
                );
            }
        }

        for (document, embedding) in docs.into_iter().zip(embeddings) {
            index.upsert(IndexEntry { document, embedding });
        }
        self.persist(&index).await
    }

    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize
    ) -> Result<Vec<ScoredDocument>, Box<dyn StdError + Send + Sync>> {
        let index = self.index.read().await;
        let mut scored: Vec<ScoredDocument> = index.entries
            .iter()
            .map(|entry| ScoredDocument {
                score: cosine_similarity(embedding, &entry.embedding),
                document: entry.document.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n_results);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize, Box<dyn StdError + Send + Sync>> {
        Ok(self.index.read().await.entries.len())
    }

    async fn reset(&self) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let mut index = self.index.write().await;
        *index = Index::default();
        self.persist(&index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{ json, Map, Value };

    fn doc(id: &str, text: &str) -> StoredDocument {
        let mut metadata = Map::new();
        metadata.insert("source".into(), Value::from(format!("data/{}.json", id)));
        StoredDocument { id: id.into(), text: text.into(), metadata }
    }

    #[tokio::test]
    async fn query_ranks_by_cosine() {
        let store = LocalVectorStore::in_memory();
        store
            .add(
                vec![doc("doc_0", "searing"), doc("doc_1", "baking"), doc("doc_2", "braising")],
                vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]]
            ).await
            .unwrap();

        let hits = store.query(&[1.0, 0.1], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.document.id.as_str()).collect();
        assert_eq!(ids, ["doc_0", "doc_2"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn same_id_overwrites() {
        let store = LocalVectorStore::in_memory();
        store.add(vec![doc("doc_0", "old")], vec![vec![1.0, 0.0]]).await.unwrap();
        store.add(vec![doc("doc_0", "new")], vec![vec![0.0, 1.0]]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.query(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].document.text, "new");
    }

    #[tokio::test]
    async fn mismatched_input_is_rejected() {
        let store = LocalVectorStore::in_memory();
        assert!(store.add(vec![doc("a", "x")], vec![]).await.is_err());
        store.add(vec![doc("a", "x")], vec![vec![1.0, 0.0]]).await.unwrap();
        assert!(store.add(vec![doc("b", "y")], vec![vec![1.0, 0.0, 0.0]]).await.is_err());
    }

    #[tokio::test]
    async fn index_survives_reopen_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index").join("cooking_assistant.json");

        let store = LocalVectorStore::open(path.clone()).await.unwrap();
        store.add(vec![doc("doc_0", "Sear over high heat.")], vec![vec![0.5, 0.5]]).await.unwrap();
        drop(store);

        let reopened = LocalVectorStore::open(path.clone()).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        let hit = &reopened.query(&[0.5, 0.5], 3).await.unwrap()[0];
        assert_eq!(hit.document.source(), Some("data/doc_0.json"));
        assert_eq!(hit.document.metadata, json!({ "source": "data/doc_0.json" }).as_object().unwrap().clone());

        reopened.reset().await.unwrap();
        let again = LocalVectorStore::open(path).await.unwrap();
        assert_eq!(again.count().await.unwrap(), 0);
    }
}
