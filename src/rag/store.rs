use async_trait::async_trait;
use log::info;
use serde::{ Deserialize, Serialize };
use serde_json::{ Map, Value };
use std::error::Error as StdError;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::cli::Args;
use super::memory::LocalVectorStore;
use super::qdrant::QdrantVectorStore;

/// A chunk as persisted in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl StoredDocument {
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub score: f32,
    pub document: StoredDocument,
}

#[derive(Debug)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector store error: {}", self.0)
    }
}

impl StdError for StoreError {}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Adds documents with their embeddings. An existing id is overwritten.
    async fn add(
        &self,
        docs: Vec<StoredDocument>,
        embeddings: Vec<Vec<f32>>
    ) -> Result<(), Box<dyn StdError + Send + Sync>>;

    /// Returns at most `n_results` documents, best match first.
    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize
    ) -> Result<Vec<ScoredDocument>, Box<dyn StdError + Send + Sync>>;

    async fn count(&self) -> Result<usize, Box<dyn StdError + Send + Sync>>;

    /// Drops every document.
    async fn reset(&self) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

pub(crate) fn check_lengths(docs: usize, embeddings: usize) -> Result<(), StoreError> {
    if docs != embeddings {
        return Err(StoreError(format!("{} documents but {} embeddings", docs, embeddings)));
    }
    Ok(())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0) as f32
}

pub async fn create_vector_store(
    args: &Args
) -> Result<Arc<dyn VectorStore>, Box<dyn StdError + Send + Sync>> {
    match args.vector_type.to_lowercase().as_str() {
        "local" => {
            let path = Path::new(&args.host).join(format!("{}.json", args.collection));
            info!("Using local vector index at {}", path.display());
            let store = LocalVectorStore::open(path).await?;
            Ok(Arc::new(store))
        }
        "qdrant" => {
            info!("Using Qdrant collection '{}' at {}", args.collection, args.host);
            let store = QdrantVectorStore::new(
                &args.host,
                &args.secret,
                &args.collection,
                args.dimension
            ).await?;
            Ok(Arc::new(store))
        }
        other => Err(Box::new(StoreError(format!("Unsupported vector store type: {}", other)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
