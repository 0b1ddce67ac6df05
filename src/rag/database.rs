use log::{ info, warn };
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::path::{ Path, PathBuf };
use std::sync::Arc;
use walkdir::WalkDir;

use crate::ingest::flavor::{ CUISINE_DATA_FILE, INGREDIENT_DATA_FILE };
use crate::ingest::read_json;
use crate::ingest::sections::SECTIONS_FILE;
use crate::llm::embedding::EmbeddingClient;
use super::chunking::{
    chunk_csv_simple,
    chunk_cuisine_ingredients,
    chunk_fcs_json,
    chunk_ingredient_data,
    chunk_recipe_json,
    chunk_reddit_json,
    chunk_sections_json,
    Chunk,
};
use super::splitter::{ apply_recursive_chunking, RecursiveTextSplitter };
use super::store::{ ScoredDocument, StoredDocument, VectorStore };

pub const DEFAULT_BATCH_SIZE: usize = 5000;
const FUNDAMENTALS_FILES: [&str; 2] = ["FCS.json", "healthy_cooking_method.json"];
const RECIPE_DIR: &str = "foc";
const REDDIT_DIR: &str = "reddit";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestReport {
    /// Chunks produced before recursive splitting.
    pub raw_chunks: usize,
    /// Chunks actually stored.
    pub stored_chunks: usize,
    pub batches: usize,
    pub by_type: BTreeMap<String, usize>,
}

/// The cooking knowledge base: chunks processed files into a vector store
/// and answers similarity queries against it.
pub struct CookingDb {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    splitter: RecursiveTextSplitter,
    batch_size: usize,
}

fn list_files(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == extension))
        .collect();
    files.sort();
    files
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// Loads a JSON file and chunks it; unreadable files are logged and skipped.
fn chunk_json_file(path: &Path, chunker: fn(&Value, &str) -> Vec<Chunk>) -> Vec<Chunk> {
    match read_json(path) {
        Ok(data) => chunker(&data, &file_label(path)),
        Err(e) => {
            warn!("Skipping {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Gathers chunks from every known file under `processed_dir`, in ingestion order.
pub fn collect_chunks(processed_dir: &Path) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for name in FUNDAMENTALS_FILES {
        let path = processed_dir.join(name);
        if path.exists() {
            chunks.extend(chunk_json_file(&path, chunk_fcs_json));
        }
    }

    let recipe_dir = processed_dir.join(RECIPE_DIR);
    if recipe_dir.is_dir() {
        for path in list_files(&recipe_dir, "json") {
            if file_label(&path).contains("sections") {
                continue;
            }
            chunks.extend(chunk_json_file(&path, chunk_recipe_json));
        }
    }

    let ingredient_path = processed_dir.join(INGREDIENT_DATA_FILE);
    if ingredient_path.exists() {
        chunks.extend(chunk_json_file(&ingredient_path, chunk_ingredient_data));
    }

    for path in list_files(processed_dir, "csv") {
        chunks.extend(chunk_csv_simple(&path));
    }

    let reddit_dir = processed_dir.join(REDDIT_DIR);
    if reddit_dir.is_dir() {
        for path in list_files(&reddit_dir, "json") {
            chunks.extend(chunk_reddit_json(&path));
        }
    }

    let cuisine_path = processed_dir.join(CUISINE_DATA_FILE);
    if cuisine_path.exists() {
        chunks.extend(chunk_json_file(&cuisine_path, chunk_cuisine_ingredients));
    }

    let sections_path = processed_dir.join(SECTIONS_FILE);
    if sections_path.exists() {
        chunks.extend(chunk_json_file(&sections_path, chunk_sections_json));
    }

    chunks
}

impl CookingDb {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            store,
            embedder,
            splitter: RecursiveTextSplitter::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_splitter(mut self, splitter: RecursiveTextSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub async fn ingest_data(
        &self,
        processed_dir: &Path
    ) -> Result<IngestReport, Box<dyn StdError + Send + Sync>> {
        info!("Ingesting data from {}...", processed_dir.display());
        let raw = collect_chunks(processed_dir);
        let mut report = IngestReport {
            raw_chunks: raw.len(),
            ..Default::default()
        };

        let chunks = apply_recursive_chunking(raw, &self.splitter);
        if chunks.is_empty() {
            info!("No data found to ingest.");
            return Ok(report);
        }

        for chunk in &chunks {
            *report.by_type.entry(chunk.kind().to_string()).or_insert(0) += 1;
        }

        info!("Adding {} chunks to database...", chunks.len());
        for (batch_idx, batch) in chunks.chunks(self.batch_size).enumerate() {
            let offset = batch_idx * self.batch_size;
            info!("   -> Processing batch {} to {}...", offset, offset + batch.len());

            let texts: Vec<String> = batch
                .iter()
                .map(|c| c.text.clone())
                .collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            let docs: Vec<StoredDocument> = batch
                .iter()
                .enumerate()
                .map(|(k, c)| StoredDocument {
                    id: format!("doc_{}", offset + k),
                    text: c.text.clone(),
                    metadata: c.metadata.clone(),
                })
                .collect();

            self.store.add(docs, embeddings).await?;
            report.stored_chunks += batch.len();
            report.batches += 1;
        }
        info!("Ingestion complete.");
        Ok(report)
    }

    pub async fn query(
        &self,
        text: &str,
        n_results: usize
    ) -> Result<Vec<ScoredDocument>, Box<dyn StdError + Send + Sync>> {
        let embedding = self.embedder.embed(text).await?.embedding;
        self.store.query(&embedding, n_results).await
    }

    pub async fn count(&self) -> Result<usize, Box<dyn StdError + Send + Sync>> {
        self.store.count().await
    }

    pub async fn reset(&self) -> Result<(), Box<dyn StdError + Send + Sync>> {
        info!("Clearing the vector index");
        self.store.reset().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::embedding::EmbeddingResponse;
    use crate::rag::memory::LocalVectorStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::fs;

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingClient for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<EmbeddingResponse, Box<dyn StdError + Send + Sync>> {
            let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count() as f32;
            Ok(EmbeddingResponse { embedding: vec![1.0, vowels] })
        }
    }

    fn write(path: &Path, value: &Value) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, value.to_string()).unwrap();
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("FCS.json"), &json!({ "introduction": "Cooking is heat." }));
        write(&root.join("foc/soup.json"), &json!({ "dish_name": "Soup" }));
        write(&root.join("foc/foc_sections_backup.json"), &json!({ "dish_name": "Ignored" }));
        write(&root.join("foc/broken.json"), &json!(null));
        fs::write(root.join("foc/bad.json"), "{oops").unwrap();
        fs::write(root.join("temps.csv"), "food,temp\nchicken,74C\n").unwrap();
        write(
            &root.join("reddit/posts.json"),
            &json!([{ "title": "Rice?", "selftext": "How much water?", "comments": [] }])
        );
        write(&root.join(SECTIONS_FILE), &json!({ "Knife Skills": "Hold the knife firmly." }));
        dir
    }

    #[test]
    fn chunks_follow_ingestion_order() {
        let dir = fixture();
        let kinds: Vec<String> = collect_chunks(dir.path())
            .iter()
            .map(|c| c.kind().to_string())
            .collect();
        assert_eq!(kinds, ["introduction", "recipe", "recipe", "csv_data", "reddit_post", "section"]);
    }

    #[tokio::test]
    async fn ingest_assigns_sequential_ids_across_batches() {
        let dir = fixture();
        let store = Arc::new(LocalVectorStore::in_memory());
        let db = CookingDb::new(store.clone(), Arc::new(LengthEmbedder)).with_batch_size(4);

        let report = db.ingest_data(dir.path()).await.unwrap();
        assert_eq!(report.raw_chunks, 6);
        assert_eq!(report.stored_chunks, 6);
        assert_eq!(report.batches, 2);
        assert_eq!(report.by_type["recipe"], 2);
        assert_eq!(db.count().await.unwrap(), 6);

        let mut ids: Vec<String> = store
            .query(&[1.0, 1.0], 10).await
            .unwrap()
            .into_iter()
            .map(|h| h.document.id)
            .collect();
        ids.sort();
        assert_eq!(ids, ["doc_0", "doc_1", "doc_2", "doc_3", "doc_4", "doc_5"]);
    }

    #[tokio::test]
    async fn empty_directory_ingests_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = CookingDb::new(Arc::new(LocalVectorStore::in_memory()), Arc::new(LengthEmbedder));
        let report = db.ingest_data(dir.path()).await.unwrap();
        assert_eq!(report, IngestReport::default());
        assert!(db.query("anything", 3).await.unwrap().is_empty());
    }
}
