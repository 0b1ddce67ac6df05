#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use serde_json::json;
use std::error::Error;
use std::path::Path;
use std::sync::{ Arc, Mutex };
use tokio::sync::RwLock;

use misohelpful::agent::CookingAssistant;
use misohelpful::config::prompt::PromptConfig;
use misohelpful::history::MemoryHistoryStore;
use misohelpful::llm::chat::{ ChatClient, CompletionResponse, TokenStream };
use misohelpful::llm::embedding::{ EmbeddingClient, EmbeddingResponse };
use misohelpful::rag::database::CookingDb;
use misohelpful::rag::memory::LocalVectorStore;
use misohelpful::rag::rag::{ RagEngine, SharedPrompts };

const DIMENSION: usize = 24;

/// Bag-of-words embedding: each lowercase word bumps one bucket.
pub struct WordHashEmbedder;

#[async_trait]
impl EmbeddingClient for WordHashEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, Box<dyn Error + Send + Sync>> {
        let mut embedding = vec![0.0f32; DIMENSION];
        for word in text.split(|c: char| !c.is_alphabetic()).filter(|w| !w.is_empty()) {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
            embedding[bucket % DIMENSION] += 1.0;
        }
        Ok(EmbeddingResponse { embedding })
    }
}

/// Answers every prompt with a fixed reply, or fails when built with `failing`.
pub struct ScriptedChat {
    reply: Option<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedChat {
    pub fn answering(reply: &str) -> Arc<Self> {
        Arc::new(Self { reply: Some(reply.to_string()), prompts: Mutex::new(Vec::new()) })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { reply: None, prompts: Mutex::new(Vec::new()) })
    }

    fn answer(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().ok_or_else(|| "model offline".into())
    }
}

#[async_trait]
impl ChatClient for ScriptedChat {
    async fn complete(&self, prompt: &str) -> Result<CompletionResponse, Box<dyn Error + Send + Sync>> {
        Ok(CompletionResponse { response: self.answer(prompt)? })
    }

    async fn stream_completion(&self, prompt: &str) -> Result<TokenStream, Box<dyn Error + Send + Sync>> {
        let reply = self.answer(prompt)?;
        let tokens: Vec<Result<String, Box<dyn Error + Send + Sync>>> = reply
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(tokens)))
    }
}

pub fn write_processed_fixture(dir: &Path) {
    std::fs::write(
        dir.join("FCS.json"),
        json!({
            "introduction": "Good cooking starts with controlling heat.",
            "cooking_methods": {
                "dry_heat": {
                    "description": "Methods that use hot air or fat.",
                    "techniques": { "Searing": "Sear chicken in a hot pan until a golden crust forms." }
                }
            }
        }).to_string()
    ).unwrap();
    std::fs::create_dir_all(dir.join("reddit")).unwrap();
    std::fs::write(
        dir.join("reddit").join("cooking.json"),
        json!([{ "title": "Fluffy rice?", "selftext": "Rinse the rice first.", "comments": [] }]).to_string()
    ).unwrap();
}

pub async fn indexed_db(processed: Option<&Path>) -> Arc<CookingDb> {
    let db = CookingDb::new(Arc::new(LocalVectorStore::in_memory()), Arc::new(WordHashEmbedder));
    if let Some(dir) = processed {
        db.ingest_data(dir).await.unwrap();
    }
    Arc::new(db)
}

pub fn default_prompts() -> SharedPrompts {
    Arc::new(RwLock::new(Arc::new(PromptConfig::default())))
}

pub fn assistant_with(
    db: Arc<CookingDb>,
    chat: Arc<ScriptedChat>,
    prompts_path: &str
) -> (Arc<CookingAssistant>, Arc<MemoryHistoryStore>) {
    let prompts = default_prompts();
    let rag = RagEngine::new(db, chat, prompts.clone(), 3);
    let history = Arc::new(MemoryHistoryStore::new());
    let assistant = CookingAssistant::from_parts(rag, history.clone(), None, prompts, prompts_path.to_string());
    (Arc::new(assistant), history)
}
