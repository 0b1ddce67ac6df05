use crate::config::prompt::{ self, PromptConfig };
use crate::llm::chat::{ ChatClient, TokenStream };

use futures::stream;
use log::{ debug, info };
use serde::{ Deserialize, Serialize };
use std::collections::BTreeSet;
use std::{ error::Error as StdError, sync::Arc };
use std::fmt;
use tokio::sync::RwLock;

use super::database::CookingDb;
use super::store::ScoredDocument;

pub const DEFAULT_N_RESULTS: usize = 3;
const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";
const UNKNOWN_SOURCE: &str = "unknown";

/// Prompt templates shared between the engine and whoever reloads them.
pub type SharedPrompts = Arc<RwLock<Arc<PromptConfig>>>;

#[derive(Debug)]
pub struct RagEngineError(pub String);

impl fmt::Display for RagEngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RagEngine Error: {}", self.0)
    }
}

impl StdError for RagEngineError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<String>,
}

impl RagAnswer {
    /// The answer followed by a bold sources line, as shown in the chat.
    pub fn to_display(&self) -> String {
        format_display(&self.answer, &self.sources)
    }
}

pub fn format_display(answer: &str, sources: &[String]) -> String {
    if sources.is_empty() {
        answer.to_string()
    } else {
        format!("{}\n\n**Sources:** {}", answer, sources.join(", "))
    }
}

/// A streamed answer. `sources` is known before the first token arrives.
pub struct RagStream {
    pub sources: Vec<String>,
    pub tokens: TokenStream,
}

fn source_name(doc: &ScoredDocument) -> String {
    doc.document
        .source()
        .and_then(|s| s.rsplit(['/', '\\']).next())
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_SOURCE)
        .to_string()
}

pub fn collect_sources(docs: &[ScoredDocument]) -> Vec<String> {
    docs.iter()
        .map(source_name)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn build_context(docs: &[ScoredDocument]) -> String {
    docs.iter()
        .map(|d| d.document.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

#[derive(Clone)]
pub struct RagEngine {
    db: Arc<CookingDb>,
    chat_client: Arc<dyn ChatClient>,
    prompts: SharedPrompts,
    n_results: usize,
}

impl RagEngine {
    pub fn new(
        db: Arc<CookingDb>,
        chat_client: Arc<dyn ChatClient>,
        prompts: SharedPrompts,
        n_results: usize
    ) -> Self {
        Self {
            db,
            chat_client,
            prompts,
            n_results: n_results.max(1),
        }
    }

    pub fn db(&self) -> &Arc<CookingDb> {
        &self.db
    }

    async fn retrieve(&self, question: &str) -> Result<Vec<ScoredDocument>, Box<dyn StdError + Send + Sync>> {
        let docs = self.db
            .query(question, self.n_results).await
            .map_err(|e| Box::new(RagEngineError(format!("Retrieval failed: {}", e))))?;
        debug!("Retrieved {} documents for '{}'", docs.len(), question);
        Ok(docs)
    }

    async fn no_results_message(&self) -> String {
        self.prompts.read().await.messages.no_results.clone()
    }

    async fn build_prompt(
        &self,
        docs: &[ScoredDocument],
        question: &str
    ) -> Result<String, Box<dyn StdError + Send + Sync>> {
        let context = build_context(docs);
        let config = self.prompts.read().await.clone();
        let final_prompt = prompt::get_rag_answer_prompt(&config, &context, question)?;
        debug!("--- Final Answer Prompt ---\n{}\n--------------------------", final_prompt);
        Ok(final_prompt)
    }

    pub async fn answer_question(&self, question: &str) -> Result<RagAnswer, Box<dyn StdError + Send + Sync>> {
        let docs = self.retrieve(question).await?;
        if docs.is_empty() {
            info!("No documents matched the question");
            return Ok(RagAnswer {
                answer: self.no_results_message().await,
                sources: Vec::new(),
            });
        }

        let final_prompt = self.build_prompt(&docs, question).await?;
        let answer_resp = self.chat_client
            .complete(&final_prompt).await
            .map_err(|e| Box::new(RagEngineError(format!("Final completion failed: {}", e))))?;

        Ok(RagAnswer {
            answer: answer_resp.response.trim().to_string(),
            sources: collect_sources(&docs),
        })
    }

    /// Like [`answer_question`](Self::answer_question) but yields the answer
    /// as it is generated.
    pub async fn answer_question_stream(
        &self,
        question: &str
    ) -> Result<RagStream, Box<dyn StdError + Send + Sync>> {
        let docs = self.retrieve(question).await?;
        if docs.is_empty() {
            info!("No documents matched the question");
            let message = self.no_results_message().await;
            return Ok(RagStream {
                sources: Vec::new(),
                tokens: Box::pin(stream::once(async move { Ok(message) })),
            });
        }

        let final_prompt = self.build_prompt(&docs, question).await?;
        let tokens = self.chat_client
            .stream_completion(&final_prompt).await
            .map_err(|e| Box::new(RagEngineError(format!("Streaming completion failed: {}", e))))?;

        Ok(RagStream {
            sources: collect_sources(&docs),
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::CompletionResponse;
    use crate::llm::embedding::{ EmbeddingClient, EmbeddingResponse };
    use crate::rag::memory::LocalVectorStore;
    use crate::rag::store::{ StoredDocument, VectorStore };
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::{ Map, Value };
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<EmbeddingResponse, Box<dyn StdError + Send + Sync>> {
            Ok(EmbeddingResponse { embedding: vec![1.0, 0.0] })
        }
    }

    #[derive(Default)]
    struct RecordingChat {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatClient for RecordingChat {
        async fn complete(&self, prompt: &str) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(CompletionResponse { response: "  Pat the chicken dry first.\n".into() })
        }

        async fn stream_completion(&self, prompt: &str) -> Result<TokenStream, Box<dyn StdError + Send + Sync>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let parts: Vec<Result<String, Box<dyn StdError + Send + Sync>>> = vec![Ok("Pat ".into()), Ok("dry.".into())];
            Ok(Box::pin(stream::iter(parts)))
        }
    }

    fn doc(id: &str, text: &str, source: Option<&str>) -> StoredDocument {
        let mut metadata = Map::new();
        if let Some(s) = source {
            metadata.insert("source".into(), Value::from(s));
        }
        StoredDocument { id: id.into(), text: text.into(), metadata }
    }

    async fn engine(docs: Vec<StoredDocument>) -> (RagEngine, Arc<RecordingChat>) {
        let store = Arc::new(LocalVectorStore::in_memory());
        let embeddings = docs
            .iter()
            .map(|_| vec![1.0, 0.0])
            .collect();
        store.add(docs, embeddings).await.unwrap();
        let db = Arc::new(CookingDb::new(store, Arc::new(FixedEmbedder)));
        let chat = Arc::new(RecordingChat::default());
        let prompts: SharedPrompts = Arc::new(RwLock::new(Arc::new(PromptConfig::default())));
        (RagEngine::new(db, chat.clone(), prompts, DEFAULT_N_RESULTS), chat)
    }

    #[tokio::test]
    async fn empty_index_returns_no_results_message() {
        let (engine, chat) = engine(Vec::new()).await;
        let answer = engine.answer_question("How do I sear?").await.unwrap();
        assert_eq!(answer.answer, "I couldn't find any relevant cooking info in my database.");
        assert!(answer.sources.is_empty());
        assert_eq!(answer.to_display(), answer.answer);
        assert!(chat.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn answer_uses_context_and_dedups_sources() {
        let (engine, chat) = engine(
            vec![
                doc("doc_0", "Dry the chicken.", Some("data/processed/FCS.json")),
                doc("doc_1", "Use high heat.", Some("FCS.json")),
                doc("doc_2", "Rest the meat.", None)
            ]
        ).await;

        let answer = engine.answer_question("How do I sear chicken?").await.unwrap();
        assert_eq!(answer.answer, "Pat the chicken dry first.");
        assert_eq!(answer.sources, ["FCS.json", "unknown"]);
        assert_eq!(answer.to_display(), "Pat the chicken dry first.\n\n**Sources:** FCS.json, unknown");

        let prompts = chat.prompts.lock().unwrap();
        let sent = &prompts[0];
        assert!(sent.contains("Question: How do I sear chicken?<|end|>"));
        assert_eq!(sent.matches("\n\n---\n\n").count(), 2);
    }

    #[tokio::test]
    async fn stream_yields_fragments_and_sources() {
        let (engine, _) = engine(vec![doc("doc_0", "Dry the chicken.", Some("reddit/posts.json"))]).await;
        let RagStream { sources, tokens } = engine.answer_question_stream("sear?").await.unwrap();
        let parts: Vec<String> = tokens.map(|t| t.unwrap()).collect().await;
        assert_eq!(parts.concat(), "Pat dry.");
        assert_eq!(sources, ["posts.json"]);
    }

    #[tokio::test]
    async fn empty_index_streams_single_message() {
        let (engine, _) = engine(Vec::new()).await;
        let RagStream { sources, tokens } = engine.answer_question_stream("sear?").await.unwrap();
        let parts: Vec<String> = tokens.map(|t| t.unwrap()).collect().await;
        assert_eq!(parts, ["I couldn't find any relevant cooking info in my database."]);
        assert!(sources.is_empty());
    }
}
