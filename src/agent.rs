use crate::cache::AnswerCache;
use crate::cli::Args;
use crate::config::prompt::{ self, PromptError };
use crate::history::{ initialize_history_store, HistoryStore };
use crate::llm::{ parse_llm_type, GenerationOptions, LlmConfig };
use crate::llm::chat::{ ChatClient, new_client as new_chat_client };
use crate::llm::embedding::{ EmbeddingClient, new_client as new_embedding_client };
use crate::models::chat::{ ChatTurn, Conversation, ROLE_ASSISTANT, ROLE_USER };
use crate::rag::database::CookingDb;
use crate::rag::rag::{ format_display, RagEngine, RagStream, SharedPrompts };
use crate::rag::splitter::RecursiveTextSplitter;
use crate::rag::store::create_vector_store;

use futures::StreamExt;
use log::{ error, info, warn };
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{ mpsc, RwLock };

fn non_empty(key: &str) -> Option<String> {
    if key.is_empty() { None } else { Some(key.to_string()) }
}

pub fn initialize_chat_client(args: &Args) -> Result<Arc<dyn ChatClient>, Box<dyn Error + Send + Sync>> {
    let chat_config = LlmConfig {
        llm_type: parse_llm_type(&args.chat_llm_type)?,
        base_url: args.chat_base_url.clone(),
        api_key: non_empty(&args.chat_api_key),
        completion_model: args.chat_model.clone(),
        embedding_model: None,
        generation: GenerationOptions {
            max_new_tokens: args.max_new_tokens,
            temperature: args.temperature,
            top_p: args.top_p,
        },
    };
    let chat_client = new_chat_client(&chat_config)?;
    info!(
        "Chat client configured: Type={}, Model={:?}, BaseURL={:?}",
        args.chat_llm_type,
        chat_config.completion_model.as_deref().unwrap_or("adapter default"),
        chat_config.base_url.as_deref().unwrap_or("adapter default")
    );
    Ok(chat_client)
}

pub fn initialize_embedding_client(
    args: &Args
) -> Result<Arc<dyn EmbeddingClient>, Box<dyn Error + Send + Sync>> {
    let embedding_config = LlmConfig {
        llm_type: parse_llm_type(&args.embedding_llm_type)?,
        base_url: args.embedding_base_url.clone(),
        api_key: non_empty(&args.embedding_api_key),
        embedding_model: args.embedding_model.clone(),
        ..Default::default()
    };
    let embedding_client = new_embedding_client(&embedding_config)?;
    info!(
        "Embedding client configured: Type={}, Model={:?}, BaseURL={:?}",
        args.embedding_llm_type,
        embedding_config.embedding_model.as_deref().unwrap_or("adapter default"),
        embedding_config.base_url.as_deref().unwrap_or("adapter default")
    );
    Ok(embedding_client)
}

/// Opens the configured vector store behind a [`CookingDb`].
pub async fn initialize_database(args: &Args) -> Result<Arc<CookingDb>, Box<dyn Error + Send + Sync>> {
    let embedding_client = initialize_embedding_client(args)?;
    let store = create_vector_store(args).await?;
    let db = CookingDb::new(store, embedding_client)
        .with_splitter(RecursiveTextSplitter::new(args.chunk_size, args.chunk_overlap))
        .with_batch_size(args.ingest_batch_size);
    Ok(Arc::new(db))
}

/// The chat-facing side of the assistant: runs each turn through the answer
/// cache and the RAG pipeline and records it in the conversation history.
pub struct CookingAssistant {
    rag: RagEngine,
    history_store: Arc<dyn HistoryStore>,
    cache: Option<AnswerCache>,
    prompts: SharedPrompts,
    prompts_path: String,
}

impl CookingAssistant {
    pub async fn new(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let prompt_config = prompt::load_prompts_or_default(&args.prompts_path)?;
        let prompts: SharedPrompts = Arc::new(RwLock::new(prompt_config));

        let chat_client = initialize_chat_client(args)?;
        let db = initialize_database(args).await?;
        match db.count().await {
            Ok(0) => warn!("The vector index is empty. Run `misohelpful setup` to build it."),
            Ok(n) => info!("Vector index holds {} documents", n),
            Err(e) => warn!("Could not count indexed documents: {}", e),
        }

        let rag = RagEngine::new(db, chat_client, prompts.clone(), args.rag_default_limit);
        let history_store = initialize_history_store(args)?;
        let cache = AnswerCache::init(args).await;

        Ok(Self::from_parts(rag, history_store, cache, prompts, args.prompts_path.clone()))
    }

    pub fn from_parts(
        rag: RagEngine,
        history_store: Arc<dyn HistoryStore>,
        cache: Option<AnswerCache>,
        prompts: SharedPrompts,
        prompts_path: String
    ) -> Self {
        Self { rag, history_store, cache, prompts, prompts_path }
    }

    async fn record(&self, conversation_id: &str, role: &str, content: &str) {
        if let Err(e) = self.history_store.add_message(conversation_id, role, content).await {
            warn!("History write ({}) failed: {}", role, e);
        }
    }

    async fn apology(&self) -> String {
        self.prompts.read().await.messages.apology.clone()
    }

    async fn cached_answer(&self, message: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;
        match cache.get(message).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Answer cache lookup failed: {}", e);
                None
            }
        }
    }

    async fn remember_answer(&self, message: &str, display: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(message, display).await {
                warn!("Failed to cache answer: {}", e);
            }
        }
    }

    async fn generate(&self, message: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        if let Some(hit) = self.cached_answer(message).await {
            info!("Answer served from cache");
            return Ok(hit);
        }
        let answer = self.rag.answer_question(message).await?;
        let display = answer.to_display();
        // Only grounded answers are cached; the index may grow later.
        if !answer.sources.is_empty() {
            self.remember_answer(message, &display).await;
        }
        Ok(display)
    }

    async fn generate_streaming(
        &self,
        message: &str,
        fragments: &mpsc::Sender<String>
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        if let Some(hit) = self.cached_answer(message).await {
            info!("Answer served from cache");
            let _ = fragments.send(hit.clone()).await;
            return Ok(hit);
        }

        let RagStream { sources, mut tokens } = self.rag.answer_question_stream(message).await?;
        let mut answer = String::new();
        while let Some(token) = tokens.next().await {
            let token = token?;
            answer.push_str(&token);
            // A closed receiver only means nobody is watching the partials.
            let _ = fragments.send(token).await;
        }

        let display = format_display(answer.trim(), &sources);
        if !sources.is_empty() {
            self.remember_answer(message, &display).await;
        }
        Ok(display)
    }

    fn finish_turn(&self, result: Result<String, Box<dyn Error + Send + Sync>>, apology: String) -> ChatTurn {
        match result {
            Ok(response) => ChatTurn { response, error: None },
            Err(e) => {
                error!("Error generating answer: {}", e);
                ChatTurn { response: apology, error: Some(e.to_string()) }
            }
        }
    }

    /// Runs one chat turn. Failures become the apology reply; both the
    /// question and whatever was shown are always recorded.
    pub async fn respond(&self, conversation_id: &str, message: &str) -> ChatTurn {
        info!("Processing message for conversation {}", conversation_id);
        self.record(conversation_id, ROLE_USER, message).await;
        let result = self.generate(message).await;
        let turn = self.finish_turn(result, self.apology().await);
        self.record(conversation_id, ROLE_ASSISTANT, &turn.response).await;
        turn
    }

    /// Same as [`respond`](Self::respond), forwarding answer fragments to
    /// `fragments` while they are generated.
    pub async fn respond_streaming(
        &self,
        conversation_id: &str,
        message: &str,
        fragments: mpsc::Sender<String>
    ) -> ChatTurn {
        info!("Processing streamed message for conversation {}", conversation_id);
        self.record(conversation_id, ROLE_USER, message).await;
        let result = self.generate_streaming(message, &fragments).await;
        drop(fragments);
        let turn = self.finish_turn(result, self.apology().await);
        self.record(conversation_id, ROLE_ASSISTANT, &turn.response).await;
        turn
    }

    pub async fn history(&self, conversation_id: &str) -> Result<Conversation, Box<dyn Error + Send + Sync>> {
        self.history_store.get_conversation(conversation_id, 0).await
    }

    /// Swaps in the prompt file when it changed since the last load.
    /// Returns whether anything was reloaded.
    pub async fn reload_prompts_if_changed(&self) -> Result<bool, PromptError> {
        if !Path::new(&self.prompts_path).exists() {
            return Ok(false);
        }
        let mut current = self.prompts.write().await;
        match prompt::reload_prompts_if_changed(&self.prompts_path, &current)? {
            Some(new_config) => {
                *current = new_config;
                info!("Prompts successfully reloaded");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn document_count(&self) -> Result<usize, Box<dyn Error + Send + Sync>> {
        self.rag.db().count().await
    }
}
