use clap::{ Parser, Subcommand };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    // --- Data Args ---
    /// Directory holding the raw source files (backbone.csv, srep00196-s3.csv, text exports)
    #[arg(long, env = "RAW_DATA_DIR", default_value = "data/raw", global = true)]
    pub raw_data_dir: String,

    /// Directory the extraction step writes to and ingestion reads from
    #[arg(long, env = "PROCESSED_DATA_DIR", default_value = "data/processed", global = true)]
    pub processed_data_dir: String,

    // --- History Store Args ---
    /// History chat store type (memory, redis)
    #[arg(long, env = "HISTORY_TYPE", default_value = "memory", global = true)]
    pub history_type: String,

    /// History chat store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379", global = true)]
    pub history_host: String,

    /// Prefix for Redis history keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "misohelpful:history:", global = true)]
    pub history_redis_prefix: String,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (ollama, openai)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "ollama", global = true)]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "CHAT_BASE_URL", global = true)] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider (e.g., OpenAI)
    #[arg(long, env = "CHAT_API_KEY", default_value = "", global = true)]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., tinyllama, gpt-4o-mini)
    #[arg(long, env = "CHAT_MODEL", global = true)] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    /// Maximum number of tokens generated per answer
    #[arg(long, env = "MAX_NEW_TOKENS", default_value = "300", global = true)]
    pub max_new_tokens: u32,

    /// Sampling temperature for answer generation
    #[arg(long, env = "TEMPERATURE", default_value = "0.7", global = true)]
    pub temperature: f32,

    /// Nucleus sampling cutoff for answer generation
    #[arg(long, env = "TOP_P", default_value = "0.9", global = true)]
    pub top_p: f32,

    // --- Embedding LLM Provider Args ---
    /// Type of LLM provider for text embedding (ollama, openai)
    #[arg(long, env = "EMBEDDING_LLM_TYPE", default_value = "ollama", global = true)]
    pub embedding_llm_type: String,

    /// Base URL for the Embedding LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "EMBEDDING_BASE_URL", global = true)]
    pub embedding_base_url: Option<String>,

    /// API Key for the Embedding LLM provider (e.g., OpenAI)
    #[arg(long, env = "EMBEDDING_API_KEY", default_value = "", global = true)]
    pub embedding_api_key: String,

    /// Model name for text embedding (e.g., all-minilm, text-embedding-3-small)
    #[arg(long, env = "EMBEDDING_MODEL", global = true)]
    pub embedding_model: Option<String>,

    // --- Vector Store Args ---
    /// Vector store type (local, qdrant)
    #[arg(short = 't', long, env = "VECTOR_TYPE", default_value = "local", global = true)]
    pub vector_type: String,

    /// Vector store location: a directory for `local`, a URL for `qdrant`
    #[arg(long, env = "VECTOR_HOST", default_value = "data/index", global = true)]
    pub host: String,

    /// API key for the vector store (Qdrant)
    #[arg(short = 'k', env = "VECTOR_SECRET", long, default_value = "", global = true)]
    pub secret: String,

    /// Collection name for the vector store
    #[arg(long, env = "VECTOR_COLLECTION", default_value = "cooking_assistant", global = true)]
    pub collection: String,

    /// Vector dimension size (all-minilm produces 384)
    #[arg(long, env = "VECTOR_DIMENSION", default_value = "384", global = true)]
    pub dimension: usize,

    /// Number of chunks embedded and stored per batch during ingestion
    #[arg(long, env = "INGEST_BATCH_SIZE", default_value = "5000", global = true)]
    pub ingest_batch_size: usize,

    /// Maximum characters per chunk before recursive splitting kicks in
    #[arg(long, env = "CHUNK_SIZE", default_value = "500", global = true)]
    pub chunk_size: usize,

    /// Characters carried over between neighbouring split chunks
    #[arg(long, env = "CHUNK_OVERLAP", default_value = "50", global = true)]
    pub chunk_overlap: usize,

    // --- General App Args ---
    /// Path to the prompt configuration file. Built-in templates are used when absent.
    #[arg(long, env = "PROMPTS_PATH", default_value = "json/prompts.json", global = true)]
    pub prompts_path: String,

    /// Number of documents retrieved per question.
    #[arg(long, env = "RAG_DEFAULT_LIMIT", default_value = "3", global = true)]
    pub rag_default_limit: usize,

    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:8502", global = true)]
    pub server_addr: String,

    /// Port for the HTTP chat UI and JSON API.
    #[arg(long, env = "HTTP_PORT", default_value = "8501", global = true)]
    pub http_port: u16,

    /// Optional API Key required for clients to connect to the WebSocket server. If set, clients must sign requests with it.
    #[arg(long, env = "SERVER_API_KEY", global = true)]
    pub server_api_key: Option<String>,

    // --- Caching Args ---
    /// Enable the Redis exact-match answer cache.
    #[arg(long, env = "ENABLE_CACHE", default_value = "false", global = true)]
    pub enable_cache: bool,

    /// Redis URL for the caching layer.
    #[arg(long, env = "CACHE_REDIS_URL", default_value = "redis://127.0.0.1:6379/1", global = true)] // Use DB 1 to avoid collision
    pub cache_redis_url: String,

    /// Time-to-live (TTL) in seconds for Redis cache entries. 0 means no TTL.
    #[arg(long, env = "CACHE_REDIS_TTL", default_value = "3600", global = true)] // 1 hour
    pub cache_redis_ttl: usize,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Extract raw data, chunk it and build the vector index
    Setup {
        /// Drop everything already indexed before ingesting
        #[arg(long, default_value = "false")]
        reset: bool,
    },
    /// Ask a single question and print the answer
    Ask {
        question: String,
    },
    /// Run the chat UI (HTTP) and the WebSocket chat server
    Serve,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serve() {
        let args = Args::parse_from(["misohelpful"]);
        assert!(matches!(args.command(), Command::Serve));
        assert_eq!(args.http_port, 8501);
        assert_eq!(args.rag_default_limit, 3);
        assert_eq!(args.collection, "cooking_assistant");
    }

    #[test]
    fn parses_setup_and_ask() {
        let args = Args::parse_from(["misohelpful", "setup", "--reset"]);
        assert!(matches!(args.command(), Command::Setup { reset: true }));

        let args = Args::parse_from(["misohelpful", "ask", "How do I sear chicken?"]);
        match args.command() {
            Command::Ask { question } => assert_eq!(question, "How do I sear chicken?"),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
