use async_trait::async_trait;
use log::debug;
use rllm::{ builder::{ LLMBackend, LLMBuilder }, LLMProvider };
use std::error::Error as StdError;
use std::sync::Arc;

use super::{ LlmConfig, LlmType };

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
// Ollama's packaging of sentence-transformers/all-MiniLM-L6-v2.
const OLLAMA_DEFAULT_MODEL: &str = "all-minilm";
const OPENAI_DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, Box<dyn StdError + Send + Sync>>;

    /// Embeds several texts, preserving order. Backends with a batch endpoint override this.
    async fn embed_batch(
        &self,
        texts: &[String]
    ) -> Result<Vec<Vec<f32>>, Box<dyn StdError + Send + Sync>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?.embedding);
        }
        Ok(out)
    }
}

/// Embeddings through an `rllm` provider. Both supported backends accept a
/// whole batch in one request.
pub struct RllmEmbeddingClient {
    llm: Box<dyn LLMProvider + Send + Sync>,
    backend: &'static str,
    model: String,
}

impl RllmEmbeddingClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let (backend, model) = embedding_target(config)?;
        let mut builder = LLMBuilder::new().backend(backend).model(&model).stream(false);

        match config.llm_type {
            LlmType::Ollama => {
                builder = builder.base_url(
                    config.base_url.clone().unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string())
                );
            }
            LlmType::OpenAI => {
                if let Some(key) = &config.api_key {
                    builder = builder.api_key(key.clone());
                }
                if let Some(url) = &config.base_url {
                    builder = builder.base_url(url.clone());
                }
            }
        }

        Ok(Self {
            llm: builder.build()?,
            backend: backend_name(&config.llm_type),
            model,
        })
    }
}

fn backend_name(llm_type: &LlmType) -> &'static str {
    match llm_type {
        LlmType::Ollama => "Ollama",
        LlmType::OpenAI => "OpenAI",
    }
}

/// Resolves the rllm backend and model name, rejecting an OpenAI config
/// without a key before any request is made.
fn embedding_target(config: &LlmConfig) -> Result<(LLMBackend, String), Box<dyn StdError + Send + Sync>> {
    match config.llm_type {
        LlmType::Ollama => {
            let model = config.embedding_model.clone().unwrap_or_else(|| OLLAMA_DEFAULT_MODEL.to_string());
            Ok((LLMBackend::Ollama, model))
        }
        LlmType::OpenAI => {
            if config.api_key.as_deref().map_or(true, str::is_empty) {
                return Err("OpenAI API key is required for embeddings".into());
            }
            let model = config.embedding_model.clone().unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string());
            Ok((LLMBackend::OpenAI, model))
        }
    }
}

#[async_trait]
impl EmbeddingClient for RllmEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, Box<dyn StdError + Send + Sync>> {
        let mut embeddings = self.llm.embed(vec![text.to_string()]).await?;
        let embedding = embeddings
            .pop()
            .ok_or_else(|| format!("{} embedding generation returned no results", self.backend))?;
        Ok(EmbeddingResponse { embedding })
    }

    async fn embed_batch(
        &self,
        texts: &[String]
    ) -> Result<Vec<Vec<f32>>, Box<dyn StdError + Send + Sync>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Embedding {} texts with {} ({})", texts.len(), self.backend, self.model);
        let embeddings = self.llm.embed(texts.to_vec()).await?;
        expect_batch_len(self.backend, texts.len(), embeddings)
    }
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn EmbeddingClient>, Box<dyn StdError + Send + Sync>> {
    Ok(Arc::new(RllmEmbeddingClient::from_config(config)?))
}

/// Checks that a batch call returned one vector per input.
fn expect_batch_len(
    backend: &str,
    expected: usize,
    got: Vec<Vec<f32>>
) -> Result<Vec<Vec<f32>>, Box<dyn StdError + Send + Sync>> {
    if got.len() != expected {
        return Err(
            format!("{} returned {} embeddings for {} inputs", backend, got.len(), expected).into()
        );
    }
    Ok(got)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_backend() {
        let (backend, model) = embedding_target(&LlmConfig::default()).unwrap();
        assert!(matches!(backend, LLMBackend::Ollama));
        assert_eq!(model, "all-minilm");

        let config = LlmConfig {
            llm_type: LlmType::OpenAI,
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        let (backend, model) = embedding_target(&config).unwrap();
        assert!(matches!(backend, LLMBackend::OpenAI));
        assert_eq!(model, "text-embedding-3-small");
    }

    #[test]
    fn openai_requires_a_key() {
        let config = LlmConfig { llm_type: LlmType::OpenAI, ..Default::default() };
        assert!(embedding_target(&config).is_err());
    }

    #[test]
    fn short_batches_are_rejected() {
        assert!(expect_batch_len("Ollama", 2, vec![vec![0.1]]).is_err());
        assert_eq!(expect_batch_len("Ollama", 1, vec![vec![0.1]]).unwrap().len(), 1);
    }
}
