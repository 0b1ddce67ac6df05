use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use async_trait::async_trait;
use std::error::Error as StdError;
use super::{ http_stream_generate, ChatClient, CompletionResponse, LineEvent, TokenStream };
use crate::llm::{ GenerationOptions, LlmConfig, LlmType };
use log::debug;

#[derive(Debug)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    completion_model: String,
    options: GenerationOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    // Prompts already carry their chat template.
    raw: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

#[derive(Deserialize)]
struct StreamResponse {
    response: String,
    done: bool,
}

impl OllamaClient {
    pub fn new(
        base_url: Option<String>,
        completion_model: Option<String>,
        options: GenerationOptions
    ) -> Self {
        let model = completion_model.unwrap_or_else(|| "tinyllama".to_string());
        let url = base_url.unwrap_or_else(|| "http://localhost:11434".into());

        Self {
            http: HttpClient::new(),
            base_url: url.trim_end_matches('/').to_string(),
            completion_model: model,
            options,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        if config.llm_type != LlmType::Ollama {
            return Err("Invalid config type for OllamaClient".into());
        }

        Ok(Self::new(config.base_url.clone(), config.completion_model.clone(), config.generation))
    }

    fn request(&self, prompt: &str, stream: bool) -> GenerateRequest {
        GenerateRequest {
            model: self.completion_model.clone(),
            prompt: prompt.to_string(),
            stream,
            raw: true,
            options: GenerateOptions {
                num_predict: self.options.max_new_tokens,
                temperature: self.options.temperature,
                top_p: self.options.top_p,
            },
        }
    }

    pub async fn generate(
        &self,
        prompt: &str
    ) -> Result<GenerateResponse, Box<dyn StdError + Send + Sync>> {
        let url = format!("{}/api/generate", self.base_url);
        let req = self.request(prompt, false);
        let resp = self.http.post(&url).json(&req).send().await?.error_for_status()?;
        let data = resp.json::<GenerateResponse>().await?;
        Ok(data)
    }

    pub async fn generate_stream(
        &self,
        prompt: &str
    ) -> Result<TokenStream, Box<dyn StdError + Send + Sync>> {
        let url = format!("{}/api/generate", self.base_url);
        let req = self.request(prompt, true);
        http_stream_generate(self.http.clone(), url, req, parse_stream_line, None).await
    }
}

fn parse_stream_line(line: &str) -> LineEvent {
    if line.is_empty() {
        return LineEvent::Skip;
    }
    match serde_json::from_str::<StreamResponse>(line) {
        Ok(resp) if resp.done && resp.response.is_empty() => LineEvent::Done,
        Ok(resp) if resp.response.is_empty() => LineEvent::Skip,
        Ok(resp) => LineEvent::Token(resp.response),
        Err(e) => {
            debug!("JSON parse error: {} for line: {}", e, line);
            LineEvent::Skip
        }
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn complete(
        &self,
        prompt: &str
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
        let gen_resp = self.generate(prompt).await?;
        Ok(CompletionResponse { response: gen_resp.response })
    }

    async fn stream_completion(
        &self,
        prompt: &str
    ) -> Result<TokenStream, Box<dyn StdError + Send + Sync>> {
        self.generate_stream(prompt).await
    }
}
