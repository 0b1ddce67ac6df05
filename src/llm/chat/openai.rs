use async_trait::async_trait;
use log::debug;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;

use super::{ http_stream_generate, ChatClient, CompletionResponse, LineEvent, TokenStream };
use crate::llm::{ GenerationOptions, LlmConfig };

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
    options: GenerationOptions,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

impl OpenAIChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        options: GenerationOptions
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let chat_model = model.unwrap_or_else(|| "gpt-4o-mini".to_string());
        let api_url = base_url.unwrap_or_else(|| "https://api.openai.com".to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| format!("Invalid API key format: {}", e))?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            model: chat_model,
            base_url: api_url.trim_end_matches('/').to_string(),
            options,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "OpenAI API key is required".to_string())?;

        Self::new(
            api_key,
            config.completion_model.clone(),
            config.base_url.clone(),
            config.generation,
        )
    }

    fn endpoint(&self) -> String {
        if self.base_url.ends_with("/chat/completions") {
            self.base_url.clone()
        } else {
            format!("{}/v1/chat/completions", self.base_url)
        }
    }

    fn request(&self, prompt: &str, stream: bool) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.options.temperature,
            max_tokens: self.options.max_new_tokens,
            top_p: self.options.top_p,
            stream: if stream { Some(true) } else { None },
        }
    }
}

fn parse_sse_line(line: &str) -> LineEvent {
    if line == "data: [DONE]" {
        return LineEvent::Done;
    }
    let Some(data) = line.strip_prefix("data: ") else {
        return LineEvent::Skip;
    };
    match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(resp) => {
            let text: String = resp.choices
                .into_iter()
                .filter_map(|c| c.delta.content)
                .collect();
            if text.is_empty() { LineEvent::Skip } else { LineEvent::Token(text) }
        }
        Err(e) => {
            debug!("JSON parse error: {} for data: {}", e, data);
            LineEvent::Skip
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(
        &self,
        prompt: &str
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
        let resp = self.http.post(self.endpoint())
            .json(&self.request(prompt, false))
            .send()
            .await?
            .error_for_status()?
            .json::<OpenAIResponse>()
            .await?;

        let content = resp.choices.first()
            .ok_or_else(|| "No response from OpenAI API".to_string())?
            .message.content.clone();

        Ok(CompletionResponse { response: content })
    }

    async fn stream_completion(
        &self,
        prompt: &str
    ) -> Result<TokenStream, Box<dyn StdError + Send + Sync>> {
        let req = self.request(prompt, true);
        http_stream_generate(self.http.clone(), self.endpoint(), req, parse_sse_line, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_lines_map_to_events() {
        assert_eq!(parse_sse_line("data: [DONE]"), LineEvent::Done);
        assert_eq!(parse_sse_line(": keep-alive"), LineEvent::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Pat"}}]}"#),
            LineEvent::Token("Pat".into())
        );
        assert_eq!(parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#), LineEvent::Skip);
    }

    #[test]
    fn endpoint_accepts_full_or_base_url() {
        let opts = GenerationOptions::default();
        let client = OpenAIChatClient::new("k".into(), None, None, opts).unwrap();
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");

        let client = OpenAIChatClient::new(
            "k".into(),
            None,
            Some("http://proxy/v1/chat/completions".into()),
            opts
        ).unwrap();
        assert_eq!(client.endpoint(), "http://proxy/v1/chat/completions");
    }
}
