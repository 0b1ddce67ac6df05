pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use futures::{ stream, Future, Stream, StreamExt };
use serde::Deserialize;
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use super::{ LlmConfig, LlmType };
use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, Box<dyn StdError + Send + Sync>>> + Send>>;

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>>;

    /// Streams the answer as it is generated. Clients without a streaming
    /// endpoint yield the whole completion as a single fragment.
    async fn stream_completion(
        &self,
        prompt: &str
    ) -> Result<TokenStream, Box<dyn StdError + Send + Sync>> {
        let response = self.complete(prompt).await?.response;
        Ok(Box::pin(stream::once(async move { Ok(response) })))
    }
}

pub fn create_streaming_response<F, Fut>(
    response_fn: F
) -> Result<TokenStream, Box<dyn StdError + Send + Sync>>
where
    F: FnOnce(mpsc::Sender<Result<String, Box<dyn StdError + Send + Sync>>>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Ok(Box::pin(ReceiverStream::new(rx)))
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn ChatClient>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

/// Collects raw body bytes and hands out complete lines. Lines are decoded
/// only once their newline has arrived, so a multi-byte character split
/// across network chunks stays intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// The next complete line without its terminator, or `None` until a
    /// newline is buffered.
    pub fn next_line(&mut self) -> Option<Result<String, std::string::FromUtf8Error>> {
        let pos = self.pending.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8(line))
    }

    /// Whatever is left once the body has ended.
    pub fn finish(self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.pending)
    }
}

/// POSTs `payload` to `url` and forwards every line the parser accepts as a
/// token. A line that is not valid UTF-8 ends the stream with an error.
pub async fn http_stream_generate(
    http: reqwest::Client,
    url: String,
    payload: impl serde::Serialize + Send + 'static,
    line_parser: fn(&str) -> LineEvent,
    headers: Option<Vec<(String, String)>>
) -> Result<TokenStream, Box<dyn StdError + Send + Sync>> {
    create_streaming_response(move |tx| async move {
        let mut req = http.post(&url).json(&payload);

        if let Some(header_list) = headers {
            for (name, value) in header_list {
                req = req.header(name, value);
            }
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                let _ = tx.send(Err(Box::new(e) as _)).await;
                return;
            }
        };
        if let Err(e) = resp.error_for_status_ref() {
            let _ = tx.send(Err(Box::new(e) as _)).await;
            return;
        }

        let mut bytes = resp.bytes_stream();
        let mut lines = LineBuffer::default();
        while let Some(chunk) = bytes.next().await {
            let buf = match chunk {
                Ok(buf) => buf,
                Err(e) => {
                    let _ = tx.send(Err(Box::new(e) as _)).await;
                    return;
                }
            };
            lines.push(&buf);
            while let Some(line) = lines.next_line() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        let _ = tx.send(Err(Box::new(e) as _)).await;
                        return;
                    }
                };
                match line_parser(line.trim()) {
                    LineEvent::Token(tok) => {
                        if tx.send(Ok(tok)).await.is_err() {
                            return;
                        }
                    }
                    LineEvent::Done => {
                        return;
                    }
                    LineEvent::Skip => {}
                }
            }
        }
        match lines.finish() {
            Ok(rest) => {
                if let LineEvent::Token(tok) = line_parser(rest.trim()) {
                    let _ = tx.send(Ok(tok)).await;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(Box::new(e) as _)).await;
            }
        }
    })
}

#[derive(Debug, PartialEq, Eq)]
pub enum LineEvent {
    Token(String),
    Done,
    Skip,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_multibyte_character_is_reassembled() {
        let line = "{\"response\":\"🍜 miso\"}\n".as_bytes();
        let cut = line.iter().position(|b| *b == 0xf0).unwrap() + 2;

        let mut lines = LineBuffer::default();
        lines.push(&line[..cut]);
        assert!(lines.next_line().is_none());
        lines.push(&line[cut..]);
        assert_eq!(lines.next_line().unwrap().unwrap(), "{\"response\":\"🍜 miso\"}");
        assert!(lines.next_line().is_none());
        assert_eq!(lines.finish().unwrap(), "");
    }

    #[test]
    fn crlf_lines_and_trailing_remainder() {
        let mut lines = LineBuffer::default();
        lines.push(b"data: a\r\ndata: b\ndata: c");
        assert_eq!(lines.next_line().unwrap().unwrap(), "data: a");
        assert_eq!(lines.next_line().unwrap().unwrap(), "data: b");
        assert!(lines.next_line().is_none());
        assert_eq!(lines.finish().unwrap(), "data: c");
    }

    #[test]
    fn invalid_utf8_line_is_an_error() {
        let mut lines = LineBuffer::default();
        lines.push(&[0x66, 0xff, 0x6f, b'\n']);
        assert!(lines.next_line().unwrap().is_err());
    }

    struct CompleteOnly;

    #[async_trait]
    impl ChatClient for CompleteOnly {
        async fn complete(&self, prompt: &str) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
            Ok(CompletionResponse { response: format!("echo: {}", prompt) })
        }
    }

    #[tokio::test]
    async fn default_stream_yields_the_whole_completion() {
        let parts: Vec<String> = CompleteOnly.stream_completion("salt?").await
            .unwrap()
            .map(|t| t.unwrap())
            .collect().await;
        assert_eq!(parts, ["echo: salt?"]);
    }
}
