pub mod api;
pub mod websocket;

use crate::agent::CookingAssistant;
use std::error::Error;
use std::sync::Arc;

pub struct Server {
    addr: String,
    http_port: u16,
    api_key: Option<String>,
    assistant: Arc<CookingAssistant>,
}

impl Server {
    pub fn new(
        addr: String,
        http_port: u16,
        api_key: Option<String>,
        assistant: Arc<CookingAssistant>
    ) -> Self {
        Self {
            addr,
            http_port,
            api_key,
            assistant,
        }
    }

    /// Starts the HTTP API in the background, then serves WebSocket clients
    /// until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(self.http_port, self.assistant.clone()).await?;
        websocket::start_ws_server(&self.addr, self.assistant.clone(), self.api_key.clone()).await
    }
}
