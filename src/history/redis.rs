use async_trait::async_trait;
use chrono::Utc;
use log::{ debug, warn };
use redis::{ aio::MultiplexedConnection, AsyncCommands, Client };
use std::error::Error;
use tokio::sync::OnceCell;

use crate::history::HistoryStore;
use crate::models::chat::{ ChatMessage, Conversation };

/// Conversations kept as Redis lists of JSON-encoded messages, one list per
/// conversation under `prefix + conversation_id`.
pub struct RedisHistoryStore {
    client: Client,
    key_prefix: String,
    conn: OnceCell<MultiplexedConnection>,
}

impl RedisHistoryStore {
    pub fn new(url: &str, key_prefix: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Self {
            client: Client::open(url)?,
            key_prefix: key_prefix.to_string(),
            conn: OnceCell::new(),
        })
    }

    // Connects on first use; the multiplexed handle is cheap to clone.
    async fn connection(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        let conn = self.conn
            .get_or_try_init(|| async {
                debug!("Opening Redis history connection");
                self.client.get_multiplexed_async_connection().await
            }).await?;
        Ok(conn.clone())
    }

    fn key(&self, conversation_id: &str) -> String {
        format!("{}{}", self.key_prefix, conversation_id)
    }
}

/// LRANGE start index for the newest `limit` entries; 0 means all.
fn range_start(limit: usize) -> isize {
    if limit == 0 { 0 } else { -(limit.min(isize::MAX as usize) as isize) }
}

fn decode_entries(conversation_id: &str, entries: &[String]) -> Vec<ChatMessage> {
    entries
        .iter()
        .filter_map(|entry| {
            serde_json::from_str::<ChatMessage>(entry)
                .map_err(|e| warn!("Skipping unreadable history entry in {}: {}", conversation_id, e))
                .ok()
        })
        .collect()
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn add_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let entry = serde_json::to_string(
            &(ChatMessage {
                role: role.to_string(),
                content: content.to_string(),
                timestamp: Utc::now().timestamp(),
            })
        )?;
        let mut conn = self.connection().await?;
        conn.rpush::<_, _, i64>(self.key(conversation_id), entry).await?;
        Ok(())
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
        limit: usize
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>> {
        let mut conn = self.connection().await?;
        let entries: Vec<String> = conn.lrange(self.key(conversation_id), range_start(limit), -1).await?;
        Ok(Conversation {
            id: conversation_id.to_string(),
            messages: decode_entries(conversation_id, &entries),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed() {
        let store = RedisHistoryStore::new("redis://127.0.0.1:6379", "misohelpful:history:").unwrap();
        assert_eq!(store.key("abc"), "misohelpful:history:abc");
    }

    #[test]
    fn limit_maps_to_a_tail_range() {
        assert_eq!(range_start(0), 0);
        assert_eq!(range_start(4), -4);
    }

    #[test]
    fn unreadable_entries_are_skipped() {
        let entries = vec![
            r#"{"role":"user","content":"hi","timestamp":1}"#.to_string(),
            "garbage".to_string(),
            r#"{"role":"assistant","content":"hello","timestamp":2}"#.to_string()
        ];
        let messages = decode_entries("c1", &entries);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "hello");
    }
}
