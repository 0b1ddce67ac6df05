use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::error::Error;
use tokio::sync::RwLock;

use crate::history::HistoryStore;
use crate::models::chat::{ ChatMessage, Conversation };

/// Process-local history, lost on restart.
#[derive(Default)]
pub struct MemoryHistoryStore {
    conversations: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn add_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut guard = self.conversations.write().await;
        guard
            .entry(conversation_id.to_string())
            .or_default()
            .push(ChatMessage {
                role: role.to_string(),
                content: content.to_string(),
                timestamp: Utc::now().timestamp(),
            });
        Ok(())
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
        limit: usize
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>> {
        let guard = self.conversations.read().await;
        let messages = guard
            .get(conversation_id)
            .map(|all| {
                let start = if limit == 0 { 0 } else { all.len().saturating_sub(limit) };
                all[start..].to_vec()
            })
            .unwrap_or_default();

        Ok(Conversation {
            id: conversation_id.to_string(),
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_latest_messages_in_order() {
        let store = MemoryHistoryStore::new();
        for (role, text) in [("user", "a"), ("assistant", "b"), ("user", "c")] {
            store.add_message("s1", role, text).await.unwrap();
        }

        let all = store.get_conversation("s1", 0).await.unwrap();
        let texts: Vec<_> = all.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, ["a", "b", "c"]);

        let last_two = store.get_conversation("s1", 2).await.unwrap();
        assert_eq!(last_two.messages[0].content, "b");
        assert_eq!(last_two.messages[1].role, "user");

        assert!(store.get_conversation("other", 5).await.unwrap().messages.is_empty());
    }
}
