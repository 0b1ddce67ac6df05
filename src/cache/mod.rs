pub mod redis;

use crate::cli::Args;
use log::{ debug, info };

use self::redis::SharedConnection;

const KEY_PREFIX: &str = "misohelpful:answer:";

/// Cache key for a question: trimmed and lowercased, so trivially different
/// spellings of the same question share an entry.
pub fn normalize_question(question: &str) -> String {
    format!("{}{}", KEY_PREFIX, question.trim().to_lowercase())
}

/// Exact-match answer cache backed by Redis.
#[derive(Clone)]
pub struct AnswerCache {
    conn: SharedConnection,
    ttl: usize,
}

impl AnswerCache {
    /// Connects when caching is enabled. Any connection problem disables the
    /// cache rather than failing startup.
    pub async fn init(args: &Args) -> Option<Self> {
        let conn = redis::init(args).await?;
        info!("Answer cache enabled at {} (ttl {}s)", args.cache_redis_url, args.cache_redis_ttl);
        Some(Self { conn, ttl: args.cache_redis_ttl })
    }

    pub async fn get(
        &self,
        question: &str
    ) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
        let hit = redis::get(&self.conn, &normalize_question(question)).await?;
        if hit.is_some() {
            debug!("Answer cache hit for '{}'", question.trim());
        }
        Ok(hit)
    }

    pub async fn put(
        &self,
        question: &str,
        answer: &str
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        redis::set(&self.conn, &normalize_question(question), answer, self.ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_ignore_case_and_surrounding_space() {
        assert_eq!(normalize_question("  How do I Sear? "), "misohelpful:answer:how do i sear?");
        assert_eq!(normalize_question("how do i sear?"), normalize_question("HOW DO I SEAR?"));
    }
}
