use crate::cli::Args;
use log::warn;
use redis::{ Client, AsyncCommands };
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedConnection = Arc<Mutex<MultiplexedConnection>>;

pub async fn init(args: &Args) -> Option<SharedConnection> {
    if !args.enable_cache {
        return None;
    }
    let client = match Client::open(args.cache_redis_url.as_str()) {
        Ok(client) => client,
        Err(e) => {
            warn!("Answer cache disabled, bad Redis URL '{}': {}", args.cache_redis_url, e);
            return None;
        }
    };
    match client.get_multiplexed_async_connection().await {
        Ok(conn) => Some(Arc::new(Mutex::new(conn))),
        Err(e) => {
            warn!("Answer cache disabled, cannot reach Redis at {}: {}", args.cache_redis_url, e);
            None
        }
    }
}

pub async fn get(
    conn: &SharedConnection,
    key: &str
) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
    let mut guard = conn.lock().await;
    let val: Option<String> = guard.get(key).await?;
    Ok(val)
}

pub async fn set(
    conn: &SharedConnection,
    key: &str,
    val: &str,
    ttl: usize
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut guard = conn.lock().await;
    if ttl > 0 {
        guard.set_ex::<_, _, ()>(key, val, ttl as u64).await?;
    } else {
        guard.set::<_, _, ()>(key, val).await?;
    }
    Ok(())
}
