//! Redis-backed TTL store.
//!
//! Every command runs under a bounded timeout; an elapsed timeout surfaces as
//! `AuthError::Backend`, never as a missing key. `take` uses `GETDEL`
//! (Redis >= 6.2) so a once-token can only be fetched by one caller, and
//! `swap_ex` runs as a Lua script so the compare and the write are one step.

use ::redis::{aio::ConnectionManager, Client, RedisResult, Script};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error};

use super::{ttl_seconds, KvStore};
use crate::error::AuthError;

const SCAN_COUNT: u64 = 100;

static SWAP_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    return 1
end
return 0
",
    )
});

#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisKv {
    /// Connect to Redis and keep a multiplexed, auto-reconnecting connection.
    ///
    /// # Errors
    /// Returns `AuthError::Backend` if the URL is invalid or the server cannot
    /// be reached within `op_timeout`.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::open(url)?;
        let conn = tokio::time::timeout(op_timeout, client.get_connection_manager())
            .await
            .map_err(|_| AuthError::Backend("redis connect timed out".to_string()))??;
        debug!("Connected to redis");
        Ok(Self { conn, op_timeout })
    }

    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                error!("redis {op} failed: {err}");
                Err(AuthError::from(err))
            }
            Err(_) => {
                error!("redis {op} timed out after {:?}", self.op_timeout);
                Err(AuthError::Backend(format!("redis {op} timed out")))
            }
        }
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AuthError> {
        let mut conn = self.conn.clone();
        self.run("GET", async move {
            let value: RedisResult<Option<Vec<u8>>> =
                ::redis::cmd("GET").arg(key).query_async(&mut conn).await;
            value
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), AuthError> {
        let mut conn = self.conn.clone();
        let seconds = ttl_seconds(ttl);
        self.run("SET", async move {
            let reply: RedisResult<()> = ::redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(seconds)
                .query_async(&mut conn)
                .await;
            reply
        })
        .await
    }

    async fn swap_ex(
        &self,
        key: &str,
        current: &[u8],
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, AuthError> {
        let mut conn = self.conn.clone();
        let seconds = ttl_seconds(ttl);
        self.run("SWAP", async move {
            let swapped: RedisResult<i64> = SWAP_SCRIPT
                .key(key)
                .arg(current)
                .arg(value)
                .arg(seconds)
                .invoke_async(&mut conn)
                .await;
            swapped.map(|flag| flag == 1)
        })
        .await
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, AuthError> {
        let mut conn = self.conn.clone();
        self.run("GETDEL", async move {
            let value: RedisResult<Option<Vec<u8>>> =
                ::redis::cmd("GETDEL").arg(key).query_async(&mut conn).await;
            value
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, AuthError> {
        let mut conn = self.conn.clone();
        self.run("DEL", async move {
            let removed: RedisResult<i64> =
                ::redis::cmd("DEL").arg(key).query_async(&mut conn).await;
            removed.map(|count| count > 0)
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, AuthError> {
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let mut conn = self.conn.clone();
            let pattern = pattern.as_str();
            let (next, batch): (u64, Vec<String>) = self
                .run("SCAN", async move {
                    let reply: RedisResult<(u64, Vec<String>)> = ::redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn)
                        .await;
                    reply
                })
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}
