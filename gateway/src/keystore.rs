//! Thin adapter over the ephemeral keystore (Redis). Hides wire encoding;
//! every caller works with typed values, not raw bytes. A keystore failure
//! always surfaces as `GatewayError::ServiceUnavailable` to the caller.

use anyhow::Context;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{GatewayError, GatewayResult};

#[derive(Clone)]
pub struct Keystore {
    pool: Pool,
}

impl Keystore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> GatewayResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .context("failed to acquire keystore connection")
            .map_err(GatewayError::from)
    }

    pub async fn get_string(&self, key: &str) -> GatewayResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get(key)
            .await
            .context("keystore GET failed")
            .map_err(GatewayError::from)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> GatewayResult<Option<T>> {
        let raw: Option<String> = self.get_string(key).await?;
        match raw {
            None => Ok(None),
            Some(s) => {
                let value = serde_json::from_str(&s)
                    .context("keystore value failed to deserialize")
                    .map_err(GatewayError::from)?;
                Ok(Some(value))
            }
        }
    }

    pub async fn setex_string(&self, key: &str, ttl_seconds: u64, value: &str) -> GatewayResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .set_ex(key, value, ttl_seconds)
            .await
            .context("keystore SETEX failed")
            .map_err(GatewayError::from)?;
        Ok(())
    }

    pub async fn setex_json<T: Serialize>(
        &self,
        key: &str,
        ttl_seconds: u64,
        value: &T,
    ) -> GatewayResult<()> {
        let encoded = serde_json::to_string(value)
            .context("failed to encode keystore value")
            .map_err(GatewayError::from)?;
        self.setex_string(key, ttl_seconds, &encoded).await
    }

    pub async fn set_no_ttl(&self, key: &str, value: &str) -> GatewayResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .set(key, value)
            .await
            .context("keystore SET failed")
            .map_err(GatewayError::from)?;
        Ok(())
    }

    /// Atomic set-if-absent with TTL. Returns `true` if this call created
    /// the key, `false` if it already existed.
    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> GatewayResult<bool> {
        let mut conn = self.conn().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .arg("NX")
            .query_async(&mut *conn)
            .await
            .context("keystore SET NX EX failed")
            .map_err(GatewayError::from)?;
        Ok(result.is_some())
    }

    pub async fn exists(&self, key: &str) -> GatewayResult<bool> {
        let mut conn = self.conn().await?;
        let n: i64 = conn
            .exists(key)
            .await
            .context("keystore EXISTS failed")
            .map_err(GatewayError::from)?;
        Ok(n > 0)
    }

    pub async fn del(&self, key: &str) -> GatewayResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .del(key)
            .await
            .context("keystore DEL failed")
            .map_err(GatewayError::from)?;
        Ok(())
    }

    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> GatewayResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .expire(key, ttl_seconds as i64)
            .await
            .context("keystore EXPIRE failed")
            .map_err(GatewayError::from)?;
        Ok(())
    }

    pub async fn sadd(&self, key: &str, member: &str) -> GatewayResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .sadd(key, member)
            .await
            .context("keystore SADD failed")
            .map_err(GatewayError::from)?;
        Ok(())
    }

    pub async fn srem(&self, key: &str, member: &str) -> GatewayResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .srem(key, member)
            .await
            .context("keystore SREM failed")
            .map_err(GatewayError::from)?;
        Ok(())
    }

    pub async fn smembers(&self, key: &str) -> GatewayResult<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.smembers(key)
            .await
            .context("keystore SMEMBERS failed")
            .map_err(GatewayError::from)
    }

    pub async fn lpush(&self, key: &str, value: &str) -> GatewayResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .lpush(key, value)
            .await
            .context("keystore LPUSH failed")
            .map_err(GatewayError::from)?;
        Ok(())
    }

    pub async fn ltrim(&self, key: &str, start: isize, stop: isize) -> GatewayResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .ltrim(key, start, stop)
            .await
            .context("keystore LTRIM failed")
            .map_err(GatewayError::from)?;
        Ok(())
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> GatewayResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .publish(channel, payload)
            .await
            .context("keystore PUBLISH failed")
            .map_err(GatewayError::from)?;
        Ok(())
    }

    /// Admin-only: scan for keys sharing a prefix. Not used on any hot path.
    pub async fn keys_with_prefix(&self, prefix: &str) -> GatewayResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let pattern = format!("{prefix}*");
        conn.keys(pattern)
            .await
            .context("keystore KEYS failed")
            .map_err(GatewayError::from)
    }
}

pub mod keys {
    pub fn session(session_id: &str) -> String {
        format!("session/{session_id}")
    }

    pub fn cluster_active(cluster_id: &str) -> String {
        format!("cluster_active/{cluster_id}")
    }

    pub fn cluster_session(cluster_id: &str) -> String {
        format!("cluster_session/{cluster_id}")
    }

    pub fn sessions_active() -> &'static str {
        "sessions_active"
    }

    pub fn correlation_sessions(correlation_id: &str) -> String {
        format!("correlation/{correlation_id}/sessions")
    }

    pub fn command_tracking(command_id: &str) -> String {
        format!("command_tracking/{command_id}")
    }

    pub fn result(command_id: &str) -> String {
        format!("result/{command_id}")
    }

    pub fn result_ready_channel(command_id: &str) -> String {
        format!("result_ready/{command_id}")
    }

    pub fn executor_token(cluster_id: &str) -> String {
        format!("executor_token/{cluster_id}")
    }

    pub fn cluster_capabilities(cluster_id: &str) -> String {
        format!("cluster_capabilities/{cluster_id}")
    }

    pub fn executor_commands_channel(cluster_id: &str) -> String {
        format!("executor_commands/{cluster_id}")
    }

    pub fn auth_audit() -> &'static str {
        "auth_audit"
    }

    pub fn session_events() -> &'static str {
        "session/events"
    }

    pub fn session_events_channel() -> &'static str {
        "events/session"
    }
}
