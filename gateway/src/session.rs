//! Session Registry: create/extend/end debugging sessions, maintain the
//! per-cluster "active" marker, and index sessions by correlation ID.
//!
//! State machine: `Active -> Idle -> Expired/Ended`. Only `Active <-> Idle`
//! are observable to clients; `Expired` falls out of TTL expiry, `Ended` out
//! of an explicit delete. This module owns every `session/*`,
//! `cluster_session/*`, `sessions_active`, and `correlation/*/sessions` key.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::keystore::{Keystore, keys};
use crate::models::{Session, SessionStatus};

#[derive(Debug, Clone)]
pub struct SessionRegistry {
    keystore: Keystore,
    default_ttl_seconds: u64,
}

impl SessionRegistry {
    pub fn new(keystore: Keystore, default_ttl_seconds: u64) -> Self {
        Self {
            keystore,
            default_ttl_seconds,
        }
    }

    /// Writes `session/<id>`, `cluster_session/<cluster_id>` and
    /// `cluster_active/<cluster_id>` with identical TTL, adds the session to
    /// `sessions_active`, and — if a correlation id was supplied — to
    /// `correlation/<cid>/sessions` with the same TTL. Emits `session.created`.
    pub async fn create_session(
        &self,
        cluster_id: &str,
        user_id: Option<String>,
        correlation_id: Option<String>,
        service_identity: Option<String>,
        ttl_seconds: Option<u64>,
    ) -> GatewayResult<Session> {
        let ttl_seconds = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        let now = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4(),
            cluster_id: cluster_id.to_string(),
            user_id: user_id.unwrap_or_else(|| "anonymous".to_string()),
            correlation_id: correlation_id.clone(),
            service_identity,
            created_at: now,
            last_activity: now,
            command_count: 0,
            ttl_seconds,
        };

        let session_id = session.session_id.to_string();
        self.keystore
            .setex_json(&keys::session(&session_id), ttl_seconds, &session)
            .await?;
        self.keystore
            .setex_string(&keys::cluster_session(cluster_id), ttl_seconds, &session_id)
            .await?;
        self.keystore
            .setex_string(&keys::cluster_active(cluster_id), ttl_seconds, &session_id)
            .await?;
        self.keystore
            .sadd(keys::sessions_active(), &session_id)
            .await?;
        if let Some(cid) = &correlation_id {
            let corr_key = keys::correlation_sessions(cid);
            self.keystore.sadd(&corr_key, &session_id).await?;
            self.keystore.expire(&corr_key, ttl_seconds).await?;
        }

        self.emit_event("session.created", &session).await;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> GatewayResult<Option<Session>> {
        self.keystore.get_json(&keys::session(&session_id.to_string())).await
    }

    /// Hot-path existence check: O(1), used to decide whether a cluster
    /// warrants low-latency treatment.
    pub async fn is_cluster_active(&self, cluster_id: &str) -> GatewayResult<bool> {
        self.keystore.exists(&keys::cluster_active(cluster_id)).await
    }

    /// Refreshes the cluster-active marker unconditionally, independent of
    /// any session — agent-to-agent calls may carry no session at all.
    pub async fn mark_cluster_active(&self, cluster_id: &str, ttl_seconds: u64) -> GatewayResult<()> {
        self.keystore
            .setex_string(&keys::cluster_active(cluster_id), ttl_seconds, "1")
            .await
    }

    /// Reloads the session, bumps `command_count`/`last_activity`, and
    /// re-writes every index (session, cluster_session, cluster_active,
    /// correlation) with a refreshed TTL in one logical step. A missing
    /// session is not an error here — a caller that needs it to exist should
    /// check the return value.
    pub async fn keep_alive(&self, session_id: Uuid) -> GatewayResult<Option<Session>> {
        let Some(mut session) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        session.command_count += 1;
        session.last_activity = Utc::now();

        let id = session_id.to_string();
        self.keystore
            .setex_json(&keys::session(&id), session.ttl_seconds, &session)
            .await?;
        self.keystore
            .setex_string(
                &keys::cluster_session(&session.cluster_id),
                session.ttl_seconds,
                &id,
            )
            .await?;
        self.keystore
            .setex_string(
                &keys::cluster_active(&session.cluster_id),
                session.ttl_seconds,
                &id,
            )
            .await?;
        if let Some(cid) = &session.correlation_id {
            self.keystore
                .expire(&keys::correlation_sessions(cid), session.ttl_seconds)
                .await?;
        }
        Ok(Some(session))
    }

    /// Deletes every index for this session and emits `session.ended`. A
    /// missing session is reported as `NotFound` only when the caller asked
    /// to end a specific, named session.
    pub async fn end_session(&self, session_id: Uuid) -> GatewayResult<()> {
        let Some(session) = self.get_session(session_id).await? else {
            return Err(GatewayError::NotFound(format!("session '{session_id}' not found")));
        };
        let id = session_id.to_string();
        self.keystore.del(&keys::session(&id)).await?;
        self.keystore.del(&keys::cluster_session(&session.cluster_id)).await?;
        self.keystore.srem(keys::sessions_active(), &id).await?;
        if let Some(cid) = &session.correlation_id {
            self.keystore.srem(&keys::correlation_sessions(cid), &id).await?;
        }
        self.emit_event("session.ended", &session).await;
        Ok(())
    }

    /// Scans the active-membership set, purging stale entries (sessions whose
    /// key has already expired) as it encounters them.
    pub async fn get_active_sessions(&self) -> GatewayResult<Vec<Session>> {
        let ids = self.keystore.smembers(keys::sessions_active()).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(uuid) = Uuid::parse_str(&id) else {
                self.keystore.srem(keys::sessions_active(), &id).await?;
                continue;
            };
            match self.get_session(uuid).await? {
                Some(session) => out.push(session),
                None => {
                    self.keystore.srem(keys::sessions_active(), &id).await?;
                }
            }
        }
        Ok(out)
    }

    /// Same purge-as-you-scan pattern as `get_active_sessions`, over the
    /// correlation index instead of the global membership set.
    pub async fn get_sessions_by_correlation(&self, correlation_id: &str) -> GatewayResult<Vec<Session>> {
        let corr_key = keys::correlation_sessions(correlation_id);
        let ids = self.keystore.smembers(&corr_key).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(uuid) = Uuid::parse_str(&id) else {
                self.keystore.srem(&corr_key, &id).await?;
                continue;
            };
            match self.get_session(uuid).await? {
                Some(session) => out.push(session),
                None => {
                    self.keystore.srem(&corr_key, &id).await?;
                }
            }
        }
        Ok(out)
    }

    /// Sweeps `sessions_active` against presence of each `session/<id>` key,
    /// removing membership for sessions that have already expired. Intended
    /// to be run periodically; `get_active_sessions`/`get_sessions_by_correlation`
    /// already self-heal, so this is a belt-and-suspenders background pass.
    pub async fn cleanup_expired(&self) -> GatewayResult<usize> {
        let ids = self.keystore.smembers(keys::sessions_active()).await?;
        let mut removed = 0;
        for id in ids {
            let exists = self.keystore.exists(&keys::session(&id)).await?;
            if !exists {
                self.keystore.srem(keys::sessions_active(), &id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn status_of(session: &Session) -> SessionStatus {
        let idle_after = chrono::Duration::seconds((session.ttl_seconds / 2).max(1) as i64);
        if Utc::now().signed_duration_since(session.last_activity) > idle_after {
            SessionStatus::Idle
        } else {
            SessionStatus::Active
        }
    }

    async fn emit_event(&self, event: &str, session: &Session) {
        let payload = serde_json::json!({
            "event": event,
            "session_id": session.session_id,
            "cluster_id": session.cluster_id,
            "at": Utc::now(),
        });
        let encoded = payload.to_string();
        if let Err(e) = self.keystore.lpush(keys::session_events(), &encoded).await {
            tracing::warn!(error = %e, "failed to append session event history");
        }
        let _ = self.keystore.ltrim(keys::session_events(), 0, 999).await;
        if let Err(e) = self
            .keystore
            .publish(keys::session_events_channel(), &encoded)
            .await
        {
            tracing::debug!(error = %e, "failed to publish session event (no subscribers is fine)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_active_when_recent() {
        let session = Session {
            session_id: Uuid::new_v4(),
            cluster_id: "c1".into(),
            user_id: "u1".into(),
            correlation_id: None,
            service_identity: None,
            created_at: Utc::now(),
            last_activity: Utc::now(),
            command_count: 0,
            ttl_seconds: 300,
        };
        assert_eq!(SessionRegistry::status_of(&session), SessionStatus::Active);
    }

    #[test]
    fn status_idle_when_stale() {
        let mut session = Session {
            session_id: Uuid::new_v4(),
            cluster_id: "c1".into(),
            user_id: "u1".into(),
            correlation_id: None,
            service_identity: None,
            created_at: Utc::now(),
            last_activity: Utc::now(),
            command_count: 0,
            ttl_seconds: 300,
        };
        session.last_activity = Utc::now() - chrono::Duration::seconds(400);
        assert_eq!(SessionRegistry::status_of(&session), SessionStatus::Idle);
    }
}
