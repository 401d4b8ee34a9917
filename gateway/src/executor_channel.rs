//! Executor Channel: the per-cluster push stream an executor subscribes to,
//! plus the short request it uses to post a result back.
//!
//! On disconnect the channel never deletes the cluster-active marker — only
//! its TTL can remove it, so multiple executors on one cluster can't cause
//! false-idle when one of them drops.

use std::time::Duration;

use axum::response::sse::Event;
use chrono::Utc;
use gateway_common::args::RedisArgs;
use gateway_common::redis::init_pubsub;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{GatewayError, GatewayResult};
use crate::keystore::{Keystore, keys};
use crate::models::CommandResult;

#[derive(Clone)]
pub struct ExecutorChannel {
    keystore: Keystore,
    redis_args: RedisArgs,
    executor_active_ttl_seconds: u64,
    keepalive_interval_seconds: u64,
}

impl ExecutorChannel {
    pub fn new(
        keystore: Keystore,
        redis_args: RedisArgs,
        executor_active_ttl_seconds: u64,
        keepalive_interval_seconds: u64,
    ) -> Self {
        Self {
            keystore,
            redis_args,
            executor_active_ttl_seconds,
            keepalive_interval_seconds,
        }
    }

    /// Opens the push stream for `cluster_id`. The returned stream yields
    /// `connected`, `command`, and `keepalive` SSE events until the caller
    /// drops it (client disconnect) or the subscription itself closes.
    pub async fn connect(&self, cluster_id: String) -> ReceiverStream<GatewayResult<Event>> {
        // Create-or-refresh the active marker; non-fatal if it fails.
        if let Err(e) = self
            .keystore
            .set_nx_ex(&keys::cluster_active(&cluster_id), "1", self.executor_active_ttl_seconds)
            .await
        {
            tracing::warn!(cluster_id = %cluster_id, error = %e, "failed to seed cluster active marker on connect");
        }

        let (tx, rx) = mpsc::channel::<GatewayResult<Event>>(64);
        let keystore = self.keystore.clone();
        let redis_args = self.redis_args.clone();
        let ttl = self.executor_active_ttl_seconds;
        let keepalive = Duration::from_secs(self.keepalive_interval_seconds.max(1));

        tokio::spawn(async move {
            let connected = Event::default()
                .event("connected")
                .data(format!(r#"{{"cluster_id":"{cluster_id}"}}"#));
            if tx.send(Ok(connected)).await.is_err() {
                return;
            }

            let mut conn = init_pubsub(&redis_args).await;
            if let Err(e) = conn.subscribe(&keys::executor_commands_channel(&cluster_id)).await {
                tracing::error!(cluster_id = %cluster_id, error = %e, "failed to subscribe to executor command channel");
                let _ = tx
                    .send(Err(GatewayError::ServiceUnavailable {
                        source: anyhow::anyhow!(e),
                    }))
                    .await;
                return;
            }
            let mut messages = conn.on_message();
            let mut ticker = tokio::time::interval(keepalive);
            ticker.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    msg = messages.next() => {
                        match msg {
                            None => break,
                            Some(msg) => {
                                let payload: String = msg.get_payload().unwrap_or_default();
                                if let Err(e) = keystore.setex_string(&keys::cluster_active(&cluster_id), ttl, "1").await {
                                    tracing::warn!(cluster_id = %cluster_id, error = %e, "failed to renew cluster active marker");
                                }
                                let event = Event::default().event("command").data(payload);
                                if tx.send(Ok(event)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = keystore.setex_string(&keys::cluster_active(&cluster_id), ttl, "1").await {
                            tracing::warn!(cluster_id = %cluster_id, error = %e, "failed to renew cluster active marker on keepalive");
                        }
                        let event = Event::default().event("keepalive").data(Utc::now().to_rfc3339());
                        if tx.send(Ok(event)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        ReceiverStream::new(rx)
    }

    /// Stores the executor's result and signals any waiting router caller.
    /// A result write happens-before its `result_ready` notification.
    pub async fn submit_result(&self, result: CommandResult) -> GatewayResult<()> {
        let key = keys::result(&result.command_id.to_string());
        self.keystore.setex_json(&key, 60, &result).await?;
        let encoded = serde_json::to_string(&result)
            .map_err(|e| GatewayError::Internal(format!("failed to encode result: {e}")))?;
        self.keystore
            .publish(&keys::result_ready_channel(&result.command_id.to_string()), &encoded)
            .await
    }
}
