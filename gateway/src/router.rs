//! Command Router — the heart of the gateway. Publishes a validated command
//! to its cluster's executor channel and correlates the asynchronous reply
//! back to the waiting caller within a bounded timeout.

use std::time::Duration;

use chrono::Utc;
use gateway_common::wait::backoff_full_jitter;
use gateway_common::wait_registry::DirectWaitRegistry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::keystore::{Keystore, keys};
use crate::models::{Command, CommandResult, ExecuteResponse, ExecutionStatus};
use crate::session::SessionRegistry;

/// Command as tracked internally between publish and result delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommandTracking {
    cluster_id: String,
    queued_at: chrono::DateTime<Utc>,
}

pub struct ExecuteParams {
    pub cluster_id: String,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
    pub correlation_id: Option<String>,
    pub session_id: Option<Uuid>,
}

pub struct CommandRouter {
    keystore: Keystore,
    sessions: SessionRegistry,
    waiters: DirectWaitRegistry,
    cluster_active_ttl_seconds: u64,
}

/// Safety-net poll cadence: immediate-base 250ms, full-jitter, capped at 1s.
const POLL_BASE: Duration = Duration::from_millis(250);
const POLL_CAP: Duration = Duration::from_secs(1);

impl CommandRouter {
    pub fn new(
        keystore: Keystore,
        sessions: SessionRegistry,
        waiters: DirectWaitRegistry,
        cluster_active_ttl_seconds: u64,
    ) -> Self {
        Self {
            keystore,
            sessions,
            waiters,
            cluster_active_ttl_seconds,
        }
    }

    pub async fn execute(&self, params: ExecuteParams) -> GatewayResult<ExecuteResponse> {
        let ExecuteParams {
            cluster_id,
            args,
            timeout_seconds,
            correlation_id,
            session_id,
        } = params;

        // 1. Validate: a caller-supplied session must belong to this cluster.
        if let Some(session_id) = session_id {
            let session = self
                .sessions
                .get_session(session_id)
                .await?
                .ok_or_else(|| GatewayError::NotFound(format!("session '{session_id}' not found")))?;
            if session.cluster_id != cluster_id {
                return Err(GatewayError::SessionClusterMismatch {
                    session_id: session_id.to_string(),
                    actual: session.cluster_id,
                    requested: cluster_id,
                });
            }
        }

        // 2. Mark active unconditionally — widens the low-latency window even
        // for agent-to-agent calls that carry no session.
        self.sessions
            .mark_cluster_active(&cluster_id, self.cluster_active_ttl_seconds)
            .await?;

        // 3. Keep the session alive, if one was supplied.
        if let Some(session_id) = session_id {
            self.sessions.keep_alive(session_id).await?;
        }

        // 4. Form the command and record its tracking entry.
        let command_id = Uuid::new_v4();
        let command = Command {
            id: command_id,
            cluster_id: cluster_id.clone(),
            args,
            timeout_seconds,
            correlation_id,
        };
        let tracking = CommandTracking {
            cluster_id: cluster_id.clone(),
            queued_at: Utc::now(),
        };
        self.keystore
            .setex_json(
                &keys::command_tracking(&command_id.to_string()),
                timeout_seconds + 10,
                &tracking,
            )
            .await?;

        // Subscribe to the result-ready notification *before* publishing so
        // a result written immediately after publish can't race ahead of us.
        let result_channel = keys::result_ready_channel(&command_id.to_string());
        let mut wait_sub = self
            .waiters
            .register_waiter(result_channel)
            .await
            .map_err(GatewayError::from)?;

        // 5. Publish. Fire-and-forget — a channel with no subscriber silently
        // loses the command; the caller's timeout is the recovery mechanism.
        let encoded = serde_json::to_string(&command)
            .map_err(|e| GatewayError::Internal(format!("failed to encode command: {e}")))?;
        self.keystore
            .publish(&keys::executor_commands_channel(&cluster_id), &encoded)
            .await?;

        // 6. Await result: immediate read, then race the pub/sub notification
        // against a capped backoff poll and the deadline.
        let outcome = self.await_result(command_id, timeout_seconds, &mut wait_sub).await;
        wait_sub.cancel.cancel();

        // 7. Outcome.
        let response = match outcome {
            Some(result) => {
                if result.status == ExecutionStatus::Success && session_id.is_none() {
                    self.sessions
                        .mark_cluster_active(&cluster_id, self.cluster_active_ttl_seconds)
                        .await?;
                }
                ExecuteResponse {
                    command_id,
                    status: result.status,
                    output: result.output,
                    error: result.error,
                    execution_time_ms: result.execution_time_ms,
                    executed_at: result.executed_at,
                }
            }
            None => ExecuteResponse {
                command_id,
                status: ExecutionStatus::Timeout,
                output: None,
                error: Some("Command execution timeout".to_string()),
                execution_time_ms: None,
                executed_at: None,
            },
        };

        Ok(response)
    }

    async fn await_result(
        &self,
        command_id: Uuid,
        timeout_seconds: u64,
        wait_sub: &mut gateway_common::wait_registry::WaitSubscription,
    ) -> Option<CommandResult> {
        let result_key = keys::result(&command_id.to_string());

        // Covers the case where the result was already written before our
        // subscription was established.
        if let Ok(Some(result)) = self.keystore.get_json::<CommandResult>(&result_key).await {
            return Some(result);
        }

        let deadline = tokio::time::sleep(Duration::from_secs(timeout_seconds));
        tokio::pin!(deadline);

        let mut attempt = 0usize;
        loop {
            let poll_delay = backoff_full_jitter(POLL_BASE, POLL_CAP, attempt);
            attempt += 1;

            tokio::select! {
                biased;

                _ = &mut deadline => return None,

                msg = wait_sub.receiver.recv() => {
                    if let Ok(broadcast) = msg
                        && let Ok(bytes) = broadcast.inner()
                        && let Ok(result) = serde_json::from_slice::<CommandResult>(&bytes)
                    {
                        return Some(result);
                    }
                    // A dropped/errored broadcast falls through to the poll loop.
                }

                _ = tokio::time::sleep(poll_delay) => {
                    if let Ok(Some(result)) = self.keystore.get_json::<CommandResult>(&result_key).await {
                        return Some(result);
                    }
                }
            }
        }
    }
}
