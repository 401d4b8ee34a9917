//! Admin Surface: create/list/revoke executor tokens, list known clusters,
//! report per-cluster executor status.

use std::collections::BTreeSet;

use crate::auth::Auth;
use crate::capability::CapabilityRegistry;
use crate::error::GatewayResult;
use crate::keystore::Keystore;
use crate::models::{CapabilityProfile, ClusterListResponse, ClusterSummary, ExecutorStatusResponse};

pub struct AdminSurface {
    keystore: Keystore,
    auth: std::sync::Arc<Auth>,
    capabilities: CapabilityRegistry,
}

impl AdminSurface {
    pub fn new(keystore: Keystore, auth: std::sync::Arc<Auth>, capabilities: CapabilityRegistry) -> Self {
        Self {
            keystore,
            auth,
            capabilities,
        }
    }

    /// Union of `cluster_active/`, `cluster_session/`, and `executor_token/`
    /// key namespaces, each stripped of its prefix, deduplicated, and sorted.
    pub async fn list_clusters(&self) -> GatewayResult<ClusterListResponse> {
        let mut ids: BTreeSet<String> = BTreeSet::new();
        for prefix in ["cluster_active/", "cluster_session/", "executor_token/"] {
            for key in self.keystore.keys_with_prefix(prefix).await? {
                if let Some(id) = key.strip_prefix(prefix) {
                    ids.insert(id.to_string());
                }
            }
        }

        let mut clusters = Vec::with_capacity(ids.len());
        for id in ids {
            let connected = self.keystore.exists(&crate::keystore::keys::cluster_active(&id)).await?;
            clusters.push(ClusterSummary { id, connected });
        }
        let count = clusters.len();
        Ok(ClusterListResponse { clusters, count })
    }

    /// Every cluster with a registered token, annotated with connection state.
    pub async fn list_executors(&self) -> GatewayResult<Vec<ExecutorStatusResponse>> {
        let mut ids: BTreeSet<String> = BTreeSet::new();
        for key in self.keystore.keys_with_prefix("executor_token/").await? {
            if let Some(id) = key.strip_prefix("executor_token/") {
                ids.insert(id.to_string());
            }
        }
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.get_executor_status(&id).await?);
        }
        Ok(out)
    }

    pub async fn get_executor_status(&self, cluster_id: &str) -> GatewayResult<ExecutorStatusResponse> {
        let connected = self
            .keystore
            .exists(&crate::keystore::keys::cluster_active(cluster_id))
            .await?;
        let has_token = self.auth.has_executor_token(cluster_id).await?;
        let capabilities = self.capabilities.get(cluster_id).await?;
        Ok(ExecutorStatusResponse {
            id: cluster_id.to_string(),
            connected,
            has_token,
            capabilities,
        })
    }

    /// Every cluster with a live capability profile, for admin/monitoring.
    pub async fn list_capabilities(&self) -> GatewayResult<Vec<CapabilityProfile>> {
        self.capabilities.list().await
    }

    pub async fn create_executor_token(&self, cluster_id: &str) -> GatewayResult<String> {
        self.auth.create_executor_token(cluster_id).await
    }

    pub async fn revoke_executor_token(&self, cluster_id: &str) -> GatewayResult<()> {
        self.auth.revoke_executor_token(cluster_id).await
    }
}
