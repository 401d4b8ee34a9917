//! Capability Registry: stores each executor's advertised capability
//! profile with a ~1h TTL, refreshed on heartbeat. The `features` map is
//! derived from `mode` and is advisory — the gateway never enforces it.

use chrono::{Duration, Utc};

use crate::error::GatewayResult;
use crate::keystore::{Keystore, keys};
use crate::models::{CapabilityFeatures, CapabilityProfile, ReportCapabilitiesRequest};

#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    keystore: Keystore,
    ttl_seconds: u64,
}

impl CapabilityRegistry {
    pub fn new(keystore: Keystore, ttl_seconds: u64) -> Self {
        Self { keystore, ttl_seconds }
    }

    /// Stores (or refreshes) a cluster's capability profile, recomputing
    /// `reported_at`/`expires_at` and deriving `features` from `mode`.
    pub async fn report(&self, req: ReportCapabilitiesRequest) -> GatewayResult<CapabilityProfile> {
        let now = Utc::now();
        let profile = CapabilityProfile {
            cluster_id: req.cluster_id.clone(),
            mode: req.mode,
            allowed_verbs: req.allowed_verbs,
            restricted_resources: req.restricted_resources,
            allowed_flags: req.allowed_flags,
            executor_version: req.executor_version,
            executor_pod: req.executor_pod,
            reported_at: now,
            expires_at: now + Duration::seconds(self.ttl_seconds as i64),
            features: CapabilityFeatures::from_mode(req.mode),
        };
        self.keystore
            .setex_json(&keys::cluster_capabilities(&req.cluster_id), self.ttl_seconds, &profile)
            .await?;
        Ok(profile)
    }

    /// A missing profile means "unknown, proceed with conservative
    /// defaults" — it is not an error.
    pub async fn get(&self, cluster_id: &str) -> GatewayResult<Option<CapabilityProfile>> {
        self.keystore.get_json(&keys::cluster_capabilities(cluster_id)).await
    }

    pub async fn delete(&self, cluster_id: &str) -> GatewayResult<()> {
        self.keystore.del(&keys::cluster_capabilities(cluster_id)).await
    }

    /// Lists capabilities for every cluster with a live profile. Admin/
    /// monitoring use only; scans the `cluster_capabilities/` key prefix
    /// rather than tracking a separate index, same as `get_active_sessions`.
    pub async fn list(&self) -> GatewayResult<Vec<CapabilityProfile>> {
        let keys = self.keystore.keys_with_prefix("cluster_capabilities/").await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(cluster_id) = key.strip_prefix("cluster_capabilities/") else {
                continue;
            };
            if let Some(profile) = self.get(cluster_id).await? {
                out.push(profile);
            }
        }
        Ok(out)
    }
}
