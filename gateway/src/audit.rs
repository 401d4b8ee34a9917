//! Bounded in-memory/keystore audit trail for authentication attempts.
//!
//! Every call into [`crate::auth::Auth`] appends one entry here. The ring is
//! trimmed on write so it never grows past `MAX_AUDIT_ENTRIES`; it is a
//! debugging aid, not a durable audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayResult;
use crate::keystore::{Keystore, keys};

pub const MAX_AUDIT_ENTRIES: isize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event: String,
    pub identity: Option<String>,
    pub method: Option<String>,
    pub ip: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            identity: None,
            method: None,
            ip: None,
            at: Utc::now(),
        }
    }

    pub fn identity(mut self, identity: Option<String>) -> Self {
        self.identity = identity;
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }
}

pub async fn record(keystore: &Keystore, event: AuditEvent) -> GatewayResult<()> {
    let encoded = serde_json::to_string(&event).unwrap_or_default();
    keystore.lpush(keys::auth_audit(), &encoded).await?;
    // Keep only the newest MAX_AUDIT_ENTRIES entries (LPUSH prepends).
    keystore
        .ltrim(keys::auth_audit(), 0, MAX_AUDIT_ENTRIES - 1)
        .await
}
