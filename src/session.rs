//! Session manager: resolves a session id to a live sandbox,
//! provisioning one on first use.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{Error, Result};
use crate::runtime::SandboxProvisioner;
use crate::store::Store;
use crate::types::{SandboxInfo, SandboxStatus};

/// The router's sole dependency for routing decisions.
///
/// Creation is serialized per session id: concurrent first-requests for
/// one unseen session take turns on a per-key mutex, and the losers
/// find the winner's record on their re-check instead of provisioning a
/// second sandbox. Requests for different sessions never contend.
pub struct SessionManager {
    store: Arc<dyn Store>,
    provisioner: Arc<dyn SandboxProvisioner>,
    session_ttl: Duration,
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        provisioner: Arc<dyn SandboxProvisioner>,
        session_ttl: std::time::Duration,
    ) -> Self {
        Self {
            store,
            provisioner,
            session_ttl: Duration::from_std(session_ttl).unwrap_or(Duration::MAX),
            creating: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a session to its sandbox, creating one on miss.
    pub async fn resolve(&self, session_id: &str) -> Result<SandboxInfo> {
        if let Some(info) = self.store.get_sandbox_by_session_id(session_id).await? {
            return Ok(info);
        }

        let lock = {
            let mut creating = self.creating.lock().await;
            creating
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // Re-check under the per-key lock: a racing request may have
        // finished creation while this one waited.
        let result = match self.store.get_sandbox_by_session_id(session_id).await? {
            Some(info) => Ok(info),
            None => self.create(session_id).await,
        };

        let mut creating = self.creating.lock().await;
        if let Some(existing) = creating.get(session_id) {
            if Arc::ptr_eq(existing, &lock) {
                creating.remove(session_id);
            }
        }
        result
    }

    async fn create(&self, session_id: &str) -> Result<SandboxInfo> {
        let mut info = self.provisioner.create_sandbox(session_id).await?;
        let now = Utc::now();
        info.session_id = session_id.to_string();
        info.status = SandboxStatus::Running;
        info.expires_at = now + self.session_ttl;
        info.last_activity = now;

        match self.store.store_sandbox(&info).await {
            Ok(()) => {
                info!(
                    session_id,
                    sandbox_id = %info.sandbox_id,
                    "created sandbox for session"
                );
                Ok(info)
            }
            // An external writer won an insert race; reuse its record.
            Err(Error::AlreadyExists(_)) => self
                .store
                .get_sandbox_by_session_id(session_id)
                .await?
                .ok_or_else(|| Error::AlreadyExists(session_id.to_string())),
            Err(e) => Err(e),
        }
    }
}
