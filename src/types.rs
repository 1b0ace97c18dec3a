//! Sandbox descriptors shared by the router, session manager, and collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resource kind of a sandbox as known to the runtime API.
pub const SANDBOX_KIND: &str = "Sandbox";

/// Lifecycle status of a sandbox.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Pending,
    Running,
    Terminating,
}

/// One routable service inside a sandbox: a backend base URL plus the
/// path prefix it serves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SandboxEntryPoint {
    pub endpoint: String,
    pub path: String,
}

/// Descriptor of one live sandbox instance, keyed by its session id.
///
/// A session id maps to at most one non-deleted record. `expires_at`
/// only ever moves forward; `last_activity` is non-decreasing per
/// session (both enforced by the store).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxInfo {
    pub sandbox_id: String,
    pub namespace: String,
    pub name: String,
    pub kind: String,
    pub session_id: String,
    pub entry_points: Vec<SandboxEntryPoint>,
    pub status: SandboxStatus,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SandboxInfo {
    /// Entry point with the longest path prefix matching `path`.
    pub fn match_entry_point(&self, path: &str) -> Option<&SandboxEntryPoint> {
        self.entry_points
            .iter()
            .filter(|ep| path.starts_with(ep.path.trim_end_matches('/')))
            .max_by_key(|ep| ep.path.trim_end_matches('/').len())
    }
}
