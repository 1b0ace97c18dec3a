//! Session store: sandbox records plus two time-ordered indices.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::SandboxInfo;

/// Contract shared by the router, session manager, and garbage
/// collector. All operations are idempotent except `store_sandbox`.
///
/// Transient backend failures surface as [`Error::StoreUnavailable`];
/// callers decide whether to degrade (router) or retry next tick
/// (collector).
#[async_trait]
pub trait Store: Send + Sync {
    /// Liveness probe with no side effects.
    async fn ping(&self) -> Result<()>;

    /// Fetch the live record for a session, if any. Never creates.
    async fn get_sandbox_by_session_id(&self, session_id: &str) -> Result<Option<SandboxInfo>>;

    /// Insert a new record and index both timestamps. Fails with
    /// [`Error::AlreadyExists`] if the session already has a live
    /// record; the session manager absorbs that race.
    async fn store_sandbox(&self, info: &SandboxInfo) -> Result<()>;

    /// Full-record replace, re-indexing changed scores. The monotonic
    /// fields converge to the larger timestamp, so racing with
    /// `update_session_last_activity` keeps the last writer by
    /// timestamp, not by call order.
    async fn update_sandbox(&self, info: &SandboxInfo) -> Result<()>;

    /// Remove the record and both index entries. No-op when absent.
    async fn delete_sandbox_by_session_id(&self, session_id: &str) -> Result<()>;

    /// Up to `limit` records whose expiry is at or before `before`,
    /// oldest first.
    async fn list_expired_sandboxes(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SandboxInfo>>;

    /// Up to `limit` records whose last activity is at or before
    /// `before`, oldest first.
    async fn list_inactive_sandboxes(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SandboxInfo>>;

    /// Advance a session's last-activity timestamp. Must be a cheap
    /// no-op when `at` does not strictly advance the stored value;
    /// this runs on every proxied request and write amplification is
    /// the dominant store cost.
    async fn update_session_last_activity(&self, session_id: &str, at: DateTime<Utc>)
        -> Result<()>;
}

#[derive(Default)]
struct Inner {
    sandboxes: HashMap<String, SandboxInfo>,
    /// (expiry millis, session id), ascending.
    by_expiry: BTreeSet<(i64, String)>,
    /// (last-activity millis, session id), ascending.
    by_activity: BTreeSet<(i64, String)>,
}

/// In-memory store backend. A single write lock covers the record map
/// and both indices, so every mutation is atomic across all three.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutations applied so far. Lets callers verify that
    /// non-advancing activity updates do not write.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn score(at: DateTime<Utc>) -> i64 {
        at.timestamp_millis()
    }

    fn index(inner: &mut Inner, info: &SandboxInfo) {
        inner
            .by_expiry
            .insert((Self::score(info.expires_at), info.session_id.clone()));
        inner
            .by_activity
            .insert((Self::score(info.last_activity), info.session_id.clone()));
    }

    fn unindex(inner: &mut Inner, info: &SandboxInfo) {
        inner
            .by_expiry
            .remove(&(Self::score(info.expires_at), info.session_id.clone()));
        inner
            .by_activity
            .remove(&(Self::score(info.last_activity), info.session_id.clone()));
    }

    fn list_by(
        index: &BTreeSet<(i64, String)>,
        sandboxes: &HashMap<String, SandboxInfo>,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Vec<SandboxInfo> {
        let cutoff = Self::score(before);
        index
            .iter()
            .take_while(|(score, _)| *score <= cutoff)
            .take(limit)
            .filter_map(|(_, session_id)| sandboxes.get(session_id).cloned())
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get_sandbox_by_session_id(&self, session_id: &str) -> Result<Option<SandboxInfo>> {
        Ok(self.inner.read().await.sandboxes.get(session_id).cloned())
    }

    async fn store_sandbox(&self, info: &SandboxInfo) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.sandboxes.contains_key(&info.session_id) {
            return Err(Error::AlreadyExists(info.session_id.clone()));
        }
        Self::index(&mut inner, info);
        inner
            .sandboxes
            .insert(info.session_id.clone(), info.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn update_sandbox(&self, info: &SandboxInfo) -> Result<()> {
        let mut inner = self.inner.write().await;
        let mut next = info.clone();
        if let Some(existing) = inner.sandboxes.get(&info.session_id) {
            // Expiry moves forward only; last activity never regresses.
            next.expires_at = next.expires_at.max(existing.expires_at);
            next.last_activity = next.last_activity.max(existing.last_activity);
            let existing = existing.clone();
            Self::unindex(&mut inner, &existing);
        }
        Self::index(&mut inner, &next);
        inner.sandboxes.insert(next.session_id.clone(), next);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete_sandbox_by_session_id(&self, session_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(info) = inner.sandboxes.remove(session_id) {
            Self::unindex(&mut inner, &info);
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn list_expired_sandboxes(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SandboxInfo>> {
        let inner = self.inner.read().await;
        Ok(Self::list_by(&inner.by_expiry, &inner.sandboxes, before, limit))
    }

    async fn list_inactive_sandboxes(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SandboxInfo>> {
        let inner = self.inner.read().await;
        Ok(Self::list_by(&inner.by_activity, &inner.sandboxes, before, limit))
    }

    async fn update_session_last_activity(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        // Fast path: a non-advancing update takes only the read lock.
        {
            let inner = self.inner.read().await;
            match inner.sandboxes.get(session_id) {
                Some(info) if at > info.last_activity => {}
                _ => return Ok(()),
            }
        }
        let mut inner = self.inner.write().await;
        let Some(info) = inner.sandboxes.get(session_id) else {
            return Ok(());
        };
        // Re-check under the write lock; a racing update may have won.
        if at <= info.last_activity {
            return Ok(());
        }
        let old_score = Self::score(info.last_activity);
        let session = info.session_id.clone();
        inner.by_activity.remove(&(old_score, session.clone()));
        inner.by_activity.insert((Self::score(at), session.clone()));
        if let Some(info) = inner.sandboxes.get_mut(&session) {
            info.last_activity = at;
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
