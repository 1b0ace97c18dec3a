//! Batched garbage collection of idle and expired sandboxes.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::runtime::{DeleteOutcome, RuntimeClient};
use crate::store::Store;

/// Result of one sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    /// Candidates returned by the two index queries (before dedup).
    pub scanned: usize,
    /// Sandboxes whose resource and store record are both gone.
    pub reclaimed: usize,
    /// Candidates skipped after a cluster delete failure.
    pub failed: usize,
    /// Fewer than a full batch was found across both queries; the
    /// backlog is empty for this tick.
    pub drained: bool,
}

/// Reconciles store state against cluster resources. `once` is the
/// re-entrant unit of work; an external timer drives it via [`run`].
///
/// [`run`]: GarbageCollector::run
pub struct GarbageCollector {
    store: Arc<dyn Store>,
    runtime: Arc<dyn RuntimeClient>,
    inactivity_ttl: Duration,
    batch_size: usize,
}

impl GarbageCollector {
    pub fn new(
        store: Arc<dyn Store>,
        runtime: Arc<dyn RuntimeClient>,
        inactivity_ttl: std::time::Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            runtime,
            inactivity_ttl: Duration::from_std(inactivity_ttl).unwrap_or(Duration::MAX),
            batch_size,
        }
    }

    /// One sweep: fetch up to a batch of inactive and a batch of
    /// expired sandboxes (oldest first, so sustained overload still
    /// reclaims the longest-stale entries), delete each candidate's
    /// cluster resource, then its store record.
    ///
    /// A failed resource delete leaves the store record in place for a
    /// later sweep and does not stop the rest of the batch. Store list
    /// errors abort the sweep; the caller retries next tick.
    pub async fn once(&self) -> Result<SweepStats> {
        let now = Utc::now();
        let inactive = self
            .store
            .list_inactive_sandboxes(now - self.inactivity_ttl, self.batch_size)
            .await?;
        let expired = self
            .store
            .list_expired_sandboxes(now, self.batch_size)
            .await?;

        let mut stats = SweepStats {
            scanned: inactive.len() + expired.len(),
            drained: inactive.len() + expired.len() < self.batch_size,
            ..Default::default()
        };

        // A sandbox can be both idle and expired; reclaim it once.
        let mut seen = HashSet::new();
        for info in inactive.into_iter().chain(expired) {
            if !seen.insert(info.session_id.clone()) {
                continue;
            }
            match self
                .runtime
                .delete_sandbox(&info.namespace, &info.kind, &info.name)
                .await
            {
                Ok(outcome) => {
                    if outcome == DeleteOutcome::AlreadyGone {
                        debug!(
                            session_id = %info.session_id,
                            name = %info.name,
                            "sandbox resource already gone"
                        );
                    }
                    self.store
                        .delete_sandbox_by_session_id(&info.session_id)
                        .await?;
                    info!(
                        session_id = %info.session_id,
                        sandbox_id = %info.sandbox_id,
                        "reclaimed sandbox"
                    );
                    stats.reclaimed += 1;
                }
                Err(e) => {
                    // The store record must outlive the resource, so it
                    // stays until a later sweep succeeds.
                    warn!(
                        session_id = %info.session_id,
                        name = %info.name,
                        error = %e,
                        "sandbox resource delete failed, skipping candidate"
                    );
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Drive sweeps on a fixed tick, draining the backlog each tick.
    pub async fn run(self: Arc<Self>, tick: std::time::Duration) {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            loop {
                match self.once().await {
                    Ok(stats) if stats.drained => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "sweep aborted, retrying next tick");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::MemoryStore;
    use crate::types::{SandboxEntryPoint, SandboxInfo, SandboxStatus, SANDBOX_KIND};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    /// In-memory cluster fake: remembers deletions, can be told which
    /// names are already gone and which fail.
    #[derive(Default)]
    struct FakeRuntime {
        deleted: Mutex<Vec<String>>,
        gone: HashSet<String>,
        broken: HashSet<String>,
    }

    #[async_trait]
    impl RuntimeClient for FakeRuntime {
        async fn delete_sandbox(
            &self,
            namespace: &str,
            kind: &str,
            name: &str,
        ) -> Result<DeleteOutcome> {
            if self.broken.contains(name) {
                return Err(Error::ClusterResourceDeleteFailed {
                    namespace: namespace.to_string(),
                    kind: kind.to_string(),
                    name: name.to_string(),
                    reason: "injected".to_string(),
                });
            }
            if self.gone.contains(name) {
                return Ok(DeleteOutcome::AlreadyGone);
            }
            self.deleted.lock().unwrap().push(name.to_string());
            Ok(DeleteOutcome::Deleted)
        }
    }

    fn sandbox(
        session_id: &str,
        expires_at: DateTime<Utc>,
        last_activity: DateTime<Utc>,
    ) -> SandboxInfo {
        SandboxInfo {
            sandbox_id: format!("sbx-{session_id}"),
            namespace: "default".into(),
            name: format!("sandbox-{session_id}"),
            kind: SANDBOX_KIND.into(),
            session_id: session_id.into(),
            entry_points: vec![SandboxEntryPoint {
                endpoint: "http://127.0.0.1:8080".into(),
                path: "/".into(),
            }],
            status: SandboxStatus::Running,
            expires_at,
            last_activity,
        }
    }

    fn collector(
        store: Arc<MemoryStore>,
        runtime: Arc<FakeRuntime>,
        batch_size: usize,
    ) -> GarbageCollector {
        GarbageCollector::new(store, runtime, StdDuration::from_secs(300), batch_size)
    }

    #[tokio::test]
    async fn reclaims_idle_sandbox() {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(FakeRuntime::default());
        let now = Utc::now();
        store
            .store_sandbox(&sandbox(
                "idle",
                now + Duration::hours(1),
                now - Duration::hours(1),
            ))
            .await
            .unwrap();
        store
            .store_sandbox(&sandbox("busy", now + Duration::hours(1), now))
            .await
            .unwrap();

        let stats = collector(store.clone(), runtime.clone(), 16)
            .once()
            .await
            .unwrap();

        assert_eq!(stats.reclaimed, 1);
        assert!(stats.drained);
        assert!(store
            .get_sandbox_by_session_id("idle")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_sandbox_by_session_id("busy")
            .await
            .unwrap()
            .is_some());
        assert_eq!(*runtime.deleted.lock().unwrap(), vec!["sandbox-idle"]);
    }

    #[tokio::test]
    async fn reclaims_expired_sandbox_even_when_recently_active() {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(FakeRuntime::default());
        let now = Utc::now();
        store
            .store_sandbox(&sandbox("overdue", now - Duration::seconds(5), now))
            .await
            .unwrap();

        let stats = collector(store.clone(), runtime, 16).once().await.unwrap();

        assert_eq!(stats.reclaimed, 1);
        assert!(store
            .get_sandbox_by_session_id("overdue")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn already_gone_resource_still_drops_the_record() {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(FakeRuntime {
            gone: HashSet::from(["sandbox-idle".to_string()]),
            ..Default::default()
        });
        let now = Utc::now();
        store
            .store_sandbox(&sandbox(
                "idle",
                now + Duration::hours(1),
                now - Duration::hours(1),
            ))
            .await
            .unwrap();

        let stats = collector(store.clone(), runtime, 16).once().await.unwrap();

        assert_eq!(stats.reclaimed, 1);
        assert!(store
            .get_sandbox_by_session_id("idle")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_failure_skips_candidate_and_keeps_record() {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(FakeRuntime {
            broken: HashSet::from(["sandbox-s1".to_string()]),
            ..Default::default()
        });
        let now = Utc::now();
        for id in ["s0", "s1", "s2"] {
            store
                .store_sandbox(&sandbox(
                    id,
                    now + Duration::hours(1),
                    now - Duration::hours(1),
                ))
                .await
                .unwrap();
        }

        let gc = collector(store.clone(), runtime.clone(), 16);
        let stats = gc.once().await.unwrap();

        // The broken candidate does not block the other two.
        assert_eq!(stats.reclaimed, 2);
        assert_eq!(stats.failed, 1);
        assert!(store
            .get_sandbox_by_session_id("s1")
            .await
            .unwrap()
            .is_some());

        // Once the cluster recovers, the next sweep picks it up.
        let runtime = Arc::new(FakeRuntime::default());
        let gc = collector(store.clone(), runtime, 16);
        let stats = gc.once().await.unwrap();
        assert_eq!(stats.reclaimed, 1);
        assert!(store
            .get_sandbox_by_session_id("s1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sandbox_both_idle_and_expired_is_reclaimed_once() {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(FakeRuntime::default());
        let now = Utc::now();
        store
            .store_sandbox(&sandbox(
                "stale",
                now - Duration::hours(1),
                now - Duration::hours(1),
            ))
            .await
            .unwrap();

        let stats = collector(store.clone(), runtime.clone(), 16)
            .once()
            .await
            .unwrap();

        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.reclaimed, 1);
        assert_eq!(runtime.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_once_drains_backlog_in_batches() {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(FakeRuntime::default());
        let now = Utc::now();
        for i in 0..5 {
            store
                .store_sandbox(&sandbox(
                    &format!("s{i}"),
                    now + Duration::hours(1),
                    now - Duration::hours(1) - Duration::seconds(i),
                ))
                .await
                .unwrap();
        }

        let gc = collector(store.clone(), runtime, 2);
        let mut total = 0;
        let mut sweeps = 0;
        loop {
            let stats = gc.once().await.unwrap();
            total += stats.reclaimed;
            sweeps += 1;
            if stats.drained {
                break;
            }
            assert!(sweeps < 10, "collector failed to drain");
        }

        assert_eq!(total, 5);
        // Re-entrant: another sweep on an empty backlog is a no-op.
        let stats = gc.once().await.unwrap();
        assert_eq!(stats.scanned, 0);
        assert!(stats.drained);
    }

    #[tokio::test]
    async fn oldest_candidates_are_reclaimed_first() {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(FakeRuntime::default());
        let now = Utc::now();
        for (id, idle_mins) in [("newer", 10), ("oldest", 60), ("middle", 30)] {
            store
                .store_sandbox(&sandbox(
                    id,
                    now + Duration::hours(1),
                    now - Duration::minutes(idle_mins),
                ))
                .await
                .unwrap();
        }

        collector(store, runtime.clone(), 2).once().await.unwrap();

        assert_eq!(
            *runtime.deleted.lock().unwrap(),
            vec!["sandbox-oldest", "sandbox-middle"]
        );
    }
}
