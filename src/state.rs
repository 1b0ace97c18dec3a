//! Shared application state wired together at startup.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::router::ActivityRecorder;
use crate::session::SessionManager;
use crate::store::Store;

/// Everything a request handler needs, injected at construction so
/// tests can swap any piece. The `reqwest::Client` is the shared
/// connection-pooled transport; handlers never build their own,
/// because re-dialing a sandbox per request is the dominant latency
/// cost on the proxy path.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionManager>,
    pub client: reqwest::Client,
    pub gate: Arc<Semaphore>,
    pub activity: ActivityRecorder,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<SessionManager>,
        client: reqwest::Client,
        max_concurrent_requests: usize,
    ) -> Self {
        let activity = ActivityRecorder::spawn(store.clone());
        Self {
            store,
            sessions,
            client,
            gate: Arc::new(Semaphore::new(max_concurrent_requests)),
            activity,
        }
    }
}
