//! Runtime configuration, owned by the caller and passed in by value.

use std::time::Duration;

/// Header carrying the session identifier on inbound requests.
pub const SESSION_ID_HEADER: &str = "x-agentgate-session-id";

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
pub const DEFAULT_INACTIVITY_TTL_SECS: u64 = 300;
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_GC_BATCH_SIZE: usize = 16;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configuration consumed by the router, session manager, and collector.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the router listens on.
    pub port: u16,
    /// Upper bound on in-flight proxied requests.
    pub max_concurrent_requests: usize,
    /// Absolute lifetime granted to a sandbox at creation.
    pub session_ttl: Duration,
    /// Maximum idle duration before a sandbox is reclaimable.
    pub inactivity_ttl: Duration,
    /// Collector tick interval.
    pub gc_interval: Duration,
    /// Candidates fetched per index per sweep.
    pub gc_batch_size: usize,
    /// Total timeout for one proxied downstream request.
    pub request_timeout: Duration,
    /// Base URL of the workload-manager runtime API.
    pub runtime_api_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            inactivity_ttl: Duration::from_secs(DEFAULT_INACTIVITY_TTL_SECS),
            gc_interval: Duration::from_secs(DEFAULT_GC_INTERVAL_SECS),
            gc_batch_size: DEFAULT_GC_BATCH_SIZE,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            runtime_api_url: "http://localhost:9090".to_string(),
        }
    }
}
