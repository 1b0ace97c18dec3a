//! Reverse proxy front door: session-affinity routing with admission
//! control and asynchronous liveness recording.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{any, get};
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::SESSION_ID_HEADER;
use crate::error::{Error, Result};
use crate::state::AppState;
use crate::store::Store;
use crate::types::SandboxInfo;

/// Headers that must not travel across the proxy hop, plus the
/// routing-internal session header.
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    SESSION_ID_HEADER,
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Queued liveness updates waiting to be flushed to the store.
const ACTIVITY_QUEUE_CAPACITY: usize = 1024;

/// Fire-and-forget recorder for session liveness. Updates flow through
/// a bounded queue to a background flusher; the response path never
/// waits on the store, and a full queue drops the signal (the next
/// request re-records it).
#[derive(Clone)]
pub struct ActivityRecorder {
    tx: mpsc::Sender<(String, DateTime<Utc>)>,
}

impl ActivityRecorder {
    pub fn spawn(store: Arc<dyn Store>) -> Self {
        let (tx, mut rx) = mpsc::channel::<(String, DateTime<Utc>)>(ACTIVITY_QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some((session_id, at)) = rx.recv().await {
                if store
                    .update_session_last_activity(&session_id, at)
                    .await
                    .is_ok()
                {
                    continue;
                }
                // One retry, then drop: losing a liveness tick is
                // cheaper than queueing unboundedly through an outage.
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                if let Err(e) = store.update_session_last_activity(&session_id, at).await {
                    warn!(session_id = %session_id, error = %e, "dropping last-activity update");
                }
            }
        });
        Self { tx }
    }

    pub fn record(&self, session_id: &str, at: DateTime<Utc>) {
        if self.tx.try_send((session_id.to_string(), at)).is_err() {
            debug!(session_id, "activity queue full, dropping update");
        }
    }
}

/// Routing inputs derived once per request instead of re-parsing
/// headers at each layer.
#[derive(Debug)]
struct RequestContext {
    session_id: String,
    namespace: String,
    runtime: String,
    /// Sub-path below `/invocations`, always starting with `/`.
    path: String,
}

impl RequestContext {
    fn new(params: &HashMap<String, String>, headers: &HeaderMap) -> Result<Self> {
        let session_id = headers
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(Error::MissingSessionId(SESSION_ID_HEADER))?
            .to_string();
        let path = match params.get("path") {
            Some(rest) => format!("/{}", rest.trim_start_matches('/')),
            None => "/".to_string(),
        };
        Ok(Self {
            session_id,
            namespace: params.get("namespace").cloned().unwrap_or_default(),
            runtime: params.get("name").cloned().unwrap_or_default(),
            path,
        })
    }
}

/// Build the HTTP router over the injected state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/v1/namespaces/:namespace/agent-runtimes/:name/invocations",
            any(invoke),
        )
        .route(
            "/v1/namespaces/:namespace/agent-runtimes/:name/invocations/*path",
            any(invoke),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the router on the given port.
pub async fn serve(port: u16, state: AppState) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("starting router on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn health(State(state): State<AppState>) -> Result<&'static str> {
    state.store.ping().await?;
    Ok("OK")
}

async fn invoke(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    req: Request,
) -> Result<Response> {
    let ctx = RequestContext::new(&params, req.headers())?;

    // Admission gate: bounded in-flight requests, reject rather than
    // queue. The permit is dropped on every exit path, including the
    // client disconnecting mid-proxy.
    let _permit = state
        .gate
        .clone()
        .try_acquire_owned()
        .map_err(|_| Error::TooManyRequests)?;

    debug!(
        session_id = %ctx.session_id,
        namespace = %ctx.namespace,
        runtime = %ctx.runtime,
        path = %ctx.path,
        "routing invocation"
    );

    let info = state.sessions.resolve(&ctx.session_id).await?;
    let result = forward(&state, &ctx, &info, req).await;

    // Liveness is recorded for failed attempts too: the request itself
    // proves the session is alive. Never blocks the response.
    state.activity.record(&ctx.session_id, Utc::now());
    result
}

async fn forward(
    state: &AppState,
    ctx: &RequestContext,
    info: &SandboxInfo,
    req: Request,
) -> Result<Response> {
    let entry_point = info
        .match_entry_point(&ctx.path)
        .ok_or_else(|| Error::NoMatchingRoute(ctx.path.clone()))?;

    let mut url = format!(
        "{}{}",
        entry_point.endpoint.trim_end_matches('/'),
        ctx.path
    );
    if let Some(query) = req.uri().query() {
        url.push('?');
        url.push_str(query);
    }

    let (parts, body) = req.into_parts();
    let mut headers = parts.headers;
    for name in STRIPPED_REQUEST_HEADERS {
        headers.remove(*name);
    }

    let upstream = state
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    for name in STRIPPED_RESPONSE_HEADERS {
        response_headers.remove(*name);
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}
