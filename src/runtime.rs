//! Client seams for the workload-manager runtime API.
//!
//! Cluster mutations are fronted by the platform's workload-manager
//! service: sandbox creation on first invocation and resource deletion
//! during collection. Both sit behind narrow traits so the session
//! manager and collector run against in-memory fakes in tests.

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::error::{Error, Result};
use crate::types::SandboxInfo;

/// Outcome of deleting a cluster resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The resource was already gone; callers treat this as success.
    AlreadyGone,
}

/// Deletes sandbox-backing cluster resources by coordinates.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    async fn delete_sandbox(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<DeleteOutcome>;
}

/// Creates the backing sandbox for a session's first invocation.
#[async_trait]
pub trait SandboxProvisioner: Send + Sync {
    async fn create_sandbox(&self, session_id: &str) -> Result<SandboxInfo>;
}

/// HTTP implementation of both seams over the shared pooled client.
pub struct RuntimeApiClient {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Serialize)]
struct CreateSandboxRequest<'a> {
    session_id: &'a str,
}

impl RuntimeApiClient {
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl SandboxProvisioner for RuntimeApiClient {
    async fn create_sandbox(&self, session_id: &str) -> Result<SandboxInfo> {
        let url = self
            .base_url
            .join("v1/sandboxes")
            .map_err(|e| Error::SandboxProvisioningFailed(e.to_string()))?;

        let resp = self
            .client
            .post(url)
            .json(&CreateSandboxRequest { session_id })
            .send()
            .await
            .map_err(|e| Error::SandboxProvisioningFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::SandboxProvisioningFailed(format!(
                "runtime API returned {}",
                resp.status()
            )));
        }
        resp.json::<SandboxInfo>()
            .await
            .map_err(|e| Error::SandboxProvisioningFailed(e.to_string()))
    }
}

#[async_trait]
impl RuntimeClient for RuntimeApiClient {
    async fn delete_sandbox(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<DeleteOutcome> {
        let delete_failed = |reason: String| Error::ClusterResourceDeleteFailed {
            namespace: namespace.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            reason,
        };

        let path = format!(
            "v1/namespaces/{}/{}/{}",
            namespace,
            kind.to_ascii_lowercase(),
            name
        );
        let url = self
            .base_url
            .join(&path)
            .map_err(|e| delete_failed(e.to_string()))?;

        let resp = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| delete_failed(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => Ok(DeleteOutcome::Deleted),
            reqwest::StatusCode::NOT_FOUND => Ok(DeleteOutcome::AlreadyGone),
            s => Err(delete_failed(format!("runtime API returned {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SandboxEntryPoint, SandboxStatus, SANDBOX_KIND};
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{delete, post};
    use axum::{Json, Router};
    use chrono::Utc;

    async fn serve(app: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    fn api_client(base: Url) -> RuntimeApiClient {
        RuntimeApiClient::new(reqwest::Client::new(), base)
    }

    #[tokio::test]
    async fn create_sandbox_round_trips_descriptor() {
        let app = Router::new().route(
            "/v1/sandboxes",
            post(|| async {
                Json(SandboxInfo {
                    sandbox_id: "sbx-1".into(),
                    namespace: "default".into(),
                    name: "sandbox-1".into(),
                    kind: SANDBOX_KIND.into(),
                    session_id: "s1".into(),
                    entry_points: vec![SandboxEntryPoint {
                        endpoint: "http://10.0.0.5:8080".into(),
                        path: "/".into(),
                    }],
                    status: SandboxStatus::Pending,
                    expires_at: Utc::now(),
                    last_activity: Utc::now(),
                })
            }),
        );
        let client = api_client(serve(app).await);

        let info = client.create_sandbox("s1").await.unwrap();
        assert_eq!(info.sandbox_id, "sbx-1");
        assert_eq!(info.session_id, "s1");
    }

    #[tokio::test]
    async fn create_sandbox_maps_failure_status() {
        let app = Router::new().route(
            "/v1/sandboxes",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let client = api_client(serve(app).await);

        let err = client.create_sandbox("s1").await.unwrap_err();
        assert!(matches!(err, Error::SandboxProvisioningFailed(_)));
    }

    #[tokio::test]
    async fn delete_distinguishes_gone_from_failed() {
        let app = Router::new().route(
            "/v1/namespaces/:ns/sandbox/:name",
            delete(|Path((_, name)): Path<(String, String)>| async move {
                match name.as_str() {
                    "gone" => StatusCode::NOT_FOUND,
                    "broken" => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::NO_CONTENT,
                }
            }),
        );
        let client = api_client(serve(app).await);

        assert_eq!(
            client
                .delete_sandbox("default", SANDBOX_KIND, "ok")
                .await
                .unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            client
                .delete_sandbox("default", SANDBOX_KIND, "gone")
                .await
                .unwrap(),
            DeleteOutcome::AlreadyGone
        );
        let err = client
            .delete_sandbox("default", SANDBOX_KIND, "broken")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ClusterResourceDeleteFailed { .. }));
    }
}
