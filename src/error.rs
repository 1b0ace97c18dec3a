//! Crate-wide error taxonomy and HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The request carried no session id header.
    #[error("missing session id header '{0}'")]
    MissingSessionId(&'static str),

    /// No entry point prefix matched the requested path.
    #[error("no entry point matches path '{0}'")]
    NoMatchingRoute(String),

    /// The sandbox-provisioning capability failed to create a sandbox.
    #[error("sandbox provisioning failed: {0}")]
    SandboxProvisioningFailed(String),

    /// The backing store could not be reached or answered with a
    /// transient failure.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The admission gate is at its in-flight request limit.
    #[error("too many requests in flight")]
    TooManyRequests,

    /// Forwarding to the sandbox entry point failed.
    #[error("upstream request failed: {0}")]
    UpstreamUnreachable(#[from] reqwest::Error),

    /// A live record already exists for this session id.
    #[error("sandbox for session '{0}' already exists")]
    AlreadyExists(String),

    /// Deleting a sandbox's cluster resource failed. Recoverable per
    /// candidate; the collector logs it and moves on.
    #[error("failed to delete {kind} {namespace}/{name}: {reason}")]
    ClusterResourceDeleteFailed {
        namespace: String,
        kind: String,
        name: String,
        reason: String,
    },
}

impl Error {
    /// Stable machine-readable code carried in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::MissingSessionId(_) => "MISSING_SESSION_ID",
            Error::NoMatchingRoute(_) => "NO_MATCHING_ROUTE",
            Error::SandboxProvisioningFailed(_) => "SANDBOX_PROVISIONING_FAILED",
            Error::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Error::TooManyRequests => "TOO_MANY_REQUESTS",
            Error::UpstreamUnreachable(_) => "UPSTREAM_UNREACHABLE",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::ClusterResourceDeleteFailed { .. } => "CLUSTER_RESOURCE_DELETE_FAILED",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::MissingSessionId(_) => StatusCode::BAD_REQUEST,
            Error::NoMatchingRoute(_) => StatusCode::NOT_FOUND,
            Error::SandboxProvisioningFailed(_) => StatusCode::BAD_GATEWAY,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Error::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::ClusterResourceDeleteFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Structured error body returned to clients. Carries only what the
/// caller already supplied, never cluster resource names or store keys.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::TooManyRequests.code(), "TOO_MANY_REQUESTS");
        assert_eq!(
            Error::NoMatchingRoute("/x".into()).code(),
            "NO_MATCHING_ROUTE"
        );
        assert_eq!(
            Error::MissingSessionId("x-agentgate-session-id").code(),
            "MISSING_SESSION_ID"
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            Error::MissingSessionId("h").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::NoMatchingRoute("/x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(Error::TooManyRequests.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            Error::StoreUnavailable("down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
