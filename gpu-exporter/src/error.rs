//! Error types for device queries and metric exposition.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::metrics::GPUIndex;

/// Errors returned by the device interface and the snapshot builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The device interface could not be initialized.
    #[error("unable to initialize device interface: {0}")]
    Init(String),

    /// The device interface could not be torn down.
    #[error("unable to shut down device interface: {0}")]
    Shutdown(String),

    /// Device enumeration failed.
    #[error("unable to enumerate devices: {0}")]
    Enumeration(String),

    /// The stable identity (UUID) of a device could not be resolved.
    #[error("unable to get uuid of device at index {index}: {reason}")]
    Identity { index: GPUIndex, reason: String },

    /// A required per-device query failed.
    #[error("unable to query {metric} of device at index {index}: {reason}")]
    Query {
        index: GPUIndex,
        metric: &'static str,
        reason: String,
    },

    /// The device or driver does not support this query.
    #[error("query not supported by this device")]
    NotSupported,
}

impl DeviceError {
    /// Whether this error aborts a snapshot build.
    pub fn is_fatal_to_build(&self) -> bool {
        !matches!(self, Self::NotSupported)
    }
}

/// Errors raised while serving a scrape.
#[derive(Debug, Error)]
pub enum ExportError {
    /// No snapshot could be produced at all.
    #[error("scrape failed: {0}")]
    Scrape(#[from] DeviceError),

    /// A metric could not be registered or set.
    #[error("metric error: {0}")]
    Metric(#[from] prometheus::Error),

    /// The exposition text could not be produced.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The blocking scrape task did not complete.
    #[error("scrape task failed: {0}")]
    Task(String),
}

/// Errors that stop the HTTP endpoint.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the listen address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(std::net::SocketAddr, std::io::Error),

    /// The server loop exited with an I/O error.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Errors while writing snapshots in stdout mode.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IntoResponse for ExportError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Scrape(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Metric(_) | Self::Encoding(_) | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            [("content-type", "text/plain; charset=utf-8")],
            format!("{self}\n"),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_not_supported_is_advisory() {
        assert!(!DeviceError::NotSupported.is_fatal_to_build());
        assert!(DeviceError::Enumeration("gone".into()).is_fatal_to_build());
        assert!(
            DeviceError::Identity {
                index: 1,
                reason: "lost".into()
            }
            .is_fatal_to_build()
        );
    }

    #[test]
    fn test_error_display() {
        let err = DeviceError::Identity {
            index: 3,
            reason: "GPU is lost".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unable to get uuid of device at index 3: GPU is lost"
        );

        let err = DeviceError::Query {
            index: 0,
            metric: "memory info",
            reason: "unknown error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unable to query memory info of device at index 0: unknown error"
        );
    }

    #[tokio::test]
    async fn test_scrape_error_response_has_body() {
        let err = ExportError::from(DeviceError::Enumeration("driver not loaded".into()));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("driver not loaded"));
    }

    #[tokio::test]
    async fn test_encoding_error_response() {
        let response = ExportError::Encoding("bad utf-8".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
