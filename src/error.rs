//! Auriga error abstractions.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

// Error messages.
pub const ERR_NODES_CTL_GONE: &str = "error communicating with node controller";
pub const ERR_COLLECTIONS_CTL_GONE: &str = "error communicating with collection controller";

/// Application error variants.
///
/// All of these are recoverable by the caller. Nothing in the controllers terminates the process
/// on one of these, they are simply handed back to whichever boundary issued the request.
#[derive(Debug, Error)]
pub enum AppError {
    /// The named node is not registered.
    #[error("node `{0}` is not registered")]
    UnknownNode(String),
    /// A node with the given name is already registered.
    #[error("node `{0}` is already registered")]
    NodeAlreadyRegistered(String),
    /// No registered node is currently free to take a new placement.
    #[error("no free node is available")]
    NoFreeNode,
    /// The named collection is not known.
    #[error("collection `{0}` is not known")]
    UnknownCollection(String),
    /// A collection with the given name already exists.
    #[error("collection `{0}` already exists")]
    CollectionAlreadyExists(String),
    /// A copy of the collection is in flight, the caller should retry.
    #[error("collection `{0}` is being copied, retry later")]
    CollectionBlocked(String),
    /// A specific node rejected a document write.
    #[error("node `{node}` rejected a document of collection `{collection}`")]
    DocumentAllocationFailure { collection: String, node: String },
    /// Copying a collection onto a node failed.
    #[error("error copying collection `{collection}` to node `{node}`: {reason}")]
    CollectionAllocationFailure { collection: String, node: String, reason: String },
    /// A status probe of a node failed.
    #[error("status probe of node `{node}` failed: {reason}")]
    ProbeFailed { node: String, reason: String },
    /// A status probe of a node did not answer in time.
    #[error("status probe of node `{0}` timed out")]
    ProbeTimeout(String),
    /// The operation did not complete within its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// The given input was invalid.
    #[error("validation error: {0}")]
    InvalidInput(String),
    /// The server has hit an internal error, but will remain online.
    #[error("internal server error")]
    Ise(anyhow::Error),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownNode(_) | Self::UnknownCollection(_) => StatusCode::NOT_FOUND,
            Self::NodeAlreadyRegistered(_) | Self::CollectionAlreadyExists(_) => StatusCode::CONFLICT,
            Self::NoFreeNode | Self::CollectionBlocked(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DocumentAllocationFailure { .. } | Self::CollectionAllocationFailure { .. } | Self::ProbeFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::ProbeTimeout(_) | Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Ise(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "error handling request");
        }
        (status, self.to_string()).into_response()
    }
}

/// A result type where the error is an `AppError`.
pub type AppResult<T> = ::std::result::Result<T, AppError>;

/// The error type used to indicate that a system shutdown is required.
#[derive(Debug, thiserror::Error)]
#[error("fatal error: {0}")]
pub struct ShutdownError(#[from] pub anyhow::Error);

/// A result type where the error is a `ShutdownError`.
pub type ShutdownResult<T> = ::std::result::Result<T, ShutdownError>;
