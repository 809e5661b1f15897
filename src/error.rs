//! Error types shared by handlers, middleware, and log sinks.

use thiserror::Error;

use crate::http::{Response, StatusCode};

/// An opaque, thread-safe error used for handler and sink failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error raised by a middleware or terminal handler.
///
/// Chain errors travel back up through every enclosing [`Next::run`] call as
/// an `Err`; nothing in the executor swallows them. Use
/// [`Recover`](crate::logging::Recover) (or your own middleware) to turn them
/// into responses.
///
/// [`Next::run`]: crate::middleware::Next::run
///
/// # Examples
///
/// ```
/// use strata::{HandlerError, StatusCode};
///
/// let err = HandlerError::status(StatusCode::NotFound, "no such user");
/// assert_eq!(err.status_code(), StatusCode::NotFound);
///
/// let response = err.into_response();
/// assert_eq!(response.status(), StatusCode::NotFound);
/// assert_eq!(&response.body_ref()[..], b"no such user");
/// ```
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A deliberate HTTP error with a status and a client-facing message.
    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String },

    /// Any other failure. Maps to `500 Internal Server Error`.
    #[error("internal error: {0}")]
    Internal(#[from] BoxError),
}

impl HandlerError {
    /// Creates a [`HandlerError::Status`].
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Wraps any error as [`HandlerError::Internal`].
    pub fn internal(err: impl Into<BoxError>) -> Self {
        Self::Internal(err.into())
    }

    /// The HTTP status this error should be reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } => *status,
            Self::Internal(_) => StatusCode::InternalServerError,
        }
    }

    /// Converts the error into a plain-text response.
    ///
    /// Internal errors only expose the canonical reason phrase; their detail
    /// belongs in the error log, not in the response body.
    pub fn into_response(self) -> Response {
        match self {
            Self::Status { status, message } => Response::new(status).body(message),
            Self::Internal(_) => {
                let status = StatusCode::InternalServerError;
                Response::new(status).body(status.canonical_reason())
            }
        }
    }
}
