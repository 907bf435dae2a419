//! Request-scoped errors and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::links::MintError;
use crate::listing::ListError;
use crate::resolver::ResolveError;

/// Body sent for anything that cannot be resolved or read
pub const NOT_FOUND_BODY: &str = "Either the requested item doesn't exist or access was denied";

/// Application error types
///
/// Details are logged where the error is raised; clients only ever see a
/// short fixed message.
#[derive(Debug)]
pub enum AppError {
    /// Path missing, unreadable or outside the root. Deliberately indistinguishable.
    NotFoundOrDenied,
    /// Unknown or expired temp link, or an unknown route
    UnknownRoute,
    /// The server failed in a way unrelated to the request path
    Internal,
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        err.log();
        AppError::NotFoundOrDenied
    }
}

impl From<ListError> for AppError {
    fn from(err: ListError) -> Self {
        tracing::error!(error = %err, "Unable to read directory");
        AppError::NotFoundOrDenied
    }
}

impl From<MintError> for AppError {
    fn from(err: MintError) -> Self {
        tracing::error!(error = %err, "Unable to mint temp link");
        AppError::Internal
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFoundOrDenied => (StatusCode::NOT_FOUND, NOT_FOUND_BODY),
            AppError::UnknownRoute => (StatusCode::NOT_FOUND, "404\n"),
            AppError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        (status, message).into_response()
    }
}
