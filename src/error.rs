//! Error handling.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Freva REST server error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum FrevaRestError {
    /// Request is syntactically or semantically malformed (facet, time,
    /// bbox, pagination, request body).
    #[error("{0}")]
    InvalidInput(String),

    /// Missing or invalid bearer token.
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated but not authorised for the requested resource.
    #[error("{0}")]
    Forbidden(String),

    /// An explicitly addressed resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violation, e.g. a flavour name collision.
    #[error("{0}")]
    Conflict(String),

    /// Attempt to modify a built-in flavour.
    #[error("built-in flavour '{0}' cannot be modified")]
    Immutable(String),

    /// An upstream service did not respond after retries.
    #[error("{0}")]
    BackendUnavailable(String),

    /// Unexpected internal condition.
    #[error("internal error: {0}")]
    Internal(String),

    /// Error deserialising a JSON request body.
    #[error(transparent)]
    InvalidJson(#[from] JsonRejection),

    /// Error validating a deserialised request body.
    #[error("request data is not valid: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// JSON body returned with every error response.
#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

// Tell axum how to convert `FrevaRestError` into a response.
impl IntoResponse for FrevaRestError {
    fn into_response(self) -> Response {
        let status = match &self {
            FrevaRestError::InvalidInput(_)
            | FrevaRestError::Immutable(_)
            | FrevaRestError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FrevaRestError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            FrevaRestError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            FrevaRestError::Forbidden(_) => StatusCode::FORBIDDEN,
            FrevaRestError::NotFound(_) => StatusCode::NOT_FOUND,
            FrevaRestError::Conflict(_) => StatusCode::CONFLICT,
            FrevaRestError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            FrevaRestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<redis::RedisError> for FrevaRestError {
    fn from(error: redis::RedisError) -> Self {
        FrevaRestError::BackendUnavailable(format!("cache unavailable: {error}"))
    }
}

impl From<mongodb::error::Error> for FrevaRestError {
    fn from(error: mongodb::error::Error) -> Self {
        FrevaRestError::BackendUnavailable(format!("document store unavailable: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Jump through the hoops to get the body as a string.
    async fn body_string(response: Response) -> String {
        String::from_utf8(
            hyper::body::to_bytes(response.into_body())
                .await
                .unwrap()
                .to_vec(),
        )
        .unwrap()
    }

    async fn assert_error_response(error: FrevaRestError, status: StatusCode, detail: &str) {
        let response = error.into_response();
        assert_eq!(status, response.status());
        assert_eq!(
            mime::APPLICATION_JSON.as_ref(),
            response
                .headers()
                .get(axum::http::header::CONTENT_TYPE)
                .unwrap()
        );
        let body = body_string(response).await;
        assert_eq!(format!(r#"{{"detail":"{detail}"}}"#), body);
    }

    #[tokio::test]
    async fn invalid_input() {
        let error = FrevaRestError::InvalidInput("no such facet: foo".to_string());
        assert_error_response(
            error,
            StatusCode::UNPROCESSABLE_ENTITY,
            "no such facet: foo",
        )
        .await;
    }

    #[tokio::test]
    async fn unauthenticated() {
        let error = FrevaRestError::Unauthenticated("token expired".to_string());
        assert_error_response(error, StatusCode::UNAUTHORIZED, "token expired").await;
    }

    #[tokio::test]
    async fn forbidden() {
        let error = FrevaRestError::Forbidden("guests may not do this".to_string());
        assert_error_response(error, StatusCode::FORBIDDEN, "guests may not do this").await;
    }

    #[tokio::test]
    async fn not_found() {
        let error = FrevaRestError::NotFound("unknown token".to_string());
        assert_error_response(error, StatusCode::NOT_FOUND, "unknown token").await;
    }

    #[tokio::test]
    async fn conflict() {
        let error = FrevaRestError::Conflict("flavour 'my2' already exists".to_string());
        assert_error_response(error, StatusCode::CONFLICT, "flavour 'my2' already exists").await;
    }

    #[tokio::test]
    async fn immutable() {
        let error = FrevaRestError::Immutable("cmip6".to_string());
        assert_error_response(
            error,
            StatusCode::UNPROCESSABLE_ENTITY,
            "built-in flavour 'cmip6' cannot be modified",
        )
        .await;
    }

    #[tokio::test]
    async fn backend_unavailable() {
        let error = FrevaRestError::BackendUnavailable("search index gone".to_string());
        assert_error_response(error, StatusCode::SERVICE_UNAVAILABLE, "search index gone").await;
    }

    #[tokio::test]
    async fn internal() {
        let error = FrevaRestError::Internal("oops".to_string());
        assert_error_response(
            error,
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error: oops",
        )
        .await;
    }
}
