//! Maps core errors onto HTTP responses with a `{ ok, msg }` JSON body.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use peer_wiki_core::WikiError;
use serde::Serialize;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    Wiki(WikiError),
}

impl From<WikiError> for ApiError {
    fn from(err: WikiError) -> Self {
        Self::Wiki(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    msg: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String) {
        let Self::Wiki(err) = self;
        match err {
            WikiError::NotFound(_) | WikiError::NoDiff => (StatusCode::NOT_FOUND, err.to_string()),
            WikiError::AlreadyExists(_) => (StatusCode::CONFLICT, err.to_string()),
            WikiError::InvalidPath
            | WikiError::ReservedName(_)
            | WikiError::ParentMissing(_)
            | WikiError::HasChildren(_)
            | WikiError::InvalidCommit
            | WikiError::InvalidQuery(_) => (StatusCode::BAD_REQUEST, err.to_string()),
            WikiError::Forbidden => (StatusCode::FORBIDDEN, err.to_string()),
            // One message for every handshake failure.
            WikiError::HandshakeSignatureMismatch
            | WikiError::UntrustedAgent
            | WikiError::TokenExpiredOrMissing => {
                (StatusCode::UNAUTHORIZED, "unauthorized".to_string())
            }
            WikiError::InvalidLogin => (StatusCode::UNAUTHORIZED, err.to_string()),
            WikiError::TooManyAttempts { .. } => (StatusCode::TOO_MANY_REQUESTS, err.to_string()),
            WikiError::CorruptCache(_)
            | WikiError::Io(_)
            | WikiError::Json(_)
            | WikiError::Git(_)
            | WikiError::Search(_)
            | WikiError::PasswordHash(_)
            | WikiError::Session(_) => {
                error!(%err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = self.parts();
        let mut response = (status, Json(ErrorBody { ok: false, msg })).into_response();
        if let Self::Wiki(WikiError::TooManyAttempts { retry_after }) = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
