use std::time::Duration;

/// Errors surfaced by the wiki core.
#[derive(Debug, thiserror::Error)]
pub enum WikiError {
    #[error("entry {0} does not exist")]
    NotFound(String),
    #[error("entry {0} already exists")]
    AlreadyExists(String),
    #[error("invalid path")]
    InvalidPath,
    #[error("{0} is a reserved name")]
    ReservedName(String),
    #[error("parent of {0} does not exist")]
    ParentMissing(String),
    #[error("entry {0} still has children")]
    HasChildren(String),
    #[error("forbidden")]
    Forbidden,
    #[error("handshake signature mismatch")]
    HandshakeSignatureMismatch,
    #[error("handshake from untrusted agent address")]
    UntrustedAgent,
    #[error("login token is invalid or expired")]
    TokenExpiredOrMissing,
    #[error("invalid login")]
    InvalidLogin,
    #[error("too many attempts, retry in {}s", retry_after.as_secs())]
    TooManyAttempts { retry_after: Duration },
    #[error("invalid commit")]
    InvalidCommit,
    #[error("no diff")]
    NoDiff,
    #[error("corrupt cache file for {0}")]
    CorruptCache(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error("search error: {0}")]
    Search(String),
    #[error("invalid search query: {0}")]
    InvalidQuery(String),
    #[error("password hash error: {0}")]
    PasswordHash(String),
    #[error("session error: {0}")]
    Session(#[from] jsonwebtoken::errors::Error),
}

impl From<tantivy::TantivyError> for WikiError {
    fn from(err: tantivy::TantivyError) -> Self {
        Self::Search(err.to_string())
    }
}

impl From<tantivy::directory::error::OpenDirectoryError> for WikiError {
    fn from(err: tantivy::directory::error::OpenDirectoryError) -> Self {
        Self::Search(err.to_string())
    }
}

impl From<tantivy::query::QueryParserError> for WikiError {
    fn from(err: tantivy::query::QueryParserError) -> Self {
        Self::InvalidQuery(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for WikiError {
    fn from(err: argon2::password_hash::Error) -> Self {
        Self::PasswordHash(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WikiError>;
