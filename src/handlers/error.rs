// src/handlers/error.rs
use std::fmt;
use warp::http::StatusCode;
use warp::reject::Reject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    BadRequest,
    Unauthorized,
    Upstream,
    Internal,
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub message: String,
    pub kind: ApiErrorKind,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        ApiError {
            message: message.into(),
            kind: ApiErrorKind::Internal,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            message: message.into(),
            kind: ApiErrorKind::BadRequest,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError {
            message: message.into(),
            kind: ApiErrorKind::Unauthorized,
        }
    }

    pub fn upstream_error(message: impl Into<String>) -> Self {
        ApiError {
            message: message.into(),
            kind: ApiErrorKind::Upstream,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            ApiErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ApiErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            ApiErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}
impl Reject for ApiError {}
