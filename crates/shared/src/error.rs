//! Error body shared by the backend and its clients. For failures the user can
//! act on, `message` is a machine-readable code that clients translate.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NO_WORKSPACE: &str = "no_workspace";
pub const OAUTH_UNAUTHORIZED: &str = "oauth_unauthorized";
pub const WORKSPACE_FORBIDDEN: &str = "workspace_forbidden";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    /// A provider or other third party failed.
    Upstream,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn no_workspace() -> Self {
        Self::new(ErrorCode::Validation, NO_WORKSPACE)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{what} not found"))
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Internal, err.to_string())
    }
}

/// An [`ApiError`] received by a client, carried inside `anyhow` chains.
#[derive(Debug, Error)]
#[error("backend rejected the request ({code:?}): {message}")]
pub struct ApiException {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiException {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ApiError> for ApiException {
    fn from(value: ApiError) -> Self {
        Self::new(value.code, value.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_uses_snake_case_codes() {
        let body = serde_json::to_string(&ApiError::no_workspace()).expect("json");
        assert_eq!(body, r#"{"code":"validation","message":"no_workspace"}"#);
    }

    #[test]
    fn exception_keeps_the_backend_message() {
        let exception = ApiException::from(ApiError::not_found("video job"));
        assert_eq!(exception.code, ErrorCode::NotFound);
        assert_eq!(exception.message, "video job not found");
    }
}
