//! API error types and duplicate/transient/fatal classification

use cstack_core::constants::error_codes;
use serde_json::Value;
use thiserror::Error;

/// Result type for Management API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by the Management API adapter
#[derive(Error, Debug)]
pub enum ApiError {
    /// The API returned a structured error response
    #[error("API error (status {status}, code {code:?}): {message}")]
    Api {
        status: u16,
        code: Option<u32>,
        message: String,
        /// Per-field error details as returned by the API
        errors: Value,
    },

    /// Transport-level failure (connection, TLS, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response body did not have the expected shape
    #[error("Unexpected response shape: {0}")]
    UnexpectedResponse(String),

    /// Retries exhausted on a retryable status
    #[error("Retries exhausted after {attempts} attempts (last status {status})")]
    RetriesExhausted { attempts: u32, status: u16 },
}

impl ApiError {
    pub fn code(&self) -> Option<u32> {
        match self {
            ApiError::Api { code, .. } => *code,
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::RetriesExhausted { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Uniform classification of an API failure, so importers never match raw
/// vendor error codes inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOutcome {
    /// The duplicate already exists in the destination; treat as success
    /// and discover its UID instead of retrying the create.
    AlreadyExists,
    /// Worth recording and moving on; an idempotent re-run may succeed.
    Transient,
    /// Abort the whole run (auth failure and the like).
    Fatal,
}

fn classify_with_duplicates(err: &ApiError, duplicate_codes: &[u32]) -> ApiOutcome {
    if let Some(code) = err.code() {
        if duplicate_codes.contains(&code) {
            return ApiOutcome::AlreadyExists;
        }
    }
    match err.status() {
        Some(401) | Some(403) => ApiOutcome::Fatal,
        Some(429) => ApiOutcome::Transient,
        Some(s) if s >= 500 => ApiOutcome::Transient,
        _ => ApiOutcome::Transient,
    }
}

/// Classify a content type create/update failure (code 115 == duplicate)
pub fn classify_content_type(err: &ApiError) -> ApiOutcome {
    classify_with_duplicates(err, &[error_codes::DUPLICATE_CONTENT_TYPE])
}

/// Classify an entry create failure (code 119 == duplicate title)
pub fn classify_entry(err: &ApiError) -> ApiOutcome {
    classify_with_duplicates(err, &[error_codes::DUPLICATE_ENTRY_TITLE])
}

/// Classify a locale create failure (code 247 == duplicate code)
pub fn classify_locale(err: &ApiError) -> ApiOutcome {
    classify_with_duplicates(err, &[error_codes::DUPLICATE_LOCALE])
}

/// Classify a failure for resources with no vendor duplicate code
pub fn classify_generic(err: &ApiError) -> ApiOutcome {
    classify_with_duplicates(err, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api_error(status: u16, code: Option<u32>) -> ApiError {
        ApiError::Api {
            status,
            code,
            message: "test".to_string(),
            errors: json!({}),
        }
    }

    #[test]
    fn test_duplicate_content_type_is_already_exists() {
        let err = api_error(422, Some(115));
        assert_eq!(classify_content_type(&err), ApiOutcome::AlreadyExists);
    }

    #[test]
    fn test_duplicate_entry_title_is_already_exists() {
        let err = api_error(422, Some(119));
        assert_eq!(classify_entry(&err), ApiOutcome::AlreadyExists);
    }

    #[test]
    fn test_duplicate_locale_is_already_exists() {
        let err = api_error(422, Some(247));
        assert_eq!(classify_locale(&err), ApiOutcome::AlreadyExists);
    }

    #[test]
    fn test_entry_code_is_not_duplicate_for_content_types() {
        let err = api_error(422, Some(119));
        assert_eq!(classify_content_type(&err), ApiOutcome::Transient);
    }

    #[test]
    fn test_auth_failure_is_fatal() {
        assert_eq!(classify_generic(&api_error(401, None)), ApiOutcome::Fatal);
        assert_eq!(classify_generic(&api_error(403, None)), ApiOutcome::Fatal);
    }

    #[test]
    fn test_rate_limit_and_server_errors_are_transient() {
        assert_eq!(classify_generic(&api_error(429, None)), ApiOutcome::Transient);
        assert_eq!(classify_generic(&api_error(502, None)), ApiOutcome::Transient);
        assert_eq!(
            classify_generic(&ApiError::Transport("connection reset".to_string())),
            ApiOutcome::Transient
        );
    }
}
