//! Request Error types
//!
//! Every failure is classified where it originates. The executor and the
//! backoff policies only look at the variant (or its [`ErrorKind`]), never at
//! the message text.

use serde::Deserialize;
use thiserror::Error;

/// Cloud Foundry error code for "app has not finished staging"
const CF_CODE_NOT_STAGED: i64 = 170002;

/// Cloud Foundry error code for "could not fetch stats for stopped app"
const CF_CODE_APP_STOPPED_STATS: i64 = 200003;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Application has not finished staging: {0}")]
    StagingNotFinished(String),

    #[error("Application is in stopped state: {0}")]
    AppInStoppedState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("{message}")]
    RetriesExhausted {
        message: String,
        attempts: u32,
        #[source]
        source: Box<RequestError>,
    },

    #[error("Authorization failed after login retry: {source}")]
    AuthorizationFailed {
        #[source]
        source: Box<RequestError>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

/// Coarse classification used by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Server not ready yet (503, staging, stopped app); may be retried
    Transient,
    /// 401/403; triggers a single login escalation
    Authorization,
    /// Resource does not exist; never retried
    NotFound,
    /// Caller gave up; never retried or converted
    Cancelled,
    /// Everything else
    Other,
}

/// Error envelope returned by the Cloud Controller
#[derive(Debug, Default, Deserialize)]
struct CfErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::ServiceUnavailable(_)
            | RequestError::StagingNotFinished(_)
            | RequestError::AppInStoppedState(_) => ErrorKind::Transient,
            RequestError::Unauthorized(_) | RequestError::Forbidden(_) => ErrorKind::Authorization,
            RequestError::NotFound(_) => ErrorKind::NotFound,
            RequestError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    pub fn is_authorization(&self) -> bool {
        self.kind() == ErrorKind::Authorization
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Classify a bare HTTP status code
    pub fn from_status(status: u16, description: impl Into<String>) -> Self {
        let description = description.into();
        match status {
            401 => RequestError::Unauthorized(description),
            403 => RequestError::Forbidden(description),
            404 => RequestError::NotFound(description),
            503 => RequestError::ServiceUnavailable(description),
            _ => RequestError::Http {
                status,
                message: description,
            },
        }
    }

    /// Classify an error response from the Cloud Controller.
    ///
    /// The numeric `code` (or the `error_code` tag) of the CF error envelope
    /// takes precedence over the HTTP status, because staging and stopped-app
    /// conditions arrive as plain 400s.
    pub fn from_cf_response(status: u16, body: &str) -> Self {
        let parsed: CfErrorBody = serde_json::from_str(body).unwrap_or_default();
        let description = parsed
            .description
            .clone()
            .unwrap_or_else(|| body.trim().to_string());

        let tag = parsed.error_code.as_deref();
        if parsed.code == Some(CF_CODE_NOT_STAGED) || tag == Some("CF-NotStaged") {
            return RequestError::StagingNotFinished(description);
        }
        if parsed.code == Some(CF_CODE_APP_STOPPED_STATS) || tag == Some("CF-AppStoppedStatsError")
        {
            return RequestError::AppInStoppedState(description);
        }

        Self::from_status(status, description)
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => RequestError::from_status(status.as_u16(), err.to_string()),
            None => RequestError::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_from_status() {
        assert!(RequestError::from_status(401, "x").is_authorization());
        assert!(RequestError::from_status(403, "x").is_authorization());
        assert!(RequestError::from_status(404, "x").is_not_found());
        assert!(RequestError::from_status(503, "x").is_transient());
        assert_eq!(RequestError::from_status(500, "x").kind(), ErrorKind::Other);
    }

    #[test]
    fn test_from_cf_response_staging() {
        let body = r#"{"code":170002,"description":"App has not finished staging","error_code":"CF-NotStaged"}"#;
        let err = RequestError::from_cf_response(400, body);
        assert!(matches!(err, RequestError::StagingNotFinished(ref d) if d == "App has not finished staging"));
    }

    #[test]
    fn test_from_cf_response_stopped_app() {
        let body = r#"{"code":200003,"description":"Could not fetch stats for stopped app: demo"}"#;
        let err = RequestError::from_cf_response(400, body);
        assert!(matches!(err, RequestError::AppInStoppedState(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_from_cf_response_falls_back_to_status() {
        let err = RequestError::from_cf_response(404, "not json at all");
        assert!(matches!(err, RequestError::NotFound(ref d) if d == "not json at all"));

        let body = r#"{"code":10000,"description":"Unknown request"}"#;
        let err = RequestError::from_cf_response(400, body);
        assert!(matches!(err, RequestError::Http { status: 400, .. }));
    }

    #[test]
    fn test_wrappers_keep_source() {
        let err = RequestError::AuthorizationFailed {
            source: Box::new(RequestError::Unauthorized("token expired".to_string())),
        };
        assert_eq!(err.kind(), ErrorKind::Other);
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "Unauthorized: token expired");
    }
}
