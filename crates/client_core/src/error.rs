use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("network request failed: {0}")]
    Network(String),
    #[error("not authorized: {message}")]
    Authorization { status: Option<u16>, message: String },
    #[error("request rejected: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl CatalogError {
    pub fn missing_credential() -> Self {
        CatalogError::Authorization {
            status: None,
            message: "no bearer credential in session".to_string(),
        }
    }

    pub fn from_api_error(status: u16, error: ApiError) -> Self {
        match error.code {
            ErrorCode::Unauthorized | ErrorCode::Forbidden => CatalogError::Authorization {
                status: Some(status),
                message: error.message,
            },
            ErrorCode::NotFound => CatalogError::NotFound(error.message),
            ErrorCode::Validation => CatalogError::Validation(error.message),
            ErrorCode::RateLimited | ErrorCode::Internal => CatalogError::Server {
                status,
                message: error.message,
            },
        }
    }

    pub fn kind(&self) -> FeedErrorKind {
        match self {
            CatalogError::Network(_) => FeedErrorKind::Network,
            CatalogError::Authorization { .. } => FeedErrorKind::Authorization,
            CatalogError::Validation(_) => FeedErrorKind::Validation,
            CatalogError::NotFound(_) => FeedErrorKind::NotFound,
            CatalogError::Server { .. } => FeedErrorKind::Server,
        }
    }

    /// 403 responses whose message asks the user to verify their email.
    pub fn requires_email_verification(&self) -> bool {
        matches!(
            self,
            CatalogError::Authorization {
                status: Some(403),
                message,
            } if message.to_ascii_lowercase().contains("verify")
        )
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let status = status.as_u16();
            return CatalogError::from_api_error(status, ApiError::from_response(status, ""));
        }
        if err.is_decode() {
            return CatalogError::Server {
                status: 200,
                message: format!("invalid response body: {err}"),
            };
        }
        CatalogError::Network(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedErrorKind {
    Network,
    Authorization,
    Validation,
    NotFound,
    Server,
}

/// Failure recorded on the feed state for the view to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFailure {
    pub kind: FeedErrorKind,
    pub message: String,
}

impl FeedFailure {
    pub fn invalidates_session(&self) -> bool {
        self.kind == FeedErrorKind::Authorization
    }
}

impl From<&CatalogError> for FeedFailure {
    fn from(err: &CatalogError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses_into_feed_error_kinds() {
        let cases = [
            (401, FeedErrorKind::Authorization),
            (403, FeedErrorKind::Authorization),
            (404, FeedErrorKind::NotFound),
            (422, FeedErrorKind::Validation),
            (400, FeedErrorKind::Validation),
            (500, FeedErrorKind::Server),
            (503, FeedErrorKind::Server),
        ];
        for (status, expected) in cases {
            let err = CatalogError::from_api_error(status, ApiError::from_response(status, ""));
            assert_eq!(err.kind(), expected, "status {status}");
        }
    }

    #[test]
    fn server_message_is_preserved() {
        let body = r#"{"success":false,"error":{"message":"Please verify your email"}}"#;
        let err = CatalogError::from_api_error(403, ApiError::from_response(403, body));
        assert!(err.requires_email_verification());
        assert!(err.to_string().contains("Please verify your email"));
    }

    #[test]
    fn only_authorization_failures_invalidate_the_session() {
        assert!(FeedFailure::from(&CatalogError::missing_credential()).invalidates_session());
        assert!(!FeedFailure::from(&CatalogError::Network("down".into())).invalidates_session());
    }
}
